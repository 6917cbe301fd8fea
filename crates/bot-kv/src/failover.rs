//! Pure failover state machine: which provider is active, how many
//! consecutive retryable failures it has accrued, and when the next
//! recovery probe against the primary is due. Kept separate from
//! `KvTransport` so the switching logic can be unit tested without any
//! network I/O.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedProvider {
    Primary,
    Fallback,
}

#[derive(Debug)]
pub struct FailoverState {
    selected: SelectedProvider,
    consecutive_failures: u32,
    failover_threshold: u32,
    has_fallback: bool,
    next_probe_at: Option<DateTime<Utc>>,
    probe_interval_normal: ChronoDuration,
    probe_interval_quota: ChronoDuration,
}

impl FailoverState {
    pub fn new(
        has_fallback: bool,
        failover_threshold: u32,
        probe_interval_normal: std::time::Duration,
        probe_interval_quota: std::time::Duration,
    ) -> Self {
        Self {
            selected: SelectedProvider::Primary,
            consecutive_failures: 0,
            failover_threshold,
            has_fallback,
            next_probe_at: None,
            probe_interval_normal: ChronoDuration::from_std(probe_interval_normal)
                .unwrap_or(ChronoDuration::seconds(1800)),
            probe_interval_quota: ChronoDuration::from_std(probe_interval_quota)
                .unwrap_or(ChronoDuration::seconds(43_200)),
        }
    }

    pub fn selected(&self) -> SelectedProvider {
        self.selected
    }

    /// A successful call against the currently selected provider resets
    /// the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// A retryable failure against the currently selected provider.
    /// Returns `true` if this call caused a switch to the fallback.
    pub fn record_retryable_failure(&mut self, is_quota_ceiling: bool, now: DateTime<Utc>) -> bool {
        if self.selected == SelectedProvider::Fallback {
            // Failures against the fallback don't cascade anywhere else;
            // there's nothing left to fail over to.
            return false;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures < self.failover_threshold {
            return false;
        }

        if !self.has_fallback {
            // Stay on the primary — a switch with nowhere to go would
            // just strand every subsequent call.
            return false;
        }

        self.selected = SelectedProvider::Fallback;
        self.consecutive_failures = 0;
        let interval = if is_quota_ceiling {
            self.probe_interval_quota
        } else {
            self.probe_interval_normal
        };
        self.next_probe_at = Some(now + interval);
        true
    }

    /// Whether it's time to probe the primary for recovery.
    pub fn recovery_probe_due(&self, now: DateTime<Utc>) -> bool {
        self.selected == SelectedProvider::Fallback
            && self.next_probe_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Record the outcome of a recovery probe against the primary.
    pub fn record_probe_result(&mut self, success: bool, now: DateTime<Utc>) {
        if success {
            self.selected = SelectedProvider::Primary;
            self.consecutive_failures = 0;
            self.next_probe_at = None;
        } else {
            self.next_probe_at = Some(now + self.probe_interval_normal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state(has_fallback: bool) -> FailoverState {
        FailoverState::new(has_fallback, 3, Duration::from_secs(1800), Duration::from_secs(43_200))
    }

    #[test]
    fn switches_after_exactly_three_consecutive_failures() {
        let mut s = state(true);
        let now = Utc::now();
        assert!(!s.record_retryable_failure(false, now));
        assert!(!s.record_retryable_failure(false, now));
        assert_eq!(s.selected(), SelectedProvider::Primary);
        assert!(s.record_retryable_failure(false, now));
        assert_eq!(s.selected(), SelectedProvider::Fallback);
    }

    #[test]
    fn success_resets_the_streak() {
        let mut s = state(true);
        let now = Utc::now();
        s.record_retryable_failure(false, now);
        s.record_retryable_failure(false, now);
        s.record_success();
        assert!(!s.record_retryable_failure(false, now));
        assert!(!s.record_retryable_failure(false, now));
        assert_eq!(s.selected(), SelectedProvider::Primary);
    }

    #[test]
    fn without_a_fallback_stays_on_primary() {
        let mut s = state(false);
        let now = Utc::now();
        for _ in 0..10 {
            assert!(!s.record_retryable_failure(false, now));
        }
        assert_eq!(s.selected(), SelectedProvider::Primary);
    }

    #[test]
    fn quota_ceiling_schedules_the_longer_probe_interval() {
        let mut s = state(true);
        let now = Utc::now();
        s.record_retryable_failure(true, now);
        s.record_retryable_failure(true, now);
        assert!(s.record_retryable_failure(true, now));
        assert!(!s.recovery_probe_due(now + ChronoDuration::minutes(31)));
        assert!(s.recovery_probe_due(now + ChronoDuration::hours(13)));
    }

    #[test]
    fn successful_probe_switches_back_to_primary() {
        let mut s = state(true);
        let now = Utc::now();
        s.record_retryable_failure(false, now);
        s.record_retryable_failure(false, now);
        s.record_retryable_failure(false, now);
        assert!(s.recovery_probe_due(now + ChronoDuration::minutes(31)));
        s.record_probe_result(true, now + ChronoDuration::minutes(31));
        assert_eq!(s.selected(), SelectedProvider::Primary);
    }

    #[test]
    fn failed_probe_reschedules_and_stays_on_fallback() {
        let mut s = state(true);
        let now = Utc::now();
        s.record_retryable_failure(false, now);
        s.record_retryable_failure(false, now);
        s.record_retryable_failure(false, now);
        let probe_time = now + ChronoDuration::minutes(31);
        s.record_probe_result(false, probe_time);
        assert_eq!(s.selected(), SelectedProvider::Fallback);
        assert!(!s.recovery_probe_due(probe_time + ChronoDuration::minutes(1)));
        assert!(s.recovery_probe_due(probe_time + ChronoDuration::minutes(31)));
    }
}
