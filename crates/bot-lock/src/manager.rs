//! The distributed lock manager: acquisition, heartbeat renewal, the
//! expired-lock sweeper, and the full public contract.
//!
//! Each held lock gets its own heartbeat ticker, spawned with a
//! `CancellationToken` and cloned component `Arc`s rather than a
//! reference to the whole manager. A local lease map tracks what this
//! process believes it holds, independent of the remote source of truth.

use crate::config::LockManagerConfig;
use crate::error::{LockError, Result};
use crate::record::LockRecord;
use bot_common::{Clock, Random};
use bot_kv::{CasOptions, KvTransport, ValueKind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct LocalLease {
    version: String,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    pub ttl: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Overall wall-clock budget for the acquisition attempt, including
    /// all held-lock retry waits. `None` means no bound beyond `max_retries`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AcquireSuccess {
    pub version: String,
    pub stolen: bool,
    pub stolen_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockStatus {
    Held {
        owner: String,
        version: String,
        remaining_ms: i64,
        heartbeat_count: u64,
    },
    Expired,
    Released,
}

#[derive(Clone)]
pub struct LockManager {
    transport: Arc<KvTransport>,
    config: LockManagerConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn Random>,
    local_leases: Arc<DashMap<String, LocalLease>>,
    sweeper_cancel: CancellationToken,
}

impl LockManager {
    pub fn new(transport: Arc<KvTransport>, config: LockManagerConfig, clock: Arc<dyn Clock>, random: Arc<dyn Random>) -> Self {
        let local_leases: Arc<DashMap<String, LocalLease>> = Arc::new(DashMap::new());
        let sweeper_cancel = CancellationToken::new();

        spawn_sweeper(
            transport.clone(),
            local_leases.clone(),
            clock.clone(),
            config.sweep_interval,
            sweeper_cancel.clone(),
        );

        Self {
            transport,
            config,
            clock,
            random,
            local_leases,
            sweeper_cancel,
        }
    }

    fn key_for(name: &str) -> String {
        format!("lock:{name}")
    }

    async fn read_record(&self, name: &str) -> Result<Option<(String, LockRecord)>> {
        read_record_via(&self.transport, name).await
    }

    pub async fn acquire(&self, name: &str, owner: &str, opts: AcquireOptions) -> Result<AcquireSuccess> {
        let timeout = match opts.timeout {
            Some(bound) => bound,
            None => return self.acquire_inner(name, owner, opts).await,
        };

        // Defer-release: run the attempt on a detached task rather than
        // bare-dropping it on timeout. If the CAS lands after we've already
        // given up locally, the task itself releases the lock instead of
        // leaving it held with no local heartbeat to renew it.
        let abandoned = Arc::new(AtomicBool::new(false));
        let manager = self.clone();
        let name_owned = name.to_string();
        let owner_owned = owner.to_string();
        let abandoned_task = abandoned.clone();
        let task = tokio::spawn(async move {
            let result = manager.acquire_inner(&name_owned, &owner_owned, opts).await;
            if abandoned_task.load(Ordering::SeqCst) {
                if result.is_ok() {
                    tracing::warn!(lock = %name_owned, owner = %owner_owned, "acquire won the CAS after its caller timed out, releasing");
                    manager.release(&name_owned, &owner_owned).await;
                }
            }
            result
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LockError::Held {
                current_owner: "unknown".to_string(),
                expires_at: None,
            }),
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(LockError::Held {
                    current_owner: "unknown".to_string(),
                    expires_at: None,
                })
            }
        }
    }

    /// Steal a named lock via CAS-if-equals against its last-observed
    /// record, without requiring that record to have passed its TTL —
    /// the same atomic replace the expired-lock branch of `acquire_inner`
    /// uses, offered here for callers (instance-level preemption) that
    /// have independently decided the current holder looks dead. A CAS
    /// loss means the holder renewed in the gap and is still alive; that
    /// is surfaced as an ordinary `Held` error rather than clobbered.
    pub async fn steal(&self, name: &str, owner: &str, opts: AcquireOptions) -> Result<AcquireSuccess> {
        let ttl = opts.ttl.unwrap_or(self.config.default_ttl);
        let key = Self::key_for(name);

        let (raw, record) = match self.read_record(name).await? {
            Some(pair) => pair,
            None => return self.acquire(name, owner, opts).await,
        };

        let now = self.clock.now();
        let version = self.random.lock_version();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
        let stolen_record = LockRecord::stolen(owner, &version.to_string(), expires_at, &record.instance_id, now);

        let stolen = self
            .transport
            .compare_and_set_json(&key, &stolen_record, Some(ttl.as_secs()), CasOptions::IfEquals(raw))
            .await?;

        if stolen {
            self.start_heartbeat(name, owner, version.to_string(), ttl);
            Ok(AcquireSuccess {
                version: version.to_string(),
                stolen: true,
                stolen_from: Some(record.instance_id),
            })
        } else {
            Err(LockError::Held {
                current_owner: record.instance_id,
                expires_at: Some(record.expires_at),
            })
        }
    }

    async fn acquire_inner(&self, name: &str, owner: &str, opts: AcquireOptions) -> Result<AcquireSuccess> {
        let ttl = opts.ttl.unwrap_or(self.config.default_ttl);
        let max_retries = opts.max_retries.unwrap_or(self.config.max_retries);
        let key = Self::key_for(name);

        let mut held_retries = 0u32;
        loop {
            let now = self.clock.now();
            let version = self.random.lock_version();
            let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
            let fresh = LockRecord::fresh(owner, &version.to_string(), expires_at);

            let acquired = self
                .transport
                .compare_and_set_json(&key, &fresh, Some(ttl.as_secs()), CasOptions::IfNotExists)
                .await?;

            if acquired {
                self.start_heartbeat(name, owner, version.to_string(), ttl);
                return Ok(AcquireSuccess {
                    version: version.to_string(),
                    stolen: false,
                    stolen_from: None,
                });
            }

            match self.read_record(name).await? {
                None => continue, // lost the race against a concurrent delete; retry step 2
                Some((raw, record)) => {
                    if !record.is_expired(now) {
                        held_retries += 1;
                        if held_retries > max_retries {
                            return Err(LockError::Held {
                                current_owner: record.instance_id,
                                expires_at: Some(record.expires_at),
                            });
                        }
                        sleep(self.config.retry_wait).await;
                        continue;
                    }

                    let stolen_record = LockRecord::stolen(owner, &version.to_string(), expires_at, &record.instance_id, now);
                    let stolen = self
                        .transport
                        .compare_and_set_json(&key, &stolen_record, Some(ttl.as_secs()), CasOptions::IfEquals(raw))
                        .await?;

                    if stolen {
                        self.start_heartbeat(name, owner, version.to_string(), ttl);
                        return Ok(AcquireSuccess {
                            version: version.to_string(),
                            stolen: true,
                            stolen_from: Some(record.instance_id),
                        });
                    }
                    // Lost the steal race; retry from the top.
                }
            }
        }
    }

    fn start_heartbeat(&self, name: &str, owner: &str, version: String, ttl: Duration) {
        let cancel = CancellationToken::new();
        self.local_leases.insert(
            name.to_string(),
            LocalLease {
                version: version.clone(),
                cancel: cancel.clone(),
            },
        );

        spawn_heartbeat(
            self.transport.clone(),
            self.local_leases.clone(),
            self.clock.clone(),
            name.to_string(),
            owner.to_string(),
            version,
            ttl,
            self.config.heartbeat_interval,
            self.config.renewal_threshold,
            cancel,
        );
    }

    pub async fn release(&self, name: &str, owner: &str) -> bool {
        match self.read_record(name).await {
            Ok(Some((_, record))) if record.instance_id == owner => {
                let key = Self::key_for(name);
                match self.transport.delete(&key).await {
                    Ok(_) => {
                        if let Some((_, lease)) = self.local_leases.remove(name) {
                            lease.cancel.cancel();
                        }
                        true
                    }
                    Err(e) => {
                        tracing::warn!(lock = %name, error = %e, "failed to delete lock on release");
                        false
                    }
                }
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "failed to read lock on release");
                false
            }
        }
    }

    pub async fn force_release(&self, name: &str) -> bool {
        let key = Self::key_for(name);
        let prior_owner = self.read_record(name).await.ok().flatten().map(|(_, r)| r.instance_id);
        match self.transport.delete(&key).await {
            Ok(existed) => {
                if let Some(owner) = prior_owner {
                    tracing::warn!(lock = %name, prior_owner = %owner, "force-released lock");
                }
                if let Some((_, lease)) = self.local_leases.remove(name) {
                    lease.cancel.cancel();
                }
                existed
            }
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "force-release failed");
                false
            }
        }
    }

    pub async fn get_status(&self, name: &str) -> Result<LockStatus> {
        let now = self.clock.now();
        match self.read_record(name).await? {
            None => Ok(LockStatus::Released),
            Some((_, record)) if record.is_expired(now) => Ok(LockStatus::Expired),
            Some((_, record)) => Ok(LockStatus::Held {
                owner: record.instance_id,
                version: record.version,
                remaining_ms: (record.expires_at - now).num_milliseconds(),
                heartbeat_count: record.heartbeat_count,
            }),
        }
    }

    pub async fn is_held_by(&self, name: &str, owner: &str) -> bool {
        matches!(self.get_status(name).await, Ok(LockStatus::Held { owner: held, .. }) if held == owner)
    }

    pub async fn release_all(&self, owner: &str) {
        let names: Vec<String> = self.local_leases.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.release(&name, owner).await;
        }
    }

    pub async fn shutdown(&self) {
        self.sweeper_cancel.cancel();
        for entry in self.local_leases.iter() {
            entry.cancel.cancel();
        }
        self.local_leases.clear();
    }
}

async fn read_record_via(transport: &KvTransport, name: &str) -> Result<Option<(String, LockRecord)>> {
    let key = format!("lock:{name}");
    match transport.get(&key, ValueKind::String).await? {
        None => Ok(None),
        Some(value) => {
            let raw = value.as_str().unwrap_or_default().to_string();
            let record: LockRecord =
                serde_json::from_str(&raw).map_err(|e| LockError::CorruptRecord(name.to_string(), e.to_string()))?;
            Ok(Some((raw, record)))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_heartbeat(
    transport: Arc<KvTransport>,
    local_leases: Arc<DashMap<String, LocalLease>>,
    clock: Arc<dyn Clock>,
    name: String,
    owner: String,
    version: String,
    ttl: Duration,
    interval: Duration,
    renewal_threshold: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(lock = %name, "heartbeat ticker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match read_record_via(&transport, &name).await {
                        Ok(Some((raw, record))) if record.instance_id == owner && record.version == version => {
                            let now = clock.now();
                            let remaining = record.expires_at - now;
                            if remaining <= chrono::Duration::from_std(renewal_threshold).unwrap_or(chrono::Duration::seconds(30)) {
                                let renewed = LockRecord {
                                    heartbeat_count: record.heartbeat_count + 1,
                                    expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)),
                                    ..record
                                };
                                let key = format!("lock:{name}");
                                match transport
                                    .compare_and_set_json(&key, &renewed, Some(ttl.as_secs()), CasOptions::IfEquals(raw))
                                    .await
                                {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        tracing::warn!(lock = %name, "lock renewal lost the CAS race, stopping heartbeat");
                                        local_leases.remove(&name);
                                        break;
                                    }
                                    Err(e) => {
                                        tracing::warn!(lock = %name, error = %e, "lock renewal failed, stopping heartbeat");
                                        local_leases.remove(&name);
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(_) => {
                            tracing::debug!(lock = %name, "lock lost (missing or owned elsewhere), stopping heartbeat");
                            local_leases.remove(&name);
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(lock = %name, error = %e, "heartbeat read failed, stopping ticker");
                            local_leases.remove(&name);
                            break;
                        }
                    }
                }
            }
        }
    });
}

fn spawn_sweeper(
    transport: Arc<KvTransport>,
    local_leases: Arc<DashMap<String, LocalLease>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(&transport, &local_leases, clock.as_ref()).await {
                        tracing::warn!(error = %e, "lock sweep failed");
                    }
                }
            }
        }
    });
}

async fn sweep_once(transport: &KvTransport, local_leases: &DashMap<String, LocalLease>, clock: &dyn Clock) -> Result<()> {
    let keys = transport.list_keys("lock:").await?;
    let now = clock.now();
    for key in keys {
        let name = key.trim_start_matches("lock:").to_string();
        if local_leases.contains_key(&name) {
            continue;
        }
        if let Some((_, record)) = read_record_via(transport, &name).await? {
            if record.is_expired(now) {
                let _ = transport.delete(&key).await;
                tracing::debug!(lock = %name, "swept expired lock");
            }
        }
    }
    Ok(())
}
