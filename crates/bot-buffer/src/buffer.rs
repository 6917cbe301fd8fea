//! The media-group buffer: dedup, batching, flush, cleanup sweep, and
//! restart persistence for grouped messages (a photo album or document
//! set sent as one logical unit).
//!
//! Follows `bot-lock`'s sweeper/heartbeat shape: free functions closing
//! over cloned component `Arc`s, spawned from `new`, cancelled
//! idempotently in `shutdown`. The buffer's cleanup sweeper and local
//! per-group retry timer follow the exact same pattern one level up the
//! stack.

use crate::config::BufferConfig;
use crate::error::Result;
use crate::record::{BufferSnapshot, BufferedMessage, GroupMeta, SnapshotEntry, TimerEntry};
use bot_common::{Clock, TaskEngine};
use bot_kv::{KvTransport, SetOptions, ValueKind};
use bot_lock::{AcquireOptions, LockError, LockManager, LockStatus};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddReason {
    Duplicate,
    FlushTriggered,
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: bool,
    pub reason: AddReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed,
    LockHeldElsewhere,
    Retrying,
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct GroupStatusEntry {
    pub gid: String,
    pub message_count: usize,
    pub error_count: u32,
    pub updated_at: DateTime<Utc>,
}

pub struct MediaGroupBuffer {
    transport: Arc<KvTransport>,
    lock_manager: Arc<LockManager>,
    task_engine: Arc<dyn TaskEngine>,
    instance_id: String,
    config: BufferConfig,
    clock: Arc<dyn Clock>,
    seq_counter: AtomicI64,
    cleanup_cancel: CancellationToken,
}

impl MediaGroupBuffer {
    pub fn new(
        transport: Arc<KvTransport>,
        lock_manager: Arc<LockManager>,
        task_engine: Arc<dyn TaskEngine>,
        instance_id: impl Into<String>,
        config: BufferConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let instance_id = instance_id.into();
        let cleanup_cancel = CancellationToken::new();

        spawn_cleanup_sweeper(
            transport.clone(),
            lock_manager.clone(),
            task_engine.clone(),
            instance_id.clone(),
            config.clone(),
            clock.clone(),
            cleanup_cancel.clone(),
        );

        Self {
            transport,
            lock_manager,
            task_engine,
            instance_id,
            config,
            clock,
            seq_counter: AtomicI64::new(0),
            cleanup_cancel,
        }
    }

    /// Process-wide monotonic fallback for `seq`: wall-clock millis, bumped
    /// by at least one whenever the clock doesn't itself advance between
    /// calls (non-monotonic or coarse-grained clock sources).
    fn next_seq(&self) -> i64 {
        let now = self.clock.now().timestamp_millis();
        let mut last = self.seq_counter.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.seq_counter.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    pub async fn add(
        &self,
        msg_id: &str,
        gid: &str,
        target: &str,
        user_id: &str,
        payload: serde_json::Value,
        has_media: bool,
    ) -> Result<AddOutcome> {
        let dedup_key = format!("media_group_buffer:processed_messages:{msg_id}");
        if self.transport.get(&dedup_key, ValueKind::String).await?.is_some() {
            return Ok(AddOutcome { added: false, reason: AddReason::Duplicate });
        }

        let now = self.clock.now();
        self.transport
            .set(&dedup_key, &now.to_rfc3339(), Some(self.config.stale_threshold.as_secs()), SetOptions::default())
            .await?;

        let seq = self.next_seq();

        let meta_key = format!("media_group_buffer:buffer:{gid}:meta");
        let meta = match self.transport.get_json::<GroupMeta>(&meta_key).await? {
            Some(mut existing) => {
                existing.updated_at = now;
                existing
            }
            None => GroupMeta::new(gid, target, user_id, now),
        };
        self.transport.set_json(&meta_key, &meta, None).await?;

        let msg_key = format!("media_group_buffer:buffer:{gid}:msg:{msg_id}");
        let message = BufferedMessage { id: msg_id.to_string(), seq, has_media, payload };
        self.transport.set_json(&msg_key, &message, None).await?;

        let prefix = format!("media_group_buffer:buffer:{gid}:msg:");
        let count = self.transport.list_keys(&prefix).await?.len();

        if count >= self.config.max_batch_size {
            let _ = self.flush_attempt(gid).await?;
            return Ok(AddOutcome { added: true, reason: AddReason::FlushTriggered });
        }

        let expires_at = now + to_chrono(self.config.buffer_timeout);
        reschedule_timer(&self.transport, gid, expires_at).await?;
        self.schedule_local_retry(gid);

        Ok(AddOutcome { added: true, reason: AddReason::Buffered })
    }

    fn schedule_local_retry(&self, gid: &str) {
        let transport = self.transport.clone();
        let lock_manager = self.lock_manager.clone();
        let task_engine = self.task_engine.clone();
        let instance_id = self.instance_id.clone();
        let config = self.config.clone();
        let clock = self.clock.clone();
        let gid = gid.to_string();
        let delay = self.config.buffer_timeout + std::time::Duration::from_millis(50);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) =
                flush_attempt_via(&transport, &lock_manager, task_engine.as_ref(), &instance_id, &config, clock.as_ref(), &gid).await
            {
                tracing::warn!(gid = %gid, error = %e, "scheduled flush attempt failed");
            }
        });
    }

    pub async fn flush_attempt(&self, gid: &str) -> Result<FlushOutcome> {
        flush_attempt_via(&self.transport, &self.lock_manager, self.task_engine.as_ref(), &self.instance_id, &self.config, self.clock.as_ref(), gid).await
    }

    pub async fn get_status(&self) -> Result<Vec<GroupStatusEntry>> {
        let mut entries = Vec::new();
        for key in self.transport.list_keys("media_group_buffer:buffer:").await? {
            if !key.ends_with(":meta") {
                continue;
            }
            if let Some(meta) = self.transport.get_json::<GroupMeta>(&key).await? {
                let prefix = format!("media_group_buffer:buffer:{}:msg:", meta.gid);
                let message_count = self.transport.list_keys(&prefix).await?.len();
                entries.push(GroupStatusEntry {
                    gid: meta.gid,
                    message_count,
                    error_count: meta.error_count,
                    updated_at: meta.updated_at,
                });
            }
        }
        Ok(entries)
    }

    /// Plain counter for observability callers with no metrics backend.
    pub async fn buffered_group_count(&self) -> Result<usize> {
        Ok(self.get_status().await?.len())
    }

    /// Snapshot this instance's pending groups so a restart (or another
    /// instance's restore) can resume them instead of losing them to
    /// the stale threshold.
    pub async fn persist(&self) -> Result<()> {
        let mut groups = Vec::new();
        for key in self.transport.list_keys("media_group_buffer:buffer:").await? {
            if !key.ends_with(":meta") {
                continue;
            }
            if let Some(meta) = self.transport.get_json::<GroupMeta>(&key).await? {
                groups.push(SnapshotEntry { gid: meta.gid, target: meta.target, user_id: meta.user_id, created_at: meta.created_at });
            }
        }
        let snapshot_key = format!("{}:media_group_buffer", self.instance_id);
        self.transport.set_json(&snapshot_key, &BufferSnapshot { groups }, Some(60)).await?;
        Ok(())
    }

    /// Restore snapshot entries within `staleThreshold` and trigger a
    /// flush attempt for each. Stale entries are dropped silently; they
    /// will already have aged out of their own KV keys.
    pub async fn restore(&self) -> Result<usize> {
        let snapshot_key = format!("{}:media_group_buffer", self.instance_id);
        let Some(snapshot) = self.transport.get_json::<BufferSnapshot>(&snapshot_key).await? else {
            return Ok(0);
        };

        let now = self.clock.now();
        let stale = to_chrono(self.config.stale_threshold);
        let mut restored = 0;
        for group in snapshot.groups {
            if now - group.created_at > stale {
                continue;
            }
            match self.flush_attempt(&group.gid).await {
                Ok(_) => restored += 1,
                Err(e) => tracing::warn!(gid = %group.gid, error = %e, "restore flush attempt failed"),
            }
        }
        Ok(restored)
    }

    /// Run one cleanup pass on demand (used by the shutdown supervisor).
    pub async fn cleanup(&self) -> Result<()> {
        sweep_once(&self.transport, &self.lock_manager, self.task_engine.as_ref(), &self.instance_id, &self.config, self.clock.as_ref()).await
    }

    pub async fn shutdown(&self) {
        self.cleanup_cancel.cancel();
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "failed to persist media-group buffer snapshot at shutdown");
        }
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::milliseconds(1000))
}

async fn reschedule_timer(transport: &KvTransport, gid: &str, expires_at: DateTime<Utc>) -> Result<()> {
    let timer = TimerEntry { gid: gid.to_string(), expires_at };
    transport.set_json(&format!("media_group_buffer:timer:{gid}"), &timer, None).await?;
    Ok(())
}

async fn purge_group(transport: &KvTransport, gid: &str) -> Result<()> {
    for key in transport.list_keys(&format!("media_group_buffer:buffer:{gid}:")).await? {
        let _ = transport.delete(&key).await;
    }
    let _ = transport.delete(&format!("media_group_buffer:timer:{gid}")).await;
    Ok(())
}

async fn flush_attempt_via(
    transport: &KvTransport,
    lock_manager: &LockManager,
    task_engine: &dyn TaskEngine,
    instance_id: &str,
    config: &BufferConfig,
    clock: &dyn Clock,
    gid: &str,
) -> Result<FlushOutcome> {
    let lock_name = format!("media_group_buffer:lock:{gid}");
    let acquired = match lock_manager.acquire(&lock_name, instance_id, AcquireOptions { ttl: Some(config.lock_ttl), ..Default::default() }).await {
        Ok(a) => a,
        Err(LockError::Held { .. }) => return Ok(FlushOutcome::LockHeldElsewhere),
        Err(e) => {
            tracing::warn!(gid = %gid, error = %e, "flush attempt could not acquire lock, retrying next tick");
            return Ok(FlushOutcome::Retrying);
        }
    };

    let outcome = run_flush_under_lock(transport, lock_manager, task_engine, config, clock, gid, &lock_name, &acquired.version).await;
    lock_manager.release(&lock_name, instance_id).await;
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_flush_under_lock(
    transport: &KvTransport,
    lock_manager: &LockManager,
    task_engine: &dyn TaskEngine,
    config: &BufferConfig,
    clock: &dyn Clock,
    gid: &str,
    lock_name: &str,
    acquired_version: &str,
) -> Result<FlushOutcome> {
    let prefix = format!("media_group_buffer:buffer:{gid}:msg:");
    let mut messages = Vec::new();
    for key in transport.list_keys(&prefix).await? {
        if let Some(message) = transport.get_json::<BufferedMessage>(&key).await? {
            messages.push(message);
        }
    }
    messages.sort_by_key(|m| (m.seq, m.id.clone()));

    let now = clock.now();

    if messages.is_empty() || !messages.iter().all(|m| m.has_media) {
        tracing::debug!(gid = %gid, "flush attempt deferred: group not yet valid for dispatch");
        reschedule_timer(transport, gid, now + to_chrono(config.buffer_timeout)).await?;
        return Ok(FlushOutcome::Retrying);
    }

    let status = lock_manager.get_status(lock_name).await?;
    let still_ours = match status {
        LockStatus::Held { version, .. } => version == acquired_version,
        _ => false,
    };
    if !still_ours {
        tracing::warn!(gid = %gid, "lock ownership changed before dispatch, aborting flush");
        return Ok(FlushOutcome::LockHeldElsewhere);
    }

    let meta_key = format!("media_group_buffer:buffer:{gid}:meta");
    let mut meta = match transport.get_json::<GroupMeta>(&meta_key).await? {
        Some(m) => m,
        None => {
            tracing::warn!(gid = %gid, "flush attempt found messages but no group meta, abandoning");
            purge_group(transport, gid).await?;
            return Ok(FlushOutcome::Abandoned);
        }
    };

    let payloads: Vec<serde_json::Value> = messages.into_iter().map(|m| m.payload).collect();
    match task_engine.add_batch(&meta.target, payloads, &meta.user_id).await {
        Ok(_ids) => {
            purge_group(transport, gid).await?;
            tracing::info!(gid = %gid, "media group flushed");
            Ok(FlushOutcome::Flushed)
        }
        Err(e) => {
            meta.error_count += 1;
            if meta.error_count >= 3 {
                tracing::warn!(gid = %gid, error = %e, "media group abandoned after repeated dispatch failures");
                purge_group(transport, gid).await?;
                Ok(FlushOutcome::Abandoned)
            } else {
                let delay = config.buffer_timeout * meta.error_count;
                transport.set_json(&meta_key, &meta, None).await?;
                reschedule_timer(transport, gid, now + to_chrono(delay)).await?;
                tracing::warn!(gid = %gid, error = %e, error_count = meta.error_count, "flush dispatch failed, retry scheduled");
                Ok(FlushOutcome::Retrying)
            }
        }
    }
}

fn spawn_cleanup_sweeper(
    transport: Arc<KvTransport>,
    lock_manager: Arc<LockManager>,
    task_engine: Arc<dyn TaskEngine>,
    instance_id: String,
    config: BufferConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.cleanup_interval);
        let error_pause = std::time::Duration::from_secs(5 * 60);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("media-group cleanup sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(&transport, &lock_manager, task_engine.as_ref(), &instance_id, &config, clock.as_ref()).await {
                        tracing::warn!(error = %e, "media-group cleanup sweep failed, pausing");
                        tokio::time::sleep(error_pause).await;
                    }
                }
            }
        }
    });
}

async fn sweep_once(
    transport: &KvTransport,
    lock_manager: &LockManager,
    task_engine: &dyn TaskEngine,
    instance_id: &str,
    config: &BufferConfig,
    clock: &dyn Clock,
) -> Result<()> {
    let now = clock.now();

    for key in transport.list_keys("media_group_buffer:timer:").await? {
        if let Some(timer) = transport.get_json::<TimerEntry>(&key).await? {
            if timer.expires_at <= now {
                let _ = flush_attempt_via(transport, lock_manager, task_engine, instance_id, config, clock, &timer.gid).await;
            }
        }
    }

    let stale = to_chrono(config.stale_threshold);
    for key in transport.list_keys("media_group_buffer:processed_messages:").await? {
        if let Some(value) = transport.get(&key, ValueKind::String).await? {
            if let Some(marked_at) = value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
                if now - marked_at.with_timezone(&Utc) > stale {
                    let _ = transport.delete(&key).await;
                }
            }
        }
    }

    Ok(())
}
