//! Integration tests exercising the concrete scenarios against an
//! in-process `InMemoryBackend` instead of a live Cloudflare/Upstash
//! provider: a real transport built over a local backend rather than
//! a mocked network.

use async_trait::async_trait;
use bot_common::{Clock, Random, SystemRandom};
use bot_coordinator::{CoordinatorConfig, InstanceCoordinator};
use bot_engine::{CoordinationCore, CoordinationCoreConfig};
use bot_kv::{InMemoryBackend, KvTransport, KvTransportConfig};
use bot_lock::{AcquireOptions, LockManager, LockManagerConfig, LockStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

struct FakeClock(StdMutex<DateTime<Utc>>);

impl FakeClock {
    fn new() -> Self {
        Self(StdMutex::new(Utc::now()))
    }

    fn advance(&self, d: chrono::Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard += d;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
struct FakeTaskEngine {
    batches: StdMutex<Vec<(String, Vec<serde_json::Value>, String)>>,
}

impl FakeTaskEngine {
    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl bot_common::TaskEngine for FakeTaskEngine {
    async fn add_batch(&self, target: &str, messages: Vec<serde_json::Value>, user_id: &str) -> bot_common::Result<Vec<String>> {
        self.batches.lock().unwrap().push((target.to_string(), messages, user_id.to_string()));
        Ok(vec!["task-1".to_string()])
    }

    async fn add_single(&self, _target: &str, _message: serde_json::Value, _user_id: &str) -> bot_common::Result<String> {
        Ok("single".to_string())
    }

    async fn cancel(&self, _task_id: &str, _user_id: &str) -> bot_common::Result<bool> {
        Ok(true)
    }

    async fn waiting_count(&self) -> usize {
        0
    }

    async fn processing_count(&self) -> usize {
        0
    }
}

fn core_with(clock: Arc<dyn Clock>, task_engine: Arc<dyn bot_common::TaskEngine>, instance_id: &str) -> CoordinationCore {
    let backend = Arc::new(InMemoryBackend::new());
    let transport = Arc::new(KvTransport::from_backend(backend, KvTransportConfig::default(), clock));
    CoordinationCore::from_transport(transport, instance_id, "test-host", task_engine, None, CoordinationCoreConfig::default())
}

/// Scenario 1: single-instance flush by size.
#[tokio::test]
async fn single_instance_flush_by_size() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let engine = Arc::new(FakeTaskEngine::default());
    let mut config = CoordinationCoreConfig::default();
    config.buffer.max_batch_size = 2;
    let backend = Arc::new(InMemoryBackend::new());
    let transport = Arc::new(KvTransport::from_backend(backend, KvTransportConfig::default(), clock.clone()));
    let core = CoordinationCore::from_transport(transport, "A", "host-a", engine.clone(), None, config);

    let first = core
        .buffer
        .add("msg-1", "g", "T", "U", json!({"id": "msg-1"}), true)
        .await
        .unwrap();
    assert!(first.added);

    let second = core
        .buffer
        .add("msg-2", "g", "T", "U", json!({"id": "msg-2"}), true)
        .await
        .unwrap();
    assert!(second.added);
    assert_eq!(second.reason, bot_buffer::AddReason::FlushTriggered);

    assert_eq!(engine.batch_count(), 1);
    let status = core.buffer.get_status().await.unwrap();
    assert!(status.is_empty(), "flushed group's keys must be fully purged");
}

/// Scenario 3: cross-instance contention. Two coordinators share one
/// backend, simulating two replicas racing to flush the same group.
#[tokio::test]
async fn cross_instance_contention_flushes_exactly_once() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let engine = Arc::new(FakeTaskEngine::default());
    let backend = Arc::new(InMemoryBackend::new());

    let transport_a = Arc::new(KvTransport::from_backend(backend.clone(), KvTransportConfig::default(), clock.clone()));
    let core_a = CoordinationCore::from_transport(transport_a, "A", "host-a", engine.clone(), None, CoordinationCoreConfig::default());

    let transport_b = Arc::new(KvTransport::from_backend(backend, KvTransportConfig::default(), clock));
    let core_b = CoordinationCore::from_transport(transport_b, "B", "host-b", engine.clone(), None, CoordinationCoreConfig::default());

    // Both instances buffer a message for the same group without tripping
    // the size-based flush (max_batch_size defaults to 10).
    let a_outcome = core_a.buffer.add("msg-1", "g", "T", "U", json!({"id": "msg-1"}), true).await.unwrap();
    assert!(a_outcome.added);
    let b_outcome = core_b.buffer.add("msg-2", "g", "T", "U", json!({"id": "msg-2"}), true).await.unwrap();
    assert!(b_outcome.added);

    // A wins the flush attempt and dispatches both instances' messages.
    let outcome_a = core_a.buffer.flush_attempt("g").await.unwrap();
    assert_eq!(outcome_a, bot_buffer::FlushOutcome::Flushed);
    assert_eq!(engine.batch_count(), 1);
    let (_, dispatched, _) = &engine.batches.lock().unwrap()[0];
    assert_eq!(dispatched.len(), 2);

    // B's own flush attempt on its next tick finds the group already
    // purged and performs no further dispatch.
    let outcome_b = core_b.buffer.flush_attempt("g").await.unwrap();
    assert_ne!(outcome_b, bot_buffer::FlushOutcome::Flushed);
    assert_eq!(engine.batch_count(), 1);
}

/// Scenario 4: expired-owner steal. A acquires a short-lived lock, never
/// releases it; once its TTL elapses B's acquire steals the record via
/// CAS-if-equals.
#[tokio::test]
async fn expired_owner_steal() {
    let clock = Arc::new(FakeClock::new());
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let random: Arc<dyn Random> = Arc::new(SystemRandom);
    let backend = Arc::new(InMemoryBackend::new());
    let transport = Arc::new(KvTransport::from_backend(backend, KvTransportConfig::default(), clock_dyn.clone()));
    let manager = LockManager::new(transport, LockManagerConfig::default(), clock_dyn, random);

    let opts = AcquireOptions { ttl: Some(Duration::from_secs(1)), ..Default::default() };
    let acquired = manager.acquire("L", "A", opts).await.unwrap();
    assert!(!acquired.stolen);

    clock.advance(chrono::Duration::seconds(2));

    let stolen = manager.acquire("L", "B", AcquireOptions::default()).await.unwrap();
    assert!(stolen.stolen);
    assert_eq!(stolen.stolen_from.as_deref(), Some("A"));

    match manager.get_status("L").await.unwrap() {
        LockStatus::Held { owner, .. } => assert_eq!(owner, "B"),
        other => panic!("expected B to hold the lock, got {other:?}"),
    }
}

/// `registerInstance(); unregisterInstance()` leaves no `instance:<self>`
/// record — one of §8's round-trip laws.
#[tokio::test]
async fn register_unregister_round_trip_leaves_no_record() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let random: Arc<dyn Random> = Arc::new(SystemRandom);
    let backend = Arc::new(InMemoryBackend::new());
    let transport = Arc::new(KvTransport::from_backend(backend, KvTransportConfig::default(), clock.clone()));
    let lock_manager = Arc::new(LockManager::new(transport.clone(), LockManagerConfig::default(), clock.clone(), random));
    let coordinator = InstanceCoordinator::new(
        transport.clone(),
        lock_manager,
        bot_common::InstanceId::new("A"),
        "host-a".to_string(),
        CoordinatorConfig::default(),
        clock,
        None,
    );

    coordinator.register_instance().await.unwrap();
    assert_eq!(coordinator.active_instance_count().await.unwrap(), 1);

    coordinator.unregister_instance().await.unwrap();
    assert_eq!(coordinator.get_all_instances().await.unwrap().len(), 0);
}

/// §8 invariant 7: the `http-server` hook always runs before any hook
/// that depends on it, and the standard hooks registered by
/// `CoordinationCore` run to completion in dependency order.
#[tokio::test]
async fn standard_shutdown_hooks_run_in_dependency_order() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let engine = Arc::new(FakeTaskEngine::default());
    let core = core_with(clock, engine, "A");

    core.coordinator.register_instance().await.unwrap();
    core.register_standard_shutdown_hooks().await.unwrap();

    let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
    let order_http = order.clone();
    core.shutdown
        .register_hook("http-server", bot_shutdown::HookOptions::default(), move || {
            let order = order_http.clone();
            async move {
                order.lock().unwrap().push("http-server");
                Ok(())
            }
        })
        .await
        .unwrap();

    let counter = Arc::new(AtomicU64::new(0));
    let counter_clone = counter.clone();
    core.shutdown.register_task_counter("noop", move || counter_clone.load(Ordering::SeqCst) as usize).await;

    let outcome = core.shutdown.shutdown(bot_shutdown::ShutdownSource::Manual).await;

    assert!(order.lock().unwrap().first().copied() == Some("http-server"));
    assert!(outcome.failed_hooks.is_empty());
    assert_eq!(core.coordinator.get_all_instances().await.unwrap().len(), 0);
}
