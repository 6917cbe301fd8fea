//! The composition root: a single value that owns every coordination
//! component and the external-collaborator trait objects they depend on.
//!
//! One struct built once at startup, holding `Arc`s to each subsystem,
//! handed to callers instead of letting each subsystem reach for
//! ambient/global state.

use bot_buffer::{BufferConfig, MediaGroupBuffer};
use bot_common::{Clock, MessageBus, SystemClock, SystemRandom, TaskEngine};
use bot_coordinator::{CoordinatorConfig, InstanceCoordinator};
use bot_kv::{KvProviderConfig, KvTransport, KvTransportConfig};
use bot_lock::{LockManager, LockManagerConfig};
use bot_shutdown::{HookOptions, ShutdownConfig, ShutdownSupervisor};
use std::sync::Arc;

/// Tunables for every subsystem `CoordinationCore` wires together. Each
/// field defaults to the coordination-core's spec numbers; callers
/// override only what they need to change.
#[derive(Clone, Default)]
pub struct CoordinationCoreConfig {
    pub kv_transport: KvTransportConfig,
    pub lock_manager: LockManagerConfig,
    pub coordinator: CoordinatorConfig,
    pub buffer: BufferConfig,
    pub shutdown: ShutdownConfig,
}

/// Everything the media bot's runtime needs from this workspace, wired
/// together once at startup and handed around as `Arc<CoordinationCore>`.
pub struct CoordinationCore {
    pub transport: Arc<KvTransport>,
    pub lock_manager: Arc<LockManager>,
    pub coordinator: Arc<InstanceCoordinator>,
    pub buffer: Arc<MediaGroupBuffer>,
    pub shutdown: Arc<ShutdownSupervisor>,
    instance_id: String,
}

impl CoordinationCore {
    /// Build every subsystem over the given KV provider selection and
    /// external collaborators. `message_bus` is optional because not
    /// every deployment broadcasts system events (see
    /// `InstanceCoordinator::broadcast`).
    pub fn new(
        providers: KvProviderConfig,
        instance_id: impl Into<String>,
        hostname: impl Into<String>,
        task_engine: Arc<dyn TaskEngine>,
        message_bus: Option<Arc<dyn MessageBus>>,
        config: CoordinationCoreConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport = Arc::new(KvTransport::new(providers, config.kv_transport.clone(), clock.clone()));
        Self::from_transport(transport, instance_id, hostname, task_engine, message_bus, config)
    }

    /// Build every subsystem over an already-constructed transport
    /// instead of a provider selection — the entry point integration
    /// tests use with `bot_kv::InMemoryBackend` in place of a live
    /// Cloudflare/Upstash provider.
    pub fn from_transport(
        transport: Arc<KvTransport>,
        instance_id: impl Into<String>,
        hostname: impl Into<String>,
        task_engine: Arc<dyn TaskEngine>,
        message_bus: Option<Arc<dyn MessageBus>>,
        config: CoordinationCoreConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let random: Arc<dyn bot_common::Random> = Arc::new(SystemRandom);
        let instance_id = instance_id.into();

        let lock_manager = Arc::new(LockManager::new(transport.clone(), config.lock_manager, clock.clone(), random));
        let coordinator = Arc::new(InstanceCoordinator::new(
            transport.clone(),
            lock_manager.clone(),
            bot_common::InstanceId::new(instance_id.clone()),
            hostname.into(),
            config.coordinator,
            clock.clone(),
            message_bus,
        ));
        let buffer = Arc::new(MediaGroupBuffer::new(
            transport.clone(),
            lock_manager.clone(),
            task_engine,
            instance_id.clone(),
            config.buffer,
            clock,
        ));
        let shutdown = Arc::new(ShutdownSupervisor::new(config.shutdown, Arc::new(SystemClock)));

        tracing::info!(instance_id = %instance_id, "coordination core wired");
        Self { transport, lock_manager, coordinator, buffer, shutdown, instance_id }
    }

    /// Register the standard shutdown hooks every deployment needs:
    /// persist pending media groups, release this instance's locks, and
    /// unregister the instance record. Callers add their own hooks
    /// (HTTP listener close, task-engine drain, ...) alongside these.
    ///
    /// `bot-shutdown` deliberately has no dependency on the other
    /// crates, so this wiring — not the supervisor itself — is where
    /// `release_all`/`unregister_instance` are plugged in as ordinary
    /// hooks.
    pub async fn register_standard_shutdown_hooks(&self) -> bot_shutdown::Result<()> {
        let buffer = self.buffer.clone();
        self.shutdown
            .register_hook(
                "media-group-buffer",
                HookOptions { priority: 0, requires_cleanup: true, ..Default::default() },
                move || {
                    let buffer = buffer.clone();
                    async move {
                        buffer.shutdown().await;
                        Ok(())
                    }
                },
            )
            .await?;

        let lock_manager = self.lock_manager.clone();
        let coordinator = self.coordinator.clone();
        let instance_id = self.instance_id.clone();
        self.shutdown
            .register_hook(
                "distributed-locks",
                HookOptions {
                    priority: 10,
                    dependencies: vec!["media-group-buffer".to_string()],
                    requires_cleanup: true,
                    ..Default::default()
                },
                move || {
                    let lock_manager = lock_manager.clone();
                    let coordinator = coordinator.clone();
                    let instance_id = instance_id.clone();
                    async move {
                        lock_manager.release_all(&instance_id).await;
                        let result = coordinator.unregister_instance().await.map_err(|e| e.to_string());
                        lock_manager.shutdown().await;
                        coordinator.shutdown().await;
                        result
                    }
                },
            )
            .await?;

        Ok(())
    }
}
