//! Instance lifecycle signals: a tagged event enum plus a handler
//! registry dispatched in the background so observers never block the
//! coordinator's own hot path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceSignal {
    Registered { instance_id: String },
    HeartbeatSent { instance_id: String },
    Unregistered { instance_id: String },
    LockAcquired { name: String, owner: String, stolen: bool },
    LockReleased { name: String, owner: String },
    Preempted { name: String, prior_owner: String, new_owner: String },
}

#[async_trait]
pub trait InstanceSignalHandler: Send + Sync {
    async fn handle(&self, signal: &InstanceSignal);
}

#[derive(Default)]
pub struct SignalDispatcher {
    handlers: RwLock<Vec<Arc<dyn InstanceSignalHandler>>>,
}

impl SignalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<H: InstanceSignalHandler + 'static>(&self, handler: H) {
        self.handlers.write().await.push(Arc::new(handler));
    }

    /// Fire-and-forget dispatch: handlers run on a spawned task so the
    /// caller (registration, heartbeat, lock acquisition) never waits on
    /// observers.
    pub fn dispatch_background(&self, signal: InstanceSignal) {
        if let Ok(handlers) = self.handlers.try_read() {
            let handlers: Vec<_> = handlers.iter().cloned().collect();
            tokio::spawn(async move {
                for handler in handlers {
                    handler.handle(&signal).await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl InstanceSignalHandler for CountingHandler {
        async fn handle(&self, _signal: &InstanceSignal) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_background_invokes_registered_handlers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = SignalDispatcher::new();
        dispatcher.register(CountingHandler(counter.clone())).await;

        dispatcher.dispatch_background(InstanceSignal::Registered { instance_id: "a".to_string() });
        // Give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
