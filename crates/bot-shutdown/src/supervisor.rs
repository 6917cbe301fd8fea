//! The graceful shutdown supervisor: hook DAG execution, task drain, and
//! exit-code selection.
//!
//! Generalizes the drain-then-cleanup shutdown shape from "one worker,
//! one queue" to "N hooks, one dependency DAG", with hooks registered
//! as boxed closures rather than a flat reverse-order list.

use crate::config::ShutdownConfig;
use crate::error::{Result, ShutdownError};
use crate::hook::{HookFn, HookMeta, HookOptions, HookResult, RegisteredHook};
use crate::topo::topological_order;
use bot_common::Clock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type TaskCounterFn = Box<dyn Fn() -> usize + Send + Sync>;

const HTTP_SERVER_HOOK: &str = "http-server";

/// Text patterns that mark an observed error as recoverable: the process
/// keeps running instead of tearing down.
const RECOVERABLE_PATTERNS: &[&str] = &["timeout", "network", "connection", "flood"];

pub fn is_recoverable(error: &str) -> bool {
    let lower = error.to_lowercase();
    RECOVERABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone)]
pub enum ShutdownSource {
    Signal(String),
    UnrecoverableError(String),
    Manual,
}

impl ShutdownSource {
    fn label(&self) -> String {
        match self {
            ShutdownSource::Signal(name) => name.clone(),
            ShutdownSource::UnrecoverableError(_) => "unrecoverable_error".to_string(),
            ShutdownSource::Manual => "manual".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub exit_code: i32,
    pub failed_hooks: Vec<String>,
    pub drain_timed_out: bool,
}

pub struct ShutdownSupervisor {
    hooks: Mutex<Vec<RegisteredHook>>,
    task_counters: Mutex<Vec<(String, TaskCounterFn)>>,
    config: ShutdownConfig,
    clock: Arc<dyn Clock>,
    started_at: chrono::DateTime<chrono::Utc>,
    shutting_down: AtomicBool,
    outcome: Mutex<Option<ShutdownOutcome>>,
}

impl ShutdownSupervisor {
    pub fn new(config: ShutdownConfig, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            hooks: Mutex::new(Vec::new()),
            task_counters: Mutex::new(Vec::new()),
            config,
            clock,
            started_at,
            shutting_down: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    /// Register a named shutdown hook. The hook named `"http-server"` is
    /// special-cased: it always runs first, before the drain loop.
    pub async fn register_hook<F, Fut>(&self, name: impl Into<String>, options: HookOptions, hook: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let name = name.into();
        let mut hooks = self.hooks.lock().await;
        if hooks.iter().any(|h| h.name == name) {
            return Err(ShutdownError::DuplicateHook(name));
        }
        let run: HookFn = Box::new(move || Box::pin(hook()));
        hooks.push(RegisteredHook { name, options, run });
        Ok(())
    }

    /// Register a named counter the drain loop polls. Several counters may
    /// be registered (task-engine queue, cache, remote coordination state);
    /// the drain loop waits until their sum reaches zero.
    pub async fn register_task_counter<F>(&self, name: impl Into<String>, counter: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        self.task_counters.lock().await.push((name.into(), Box::new(counter)));
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Classify an observed error. Recoverable errors are logged and
    /// swallowed — the process keeps running. Anything else triggers the
    /// full shutdown sequence.
    pub async fn handle_error(&self, error: &str) -> Option<ShutdownOutcome> {
        if is_recoverable(error) {
            tracing::warn!(error = %error, "recoverable error observed, continuing");
            return None;
        }
        Some(self.shutdown(ShutdownSource::UnrecoverableError(error.to_string())).await)
    }

    /// Run the full shutdown sequence. Idempotent: concurrent or repeated
    /// calls all observe the same outcome once it's computed.
    pub async fn shutdown(&self, source: ShutdownSource) -> ShutdownOutcome {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            loop {
                if let Some(outcome) = self.outcome.lock().await.clone() {
                    return outcome;
                }
                tokio::task::yield_now().await;
            }
        }

        tracing::info!(source = %source.label(), "shutdown initiated");
        let mut failed_hooks = Vec::new();

        self.run_http_server_hook(&mut failed_hooks).await;
        let drain_timed_out = self.drain().await;
        self.run_remaining_hooks(&mut failed_hooks).await;

        let uptime = self.clock.now() - self.started_at;
        let premature = uptime < chrono::Duration::from_std(self.config.min_clean_uptime).unwrap_or(chrono::Duration::seconds(300));

        let exit_code = if premature {
            125
        } else if !failed_hooks.is_empty() || drain_timed_out {
            1
        } else {
            0
        };

        let outcome = ShutdownOutcome { exit_code, failed_hooks, drain_timed_out };
        *self.outcome.lock().await = Some(outcome.clone());
        tracing::info!(exit_code = outcome.exit_code, "shutdown complete");
        outcome
    }

    async fn run_http_server_hook(&self, failed_hooks: &mut Vec<String>) {
        let hooks = self.hooks.lock().await;
        let Some(hook) = hooks.iter().find(|h| h.name == HTTP_SERVER_HOOK) else {
            return;
        };
        if let Err(e) = run_with_timeout(hook, self.config.hook_timeout).await {
            tracing::warn!(hook = HTTP_SERVER_HOOK, error = %e, "shutdown hook failed");
            failed_hooks.push(HTTP_SERVER_HOOK.to_string());
        }
    }

    /// Poll registered counters until their sum reaches zero or
    /// `drainTimeout` elapses. Returns whether the drain timed out.
    async fn drain(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        let mut stalled_since: Option<tokio::time::Instant> = None;

        loop {
            let remaining = self.pending_task_count().await;
            if remaining == 0 {
                return false;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(remaining, "drain timed out, force-cleaning residual state");
                return true;
            }

            let stalled_for = *stalled_since.get_or_insert(now);
            if now.duration_since(stalled_for) >= self.config.drain_stall_warn {
                tracing::warn!(remaining, "task drain stalled");
            }

            tokio::time::sleep(self.config.drain_poll_interval).await;
        }
    }

    async fn pending_task_count(&self) -> usize {
        self.task_counters.lock().await.iter().map(|(_, counter)| counter()).sum()
    }

    async fn run_remaining_hooks(&self, failed_hooks: &mut Vec<String>) {
        let hooks = self.hooks.lock().await;
        let metas: Vec<HookMeta> = hooks
            .iter()
            .filter(|h| h.name != HTTP_SERVER_HOOK)
            .map(|h| HookMeta {
                name: h.name.clone(),
                priority: h.options.priority,
                dependencies: h.options.dependencies.iter().filter(|d| d.as_str() != HTTP_SERVER_HOOK).cloned().collect(),
            })
            .collect();

        let order = match topological_order(&metas) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(error = %e, "shutdown hook graph invalid, running hooks in registration order");
                metas.into_iter().map(|m| m.name).collect()
            }
        };

        for name in order {
            let Some(hook) = hooks.iter().find(|h| h.name == name) else { continue };
            if let Err(e) = run_with_timeout(hook, self.config.hook_timeout).await {
                tracing::warn!(hook = %name, error = %e, "shutdown hook failed");
                failed_hooks.push(name);
            }
        }
    }
}

async fn run_with_timeout(hook: &RegisteredHook, timeout: Duration) -> HookResult {
    match tokio::time::timeout(timeout, (hook.run)()).await {
        Ok(result) => result,
        Err(_) => Err(format!("hook '{}' exceeded its {:?} timeout", hook.name, timeout)),
    }
}
