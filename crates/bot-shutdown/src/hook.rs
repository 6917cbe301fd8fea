//! Shutdown hook registration types: boxed-closure hooks generalized
//! from "flat list, run in reverse" to a named DAG with priority and
//! dependencies.

use std::future::Future;
use std::pin::Pin;

/// Result of running a single hook. `Err` is logged and counted toward the
/// overall exit code, but never aborts the remaining sequence.
pub type HookResult = std::result::Result<(), String>;

pub type HookFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = HookResult> + Send>> + Send + Sync>;

/// Declarative metadata a hook carries into the topological sort.
#[derive(Debug, Clone, Default)]
pub struct HookOptions {
    /// Lower runs first among hooks with no ordering dependency between
    /// them. Defaults to 0.
    pub priority: i32,
    /// Names of hooks that must complete (successfully or not) before
    /// this one runs.
    pub dependencies: Vec<String>,
    pub resource_type: Option<String>,
    pub requires_cleanup: bool,
}

pub(crate) struct RegisteredHook {
    pub name: String,
    pub options: HookOptions,
    pub run: HookFn,
}

impl std::fmt::Debug for RegisteredHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHook").field("name", &self.name).field("options", &self.options).finish()
    }
}

/// Name/priority/dependency triple used for the topological sort, detached
/// from the boxed closure so the sort never has to move or clone it.
#[derive(Debug, Clone)]
pub(crate) struct HookMeta {
    pub name: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
}

impl From<&RegisteredHook> for HookMeta {
    fn from(hook: &RegisteredHook) -> Self {
        Self { name: hook.name.clone(), priority: hook.options.priority, dependencies: hook.options.dependencies.clone() }
    }
}
