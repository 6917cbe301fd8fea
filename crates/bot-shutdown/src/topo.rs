//! Kahn's algorithm over the hook dependency DAG, tie-broken by priority.
//! Deliberately a plain `Vec`/`HashMap` implementation — no graph-library
//! dependency, matching the rest of this workspace's preference for
//! hand-rolled algorithms over small-data-structure crates.

use crate::error::{Result, ShutdownError};
use crate::hook::HookMeta;
use std::collections::{HashMap, HashSet};

/// Returns hook names in dependency-respecting order, ties broken by
/// ascending priority then registration order.
pub(crate) fn topological_order(hooks: &[HookMeta]) -> Result<Vec<String>> {
    let index_by_name: HashMap<&str, usize> = hooks.iter().enumerate().map(|(i, h)| (h.name.as_str(), i)).collect();

    for hook in hooks {
        for dep in &hook.dependencies {
            if !index_by_name.contains_key(dep.as_str()) {
                return Err(ShutdownError::UnknownDependency { hook: hook.name.clone(), dependency: dep.clone() });
            }
        }
    }

    let mut in_degree = vec![0usize; hooks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); hooks.len()];
    for (i, hook) in hooks.iter().enumerate() {
        for dep in &hook.dependencies {
            let dep_idx = index_by_name[dep.as_str()];
            in_degree[i] += 1;
            dependents[dep_idx].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..hooks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(hooks.len());
    let mut visited = HashSet::new();

    while !ready.is_empty() {
        ready.sort_by_key(|&i| (hooks[i].priority, i));
        let next = ready.remove(0);
        visited.insert(next);
        order.push(hooks[next].name.clone());
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != hooks.len() {
        let stuck: Vec<String> = (0..hooks.len()).filter(|i| !visited.contains(i)).map(|&i| hooks[i].name.clone()).collect();
        return Err(ShutdownError::CyclicDependency(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, priority: i32, deps: &[&str]) -> HookMeta {
        HookMeta { name: name.to_string(), priority, dependencies: deps.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn respects_explicit_dependencies() {
        let hooks = vec![meta("b", 0, &["a"]), meta("a", 0, &[])];
        let order = topological_order(&hooks).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn breaks_ties_by_priority() {
        let hooks = vec![meta("low-priority", 10, &[]), meta("high-priority", 1, &[])];
        let order = topological_order(&hooks).unwrap();
        assert_eq!(order, vec!["high-priority", "low-priority"]);
    }

    #[test]
    fn detects_cycles() {
        let hooks = vec![meta("a", 0, &["b"]), meta("b", 0, &["a"])];
        let err = topological_order(&hooks).unwrap_err();
        assert!(matches!(err, ShutdownError::CyclicDependency(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let hooks = vec![meta("a", 0, &["nonexistent"])];
        let err = topological_order(&hooks).unwrap_err();
        assert!(matches!(err, ShutdownError::UnknownDependency { .. }));
    }
}
