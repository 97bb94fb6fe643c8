//! Dependency graph analysis for critical-path estimation.
//!
//! The graph here is derived data for planning only. The executor tracks
//! readiness on its own and is the authority on what may run.

use parflow_core::{ExecutionTask, TaskId};
use std::collections::{HashMap, HashSet};

/// A dependency graph built from one batch.
///
/// Edges to IDs outside the batch are dropped.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Task IDs in submission order
    order: Vec<TaskId>,
    /// task -> [dependencies]
    graph: HashMap<TaskId, Vec<TaskId>>,
    /// task -> [dependents]
    reverse: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    /// Build the graph for a batch.
    pub fn from_tasks(tasks: &[ExecutionTask]) -> Self {
        let mut order = Vec::with_capacity(tasks.len());
        let mut graph: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut reverse: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for task in tasks {
            if !graph.contains_key(task.id()) {
                order.push(task.id().clone());
            }
            graph.entry(task.id().clone()).or_default();
            reverse.entry(task.id().clone()).or_default();
        }

        for task in tasks {
            for dep in task.dependencies() {
                if !graph.contains_key(dep) {
                    continue;
                }
                if let Some(deps) = graph.get_mut(task.id()) {
                    deps.push(dep.clone());
                }
                reverse.entry(dep.clone()).or_default().push(task.id().clone());
            }
        }

        Self { order, graph, reverse }
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// In-batch dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> &[TaskId] {
        self.graph.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks that depend on `id`.
    pub fn dependents(&self, id: &TaskId) -> &[TaskId] {
        self.reverse.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks nothing depends on, in submission order.
    pub fn leaves(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| self.dependents(id).is_empty())
            .cloned()
            .collect()
    }

    /// Longest dependency chain below every task, counted in hops.
    ///
    /// A node already on the current path counts as depth zero, so cycles
    /// terminate with an approximate value.
    pub fn depths(&self) -> HashMap<TaskId, usize> {
        let mut memo = HashMap::with_capacity(self.order.len());
        let mut on_path = HashSet::new();
        for id in &self.order {
            self.depth_of(id, &mut memo, &mut on_path);
        }
        memo.into_iter().map(|(id, depth)| (id.clone(), depth)).collect()
    }

    fn depth_of<'a>(
        &'a self,
        id: &'a TaskId,
        memo: &mut HashMap<&'a TaskId, usize>,
        on_path: &mut HashSet<&'a TaskId>,
    ) -> usize {
        if let Some(&depth) = memo.get(id) {
            return depth;
        }
        if !on_path.insert(id) {
            return 0;
        }

        let mut depth = 0;
        for dep in self.dependencies(id) {
            depth = depth.max(self.depth_of(dep, memo, on_path) + 1);
        }

        on_path.remove(id);
        memo.insert(id, depth);
        depth
    }

    /// Estimate the critical path.
    ///
    /// The length is the deepest dependency chain below any leaf. The
    /// critical set holds every task reached at exactly that many hops from
    /// some leaf: the deepest level of the graph, which is not necessarily a
    /// contiguous chain.
    pub fn critical_path(&self) -> CriticalPathAnalysis {
        let depths = self.depths();
        let leaves = self.leaves();
        let length = leaves
            .iter()
            .filter_map(|leaf| depths.get(leaf))
            .copied()
            .max()
            .unwrap_or(0);

        let mut marked = HashSet::new();
        let mut seen = HashSet::new();
        for leaf in &leaves {
            let mut on_path = HashSet::new();
            self.mark_at_depth(leaf, 0, length, &depths, &mut seen, &mut on_path, &mut marked);
        }

        let critical = self
            .order
            .iter()
            .filter(|id| marked.contains(id))
            .cloned()
            .collect();

        CriticalPathAnalysis {
            length,
            critical,
            leaves,
            depths,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn mark_at_depth<'a>(
        &'a self,
        id: &'a TaskId,
        hop: usize,
        target: usize,
        depths: &HashMap<TaskId, usize>,
        seen: &mut HashSet<(&'a TaskId, usize)>,
        on_path: &mut HashSet<&'a TaskId>,
        marked: &mut HashSet<&'a TaskId>,
    ) {
        if hop == target {
            marked.insert(id);
            return;
        }
        // Nothing below this node can reach the target hop.
        if hop + depths.get(id).copied().unwrap_or(0) < target {
            return;
        }
        if !seen.insert((id, hop)) || !on_path.insert(id) {
            return;
        }

        for dep in self.dependencies(id) {
            self.mark_at_depth(dep, hop + 1, target, depths, seen, on_path, marked);
        }

        on_path.remove(id);
    }
}

/// Result of critical-path analysis.
#[derive(Debug, Clone, Default)]
pub struct CriticalPathAnalysis {
    /// Deepest dependency chain, in hops
    pub length: usize,
    /// Tasks at exactly `length` hops from a leaf, in submission order
    pub critical: Vec<TaskId>,
    /// Tasks nothing depends on, in submission order
    pub leaves: Vec<TaskId>,
    /// Longest chain below each task
    pub depths: HashMap<TaskId, usize>,
}

impl CriticalPathAnalysis {
    /// Whether `id` was marked critical.
    pub fn is_critical(&self, id: &TaskId) -> bool {
        self.critical.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn task(id: &str, deps: &[&str]) -> ExecutionTask {
        ExecutionTask::new(id, || async { anyhow::Ok(Value::Null) })
            .with_dependencies(deps.iter().copied())
    }

    fn ids(ids: &[TaskId]) -> Vec<&str> {
        ids.iter().map(TaskId::as_str).collect()
    }

    #[test]
    fn test_graph_edges() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", &[]),
            task("b", &["a", "external"]),
            task("c", &["a"]),
        ]);

        assert_eq!(graph.len(), 3);
        assert_eq!(ids(graph.dependencies(&"b".into())), vec!["a"]);
        assert_eq!(ids(graph.dependents(&"a".into())), vec!["b", "c"]);
        assert_eq!(ids(&graph.leaves()), vec!["b", "c"]);
    }

    #[test]
    fn test_chain_marks_root() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
        ]);
        let analysis = graph.critical_path();

        assert_eq!(analysis.length, 2);
        assert_eq!(ids(&analysis.critical), vec!["a"]);
        assert_eq!(analysis.depths[&TaskId::from("c")], 2);
    }

    #[test]
    fn test_marks_deepest_level_not_whole_path() {
        // c -> b -> a and c -> x: only `a` sits two hops below the leaf.
        let graph = DependencyGraph::from_tasks(&[
            task("a", &[]),
            task("x", &[]),
            task("b", &["a"]),
            task("c", &["b", "x"]),
        ]);
        let analysis = graph.critical_path();

        assert_eq!(analysis.length, 2);
        assert_eq!(ids(&analysis.critical), vec!["a"]);
        assert!(!analysis.is_critical(&"b".into()));
        assert!(!analysis.is_critical(&"x".into()));
    }

    #[test]
    fn test_frontier_spans_several_leaves() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
            task("e", &["d"]),
            task("f", &["e"]),
            task("short", &["d"]),
        ]);
        let analysis = graph.critical_path();

        assert_eq!(analysis.length, 2);
        assert_eq!(ids(&analysis.critical), vec!["a", "d"]);
    }

    #[test]
    fn test_independent_tasks_are_all_leaves() {
        let graph = DependencyGraph::from_tasks(&[task("a", &[]), task("b", &[])]);
        let analysis = graph.critical_path();

        assert_eq!(analysis.length, 0);
        assert_eq!(ids(&analysis.critical), vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_terminates() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", &["b"]),
            task("b", &["a"]),
            task("c", &["a"]),
        ]);
        let analysis = graph.critical_path();

        assert_eq!(ids(&analysis.leaves), vec!["c"]);
        assert!(analysis.length >= 1);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::from_tasks(&[]);
        let analysis = graph.critical_path();

        assert!(graph.is_empty());
        assert_eq!(analysis.length, 0);
        assert!(analysis.critical.is_empty());
    }
}
