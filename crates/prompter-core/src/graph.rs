//! Task Graph: build/validate the `depends_on` DAG and expose traversal
//! primitives.
//!
//! Cycle detection uses a three-color DFS (WHITE/GRAY/BLACK) rather than
//! a single in-degree sweep, since every cycle must be reported, not just
//! the first, which needs per-root DFS restarts.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::TaskConfig;
use crate::error::ConfigViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A validated, acyclic `depends_on` graph over a task list.
///
/// Node order is preserved from the input task list so diagnostics read in
/// declaration order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// `depends_on` edges: `deps[i]` are the indices task `i` depends on.
    deps: Vec<Vec<usize>>,
    /// Reverse edges: `dependents[i]` are the indices that depend on `i`.
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Build a graph from a task list, returning every acyclicity violation
    /// found (not just the first).
    ///
    /// Missing-dependency references are expected to have already been
    /// checked by `config::validate` before this is called; `build` still
    /// defends against being called directly by skipping any `depends_on`
    /// entry that doesn't resolve to a known name rather than panicking.
    pub fn build(tasks: &[TaskConfig]) -> Result<Self, Vec<ConfigViolation>> {
        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep_name in &task.depends_on {
                if let Some(&dep_idx) = index.get(dep_name) {
                    deps[i].push(dep_idx);
                    dependents[dep_idx].push(i);
                }
            }
        }

        let graph = Self {
            names,
            index,
            deps,
            dependents,
        };

        let cycles = graph.find_all_cycles();
        if cycles.is_empty() {
            Ok(graph)
        } else {
            let violations = cycles
                .into_iter()
                .map(|cycle| {
                    ConfigViolation::global(format!(
                        "dependency cycle detected: {}",
                        cycle.join(" -> ")
                    ))
                })
                .collect();
            Err(violations)
        }
    }

    /// Three-color DFS that restarts from every unvisited node so that all
    /// cycles reachable from any root are reported, not just the first one
    /// found.
    fn find_all_cycles(&self) -> Vec<Vec<String>> {
        let n = self.names.len();
        let mut color = vec![Color::White; n];
        let mut cycles = Vec::new();

        for start in 0..n {
            if color[start] == Color::White {
                let mut path = Vec::new();
                self.dfs_visit(start, &mut color, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn dfs_visit(
        &self,
        node: usize,
        color: &mut [Color],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        color[node] = Color::Gray;
        path.push(node);

        for &succ in &self.deps[node] {
            match color[succ] {
                Color::White => self.dfs_visit(succ, color, path, cycles),
                Color::Gray => {
                    // Found a back-edge to a node still on the current
                    // path: collect the cycle from its first occurrence.
                    let start_pos = path.iter().position(|&n| n == succ).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start_pos..]
                        .iter()
                        .map(|&i| self.names[i].clone())
                        .collect();
                    cycle.push(self.names[succ].clone());
                    cycles.push(cycle);
                }
                Color::Black => {
                    // Already fully explored; no cycle through this edge.
                }
            }
        }

        path.pop();
        color[node] = Color::Black;
    }

    /// Ordered sequence of disjoint sets; level `k` holds every task whose
    /// longest dependency chain from any source has length `k`.
    ///
    /// Computed via Kahn's algorithm plus longest-path dynamic programming
    /// over the resulting topological order -- a diagnostic, not the
    /// cycle detector, so the simpler in-degree sweep is fine here.
    pub fn parallel_levels(&self) -> Vec<Vec<String>> {
        let n = self.names.len();
        let mut in_degree = vec![0usize; n];
        for i in 0..n {
            in_degree[i] = self.deps[i].len();
        }

        let mut level_of = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut remaining = in_degree.clone();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                level_of[dependent] = level_of[dependent].max(level_of[node] + 1);
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        let max_level = level_of.iter().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
        for (i, name) in self.names.iter().enumerate() {
            levels[level_of[i]].push(name.clone());
        }
        levels
    }

    /// Longest dependency chain in the graph, reported for diagnostics.
    pub fn critical_path(&self) -> Vec<String> {
        let n = self.names.len();
        let mut in_degree = vec![0usize; n];
        for i in 0..n {
            in_degree[i] = self.deps[i].len();
        }
        let mut remaining = in_degree.clone();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

        let mut longest = vec![0usize; n];
        let mut predecessor: Vec<Option<usize>> = vec![None; n];
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                if longest[node] + 1 > longest[dependent] {
                    longest[dependent] = longest[node] + 1;
                    predecessor[dependent] = Some(node);
                }
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        let Some(end) = (0..n).max_by_key(|&i| longest[i]) else {
            return Vec::new();
        };

        let mut path = Vec::new();
        let mut cur = Some(end);
        while let Some(i) = cur {
            path.push(self.names[i].clone());
            cur = predecessor[i];
        }
        path.reverse();
        path
    }

    /// The subset of tasks whose dependencies are all in `completed` and
    /// none of whose dependencies are in `failed`.
    pub fn ready(&self, completed: &HashSet<String>, failed: &HashSet<String>) -> Vec<String> {
        self.names
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                self.deps[*i].iter().all(|&dep| {
                    let dep_name = &self.names[dep];
                    completed.contains(dep_name) && !failed.contains(dep_name)
                })
            })
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Direct dependency names of `task_name`, in declaration order.
    pub fn depends_on(&self, task_name: &str) -> &[usize] {
        match self.index.get(task_name) {
            Some(&i) => &self.deps[i],
            None => &[],
        }
    }

    /// Direct dependent names of `task_name` (tasks that list it in their
    /// own `depends_on`).
    pub fn dependents_of(&self, task_name: &str) -> Vec<String> {
        match self.index.get(task_name) {
            Some(&i) => self.dependents[i]
                .iter()
                .map(|&d| self.names[d].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// All transitive dependents of `task_name` (used to propagate SKIPPED
    /// to descendants of a FAILED task).
    pub fn transitive_dependents(&self, task_name: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let Some(&start) = self.index.get(task_name) else {
            return result;
        };
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dependent in &self.dependents[node] {
                if result.insert(self.names[dependent].clone()) {
                    stack.push(dependent);
                }
            }
        }
        result
    }

    pub fn task_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolved names of `task_name`'s direct dependencies.
    pub fn dependency_names(&self, task_name: &str) -> Vec<String> {
        self.depends_on(task_name)
            .iter()
            .map(|&i| self.names[i].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, depends_on: &[&str]) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            prompt: "do it".to_string(),
            verify_command: "true".to_string(),
            verify_success_code: 0,
            on_success: "next".to_string(),
            on_failure: "stop".to_string(),
            max_attempts: 3,
            timeout: None,
            system_prompt: None,
            resume_previous_session: false,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            exclusive: false,
            priority: None,
            cpu_required: None,
            memory_required: None,
        }
    }

    #[test]
    fn builds_empty_graph() {
        let graph = TaskGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn accepts_linear_chain() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let graph = TaskGraph::build(&tasks).unwrap();
        assert_eq!(graph.critical_path(), vec!["a", "b", "c"]);
    }

    #[test]
    fn detects_direct_cycle() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let err = TaskGraph::build(&tasks).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn detects_transitive_cycle() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        let err = TaskGraph::build(&tasks).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn reports_every_disjoint_cycle() {
        // Two independent cycles: a<->b and c<->d.
        let tasks = vec![
            task("a", &["b"]),
            task("b", &["a"]),
            task("c", &["d"]),
            task("d", &["c"]),
        ];
        let err = TaskGraph::build(&tasks).unwrap_err();
        assert_eq!(err.len(), 2, "expected both cycles reported, got: {err:?}");
    }

    #[test]
    fn diamond_dag_levels() {
        // a -> b, a -> c, b -> d, c -> d
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let graph = TaskGraph::build(&tasks).unwrap();
        let levels = graph.parallel_levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a"]);
        let mut level1 = levels[1].clone();
        level1.sort();
        assert_eq!(level1, vec!["b", "c"]);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn ready_respects_completed_and_failed() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["a"])];
        let graph = TaskGraph::build(&tasks).unwrap();

        let completed = HashSet::from(["a".to_string()]);
        let failed = HashSet::new();
        let mut ready = graph.ready(&completed, &failed);
        ready.sort();
        assert_eq!(ready, vec!["a", "b", "c"]);

        let failed = HashSet::from(["a".to_string()]);
        let ready = graph.ready(&completed, &failed);
        assert!(!ready.contains(&"b".to_string()));
        assert!(!ready.contains(&"c".to_string()));
    }

    #[test]
    fn transitive_dependents_includes_grandchildren() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
        ];
        let graph = TaskGraph::build(&tasks).unwrap();
        let mut dependents: Vec<_> = graph.transitive_dependents("a").into_iter().collect();
        dependents.sort();
        assert_eq!(dependents, vec!["b", "c"]);
    }
}
