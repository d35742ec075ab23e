//! Resource Pool: gate concurrent task starts.
//!
//! Grounded in a semaphore-gated dispatch loop, generalized per
//! the pack's `cortex` DAG scheduler (`other_examples/.../dag_cmd/
//! scheduler.rs`), but reimplemented as an explicit, testable struct rather
//! than a bare `tokio::sync::Semaphore`: a semaphore alone can't express
//! the `exclusive_active` invariant `can_schedule` needs.

use std::collections::HashSet;

/// Tracks currently-RUNNING tasks and the `exclusive_active` flag.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    max_parallel_tasks: u32,
    running: HashSet<String>,
    exclusive_active: bool,
}

impl ResourcePool {
    pub fn new(max_parallel_tasks: u32) -> Self {
        Self {
            max_parallel_tasks,
            running: HashSet::new(),
            exclusive_active: false,
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_exclusive_active(&self) -> bool {
        self.exclusive_active
    }

    /// True iff `exclusive_active` is false AND, if the candidate is
    /// exclusive, `running_count == 0`, AND otherwise
    /// `running_count < max_parallel_tasks`.
    pub fn can_schedule(&self, exclusive: bool) -> bool {
        if self.exclusive_active {
            return false;
        }
        if exclusive {
            self.running.is_empty()
        } else {
            (self.running.len() as u32) < self.max_parallel_tasks
        }
    }

    /// Record `task_name` as RUNNING; if `exclusive`, also set
    /// `exclusive_active = true`.
    ///
    /// Callers MUST check `can_schedule` first; `allocate` does not
    /// re-validate the invariant itself.
    pub fn allocate(&mut self, task_name: &str, exclusive: bool) {
        self.running.insert(task_name.to_string());
        if exclusive {
            self.exclusive_active = true;
        }
    }

    /// Release `task_name`'s slot; if `exclusive`, clear
    /// `exclusive_active`.
    pub fn release(&mut self, task_name: &str, exclusive: bool) {
        self.running.remove(task_name);
        if exclusive {
            self.exclusive_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_cap() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.can_schedule(false));
        pool.allocate("a", false);
        assert!(pool.can_schedule(false));
        pool.allocate("b", false);
        assert!(!pool.can_schedule(false));
    }

    #[test]
    fn exclusive_task_requires_empty_pool() {
        let mut pool = ResourcePool::new(4);
        pool.allocate("a", false);
        assert!(!pool.can_schedule(true), "exclusive can't join a non-empty pool");
        pool.release("a", false);
        assert!(pool.can_schedule(true));
    }

    #[test]
    fn exclusive_active_blocks_everything() {
        let mut pool = ResourcePool::new(4);
        pool.allocate("a", true);
        assert!(pool.is_exclusive_active());
        assert!(!pool.can_schedule(false));
        assert!(!pool.can_schedule(true));
        pool.release("a", true);
        assert!(!pool.is_exclusive_active());
        assert!(pool.can_schedule(false));
    }

    #[test]
    fn release_frees_a_slot() {
        let mut pool = ResourcePool::new(1);
        pool.allocate("a", false);
        assert!(!pool.can_schedule(false));
        pool.release("a", false);
        assert!(pool.can_schedule(false));
    }
}
