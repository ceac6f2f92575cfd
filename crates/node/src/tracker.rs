// SPDX-License-Identifier: MIT

//! `_TasksTracker`-equivalent: the `task_id -> machine` map the Node
//! Controller consults to release a machine exactly once, when its
//! task reaches a terminal state.

use parking_lot::Mutex;
use std::collections::HashMap;
use vmn_core::{MachineName, NodeError, TaskId};

#[derive(Default)]
pub struct TaskTracker {
    tasks: Mutex<HashMap<TaskId, MachineName>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a newly-queued task. Fails if the task id is
    /// already tracked — a task moves through QUEUED/RUNNING/terminal
    /// exactly once, so a second `add_work` for the same id is a caller bug.
    pub fn track(&self, task_id: TaskId, machine: MachineName) -> Result<(), NodeError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task_id) {
            return Err(NodeError::AlreadyTracked(task_id.to_string()));
        }
        tasks.insert(task_id, machine);
        Ok(())
    }

    /// Stop tracking `task_id`, returning the machine it held so the
    /// caller can release it. `None` if the task id isn't tracked.
    pub fn untrack(&self, task_id: &TaskId) -> Option<MachineName> {
        self.tasks.lock().remove(task_id)
    }

    pub fn is_tracked(&self, task_id: &TaskId) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_twice_is_rejected() {
        let tracker = TaskTracker::new();
        tracker
            .track(TaskId::new("t1"), MachineName::new("vm1"))
            .unwrap();
        let err = tracker
            .track(TaskId::new("t1"), MachineName::new("vm2"))
            .unwrap_err();
        assert!(matches!(err, NodeError::AlreadyTracked(_)));
    }

    #[test]
    fn untrack_returns_the_held_machine_once() {
        let tracker = TaskTracker::new();
        tracker
            .track(TaskId::new("t1"), MachineName::new("vm1"))
            .unwrap();
        assert_eq!(tracker.untrack(&TaskId::new("t1")), Some(MachineName::new("vm1")));
        assert_eq!(tracker.untrack(&TaskId::new("t1")), None);
    }

    #[test]
    fn untracked_task_is_not_tracked() {
        let tracker = TaskTracker::new();
        assert!(!tracker.is_tracked(&TaskId::new("nope")));
    }
}
