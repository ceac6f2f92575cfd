// SPDX-License-Identifier: MIT

//! FIFO work queue with per-machine skip-if-busy fairness: a worker
//! draining the queue skips any item whose machine is already being
//! worked on, leaving that item (and the ones behind it for the same
//! machine) exactly where it was — so the next time that machine frees
//! up, its FIFO order relative to itself is untouched.
//!
//! The busy set lives behind the *same* mutex as the deque, so a worker's
//! dequeue-if-not-busy and lock-acquire happen as one atomic step —
//! matching `_WorkQueue.get_work()` in the original, which does the busy
//! check and `work.lock_work()` inside a single `with self._lock:` block.
//! Without that, two workers could both see a machine as free before
//! either marks it busy, and the loser re-pushing its item to the tail
//! would silently reorder that machine's queued actions.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use vmn_core::MachineName;

use crate::work::WorkItem;

#[derive(Default)]
struct State {
    items: VecDeque<WorkItem>,
    busy: HashSet<MachineName>,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `item` to the back of the queue, ahead of nothing — callers
    /// that lost the race in [`Self::pop_eligible_locking`] must use
    /// [`Self::requeue_front`] instead to preserve FIFO order.
    pub fn push(&self, item: WorkItem) {
        self.state.lock().items.push_back(item);
    }

    /// Put `item` back at the *front* of the queue. Used when a caller
    /// popped an item but could not also acquire its machine's lock
    /// (shouldn't happen now that pop and lock are atomic, but kept as
    /// the correct place to put a loser back if that ever changes).
    pub fn requeue_front(&self, item: WorkItem) {
        self.state.lock().items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically remove and return the first item whose machine is not
    /// currently locked, marking that machine locked in the same step.
    /// Returns `None` if the queue is empty or every queued machine is
    /// busy; the caller must eventually call [`Self::unlock`] once it is
    /// done with the machine.
    pub fn pop_eligible_locking(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        let idx = state
            .items
            .iter()
            .position(|item| !state.busy.contains(&item.machine))?;
        let item = state.items.remove(idx)?;
        state.busy.insert(item.machine.clone());
        Some(item)
    }

    /// Release `machine`'s lock, making it eligible for the next pop.
    pub fn unlock(&self, machine: &MachineName) {
        self.state.lock().busy.remove(machine);
    }
}
