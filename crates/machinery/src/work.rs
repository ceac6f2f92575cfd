// SPDX-License-Identifier: MIT

//! Work items the manager's queue and waiter list operate on.

use std::time::Instant;
use vmn_core::MachineName;
use vmn_wire::{MachineryAction, MachineryReply};

/// The reply channel attached to a work item. A plain boxed closure
/// rather than a socket handle directly, so the same scheduling code
/// serves both the control-socket server and in-process callers (the
/// Task Flow Runner) without an adapter layer in between.
pub type ReplyFn = Box<dyn FnOnce(MachineryReply) + Send>;

/// A queued action before it has started executing.
pub struct WorkItem {
    pub machine: MachineName,
    pub action: MachineryAction,
    pub reply: ReplyFn,
}

impl WorkItem {
    pub fn new(machine: MachineName, action: MachineryAction, reply: ReplyFn) -> Self {
        Self {
            machine,
            action,
            reply,
        }
    }
}

/// An action that is executing and waiting for its machine to reach
/// `expected_state`, tracked on the manager's waiter list.
pub struct Waiter {
    pub machine: MachineName,
    pub action: MachineryAction,
    pub expected_state: vmn_core::MachineState,
    pub timeout_secs: u64,
    pub fallback: Option<MachineryAction>,
    pub cancel: Option<MachineryAction>,
    pub wait_start: Instant,
    pub reply: ReplyFn,
}

impl Waiter {
    pub fn timeout_reached(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.wait_start).as_secs() >= self.timeout_secs
    }
}
