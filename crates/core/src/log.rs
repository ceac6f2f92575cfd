// SPDX-License-Identifier: MIT

//! Span helpers so every subsystem attaches the same fields to a task or
//! machine's log lines, the Rust analogue of `CuckooGlobalLogger`'s
//! `task_id`/`machine` keyword-field convention.

use crate::id::{MachineName, TaskId};
use tracing::Span;

/// A span carrying `task_id` (and `analysis_id`, if known), to be
/// entered for the duration of work on that task.
pub fn task_span(task_id: &TaskId) -> Span {
    tracing::info_span!("task", task_id = %task_id)
}

/// A span carrying `machine`, to be entered for the duration of a
/// machinery action or flow step against that machine.
pub fn machine_span(machine: &MachineName) -> Span {
    tracing::info_span!("machine", machine = %machine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_carry_their_field_names() {
        let span = task_span(&TaskId::new("t1"));
        assert_eq!(span.metadata().map(|m| m.name()), Some("task"));
    }
}
