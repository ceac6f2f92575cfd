// SPDX-License-Identifier: MIT

//! Event stream payloads and the task-state enum they report on.

use crate::id::TaskId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task as observed by the Node Controller.
///
/// A task moves through these exactly once: QUEUED -> RUNNING -> (DONE | FAILED).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
}

/// The body of an event, tagged the way the node's other wire types are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskState { task_id: TaskId, state: TaskState },
    MachineDisabled { machine_name: String, reason: String },
}

/// A single entry in the event stream: a strictly increasing id paired
/// with its payload. Ids start at 1 and never repeat within a process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_event_round_trips_through_json() {
        let ev = Event {
            id: 1,
            payload: EventPayload::TaskState {
                task_id: TaskId::new("t1"),
                state: TaskState::Running,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"task_state\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn machine_disabled_event_round_trips_through_json() {
        let ev = Event {
            id: 2,
            payload: EventPayload::MachineDisabled {
                machine_name: "vm1".into(),
                reason: "timeout".into(),
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
