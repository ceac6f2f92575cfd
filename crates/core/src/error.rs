// SPDX-License-Identifier: MIT

//! Error taxonomy shared across the node's subsystems.
//!
//! Each subsystem gets its own small enum rather than one global error
//! type, matching the kinds table in the specification's error-handling
//! section rather than any single backend's exception hierarchy.

use thiserror::Error;

/// Errors a machinery backend plug-in may raise from an action call.
#[derive(Debug, Error)]
pub enum MachineryError {
    /// The action is a no-op in the machine's current state — treated as success.
    #[error("machine {machine} already in the state {action} expects")]
    StateReached { machine: String, action: &'static str },

    /// The observed state is inconsistent with what the action expects.
    #[error("machine {machine} in unexpected state during {action}: {detail}")]
    UnexpectedState {
        machine: String,
        action: &'static str,
        detail: String,
    },

    /// The backend reported a state name the manager does not recognize.
    #[error("machine {machine} reported unhandled state {state:?}")]
    Unhandled { machine: String, state: String },

    /// A recoverable backend failure; the item fails but the machine is not disabled.
    #[error("transient machinery error on {machine}: {detail}")]
    Transient { machine: String, detail: String },

    /// A repeated or unknown backend failure; the machine is disabled.
    #[error("fatal machinery error on {machine}: {detail}")]
    Fatal { machine: String, detail: String },

    /// Network-capture start/stop failed. Logged, never fails the enclosing action.
    #[error("netcapture error on {machine}: {detail}")]
    NetCapture { machine: String, detail: String },
}

impl MachineryError {
    pub fn machine(&self) -> &str {
        match self {
            MachineryError::StateReached { machine, .. }
            | MachineryError::UnexpectedState { machine, .. }
            | MachineryError::Unhandled { machine, .. }
            | MachineryError::Transient { machine, .. }
            | MachineryError::Fatal { machine, .. }
            | MachineryError::NetCapture { machine, .. } => machine,
        }
    }

    /// Whether this error should disable the machine it names.
    pub fn disables_machine(&self) -> bool {
        matches!(
            self,
            MachineryError::UnexpectedState { .. }
                | MachineryError::Unhandled { .. }
                | MachineryError::Fatal { .. }
        )
    }
}

/// Errors surfaced while submitting or processing machinery/task requests.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unknown machine {0:?}")]
    UnknownMachine(String),
    #[error("no machine available: {0}")]
    MachineNotAvailable(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors a Task Flow Runner flow can accumulate.
#[derive(Debug, Error)]
pub enum TaskFlowError {
    #[error("result server rejected mapping: {0}")]
    ResultServerMapping(String),
    #[error("machinery manager error: {0}")]
    Machinery(String),
    #[error("guest agent unreachable after {0}s")]
    AgentUnreachable(u64),
    #[error("route request failed: {0}")]
    Route(String),
    #[error("stager error: {0}")]
    Stager(String),
}

/// Errors surfaced by the Node Controller: intake, tracking, shutdown.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid or non-existing task descriptor for task {0}: {1}")]
    InvalidTask(String, String),
    #[error("machine {0} is not available")]
    MachineNotAvailable(String),
    #[error("task {0} is already tracked")]
    AlreadyTracked(String),
    #[error("cannot mark end for unknown task: {0}")]
    UnknownTask(String),
    #[error("task runner rejected submission: {0}")]
    TaskFlow(String),
}

/// Reasons a result-server upload is aborted mid-transfer.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("path rejected: {0}")]
    IllegalPath(String),
    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),
    #[error("ip {0} is not mapped to a task")]
    UnmappedIp(String),
    #[error("maximum size exceeded ({0} bytes)")]
    MaxBytesWritten(u64),
    #[error("header mismatch: expected JPEG SOI")]
    HeaderMismatch,
    #[error("destination already exists")]
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_state_disables_machine() {
        let err = MachineryError::UnexpectedState {
            machine: "vm1".into(),
            action: "stop",
            detail: "still running".into(),
        };
        assert!(err.disables_machine());
        assert_eq!(err.machine(), "vm1");
    }

    #[test]
    fn transient_does_not_disable_machine() {
        let err = MachineryError::Transient {
            machine: "vm1".into(),
            detail: "timeout talking to hypervisor".into(),
        };
        assert!(!err.disables_machine());
    }

    #[test]
    fn state_reached_does_not_disable_machine() {
        let err = MachineryError::StateReached {
            machine: "vm1".into(),
            action: "stop",
        };
        assert!(!err.disables_machine());
    }
}
