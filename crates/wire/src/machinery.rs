// SPDX-License-Identifier: MIT

//! Machinery Manager control-socket messages:
//! `{action, machine}` -> `{success, reason?}`.

use serde::{Deserialize, Serialize};
use vmn_core::MachineName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineryAction {
    RestoreStart,
    NorestoreStart,
    Stop,
    AcpiStop,
    Screenshot,
}

impl MachineryAction {
    /// The state this action is expected to reach on success, if any
    /// (`screenshot` and `dump_memory` do not change machine state).
    pub fn expected_state(self) -> Option<vmn_core::MachineState> {
        use vmn_core::MachineState::*;
        match self {
            MachineryAction::RestoreStart | MachineryAction::NorestoreStart => Some(Running),
            MachineryAction::Stop | MachineryAction::AcpiStop => Some(Poweroff),
            MachineryAction::Screenshot => None,
        }
    }

    /// Per-action timeout, in seconds, per the manager's composed-action rules.
    pub fn timeout_secs(self) -> u64 {
        match self {
            MachineryAction::Stop => 60,
            MachineryAction::AcpiStop => 120,
            MachineryAction::RestoreStart => 180,
            MachineryAction::NorestoreStart => 60,
            MachineryAction::Screenshot => 30,
        }
    }

    /// The fallback action enqueued on timeout, if any.
    pub fn fallback(self) -> Option<MachineryAction> {
        match self {
            MachineryAction::AcpiStop => Some(MachineryAction::Stop),
            _ => None,
        }
    }

    /// The cancel action run best-effort when the action times out with no fallback.
    pub fn cancel(self) -> Option<MachineryAction> {
        match self {
            MachineryAction::RestoreStart | MachineryAction::NorestoreStart => {
                Some(MachineryAction::Stop)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineryRequest {
    pub action: MachineryAction,
    pub machine: MachineName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineryReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MachineryReply {
    pub fn success() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}
