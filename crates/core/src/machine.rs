// SPDX-License-Identifier: MIT

//! Machine domain type and its runtime state.

use crate::id::{MachineName, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Runtime state of a machine as observed through its machinery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineState {
    Poweroff,
    Running,
    Paused,
    Suspended,
    Error,
}

impl MachineState {
    /// The state a successful `restore_start`/`norestore_start` settles into.
    pub const fn started() -> Self {
        MachineState::Running
    }

    /// The state a successful `stop`/`acpi_stop` settles into.
    pub const fn stopped() -> Self {
        MachineState::Poweroff
    }
}

/// A machine as configured in a machinery backend, with the mutable
/// runtime fields the Machine Pool and Machinery Manager maintain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub name: MachineName,
    /// Identifier of the backend that owns this machine (e.g. "libvirt-kvm").
    pub machinery: String,
    /// The backend's own label for this machine (e.g. libvirt domain name).
    pub label: String,
    pub ip: String,
    pub agent_port: u16,
    pub platform: String,
    pub os_version: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default = "default_state")]
    pub state: MachineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<TaskId>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

fn default_state() -> MachineState {
    MachineState::Poweroff
}

impl Machine {
    /// True if this machine can be handed out by `acquire_available`:
    /// present, not disabled, not locked, and last known to be POWEROFF.
    ///
    /// `ERROR` is deliberately excluded — clearing it is an operator action,
    /// not something the pool does on its own (see DESIGN.md open question 1).
    pub fn is_acquirable(&self) -> bool {
        !self.disabled && self.locked_by.is_none() && self.state == MachineState::Poweroff
    }
}
