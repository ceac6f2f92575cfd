// SPDX-License-Identifier: MIT

//! Machine Pool: the registry of configured machines and the only place
//! that mutates machine state outside a backend call in flight.

use parking_lot::RwLock;
use std::collections::HashMap;
use vmn_core::{Machine, MachineName, MachineState, TaskId};
use vmn_storage::MachineStateDump;

#[derive(Debug, Default)]
pub struct MachinePool {
    machines: RwLock<HashMap<MachineName, Machine>>,
}

impl MachinePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, machine: Machine) {
        self.machines.write().insert(machine.name.clone(), machine);
    }

    pub fn get_by_name(&self, name: &MachineName) -> Option<Machine> {
        self.machines.read().get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.machines.read().len()
    }

    pub fn list(&self) -> Vec<Machine> {
        self.machines.read().values().cloned().collect()
    }

    /// Hand out `name` to `task_id` iff it exists, is not disabled, is not
    /// locked, and its last known state is POWEROFF. Sets `locked_by`
    /// atomically on success.
    pub fn acquire_available(&self, task_id: &TaskId, name: &MachineName) -> Option<Machine> {
        let mut machines = self.machines.write();
        let machine = machines.get_mut(name)?;
        if !machine.is_acquirable() {
            return None;
        }
        machine.locked_by = Some(task_id.clone());
        Some(machine.clone())
    }

    /// Clear `locked_by` on the named machine. Idempotent.
    pub fn release(&self, name: &MachineName) {
        if let Some(machine) = self.machines.write().get_mut(name) {
            machine.locked_by = None;
        }
    }

    pub fn mark_disabled(&self, name: &MachineName, reason: impl Into<String>) {
        if let Some(machine) = self.machines.write().get_mut(name) {
            machine.disabled = true;
            machine.disabled_reason = Some(reason.into());
            machine.state = MachineState::Error;
        }
    }

    pub fn set_state(&self, name: &MachineName, state: MachineState) {
        if let Some(machine) = self.machines.write().get_mut(name) {
            machine.state = state;
        }
    }

    /// Apply a previously persisted state dump: any machine known to the
    /// dump but missing here is ignored (configuration may have dropped
    /// it); any machine here but absent from the dump keeps its default
    /// POWEROFF.
    pub fn load_stored_states(&self, previous: &MachineStateDump) {
        let mut machines = self.machines.write();
        for machine in machines.values_mut() {
            if let Some(state) = previous.previous_state(&machine.name) {
                machine.state = state;
            }
        }
    }
}
