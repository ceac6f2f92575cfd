// SPDX-License-Identifier: MIT

//! `FakeMachinery`: an in-memory backend for tests and local development,
//! grounded on the teacher's `FakeAgentAdapter` — a backend that honors
//! the same contract as a real one without touching any hypervisor.
//! Unlike `LibvirtMachinery` it lets a test inject a failure for a named
//! machine and action, so callers (manager, pool, controller) can be
//! exercised against error paths without a real backend ever failing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use parking_lot::Mutex;
use vmn_core::{Machine, MachineName, MachineState, MachineryError};

use crate::backend::MachineryBackend;

/// The lifecycle action a fault is injected against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeAction {
    RestoreStart,
    NorestoreStart,
    Stop,
    AcpiStop,
}

pub struct FakeMachinery {
    machines: Vec<Machine>,
    states: Mutex<HashMap<MachineName, MachineState>>,
    faults: Mutex<HashMap<(MachineName, FakeAction), MachineryError>>,
}

impl FakeMachinery {
    pub fn new(machines: Vec<Machine>) -> Self {
        let states = machines.iter().map(|m| (m.name.clone(), m.state)).collect();
        Self {
            machines,
            states: Mutex::new(states),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// The next call to `action` against `machine` returns `err` instead
    /// of succeeding. The injected fault is consumed on first use.
    pub fn inject_fault(&self, machine: &MachineName, action: FakeAction, err: MachineryError) {
        self.faults.lock().insert((machine.clone(), action), err);
    }

    fn take_fault(&self, machine: &MachineName, action: FakeAction) -> Option<MachineryError> {
        self.faults.lock().remove(&(machine.clone(), action))
    }

    fn set_state(&self, machine: &MachineName, state: MachineState) {
        self.states.lock().insert(machine.clone(), state);
    }
}

impl MachineryBackend for FakeMachinery {
    fn verify_dependencies(&self) -> Result<(), MachineryError> {
        Ok(())
    }

    fn init(&mut self) -> Result<(), MachineryError> {
        Ok(())
    }

    fn load_machines(&self) -> Result<Vec<Machine>, MachineryError> {
        Ok(self.machines.clone())
    }

    fn list_machines(&self) -> Vec<Machine> {
        self.machines.clone()
    }

    fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError> {
        Ok(*self
            .states
            .lock()
            .get(&machine.name)
            .unwrap_or(&MachineState::Poweroff))
    }

    fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        if let Some(err) = self.take_fault(&machine.name, FakeAction::RestoreStart) {
            return Err(err);
        }
        self.set_state(&machine.name, MachineState::Running);
        Ok(())
    }

    fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        if let Some(err) = self.take_fault(&machine.name, FakeAction::NorestoreStart) {
            return Err(err);
        }
        self.set_state(&machine.name, MachineState::Running);
        Ok(())
    }

    fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        if let Some(err) = self.take_fault(&machine.name, FakeAction::Stop) {
            return Err(err);
        }
        self.set_state(&machine.name, MachineState::Poweroff);
        Ok(())
    }

    fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        if let Some(err) = self.take_fault(&machine.name, FakeAction::AcpiStop) {
            return Err(err);
        }
        self.set_state(&machine.name, MachineState::Poweroff);
        Ok(())
    }

    fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError> {
        self.set_state(&machine.name, MachineState::Running);
        Ok(())
    }

    fn start_netcapture(
        &self,
        _machine: &Machine,
        _pcap_path: &Path,
        _ignore: &[SocketAddr],
    ) -> Result<(), MachineryError> {
        Ok(())
    }

    fn stop_netcapture(&self, _machine: &Machine) -> Result<(), MachineryError> {
        Ok(())
    }

    fn dump_memory(&self, _machine: &Machine, _path: &Path) -> Result<(), MachineryError> {
        Ok(())
    }

    fn shutdown(&self) -> Vec<String> {
        let mut states = self.states.lock();
        for state in states.values_mut() {
            *state = MachineState::Poweroff;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn machine(name: &str) -> Machine {
        Machine {
            name: MachineName::new(name),
            machinery: "fake".into(),
            label: name.to_string(),
            ip: "127.0.0.1".into(),
            agent_port: 8000,
            platform: "windows".into(),
            os_version: "10".into(),
            arch: "amd64".into(),
            mac_address: None,
            snapshot: None,
            interface: None,
            tags: BTreeSet::new(),
            state: MachineState::Poweroff,
            locked_by: None,
            disabled: false,
            disabled_reason: None,
        }
    }

    #[test]
    fn injected_fault_is_consumed_once() {
        let backend = FakeMachinery::new(vec![machine("vm1")]);
        let m = machine("vm1");
        backend.inject_fault(
            &m.name,
            FakeAction::RestoreStart,
            MachineryError::Unhandled {
                machine: m.name.to_string(),
                state: "boom".into(),
            },
        );

        assert!(backend.restore_start(&m).is_err());
        assert!(backend.restore_start(&m).is_ok());
        assert_eq!(backend.state(&m).unwrap(), MachineState::Running);
    }

    #[test]
    fn no_fault_means_normal_behavior() {
        let backend = FakeMachinery::new(vec![machine("vm1")]);
        let m = machine("vm1");
        assert!(backend.restore_start(&m).is_ok());
        assert_eq!(backend.state(&m).unwrap(), MachineState::Running);
    }
}
