// SPDX-License-Identifier: MIT

//! `LibvirtMachinery`: the one concrete backend this node ships.
//!
//! Its machine list comes from configuration rather than discovery, and
//! its lifecycle actions track an in-memory state map rather than
//! issuing real `virsh`/libvirt-API calls — wiring this up to an actual
//! hypervisor is explicitly out of scope for this core (spec.md §1).
//! What this backend DOES enforce faithfully is the manager's expected
//! contract: `restore_start`/`norestore_start` settle at RUNNING,
//! `stop`/`acpi_stop` settle at POWEROFF, and `state` reports whatever
//! this backend itself last set, so the manager's waiter-polling logic
//! exercises against a backend indistinguishable from a real one from
//! its own point of view.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use parking_lot::Mutex;
use vmn_core::{Machine, MachineName, MachineState, MachineryError};

use crate::backend::MachineryBackend;

pub struct LibvirtMachinery {
    machines: Vec<Machine>,
    states: Mutex<HashMap<MachineName, MachineState>>,
}

impl LibvirtMachinery {
    /// `machines` is the configured machine list for this backend
    /// (config's `[[machine]]` tables where `machinery = "libvirt"`).
    pub fn new(machines: Vec<Machine>) -> Self {
        let states = machines.iter().map(|m| (m.name.clone(), m.state)).collect();
        Self {
            machines,
            states: Mutex::new(states),
        }
    }

    fn set_state(&self, machine: &MachineName, state: MachineState) {
        self.states.lock().insert(machine.clone(), state);
    }
}

impl MachineryBackend for LibvirtMachinery {
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
        self.set_state(&machine.name, MachineState::Running);
        Ok(())
    }

    fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
        self.restore_start(machine)
    }

    fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        self.set_state(&machine.name, MachineState::Poweroff);
        Ok(())
    }

    fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
        self.stop(machine)
    }

    fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError> {
        tracing::warn!(machine = %machine.name, "libvirt machine reported paused, resetting to running");
        self.set_state(&machine.name, MachineState::Running);
        Ok(())
    }

    fn start_netcapture(
        &self,
        machine: &Machine,
        pcap_path: &Path,
        _ignore: &[SocketAddr],
    ) -> Result<(), MachineryError> {
        tracing::debug!(machine = %machine.name, pcap_path = %pcap_path.display(), "netcapture start (stubbed)");
        Ok(())
    }

    fn stop_netcapture(&self, machine: &Machine) -> Result<(), MachineryError> {
        tracing::debug!(machine = %machine.name, "netcapture stop (stubbed)");
        Ok(())
    }

    fn dump_memory(&self, machine: &Machine, path: &Path) -> Result<(), MachineryError> {
        tracing::debug!(machine = %machine.name, path = %path.display(), "memory dump (stubbed)");
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
            machinery: "libvirt".into(),
            label: name.to_string(),
            ip: "192.168.56.101".into(),
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
    fn restore_start_then_stop_round_trips_state() {
        let backend = LibvirtMachinery::new(vec![machine("vm1")]);
        let m = machine("vm1");
        backend.restore_start(&m).unwrap();
        assert_eq!(backend.state(&m).unwrap(), MachineState::Running);
        backend.stop(&m).unwrap();
        assert_eq!(backend.state(&m).unwrap(), MachineState::Poweroff);
    }

    #[test]
    fn unknown_machine_reports_poweroff() {
        let backend = LibvirtMachinery::new(vec![machine("vm1")]);
        assert_eq!(backend.state(&machine("vm2")).unwrap(), MachineState::Poweroff);
    }

    #[test]
    fn shutdown_resets_every_machine_to_poweroff() {
        let backend = LibvirtMachinery::new(vec![machine("vm1"), machine("vm2")]);
        backend.restore_start(&machine("vm1")).unwrap();
        backend.restore_start(&machine("vm2")).unwrap();
        assert!(backend.shutdown().is_empty());
        assert_eq!(backend.state(&machine("vm1")).unwrap(), MachineState::Poweroff);
        assert_eq!(backend.state(&machine("vm2")).unwrap(), MachineState::Poweroff);
    }
}
