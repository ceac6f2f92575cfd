// SPDX-License-Identifier: MIT

//! The machinery backend plug-in contract. Every call returns
//! synchronously and is expected to run inside a manager worker thread.

use std::net::SocketAddr;
use std::path::Path;
use vmn_core::{Machine, MachineryError, MachineState};

/// A hypervisor/cloud backend that knows how to drive a concrete set of
/// machines. Implementations MUST raise the typed errors in
/// `vmn_core::MachineryError` rather than panicking — a panicking
/// backend call would take down a manager worker thread along with
/// every other machine it might still be serving.
pub trait MachineryBackend: Send + Sync {
    fn verify_dependencies(&self) -> Result<(), MachineryError>;
    fn init(&mut self) -> Result<(), MachineryError>;
    fn load_machines(&self) -> Result<Vec<Machine>, MachineryError>;
    fn list_machines(&self) -> Vec<Machine>;

    /// MUST return one of the canonical state names, or
    /// `MachineryError::Unhandled` if the backend reports something else.
    fn state(&self, machine: &Machine) -> Result<MachineState, MachineryError>;

    fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError>;
    fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError>;
    fn stop(&self, machine: &Machine) -> Result<(), MachineryError>;
    fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError>;

    /// Recovery hook called while waiting on an action whose machine is
    /// observed in PAUSED — the caller keeps waiting afterward regardless
    /// of the result.
    fn handle_paused(&self, machine: &Machine) -> Result<(), MachineryError>;

    fn start_netcapture(
        &self,
        machine: &Machine,
        pcap_path: &Path,
        ignore: &[SocketAddr],
    ) -> Result<(), MachineryError>;
    fn stop_netcapture(&self, machine: &Machine) -> Result<(), MachineryError>;

    fn dump_memory(&self, machine: &Machine, path: &Path) -> Result<(), MachineryError>;

    /// Screenshot capture. The upstream source never implemented this for
    /// any backend; the default keeps that behavior as an explicit no-op
    /// rather than silently pretending it succeeded in a meaningful way.
    fn screenshot(&self, _machine: &Machine, _path: &Path) -> Result<(), MachineryError> {
        Ok(())
    }

    /// Stop every machine this backend knows about. Returns the names of
    /// machines that failed to stop, which the manager marks ERROR.
    fn shutdown(&self) -> Vec<String>;
}
