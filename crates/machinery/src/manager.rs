// SPDX-License-Identifier: MIT

//! Machinery Manager: the work-queue scheduler that drives machines
//! through restore_start/stop/etc via a small pool of worker threads.
//!
//! Structural port of `original_source/node/cuckoo/node/machinery.py`'s
//! `MachineryWorker`/`_WorkQueue`/`WorkTracker` trio: a worker pulls the
//! first queue item whose machine isn't already busy (skip-if-locked,
//! so per-machine FIFO order survives), runs the action function, and
//! either replies immediately or parks the item on a shared waiter list
//! that every worker sweeps (under a try-lock, so only one sweeps at a
//! time) before it next pulls work.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use vmn_core::{Clock, MachineName, MachineState, MachineryError, SystemClock};
use vmn_storage::TaskPaths;
use vmn_wire::{MachineryAction, MachineryReply};

use crate::backend::MachineryBackend;
use crate::pool::MachinePool;
use crate::queue::WorkQueue;
use crate::work::{Waiter, WorkItem};

const DEFAULT_NUM_WORKERS: usize = 4;
const IDLE_SLEEP: Duration = Duration::from_secs(1);

struct Shared {
    pool: Arc<MachinePool>,
    backends: Vec<Arc<dyn MachineryBackend>>,
    queue: WorkQueue,
    waiters: Mutex<Vec<Waiter>>,
    waiter_sweep_lock: Mutex<()>,
    do_run: AtomicBool,
    tasks_root: std::path::PathBuf,
    clock: Arc<dyn Clock>,
}

/// The Machinery Manager: owns the Pool, the registered backends, the
/// work queue/waiter list, and the worker thread pool.
pub struct MachineryManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl MachineryManager {
    pub fn new(
        pool: Arc<MachinePool>,
        backends: Vec<Arc<dyn MachineryBackend>>,
        tasks_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::with_clock(pool, backends, tasks_root, Arc::new(SystemClock))
    }

    /// Build a manager driven by a caller-supplied clock, e.g. a
    /// `FakeClock` in tests that need to force a waiter's timeout.
    pub fn with_clock(
        pool: Arc<MachinePool>,
        backends: Vec<Arc<dyn MachineryBackend>>,
        tasks_root: impl Into<std::path::PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool,
                backends,
                queue: WorkQueue::new(),
                waiters: Mutex::new(Vec::new()),
                waiter_sweep_lock: Mutex::new(()),
                do_run: AtomicBool::new(true),
                tasks_root: tasks_root.into(),
                clock,
            }),
            workers: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Load machine state from every registered backend into the Pool.
    /// Each backend is asked to `verify_dependencies`, `init`, and
    /// `load_machines`, mirroring `load_machineries` in the original.
    pub fn load_machineries(
        &self,
        previous: &vmn_storage::MachineStateDump,
    ) -> Result<(), MachineryError> {
        for backend in &self.shared.backends {
            backend.verify_dependencies()?;
            for machine in backend.load_machines()? {
                self.shared.pool.add(machine);
            }
        }
        self.shared.pool.load_stored_states(previous);
        Ok(())
    }

    pub fn start(self: &Arc<Self>, num_workers: usize) -> std::io::Result<()> {
        let n = if num_workers == 0 {
            DEFAULT_NUM_WORKERS
        } else {
            num_workers
        };
        let mut workers = self.workers.lock();
        for idx in 0..n {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("machinery-worker-{idx}"))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }
        Ok(())
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::warn!("machinery manager enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::warn!("machinery manager disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enqueue `action` for `machine`, invoking `reply` with the eventual
    /// outcome. Rejected synchronously (via an immediate `reply` call) if
    /// the manager is disabled and the action isn't `stop`, or if the
    /// machine is unknown.
    pub fn enqueue(
        &self,
        action: MachineryAction,
        machine: MachineName,
        reply: Box<dyn FnOnce(MachineryReply) + Send>,
    ) {
        if !self.is_enabled() && action != MachineryAction::Stop {
            reply(MachineryReply::failure("Machinery manager is disabled"));
            return;
        }
        if self.shared.pool.get_by_name(&machine).is_none() {
            reply(MachineryReply::failure(format!(
                "unknown machine {machine:?}"
            )));
            return;
        }
        self.shared.queue.push(WorkItem::new(machine, action, reply));
    }

    pub fn pool(&self) -> &Arc<MachinePool> {
        &self.shared.pool
    }

    /// Ask every backend to stop all its machines. Returns the names of
    /// machines that failed to stop; callers mark those ERROR.
    pub fn shutdown_all(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for backend in &self.shared.backends {
            failed.extend(backend.shutdown());
        }
        for name in &failed {
            self.shared
                .pool
                .set_state(&MachineName::new(name.as_str()), MachineState::Error);
        }
        failed
    }

    /// Block until the work queue and waiter list are both empty.
    pub fn wait_work_done(&self) {
        loop {
            std::thread::sleep(IDLE_SLEEP);
            if self.shared.queue.is_empty() && self.shared.waiters.lock().is_empty() {
                break;
            }
        }
    }

    /// Stop all worker threads. Join-blocks until they have observed
    /// `do_run = false` and returned.
    pub fn stop(&self) {
        self.shared.do_run.store(false, Ordering::SeqCst);
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn backend_for(shared: &Shared, machinery: &str) -> Option<&Arc<dyn MachineryBackend>> {
    shared
        .backends
        .iter()
        .find(|b| b.list_machines().iter().any(|m| m.machinery == machinery))
}

fn disable_machine(shared: &Shared, machine: &MachineName, reason: &str) {
    shared.pool.mark_disabled(machine, reason);
    tracing::error!(machine = %machine, reason, "disabling machine");
}

/// Run the composed action function: netcapture ordering, the backend
/// call itself, and the (expected_state, timeout, fallback, cancel)
/// tuple the manager needs to track the waiter.
///
/// Mirrors `stop`/`acpi_stop`/`restore_start`/`norestore_start` module
/// functions in the original: start actions start netcapture BEFORE the
/// backend call (stopping it again if the backend call fails); stop
/// actions stop netcapture AFTER the backend call regardless of outcome.
fn run_action(
    shared: &Shared,
    backend: &dyn MachineryBackend,
    machine: &vmn_core::Machine,
    action: MachineryAction,
) -> Result<(), MachineryError> {
    let pcap_path = TaskPaths::new(&shared.tasks_root, &machine_task_id(machine)).pcap();
    let ignore_ip_ports: Vec<SocketAddr> = Vec::new();

    match action {
        MachineryAction::RestoreStart | MachineryAction::NorestoreStart => {
            if let Err(e) = backend.start_netcapture(machine, &pcap_path, &ignore_ip_ports) {
                tracing::error!(machine = %machine.name, error = %e, "netcapture start failed");
            }
            let result = if action == MachineryAction::RestoreStart {
                backend.restore_start(machine)
            } else {
                backend.norestore_start(machine)
            };
            if result.is_err() {
                if let Err(e) = backend.stop_netcapture(machine) {
                    tracing::error!(machine = %machine.name, error = %e, "netcapture stop failed after start failure");
                }
            }
            result
        }
        MachineryAction::Stop | MachineryAction::AcpiStop => {
            let result = if action == MachineryAction::Stop {
                backend.stop(machine)
            } else {
                backend.acpi_stop(machine)
            };
            if let Err(e) = backend.stop_netcapture(machine) {
                tracing::error!(machine = %machine.name, error = %e, "netcapture stop failed");
            }
            result
        }
        MachineryAction::Screenshot => {
            let path = TaskPaths::new(&shared.tasks_root, &machine_task_id(machine))
                .screenshots_dir()
                .join("manager.jpg");
            backend.screenshot(machine, &path)
        }
    }
}

fn machine_task_id(machine: &vmn_core::Machine) -> vmn_core::TaskId {
    machine
        .locked_by
        .clone()
        .unwrap_or_else(|| vmn_core::TaskId::new("unlocked"))
}

fn worker_loop(shared: Arc<Shared>) {
    while shared.do_run.load(Ordering::SeqCst) {
        sweep_waiters(&shared);

        let Some(item) = shared.queue.pop_eligible_locking() else {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        let WorkItem {
            machine: machine_name,
            action,
            reply,
        } = item;

        let Some(machine) = shared.pool.get_by_name(&machine_name) else {
            shared.queue.unlock(&machine_name);
            reply(MachineryReply::failure("machine disappeared from pool"));
            continue;
        };

        let Some(backend) = backend_for(&shared, &machine.machinery) else {
            shared.queue.unlock(&machine_name);
            disable_machine(&shared, &machine_name, "no backend registered for machine");
            reply(MachineryReply::failure("no backend registered for machine"));
            continue;
        };

        match run_action(&shared, backend.as_ref(), &machine, action) {
            Ok(()) => match action.expected_state() {
                None => {
                    shared.queue.unlock(&machine_name);
                    reply(MachineryReply::success());
                }
                Some(expected_state) => {
                    shared.waiters.lock().push(Waiter {
                        machine: machine_name,
                        action,
                        expected_state,
                        timeout_secs: action.timeout_secs(),
                        fallback: action.fallback(),
                        cancel: action.cancel(),
                        wait_start: shared.clock.now(),
                        reply,
                    });
                }
            },
            Err(MachineryError::StateReached { .. }) => {
                // Machine already in the action's expected state: success.
                shared.pool.set_state(&machine_name, action.expected_state().unwrap_or(machine.state));
                shared.queue.unlock(&machine_name);
                reply(MachineryReply::success());
            }
            Err(e) if e.disables_machine() => {
                shared.queue.unlock(&machine_name);
                disable_machine(&shared, &machine_name, &e.to_string());
                reply(MachineryReply::failure(e.to_string()));
            }
            Err(e) => {
                // Transient/netcapture-class errors: fail the item, leave
                // the machine enabled for the next attempt.
                shared.queue.unlock(&machine_name);
                reply(MachineryReply::failure(e.to_string()));
            }
        }
    }
}

/// Poll every pending waiter once. Only one worker performs a sweep at a
/// time (try-lock); the others skip straight to pulling new work, which
/// matches the original's `handle_waiters` being called by every worker
/// on every loop iteration but returning immediately if the lock is held.
fn sweep_waiters(shared: &Shared) {
    let Some(_guard) = shared.waiter_sweep_lock.try_lock() else {
        return;
    };

    let mut waiters = shared.waiters.lock();
    let mut remaining = Vec::with_capacity(waiters.len());
    for waiter in waiters.drain(..) {
        if let Some(w) = poll_waiter(shared, waiter) {
            remaining.push(w);
        }
    }
    *waiters = remaining;
}

/// Returns `Some(waiter)` to keep waiting, `None` once it has been
/// resolved (replied to and action-unlocked).
fn poll_waiter(shared: &Shared, waiter: Waiter) -> Option<Waiter> {
    let Some(machine) = shared.pool.get_by_name(&waiter.machine) else {
        shared.queue.unlock(&waiter.machine);
        (waiter.reply)(MachineryReply::failure("machine disappeared from pool"));
        return None;
    };
    let Some(backend) = backend_for(shared, &machine.machinery) else {
        shared.queue.unlock(&waiter.machine);
        disable_machine(shared, &waiter.machine, "no backend registered for machine");
        (waiter.reply)(MachineryReply::failure("no backend registered for machine"));
        return None;
    };

    let state = match backend.state(&machine) {
        Ok(s) => s,
        Err(MachineryError::Unhandled { state, .. }) => {
            let reason = format!("Unhandled machine state. {state}");
            shared.queue.unlock(&waiter.machine);
            disable_machine(shared, &waiter.machine, &reason);
            (waiter.reply)(MachineryReply::failure(reason));
            return None;
        }
        Err(e) => {
            let reason = format!("Unexpected machinery error while requesting machine state. {e}");
            shared.queue.unlock(&waiter.machine);
            disable_machine(shared, &waiter.machine, &reason);
            (waiter.reply)(MachineryReply::failure(reason));
            return None;
        }
    };

    if state == waiter.expected_state {
        shared.pool.set_state(&waiter.machine, state);
        shared.queue.unlock(&waiter.machine);
        (waiter.reply)(MachineryReply::success());
        return None;
    }

    if state == MachineState::Error {
        let reason = "Machinery returned error state for machine".to_string();
        shared.queue.unlock(&waiter.machine);
        disable_machine(shared, &waiter.machine, &reason);
        (waiter.reply)(MachineryReply::failure(reason));
        return None;
    }

    if state == MachineState::Paused {
        if let Err(e) = backend.handle_paused(&machine) {
            tracing::error!(machine = %waiter.machine, error = %e, "pause-state handler failed");
        }
        return Some(waiter);
    }

    if waiter.timeout_reached(shared.clock.now()) {
        if let Some(fallback) = waiter.fallback {
            tracing::warn!(machine = %waiter.machine, ?fallback, "timeout reached, running fallback");
            shared.queue.push(WorkItem::new(waiter.machine.clone(), fallback, waiter.reply));
            shared.queue.unlock(&waiter.machine);
            return None;
        }

        let reason =
            "Timeout reached while waiting for machine to reach expected state.".to_string();
        shared.queue.unlock(&waiter.machine);
        disable_machine(shared, &waiter.machine, &reason);
        (waiter.reply)(MachineryReply::failure(reason.clone()));

        if let Some(cancel) = waiter.cancel {
            if let Some(backend) = backend_for(shared, &machine.machinery) {
                if let Err(e) = run_action(shared, backend.as_ref(), &machine, cancel) {
                    tracing::error!(machine = %waiter.machine, error = %e, "cancel action failed");
                }
            }
        }
        return None;
    }

    Some(waiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MachineryBackend;
    use parking_lot::Mutex as PMutex;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use vmn_core::{Machine, MachineState};
    use vmn_wire::MachineryAction;

    struct FakeBackend {
        machines: Vec<Machine>,
        states: PMutex<std::collections::HashMap<MachineName, MachineState>>,
        stuck: bool,
    }

    impl FakeBackend {
        fn new(name: &'static str, machines: Vec<Machine>) -> Self {
            let _ = name;
            let states = machines.iter().map(|m| (m.name.clone(), m.state)).collect();
            Self {
                machines,
                states: PMutex::new(states),
                stuck: false,
            }
        }

        /// A backend whose `restore_start`/`norestore_start` report success
        /// but never actually move the machine into `Running`, so any
        /// waiter on it can only resolve via timeout.
        fn stuck(name: &'static str, machines: Vec<Machine>) -> Self {
            Self {
                stuck: true,
                ..Self::new(name, machines)
            }
        }
    }

    impl MachineryBackend for FakeBackend {
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
            Ok(*self.states.lock().get(&machine.name).unwrap_or(&MachineState::Poweroff))
        }
        fn restore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
            if self.stuck {
                return Ok(());
            }
            self.states.lock().insert(machine.name.clone(), MachineState::Running);
            Ok(())
        }
        fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
            self.restore_start(machine)
        }
        fn stop(&self, machine: &Machine) -> Result<(), MachineryError> {
            self.states.lock().insert(machine.name.clone(), MachineState::Poweroff);
            Ok(())
        }
        fn acpi_stop(&self, machine: &Machine) -> Result<(), MachineryError> {
            self.stop(machine)
        }
        fn handle_paused(&self, _machine: &Machine) -> Result<(), MachineryError> {
            Ok(())
        }
        fn start_netcapture(
            &self,
            _machine: &Machine,
            _pcap_path: &std::path::Path,
            _ignore: &[SocketAddr],
        ) -> Result<(), MachineryError> {
            Ok(())
        }
        fn stop_netcapture(&self, _machine: &Machine) -> Result<(), MachineryError> {
            Ok(())
        }
        fn dump_memory(&self, _machine: &Machine, _path: &std::path::Path) -> Result<(), MachineryError> {
            Ok(())
        }
        fn shutdown(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn machine(name: &str) -> Machine {
        Machine {
            name: MachineName::new(name),
            machinery: "fake".into(),
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

    fn manager_with(backend: FakeBackend) -> (Arc<MachineryManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(MachinePool::new());
        let manager = Arc::new(MachineryManager::new(
            pool,
            vec![Arc::new(backend)],
            dir.path().to_path_buf(),
        ));
        manager
            .load_machineries(&vmn_storage::MachineStateDump::default())
            .unwrap();
        (manager, dir)
    }

    fn manager_with_clock(
        backend: FakeBackend,
        clock: Arc<vmn_core::FakeClock>,
    ) -> (Arc<MachineryManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(MachinePool::new());
        let manager = Arc::new(MachineryManager::with_clock(
            pool,
            vec![Arc::new(backend)],
            dir.path().to_path_buf(),
            clock,
        ));
        manager
            .load_machineries(&vmn_storage::MachineStateDump::default())
            .unwrap();
        (manager, dir)
    }

    #[test]
    fn restore_start_reaches_running_and_replies_success() {
        let (manager, _dir) = manager_with(FakeBackend::new("fake", vec![machine("vm1")]));
        manager.start(2).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        manager.enqueue(
            MachineryAction::RestoreStart,
            MachineName::new("vm1"),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );

        let reply = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(reply.success);
        assert_eq!(
            manager.pool().get_by_name(&MachineName::new("vm1")).unwrap().state,
            MachineState::Running
        );
        manager.stop();
    }

    #[test]
    fn disabled_manager_rejects_non_stop_actions() {
        let (manager, _dir) = manager_with(FakeBackend::new("fake", vec![machine("vm1")]));
        manager.disable();

        let (tx, rx) = std::sync::mpsc::channel();
        manager.enqueue(
            MachineryAction::RestoreStart,
            MachineName::new("vm1"),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );
        let reply = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!reply.success);
    }

    #[test]
    fn unknown_machine_fails_synchronously() {
        let (manager, _dir) = manager_with(FakeBackend::new("fake", vec![machine("vm1")]));
        let (tx, rx) = std::sync::mpsc::channel();
        manager.enqueue(
            MachineryAction::Stop,
            MachineName::new("nope"),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );
        let reply = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!reply.success);
    }

    #[test]
    fn two_machines_run_concurrently_through_separate_workers() {
        let (manager, _dir) = manager_with(FakeBackend::new(
            "fake",
            vec![machine("vm1"), machine("vm2")],
        ));
        manager.start(2).unwrap();

        let (tx1, rx1) = std::sync::mpsc::channel();
        let (tx2, rx2) = std::sync::mpsc::channel();
        manager.enqueue(
            MachineryAction::RestoreStart,
            MachineName::new("vm1"),
            Box::new(move |r| {
                let _ = tx1.send(r);
            }),
        );
        manager.enqueue(
            MachineryAction::RestoreStart,
            MachineName::new("vm2"),
            Box::new(move |r| {
                let _ = tx2.send(r);
            }),
        );

        assert!(rx1.recv_timeout(Duration::from_secs(5)).unwrap().success);
        assert!(rx2.recv_timeout(Duration::from_secs(5)).unwrap().success);
        manager.stop();
    }

    #[test]
    fn waiter_times_out_once_the_injected_clock_passes_the_deadline() {
        let clock = Arc::new(vmn_core::FakeClock::new());
        let (manager, _dir) = manager_with_clock(
            FakeBackend::stuck("fake", vec![machine("vm1")]),
            clock.clone(),
        );
        manager.start(1).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        manager.enqueue(
            MachineryAction::RestoreStart,
            MachineName::new("vm1"),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );

        // Nothing resolves the waiter while the clock hasn't reached its
        // 180s timeout: the reply channel should still be empty.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        clock.advance(Duration::from_secs(181));
        let reply = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!reply.success);
        assert!(manager
            .pool()
            .get_by_name(&MachineName::new("vm1"))
            .unwrap()
            .disabled);
        manager.stop();
    }
}
