// SPDX-License-Identifier: MIT

//! `StateController`: the unix socket that receives `taskrundone`/
//! `taskrunfailed` notifications from the Task Flow Runner and retires
//! the task on the [`NodeController`], optionally zipping the task's
//! result directory first.
//!
//! Structural port of `control.py`'s `NodeTaskController`/
//! `StateControllerWorker`/`_WorkTracker`: a fixed pool of worker
//! threads pulls jobs off a queue fed by the socket's accept loop, so a
//! slow zip never blocks the next notification from being accepted.

use std::io::{BufRead, BufReader};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use vmn_core::TaskId;
use vmn_storage::TaskPaths;
use vmn_wire::NodeStateMessage;

use crate::controller::NodeController;
use crate::zip::zip_task_results;

const NUM_STATE_CONTROLLER_WORKERS: usize = 4;

struct Job {
    task_id: TaskId,
    success: bool,
}

struct Shared {
    controller: Arc<NodeController>,
    tasks_root: PathBuf,
    zip_results: bool,
    job_rx: Mutex<Receiver<Job>>,
    job_tx: Sender<Job>,
    do_run: AtomicBool,
}

pub struct StateController {
    shared: Arc<Shared>,
    sock_path: PathBuf,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StateController {
    /// `zip_results`: whether to zip a task's result directory before
    /// marking it done, per the node's `zip_results` config flag.
    pub fn new(controller: Arc<NodeController>, sock_path: impl Into<PathBuf>, zip_results: bool) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::channel();
        let tasks_root = controller.tasks_root().to_path_buf();
        Arc::new(Self {
            shared: Arc::new(Shared {
                controller,
                tasks_root,
                zip_results,
                job_rx: Mutex::new(job_rx),
                job_tx,
                do_run: AtomicBool::new(true),
            }),
            sock_path: sock_path.into(),
            accept_handle: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Bind the control socket and start the worker pool plus the accept
    /// loop, each on its own OS thread. Returns once both are running.
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        if self.sock_path.exists() {
            std::fs::remove_file(&self.sock_path)?;
        }
        let listener = UnixListener::bind(&self.sock_path)?;

        let mut workers = self.workers.lock();
        for idx in 0..NUM_STATE_CONTROLLER_WORKERS {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("state-controller-worker-{idx}"))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }
        drop(workers);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("state-controller-accept".into())
            .spawn(move || accept_loop(shared, listener))?;
        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.do_run.store(false, Ordering::SeqCst);
        // A zero-byte connect wakes the accept() call blocked in accept_loop.
        let _ = UnixStream::connect(&self.sock_path);
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.sock_path);
    }
}

fn accept_loop(shared: Arc<Shared>, listener: UnixListener) {
    while shared.do_run.load(Ordering::SeqCst) {
        let Ok((stream, _addr)) = listener.accept() else {
            continue;
        };
        if !shared.do_run.load(Ordering::SeqCst) {
            return;
        }
        handle_connection(&shared, stream);
    }
}

fn handle_connection(shared: &Shared, stream: UnixStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<NodeStateMessage>(trimmed) {
            Ok(NodeStateMessage::Taskrundone { task_id, .. }) => {
                let _ = shared.job_tx.send(Job { task_id, success: true });
            }
            Ok(NodeStateMessage::Taskrunfailed { task_id, .. }) => {
                let _ = shared.job_tx.send(Job { task_id, success: false });
            }
            Err(e) => {
                tracing::warn!(error = %e, line = %trimmed, "malformed node state message");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while shared.do_run.load(Ordering::SeqCst) {
        let job = {
            let rx = shared.job_rx.lock();
            rx.recv_timeout(std::time::Duration::from_secs(1))
        };
        let Ok(job) = job else { continue };
        run_job(&shared, job);
    }
}

fn run_job(shared: &Shared, job: Job) {
    let Job { task_id, success } = job;

    let final_success = if shared.zip_results {
        let paths = TaskPaths::new(&shared.tasks_root, &task_id);
        match zip_task_results(paths.root(), &paths.zipped_results()) {
            Ok(()) => success,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to create task result zip");
                false
            }
        }
    } else {
        success
    };

    if final_success {
        shared.controller.set_task_success(&task_id);
    } else {
        shared.controller.set_task_failed(&task_id);
    }
}

#[allow(dead_code)]
fn task_dir(tasks_root: &Path, task_id: &TaskId) -> PathBuf {
    TaskPaths::new(tasks_root, task_id).root().to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Duration;
    use vmn_core::{AnalysisId, Machine, MachineName, MachineState, MachineryError, Task};
    use vmn_machinery::{MachinePool, MachineryBackend, MachineryManager};
    use vmn_resultserver::ResultServer;
    use vmn_taskflow::{FlowContext, TaskRunner};

    use crate::events::EventStream;

    struct InstantBackend;

    impl MachineryBackend for InstantBackend {
        fn verify_dependencies(&self) -> Result<(), MachineryError> {
            Ok(())
        }
        fn init(&mut self) -> Result<(), MachineryError> {
            Ok(())
        }
        fn load_machines(&self) -> Result<Vec<Machine>, MachineryError> {
            Ok(vec![sample_machine()])
        }
        fn list_machines(&self) -> Vec<Machine> {
            vec![sample_machine()]
        }
        fn state(&self, _machine: &Machine) -> Result<MachineState, MachineryError> {
            Ok(MachineState::Poweroff)
        }
        fn restore_start(&self, _machine: &Machine) -> Result<(), MachineryError> {
            Ok(())
        }
        fn norestore_start(&self, machine: &Machine) -> Result<(), MachineryError> {
            self.restore_start(machine)
        }
        fn stop(&self, _machine: &Machine) -> Result<(), MachineryError> {
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

    fn sample_machine() -> Machine {
        Machine {
            name: MachineName::new("vm1"),
            machinery: "fake".into(),
            label: "vm1".into(),
            ip: "127.0.0.1".into(),
            agent_port: 1,
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

    fn setup(zip_results: bool) -> (Arc<StateController>, Arc<NodeController>, Arc<MachineryManager>, Arc<TaskRunner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(MachinePool::new());
        pool.add(sample_machine());
        let manager = Arc::new(MachineryManager::new(Arc::clone(&pool), vec![Arc::new(InstantBackend)], dir.path()));
        manager
            .load_machineries(&vmn_storage::MachineStateDump::default())
            .unwrap();
        manager.start(1).unwrap();

        let ctx = FlowContext {
            tasks_root: dir.path().to_path_buf(),
            resultserver: ResultServer::new(dir.path()),
            machinery: Arc::clone(&manager),
            rooter_sock_path: None,
            node_state_sock_path: dir.path().join("node_state.sock"),
            agent_online_timeout: Duration::from_millis(50),
        };
        let runner = TaskRunner::new(ctx);
        runner.start(1).unwrap();

        let events = Arc::new(EventStream::new(10));
        let node_controller = NodeController::new(Arc::clone(&pool), Arc::clone(&runner), dir.path(), events);

        // Track the task up front so a bare state notification has
        // something to retire, bypassing add_work's machine acquisition.
        let sock_path = dir.path().join("state_control.sock");
        let state_control = StateController::new(Arc::clone(&node_controller), &sock_path, zip_results);
        state_control.start().unwrap();

        (state_control, node_controller, manager, runner, dir)
    }

    fn write_task_dir(dir: &Path, task_id: &str) {
        let paths = TaskPaths::new(dir, &TaskId::new(task_id));
        paths.ensure_dirs().unwrap();
        let task = Task {
            task_id: TaskId::new(task_id),
            analysis_id: AnalysisId::new("a1"),
            kind: "standard".into(),
            route: None,
            platform: "windows".into(),
            arch: "amd64".into(),
            timeout_secs: 0,
            assigned_machine: None,
        };
        std::fs::write(paths.task_json(), serde_json::to_vec(&task).unwrap()).unwrap();
    }

    fn send_message(sock_path: &Path, message: &NodeStateMessage) {
        let mut stream = UnixStream::connect(sock_path).unwrap();
        let mut line = serde_json::to_string(message).unwrap();
        line.push('\n');
        stream.write_all(line.as_bytes()).unwrap();
    }

    #[test]
    fn task_done_message_retires_the_tracked_task() {
        let (state_control, node_controller, manager, runner, dir) = setup(false);
        write_task_dir(dir.path(), "t1");
        node_controller
            .add_work(TaskId::new("t1"), MachineName::new("vm1"))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while node_controller.tracked_count() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        // Synthesize the notification directly, bypassing the flow runner
        // timing, to isolate the state controller's own behavior.
        send_message(
            &dir.path().join("state_control.sock"),
            &NodeStateMessage::Taskrundone {
                task_id: TaskId::new("t1"),
                analysis_id: AnalysisId::new("a1"),
            },
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while node_controller.tracked_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(node_controller.tracked_count(), 0);

        state_control.stop();
        runner.stop_all();
        runner.stop();
        manager.stop();
    }

    #[test]
    fn zip_failure_forces_the_task_to_fail() {
        let (state_control, node_controller, manager, runner, dir) = setup(true);
        write_task_dir(dir.path(), "t1");
        node_controller
            .add_work(TaskId::new("t1"), MachineName::new("vm1"))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while node_controller.tracked_count() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        // Remove the task directory so the zip step fails regardless of
        // the reported outcome, forcing the task to FAILED.
        let _ = std::fs::remove_dir_all(TaskPaths::new(dir.path(), &TaskId::new("t1")).root());

        send_message(
            &dir.path().join("state_control.sock"),
            &NodeStateMessage::Taskrundone {
                task_id: TaskId::new("t1"),
                analysis_id: AnalysisId::new("a1"),
            },
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while node_controller.tracked_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(node_controller.tracked_count(), 0);

        state_control.stop();
        runner.stop_all();
        runner.stop();
        manager.stop();
    }
}
