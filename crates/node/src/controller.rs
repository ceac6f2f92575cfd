// SPDX-License-Identifier: MIT

//! `NodeController`: the façade that accepts work, acquires a machine,
//! hands the task to the Task Flow Runner, and retires it exactly once
//! on a terminal event. Structural port of `node.py`'s `Node`/
//! `_TasksTracker`, minus the worker-thread intake queue — `add_work`
//! here acquires synchronously and submits directly to the in-process
//! [`vmn_taskflow::TaskRunner`], since rejecting immediately when no
//! machine is available is exactly what the spec requires (`add_work`
//! must never block waiting for one).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vmn_core::{MachineName, NodeError, Task, TaskId, TaskState};
use vmn_machinery::MachinePool;
use vmn_storage::TaskPaths;
use vmn_taskflow::TaskRunner;

use crate::events::EventStream;
use crate::tracker::TaskTracker;

pub struct NodeController {
    pool: Arc<MachinePool>,
    task_runner: Arc<TaskRunner>,
    tasks_root: PathBuf,
    tracker: TaskTracker,
    events: Arc<EventStream>,
}

impl NodeController {
    pub fn new(
        pool: Arc<MachinePool>,
        task_runner: Arc<TaskRunner>,
        tasks_root: impl Into<PathBuf>,
        events: Arc<EventStream>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            task_runner,
            tasks_root: tasks_root.into(),
            tracker: TaskTracker::new(),
            events,
        })
    }

    pub fn events(&self) -> &Arc<EventStream> {
        &self.events
    }

    fn load_task(&self, task_id: &TaskId) -> Result<Task, NodeError> {
        let path = TaskPaths::new(&self.tasks_root, task_id).task_json();
        let data = std::fs::read(&path)
            .map_err(|e| NodeError::InvalidTask(task_id.to_string(), e.to_string()))?;
        serde_json::from_slice(&data)
            .map_err(|e| NodeError::InvalidTask(task_id.to_string(), e.to_string()))
    }

    /// Acquire `machine_name` for `task_id` and hand it to the Task Flow
    /// Runner. Rejects immediately (never blocks) if the task's
    /// descriptor is missing/invalid, the machine is unavailable, or the
    /// task id is already tracked.
    pub fn add_work(&self, task_id: TaskId, machine_name: MachineName) -> Result<(), NodeError> {
        let task = self.load_task(&task_id)?;

        let machine = self
            .pool
            .acquire_available(&task_id, &machine_name)
            .ok_or_else(|| NodeError::MachineNotAvailable(machine_name.to_string()))?;

        if let Err(e) = self.tracker.track(task_id.clone(), machine_name.clone()) {
            self.pool.release(&machine_name);
            return Err(e);
        }

        self.events
            .emit_task_state(task_id.clone(), TaskState::Running);

        if let Err(reason) = self.task_runner.submit(task, machine) {
            // Submission itself failed (runner disabled, duplicate in
            // the runner's own tracking) — this task never started, so
            // unwind exactly as if it had failed immediately.
            self.tracker.untrack(&task_id);
            self.pool.release(&machine_name);
            self.events.emit_task_state(task_id.clone(), TaskState::Failed);
            return Err(NodeError::TaskFlow(reason));
        }

        Ok(())
    }

    /// Mark `task_id` FAILED: release its machine and emit the terminal
    /// event. A no-op (beyond logging) if the task id isn't tracked —
    /// matches the original's `TaskWorkError` on an unknown id, downgraded
    /// here to a logged warning since a late/duplicate notification must
    /// never panic the state controller.
    pub fn set_task_failed(&self, task_id: &TaskId) {
        self.finish(task_id, TaskState::Failed);
    }

    pub fn set_task_success(&self, task_id: &TaskId) {
        self.finish(task_id, TaskState::Done);
    }

    fn finish(&self, task_id: &TaskId, state: TaskState) {
        match self.tracker.untrack(task_id) {
            Some(machine_name) => self.pool.release(&machine_name),
            None => {
                tracing::warn!(task_id = %task_id, "cannot mark end for unknown task");
                return;
            }
        }
        self.events.emit_task_state(task_id.clone(), state);
    }

    /// Emit a `machine_disabled` event. Called by whatever observes a
    /// machine transition to `disabled` (the Machinery Manager does not
    /// itself hold a reference to the event stream).
    pub fn mark_machine_disabled(&self, machine_name: &str, reason: &str) {
        self.events.emit_machine_disabled(machine_name, reason);
    }

    pub fn tasks_root(&self) -> &Path {
        &self.tasks_root
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::net::SocketAddr;
    use std::time::Duration;
    use vmn_core::{AnalysisId, Machine, MachineState, MachineryError};
    use vmn_machinery::{MachineryBackend, MachineryManager};
    use vmn_resultserver::ResultServer;
    use vmn_taskflow::FlowContext;

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

    fn write_task(tasks_root: &Path, task_id: &str) {
        let paths = TaskPaths::new(tasks_root, &TaskId::new(task_id));
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

    fn setup() -> (Arc<NodeController>, Arc<MachineryManager>, Arc<TaskRunner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(MachinePool::new());
        pool.add(sample_machine());
        let manager = Arc::new(MachineryManager::new(
            Arc::clone(&pool),
            vec![Arc::new(InstantBackend)],
            dir.path().to_path_buf(),
        ));
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
        let controller = NodeController::new(Arc::clone(&pool), Arc::clone(&runner), dir.path(), events);
        (controller, manager, runner, dir)
    }

    #[test]
    fn add_work_rejects_unknown_machine() {
        let (controller, manager, runner, dir) = setup();
        write_task(dir.path(), "t1");
        let err = controller
            .add_work(TaskId::new("t1"), MachineName::new("nope"))
            .unwrap_err();
        assert!(matches!(err, NodeError::MachineNotAvailable(_)));
        runner.stop();
        manager.stop();
    }

    #[test]
    fn add_work_rejects_missing_task_descriptor() {
        let (controller, manager, runner, _dir) = setup();
        let err = controller
            .add_work(TaskId::new("ghost"), MachineName::new("vm1"))
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidTask(_, _)));
        runner.stop();
        manager.stop();
    }

    #[test]
    fn successful_add_work_emits_running_then_terminal_event_and_releases_machine() {
        let (controller, manager, runner, dir) = setup();
        write_task(dir.path(), "t1");

        controller
            .add_work(TaskId::new("t1"), MachineName::new("vm1"))
            .unwrap();

        let started = std::time::Instant::now();
        while controller.tracked_count() > 0 && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(controller.tracked_count(), 0);

        // Machine was released: a second task can now acquire it.
        write_task(dir.path(), "t2");
        controller
            .add_work(TaskId::new("t2"), MachineName::new("vm1"))
            .unwrap();

        runner.stop_all();
        runner.stop();
        manager.stop();
    }

    #[test]
    fn set_task_failed_for_untracked_task_does_not_panic() {
        let (controller, manager, runner, _dir) = setup();
        controller.set_task_failed(&TaskId::new("never-tracked"));
        runner.stop();
        manager.stop();
    }
}
