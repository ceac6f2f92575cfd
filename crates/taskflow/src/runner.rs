// SPDX-License-Identifier: MIT

//! `FlowRunner`: a small fixed pool of `std::thread`s (default 2,
//! matching the original's `NUM_TASK_START_WORKER`-adjacent
//! `_FlowRunner` thread-per-flow model) that pull jobs off an `mpsc`
//! queue and drive one task's `StandardFlow` end to end, plus
//! `TaskRunner`, the control-socket-facing handle the Node Controller
//! submits work through.
//!
//! Structural port of `taskrunner.py`'s `_FlowRunner.run`/`run_steps`
//! and `TaskRunner`'s enable/disable/flow-count bookkeeping.

use std::collections::HashMap;
use std::io::Write;
use std::net::Ipv4Addr;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vmn_core::{Clock, ErrorTracker, Machine, SystemClock, Task, TaskId};
use vmn_machinery::MachineryManager;
use vmn_resultserver::ResultServer;
use vmn_storage::{RunErrors, TaskPaths};
use vmn_wire::NodeStateMessage;

use crate::agent::Agent;
use crate::flow::{StandardFlow, TaskFlow};
use crate::rooter::RooterClient;

const DEFAULT_NUM_WORKERS: usize = 2;
const IDLE_POLL: Duration = Duration::from_secs(1);
const AGENT_ONLINE_TIMEOUT: Duration = Duration::from_secs(120);
const CALL_AT_INTERVAL_WAIT: Duration = Duration::from_secs(1);

/// Everything a flow needs beyond the task/machine pair itself — shared
/// across every job a `FlowRunner` processes.
pub struct FlowContext {
    pub tasks_root: PathBuf,
    pub resultserver: Arc<ResultServer>,
    pub machinery: Arc<MachineryManager>,
    pub rooter_sock_path: Option<PathBuf>,
    pub node_state_sock_path: PathBuf,
    /// How long to wait for the guest agent to come online after the
    /// machine reports started. Defaults to 120s in production
    /// (`default_agent_online_timeout`); tests shorten this so an
    /// unreachable fake agent fails fast instead of hanging.
    pub agent_online_timeout: Duration,
}

/// The production default for [`FlowContext::agent_online_timeout`].
pub fn default_agent_online_timeout() -> Duration {
    AGENT_ONLINE_TIMEOUT
}

struct StandardFlowJob {
    task: Task,
    machine: Machine,
    do_run: Arc<AtomicBool>,
}

struct Shared {
    ctx: FlowContext,
    job_rx: Mutex<Receiver<StandardFlowJob>>,
    job_tx: Sender<StandardFlowJob>,
    active: Mutex<HashMap<TaskId, Arc<AtomicBool>>>,
    enabled: AtomicBool,
    do_run: AtomicBool,
    clock: Arc<dyn Clock>,
}

/// The Task Flow Runner: accepts `starttask`/`stopall`/`enable`/
/// `disable`/`getflowcount` requests (see `vmn_wire::TaskRunnerRequest`)
/// and drives each accepted task through a `StandardFlow` on its own
/// worker thread.
pub struct TaskRunner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunner {
    pub fn new(ctx: FlowContext) -> Arc<Self> {
        Self::with_clock(ctx, Arc::new(SystemClock))
    }

    /// Build a runner driven by a caller-supplied clock, e.g. a
    /// `FakeClock` in tests that need to force a flow's interval loop
    /// past its timeout without a real wall-clock wait.
    pub fn with_clock(ctx: FlowContext, clock: Arc<dyn Clock>) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::channel();
        Arc::new(Self {
            shared: Arc::new(Shared {
                ctx,
                job_rx: Mutex::new(job_rx),
                job_tx,
                active: Mutex::new(HashMap::new()),
                enabled: AtomicBool::new(true),
                do_run: AtomicBool::new(true),
                clock,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>, num_workers: usize) -> std::io::Result<()> {
        let n = if num_workers == 0 { DEFAULT_NUM_WORKERS } else { num_workers };
        let mut workers = self.workers.lock().unwrap();
        for idx in 0..n {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("taskflow-worker-{idx}"))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }
        Ok(())
    }

    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn flow_count(&self) -> usize {
        self.shared.active.lock().unwrap().len()
    }

    /// Submit a task/machine pair for execution. Returns an error
    /// synchronously if the runner is disabled or the task is already
    /// tracked; otherwise the flow runs asynchronously on a worker
    /// thread and reports its outcome via the node state socket.
    pub fn submit(&self, task: Task, machine: Machine) -> Result<(), String> {
        if !self.is_enabled() {
            return Err("task runner is disabled".to_string());
        }
        let task_id = task.task_id.clone();
        let do_run = Arc::new(AtomicBool::new(true));
        {
            let mut active = self.shared.active.lock().unwrap();
            if active.contains_key(&task_id) {
                return Err(format!("task {task_id} is already running"));
            }
            active.insert(task_id.clone(), Arc::clone(&do_run));
        }
        self.shared
            .job_tx
            .send(StandardFlowJob { task, machine, do_run })
            .map_err(|_| "task runner is shutting down".to_string())?;
        Ok(())
    }

    /// Signal every currently running flow to stop at its next
    /// interval-loop check; does not forcibly kill any thread.
    pub fn stop_all(&self) {
        for do_run in self.shared.active.lock().unwrap().values() {
            do_run.store(false, Ordering::SeqCst);
        }
    }

    /// Stop accepting new work and join every worker thread.
    pub fn stop(&self) {
        self.shared.do_run.store(false, Ordering::SeqCst);
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while shared.do_run.load(Ordering::SeqCst) {
        let job = {
            let rx = shared.job_rx.lock().unwrap();
            rx.recv_timeout(IDLE_POLL)
        };
        let Ok(job) = job else { continue };
        let task_id = job.task.task_id.clone();
        run_flow(&shared.ctx, job, &shared.clock);
        shared.active.lock().unwrap().remove(&task_id);
    }
}

/// The full step sequence of a standard flow: map the task's IP at the
/// Result Server, start the machine, wait for the agent, apply a route
/// if requested, hand off to the stager, run until timeout, then
/// unwind everything regardless of how far it got — matching
/// `_FlowRunner.run`'s try/finally structure exactly.
fn run_flow(ctx: &FlowContext, job: StandardFlowJob, clock: &Arc<dyn Clock>) {
    let StandardFlowJob { task, machine, do_run } = job;
    let mut tracker = ErrorTracker::new();
    let paths = TaskPaths::new(&ctx.tasks_root, &task.task_id);

    if let Err(e) = paths.ensure_dirs() {
        tracker.record_fatal(format!("failed to create task directories: {e}"));
    }
    if let Ok(data) = serde_json::to_vec_pretty(&machine) {
        let _ = std::fs::write(paths.machine_json(), data);
    }

    let agent = Agent::with_clock(&machine.ip, machine.agent_port, Arc::clone(clock));
    let mut flow = StandardFlow::new(machine.clone(), task.clone(), agent, Arc::clone(&ctx.machinery));

    let mut route_handle = None;
    let mut mapped = false;

    if tracker.fatal().is_none() {
        match machine.ip.parse::<Ipv4Addr>() {
            Ok(ip) => match ctx.resultserver.mapping().map_task_ip(task.task_id.clone(), ip) {
                Ok(()) => mapped = true,
                Err(e) => tracker.record_fatal(format!("result server rejected mapping: {e}")),
            },
            Err(e) => tracker.record_fatal(format!("invalid machine ip {:?}: {e}", machine.ip)),
        }
    }

    if tracker.fatal().is_none() {
        if let Err(e) = flow.initialize() {
            tracker.record_fatal(e.to_string());
        }
    }

    if tracker.fatal().is_none() {
        if let Err(e) = flow.start_machine() {
            tracker.record_fatal(e.to_string());
        }
    }

    if tracker.fatal().is_none() {
        let agent_for_wait = Agent::with_clock(&machine.ip, machine.agent_port, Arc::clone(clock));
        if let Err(e) = agent_for_wait.wait_online(ctx.agent_online_timeout) {
            tracker.record_fatal(format!("guest agent never came online: {e}"));
        }
    }

    if tracker.fatal().is_none() {
        if let Some(route) = &task.route {
            if let Some(sock_path) = &ctx.rooter_sock_path {
                let rooter = RooterClient::new(sock_path);
                match rooter.apply_route(&machine.ip, route) {
                    Ok(handle) => route_handle = Some((rooter, handle)),
                    Err(e) => tracker.record_fatal(format!("route request failed: {e}")),
                }
            } else {
                tracker.record_fatal("task requested a route but no rooter is configured");
            }
        }
    }

    if tracker.fatal().is_none() {
        if let Err(e) = flow.machine_online() {
            tracker.record_fatal(e.to_string());
        }
    }

    if tracker.fatal().is_none() {
        run_until_timeout(&mut flow, &do_run, task.timeout_secs, clock);
    }

    // Unwind: stop the machine, unmap the ip, disable the route — every
    // step runs regardless of whether an earlier one failed, and every
    // failure here is non-fatal (the task's outcome was already decided
    // above; these are best-effort cleanup).
    if let Err(e) = flow.stop_machine() {
        tracker.record(format!("failed to stop machine during cleanup: {e}"));
    }
    if mapped {
        if let Ok(ip) = machine.ip.parse::<Ipv4Addr>() {
            ctx.resultserver.mapping().unmap_ip(ip);
        }
    }
    if let Some((rooter, handle)) = route_handle {
        if let Err(e) = rooter.disable_route(&handle) {
            tracker.record(format!("failed to disable route during cleanup: {e}"));
        }
    }

    let run_errors = RunErrors::from(&tracker);
    let _ = run_errors.write_if_nonempty(&paths.run_errors_json());

    let message = if tracker.is_fatal() {
        NodeStateMessage::Taskrunfailed {
            task_id: task.task_id.clone(),
            analysis_id: task.analysis_id.clone(),
        }
    } else {
        NodeStateMessage::Taskrundone {
            task_id: task.task_id.clone(),
            analysis_id: task.analysis_id.clone(),
        }
    };
    if let Err(e) = notify_node_state(&ctx.node_state_sock_path, &message) {
        tracing::error!(task_id = %task.task_id, error = %e, "failed to notify node state controller");
    }
}

fn run_until_timeout(
    flow: &mut dyn TaskFlow,
    do_run: &AtomicBool,
    timeout_secs: u64,
    clock: &Arc<dyn Clock>,
) {
    let start = clock.now();
    loop {
        if !do_run.load(Ordering::SeqCst) {
            return;
        }
        if clock.now().saturating_duration_since(start) >= Duration::from_secs(timeout_secs) {
            return;
        }
        flow.call_at_interval();
        std::thread::sleep(CALL_AT_INTERVAL_WAIT);
    }
}

fn notify_node_state(sock_path: &Path, message: &NodeStateMessage) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(sock_path)?;
    let mut line = serde_json::to_string(message).unwrap_or_default();
    line.push('\n');
    stream.write_all(line.as_bytes())
}
