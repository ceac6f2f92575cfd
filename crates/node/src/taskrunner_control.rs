// SPDX-License-Identifier: MIT

//! The Task Runner control socket: `starttask`/`stopall`/`enable`/
//! `disable`/`getflowcount` (`vmn_wire::TaskRunnerRequest`). Lives in
//! this crate rather than `vmn-taskflow` because `starttask` needs to go
//! through [`NodeController::add_work`] for machine acquisition and
//! tracking — `vmn-taskflow` has no dependency on the Machine Pool's
//! acquisition policy, only on a machine it is handed.
//!
//! In the original multi-process topology the node process and the task
//! runner process are separate and talk over exactly this socket; here
//! they are one process (see DESIGN.md), so `NodeController::add_work`
//! already drives the in-process `TaskRunner` directly and this socket
//! exists for external administrative control and protocol parity.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::UnixListener;
use vmn_core::MachineName;
use vmn_taskflow::TaskRunner;
use vmn_wire::{read_message, write_message, TaskRunnerReply, TaskRunnerRequest};

use crate::controller::NodeController;

pub struct TaskRunnerControlServer {
    controller: Arc<NodeController>,
    task_runner: Arc<TaskRunner>,
}

impl TaskRunnerControlServer {
    pub fn new(controller: Arc<NodeController>, task_runner: Arc<TaskRunner>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            task_runner,
        })
    }

    /// Serve requests on an already-bound unix listener until it errors
    /// or the caller's runtime is dropped. Callers typically
    /// `tokio::spawn` this.
    pub async fn run(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream).await;
            });
        }
    }

    /// Bind `sock_path` and serve on it, per [`Self::run`].
    pub async fn bind_and_run(self: Arc<Self>, sock_path: &std::path::Path) -> std::io::Result<()> {
        if sock_path.exists() {
            std::fs::remove_file(sock_path)?;
        }
        let listener = UnixListener::bind(sock_path)?;
        self.run(listener).await
    }

    async fn handle_connection(&self, stream: tokio::net::UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let request: Option<TaskRunnerRequest> = match read_message(&mut reader).await {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "task runner control connection closed");
                    return;
                }
            };
            let Some(request) = request else {
                return;
            };

            let reply = self.handle_request(request);
            if write_message(&mut write_half, &reply).await.is_err() {
                return;
            }
        }
    }

    fn handle_request(&self, request: TaskRunnerRequest) -> TaskRunnerReply {
        match request {
            TaskRunnerRequest::StartTask { args } => {
                match self
                    .controller
                    .add_work(args.task_id, MachineName::new(args.machine.as_str()))
                {
                    Ok(()) => TaskRunnerReply::success(),
                    Err(e) => TaskRunnerReply::failure(e.to_string()),
                }
            }
            TaskRunnerRequest::StopAll => {
                self.task_runner.stop_all();
                TaskRunnerReply::success()
            }
            TaskRunnerRequest::Enable => {
                self.task_runner.enable();
                TaskRunnerReply::success()
            }
            TaskRunnerRequest::Disable => {
                self.task_runner.disable();
                TaskRunnerReply::success()
            }
            TaskRunnerRequest::GetFlowCount => TaskRunnerReply::count(self.task_runner.flow_count()),
        }
    }
}
