// SPDX-License-Identifier: MIT

//! The Result Server process: a single-threaded cooperative TCP data
//! plane (one `tokio::task::LocalSet` on a dedicated `current_thread`
//! runtime, so a slow/hostile upload can only ever starve its own
//! connection's poll turn, never another OS thread) plus a unix control
//! socket for `add`/`remove` mapping requests from the Task Flow Runner.
//!
//! Structural port of `resultserver.py`'s `_AsyncResultServer`/
//! `ResultServer`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::task::LocalSet;
use vmn_core::TaskId;
use vmn_storage::TaskPaths;
use vmn_wire::{read_message, write_message, ResultServerReply, ResultServerRequest};

use crate::mapping::TaskMappingTable;
use crate::protocol::{handle_file_upload, handle_screenshot_upload, read_protocol_header, Protocol};

pub struct ResultServer {
    mapping: Arc<TaskMappingTable>,
    tasks_root: PathBuf,
}

impl ResultServer {
    pub fn new(tasks_root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            mapping: Arc::new(TaskMappingTable::new()),
            tasks_root: tasks_root.into(),
        })
    }

    pub fn mapping(&self) -> &Arc<TaskMappingTable> {
        &self.mapping
    }

    /// Spawn the TCP data plane on its own OS thread, inside a
    /// single-threaded `LocalSet`. Returns immediately; the listener
    /// runs until the thread is dropped or the process exits.
    pub fn spawn_data_plane(self: &Arc<Self>, listen_addr: SocketAddr) -> std::io::Result<std::thread::JoinHandle<()>> {
        let server = Arc::clone(self);
        std::thread::Builder::new()
            .name("resultserver-data".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build resultserver data-plane runtime");
                        return;
                    }
                };
                let local = LocalSet::new();
                local.block_on(&rt, async move {
                    if let Err(e) = server.run_data_plane(listen_addr).await {
                        tracing::error!(error = %e, "resultserver data plane exited");
                    }
                });
            })
    }

    async fn run_data_plane(self: Arc<Self>, listen_addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(listen_addr).await?;
        tracing::info!(%listen_addr, "resultserver data plane listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            let join = tokio::task::spawn_local(async move {
                server.handle_connection(stream, peer).await;
            });
            // Track the handler so unmapping peer's ip can cancel it
            // mid-transfer instead of letting it keep writing to a task
            // directory the node has already moved on from.
            if let std::net::IpAddr::V4(ip) = peer.ip() {
                self.mapping.register_transfer(ip, join.abort_handle());
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let ip = match peer.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => {
                tracing::warn!(%peer, "rejecting ipv6 peer, result server is ipv4-only");
                return;
            }
        };

        let mapping = match self.mapping.get(ip) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(%ip, error = %e, "failed to store new task result");
                return;
            }
        };

        let mut reader = BufReader::new(stream);
        let protocol = match read_protocol_header(&mut reader).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(task_id = %mapping.task_id, error = %e, "upload cancelled during protocol negotiation");
                return;
            }
        };

        let paths = TaskPaths::new(&self.tasks_root, &mapping.task_id);
        let result = match protocol {
            Protocol::File => handle_file_upload(&paths, &mut reader).await,
            Protocol::Screenshot => {
                handle_screenshot_upload(&paths, mapping.elapsed_ms(), &mut reader).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(task_id = %mapping.task_id, ?protocol, error = %e, "result upload cancelled");
        }
    }

    /// Serve `add`/`remove` requests on an already-bound unix listener.
    /// Runs until the listener errors or the caller's runtime is
    /// dropped; callers typically `tokio::spawn` this.
    pub async fn run_control_socket(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_control_connection(stream).await;
            });
        }
    }

    async fn handle_control_connection(&self, stream: tokio::net::UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let request: Option<ResultServerRequest> = match read_message(&mut reader).await {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "resultserver control connection closed");
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

    fn handle_request(&self, request: ResultServerRequest) -> ResultServerReply {
        match request {
            ResultServerRequest::Add { ip, task_id } => self.handle_add(&ip, task_id),
            ResultServerRequest::Remove { ip } => self.handle_remove(&ip),
        }
    }

    fn handle_add(&self, ip: &str, task_id: TaskId) -> ResultServerReply {
        let ip: Ipv4Addr = match ip.parse() {
            Ok(ip) => ip,
            Err(_) => return ResultServerReply::fail("invalid ip"),
        };
        match self.mapping.map_task_ip(task_id, ip) {
            Ok(()) => ResultServerReply::ok(),
            Err(e) => ResultServerReply::fail(e.to_string()),
        }
    }

    fn handle_remove(&self, ip: &str) -> ResultServerReply {
        let ip: Ipv4Addr = match ip.parse() {
            Ok(ip) => ip,
            Err(_) => return ResultServerReply::fail("invalid ip"),
        };
        self.mapping.unmap_ip(ip);
        ResultServerReply::ok()
    }

    /// Stop accepting new results and drop every mapping, matching
    /// `ResultServer.stop`'s `untrack_all`/`cancel_all` shutdown order.
    pub fn stop(&self) {
        self.mapping.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_add_with_invalid_ip_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let server = ResultServer::new(tmp.path());
        let reply = server.handle_add("not-an-ip", TaskId::new("t1"));
        assert_eq!(reply.status, vmn_wire::ReplyStatus::Fail);
    }

    #[test]
    fn handle_add_then_remove_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let server = ResultServer::new(tmp.path());
        let add = server.handle_add("10.0.0.5", TaskId::new("t1"));
        assert_eq!(add.status, vmn_wire::ReplyStatus::Ok);
        assert_eq!(server.mapping().len(), 1);

        let remove = server.handle_remove("10.0.0.5");
        assert_eq!(remove.status, vmn_wire::ReplyStatus::Ok);
        assert!(server.mapping().is_empty());
    }

    #[test]
    fn duplicate_add_for_same_ip_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let server = ResultServer::new(tmp.path());
        server.handle_add("10.0.0.5", TaskId::new("t1"));
        let second = server.handle_add("10.0.0.5", TaskId::new("t2"));
        assert_eq!(second.status, vmn_wire::ReplyStatus::Fail);
    }
}
