// SPDX-License-Identifier: MIT

//! Client for the guest agent: a small HTTP-speaking program the stager
//! talks to once the machine is reachable, for a liveness probe and for
//! pushing/running the sample. Blocking, not async — the flow runner
//! that drives this is itself a `std::thread`, not a tokio task (see
//! `runner.rs`).
//!
//! Request shaping follows the same raw-HTTP-over-socket idiom as the
//! teacher's coop HTTP client, swapped from a unix socket onto the plain
//! TCP connection a guest agent listens on.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use vmn_core::{Clock, SystemClock, Task};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent at {0} is unreachable: {1}")]
    Unreachable(String, std::io::Error),
    #[error("agent at {0} did not respond within {1}s")]
    Timeout(String, u64),
    #[error("agent responded with an unexpected status: {0}")]
    BadResponse(String),
    #[error("invalid agent address {0:?}")]
    InvalidAddress(String),
}

/// Client for a single guest agent at `ip:agent_port`.
pub struct Agent {
    addr: String,
    clock: Arc<dyn Clock>,
}

impl Agent {
    pub fn new(ip: &str, port: u16) -> Self {
        Self::with_clock(ip, port, Arc::new(SystemClock))
    }

    /// Build an agent client driven by a caller-supplied clock, e.g. a
    /// `FakeClock` in tests asserting on `wait_online`'s timeout.
    pub fn with_clock(ip: &str, port: u16, clock: Arc<dyn Clock>) -> Self {
        Self {
            addr: format!("{ip}:{port}"),
            clock,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr, AgentError> {
        self.addr
            .parse()
            .map_err(|_| AgentError::InvalidAddress(self.addr.clone()))
    }

    /// Simple TCP reachability probe: a successful connect is enough, no
    /// payload is exchanged.
    pub fn is_reachable(&self) -> bool {
        match self.socket_addr() {
            Ok(addr) => TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok(),
            Err(_) => false,
        }
    }

    /// Poll [`is_reachable`](Self::is_reachable) until it succeeds or
    /// `timeout` elapses.
    pub fn wait_online(&self, timeout: Duration) -> Result<(), AgentError> {
        let start = self.clock.now();
        loop {
            if self.is_reachable() {
                return Ok(());
            }
            if self.clock.now().saturating_duration_since(start) >= timeout {
                return Err(AgentError::Timeout(self.addr.clone(), timeout.as_secs()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn request(&self, method: &str, path: &str, body: &[u8]) -> Result<String, AgentError> {
        let addr = self.socket_addr()?;
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| AgentError::Unreachable(self.addr.clone(), e))?;
        stream.set_read_timeout(Some(IO_TIMEOUT)).ok();
        stream.set_write_timeout(Some(IO_TIMEOUT)).ok();

        let head = format!(
            "{method} {path} HTTP/1.1\r\nHost: agent\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream
            .write_all(head.as_bytes())
            .map_err(|e| AgentError::Unreachable(self.addr.clone(), e))?;
        if !body.is_empty() {
            stream
                .write_all(body)
                .map_err(|e| AgentError::Unreachable(self.addr.clone(), e))?;
        }

        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .map_err(|e| AgentError::Unreachable(self.addr.clone(), e))?;

        let status_line = response.lines().next().unwrap_or_default();
        if !status_line.contains("200") {
            return Err(AgentError::BadResponse(status_line.to_string()));
        }
        Ok(response)
    }

    /// A cheap liveness check beyond the bare TCP connect, used by
    /// `Stager::prepare` before pushing anything.
    pub fn ping(&self) -> Result<(), AgentError> {
        self.request("GET", "/status", &[]).map(|_| ())
    }

    /// Push and execute the task's sample on the guest.
    pub fn execute(&self, task: &Task) -> Result<(), AgentError> {
        let body = serde_json::json!({ "task_id": task.task_id.as_str() }).to_string();
        self.request("POST", "/analysis", body.as_bytes()).map(|_| ())
    }
}
