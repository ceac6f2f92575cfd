// SPDX-License-Identifier: MIT

//! Client-side calls to the rooter: a separate privileged process this
//! node talks to over a unix socket to apply/tear down a task's network
//! route. Blocking, like the rest of the flow runner — the rooter
//! round-trip is one more step in an already-blocking flow thread.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use thiserror::Error;
use vmn_core::RouteDescriptor;
use vmn_wire::{ApplyRouteRequest, DisableRouteRequest, RouteReply};

#[derive(Debug, Error)]
pub enum RooterError {
    #[error("rooter io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rooter returned a malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("rooter rejected the request: {0}")]
    Rejected(String),
}

/// An applied route, carrying the handle needed to later disable it.
#[derive(Debug, Clone)]
pub struct RouteHandle(String);

pub struct RooterClient {
    sock_path: PathBuf,
}

impl RooterClient {
    pub fn new(sock_path: impl AsRef<Path>) -> Self {
        Self {
            sock_path: sock_path.as_ref().to_path_buf(),
        }
    }

    pub fn apply_route(&self, ip: &str, route: &RouteDescriptor) -> Result<RouteHandle, RooterError> {
        let request = ApplyRouteRequest {
            ip: ip.to_string(),
            route_type: route.kind.clone(),
            options: route.options.clone(),
        };
        let reply: RouteReply = self.call(&request)?;
        if !reply.success {
            return Err(RooterError::Rejected(reply.reason.unwrap_or_default()));
        }
        Ok(RouteHandle(reply.handle.unwrap_or_default()))
    }

    pub fn disable_route(&self, handle: &RouteHandle) -> Result<(), RooterError> {
        let request = DisableRouteRequest {
            handle: handle.0.clone(),
        };
        let reply: RouteReply = self.call(&request)?;
        if !reply.success {
            return Err(RooterError::Rejected(reply.reason.unwrap_or_default()));
        }
        Ok(())
    }

    fn call<Req, Rep>(&self, request: &Req) -> Result<Rep, RooterError>
    where
        Req: serde::Serialize,
        Rep: serde::de::DeserializeOwned,
    {
        let mut stream = UnixStream::connect(&self.sock_path)?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response)?;
        Ok(serde_json::from_str(response.trim_end())?)
    }
}
