// SPDX-License-Identifier: MIT

//! Per-IP task mapping table. A guest VM is only allowed to upload
//! results while its IP is mapped to the task running on it; everything
//! else is an `UnmappedIp` rejection before a single byte is read.
//!
//! Alongside each mapping the table tracks the set of in-flight transfer
//! tasks for that IP (`_MappedTask.asynctasks` in the original). Unmapping
//! an IP aborts every transfer still running for it instead of merely
//! forgetting the mapping, so a guest can't keep streaming into a task
//! directory the node has already moved on from.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use vmn_core::{Clock, SystemClock, TaskId, UploadError};

/// A task currently allowed to post results, and the instant it was
/// mapped — screenshots are named by milliseconds elapsed since then.
/// `elapsed_ms` reads the same [`Clock`] the table was built with, not
/// `Instant::now()` directly, so tests can drive it with a `FakeClock`.
#[derive(Clone)]
pub struct TaskMapping {
    pub task_id: TaskId,
    pub ip: Ipv4Addr,
    mapped_at: Instant,
    clock: Arc<dyn Clock>,
}

impl TaskMapping {
    fn new(task_id: TaskId, ip: Ipv4Addr, clock: Arc<dyn Clock>) -> Self {
        Self {
            task_id,
            ip,
            mapped_at: clock.now(),
            clock,
        }
    }

    /// Milliseconds elapsed since this task was mapped, used to name
    /// screenshot uploads (`<ms>.jpg`).
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.now().duration_since(self.mapped_at).as_millis() as u64
    }
}

pub struct TaskMappingTable {
    by_ip: RwLock<HashMap<Ipv4Addr, TaskMapping>>,
    transfers: RwLock<HashMap<Ipv4Addr, Vec<AbortHandle>>>,
    clock: Arc<dyn Clock>,
}

impl Default for TaskMappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMappingTable {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a table driven by a caller-supplied clock, e.g. a
    /// `FakeClock` in tests that assert on `elapsed_ms()`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            by_ip: RwLock::default(),
            transfers: RwLock::default(),
            clock,
        }
    }

    /// Map `ip` to `task_id`. Rejects remapping an IP that is already
    /// mapped, matching the original's refusal to silently overwrite an
    /// existing mapping (a sign of two tasks sharing a machine/IP).
    pub fn map_task_ip(&self, task_id: TaskId, ip: Ipv4Addr) -> Result<(), UploadError> {
        let mut table = self.by_ip.write();
        if let Some(existing) = table.get(&ip) {
            return Err(UploadError::IllegalPath(format!(
                "ip {ip} is already mapped to task {}",
                existing.task_id
            )));
        }
        table.insert(ip, TaskMapping::new(task_id, ip, Arc::clone(&self.clock)));
        Ok(())
    }

    /// Register `handle` as an in-flight transfer for `ip`, so it gets
    /// aborted if the ip is unmapped before the transfer finishes. Prunes
    /// already-finished handles while it's here, so the set can't grow
    /// without bound across a long-lived mapping with many transfers.
    pub fn register_transfer(&self, ip: Ipv4Addr, handle: AbortHandle) {
        let mut transfers = self.transfers.write();
        let entry = transfers.entry(ip).or_default();
        entry.retain(|h| !h.is_finished());
        entry.push(handle);
    }

    /// Unmap `ip` and abort every transfer still running for it.
    /// Idempotent — unmapping an IP that isn't mapped is a no-op.
    pub fn unmap_ip(&self, ip: Ipv4Addr) {
        self.by_ip.write().remove(&ip);
        if let Some(handles) = self.transfers.write().remove(&ip) {
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Unmap every IP and abort every in-flight transfer, e.g. at
    /// result-server shutdown.
    pub fn cancel_all(&self) {
        self.by_ip.write().clear();
        for (_, handles) in self.transfers.write().drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }

    pub fn get(&self, ip: Ipv4Addr) -> Result<TaskMapping, UploadError> {
        self.by_ip
            .read()
            .get(&ip)
            .cloned()
            .ok_or_else(|| UploadError::UnmappedIp(ip.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_ip.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
