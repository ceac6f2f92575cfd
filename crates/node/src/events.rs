// SPDX-License-Identifier: MIT

//! The Event Stream: a monotonically-numbered feed of task/machine
//! state changes, with a bounded ring buffer so a reconnecting
//! subscriber can replay from `Last-Event-Id`.
//!
//! Structural port of `webapi.py`'s `StateSSE` (`deque(maxlen=100)`,
//! `cur_id`, one `asyncio.Lock` guarding both), translated from a
//! per-subscriber `asyncio.Queue` set to a `tokio::sync::broadcast`
//! channel — the Rust analogue that doesn't require tracking a `HashSet`
//! of queues by hand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use vmn_core::{Event, EventPayload, TaskId, TaskState};

/// Default ring-buffer size, matching `StateSSE.BACKLOG_SIZE`.
pub const DEFAULT_BACKLOG: usize = 100;

pub struct EventStream {
    next_id: AtomicU64,
    backlog: Mutex<VecDeque<Event>>,
    capacity: usize,
    tx: broadcast::Sender<Event>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self {
            next_id: AtomicU64::new(0),
            backlog: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    pub fn emit_task_state(&self, task_id: TaskId, state: TaskState) -> Event {
        self.emit(EventPayload::TaskState { task_id, state })
    }

    pub fn emit_machine_disabled(&self, machine_name: impl Into<String>, reason: impl Into<String>) -> Event {
        self.emit(EventPayload::MachineDisabled {
            machine_name: machine_name.into(),
            reason: reason.into(),
        })
    }

    /// Append `payload` under one id, bump the backlog, and fan it out
    /// to every live subscriber — all under the same lock, so a
    /// subscriber created via [`Self::events_since`] can never observe a
    /// gap between the backlog snapshot and the first live event it receives.
    fn emit(&self, payload: EventPayload) -> Event {
        let mut backlog = self.backlog.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event { id, payload };
        if backlog.len() == self.capacity {
            backlog.pop_front();
        }
        backlog.push_back(event.clone());
        // No subscribers is not an error: events emitted with nobody
        // listening are still in the backlog for the next subscriber.
        let _ = self.tx.send(event.clone());
        event
    }

    /// Subscribe to live events, plus every backlog event with id greater
    /// than `last_id` (if given) that the ring buffer still retains.
    pub fn events_since(&self, last_id: Option<u64>) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let backlog = self.backlog.lock();
        let rx = self.tx.subscribe();
        let replay = match last_id {
            Some(id) => backlog.iter().filter(|e| e.id > id).cloned().collect(),
            None => Vec::new(),
        };
        (replay, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}
