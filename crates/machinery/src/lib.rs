// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Machine Pool and Machinery Manager: the subsystem that owns machine
//! state and drives hypervisor/cloud backends through their lifecycle
//! actions on behalf of everything else in the node.

mod backend;
mod backends;
mod manager;
mod pool;
mod queue;
mod work;

pub use backend::MachineryBackend;
pub use backends::libvirt::LibvirtMachinery;
#[cfg(any(test, feature = "test-support"))]
pub use backends::fake::FakeMachinery;
pub use manager::MachineryManager;
pub use pool::MachinePool;
pub use queue::WorkQueue;
pub use work::{ReplyFn, Waiter, WorkItem};
