// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vmn-node: the Node Controller. Accepts work, tracks which machine a
//! task holds, fans out lifecycle events to subscribers, and retires
//! tasks on notification from the Task Flow Runner.

pub mod controller;
pub mod events;
pub mod state_control;
pub mod taskrunner_control;
pub mod tracker;
pub mod zip;

pub use controller::NodeController;
pub use events::{EventStream, DEFAULT_BACKLOG};
pub use state_control::StateController;
pub use taskrunner_control::TaskRunnerControlServer;
pub use tracker::TaskTracker;
pub use zip::zip_task_results;
