// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vmn-core: shared domain types for the analysis node — machines, tasks,
//! events, the error taxonomy, and the clock/id abstractions the rest of
//! the node is built on.

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod log;
pub mod machine;
pub mod task;
pub mod tracker;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{MachineryError, NodeError, RequestError, TaskFlowError, UploadError};
pub use event::{Event, EventPayload, TaskState};
pub use id::{AnalysisId, MachineName, TaskId};
pub use log::{machine_span, task_span};
pub use machine::{Machine, MachineState};
pub use task::{RouteDescriptor, Task};
pub use tracker::ErrorTracker;
