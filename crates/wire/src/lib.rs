// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vmn-wire: newline-delimited JSON framing and the message types for
//! every control socket this node exposes or speaks to.

mod framing;
mod machinery;
mod node;
mod resultserver;
mod rooter;
mod taskrunner;

pub use framing::{read_message, write_message, ProtocolError};
pub use machinery::{MachineryAction, MachineryReply, MachineryRequest};
pub use node::NodeStateMessage;
pub use resultserver::{ReplyStatus, ResultServerReply, ResultServerRequest};
pub use rooter::{ApplyRouteRequest, DisableRouteRequest, RouteReply};
pub use taskrunner::{StartTaskArgs, TaskRunnerReply, TaskRunnerRequest};
