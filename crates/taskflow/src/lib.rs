// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Task Flow Runner: drives one task from "machine acquired" to
//! "result reported" — start the machine, wait for the guest agent,
//! apply a route, stage and run the payload, then unwind everything on
//! the way out regardless of how far the flow got.

mod agent;
mod flow;
mod rooter;
mod runner;
mod stager;

pub use agent::{Agent, AgentError};
pub use flow::{StandardFlow, TaskFlow};
pub use rooter::{RooterClient, RooterError, RouteHandle};
pub use runner::{default_agent_online_timeout, FlowContext, TaskRunner};
pub use stager::{resolve_stager, GenericStager, Stager, StagerError};
