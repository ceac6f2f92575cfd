// SPDX-License-Identifier: MIT

//! Result Server control-socket messages: `{action: "add"|"remove", ip, task_id}`.

use serde::{Deserialize, Serialize};
use vmn_core::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResultServerRequest {
    Add { ip: String, task_id: TaskId },
    Remove { ip: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultServerReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Fail,
}

impl ResultServerReply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Fail,
            reason: Some(reason.into()),
        }
    }
}
