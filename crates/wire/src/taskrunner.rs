// SPDX-License-Identifier: MIT

//! Task Runner control-socket messages:
//! `{action: "starttask"|"stopall"|"enable"|"disable"|"getflowcount", args?}`
//! -> `{success, reason?}` or `{count}`.

use serde::{Deserialize, Serialize};
use vmn_core::{AnalysisId, MachineName, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTaskArgs {
    pub task_id: TaskId,
    pub analysis_id: AnalysisId,
    pub machine: MachineName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskRunnerRequest {
    StartTask { args: StartTaskArgs },
    StopAll,
    Enable,
    Disable,
    GetFlowCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRunnerReply {
    Outcome {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Count {
        count: usize,
    },
}

impl TaskRunnerReply {
    pub fn success() -> Self {
        TaskRunnerReply::Outcome {
            success: true,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        TaskRunnerReply::Outcome {
            success: false,
            reason: Some(reason.into()),
        }
    }

    pub fn count(n: usize) -> Self {
        TaskRunnerReply::Count { count: n }
    }
}
