// SPDX-License-Identifier: MIT

//! Node state-controller one-way messages:
//! `{subject: "taskrundone"|"taskrunfailed", task_id, analysis_id}`.

use serde::{Deserialize, Serialize};
use vmn_core::{AnalysisId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum NodeStateMessage {
    Taskrundone {
        task_id: TaskId,
        analysis_id: AnalysisId,
    },
    Taskrunfailed {
        task_id: TaskId,
        analysis_id: AnalysisId,
    },
}

impl NodeStateMessage {
    pub fn task_id(&self) -> &TaskId {
        match self {
            NodeStateMessage::Taskrundone { task_id, .. }
            | NodeStateMessage::Taskrunfailed { task_id, .. } => task_id,
        }
    }

    pub fn analysis_id(&self) -> &AnalysisId {
        match self {
            NodeStateMessage::Taskrundone { analysis_id, .. }
            | NodeStateMessage::Taskrunfailed { analysis_id, .. } => analysis_id,
        }
    }
}
