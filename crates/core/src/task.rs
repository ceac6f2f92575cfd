// SPDX-License-Identifier: MIT

//! Task descriptor as loaded from its JSON input and the fields a flow
//! accumulates while running it.

use crate::id::{AnalysisId, MachineName, TaskId};
use serde::{Deserialize, Serialize};

/// A network route a task's flow should apply before bringing the guest online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// A single analysis task as loaded from `task.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub analysis_id: AnalysisId,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteDescriptor>,
    pub platform: String,
    pub arch: String,
    /// How long the flow lets the guest run before stopping it, in seconds.
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_machine: Option<MachineName>,
}

fn default_kind() -> String {
    "standard".to_string()
}

impl Task {
    pub fn is_standard(&self) -> bool {
        self.kind == "standard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_kind_to_standard_when_absent() {
        let json = r#"{
            "task_id": "t1",
            "analysis_id": "a1",
            "platform": "windows",
            "arch": "amd64",
            "timeout_secs": 60
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.is_standard());
        assert!(task.route.is_none());
    }
}
