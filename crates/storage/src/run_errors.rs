// SPDX-License-Identifier: MIT

//! `run_errors.json`: the optional error container written next to a
//! task's other output when its flow accumulated any errors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vmn_core::ErrorTracker;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunErrors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    #[serde(default)]
    pub non_fatal: Vec<String>,
}

impl From<&ErrorTracker> for RunErrors {
    fn from(tracker: &ErrorTracker) -> Self {
        Self {
            fatal: tracker.fatal().map(str::to_owned),
            non_fatal: tracker.non_fatal().to_vec(),
        }
    }
}

impl RunErrors {
    pub fn is_empty(&self) -> bool {
        self.fatal.is_none() && self.non_fatal.is_empty()
    }

    /// Write the container to `path`, but only if there is anything to report.
    pub fn write_if_nonempty(&self, path: &Path) -> std::io::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let data = serde_json::to_vec_pretty(self).unwrap_or_default();
        std::fs::write(path, data)
    }
}
