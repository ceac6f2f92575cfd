// SPDX-License-Identifier: MIT

//! Machine-state dump file, written at shutdown and read at startup so
//! a restarted node knows each machine's last known state before the
//! Machinery Manager has talked to any backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use vmn_core::{MachineName, MachineState};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MachineStateDump {
    pub states: HashMap<MachineName, MachineState>,
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid dump file: {0}")]
    Json(#[from] serde_json::Error),
}

impl MachineStateDump {
    pub fn load(path: &Path) -> Result<Self, DumpError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DumpError> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn previous_state(&self, machine: &MachineName) -> Option<MachineState> {
        self.states.get(machine).copied()
    }
}
