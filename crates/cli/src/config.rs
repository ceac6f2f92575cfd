// SPDX-License-Identifier: MIT

//! `NodeConfig`: the on-disk configuration this node boots from. Covers
//! exactly the fields spec.md §6 "Configuration" names — backend list,
//! result-server listen address/port, worker counts, route table
//! ranges, rooter binary/socket path — plus the `[[machine]]` tables a
//! backend needs to populate the Pool at startup. Schema validation
//! beyond "are the required fields present and well-formed" is out of
//! scope (spec.md §1 scopes backend-specific config validation out).

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use vmn_core::{Machine, MachineName, MachineState};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Root directory under which every task gets its own subdirectory
    /// (spec.md §6 "Persisted layout").
    pub tasks_root: PathBuf,

    pub resultserver: ResultServerConfig,

    #[serde(default)]
    pub sockets: SocketsConfig,

    #[serde(default)]
    pub workers: WorkerCounts,

    /// `[[machine]]` tables. Every entry's `machinery` must currently be
    /// `"libvirt"` — this node ships one concrete backend (spec.md §1
    /// scopes real backend implementations out of core; see DESIGN.md).
    #[serde(rename = "machine", default)]
    pub machines: Vec<MachineConfig>,

    #[serde(default)]
    pub rooter: Option<RooterConfig>,

    /// Route ranges the Rooter is expected to serve. The node does not
    /// itself enforce these — the Rooter is an external collaborator
    /// (spec.md §1) — but they're carried here so `check-config` can
    /// catch an obviously malformed entry before a task ever requests a
    /// route.
    #[serde(default)]
    pub route_ranges: Vec<String>,

    /// Whether the Node State Controller zips a task's result directory
    /// before marking it done (spec.md §4.E "remote nodes").
    #[serde(default)]
    pub zip_results: bool,

    #[serde(default = "default_event_backlog")]
    pub event_backlog: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultServerConfig {
    pub listen_ip: IpAddr,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketsConfig {
    pub resultserver_control: PathBuf,
    pub node_state: PathBuf,
    pub taskrunner_control: PathBuf,
    pub machine_state_dump: PathBuf,
}

impl Default for SocketsConfig {
    fn default() -> Self {
        Self {
            resultserver_control: PathBuf::from("/run/vmnoded/resultserver.sock"),
            node_state: PathBuf::from("/run/vmnoded/node_state.sock"),
            taskrunner_control: PathBuf::from("/run/vmnoded/taskrunner.sock"),
            machine_state_dump: PathBuf::from("/var/lib/vmnoded/machine_states.json"),
        }
    }
}

/// Worker-pool sizes. `0` means "use the subsystem's built-in default"
/// (4 machinery workers, 2 task-flow workers, per spec.md §4.B/§4.D).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct WorkerCounts {
    pub machinery: usize,
    pub taskflow: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    pub machinery: String,
    pub label: String,
    pub ip: String,
    pub agent_port: u16,
    pub platform: String,
    pub os_version: String,
    pub arch: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl From<MachineConfig> for Machine {
    fn from(c: MachineConfig) -> Self {
        Machine {
            name: MachineName::new(c.name),
            machinery: c.machinery,
            label: c.label,
            ip: c.ip,
            agent_port: c.agent_port,
            platform: c.platform,
            os_version: c.os_version,
            arch: c.arch,
            mac_address: c.mac_address,
            snapshot: c.snapshot,
            interface: c.interface,
            tags: c.tags,
            state: MachineState::Poweroff,
            locked_by: None,
            disabled: false,
            disabled_reason: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RooterConfig {
    /// Path to the Rooter's own unix control socket (spec.md §9
    /// "Rooter wire contract" / `vmn_taskflow::RooterClient`).
    pub socket_path: PathBuf,
    /// Path to the Rooter binary, for an operator to supervise
    /// separately. Not invoked by this node (the Rooter is an external
    /// collaborator, per spec.md §1).
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
}

fn default_event_backlog() -> usize {
    vmn_node::DEFAULT_BACKLOG
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NodeConfig = toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resultserver.listen_port == 0 {
            return Err(ConfigError::Invalid(
                "resultserver.listen_port must be nonzero".to_string(),
            ));
        }
        if self.machines.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[machine]] must be configured".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for machine in &self.machines {
            if machine.machinery != "libvirt" {
                return Err(ConfigError::Invalid(format!(
                    "machine {:?}: unsupported machinery backend {:?} (only \"libvirt\" is built in)",
                    machine.name, machine.machinery
                )));
            }
            if !seen.insert(machine.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate machine name {:?}",
                    machine.name
                )));
            }
        }
        for range in &self.route_ranges {
            if range.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "route_ranges entries must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
