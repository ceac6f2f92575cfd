// SPDX-License-Identifier: MIT

//! `vmnoded`: process entry point for the analysis node. Wires the
//! Machine Pool, Machinery Manager, Result Server, Task Flow Runner and
//! Node Controller together from a config file and runs until a
//! shutdown signal, per spec.md §4.F (an ambient concern this repo's
//! distilled spec scopes out but a complete implementation still needs).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod startup;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::NodeConfig;

#[derive(Parser)]
#[command(name = "vmnoded", version, about = "Malware-analysis worker node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the node and run until SIGTERM/SIGINT.
    Run {
        /// Path to the node's TOML config file.
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },
    /// Parse and validate a config file without starting anything.
    CheckConfig {
        /// Path to the node's TOML config file.
        #[arg(value_name = "PATH")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { config } => {
            let config = NodeConfig::load(&config)
                .with_context(|| format!("config {} is invalid", config.display()))?;
            println!(
                "ok: {} machine(s) configured, result server on {}:{}",
                config.machines.len(),
                config.resultserver.listen_ip,
                config.resultserver.listen_port
            );
            Ok(())
        }
        Command::Run { config } => {
            init_logging();
            let config = NodeConfig::load(&config)
                .with_context(|| format!("config {} is invalid", config.display()))?;
            let rt = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
            rt.block_on(startup::run(config))
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
