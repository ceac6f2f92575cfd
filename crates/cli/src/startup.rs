// SPDX-License-Identifier: MIT

//! Wires the four core subsystems together into one running node, and
//! runs them until a shutdown signal arrives. Grounded on
//! `original_source/node/cuckoo/node/startup.py`'s registered shutdown
//! hook ordering: everything else stops before
//! `machinery_manager.shutdown_all()`, which must run LAST so machines
//! started during shutdown still get stopped (spec.md §4.B).

use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use vmn_machinery::{LibvirtMachinery, MachinePool, MachineryManager};
use vmn_node::{EventStream, NodeController, StateController, TaskRunnerControlServer};
use vmn_resultserver::ResultServer;
use vmn_storage::MachineStateDump;
use vmn_taskflow::{default_agent_online_timeout, FlowContext, TaskRunner};

use crate::config::NodeConfig;

/// Raise this process's open-file-descriptor limit to its hard ceiling,
/// matching spec.md §5's "Process model": the Result Server's fd budget
/// is raised so a burst of guest connections can't starve the rest of
/// the node. The source does this per dedicated process; here it's one
/// process, so the limit is raised once at startup for all of it.
fn raise_fd_limit() {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) if hard > soft => {
            if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, hard, hard) {
                tracing::warn!(error = %e, "failed to raise RLIMIT_NOFILE to hard limit");
            } else {
                tracing::info!(soft, hard, "raised RLIMIT_NOFILE to hard limit");
            }
        }
        Ok((soft, hard)) => tracing::debug!(soft, hard, "RLIMIT_NOFILE already at hard limit"),
        Err(e) => tracing::warn!(error = %e, "failed to read RLIMIT_NOFILE"),
    }
}

/// Boot every subsystem from `config` and block until SIGTERM/SIGINT,
/// then unwind in the order spec.md §5/§9 requires.
pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    raise_fd_limit();

    std::fs::create_dir_all(&config.tasks_root)?;
    for sock in [
        &config.sockets.resultserver_control,
        &config.sockets.node_state,
        &config.sockets.taskrunner_control,
    ] {
        if let Some(parent) = sock.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if let Some(parent) = config.sockets.machine_state_dump.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let previous_states = MachineStateDump::load(&config.sockets.machine_state_dump)?;

    let machines: Vec<_> = config
        .machines
        .iter()
        .cloned()
        .map(vmn_core::Machine::from)
        .collect();
    let backend = Arc::new(LibvirtMachinery::new(machines));

    let pool = Arc::new(MachinePool::new());
    let manager = Arc::new(MachineryManager::new(
        Arc::clone(&pool),
        vec![backend],
        &config.tasks_root,
    ));
    manager.load_machineries(&previous_states)?;
    manager.start(config.workers.machinery)?;

    let resultserver = ResultServer::new(&config.tasks_root);
    let listen_addr = std::net::SocketAddr::new(
        config.resultserver.listen_ip,
        config.resultserver.listen_port,
    );
    let _data_plane = resultserver.spawn_data_plane(listen_addr)?;
    let control_listener = bind_unix(&config.sockets.resultserver_control)?;
    let rs_for_control = Arc::clone(&resultserver);
    tokio::spawn(async move {
        if let Err(e) = rs_for_control.run_control_socket(control_listener).await {
            tracing::error!(error = %e, "resultserver control socket exited");
        }
    });

    let flow_ctx = FlowContext {
        tasks_root: config.tasks_root.clone(),
        resultserver: Arc::clone(&resultserver),
        machinery: Arc::clone(&manager),
        rooter_sock_path: config.rooter.as_ref().map(|r| r.socket_path.clone()),
        node_state_sock_path: config.sockets.node_state.clone(),
        agent_online_timeout: default_agent_online_timeout(),
    };
    let task_runner = TaskRunner::new(flow_ctx);
    task_runner.start(config.workers.taskflow)?;

    let events = Arc::new(EventStream::new(config.event_backlog));
    let controller = NodeController::new(
        Arc::clone(&pool),
        Arc::clone(&task_runner),
        &config.tasks_root,
        events,
    );

    let state_controller = StateController::new(
        Arc::clone(&controller),
        &config.sockets.node_state,
        config.zip_results,
    );
    state_controller.start()?;

    let taskrunner_control =
        TaskRunnerControlServer::new(Arc::clone(&controller), Arc::clone(&task_runner));
    let taskrunner_control_listener = bind_unix(&config.sockets.taskrunner_control)?;
    tokio::spawn(async move {
        if let Err(e) = taskrunner_control.run(taskrunner_control_listener).await {
            tracing::error!(error = %e, "task runner control socket exited");
        }
    });

    tracing::info!(machines = pool.count(), "vmnoded ready");
    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown requested, draining");

    // Shutdown order (spec.md §5 "Shutdown is cooperative", §4.B
    // "shutdown_all ... runs LAST"): stop accepting new control-socket
    // work, stop running flows, stop the result server's mappings, and
    // only once everything else has quiesced does the machinery manager
    // tell every backend to stop its machines.
    state_controller.stop();
    task_runner.stop_all();
    task_runner.stop();
    resultserver.stop();

    let failed_to_stop = manager.shutdown_all();
    if !failed_to_stop.is_empty() {
        tracing::warn!(?failed_to_stop, "machines failed to stop at shutdown");
    }
    manager.stop();

    let dump = MachineStateDump {
        states: pool
            .list()
            .into_iter()
            .map(|m| (m.name, m.state))
            .collect(),
    };
    if let Err(e) = dump.save(&config.sockets.machine_state_dump) {
        tracing::warn!(error = %e, "failed to persist machine state dump");
    }

    Ok(())
}

fn bind_unix(path: &Path) -> std::io::Result<tokio::net::UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    tokio::net::UnixListener::bind(path)
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}
