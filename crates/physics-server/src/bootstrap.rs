use std::sync::Arc;

use anyhow::{Context, Result};
use physics_artifacts::{ArtifactPersister, ArtifactPersisterConfig};
use physics_router::{CapabilityRegistry, DispatcherConfig, ToolDispatcher, ToolRouter};
use physics_session::SessionStore;
use physics_worker::{ExecutableResolver, PythonWorkerLauncher, WorkerClient, WorkerRpc};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Installs the stderr subscriber. stdout carries protocol frames only.
pub fn init_tracing(debug: bool) {
    let default_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Worker client for the configured interpreter and script. Nothing is spawned yet.
pub fn build_worker(cli: &Cli) -> Arc<dyn WorkerRpc> {
    let resolver = ExecutableResolver::for_host(cli.python.clone());
    let mut launcher = PythonWorkerLauncher::new(resolver, cli.worker_script.clone());
    if cli.debug {
        launcher = launcher.with_env("PHYSICS_MCP_DEBUG", "1");
    }
    Arc::new(WorkerClient::new(
        Arc::new(launcher),
        cli.worker_client_config(),
    ))
}

pub fn build_dispatcher(cli: &Cli, worker: Arc<dyn WorkerRpc>) -> Result<ToolDispatcher> {
    let store = SessionStore::open_in(&cli.state_dir).with_context(|| {
        format!(
            "failed to open session store in {}",
            cli.state_dir.display()
        )
    })?;
    let artifacts = ArtifactPersister::new(
        store.clone(),
        ArtifactPersisterConfig {
            strip_inline_payloads: cli.strip_inline_payloads,
        },
    );
    let router = ToolRouter::new(CapabilityRegistry::from_disabled(cli.disabled_tools()));
    ToolDispatcher::new(
        router,
        worker,
        store,
        artifacts,
        DispatcherConfig {
            default_session_id: cli.session_id.clone(),
        },
    )
    .context("failed to prepare default session")
}
