//! Physics MCP server: CLI, bootstrap, and the stdio JSON-RPC loop.

pub mod bootstrap;
pub mod cli;
pub mod mcp;

use std::sync::Arc;

use anyhow::Result;

pub use bootstrap::{build_dispatcher, build_worker, init_tracing};
pub use cli::Cli;
pub use mcp::{McpServeReport, McpServer};

/// Serves MCP on stdin/stdout until EOF or Ctrl-C.
pub async fn run(cli: Cli) -> Result<()> {
    let worker = build_worker(&cli);
    let dispatcher = Arc::new(build_dispatcher(&cli, worker)?);
    tracing::info!(
        state_dir = %cli.state_dir.display(),
        worker_script = %cli.worker_script.display(),
        session_id = dispatcher.default_session_id(),
        "physics mcp server ready"
    );

    let server = McpServer::new(dispatcher.clone());
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let interrupted = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        report = server.serve(stdin, stdout) => {
            let report = report?;
            tracing::info!(
                processed_frames = report.processed_frames,
                error_count = report.error_count,
                "stdin closed; server stopped"
            );
        }
        _ = interrupted => {
            tracing::info!("interrupted; shutting worker down");
            dispatcher.shutdown().await;
        }
    }
    Ok(())
}
