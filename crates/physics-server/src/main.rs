use anyhow::Result;
use clap::Parser;
use physics_server::{init_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    run(cli).await
}
