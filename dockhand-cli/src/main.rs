use anyhow::Result;
use clap::Parser;

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    dockhand_engine::logging::init(cli.verbose);
    handlers::run(cli).await
}
