use anyhow::Context;
use clap::Parser;
use riptide_core::app::{self, cli::Cli};
use riptide_core::telemetry::logging;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config).context("logging initialization failed")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    app::run(cli).await.context("riptide session failed")
}
