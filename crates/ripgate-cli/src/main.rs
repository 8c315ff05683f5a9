//! `ripgate` binary entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use ripgate_cli::{Cli, load_env, logging, serve};
use ripgate_core::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Environment first so RUST_LOG from .env applies to logging.
    load_env(cli.env_file.as_deref())?;
    let _log_guard = logging::init(cli.file_log_dir().map(PathBuf::as_path))?;

    let mut config = GatewayConfig::from_env()?;
    if let Some(path) = cli.probe_rules {
        config.probe_rules_file = Some(path);
    }
    info!(
        http = %config.listen.http_addr(),
        https = %config.listen.https_addr(),
        chat = config.chat.is_configured(),
        codex = config.codex.is_configured(),
        embedding = config.embedding.is_configured(),
        "Starting ripgate"
    );

    serve(config).await
}
