//! Wiring from configuration to running listeners.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ripgate_core::GatewayConfig;
use ripgate_proxy::{AppState, ProbeTable, create_router};
use ripgate_runtime::{FileCertificateSource, ListenerOrchestrator, termination_signal};

/// Run the gateway until a termination signal or a listener failure.
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let probes = ProbeTable::load(config.probe_rules_file.as_deref())?;

    let certs = Arc::new(
        FileCertificateSource::load(&config.listen.cert_file, &config.listen.key_file)
            .context("No usable TLS certificate")?,
    );
    let _watcher = certs.watch()?;

    let state = AppState::from_config(&config, probes)?;
    let gateway = ListenerOrchestrator::new(create_router(state), config.listen.clone(), certs)
        .start()
        .await?;

    tokio::select! {
        () = termination_signal() => {}
        () = gateway.stopped() => {}
    }

    info!("Stopping gateway");
    gateway.shutdown();
    gateway.wait().await?;
    Ok(())
}
