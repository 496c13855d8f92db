//! NetHub binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nethub_core::config::{ConfigLoader, NetHubConfig};
use nethub_core::logging;
use nethub_core::modules::metrics::{MetricsExporter, MetricsRegistry, SystemSampler};
use nethub_core::modules::server::{
    shutdown_all, CommandService, ConnectionListener, ConnectionRegistry, MessageService,
    ServerMetrics, TransportKind,
};
use nethub_core::modules::tls::{CertificateStatus, TlsContextProvider};

/// Concurrent plaintext/TLS connection server with a JSON metrics endpoint.
#[derive(Debug, Parser)]
#[command(name = "nethub", version, about)]
struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "nethub.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::with_default_validators()
        .load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    logging::init(&config.logging).context("installing log subscriber")?;
    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "NetHub starting");

    run(config).await
}

async fn run(config: NetHubConfig) -> Result<()> {
    let registry = Arc::new(MetricsRegistry::with_max_series(
        config.metrics.max_series_per_metric,
    ));
    let metrics = ServerMetrics::register(Arc::clone(&registry))
        .context("registering server metrics")?;
    let connections = Arc::new(ConnectionRegistry::new(metrics));
    let service: Arc<dyn MessageService> = Arc::new(CommandService::new(&config.server.name));

    let acceptor = match config.tls.as_ref().filter(|_| config.uses_tls()) {
        Some(tls) => {
            let provider = TlsContextProvider::new(tls.clone());
            match provider.ensure_certificate()? {
                CertificateStatus::Generated => {
                    info!(dir = %tls.cert_dir.display(), "Generated self-signed certificate");
                }
                CertificateStatus::Existing => {
                    info!(dir = %tls.cert_dir.display(), "Using existing certificate");
                }
            }
            Some(provider.acceptor()?)
        }
        None => None,
    };

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        let mut listener = ConnectionListener::new(
            listener_config.clone(),
            config.connection.clone(),
            Arc::clone(&connections),
            Arc::clone(&service),
        );
        if listener_config.transport == TransportKind::Tls {
            if let Some(acceptor) = &acceptor {
                listener = listener.with_tls(acceptor.clone());
            }
        }

        listener
            .start()
            .await
            .with_context(|| format!("starting listener '{}'", listener_config.name))?;
        listeners.push(listener);
    }

    let mut exporter = MetricsExporter::new(config.metrics.clone(), Arc::clone(&registry));
    exporter.start().await.context("starting metrics endpoint")?;

    let sampler_stop = CancellationToken::new();
    let sampler = if config.metrics.system {
        let sampler = SystemSampler::register(Arc::clone(&registry))
            .context("registering system metrics")?;
        Some(sampler.spawn(config.metrics.system_interval, sampler_stop.clone()))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    for (name, e) in
        shutdown_all(&mut listeners, &connections, config.server.drain_timeout).await
    {
        if e.is_soft() {
            warn!(name = %name, error = %e, "Listener shutdown incomplete");
        } else {
            error!(name = %name, error = %e, "Listener shutdown failed");
        }
    }

    sampler_stop.cancel();
    if let Some(task) = sampler {
        if let Err(e) = task.await {
            warn!(error = %e, "System sampler ended abnormally");
        }
    }

    if exporter.is_running() {
        exporter.stop().await?;
    }

    info!(
        total = listeners.iter().map(|l| l.stats().total_accepted).sum::<u64>(),
        "NetHub stopped"
    );
    Ok(())
}
