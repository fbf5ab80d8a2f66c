use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use herald_broker::{BrokerConfig, MemoryBroker};
use herald_core::ChannelRegistry;
use herald_server::ServerConfig;
use herald_settings::{HeraldSettings, LogFormat};
use herald_telemetry::TelemetryConfig;

/// Fan-out server for change notifications over server-sent events.
#[derive(Debug, Parser)]
#[command(name = "herald", version)]
struct Cli {
    /// Settings file (default `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the default log level.
    #[arg(long)]
    log_level: Option<String>,
}

fn load(cli: &Cli) -> anyhow::Result<HeraldSettings> {
    let mut settings = match &cli.config {
        Some(path) => herald_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => herald_settings::load_settings().context("loading settings")?,
    };
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let telemetry = TelemetryConfig::from_levels(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        settings.logging.format == LogFormat::Json,
    );
    let _ = herald_telemetry::init_telemetry(&telemetry);

    let registry =
        Arc::new(ChannelRegistry::new(&settings.channels).context("invalid channel list")?);
    let broker = MemoryBroker::new(BrokerConfig {
        subscriber_buffer: settings.broker.subscriber_buffer,
    });

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        identity_header: settings.server.identity_header.clone(),
        require_identity: settings.server.require_identity,
        shutdown_timeout_secs: settings.server.shutdown_timeout_secs,
    };
    let handle = herald_server::start(config, Arc::new(broker.clone()), Arc::clone(&registry))
        .await
        .context("starting server")?;

    tracing::info!(
        port = handle.port,
        channels = registry.len(),
        "herald ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    broker.shutdown();
    Ok(())
}
