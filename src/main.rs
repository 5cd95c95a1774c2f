//! Push Proxy - push notification gateway.

use anyhow::Result;
use clap::Parser;
use push_proxy::{app::App, cli::Cli, config::Config, error::StartupError};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("{}", StartupError::from(err));
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Push proxy starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Listen Address: {}", config.listen_address);
    info!("Metrics: {}", if config.metrics.enabled { "Enabled" } else { "Disabled" });
    if config.throttle.per_sec > 0 {
        info!(
            "Throttle: {}/s, vary by remote addr: {}, vary by headers: {:?}",
            config.throttle.per_sec,
            config.throttle.vary_by_remote_addr,
            config.throttle.vary_by_headers
        );
    } else {
        info!("Throttle: Disabled");
    }
    for settings in &config.apple_push_settings {
        info!("Apple Backend: {}", settings.app_type);
    }
    for settings in &config.android_push_settings {
        info!("Android Backend: {}", settings.app_type);
    }
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
