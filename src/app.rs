//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::DeliveryAdapter,
    error::StartupError,
    gateway::{self, GatewayState},
    internal_metrics::{Metrics, MetricsBuilder},
    registry::BackendRegistry,
    task_manager::TaskManager,
    throttle::Throttle,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, instrument};

/// How long in-flight requests may run after shutdown begins.
pub const WAIT_FOR_SERVER_SHUTDOWN: Duration = Duration::from_secs(5);

/// A handle to the running gateway.
pub struct App {
    task_manager: TaskManager,
    local_addr: SocketAddr,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the gateway actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the shutdown signal, then gives in-flight requests the grace
    /// period before closing everything.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Stopping Server...");

        self.task_manager.shutdown(WAIT_FOR_SERVER_SHUTDOWN).await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Keeps construction separate from running, and lets tests swap in their
/// own adapters or metrics handle.
pub struct AppBuilder {
    config: Config,
    adapters_override: Option<Vec<Arc<dyn DeliveryAdapter>>>,
    metrics_override: Option<(Metrics, Option<PrometheusHandle>)>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            adapters_override: None,
            metrics_override: None,
        }
    }

    /// Registers these ready-made adapters instead of building them from the
    /// configured backend settings.
    pub fn adapters_override(mut self, adapters: Vec<Arc<dyn DeliveryAdapter>>) -> Self {
        self.adapters_override = Some(adapters);
        self
    }

    /// Uses this metrics handle instead of installing a recorder.
    pub fn metrics_override(mut self, metrics: Metrics, prometheus: Option<PrometheusHandle>) -> Self {
        self.metrics_override = Some((metrics, prometheus));
        self
    }

    /// Initializes the backends, binds the listener and starts serving.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App, StartupError> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Metrics
        // =========================================================================
        let (metrics, prometheus) = match self.metrics_override {
            Some(m) => m,
            None => MetricsBuilder::new(config.metrics.clone()).build()?,
        };

        // =========================================================================
        // 2. Backend registry
        // =========================================================================
        let registry = match self.adapters_override {
            Some(adapters) => BackendRegistry::with_adapters(adapters, metrics.clone()),
            None => BackendRegistry::from_settings(
                &config.apple_push_settings,
                &config.android_push_settings,
                metrics.clone(),
            ),
        };
        if registry.is_empty() {
            error!("No push backends initialized, every send will be rejected");
        }
        let registry = Arc::new(registry);

        // =========================================================================
        // 3. Router and listener
        // =========================================================================
        let throttle = Arc::new(Throttle::new(config.throttle.clone()));
        let state = GatewayState {
            registry,
            metrics,
            prometheus,
        };
        let router = gateway::router(state, throttle);

        let address = normalize_listen_address(&config.listen_address);
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| StartupError::ListenAddress(config.listen_address.clone()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StartupError::bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| StartupError::bind(addr, e))?;

        let mut server_shutdown_rx = task_manager.get_shutdown_rx();
        task_manager.spawn("GatewayServer", async move {
            let shutdown = async move {
                if !*server_shutdown_rx.borrow() {
                    server_shutdown_rx.changed().await.ok();
                }
            };
            let result = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await;
            if let Err(e) = result {
                error!("Gateway server error: {}", e);
            }
        });

        info!("Server is listening on {}", local_addr);

        Ok(App {
            task_manager,
            local_addr,
        })
    }
}

/// Accepts the `:port` shorthand for all interfaces.
fn normalize_listen_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}
