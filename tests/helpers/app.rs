//! Test helpers for running the full gateway on an ephemeral port.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use push_proxy::{
    app::AppBuilder, config::Config, core::DeliveryAdapter, core::PushResponse,
    internal_metrics::Metrics,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

/// Represents a running instance of the application for testing purposes.
pub struct TestApp {
    pub addr: SocketAddr,
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POSTs a raw body to the send endpoint.
    pub async fn post_raw(&self, body: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/v4/send_push"))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("gateway is reachable")
    }

    /// POSTs a notification and decodes the classification.
    pub async fn send_push(&self, body: &serde_json::Value) -> PushResponse {
        let response = self.post_raw(&body.to_string()).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let text = response.text().await.expect("response body");
        serde_json::from_str(&text).expect("response is a push response")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("gateway is reachable")
    }

    /// Shuts down the application and waits for it to terminate.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx.send(true).ok();

        if let Some(handle) = self.app_handle {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}

/// A builder for creating `TestApp` instances with specific configurations.
pub struct TestAppBuilder {
    pub config: Config,
    adapters: Option<Vec<Arc<dyn DeliveryAdapter>>>,
    metrics: Option<(Metrics, Option<PrometheusHandle>)>,
}

impl TestAppBuilder {
    /// Ephemeral port, no throttling, no backends.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.listen_address = "127.0.0.1:0".to_string();
        config.throttle.per_sec = 0;

        Self {
            config,
            adapters: None,
            metrics: None,
        }
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn DeliveryAdapter>>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics = Some((metrics, None));
        self
    }

    pub async fn start(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut builder = AppBuilder::new(self.config);
        if let Some(adapters) = self.adapters {
            builder = builder.adapters_override(adapters);
        }
        if let Some((metrics, prometheus)) = self.metrics {
            builder = builder.metrics_override(metrics, prometheus);
        }

        let app = builder.build(shutdown_rx).await?;
        let addr = app.local_addr();
        let handle = tokio::spawn(app.run());

        Ok(TestApp {
            addr,
            shutdown_tx,
            app_handle: Some(handle),
            client: reqwest::Client::new(),
        })
    }
}
