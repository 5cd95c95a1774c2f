//! # Internal Metrics Module
//!
//! Collection of delivery outcome counters and latency histograms.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: installs the Prometheus recorder when metrics are
//!   enabled and returns the handle the gateway renders on `/metrics`.
//!
//! - **`Metrics`**: a lightweight, cloneable handle that the gateway and the
//!   delivery adapters use to record observations. When no recorder is
//!   installed every call is a no-op.

use crate::config::MetricsConfig;
use crate::error::StartupError;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub const SUCCESS_TOTAL: &str = "notifications_success_total";
pub const REMOVAL_TOTAL: &str = "notifications_removal_total";
pub const FAILURE_TOTAL: &str = "notifications_failure_total";
pub const BAD_REQUESTS_TOTAL: &str = "bad_requests_total";
pub const DELIVERY_DURATION: &str = "delivery_duration_seconds";
pub const SERVICE_RESPONSE_DURATION: &str = "service_response_duration_seconds";

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    bad_requests_total: Counter,
    service_response_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!(SUCCESS_TOTAL, Unit::Count, "Notifications accepted by the upstream service, labeled by application type.");
        metrics::describe_counter!(REMOVAL_TOTAL, Unit::Count, "Notifications whose device token was reported permanently invalid, labeled by application type.");
        metrics::describe_counter!(FAILURE_TOTAL, Unit::Count, "Notifications that failed in transport or were rejected upstream, labeled by application type.");
        metrics::describe_counter!(BAD_REQUESTS_TOTAL, Unit::Count, "Requests rejected before delivery: undecodable, missing fields or unknown platform.");
        metrics::describe_histogram!(DELIVERY_DURATION, Unit::Seconds, "Latency of the upstream push call, labeled by backend family.");
        metrics::describe_histogram!(SERVICE_RESPONSE_DURATION, Unit::Seconds, "Total time spent handling a send request.");

        Self {
            bad_requests_total: metrics::counter!(BAD_REQUESTS_TOTAL),
            service_response_duration_seconds: metrics::histogram!(SERVICE_RESPONSE_DURATION),
        }
    }

    pub fn increment_success(&self, app_type: &str) {
        metrics::counter!(SUCCESS_TOTAL, "type" => app_type.to_string()).increment(1);
    }

    pub fn increment_removal(&self, app_type: &str) {
        metrics::counter!(REMOVAL_TOTAL, "type" => app_type.to_string()).increment(1);
    }

    pub fn increment_failure(&self, app_type: &str) {
        metrics::counter!(FAILURE_TOTAL, "type" => app_type.to_string()).increment(1);
    }

    pub fn increment_bad_request(&self) {
        self.bad_requests_total.increment(1);
    }

    /// Records how long one upstream call took for a backend family.
    pub fn observe_delivery(&self, backend: &'static str, seconds: f64) {
        metrics::histogram!(DELIVERY_DURATION, "backend" => backend).record(seconds);
    }

    pub fn observe_service_response(&self, seconds: f64) {
        self.service_response_duration_seconds.record(seconds);
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder if metrics are enabled.
    ///
    /// Returns the `Metrics` handle and, when enabled, the handle used to
    /// render the exposition format.
    pub fn build(self) -> Result<(Metrics, Option<PrometheusHandle>), StartupError> {
        if !self.config.enabled {
            return Ok((Metrics::new(), None));
        }

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| StartupError::Metrics(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| StartupError::Metrics(e.to_string()))?;
        info!("Prometheus recorder installed");

        Ok((Metrics::new(), Some(handle)))
    }
}
