//! A simple in-memory metrics recorder for testing.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, Unit};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static GLOBAL: Lazy<TestMetrics> = Lazy::new(|| {
    let recorder = TestMetrics::new();
    metrics::set_global_recorder(recorder.clone())
        .expect("another recorder is already installed in this test binary");
    recorder
});

/// Installs the recorder process-wide on first use and returns it.
///
/// Must be called before any `Metrics` handle is created, otherwise cached
/// counters stay bound to the no-op recorder.
pub fn global() -> &'static TestMetrics {
    &GLOBAL
}

#[derive(Debug, Clone, Default)]
pub struct TestMetrics {
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

/// Renders a metric key as `name` or `name{label=value,...}`.
fn render_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}{{{}}}", name, labels.join(","))
}

impl TestMetrics {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.get_labeled_counter(name, &[])
    }

    pub fn get_labeled_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&render_key(name, labels))
            .cloned()
            .unwrap_or(0)
    }

    /// Shorthand for the per-application-type delivery counters.
    pub fn for_type(&self, name: &str, app_type: &str) -> u64 {
        self.get_labeled_counter(name, &[("type", app_type)])
    }
}

impl Recorder for TestMetrics {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: metrics::SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: metrics::SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: metrics::SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata) -> Counter {
        let labels: Vec<(&str, &str)> = key.labels().map(|l| (l.key(), l.value())).collect();
        Counter::from_arc(Arc::new(MetricCounter {
            key: render_key(key.name(), &labels),
            counters: self.counters.clone(),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata) -> Histogram {
        Histogram::noop()
    }
}

#[derive(Debug)]
struct MetricCounter {
    key: String,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl metrics::CounterFn for MetricCounter {
    fn increment(&self, value: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        let mut counters = self.counters.lock().unwrap();
        counters.insert(self.key.clone(), value);
    }
}
