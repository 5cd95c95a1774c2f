//! Backend registry and dispatcher.
//!
//! The registry maps an application type to its initialized delivery
//! adapter. It is built once before the gateway starts serving and is never
//! mutated afterwards, so lookups need no locking.

use crate::adapters::{AndroidAdapter, AppleAdapter};
use crate::config::{AndroidPushSettings, ApplePushSettings};
use crate::core::{DeliveryAdapter, PushNotification, PushResponse, PLATFORM_ANDROID};
use crate::error::PushError;
use crate::internal_metrics::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct BackendRegistry {
    adapters: HashMap<String, Arc<dyn DeliveryAdapter>>,
    metrics: Metrics,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.adapters.keys().collect();
        types.sort();
        f.debug_struct("BackendRegistry").field("types", &types).finish()
    }
}

impl BackendRegistry {
    /// Builds adapters from configuration: Apple entries first, then Android,
    /// each in configuration order.
    ///
    /// Entries whose `initialize` fails are skipped and stay unroutable.
    pub fn from_settings(
        apple: &[ApplePushSettings],
        android: &[AndroidPushSettings],
        metrics: Metrics,
    ) -> Self {
        info!("Push proxy server is initializing...");

        let apple_adapters = apple
            .iter()
            .map(|s| Box::new(AppleAdapter::new(s.clone(), metrics.clone())) as Box<dyn DeliveryAdapter>);
        let android_adapters = android
            .iter()
            .map(|s| Box::new(AndroidAdapter::new(s.clone(), metrics.clone())) as Box<dyn DeliveryAdapter>);

        Self::initialize_all(apple_adapters.chain(android_adapters), metrics.clone())
    }

    /// Initializes each adapter in turn and registers those that succeed.
    pub fn initialize_all<I>(adapters: I, metrics: Metrics) -> Self
    where
        I: IntoIterator<Item = Box<dyn DeliveryAdapter>>,
    {
        let mut registry = Self {
            adapters: HashMap::new(),
            metrics,
        };

        for mut adapter in adapters {
            if adapter.initialize() {
                registry.insert(Arc::from(adapter));
            } else {
                error!(
                    app_type = adapter.app_type(),
                    backend = adapter.kind(),
                    "Backend failed to initialize, requests for this type will be rejected"
                );
            }
        }

        registry
    }

    /// Registers adapters that are already usable, without initializing them.
    pub fn with_adapters<I>(adapters: I, metrics: Metrics) -> Self
    where
        I: IntoIterator<Item = Arc<dyn DeliveryAdapter>>,
    {
        let mut registry = Self {
            adapters: HashMap::new(),
            metrics,
        };
        for adapter in adapters {
            registry.insert(adapter);
        }
        registry
    }

    fn insert(&mut self, adapter: Arc<dyn DeliveryAdapter>) {
        let app_type = adapter.app_type().to_string();
        info!(app_type = %app_type, backend = adapter.kind(), "Registered backend");
        if self.adapters.insert(app_type.clone(), adapter).is_some() {
            warn!(app_type = %app_type, "Duplicate backend type, the later entry wins");
        }
    }

    pub fn get(&self, app_type: &str) -> Option<&Arc<dyn DeliveryAdapter>> {
        self.adapters.get(app_type)
    }

    pub fn contains(&self, app_type: &str) -> bool {
        self.adapters.contains_key(app_type)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Routes a validated notification to the adapter for its platform.
    ///
    /// An unknown platform is a bad request, not a delivery failure.
    pub async fn dispatch(&self, msg: &PushNotification) -> PushResponse {
        match self.adapters.get(&msg.platform) {
            Some(adapter) => adapter.send_notification(msg).await,
            None => {
                let err = PushError::UnroutablePlatform {
                    platform: msg.platform.clone(),
                    server_id: msg.server_id.clone(),
                };
                error!("{}", err);
                self.metrics.increment_bad_request();
                PushResponse::from(err)
            }
        }
    }
}

/// A colon in the device id marks an Android registration id, whatever
/// platform the client claimed.
pub fn derive_platform(msg: &mut PushNotification) {
    if msg.device_id.contains(':') {
        msg.platform = PLATFORM_ANDROID.to_string();
    }
}
