//! Firebase Cloud Messaging (FCM) adapter for Android devices.

use crate::adapters::{classify_rejection, settle};
use crate::config::AndroidPushSettings;
use crate::core::{DeliveryAdapter, PushNotification, PushResponse};
use crate::error::{CredentialError, PushError};
use crate::formatting::expand_emoji;
use crate::internal_metrics::Metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const BACKEND: &str = "android";
const NOTIFICATION_ICON: &str = "ic_launcher";

/// A message for the FCM HTTP API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FcmMessage {
    pub registration_ids: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
}

/// The FCM answer to a send.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FcmReply {
    #[serde(default)]
    pub multicast_id: Option<i64>,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub results: Vec<FcmResult>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FcmResult {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The upstream FCM client.
#[async_trait]
pub trait FcmTransport: Send + Sync {
    async fn send(&self, message: &FcmMessage) -> Result<FcmReply, PushError>;
}

/// `FcmTransport` posting to the FCM HTTP endpoint with a server key.
pub struct FcmHttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl FcmHttpTransport {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl FcmTransport for FcmHttpTransport {
    async fn send(&self, message: &FcmMessage) -> Result<FcmReply, PushError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.api_key))
            .json(message)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Transport(format!("status {status}: {body}")));
        }

        response
            .json::<FcmReply>()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))
    }
}

/// Delivery adapter for one Android application type.
pub struct AndroidAdapter {
    settings: AndroidPushSettings,
    transport: Option<Arc<dyn FcmTransport>>,
    metrics: Metrics,
}

impl AndroidAdapter {
    pub fn new(settings: AndroidPushSettings, metrics: Metrics) -> Self {
        Self {
            settings,
            transport: None,
            metrics,
        }
    }

    pub fn with_transport(
        settings: AndroidPushSettings,
        transport: Arc<dyn FcmTransport>,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings,
            transport: Some(transport),
            metrics,
        }
    }

    /// Translates the canonical notification into an FCM message.
    pub fn build_message(&self, msg: &PushNotification) -> FcmMessage {
        let mut data = Map::new();
        data.insert("type".to_string(), json!(msg.effective_kind()));
        data.insert("badge".to_string(), json!(msg.badge));

        let (fields, notification) = if msg.is_clear() {
            let fields = vec![
                ("channel_id", &msg.channel_id),
                ("team_id", &msg.team_id),
                ("sender_id", &msg.sender_id),
                ("override_username", &msg.override_username),
                ("override_icon_url", &msg.override_icon_url),
                ("from_webhook", &msg.from_webhook),
            ];
            (fields, None)
        } else {
            let text = expand_emoji(&msg.message);
            if !text.is_empty() {
                data.insert("message".to_string(), json!(text));
            }
            let fields = vec![
                ("channel_id", &msg.channel_id),
                ("channel_name", &msg.channel_name),
                ("team_id", &msg.team_id),
                ("post_id", &msg.post_id),
                ("root_id", &msg.root_id),
                ("sender_id", &msg.sender_id),
                ("category", &msg.category),
                ("override_username", &msg.override_username),
                ("override_icon_url", &msg.override_icon_url),
                ("from_webhook", &msg.from_webhook),
                ("promo_id", &msg.promo_id),
                ("news_id", &msg.news_id),
                ("push_type", &msg.push_type),
            ];
            let notification = FcmNotification {
                title: text.clone(),
                body: text,
                icon: NOTIFICATION_ICON.to_string(),
            };
            (fields, Some(notification))
        };

        for (key, value) in fields {
            if !value.is_empty() {
                data.insert(key.to_string(), json!(value));
            }
        }

        FcmMessage {
            registration_ids: vec![msg.device_id.clone()],
            data,
            notification,
        }
    }

    async fn deliver(&self, transport: &dyn FcmTransport, message: &FcmMessage) -> Result<(), PushError> {
        let reply = transport.send(message).await?;
        if reply.failure == 0 {
            return Ok(());
        }

        let reason = reply
            .results
            .first()
            .and_then(|r| r.error.clone())
            .unwrap_or_default();
        info!(
            multicast_id = ?reply.multicast_id,
            reason = %reason,
            app_type = %self.settings.app_type,
            "Android response failure"
        );
        Err(classify_rejection(&reason, 200, &self.settings.remove_reasons))
    }
}

#[async_trait]
impl DeliveryAdapter for AndroidAdapter {
    fn initialize(&mut self) -> bool {
        info!(app_type = %self.settings.app_type, "Initializing android notification server");

        if self.settings.android_api_key.is_empty() {
            error!(
                app_type = %self.settings.app_type,
                "Android push notifications not configured, missing android_api_key"
            );
            return false;
        }

        match FcmHttpTransport::new(&self.settings.fcm_endpoint, &self.settings.android_api_key) {
            Ok(transport) => {
                self.transport = Some(Arc::new(transport));
                true
            }
            Err(e) => {
                error!(app_type = %self.settings.app_type, error = %e, "Failed to create FCM client");
                false
            }
        }
    }

    async fn send_notification(&self, msg: &PushNotification) -> PushResponse {
        let message = self.build_message(msg);
        let started = Instant::now();

        let outcome = match &self.transport {
            Some(transport) => {
                info!(app_type = %self.settings.app_type, "Sending android push notification");
                self.deliver(transport.as_ref(), &message).await
            }
            None => Ok(()),
        };

        settle(
            BACKEND,
            &self.settings.app_type,
            &msg.device_id,
            started,
            outcome,
            &self.metrics,
        )
    }

    fn kind(&self) -> &'static str {
        BACKEND
    }

    fn app_type(&self) -> &str {
        &self.settings.app_type
    }
}
