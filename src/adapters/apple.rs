//! Apple Push Notification service (APNs) adapter.

use crate::adapters::{classify_rejection, find_credential_file, settle};
use crate::config::ApplePushSettings;
use crate::core::{DeliveryAdapter, PushNotification, PushResponse};
use crate::error::{CredentialError, PushError};
use crate::formatting::expand_emoji;
use crate::internal_metrics::Metrics;
use a2::request::payload::Payload;
use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, Endpoint, NotificationBuilder,
    NotificationOptions,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const BACKEND: &str = "apple";

/// An APNs request, already translated from the canonical notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApnsNotification {
    pub device_token: String,
    pub topic: Option<String>,
    pub alert: Option<String>,
    pub badge: u32,
    pub sound: Option<String>,
    pub category: Option<String>,
    /// Root-level custom keys next to `aps`.
    pub custom: BTreeMap<String, String>,
}

impl ApnsNotification {
    /// The a2 payload sent to APNs for this request.
    pub fn apns_payload(&self) -> Result<Payload<'_>, PushError> {
        let mut builder = DefaultNotificationBuilder::new().set_badge(self.badge);
        if let Some(alert) = &self.alert {
            builder = builder.set_body(alert);
        }
        if let Some(sound) = &self.sound {
            builder = builder.set_sound(sound);
        }
        if let Some(category) = &self.category {
            builder = builder.set_category(category);
        }

        let options = NotificationOptions {
            apns_topic: self.topic.as_deref(),
            ..Default::default()
        };
        let mut payload = builder.build(&self.device_token, options);
        for (key, value) in &self.custom {
            payload
                .add_custom_data(key, value)
                .map_err(|e| PushError::Transport(e.to_string()))?;
        }
        Ok(payload)
    }
}

/// What APNs answered for a single push.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApnsReply {
    pub status: u16,
    pub apns_id: Option<String>,
    pub reason: Option<String>,
}

impl ApnsReply {
    pub fn sent(&self) -> bool {
        self.status == 200
    }
}

/// The upstream APNs client.
///
/// `Err` means the request never produced an APNs answer; a rejection is an
/// `Ok` reply carrying a non-200 status and a reason.
#[async_trait]
pub trait ApnsTransport: Send + Sync {
    async fn push(&self, notification: &ApnsNotification) -> Result<ApnsReply, PushError>;
}

/// `ApnsTransport` backed by the `a2` HTTP/2 client.
pub struct A2Transport {
    client: Client,
}

impl A2Transport {
    /// Builds a client from the certificate or auth key named in `settings`.
    pub fn from_settings(settings: &ApplePushSettings) -> Result<Self, CredentialError> {
        let endpoint = if settings.apple_push_use_development {
            Endpoint::Sandbox
        } else {
            Endpoint::Production
        };
        let config = ClientConfig::new(endpoint);

        let client = if !settings.apple_push_cert_private.is_empty() {
            let mut file = open_credential(&settings.apple_push_cert_private)?;
            Client::certificate(&mut file, &settings.apple_push_cert_password, config)?
        } else if !settings.apple_push_key.is_empty() {
            if settings.apple_key_id.is_empty() {
                return Err(CredentialError::Missing("apple_key_id"));
            }
            if settings.apple_team_id.is_empty() {
                return Err(CredentialError::Missing("apple_team_id"));
            }
            let mut file = open_credential(&settings.apple_push_key)?;
            Client::token(
                &mut file,
                settings.apple_key_id.as_str(),
                settings.apple_team_id.as_str(),
                config,
            )?
        } else {
            return Err(CredentialError::Missing("apple_push_cert_private or apple_push_key"));
        };

        Ok(Self { client })
    }
}

fn open_credential(name: &str) -> Result<File, CredentialError> {
    let path = find_credential_file(name);
    File::open(&path).map_err(|source| CredentialError::Open {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl ApnsTransport for A2Transport {
    async fn push(&self, notification: &ApnsNotification) -> Result<ApnsReply, PushError> {
        let payload = notification.apns_payload()?;

        match self.client.send(payload).await {
            Ok(response) => Ok(ApnsReply {
                status: response.code,
                apns_id: response.apns_id,
                reason: response.error.map(|body| format!("{:?}", body.reason)),
            }),
            Err(a2::Error::ResponseError(response)) => Ok(ApnsReply {
                status: response.code,
                apns_id: response.apns_id,
                reason: response.error.map(|body| format!("{:?}", body.reason)),
            }),
            Err(e) => Err(PushError::Transport(e.to_string())),
        }
    }
}

/// Delivery adapter for one Apple application type.
pub struct AppleAdapter {
    settings: ApplePushSettings,
    transport: Option<Arc<dyn ApnsTransport>>,
    metrics: Metrics,
}

impl AppleAdapter {
    pub fn new(settings: ApplePushSettings, metrics: Metrics) -> Self {
        Self {
            settings,
            transport: None,
            metrics,
        }
    }

    /// Creates an adapter that is already connected through `transport`.
    pub fn with_transport(
        settings: ApplePushSettings,
        transport: Arc<dyn ApnsTransport>,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings,
            transport: Some(transport),
            metrics,
        }
    }

    /// Translates the canonical notification into an APNs request.
    pub fn build_notification(&self, msg: &PushNotification) -> ApnsNotification {
        let mut notification = ApnsNotification {
            device_token: msg.device_id.clone(),
            topic: Some(self.settings.apple_push_topic.clone()).filter(|t| !t.is_empty()),
            badge: msg.badge.max(0) as u32,
            ..Default::default()
        };

        if !msg.is_clear() {
            notification.alert = Some(expand_emoji(&msg.message));
            notification.category = Some(msg.category.clone()).filter(|c| !c.is_empty());
            notification.sound = Some("default".to_string());
        }

        let custom = &mut notification.custom;
        custom.insert("type".to_string(), msg.effective_kind().to_string());
        let optional = [
            ("channel_id", &msg.channel_id),
            ("team_id", &msg.team_id),
            ("channel_name", &msg.channel_name),
            ("sender_id", &msg.sender_id),
            ("post_id", &msg.post_id),
            ("root_id", &msg.root_id),
            ("news_id", &msg.news_id),
            ("push_type", &msg.push_type),
            ("override_username", &msg.override_username),
            ("override_icon_url", &msg.override_icon_url),
            ("from_webhook", &msg.from_webhook),
            ("promo_id", &msg.promo_id),
        ];
        for (key, value) in optional {
            if !value.is_empty() {
                custom.insert(key.to_string(), value.clone());
            }
        }

        notification
    }

    async fn deliver(
        &self,
        transport: &dyn ApnsTransport,
        notification: &ApnsNotification,
    ) -> Result<(), PushError> {
        let reply = transport.push(notification).await?;
        if reply.sent() {
            return Ok(());
        }

        let reason = reply.reason.unwrap_or_default();
        info!(
            apns_id = ?reply.apns_id,
            reason = %reason,
            code = reply.status,
            app_type = %self.settings.app_type,
            "Apple push was not sent"
        );
        Err(classify_rejection(&reason, reply.status, &self.settings.remove_reasons))
    }
}

#[async_trait]
impl DeliveryAdapter for AppleAdapter {
    fn initialize(&mut self) -> bool {
        info!(app_type = %self.settings.app_type, "Initializing apple notification server");

        match A2Transport::from_settings(&self.settings) {
            Ok(transport) => {
                self.transport = Some(Arc::new(transport));
                true
            }
            Err(e) => {
                error!(app_type = %self.settings.app_type, error = %e, "Apple push notifications not configured");
                false
            }
        }
    }

    async fn send_notification(&self, msg: &PushNotification) -> PushResponse {
        let notification = self.build_notification(msg);
        let started = Instant::now();

        let outcome = match &self.transport {
            Some(transport) => {
                info!(app_type = %self.settings.app_type, "Sending apple push notification");
                self.deliver(transport.as_ref(), &notification).await
            }
            // Without a client the type is treated as disabled, not failing.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PUSH_TYPE_CLEAR, PUSH_TYPE_MESSAGE};
    use a2::request::payload::PayloadLike;
    use std::sync::Mutex;

    struct RecordingTransport {
        reply: Result<ApnsReply, String>,
        seen: Mutex<Vec<ApnsNotification>>,
    }

    impl RecordingTransport {
        fn replying(reply: Result<ApnsReply, String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ApnsTransport for RecordingTransport {
        async fn push(&self, notification: &ApnsNotification) -> Result<ApnsReply, PushError> {
            self.seen.lock().unwrap().push(notification.clone());
            self.reply.clone().map_err(PushError::Transport)
        }
    }

    fn settings() -> ApplePushSettings {
        let mut settings = ApplePushSettings::new("apple_rn");
        settings.apple_push_topic = "com.example.app".to_string();
        settings
    }

    fn message() -> PushNotification {
        PushNotification {
            server_id: "s1".to_string(),
            device_id: "abcdef".to_string(),
            platform: "apple_rn".to_string(),
            kind: PUSH_TYPE_MESSAGE.to_string(),
            message: "deploy done :tada:".to_string(),
            badge: 2,
            channel_id: "c1".to_string(),
            team_id: "t1".to_string(),
            category: "CAN_REPLY".to_string(),
            ..Default::default()
        }
    }

    fn wire_body(n: &ApnsNotification) -> serde_json::Value {
        let json = n.apns_payload().unwrap().to_json_string().unwrap();
        serde_json::from_str(&json).unwrap()
    }

    fn rejected(reason: &str, status: u16) -> Result<ApnsReply, String> {
        Ok(ApnsReply {
            status,
            apns_id: Some("id-1".to_string()),
            reason: Some(reason.to_string()),
        })
    }

    #[test]
    fn test_message_payload_carries_alert_sound_and_category() {
        let adapter = AppleAdapter::new(settings(), Metrics::new());
        let n = adapter.build_notification(&message());

        assert_eq!(n.alert.as_deref(), Some("deploy done 🎉"));
        assert_eq!(n.sound.as_deref(), Some("default"));
        assert_eq!(n.category.as_deref(), Some("CAN_REPLY"));
        assert_eq!(n.topic.as_deref(), Some("com.example.app"));
        assert_eq!(n.badge, 2);
        assert_eq!(n.custom.get("type").map(String::as_str), Some(PUSH_TYPE_MESSAGE));
        assert_eq!(n.custom.get("channel_id").map(String::as_str), Some("c1"));
        assert!(!n.custom.contains_key("post_id"));
        assert!(!n.custom.contains_key("sender_id"));

        let body = wire_body(&n);
        assert_eq!(body["aps"]["alert"], "deploy done 🎉");
        assert_eq!(body["aps"]["sound"], "default");
        assert_eq!(body["aps"]["category"], "CAN_REPLY");
        assert_eq!(body["aps"]["badge"], 2);
        assert_eq!(body["channel_id"], "c1");
        assert_eq!(body["type"], PUSH_TYPE_MESSAGE);
    }

    #[test]
    fn test_clear_payload_suppresses_message_fields() {
        let adapter = AppleAdapter::new(settings(), Metrics::new());
        let mut msg = message();
        msg.kind = PUSH_TYPE_CLEAR.to_string();
        let n = adapter.build_notification(&msg);

        assert!(n.alert.is_none());
        assert!(n.sound.is_none());
        assert!(n.category.is_none());
        assert_eq!(n.custom.get("type").map(String::as_str), Some(PUSH_TYPE_CLEAR));

        let body = wire_body(&n);
        assert_eq!(body["aps"]["badge"], 2);
        assert!(body["aps"].get("alert").is_none());
        assert!(body["aps"].get("sound").is_none());
        assert!(body["aps"].get("category").is_none());
        assert_eq!(body["channel_id"], "c1");
        assert_eq!(body["type"], PUSH_TYPE_CLEAR);
    }

    #[tokio::test]
    async fn test_success_reply_is_ok() {
        let transport = RecordingTransport::replying(Ok(ApnsReply {
            status: 200,
            ..Default::default()
        }));
        let adapter = AppleAdapter::with_transport(settings(), transport.clone(), Metrics::new());

        assert_eq!(adapter.send_notification(&message()).await, PushResponse::Ok);
        assert_eq!(transport.seen.lock().unwrap()[0].device_token, "abcdef");
    }

    #[tokio::test]
    async fn test_each_remove_reason_maps_to_remove() {
        for reason in ["BadDeviceToken", "Unregistered", "MissingDeviceToken", "DeviceTokenNotForTopic"] {
            let transport = RecordingTransport::replying(rejected(reason, 400));
            let adapter = AppleAdapter::with_transport(settings(), transport, Metrics::new());
            assert_eq!(
                adapter.send_notification(&message()).await,
                PushResponse::Remove,
                "reason {reason}"
            );
        }
    }

    #[tokio::test]
    async fn test_other_rejection_is_generic_error() {
        let transport = RecordingTransport::replying(rejected("PayloadTooLarge", 413));
        let adapter = AppleAdapter::with_transport(settings(), transport, Metrics::new());
        assert_eq!(
            adapter.send_notification(&message()).await,
            PushResponse::error("unknown send response error")
        );
    }

    #[tokio::test]
    async fn test_configured_remove_reasons_replace_defaults() {
        let mut custom = settings();
        custom.remove_reasons = vec!["ExpiredToken".to_string()];

        let transport = RecordingTransport::replying(rejected("ExpiredToken", 410));
        let adapter = AppleAdapter::with_transport(custom.clone(), transport, Metrics::new());
        assert_eq!(adapter.send_notification(&message()).await, PushResponse::Remove);

        let transport = RecordingTransport::replying(rejected("Unregistered", 410));
        let adapter = AppleAdapter::with_transport(custom, transport, Metrics::new());
        assert_eq!(
            adapter.send_notification(&message()).await,
            PushResponse::error("unknown send response error")
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_generic_error() {
        let transport = RecordingTransport::replying(Err("connection refused".to_string()));
        let adapter = AppleAdapter::with_transport(settings(), transport, Metrics::new());
        assert_eq!(
            adapter.send_notification(&message()).await,
            PushResponse::error("unknown transport error")
        );
    }

    #[test]
    fn test_initialize_without_credentials_fails() {
        let mut adapter = AppleAdapter::new(settings(), Metrics::new());
        assert!(!adapter.initialize());
    }

    #[test]
    fn test_initialize_with_missing_certificate_file_fails() {
        let mut s = settings();
        s.apple_push_cert_private = "definitely-not-here-3b1f.p12".to_string();
        let mut adapter = AppleAdapter::new(s, Metrics::new());
        assert!(!adapter.initialize());
    }

    #[test]
    fn test_initialize_with_token_auth_requires_key_id() {
        let mut s = settings();
        s.apple_push_key = "AuthKey.p8".to_string();
        assert!(matches!(
            A2Transport::from_settings(&s),
            Err(CredentialError::Missing("apple_key_id"))
        ));
    }
}
