//! Core domain types and service traits for the push proxy
//!
//! This module defines the canonical notification request and response, and
//! the `DeliveryAdapter` contract every push backend implements.

use crate::error::PushError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Notification carrying a message to display.
pub const PUSH_TYPE_MESSAGE: &str = "message";
/// Notification that only clears badge/notification state on the device.
pub const PUSH_TYPE_CLEAR: &str = "clear";

/// Platform key every colon-shaped device id is routed to.
pub const PLATFORM_ANDROID: &str = "android";

/// Longest message accepted unchanged; longer ones are cut to
/// `MAX_MESSAGE_LENGTH - 1` characters.
pub const MAX_MESSAGE_LENGTH: usize = 2047;

/// A canonical push notification request, as posted by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PushNotification {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_id: String,
    /// Backend registration token, optionally shaped `platform:token`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    /// The backend "type" this notification should be routed to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// `message` or `clear`.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub badge: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub post_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub override_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub override_icon_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_webhook: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub promo_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub news_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub push_type: String,
}

impl PushNotification {
    /// Decodes a notification from a request body.
    ///
    /// Unknown fields are ignored and absent fields take their defaults; only
    /// input that is not a JSON object of the expected shape is rejected.
    pub fn from_json(bytes: &[u8]) -> Result<Self, PushError> {
        serde_json::from_slice(bytes).map_err(PushError::Decode)
    }

    /// Encodes the notification with the same field names it is decoded from.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Clear notifications suppress message text, sound and category.
    pub fn is_clear(&self) -> bool {
        self.kind == PUSH_TYPE_CLEAR
    }

    /// The type label forwarded to the device: anything that is not a clear
    /// is delivered as a message.
    pub fn effective_kind(&self) -> &'static str {
        if self.is_clear() {
            PUSH_TYPE_CLEAR
        } else {
            PUSH_TYPE_MESSAGE
        }
    }
}

/// The normalized outcome of a send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResponse {
    /// The notification was handed to the upstream service.
    Ok,
    /// The device token is permanently invalid and should be forgotten.
    Remove,
    /// Anything else, with a human readable cause.
    Error(String),
}

const STATUS_OK: &str = "OK";
const STATUS_REMOVE: &str = "REMOVE";
const STATUS_FAIL: &str = "FAIL";

#[derive(Serialize, Deserialize)]
struct PushResponseWire {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for PushResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            PushResponse::Ok => PushResponseWire {
                status: STATUS_OK.to_string(),
                error: None,
            },
            PushResponse::Remove => PushResponseWire {
                status: STATUS_REMOVE.to_string(),
                error: None,
            },
            PushResponse::Error(message) => PushResponseWire {
                status: STATUS_FAIL.to_string(),
                error: Some(message.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PushResponse {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = PushResponseWire::deserialize(deserializer)?;
        match wire.status.as_str() {
            STATUS_OK => Ok(PushResponse::Ok),
            STATUS_REMOVE => Ok(PushResponse::Remove),
            STATUS_FAIL => Ok(PushResponse::Error(wire.error.unwrap_or_default())),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &[STATUS_OK, STATUS_REMOVE, STATUS_FAIL],
            )),
        }
    }
}

impl PushResponse {
    pub fn error(message: impl Into<String>) -> Self {
        PushResponse::Error(message.into())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A push backend for one logical application "type".
///
/// Implementations translate the canonical notification into their upstream
/// wire format and classify the upstream outcome. Adding a new backend family
/// means implementing this trait; the dispatcher never changes.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Loads the credentials needed to talk to the upstream service.
    ///
    /// Returns `false` when they are missing or unusable; the adapter is then
    /// left out of the registry.
    fn initialize(&mut self) -> bool;

    /// Attempts a single delivery and classifies the result.
    async fn send_notification(&self, msg: &PushNotification) -> PushResponse;

    /// The backend family, e.g. `apple` or `android`.
    fn kind(&self) -> &'static str;

    /// The application type this adapter was configured for.
    fn app_type(&self) -> &str;
}
