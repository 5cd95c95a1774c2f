//! Configuration management for the push proxy
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer built-in defaults, a TOML or JSON file, `PUSH_PROXY_`
//! environment variables and command-line flags.

use crate::cli::Cli;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "push-proxy.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Address the HTTP gateway listens on.
    pub listen_address: String,
    /// Request admission settings.
    pub throttle: ThrottleConfig,
    /// Prometheus metrics settings.
    pub metrics: MetricsConfig,
    /// One entry per Apple application type.
    pub apple_push_settings: Vec<ApplePushSettings>,
    /// One entry per Android application type.
    pub android_push_settings: Vec<AndroidPushSettings>,
}

/// Configuration for the admission gate.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Requests admitted per second per key. Zero disables throttling.
    pub per_sec: u32,
    /// Include the client address in the throttle key.
    pub vary_by_remote_addr: bool,
    /// Header names whose values are included in the throttle key.
    pub vary_by_headers: Vec<String>,
    /// Maximum number of distinct keys tracked at once.
    pub memory_store_size: u64,
}

/// Configuration for metrics collection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose `/metrics` and record counters and histograms.
    pub enabled: bool,
}

/// Credentials and endpoint settings for one Apple application type.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApplePushSettings {
    /// The routing key requests use in their `platform` field.
    #[serde(rename = "type")]
    pub app_type: String,
    /// Use the APNs sandbox instead of production.
    #[serde(default)]
    pub apple_push_use_development: bool,
    /// Certificate file (PKCS#12) for certificate based auth.
    #[serde(default)]
    pub apple_push_cert_private: String,
    #[serde(default)]
    pub apple_push_cert_password: String,
    /// Auth key file (.p8) for token based auth.
    #[serde(default)]
    pub apple_push_key: String,
    #[serde(default)]
    pub apple_key_id: String,
    #[serde(default)]
    pub apple_team_id: String,
    /// The app bundle id sent as `apns-topic`.
    #[serde(default)]
    pub apple_push_topic: String,
    /// Rejection reasons that mean the device token is gone for good.
    #[serde(default = "default_apple_remove_reasons")]
    pub remove_reasons: Vec<String>,
}

/// Credentials and endpoint settings for one Android application type.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AndroidPushSettings {
    /// The routing key requests use in their `platform` field.
    #[serde(rename = "type")]
    pub app_type: String,
    /// Server key for the FCM HTTP API.
    #[serde(default)]
    pub android_api_key: String,
    /// FCM send endpoint.
    #[serde(default = "default_fcm_endpoint")]
    pub fcm_endpoint: String,
    /// Per-result error codes that mean the registration id is gone for good.
    #[serde(default = "default_android_remove_reasons")]
    pub remove_reasons: Vec<String>,
}

pub fn default_apple_remove_reasons() -> Vec<String> {
    ["BadDeviceToken", "Unregistered", "MissingDeviceToken", "DeviceTokenNotForTopic"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_android_remove_reasons() -> Vec<String> {
    ["InvalidRegistration", "NotRegistered"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

impl ApplePushSettings {
    pub fn new(app_type: &str) -> Self {
        Self {
            app_type: app_type.to_string(),
            apple_push_use_development: false,
            apple_push_cert_private: String::new(),
            apple_push_cert_password: String::new(),
            apple_push_key: String::new(),
            apple_key_id: String::new(),
            apple_team_id: String::new(),
            apple_push_topic: String::new(),
            remove_reasons: default_apple_remove_reasons(),
        }
    }
}

impl AndroidPushSettings {
    pub fn new(app_type: &str, api_key: &str) -> Self {
        Self {
            app_type: app_type.to_string(),
            android_api_key: api_key.to_string(),
            fcm_endpoint: default_fcm_endpoint(),
            remove_reasons: default_android_remove_reasons(),
        }
    }
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are merged in increasing priority: defaults, the config file
    /// (`--config`, or `push-proxy.toml` if it exists), `PUSH_PROXY_*`
    /// environment variables, then command-line flags.
    pub fn load(cli: &Cli) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        match &cli.config {
            Some(path) => figment = merge_file(figment, path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                figment = merge_file(figment, Path::new(DEFAULT_CONFIG_FILE))
            }
            None => {}
        }

        let config: Config = figment
            // e.g. PUSH_PROXY_THROTTLE__PER_SEC=10
            .merge(Env::prefixed("PUSH_PROXY_").split("__"))
            .merge(cli.clone())
            .extract()
            .map_err(Box::new)?;
        Ok(config)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        figment.merge(Json::file_exact(path))
    } else {
        figment.merge(Toml::file_exact(path))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            listen_address: "0.0.0.0:8066".to_string(),
            throttle: ThrottleConfig::default(),
            metrics: MetricsConfig::default(),
            apple_push_settings: Vec::new(),
            android_push_settings: Vec::new(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            per_sec: 300,
            vary_by_remote_addr: true,
            vary_by_headers: Vec::new(),
            memory_store_size: 50_000,
        }
    }
}
