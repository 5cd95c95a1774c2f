//! Error types for the gateway.
//!
//! `PushError` covers everything that can go wrong while handling a single
//! request. Every variant is converted into exactly one [`PushResponse`] at
//! the point where it occurs, so none of them ever escape a handler.
//!
//! `StartupError` is the only fatal kind. It is raised while the process is
//! being configured (settings, metrics exporter, listening socket) and ends
//! the process.

use crate::core::PushResponse;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures while handling one notification request.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Failed to read message body")]
    Decode(#[source] serde_json::Error),

    #[error("Failed because of missing server Id")]
    MissingServerId,

    #[error("Failed because of missing device Id serverId={server_id}")]
    MissingDeviceId { server_id: String },

    #[error("Did not send message because of missing platform property type={platform} serverId={server_id}")]
    UnroutablePlatform { platform: String, server_id: String },

    #[error("unknown transport error")]
    Transport(String),

    #[error("device token is no longer valid (reason={reason})")]
    PermanentInvalidToken { reason: String },

    #[error("unknown send response error")]
    UpstreamRejected { reason: String, status: u16 },
}

impl PushError {
    /// True for the client-side failures that count as bad requests rather
    /// than delivery attempts.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            PushError::Decode(_)
                | PushError::MissingServerId
                | PushError::MissingDeviceId { .. }
                | PushError::UnroutablePlatform { .. }
        )
    }
}

impl From<&PushError> for PushResponse {
    fn from(err: &PushError) -> Self {
        match err {
            PushError::PermanentInvalidToken { .. } => PushResponse::Remove,
            other => PushResponse::Error(other.to_string()),
        }
    }
}

impl From<PushError> for PushResponse {
    fn from(err: PushError) -> Self {
        PushResponse::from(&err)
    }
}

/// Why an adapter could not set up its upstream client.
///
/// Never fatal: the registry logs it and leaves the application type
/// unroutable.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("push notifications not configured, missing {0}")]
    Missing(&'static str),

    #[error("failed to open credential file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load apple credentials: {0}")]
    Apns(#[from] a2::Error),

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unrecoverable conditions hit while starting the gateway.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address {0}")]
    ListenAddress(String),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

impl StartupError {
    pub(crate) fn bind(address: SocketAddr, source: std::io::Error) -> Self {
        StartupError::Bind {
            address: address.to_string(),
            source,
        }
    }
}
