//! Delivery adapters for the supported push backends.
//!
//! Each adapter owns the settings of one application type, translates the
//! canonical [`PushNotification`](crate::core::PushNotification) into its
//! upstream's wire format, and classifies the upstream answer into a
//! [`PushResponse`]. The network client itself sits behind a transport trait
//! so the translation and classification can be exercised without an
//! upstream.

pub mod android;
pub mod apple;

pub use android::{AndroidAdapter, FcmHttpTransport, FcmMessage, FcmReply, FcmTransport};
pub use apple::{A2Transport, ApnsNotification, ApnsReply, ApnsTransport, AppleAdapter};

use crate::core::PushResponse;
use crate::error::PushError;
use crate::internal_metrics::Metrics;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// Directories searched, in order, for credential files given by bare name.
pub const CREDENTIAL_DIRS: &[&str] = &["/tmp", "./config", "../config"];

/// Resolves a credential file name against [`CREDENTIAL_DIRS`], falling back
/// to the name itself.
pub fn find_credential_file(name: &str) -> PathBuf {
    find_credential_file_in(name, CREDENTIAL_DIRS)
}

pub fn find_credential_file_in<P: AsRef<Path>>(name: &str, dirs: &[P]) -> PathBuf {
    dirs.iter()
        .map(|dir| dir.as_ref().join(name))
        .chain(std::iter::once(PathBuf::from(name)))
        .find(|candidate| candidate.exists())
        .map(|found| std::path::absolute(&found).unwrap_or(found))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Outcome bookkeeping shared by every adapter.
///
/// Exactly one of the success, removal and failure counters is incremented
/// for the attempt, and the attempt's latency is recorded for the backend.
pub(crate) fn settle(
    backend: &'static str,
    app_type: &str,
    device_id: &str,
    started: Instant,
    outcome: Result<(), PushError>,
    metrics: &Metrics,
) -> PushResponse {
    metrics.observe_delivery(backend, started.elapsed().as_secs_f64());

    match outcome {
        Ok(()) => {
            metrics.increment_success(app_type);
            PushResponse::Ok
        }
        Err(err @ PushError::PermanentInvalidToken { .. }) => {
            info!(backend, app_type, error = %err, "Upstream rejected token, sending remove");
            metrics.increment_removal(app_type);
            PushResponse::from(err)
        }
        Err(err) => {
            match &err {
                PushError::Transport(cause) => {
                    error!(backend, app_type, did = device_id, cause = %cause, "Failed to send push");
                }
                PushError::UpstreamRejected { reason, status } => {
                    error!(backend, app_type, reason = %reason, status, "Upstream rejected push");
                }
                other => {
                    error!(backend, app_type, error = %other, "Push failed");
                }
            }
            metrics.increment_failure(app_type);
            PushResponse::from(err)
        }
    }
}

/// Maps an upstream rejection reason onto the error taxonomy.
pub(crate) fn classify_rejection(reason: &str, status: u16, remove_reasons: &[String]) -> PushError {
    if remove_reasons.iter().any(|r| r == reason) {
        PushError::PermanentInvalidToken {
            reason: reason.to_string(),
        }
    } else {
        PushError::UpstreamRejected {
            reason: reason.to_string(),
            status,
        }
    }
}
