//! # Gateway
//!
//! The HTTP surface of the proxy. Requests first pass the admission gate,
//! then the send handler decodes and validates them, hands them to the
//! registry and writes the JSON outcome. Classification is carried in the
//! body; the status is 200 for every handled request.
//!
//! Two responses bypass the handler and carry no JSON: `429` with the body
//! `limit exceeded` from the admission gate, and an empty `408` when a
//! request runs past [`CONNECTION_TIMEOUT`].

use crate::core::{PushNotification, PushResponse};
use crate::error::PushError;
use crate::formatting::truncate_message;
use crate::internal_metrics::Metrics;
use crate::registry::{derive_platform, BackendRegistry};
use crate::throttle::{admission_gate, Throttle};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Requests still running after this long are answered with 408.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

const ROOT_BODY: &str = "<html><body>Push Proxy</body></html>";

/// Everything the handlers need, built once at startup.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<BackendRegistry>,
    pub metrics: Metrics,
    pub prometheus: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn metrics_enabled(&self) -> bool {
        self.prometheus.is_some()
    }
}

/// Assembles the router: routes, response-time recording, request timeout
/// and, outermost, the admission gate.
///
/// Only the gate (`429 limit exceeded`) and the timeout (`408`, empty body)
/// answer with something other than `200` and a JSON outcome.
pub fn router(state: GatewayState, throttle: Arc<Throttle>) -> Router {
    let mut send_route = post(send_push);
    if state.metrics_enabled() {
        send_route = send_route.layer(middleware::from_fn_with_state(
            state.clone(),
            record_response_time,
        ));
    }

    let mut app = Router::new()
        .route("/", get(root))
        .route("/api/v4/send_push", send_route);

    if state.metrics_enabled() {
        app = app.route("/metrics", get(render_metrics));
    }

    app.with_state(state)
        .layer(middleware::from_fn(request_timeout))
        .layer(middleware::from_fn_with_state(throttle, admission_gate))
}

async fn root() -> Html<&'static str> {
    Html(ROOT_BODY)
}

async fn render_metrics(State(state): State<GatewayState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn send_push(State(state): State<GatewayState>, body: Bytes) -> Response {
    let response = match validate(&body) {
        Ok(mut msg) => {
            if truncate_message(&mut msg.message) {
                debug!(server_id = %msg.server_id, "Message truncated");
            }
            derive_platform(&mut msg);
            state.registry.dispatch(&msg).await
        }
        Err(err) => {
            error!("{}", err);
            state.metrics.increment_bad_request();
            PushResponse::from(err)
        }
    };
    json_response(&response)
}

/// Decodes the body and checks required fields, first failure wins.
pub fn validate(body: &[u8]) -> Result<PushNotification, PushError> {
    let msg = PushNotification::from_json(body)?;

    if msg.server_id.is_empty() {
        return Err(PushError::MissingServerId);
    }

    if msg.device_id.is_empty() {
        return Err(PushError::MissingDeviceId {
            server_id: msg.server_id,
        });
    }

    Ok(msg)
}

fn json_response(response: &PushResponse) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response.to_json(),
    )
        .into_response()
}

async fn record_response_time(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .metrics
        .observe_service_response(start.elapsed().as_secs_f64());
    response
}

async fn request_timeout(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    within_deadline(CONNECTION_TIMEOUT, &path, next.run(request)).await
}

async fn within_deadline<F>(limit: Duration, path: &str, response: F) -> Response
where
    F: Future<Output = Response>,
{
    match tokio::time::timeout(limit, response).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, "Request timed out");
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_order() {
        assert!(matches!(validate(b"{"), Err(PushError::Decode(_))));
        assert!(matches!(
            validate(br#"{"device_id":"d"}"#),
            Err(PushError::MissingServerId)
        ));
        assert!(matches!(
            validate(br#"{"server_id":"s"}"#),
            Err(PushError::MissingDeviceId { .. })
        ));
        assert!(matches!(validate(br#"{}"#), Err(PushError::MissingServerId)));
        assert!(validate(br#"{"server_id":"s","device_id":"d"}"#).is_ok());
    }

    #[test]
    fn test_missing_device_id_message_names_server() {
        let err = validate(br#"{"server_id":"srv-9"}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed because of missing device Id serverId=srv-9"
        );
    }

    #[tokio::test]
    async fn test_slow_request_gets_empty_408() {
        let response = within_deadline(Duration::from_millis(20), "/api/v4/send_push", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK.into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_request_within_deadline_passes_through() {
        let response = within_deadline(Duration::from_secs(5), "/", async {
            StatusCode::OK.into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
