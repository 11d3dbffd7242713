//! HTTP surface of the gateway.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tracing::error;

use super::{errmsg, Gateway};
use crate::rpc::RpcError;
use crate::utils::http::health;

/// `POST /` runs one call; `GET /health` is the liveness probe.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/", post(submit))
        .route("/health", get(health))
        .with_state(gateway)
}

async fn submit(
    State(gateway): State<Gateway>,
    Json(job): Json<Map<String, Value>>,
) -> Response {
    match gateway.call(&Value::Object(job)).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Map a failed call to the status and body the caller sees.
pub fn error_response(err: &RpcError) -> Response {
    let (status, message) = match err {
        RpcError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, errmsg::TIMEOUT),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, errmsg::SEND_FAILED),
    };
    error!(error = %err, status = status.as_u16(), "Call failed");
    (status, Json(json!({ "error": message }))).into_response()
}
