//! JSON-RPC endpoint handler for `POST /mcp`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use serde_json::Value;
use tollgate_core::messages::error_codes;
use tollgate_core::{propagation, RpcRequest, RpcResponse};
use tokio_util::task::AbortOnDropHandle;
use tower::ServiceExt;
use tracing::{debug, error};

use super::AppState;
use crate::auth::SessionGrant;
use crate::service::OperationError;

/// Handles one JSON-RPC request.
///
/// Runs behind the authentication gate, so by the time this is polled the
/// request credential is installed. The operation is executed on a spawned
/// task through the pipeline; `propagation::spawn` carries the credential
/// across that hand-off.
///
/// The spawned task owns the in-flight guard and is aborted if this future
/// is dropped (request timeout, client disconnect), so a drain never
/// completes while an abandoned tool call is still running.
///
/// Protocol errors are answered with status 200 and a JSON-RPC error body.
/// Notifications are acknowledged with 202 and no body.
pub async fn mcp_handler(
    State(state): State<AppState>,
    grant: Option<Extension<SessionGrant>>,
    body: Bytes,
) -> Response {
    let Some(in_flight) = state.shutdown.admit() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RpcResponse::failure(
                Value::Null,
                error_codes::OVERLOADED,
                "server is shutting down",
            )),
        )
            .into_response();
    };

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable JSON-RPC body");
            return reply(RpcResponse::failure(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("parse error: {e}"),
            ));
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return reply(RpcResponse::failure(
                id,
                error_codes::INVALID_REQUEST,
                format!("invalid request: {e}"),
            ))
        }
    };

    if request.is_notification() {
        debug!(method = %request.method, "Notification acknowledged");
        return StatusCode::ACCEPTED.into_response();
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let session_id = grant.map(|Extension(grant)| grant.id);
    let operation = match state.classifier.classify(request, session_id) {
        Ok(operation) => operation,
        Err(e) => return reply(RpcResponse::failure(id, e.rpc_code(), e.to_string())),
    };

    let pipeline = state.pipeline.clone();
    let task = AbortOnDropHandle::new(propagation::spawn(async move {
        let _in_flight = in_flight;
        pipeline.oneshot(operation).await
    }));
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join) => Err(OperationError::Internal(anyhow::anyhow!(
            "operation task failed: {join}"
        ))),
    };

    match outcome {
        Ok(response) => reply(RpcResponse::success(id, response.into_value())),
        Err(e) => {
            if let OperationError::Internal(ref cause) = e {
                error!(error = %cause, "Operation failed");
            }
            reply(RpcResponse::failure(id, e.rpc_code(), e.to_string()))
        }
    }
}

fn reply(response: RpcResponse) -> Response {
    Json(response).into_response()
}
