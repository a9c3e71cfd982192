//! Protocol lifecycle: `initialize` handshake and `ping`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{json, Value};
use tower::Service;
use tracing::debug;

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Protocol revision announced when the client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

pub const SERVER_NAME: &str = "tollgate";

const INSTRUCTIONS: &str = "Read-only access to code analysis results. \
Every tool call runs with the credential presented by the caller.";

/// Answers lifecycle requests locally; never contacts the remote API.
#[derive(Debug, Default)]
pub struct LifecycleService;

impl LifecycleService {
    fn initialize(params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": INSTRUCTIONS,
        })
    }
}

impl Service<Operation> for Arc<LifecycleService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let result = match op {
            Operation::Initialize { ctx, params } => {
                debug!(call_id = ctx.call_id, session_id = ?ctx.session_id, "Client initialized");
                Ok(OperationResponse::Result(LifecycleService::initialize(&params)))
            }
            Operation::Ping { .. } => Ok(OperationResponse::Empty),
            _ => Err(OperationError::WrongService),
        };
        Box::pin(async move { result })
    }
}
