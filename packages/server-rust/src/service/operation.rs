//! Typed operations flowing through the pipeline, their responses, and errors.

use serde_json::{Map, Value};
use tollgate_core::messages::error_codes;
use tollgate_core::SessionId;

use crate::auth::AuthError;

/// Service names used to route operations.
pub mod service_names {
    pub const LIFECYCLE: &str = "lifecycle";
    pub const TOOLS: &str = "tools";
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub service_name: &'static str,
    /// Session the request was admitted under, in session-bound mode.
    pub session_id: Option<SessionId>,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, service_name: &'static str, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            service_name,
            session_id: None,
            call_timeout_ms,
        }
    }
}

/// Typed operation variants dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    Initialize {
        ctx: OperationContext,
        params: Value,
    },
    Ping {
        ctx: OperationContext,
    },
    ListTools {
        ctx: OperationContext,
    },
    CallTool {
        ctx: OperationContext,
        name: String,
        arguments: Map<String, Value>,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::Initialize { ctx, .. }
            | Self::Ping { ctx }
            | Self::ListTools { ctx }
            | Self::CallTool { ctx, .. } => ctx,
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug)]
pub enum OperationResponse {
    /// JSON-RPC `result` payload.
    Result(Value),
    Empty,
}

impl OperationResponse {
    /// The JSON-RPC `result` value for this response.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Result(value) => value,
            Self::Empty => Value::Object(Map::new()),
        }
    }
}

/// Errors returned by operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("wrong service for operation")]
    WrongService,
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    #[error(transparent)]
    Credential(#[from] AuthError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// JSON-RPC error code reported to the client.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Timeout { .. } => error_codes::TIMEOUT,
            Self::Overloaded => error_codes::OVERLOADED,
            Self::UnknownTool { .. } => error_codes::INVALID_PARAMS,
            Self::UnknownService { .. }
            | Self::WrongService
            | Self::Credential(_)
            | Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Errors from classifying a JSON-RPC request into an `Operation`.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("unsupported JSON-RPC version: {version}")]
    InvalidVersion { version: String },
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },
}

impl ClassifyError {
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidVersion { .. } => error_codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => error_codes::INVALID_PARAMS,
        }
    }
}
