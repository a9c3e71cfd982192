//! Request classification: converts a JSON-RPC `RpcRequest` into a typed `Operation`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tollgate_core::messages::JSONRPC_VERSION;
use tollgate_core::{RpcRequest, SessionId};

use super::config::ServiceConfig;
use super::operation::{service_names, ClassifyError, Operation, OperationContext};

/// JSON-RPC method names accepted on the `/mcp` endpoint.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies incoming requests into typed `Operation` variants.
///
/// Each call is assigned a unique call ID and the configured default timeout.
pub struct OperationService {
    config: Arc<ServiceConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new(config: Arc<ServiceConfig>) -> Self {
        Self {
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(&self, service_name: &'static str, session_id: Option<SessionId>) -> OperationContext {
        let mut ctx = OperationContext::new(
            self.next_call_id(),
            service_name,
            self.config.default_operation_timeout_ms,
        );
        ctx.session_id = session_id;
        ctx
    }

    /// Classify a request into an `Operation`.
    ///
    /// # Errors
    ///
    /// - `ClassifyError::InvalidVersion` when `jsonrpc` is not `"2.0"`
    /// - `ClassifyError::MethodNotFound` for unknown methods
    /// - `ClassifyError::InvalidParams` when `tools/call` params are malformed
    pub fn classify(
        &self,
        req: RpcRequest,
        session_id: Option<SessionId>,
    ) -> Result<Operation, ClassifyError> {
        if req.jsonrpc != JSONRPC_VERSION {
            return Err(ClassifyError::InvalidVersion {
                version: req.jsonrpc,
            });
        }

        match req.method.as_str() {
            methods::INITIALIZE => Ok(Operation::Initialize {
                ctx: self.make_ctx(service_names::LIFECYCLE, session_id),
                params: req.params.unwrap_or(Value::Null),
            }),
            methods::PING => Ok(Operation::Ping {
                ctx: self.make_ctx(service_names::LIFECYCLE, session_id),
            }),
            methods::TOOLS_LIST => Ok(Operation::ListTools {
                ctx: self.make_ctx(service_names::TOOLS, session_id),
            }),
            methods::TOOLS_CALL => {
                let (name, arguments) = parse_tool_call(req.params)?;
                Ok(Operation::CallTool {
                    ctx: self.make_ctx(service_names::TOOLS, session_id),
                    name,
                    arguments,
                })
            }
            _ => Err(ClassifyError::MethodNotFound { method: req.method }),
        }
    }
}

fn parse_tool_call(params: Option<Value>) -> Result<(String, Map<String, Value>), ClassifyError> {
    let invalid = |reason: &str| ClassifyError::InvalidParams {
        reason: reason.to_string(),
    };

    let Some(Value::Object(mut params)) = params else {
        return Err(invalid("tools/call requires an object with a `name`"));
    };
    let name = match params.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => return Err(invalid("`name` must be a non-empty string")),
    };
    let arguments = match params.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(arguments)) => arguments,
        Some(_) => return Err(invalid("`arguments` must be an object")),
    };
    Ok((name, arguments))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
