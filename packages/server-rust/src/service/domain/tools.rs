//! Tool listing and execution against the remote analysis API.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{json, Map, Value};
use tollgate_core::SessionId;
use tower::Service;
use tracing::{debug, error};

use super::catalog::ToolCatalog;
use crate::auth::CredentialResolver;
use crate::service::operation::{Operation, OperationContext, OperationError, OperationResponse};
use crate::traits::{RemoteError, RemoteInvoker};

const TOOL_ERROR_PREFIX: &str = "An error occurred during the tool execution: ";
const NOT_FOUND_HINT: &str = "Make sure your token is valid.";

/// Executes catalog tools with the credential of the current request.
///
/// Remote failures are reported to the client as tool results with
/// `isError: true`; only a missing request credential fails the operation.
pub struct ToolsService {
    catalog: ToolCatalog,
    resolver: CredentialResolver,
    invoker: Arc<dyn RemoteInvoker>,
}

impl ToolsService {
    #[must_use]
    pub fn new(catalog: ToolCatalog, resolver: CredentialResolver, invoker: Arc<dyn RemoteInvoker>) -> Self {
        Self {
            catalog,
            resolver,
            invoker,
        }
    }

    fn list(&self) -> OperationResponse {
        OperationResponse::Result(json!({ "tools": self.catalog.definitions() }))
    }

    async fn execute(
        &self,
        ctx: &OperationContext,
        name: String,
        arguments: Map<String, Value>,
    ) -> Result<OperationResponse, OperationError> {
        let Some(tool) = self.catalog.get(&name) else {
            return Err(OperationError::UnknownTool { name });
        };
        let credential = self.resolver.resolve()?;

        let call = match tool.build_call(&arguments) {
            Ok(call) => call,
            Err(e) => return Ok(tool_failure(&e.to_string())),
        };

        debug!(
            tool = tool.name,
            call_id = ctx.call_id,
            session = ctx.session_id.as_ref().map(SessionId::as_str),
            credential = %credential.fingerprint(),
            "Invoking remote tool"
        );
        match self.invoker.invoke(&credential, call).await {
            Ok(body) => Ok(tool_success(body)),
            Err(e) => {
                error!(tool = tool.name, error = %e, "An error occurred during the tool execution");
                let message = match e {
                    RemoteError::NotFound => NOT_FOUND_HINT.to_string(),
                    other => other.to_string(),
                };
                Ok(tool_failure(&message))
            }
        }
    }
}

fn tool_success(body: Value) -> OperationResponse {
    let mut result = json!({
        "content": [{ "type": "text", "text": body.to_string() }],
        "isError": false,
    });
    if body.is_object() {
        result["structuredContent"] = body;
    }
    OperationResponse::Result(result)
}

fn tool_failure(message: &str) -> OperationResponse {
    OperationResponse::Result(json!({
        "content": [{ "type": "text", "text": format!("{TOOL_ERROR_PREFIX}{message}") }],
        "isError": true,
    }))
}

impl Service<Operation> for Arc<ToolsService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let this = Arc::clone(self);
        Box::pin(async move {
            match op {
                Operation::ListTools { .. } => Ok(this.list()),
                Operation::CallTool {
                    ctx,
                    name,
                    arguments,
                } => this.execute(&ctx, name, arguments).await,
                _ => Err(OperationError::WrongService),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tollgate_core::{ContextSnapshot, Credential};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::AuthMode;
    use crate::service::operation::service_names;
    use crate::traits::RemoteCall;

    /// Records every call and answers from a fixed outcome.
    struct FakeInvoker {
        calls: Mutex<Vec<(String, RemoteCall)>>,
        outcome: fn() -> Result<Value, RemoteError>,
    }

    impl FakeInvoker {
        fn new(outcome: fn() -> Result<Value, RemoteError>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outcome,
            })
        }
    }

    #[async_trait]
    impl RemoteInvoker for FakeInvoker {
        async fn invoke(&self, credential: &Credential, call: RemoteCall) -> Result<Value, RemoteError> {
            self.calls.lock().push((credential.expose().to_string(), call));
            (self.outcome)()
        }
    }

    fn service(invoker: Arc<FakeInvoker>) -> Arc<ToolsService> {
        Arc::new(ToolsService::new(
            ToolCatalog::builtin(),
            CredentialResolver::for_mode(AuthMode::Token, None).unwrap(),
            invoker,
        ))
    }

    fn call_tool(name: &str, arguments: Value) -> Operation {
        let Value::Object(arguments) = arguments else {
            panic!("arguments must be an object");
        };
        Operation::CallTool {
            ctx: OperationContext::new(1, service_names::TOOLS, 5000),
            name: name.to_string(),
            arguments,
        }
    }

    fn cred(raw: &str) -> Credential {
        Credential::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn lists_catalog() {
        let resp = service(FakeInvoker::new(|| Ok(json!({}))))
            .oneshot(Operation::ListTools {
                ctx: OperationContext::new(1, service_names::TOOLS, 5000),
            })
            .await
            .unwrap()
            .into_value();
        assert_eq!(
            resp["tools"].as_array().unwrap().len(),
            ToolCatalog::builtin().len()
        );
    }

    #[tokio::test]
    async fn call_uses_request_credential() {
        let invoker = FakeInvoker::new(|| Ok(json!({"rule": {"key": "rust:S1"}})));
        let svc = service(Arc::clone(&invoker));

        let resp = ContextSnapshot::of(cred("abc"))
            .instrument(svc.oneshot(call_tool("show_rule", json!({"key": "rust:S1"}))))
            .await
            .unwrap()
            .into_value();

        assert_eq!(resp["isError"], false);
        assert_eq!(resp["structuredContent"]["rule"]["key"], "rust:S1");
        let calls = invoker.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "abc");
        assert_eq!(calls[0].1.path, "api/rules/show");
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    async fn call_without_context_panics_and_never_invokes() {
        let invoker = FakeInvoker::new(|| Ok(json!({})));
        let task = tokio::spawn(
            service(Arc::clone(&invoker)).oneshot(call_tool("show_rule", json!({"key": "x"}))),
        );
        assert!(task.await.unwrap_err().is_panic());
        assert!(invoker.calls.lock().is_empty());
    }

    #[cfg(not(debug_assertions))]
    #[tokio::test]
    async fn call_without_context_fails_and_never_invokes() {
        let invoker = FakeInvoker::new(|| Ok(json!({})));
        let err = service(Arc::clone(&invoker))
            .oneshot(call_tool("show_rule", json!({"key": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Credential(crate::auth::AuthError::ContextNotEstablished)
        ));
        assert!(invoker.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_operation_error() {
        let err = ContextSnapshot::of(cred("abc"))
            .instrument(service(FakeInvoker::new(|| Ok(json!({})))).oneshot(call_tool("nope", json!({}))))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::UnknownTool { name } if name == "nope"));
    }

    #[tokio::test]
    async fn bad_arguments_become_tool_errors() {
        let invoker = FakeInvoker::new(|| Ok(json!({})));
        let resp = ContextSnapshot::of(cred("abc"))
            .instrument(service(Arc::clone(&invoker)).oneshot(call_tool("show_rule", json!({}))))
            .await
            .unwrap()
            .into_value();
        assert_eq!(resp["isError"], true);
        assert_eq!(
            resp["content"][0]["text"],
            "An error occurred during the tool execution: Missing required argument: key"
        );
        assert!(invoker.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn not_found_suggests_checking_the_token() {
        let resp = ContextSnapshot::of(cred("abc"))
            .instrument(
                service(FakeInvoker::new(|| Err(RemoteError::NotFound)))
                    .oneshot(call_tool("list_quality_gates", json!({}))),
            )
            .await
            .unwrap()
            .into_value();
        assert_eq!(resp["isError"], true);
        assert_eq!(
            resp["content"][0]["text"],
            "An error occurred during the tool execution: Make sure your token is valid."
        );
    }

    #[tokio::test]
    async fn other_remote_errors_are_reported_verbatim() {
        let resp = ContextSnapshot::of(cred("abc"))
            .instrument(
                service(FakeInvoker::new(|| Err(RemoteError::Unauthorized { status: 401 })))
                    .oneshot(call_tool("list_quality_gates", json!({}))),
            )
            .await
            .unwrap()
            .into_value();
        let text = resp["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with(TOOL_ERROR_PREFIX));
        assert!(text.contains("401"));
    }

    #[tokio::test]
    async fn fixed_resolver_needs_no_context() {
        let invoker = FakeInvoker::new(|| Ok(json!([1, 2])));
        let svc = Arc::new(ToolsService::new(
            ToolCatalog::builtin(),
            CredentialResolver::for_mode(AuthMode::Disabled, Some(cred("fixed"))).unwrap(),
            Arc::clone(&invoker) as Arc<dyn RemoteInvoker>,
        ));
        let resp = svc
            .oneshot(call_tool("search_metrics", json!({})))
            .await
            .unwrap()
            .into_value();
        assert_eq!(resp["isError"], false);
        assert!(resp.get("structuredContent").is_none());
        assert_eq!(invoker.calls.lock()[0].0, "fixed");
    }
}
