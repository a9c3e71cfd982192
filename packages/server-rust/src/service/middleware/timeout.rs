//! Deadline middleware for operations.
//!
//! Each operation carries its own deadline (`ctx.call_timeout_ms`, set by the
//! classifier). When it passes, the inner future is dropped, which cancels
//! any remote tool call still in progress, and the caller gets
//! `OperationError::Timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tollgate_core::SessionId;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let ctx = op.ctx().clone();
        let tool = match &op {
            Operation::CallTool { name, .. } => Some(name.clone()),
            _ => None,
        };
        let fut = self.inner.call(op);

        Box::pin(async move {
            let timeout_ms = ctx.call_timeout_ms;
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    warn!(
                        service = ctx.service_name,
                        call_id = ctx.call_id,
                        session = ctx.session_id.as_ref().map(SessionId::as_str),
                        tool = tool.as_deref(),
                        timeout_ms,
                        "Operation deadline passed, cancelling"
                    );
                    metrics::counter!("tollgate_operation_timeouts_total", "service" => ctx.service_name)
                        .increment(1);
                    Err(OperationError::Timeout { timeout_ms })
                }
            }
        })
    }
}
