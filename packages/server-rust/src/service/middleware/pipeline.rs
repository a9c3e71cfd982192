//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServiceConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// The fully assembled, cloneable operation pipeline.
pub type OperationPipeline = BoxCloneSyncService<Operation, OperationResponse, OperationError>;

/// Build the operation pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when the server or the caller's credential is
///    at its concurrency limit (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-operation timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
///
/// Clones share the load-shed counters, so both concurrency limits hold
/// across every request.
#[must_use]
pub fn build_operation_pipeline(router: OperationRouter, config: &ServiceConfig) -> OperationPipeline {
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(
                config.max_concurrent_operations,
                config.max_concurrent_per_credential,
            ))
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
