//! Operation routing and execution framework.
//!
//! This module implements the service-oriented operation pipeline:
//!
//! 1. **Classification** (`classify`): `RpcRequest` -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (timeout, metrics, load-shedding)
//! 3. **Routing** (`router`): Dispatch to domain services by `service_name`
//! 4. **Domain services** (`domain`): lifecycle handshake and remote-backed tools
//! 5. **Background workers** (`worker`): Periodic tasks (session sweeping)

pub mod classify;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use classify::OperationService;
pub use config::ServiceConfig;
pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{
    service_names, ClassifyError, Operation, OperationContext, OperationError, OperationResponse,
};
pub use router::OperationRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker};
