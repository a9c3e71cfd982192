//! Domain services.
//!
//! Each service implements `tower::Service<Operation>` on an `Arc` of itself
//! so the router can clone it per request without copying state.

pub mod catalog;
pub mod lifecycle;
pub mod tools;

pub use catalog::{ToolCatalog, ToolSpec};
pub use lifecycle::LifecycleService;
pub use tools::ToolsService;
