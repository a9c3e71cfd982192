//! HTTP handler definitions for the Tollgate server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod mcp;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use mcp::mcp_handler;

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::auth::SessionStore;
use crate::service::{OperationPipeline, OperationService};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Session-to-credential bindings, reported by `/health`.
    pub sessions: Arc<SessionStore>,
    /// Turns JSON-RPC requests into typed operations.
    pub classifier: Arc<OperationService>,
    /// Load shedding, timeout and metrics around the operation router.
    pub pipeline: OperationPipeline,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
