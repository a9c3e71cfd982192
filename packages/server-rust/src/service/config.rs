/// Configuration for the operation pipeline.
///
/// Controls operation timeouts and the concurrency limits enforced by load shedding.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Maximum number of concurrent operations for a single credential.
    pub max_concurrent_per_credential: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            max_concurrent_per_credential: 64,
        }
    }
}
