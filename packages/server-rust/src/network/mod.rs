//! HTTP surface: configuration, middleware, handlers, server lifecycle, and
//! shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod origin;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use origin::OriginPolicy;
pub use shutdown::*;
