//! Request authentication, session binding, and credential resolution.

pub mod config;
pub mod error;
pub mod gate;
pub mod mode;
pub mod resolver;
pub mod session_store;

pub use config::{AuthConfig, SessionConfig};
pub use error::AuthError;
pub use gate::{authenticate, Admission, AuthenticationGate, SessionGrant};
pub use mode::AuthMode;
pub use resolver::CredentialResolver;
pub use session_store::SessionStore;
