//! `Tollgate` Core: credentials, request-scoped credential context, context
//! propagation across worker hand-offs, and JSON-RPC envelopes.

pub mod context;
pub mod messages;
pub mod propagation;
pub mod types;

pub use context::{ContextGuard, CredentialContext};
pub use messages::{RpcError, RpcRequest, RpcResponse};
pub use propagation::{ContextSnapshot, Propagated};
pub use types::{Credential, SessionId};
