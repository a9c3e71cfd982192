use async_trait::async_trait;
use serde_json::Value;
use tollgate_core::Credential;

/// A single read-only call against the remote analysis API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// API path relative to the configured base URL, e.g. `api/issues/search`.
    pub path: String,
    /// Query parameters in the order they should be sent.
    pub query: Vec<(String, String)>,
}

impl RemoteCall {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Failures from the remote analysis API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote API rejected the credential (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("remote resource not found")]
    NotFound,
    #[error("remote API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote API unreachable: {0}")]
    Transport(String),
    #[error("remote API returned an unreadable body: {0}")]
    Decode(String),
}

/// Outbound client used by business operations. The credential is always
/// passed explicitly; implementations never look it up themselves.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Performs `call` on behalf of `credential` and returns the decoded JSON body.
    async fn invoke(&self, credential: &Credential, call: RemoteCall) -> Result<Value, RemoteError>;
}
