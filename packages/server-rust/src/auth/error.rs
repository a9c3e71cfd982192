//! Authentication failure taxonomy and its HTTP rendering.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Realm advertised in `WWW-Authenticate` on every rejection.
pub const AUTH_REALM: &str = "Bearer realm=\"tollgate\"";

/// Why a request was not allowed to reach business logic, or why a business
/// operation could not obtain a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("credential required, provide it via the {header} header")]
    MissingCredential { header: String },
    #[error("session is already bound to a different credential")]
    SessionMismatch,
    #[error("unknown or expired session, re-authenticate with a credential")]
    UnknownSession,
    #[error("authentication mode `{mode}` is not supported")]
    UnsupportedMode { mode: &'static str },
    /// A business operation ran without the gate having bound a credential.
    /// This is a wiring defect, not a client error.
    #[error("no credential bound to the current request context")]
    ContextNotEstablished,
}

impl AuthError {
    /// Stable, machine-parseable rejection category.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingCredential { .. } => "missing_credential",
            Self::SessionMismatch => "session_credential_mismatch",
            Self::UnknownSession => "unknown_session",
            Self::UnsupportedMode { .. } => "unsupported_mode",
            Self::ContextNotEstablished => "context_not_established",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ContextNotEstablished => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": if status == StatusCode::UNAUTHORIZED { "unauthorized" } else { "internal_error" },
            "category": self.category(),
            "error_description": self.to_string(),
        }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
        }
        response
    }
}
