//! Request authentication middleware.
//!
//! The gate runs before any business logic. It decides whether a request is
//! admitted and which credential it carries, then binds that credential to the
//! request's execution context for exactly the duration of the downstream
//! handler. Rejections never reach the handler and are never retried.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tollgate_core::{ContextSnapshot, Credential, SessionId};
use tracing::{debug, warn};

use super::config::AuthConfig;
use super::error::AuthError;
use super::mode::AuthMode;
use super::session_store::SessionStore;

/// Session identifier attached to an admitted session-mode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub id: SessionId,
    /// `true` when the server generated `id` for this request and the client
    /// must be told about it.
    pub issued: bool,
}

/// Outcome of a successful admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No per-request credential is bound (preflight, or `disabled` mode).
    Bypass,
    Granted {
        credential: Credential,
        session: Option<SessionGrant>,
    },
}

/// Decides, per request, whether the caller is admitted and with which
/// credential.
#[derive(Debug)]
pub struct AuthenticationGate {
    mode: AuthMode,
    credential_header: HeaderName,
    session_header: HeaderName,
    sessions: Arc<SessionStore>,
}

impl AuthenticationGate {
    #[must_use]
    pub fn new(config: &AuthConfig, sessions: Arc<SessionStore>) -> Self {
        Self {
            mode: config.mode,
            credential_header: config.credential_header.clone(),
            session_header: config.session_header.clone(),
            sessions,
        }
    }

    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    #[must_use]
    pub fn session_header(&self) -> &HeaderName {
        &self.session_header
    }

    /// Pure admission decision for one request.
    ///
    /// # Errors
    ///
    /// Returns the rejection category when the request must not proceed.
    pub fn admit(&self, method: &Method, headers: &HeaderMap) -> Result<Admission, AuthError> {
        if method == Method::OPTIONS {
            return Ok(Admission::Bypass);
        }

        match self.mode {
            AuthMode::Disabled => Ok(Admission::Bypass),
            AuthMode::OAuth => Err(AuthError::UnsupportedMode {
                mode: self.mode.as_str(),
            }),
            AuthMode::Token => {
                let credential = self.credential(headers).ok_or_else(|| self.missing())?;
                Ok(Admission::Granted {
                    credential,
                    session: None,
                })
            }
            AuthMode::Session => self.admit_session(headers),
        }
    }

    fn admit_session(&self, headers: &HeaderMap) -> Result<Admission, AuthError> {
        let credential = self.credential(headers);
        let session_id = header_str(headers, &self.session_header).and_then(SessionId::parse);

        match (credential, session_id) {
            (Some(credential), None) => self.issue_session(SessionId::generate(), credential),
            (Some(credential), Some(id)) => {
                if self.sessions.bind_or_validate(&id, &credential) {
                    Ok(Admission::Granted {
                        credential,
                        session: Some(SessionGrant { id, issued: false }),
                    })
                } else {
                    Err(AuthError::SessionMismatch)
                }
            }
            (None, Some(id)) => match self.sessions.read(&id) {
                Some(credential) => Ok(Admission::Granted {
                    credential,
                    session: Some(SessionGrant { id, issued: false }),
                }),
                None => Err(AuthError::UnknownSession),
            },
            (None, None) => Err(self.missing()),
        }
    }

    /// Binds a freshly generated `id`. An id that is already bound to another
    /// credential is refused rather than handed out.
    fn issue_session(&self, id: SessionId, credential: Credential) -> Result<Admission, AuthError> {
        if !self.sessions.bind_or_validate(&id, &credential) {
            warn!(session_id = %id, "Generated session id collides with a live session");
            return Err(AuthError::SessionMismatch);
        }
        debug!(
            session_id = %id,
            credential = %credential.fingerprint(),
            "Issued new session"
        );
        Ok(Admission::Granted {
            credential,
            session: Some(SessionGrant { id, issued: true }),
        })
    }

    fn credential(&self, headers: &HeaderMap) -> Option<Credential> {
        header_str(headers, &self.credential_header).and_then(Credential::parse)
    }

    fn missing(&self) -> AuthError {
        AuthError::MissingCredential {
            header: self.credential_header.to_string(),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Axum middleware enforcing [`AuthenticationGate`] on protected routes.
/// Attach via `axum::middleware::from_fn_with_state`.
///
/// The admitted credential is installed around every poll of the downstream
/// handler and is gone once the response is produced, whether the handler
/// succeeded, failed, panicked or was dropped. In session mode the
/// [`SessionGrant`] is also stored in the request extensions.
pub async fn authenticate(
    State(gate): State<Arc<AuthenticationGate>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match gate.admit(req.method(), req.headers()) {
        Ok(Admission::Bypass) => next.run(req).await,
        Ok(Admission::Granted {
            credential,
            session,
        }) => {
            if let Some(grant) = &session {
                req.extensions_mut().insert(grant.clone());
            }
            let mut response = ContextSnapshot::of(credential)
                .instrument(next.run(req))
                .await;
            if let Some(SessionGrant { id, issued: true }) = session {
                if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                    response
                        .headers_mut()
                        .insert(gate.session_header.clone(), value);
                }
            }
            response
        }
        Err(rejection) => {
            warn!(
                category = rejection.category(),
                method = %req.method(),
                path = %req.uri().path(),
                mode = %gate.mode,
                "Request rejected by authentication gate"
            );
            metrics::counter!("tollgate_auth_rejections_total", "category" => rejection.category())
                .increment(1);
            rejection.into_response()
        }
    }
}
