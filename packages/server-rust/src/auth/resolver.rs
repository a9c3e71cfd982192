//! Credential lookup for business operations.

use tollgate_core::{Credential, CredentialContext};
use tracing::error;

use super::error::AuthError;
use super::mode::AuthMode;
use crate::config::ConfigError;

/// Where business operations obtain the credential used for remote calls.
///
/// Fixed when the process runs unauthenticated; otherwise the credential the
/// gate bound to the current request. There is no fallback between the two.
#[derive(Debug, Clone)]
pub enum CredentialResolver {
    Fixed(Credential),
    RequestScoped,
}

impl CredentialResolver {
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFixedCredential`] when `mode` is
    /// `disabled` and no process-wide credential was configured.
    pub fn for_mode(mode: AuthMode, fixed: Option<Credential>) -> Result<Self, ConfigError> {
        if mode.is_per_request() {
            Ok(Self::RequestScoped)
        } else {
            fixed
                .map(Self::Fixed)
                .ok_or(ConfigError::MissingFixedCredential)
        }
    }

    /// # Errors
    ///
    /// Returns [`AuthError::ContextNotEstablished`] when request-scoped and no
    /// credential is bound, which means an operation escaped the gate.
    ///
    /// # Panics
    ///
    /// In debug builds, panics instead of returning that error.
    pub fn resolve(&self) -> Result<Credential, AuthError> {
        match self {
            Self::Fixed(credential) => Ok(credential.clone()),
            Self::RequestScoped => {
                let current = CredentialContext::current();
                if current.is_none() {
                    error!("Business operation ran without a request credential bound");
                }
                debug_assert!(
                    current.is_some(),
                    "request credential context was not established"
                );
                current.ok_or(AuthError::ContextNotEstablished)
            }
        }
    }
}
