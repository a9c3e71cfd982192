//! Authentication and session configuration.

use std::time::Duration;

use axum::http::HeaderName;
use tollgate_core::Credential;

use super::mode::AuthMode;

/// Default header carrying the client credential.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "token";
/// Default header carrying the session identifier in session-bound mode.
pub const DEFAULT_SESSION_HEADER: &str = "mcp-session-id";

/// Session store policy. These are policy constants, not protocol requirements.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum idle time before a session is considered expired.
    pub ttl: Duration,
    /// Interval between background sweeps, independent of `ttl`.
    pub sweep_interval: Duration,
    /// How long `shutdown` waits for an in-flight sweep before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Everything the authentication gate and resolver need.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub credential_header: HeaderName,
    pub session_header: HeaderName,
    /// Process-wide credential, used in `disabled` mode.
    pub fixed_credential: Option<Credential>,
    pub session: SessionConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            credential_header: HeaderName::from_static(DEFAULT_CREDENTIAL_HEADER),
            session_header: HeaderName::from_static(DEFAULT_SESSION_HEADER),
            fixed_credential: None,
            session: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn auth_config_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.mode, AuthMode::Token);
        assert_eq!(config.credential_header.as_str(), "token");
        assert_eq!(config.session_header.as_str(), "mcp-session-id");
        assert!(config.fixed_credential.is_none());
    }
}
