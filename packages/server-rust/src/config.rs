//! Process configuration: command-line / environment parsing and validation.
//!
//! [`ServerArgs`] is the raw clap surface. [`ServerArgs::into_settings`]
//! validates it into typed [`Settings`] before anything is started, so an
//! invalid value stops the process with a [`ConfigError`] instead of
//! surfacing on the first request.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderName;
use clap::{Parser, ValueEnum};
use reqwest::Url;
use tollgate_core::Credential;

use crate::auth::{AuthConfig, AuthMode, SessionConfig};
use crate::network::{NetworkConfig, TlsConfig};
use crate::service::config::ServiceConfig;

/// Configuration errors, reported before the server starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid authentication mode: {value}. Valid values are: token, session, oauth, disabled")]
    InvalidAuthMode { value: String },
    #[error("authentication mode `disabled` requires a credential (--credential / TOLLGATE_CREDENTIAL)")]
    MissingFixedCredential,
    #[error("invalid header name `{value}` for {flag}")]
    InvalidHeaderName { flag: &'static str, value: String },
    #[error("credential and session headers must differ, both are `{value}`")]
    DuplicateHeaderName { value: String },
    #[error("invalid remote URL `{value}`: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("--tls-cert and --tls-key must be given together")]
    IncompleteTls,
    #[error("{flag} must be greater than zero")]
    Zero { flag: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Command-line arguments for `tollgate-server`. Every flag can also be set
/// through its `TOLLGATE_*` environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "tollgate-server", version, about = "Credential-scoped analysis API gateway")]
pub struct ServerArgs {
    #[arg(long, env = "TOLLGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "TOLLGATE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// token | session | oauth | disabled
    #[arg(long, env = "TOLLGATE_AUTH_MODE", default_value = "token")]
    pub auth_mode: String,

    /// Process-wide credential, required when auth mode is `disabled`.
    #[arg(long, env = "TOLLGATE_CREDENTIAL", hide_env_values = true)]
    pub credential: Option<String>,

    #[arg(long, env = "TOLLGATE_CREDENTIAL_HEADER", default_value = crate::auth::config::DEFAULT_CREDENTIAL_HEADER)]
    pub credential_header: String,

    #[arg(long, env = "TOLLGATE_SESSION_HEADER", default_value = crate::auth::config::DEFAULT_SESSION_HEADER)]
    pub session_header: String,

    #[arg(long, env = "TOLLGATE_SESSION_TTL_SECS", default_value_t = 3600)]
    pub session_ttl_secs: u64,

    #[arg(long, env = "TOLLGATE_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Base URL of the remote analysis API.
    #[arg(long, env = "TOLLGATE_REMOTE_URL")]
    pub remote_url: String,

    /// Extra browser origins allowed to call the server (`*` for any). Local
    /// origins are always allowed on a loopback bind.
    #[arg(long = "cors-origin", env = "TOLLGATE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "TOLLGATE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "TOLLGATE_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    pub operation_timeout_ms: u64,

    #[arg(long, env = "TOLLGATE_MAX_CONCURRENT_OPERATIONS", default_value_t = 1000)]
    pub max_concurrent_operations: u32,

    /// Concurrent operations allowed for one credential before its calls are shed.
    #[arg(long, env = "TOLLGATE_MAX_CONCURRENT_PER_CREDENTIAL", default_value_t = 64)]
    pub max_concurrent_per_credential: u32,

    #[arg(long, env = "TOLLGATE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "TOLLGATE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Serve Prometheus metrics on this port when set.
    #[arg(long, env = "TOLLGATE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[arg(long, env = "TOLLGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Remote analysis API endpoint.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub user_agent: String,
}

impl RemoteConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] unless `raw` is an absolute
    /// `http` or `https` URL.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            value: raw.to_string(),
            reason,
        };
        let base_url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", base_url.scheme())));
        }
        Ok(Self {
            base_url,
            user_agent: format!("tollgate/{}", env!("CARGO_PKG_VERSION")),
        })
    }
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub service: ServiceConfig,
    pub remote: RemoteConfig,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

impl ServerArgs {
    /// Validates the raw arguments.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let mode: AuthMode = self.auth_mode.parse()?;
        let fixed_credential = self.credential.as_deref().and_then(Credential::parse);
        if mode == AuthMode::Disabled && fixed_credential.is_none() {
            return Err(ConfigError::MissingFixedCredential);
        }

        let credential_header = parse_header("--credential-header", &self.credential_header)?;
        let session_header = parse_header("--session-header", &self.session_header)?;
        if credential_header == session_header {
            return Err(ConfigError::DuplicateHeaderName {
                value: credential_header.to_string(),
            });
        }

        let session = SessionConfig {
            ttl: non_zero_secs("--session-ttl-secs", self.session_ttl_secs)?,
            sweep_interval: non_zero_secs("--sweep-interval-secs", self.sweep_interval_secs)?,
            ..SessionConfig::default()
        };

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                flag: "--operation-timeout-ms",
            });
        }
        if self.max_concurrent_operations == 0 {
            return Err(ConfigError::Zero {
                flag: "--max-concurrent-operations",
            });
        }
        if self.max_concurrent_per_credential == 0 {
            return Err(ConfigError::Zero {
                flag: "--max-concurrent-per-credential",
            });
        }

        Ok(Settings {
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                tls,
                cors_origins: self.cors_origins,
                request_timeout: non_zero_secs("--request-timeout-secs", self.request_timeout_secs)?,
            },
            auth: AuthConfig {
                mode,
                credential_header,
                session_header,
                fixed_credential,
                session,
            },
            service: ServiceConfig {
                default_operation_timeout_ms: self.operation_timeout_ms,
                max_concurrent_operations: self.max_concurrent_operations,
                max_concurrent_per_credential: self.max_concurrent_per_credential,
            },
            remote: RemoteConfig::parse(&self.remote_url)?,
            metrics_port: self.metrics_port,
            log_format: self.log_format,
        })
    }
}

fn parse_header(flag: &'static str, value: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(value.trim().as_bytes()).map_err(|_| ConfigError::InvalidHeaderName {
        flag,
        value: value.to_string(),
    })
}

fn non_zero_secs(flag: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        Err(ConfigError::Zero { flag })
    } else {
        Ok(Duration::from_secs(secs))
    }
}
