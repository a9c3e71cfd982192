//! Authentication mode selected at process configuration time.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// How inbound requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Every request carries its own credential header. No session state.
    #[default]
    Token,
    /// A logical connection is authenticated once and later requests refer
    /// back to it by session identifier.
    Session,
    /// Recognised but not implemented: every request is rejected with
    /// `unsupported_mode`.
    OAuth,
    /// No per-request authentication; the process-wide credential is used.
    Disabled,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Session => "session",
            Self::OAuth => "oauth",
            Self::Disabled => "disabled",
        }
    }

    /// Whether business operations take their credential from the request
    /// context (as opposed to the fixed process credential).
    #[must_use]
    pub fn is_per_request(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    /// Case-insensitive. A blank value selects the default (`token`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }
        match value.to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "session" => Ok(Self::Session),
            "oauth" => Ok(Self::OAuth),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err(ConfigError::InvalidAuthMode {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
