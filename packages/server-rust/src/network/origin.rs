//! `Origin` validation against DNS rebinding.
//!
//! A browser page on a foreign site can reach a server bound to a local
//! address once an attacker-controlled hostname resolves there. CORS alone
//! does not stop such requests (it only withholds the allow headers from the
//! response), so requests carrying a disallowed `Origin` are refused with 403
//! before they reach the authentication gate.
//!
//! Requests without an `Origin` header (non-browser clients, health checks)
//! are not affected.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use reqwest::Url;
use tracing::warn;

use super::config::NetworkConfig;

/// Hosts accepted in the `Origin` of a browser talking to a loopback bind.
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Which browser origins may call the server.
///
/// - bound to every interface, or `*` configured: any origin;
/// - bound to a loopback address: `http(s)://localhost|127.0.0.1|[::1]` on any
///   port, plus the configured origins;
/// - any other bind: only the configured origins.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    any: bool,
    local: bool,
    listed: Vec<String>,
}

impl OriginPolicy {
    #[must_use]
    pub fn from_config(config: &NetworkConfig) -> Self {
        let any =
            config.binds_all_interfaces() || config.cors_origins.iter().any(|o| o.trim() == "*");
        let listed = config
            .cors_origins
            .iter()
            .map(|o| normalize(o))
            .filter(|o| !o.is_empty() && o != "*")
            .collect();
        Self {
            any,
            local: config.binds_loopback(),
            listed,
        }
    }

    /// Whether every origin is accepted.
    #[must_use]
    pub fn allows_any(&self) -> bool {
        self.any
    }

    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        if self.any {
            return true;
        }
        let origin = normalize(origin);
        self.listed.iter().any(|o| *o == origin) || (self.local && is_local_origin(&origin))
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Exact host comparison, so `http://localhost.evil.example` is not local.
fn is_local_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| LOCAL_HOSTS.contains(&host))
}

/// Axum middleware refusing requests whose `Origin` the policy rejects.
/// Attach via `axum::middleware::from_fn_with_state` outside the CORS layer,
/// so disallowed preflights are refused too.
pub async fn enforce_origin(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(origin) = req.headers().get(header::ORIGIN) {
        if !origin.to_str().is_ok_and(|o| policy.allows(o)) {
            warn!(
                origin = ?origin,
                method = %req.method(),
                path = %req.uri().path(),
                "Rejected request from disallowed origin"
            );
            metrics::counter!("tollgate_origin_rejections_total").increment(1);
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }
    next.run(req).await
}
