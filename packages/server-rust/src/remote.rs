//! `reqwest`-backed [`RemoteInvoker`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tollgate_core::Credential;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::traits::{RemoteCall, RemoteError, RemoteInvoker};

/// Upper bound on how much of an error body is echoed back in `RemoteError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Calls the remote analysis API over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpRemoteInvoker {
    client: Client,
    base_url: Url,
}

impl HttpRemoteInvoker {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(config: &RemoteConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_with_trailing_slash(&config.base_url),
        })
    }

    /// Resolves `path` against the base URL and appends the query.
    fn url_for(&self, call: &RemoteCall) -> Result<Url, RemoteError> {
        let mut url = self
            .base_url
            .join(call.path.trim_start_matches('/'))
            .map_err(|e| RemoteError::Transport(format!("invalid path `{}`: {e}", call.path)))?;
        if !call.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&call.query);
        }
        Ok(url)
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn base_with_trailing_slash(base: &Url) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[async_trait]
impl RemoteInvoker for HttpRemoteInvoker {
    async fn invoke(&self, credential: &Credential, call: RemoteCall) -> Result<Value, RemoteError> {
        let url = self.url_for(&call)?;
        debug!(path = %call.path, "Remote call");

        let response = self
            .client
            .get(url)
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteError::Unauthorized {
                    status: status.as_u16(),
                })
            }
            StatusCode::NOT_FOUND => return Err(RemoteError::NotFound),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::Status {
                    status: s.as_u16(),
                    body: truncate(body),
                });
            }
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker(base: &str) -> HttpRemoteInvoker {
        let config = RemoteConfig::parse(base).unwrap();
        HttpRemoteInvoker::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_keeps_base_path_and_encodes_query() {
        let inv = invoker("https://analysis.example.com/sonar");
        let call = RemoteCall::new("api/issues/search")
            .param("projects", "a,b")
            .param("q", "x y");
        let url = inv.url_for(&call).unwrap();
        assert_eq!(
            url.as_str(),
            "https://analysis.example.com/sonar/api/issues/search?projects=a%2Cb&q=x+y"
        );
    }

    #[test]
    fn leading_slash_in_path_is_relative() {
        let inv = invoker("https://analysis.example.com/");
        let url = inv.url_for(&RemoteCall::new("/api/system/health")).unwrap();
        assert_eq!(url.as_str(), "https://analysis.example.com/api/system/health");
    }

    #[test]
    fn error_bodies_are_truncated_on_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let truncated = truncate(body);
        assert!(truncated.len() <= MAX_ERROR_BODY);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let inv = invoker("http://127.0.0.1:9");
        let err = inv
            .invoke(&Credential::parse("abc").unwrap(), RemoteCall::new("api/system/health"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
    }
}
