//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. This separation lets the binary report the bound port
//! before traffic is accepted.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, mcp_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::origin::{enforce_origin, OriginPolicy};
use super::shutdown::ShutdownController;
use crate::auth::{authenticate, AuthConfig, AuthenticationGate, SessionStore};
use crate::service::{OperationPipeline, OperationService};

/// How long `serve()` waits for in-flight requests after the listener closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages the full HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- takes the assembled pipeline and session store
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    auth: AuthConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    sessions: Arc<SessionStore>,
    classifier: Arc<OperationService>,
    pipeline: OperationPipeline,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        auth: AuthConfig,
        sessions: Arc<SessionStore>,
        classifier: Arc<OperationService>,
        pipeline: OperationPipeline,
    ) -> Self {
        Self {
            config,
            auth,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            sessions,
            classifier,
            pipeline,
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- Kubernetes liveness probe
    /// - `GET /health/ready` -- Kubernetes readiness probe
    /// - `POST /mcp` -- JSON-RPC endpoint, behind the authentication gate
    ///
    /// Requests with a disallowed `Origin` are refused before any of these.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            sessions: Arc::clone(&self.sessions),
            classifier: Arc::clone(&self.classifier),
            pipeline: self.pipeline.clone(),
            start_time: Instant::now(),
        };

        let gate = Arc::new(AuthenticationGate::new(
            &self.auth,
            Arc::clone(&self.sessions),
        ));
        let protected = Router::new()
            .route("/mcp", post(mcp_handler))
            .route_layer(from_fn_with_state(gate, authenticate));

        let origins = Arc::new(OriginPolicy::from_config(&self.config));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .merge(protected)
            .layer(build_http_layers(&self.config, &self.auth))
            .layer(from_fn_with_state(origins, enforce_origin))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);
        if self.config.binds_all_interfaces() {
            warn!(
                mode = %self.auth.mode,
                "Listening on all interfaces; make sure the authentication mode matches the exposure"
            );
        }

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// After the shutdown signal:
    /// 1. Health state transitions to Draining and `/mcp` refuses new calls
    /// 2. Waits up to 30 seconds for in-flight requests to complete
    /// 3. Stops the session sweeper and drops every session binding
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, if the TLS
    /// material cannot be loaded, or on a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let shutdown_ctrl = Arc::clone(&self.shutdown);

        // Transition to Ready so readiness probes pass.
        shutdown_ctrl.set_ready();

        let served = if let Some(ref tls_config) = self.config.tls {
            serve_tls(listener, router, tls_config, shutdown).await
        } else {
            serve_plain(listener, router, shutdown).await
        };

        drain(&shutdown_ctrl).await;
        self.sessions.shutdown().await;
        served
    }
}

/// Serves plain HTTP connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Moves to Draining and waits for in-flight requests to finish.
async fn drain(shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();

    let in_flight = shutdown_ctrl.in_flight_count();
    if in_flight > 0 {
        info!("Draining {} in-flight requests", in_flight);
    }

    if shutdown_ctrl.wait_for_drain(DRAIN_TIMEOUT).await {
        info!("All requests drained successfully");
    } else {
        warn!("Drain timeout expired with in-flight requests remaining");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tollgate_core::{Credential, CredentialContext};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{AuthMode, CredentialResolver, SessionConfig};
    use crate::service::domain::{LifecycleService, ToolCatalog, ToolsService};
    use crate::service::{build_operation_pipeline, service_names, OperationRouter, ServiceConfig};
    use crate::traits::{RemoteCall, RemoteError, RemoteInvoker};

    /// Records the credential of every remote call.
    #[derive(Default)]
    struct FakeInvoker {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteInvoker for FakeInvoker {
        async fn invoke(&self, credential: &Credential, _call: RemoteCall) -> Result<Value, RemoteError> {
            self.seen.lock().push(credential.expose().to_string());
            Ok(json!({ "qualitygates": [] }))
        }
    }

    struct Harness {
        module: NetworkModule,
        invoker: Arc<FakeInvoker>,
        sessions: Arc<SessionStore>,
    }

    fn harness(mode: AuthMode, fixed: Option<&str>) -> Harness {
        let auth = AuthConfig {
            mode,
            fixed_credential: fixed.and_then(Credential::parse),
            ..AuthConfig::default()
        };
        let service_config = Arc::new(ServiceConfig::default());
        let invoker = Arc::new(FakeInvoker::default());
        let resolver = CredentialResolver::for_mode(mode, auth.fixed_credential.clone()).unwrap();

        let mut router = OperationRouter::new();
        router.register(service_names::LIFECYCLE, Arc::new(LifecycleService));
        router.register(
            service_names::TOOLS,
            Arc::new(ToolsService::new(
                ToolCatalog::builtin(),
                resolver,
                Arc::clone(&invoker) as Arc<dyn RemoteInvoker>,
            )),
        );

        let sessions = Arc::new(SessionStore::new(&SessionConfig::default()));
        let module = NetworkModule::new(
            NetworkConfig::default(),
            auth,
            Arc::clone(&sessions),
            Arc::new(OperationService::new(Arc::clone(&service_config))),
            build_operation_pipeline(router, &service_config),
        );
        module.shutdown_controller().set_ready();
        Harness {
            module,
            invoker,
            sessions,
        }
    }

    fn tool_call(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::post("/mcp").header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder
            .body(Body::from(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "tools/call",
                    "params": { "name": "list_quality_gates", "arguments": {} }
                })
                .to_string(),
            ))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn new_creates_module_without_binding() {
        let h = harness(AuthMode::Token, None);
        assert!(h.module.listener.is_none());
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let h = harness(AuthMode::Token, None);
        let s1 = h.module.shutdown_controller();
        let s2 = h.module.shutdown_controller();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut h = harness(AuthMode::Token, None);
        let port = h.module.start().await.expect("start should succeed");
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(h.module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let h = harness(AuthMode::Token, None);
        let result = h.module.serve(std::future::pending::<()>()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serve_stops_on_signal_and_clears_sessions() {
        let mut h = harness(AuthMode::Session, None);
        h.sessions.bind_or_validate(
            &tollgate_core::SessionId::parse("s1").unwrap(),
            &Credential::parse("abc").unwrap(),
        );
        h.module.start().await.unwrap();
        let shutdown = h.module.shutdown_controller();

        h.module.serve(async {}).await.unwrap();

        assert_eq!(shutdown.health_state(), crate::network::HealthState::Stopped);
        assert_eq!(h.sessions.size(), 0);
    }

    #[tokio::test]
    async fn health_is_reachable_without_credential() {
        let h = harness(AuthMode::Token, None);
        let response = h
            .module
            .build_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "ready");
    }

    #[tokio::test]
    async fn token_mode_without_credential_is_rejected_before_any_remote_call() {
        let h = harness(AuthMode::Token, None);
        let response = h.module.build_router().oneshot(tool_call(&[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["category"], "missing_credential");
        assert!(h.invoker.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn token_mode_forwards_the_presented_credential() {
        let h = harness(AuthMode::Token, None);
        let response = h
            .module
            .build_router()
            .oneshot(tool_call(&[("token", "abc")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["result"]["isError"], false);
        assert_eq!(*h.invoker.seen.lock(), vec!["abc".to_string()]);
        assert!(CredentialContext::current().is_none());
    }

    #[tokio::test]
    async fn concurrent_requests_never_see_each_other() {
        let h = harness(AuthMode::Token, None);
        let router = h.module.build_router();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                let token = format!("cred-{i}");
                router.oneshot(tool_call(&[("token", token.as_str())])).await.unwrap().status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }

        let mut seen = h.invoker.seen.lock().clone();
        seen.sort();
        let mut expected: Vec<String> = (0..32).map(|i| format!("cred-{i}")).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn session_mode_binds_first_credential() {
        let h = harness(AuthMode::Session, None);
        let router = h.module.build_router();

        let first = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "X")]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().get("mcp-session-id").is_none());

        let hijack = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "Y")]))
            .await
            .unwrap();
        assert_eq!(hijack.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(hijack).await["category"],
            "session_credential_mismatch"
        );

        let again = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "X")]))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::OK);

        let resumed = router
            .oneshot(tool_call(&[("mcp-session-id", "S1")]))
            .await
            .unwrap();
        assert_eq!(resumed.status(), StatusCode::OK);

        assert_eq!(*h.invoker.seen.lock(), vec!["X", "X", "X"]);
    }

    #[tokio::test]
    async fn foreign_origin_is_refused_before_authentication() {
        let h = harness(AuthMode::Token, None);
        let router = h.module.build_router();

        let foreign = router
            .clone()
            .oneshot(tool_call(&[("origin", "https://evil.example"), ("token", "A")]))
            .await
            .unwrap();
        assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
        assert!(h.invoker.seen.lock().is_empty());

        let local = router
            .oneshot(tool_call(&[("origin", "http://localhost:6274"), ("token", "A")]))
            .await
            .unwrap();
        assert_eq!(local.status(), StatusCode::OK);
        assert_eq!(*h.invoker.seen.lock(), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_use_extends_its_lifetime() {
        let h = harness(AuthMode::Session, None);
        let router = h.module.build_router();
        let s1 = tollgate_core::SessionId::parse("S1").unwrap();
        let forty_minutes = Duration::from_secs(40 * 60);

        let bound = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "X")]))
            .await
            .unwrap();
        assert_eq!(bound.status(), StatusCode::OK);

        tokio::time::advance(forty_minutes).await;
        let refreshed = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "X")]))
            .await
            .unwrap();
        assert_eq!(refreshed.status(), StatusCode::OK);

        // Past the one-hour TTL counted from the bind, within it counted from
        // the refresh: the session is still live and still owned by X.
        tokio::time::advance(forty_minutes).await;
        let hijack = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1"), ("token", "Y")]))
            .await
            .unwrap();
        assert_eq!(hijack.status(), StatusCode::UNAUTHORIZED);

        let resumed = router
            .clone()
            .oneshot(tool_call(&[("mcp-session-id", "S1")]))
            .await
            .unwrap();
        assert_eq!(resumed.status(), StatusCode::OK);
        assert_eq!(h.sessions.read(&s1).unwrap().expose(), "X");

        // Idle for a full TTL: gone.
        tokio::time::advance(Duration::from_secs(61 * 60)).await;
        let expired = router
            .oneshot(tool_call(&[("mcp-session-id", "S1")]))
            .await
            .unwrap();
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(*h.invoker.seen.lock(), vec!["X", "X", "X"]);
    }

    #[tokio::test]
    async fn session_mode_issues_an_id_for_new_clients() {
        let h = harness(AuthMode::Session, None);
        let response = h
            .module
            .build_router()
            .oneshot(tool_call(&[("token", "X")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let issued = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let id = tollgate_core::SessionId::parse(&issued).unwrap();
        assert_eq!(h.sessions.read(&id).unwrap().expose(), "X");
    }

    #[tokio::test]
    async fn session_mode_rejects_unknown_session_without_credential() {
        let h = harness(AuthMode::Session, None);
        let response = h
            .module
            .build_router()
            .oneshot(tool_call(&[("mcp-session-id", "ghost")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["category"], "unknown_session");
    }

    #[tokio::test]
    async fn disabled_mode_uses_the_fixed_credential() {
        let h = harness(AuthMode::Disabled, Some("fixed"));
        let response = h
            .module
            .build_router()
            .oneshot(tool_call(&[("token", "ignored")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*h.invoker.seen.lock(), vec!["fixed"]);
    }

    #[tokio::test]
    async fn oauth_mode_rejects_every_request() {
        let h = harness(AuthMode::OAuth, None);
        let response = h
            .module
            .build_router()
            .oneshot(tool_call(&[("token", "abc")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["category"], "unsupported_mode");
        assert!(h.invoker.seen.lock().is_empty());
    }
}
