//! Wires validated [`Settings`] into a ready-to-start [`NetworkModule`].

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::auth::{AuthMode, CredentialResolver, SessionStore};
use crate::config::Settings;
use crate::network::NetworkModule;
use crate::service::domain::{LifecycleService, ToolCatalog, ToolsService};
use crate::service::{
    build_operation_pipeline, service_names, OperationRouter, OperationService,
};
use crate::traits::RemoteInvoker;

/// Builds the session store, credential resolver, domain services and
/// operation pipeline, and hands them to a new [`NetworkModule`].
///
/// The session sweeper is only started in `session` mode; other modes keep
/// an empty store so `/health` can still report a count.
///
/// # Errors
///
/// Returns an error when `disabled` mode has no process-wide credential.
///
/// # Panics
///
/// Panics if called outside a tokio runtime in `session` mode.
pub fn build_network_module(
    settings: &Settings,
    invoker: Arc<dyn RemoteInvoker>,
) -> anyhow::Result<NetworkModule> {
    let auth = &settings.auth;
    let resolver = CredentialResolver::for_mode(auth.mode, auth.fixed_credential.clone())
        .context("resolving the credential source")?;

    let sessions = Arc::new(if auth.mode == AuthMode::Session {
        SessionStore::start(&auth.session)
    } else {
        SessionStore::new(&auth.session)
    });

    let catalog = ToolCatalog::builtin();
    info!(mode = %auth.mode, tools = catalog.len(), "Assembling operation pipeline");

    let mut router = OperationRouter::new();
    router.register(service_names::LIFECYCLE, Arc::new(LifecycleService));
    router.register(
        service_names::TOOLS,
        Arc::new(ToolsService::new(catalog, resolver, invoker)),
    );

    let service_config = Arc::new(settings.service.clone());
    let pipeline = build_operation_pipeline(router, &service_config);
    let classifier = Arc::new(OperationService::new(service_config));

    Ok(NetworkModule::new(
        settings.network.clone(),
        auth.clone(),
        sessions,
        classifier,
        pipeline,
    ))
}
