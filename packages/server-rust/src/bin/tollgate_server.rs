use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate_server::config::LogFormat;
use tollgate_server::remote::HttpRemoteInvoker;
use tollgate_server::{build_network_module, ServerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerArgs::parse()
        .into_settings()
        .context("invalid configuration")?;
    init_tracing(settings.log_format);

    if let Some(port) = settings.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("installing Prometheus exporter")?;
        info!(port, "Prometheus metrics exporter listening");
    }

    let invoker = HttpRemoteInvoker::new(
        &settings.remote,
        Duration::from_millis(settings.service.default_operation_timeout_ms),
    )?;
    info!(remote = %settings.remote.base_url, "Remote analysis API configured");

    let mut module = build_network_module(&settings, Arc::new(invoker))?;
    let port = module.start().await?;
    info!(port, mode = %settings.auth.mode, "tollgate-server ready");

    module.serve(shutdown_signal()).await?;
    info!("tollgate-server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tollgate_server=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down");
    }
}
