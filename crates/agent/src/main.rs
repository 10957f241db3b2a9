//! DRS node agent
//!
//! Runs on every worker node, keeps short windows of CPU, memory, network
//! and disk readings and answers node state requests from the scheduler.

use anyhow::{bail, Context, Result};
use drs_core::{
    health::{components, HealthRegistry},
    monitor::{serve, MetricAgent, ProbeSet},
    observability::StructuredLogger,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        listen_addr = %config.listen_addr,
        "Agent configured"
    );

    let logger = StructuredLogger::new(format!("drs-agent/{}", config.node_name));
    logger.log_startup(AGENT_VERSION);

    let health_registry = HealthRegistry::with_not_ready_reason("Metric windows warming up");
    health_registry
        .set_degraded(components::SAMPLERS, "Windows warming up")
        .await;
    health_registry.register(components::PROTOCOL_SERVER).await;
    health_registry.register(components::HTTP_API).await;

    let probes = ProbeSet::procfs(
        &config.proc_root,
        config.net_interface.as_deref(),
        &config.disk_devices,
    )
    .context("Failed to initialize metric probes")?;

    let agent = Arc::new(MetricAgent::new(config.monitor_config()));
    let (shutdown_tx, _) = broadcast::channel(1);
    let sampler_handles = agent.spawn_samplers(probes, &shutdown_tx);

    // Flip readiness once every window can produce an average
    {
        let agent = Arc::clone(&agent);
        let health_registry = health_registry.clone();
        tokio::spawn(async move {
            agent.wait_until_warm().await;
            health_registry.set_healthy(components::SAMPLERS).await;
            health_registry.set_ready(true).await;
            info!("Metric windows warm, serving node state");
        });
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let api_listener = api::bind(config.api_port).await?;

    let mut server_handle = tokio::spawn(serve(
        listener,
        Arc::clone(&agent),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), Arc::clone(&agent)));
    let mut api_handle = tokio::spawn(api::serve(api_listener, app_state));

    let (reason, failure) = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            ("SIGINT received", None)
        }
        result = &mut api_handle => {
            let message = match result {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("{e:#}"),
                Err(e) => e.to_string(),
            };
            error!(error = %message, "API server stopped");
            health_registry
                .set_unhealthy(components::HTTP_API, message.clone())
                .await;
            ("API server stopped", Some(message))
        }
        result = &mut server_handle => {
            let message = match result {
                Ok(Ok(())) => "listener closed".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            error!(error = %message, "Node state server stopped");
            health_registry
                .set_unhealthy(components::PROTOCOL_SERVER, message.clone())
                .await;
            ("node state server stopped", Some(message))
        }
    };

    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());
    for handle in sampler_handles {
        let _ = handle.await;
    }
    api_handle.abort();
    info!("Shutting down");

    match failure {
        Some(message) => bail!("{reason}: {message}"),
        None => Ok(()),
    }
}
