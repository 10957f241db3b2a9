//! DRS scheduler
//!
//! Connects to the four node agents, answers `POST /choose` placement
//! requests with the DQN policy and learns from the load balance each
//! placement leaves behind.

use anyhow::{bail, Context, Result};
use drs_core::{
    aggregator::ClusterStateAggregator,
    client::{NodeStateClient, NodeStateSource},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    policy::{DqnPolicy, ReplayBuffer},
    scheduling::{SchedulingLoop, SubstringClassifier},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often node connection health is re-checked
const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::ServerConfig::load()?;
    info!(
        http_port = config.http_port,
        episode_length = config.episode_length,
        "Scheduler configured"
    );

    let logger = StructuredLogger::new("drs-scheduler");
    logger.log_startup(SCHEDULER_VERSION);

    let health_registry = HealthRegistry::with_not_ready_reason("Connecting to node agents");
    health_registry.register(components::LEARNER).await;
    health_registry.register(components::HTTP_API).await;

    // Every agent must answer at startup
    let client_config = config.client_config();
    let mut clients = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        let client = NodeStateClient::connect(&node.name, &node.address, client_config.clone())
            .await
            .with_context(|| format!("Failed to connect to {} at {}", node.name, node.address))?;
        info!(node = %node.name, endpoint = %node.address, "Connected to node agent");
        health_registry.set_node_link(&node.name, true, 0).await;
        clients.push(Arc::new(client));
    }

    let sources: Vec<Arc<dyn NodeStateSource>> = clients
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn NodeStateSource>)
        .collect();
    let aggregator = Arc::new(ClusterStateAggregator::new(sources)?);

    let policy_config = config.policy_config();
    let mut policy = DqnPolicy::new(policy_config.clone());
    if let Some(path) = policy_config.snapshot_path.as_deref().filter(|p| p.exists()) {
        match ReplayBuffer::load_from_disk(path, policy_config.replay_capacity) {
            Ok(replay) => policy = policy.with_replay(replay),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable replay snapshot"),
        }
    }

    // Fail before learning starts if the API port is taken
    let api_listener = api::bind(config.http_port).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let classifier = Arc::new(SubstringClassifier::from_table(&config.profiles));
    let (scheduler, mut learner) = SchedulingLoop::start(
        aggregator,
        policy,
        classifier,
        config.profiles.clone(),
        config.scheduler_config(),
        &shutdown_tx,
    )
    .await
    .context("Failed to take the initial cluster observation")?;

    health_registry.set_ready(true).await;

    // Report dropped agent connections; the clients reconnect on their own
    {
        let health_registry = health_registry.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LINK_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.recv() => break,
                }
                for client in &clients {
                    let (connected, attempts) = client.connection_stats().await;
                    health_registry
                        .set_node_link(client.node(), connected, attempts)
                        .await;
                }
            }
        });
    }

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), scheduler));
    let mut api_shutdown = shutdown_tx.subscribe();
    let mut api_handle = tokio::spawn(api::serve(api_listener, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let (reason, failure) = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            ("SIGINT received", None)
        }
        result = &mut learner => {
            let message = match result {
                Ok(()) => "learner exited".to_string(),
                Err(e) => e.to_string(),
            };
            error!(error = %message, "Learner stopped");
            health_registry
                .set_unhealthy(components::LEARNER, message.clone())
                .await;
            ("learner stopped", Some(message))
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
    };

    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());
    // Already joined when the API arm fired
    if !api_handle.is_finished() {
        match api_handle.await {
            Ok(Err(e)) => error!(error = %e, "API server failed"),
            Err(e) => error!(error = %e, "API task panicked"),
            Ok(Ok(())) => {}
        }
    }
    info!("Shutting down");

    match failure {
        Some(message) => bail!("{reason}: {message}"),
        None => Ok(()),
    }
}
