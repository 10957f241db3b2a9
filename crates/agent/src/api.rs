//! HTTP API for health checks, Prometheus metrics and the current node state

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use drs_core::{
    health::{ComponentStatus, HealthRegistry},
    monitor::MetricAgent,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub agent: Arc<MetricAgent>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, agent: Arc<MetricAgent>) -> Self {
        Self {
            health_registry,
            agent,
        }
    }
}

/// 200 while operational, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 once every metric window is warm
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Smoothed node state, the same values a scheduler request would get
async fn node_state(State(state): State<Arc<AppState>>) -> Response {
    let windows: serde_json::Map<String, serde_json::Value> = state
        .agent
        .window_lengths()
        .iter()
        .map(|(kind, len)| (kind.as_str().to_string(), json!(len)))
        .collect();

    if !state.agent.is_warm() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "warm": false, "windows": windows })),
        )
            .into_response();
    }

    match state.agent.state() {
        Some(vector) => Json(json!({ "warm": true, "windows": windows, "state": vector })).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/state", get(node_state))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind the API port; fails fast when the address is taken
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API address {}", addr))
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = ?listener.local_addr().ok(), "Starting API server");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use drs_core::health::components;
    use drs_core::monitor::{MetricProbe, MonitorConfig, ProbeSet};
    use drs_core::SensorError;
    use tower::ServiceExt;

    struct Constant<const W: usize>([f64; W]);

    impl<const W: usize> MetricProbe<W> for Constant<W> {
        fn sample(&self) -> Result<[f64; W], SensorError> {
            Ok(self.0)
        }
    }

    fn probes() -> ProbeSet {
        ProbeSet {
            cpu: Arc::new(Constant([12.0])),
            memory: Arc::new(Constant([48.0])),
            network: Arc::new(Constant([3.0, 1.0])),
            disk_io: Arc::new(Constant([256.0, 128.0])),
        }
    }

    fn test_state() -> Arc<AppState> {
        let agent = Arc::new(MetricAgent::new(MonitorConfig::default()));
        Arc::new(AppState::new(
            HealthRegistry::with_not_ready_reason("Metric windows warming up"),
            agent,
        ))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_healthz_returns_ok_when_healthy() {
        let state = test_state();
        state.health_registry.register(components::SAMPLERS).await;

        assert_eq!(get_status(create_router(state), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz_returns_503_when_server_failed() {
        let state = test_state();
        state
            .health_registry
            .set_unhealthy(components::PROTOCOL_SERVER, "listener closed")
            .await;

        assert_eq!(
            get_status(create_router(state), "/healthz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_readyz_follows_warm_up() {
        let state = test_state();
        assert_eq!(
            get_status(create_router(Arc::clone(&state)), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health_registry.set_ready(true).await;
        assert_eq!(get_status(create_router(state), "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_state_endpoint_after_warm_up() {
        let state = test_state();
        assert_eq!(
            get_status(create_router(Arc::clone(&state)), "/state").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let samplers = state.agent.samplers(probes());
        for _ in 0..2 {
            samplers.cpu.sample_once().await;
            samplers.memory.sample_once().await;
            samplers.network.sample_once().await;
            samplers.disk_io.sample_once().await;
        }

        let response = create_router(state)
            .oneshot(Request::builder().uri("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"]["cpu_percent"], 12.0);
        assert_eq!(json["windows"]["disk_io"], 2);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        drs_core::AgentMetrics::new().inc_probe_errors("cpu");
        let response = create_router(test_state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("drs_agent_probe_errors_total"));
    }

    #[tokio::test]
    async fn test_bind_fails_fast_when_port_taken() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(port).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind API address"));
    }
}
