//! HTTP surface of the scheduler: placement requests, status, health and metrics

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use drs_core::{
    health::{ComponentStatus, HealthRegistry},
    scheduling::SchedulingLoop,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub scheduler: SchedulingLoop,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, scheduler: SchedulingLoop) -> Self {
        Self {
            health_registry,
            scheduler,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChooseRequest {
    pub podname: String,
}

/// Node for a pod, as plain text (`node1`..`node4`)
async fn choose(State(state): State<Arc<AppState>>, Form(request): Form<ChooseRequest>) -> Response {
    match state.scheduler.decide(&request.podname) {
        Ok(decision) => (StatusCode::OK, decision.node).into_response(),
        Err(e) => {
            warn!(pod = %request.podname, error = %e, "Placement request rejected");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
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
        .route("/choose", post(choose))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
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

pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = ?listener.local_addr().ok(), "Starting scheduler API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use drs_core::aggregator::ClusterStateAggregator;
    use drs_core::client::{async_trait, NodeStateSource};
    use drs_core::policy::{DqnPolicy, PolicyConfig};
    use drs_core::scheduling::{ProfileTable, SchedulerConfig, SubstringClassifier};
    use drs_core::{NodeError, NodeStateVector, SchedulerStatus};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    struct FixedNode {
        name: String,
        load: f64,
    }

    #[async_trait]
    impl NodeStateSource for FixedNode {
        fn node(&self) -> &str {
            &self.name
        }

        async fn get_node_state(&self) -> Result<NodeStateVector, NodeError> {
            Ok(NodeStateVector::from_array([self.load, 20.0, 4.0, 2.0, 64.0, 32.0]))
        }
    }

    async fn test_state(shutdown: &broadcast::Sender<()>) -> Arc<AppState> {
        let sources: Vec<Arc<dyn NodeStateSource>> = (1..=4)
            .map(|i| {
                Arc::new(FixedNode {
                    name: format!("node{}", i),
                    load: 4.0 * i as f64,
                }) as Arc<dyn NodeStateSource>
            })
            .collect();
        let aggregator = Arc::new(ClusterStateAggregator::new(sources).unwrap());
        let profiles = ProfileTable::default();
        let policy = DqnPolicy::new(PolicyConfig {
            seed: Some(11),
            ..PolicyConfig::default()
        });

        let (scheduler, _learner) = SchedulingLoop::start(
            aggregator,
            policy,
            Arc::new(SubstringClassifier::from_table(&profiles)),
            profiles,
            SchedulerConfig {
                settle_delay: Duration::from_secs(60),
                ..SchedulerConfig::default()
            },
            shutdown,
        )
        .await
        .unwrap();

        Arc::new(AppState::new(HealthRegistry::new(), scheduler))
    }

    fn choose_request(pod: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/choose")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("podname={}", pod)))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_choose_returns_node_name_and_caches() {
        let (shutdown, _) = broadcast::channel(1);
        let state = test_state(&shutdown).await;

        let response = create_router(Arc::clone(&state))
            .oneshot(choose_request("video-transcoder-7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let node = body_text(response).await;
        assert!(["node1", "node2", "node3", "node4"].contains(&node.as_str()));

        let again = create_router(Arc::clone(&state))
            .oneshot(choose_request("video-transcoder-7"))
            .await
            .unwrap();
        assert_eq!(body_text(again).await, node);
        assert_eq!(state.scheduler.cached_pods(), 1);

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_choose_without_podname_is_rejected() {
        let (shutdown, _) = broadcast::channel(1);
        let state = test_state(&shutdown).await;

        let request = Request::builder()
            .method("POST")
            .uri("/choose")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("pod=missing-field"))
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_status_reports_decisions() {
        let (shutdown, _) = broadcast::channel(1);
        let state = test_state(&shutdown).await;
        state.scheduler.decide("disk-backup").unwrap();

        let response = create_router(state)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: SchedulerStatus = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(status.cached_pods, 1);
        assert_eq!(status.episode_length, 100);
        assert_eq!(status.transitions_stored, 0);

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_readyz_before_and_after_start() {
        let (shutdown, _) = broadcast::channel(1);
        let state = test_state(&shutdown).await;

        let request = || Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let response = create_router(Arc::clone(&state)).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_ready(true).await;
        let response = create_router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_bind_fails_fast_when_port_taken() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(port).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind API address"));
    }

    #[tokio::test]
    async fn test_serve_answers_until_shutdown() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (shutdown, _) = broadcast::channel(1);
        let state = test_state(&shutdown).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut stop = shutdown.subscribe();
        let server = tokio::spawn(serve(listener, state, async move {
            let _ = stop.recv().await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
