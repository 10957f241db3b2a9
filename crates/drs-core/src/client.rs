//! Scheduler-side connection to a node agent
//!
//! One long-lived TCP connection per node. A request writes one request
//! frame and reads exactly one reply under a bounded timeout. Any failure
//! drops the connection; the next request reconnects once the exponential
//! backoff has elapsed.

use crate::error::{NodeError, ProtocolError};
use crate::models::NodeStateVector;
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::protocol::{decode_state_reply, read_frame, write_request};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Anything that can report the current state of one node
#[async_trait]
pub trait NodeStateSource: Send + Sync {
    /// Node identifier, e.g. "node1"
    fn node(&self) -> &str;

    async fn get_node_state(&self) -> Result<NodeStateVector, NodeError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Bound on one request/reply exchange
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct ConnectionState {
    stream: Option<TcpStream>,
    reconnect_attempts: u32,
    current_backoff: Duration,
    /// Earliest instant a reconnect may be tried
    next_attempt: Option<Instant>,
}

pub struct NodeStateClient {
    node: String,
    endpoint: String,
    config: ClientConfig,
    /// Held for the whole exchange: one request in flight per connection
    state: Mutex<ConnectionState>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl NodeStateClient {
    /// Connect to a node agent. Failing here is a startup error.
    pub async fn connect(
        node: impl Into<String>,
        endpoint: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, NodeError> {
        let node = node.into();
        let endpoint = endpoint.into();
        let stream = open_stream(&node, &endpoint, config.connect_timeout).await?;
        debug!(node = %node, endpoint = %endpoint, "Connected to node agent");

        Ok(Self {
            state: Mutex::new(ConnectionState {
                stream: Some(stream),
                reconnect_attempts: 0,
                current_backoff: config.initial_backoff,
                next_attempt: None,
            }),
            node,
            endpoint,
            config,
            metrics: SchedulerMetrics::new(),
            logger: StructuredLogger::new("node_client"),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.stream.is_some()
    }

    /// (connected, failed reconnect attempts since the last success)
    pub async fn connection_stats(&self) -> (bool, u32) {
        let state = self.state.lock().await;
        (state.stream.is_some(), state.reconnect_attempts)
    }

    fn handle_connection_failure(&self, state: &mut ConnectionState, error: &NodeError) {
        state.stream = None;
        state.reconnect_attempts += 1;
        state.next_attempt = Some(Instant::now() + state.current_backoff);
        state.current_backoff =
            std::cmp::min(state.current_backoff * 2, self.config.max_backoff);

        self.metrics.inc_node_errors(&self.node);
        warn!(node = %self.node, error = %error, "Node state request failed");
        self.logger.log_node_connection(
            &self.node,
            &self.endpoint,
            false,
            state.reconnect_attempts,
        );
    }

    async fn reconnect(&self, state: &mut ConnectionState) -> Result<TcpStream, NodeError> {
        if let Some(next) = state.next_attempt {
            let now = Instant::now();
            if now < next {
                return Err(NodeError::BackingOff {
                    node: self.node.clone(),
                    remaining: next - now,
                });
            }
        }

        match open_stream(&self.node, &self.endpoint, self.config.connect_timeout).await {
            Ok(stream) => {
                self.logger.log_node_connection(
                    &self.node,
                    &self.endpoint,
                    true,
                    state.reconnect_attempts,
                );
                state.reconnect_attempts = 0;
                state.current_backoff = self.config.initial_backoff;
                state.next_attempt = None;
                Ok(stream)
            }
            Err(e) => {
                self.handle_connection_failure(state, &e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl NodeStateSource for NodeStateClient {
    fn node(&self) -> &str {
        &self.node
    }

    async fn get_node_state(&self) -> Result<NodeStateVector, NodeError> {
        let mut state = self.state.lock().await;
        let mut stream = match state.stream.take() {
            Some(stream) => stream,
            None => self.reconnect(&mut state).await?,
        };

        let start = Instant::now();
        let result = match timeout(self.config.request_timeout, exchange(&mut stream)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(ProtocolError::Io(e))) => Err(NodeError::Unreachable {
                node: self.node.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(source)) => Err(NodeError::Protocol {
                node: self.node.clone(),
                source,
            }),
            Err(_) => Err(NodeError::Timeout {
                node: self.node.clone(),
                timeout: self.config.request_timeout,
            }),
        };

        match result {
            Ok(vector) => {
                self.metrics
                    .observe_node_request(start.elapsed().as_secs_f64());
                state.stream = Some(stream);
                Ok(vector)
            }
            // A stream that failed mid-exchange may hold half a frame
            Err(e) => {
                self.handle_connection_failure(&mut state, &e);
                Err(e)
            }
        }
    }
}

async fn open_stream(node: &str, endpoint: &str, limit: Duration) -> Result<TcpStream, NodeError> {
    let stream = match timeout(limit, TcpStream::connect(endpoint)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(NodeError::Unreachable {
                node: node.to_string(),
                reason: format!("connect to {endpoint}: {e}"),
            })
        }
        Err(_) => {
            return Err(NodeError::Timeout {
                node: node.to_string(),
                timeout: limit,
            })
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(node = %node, error = %e, "Could not disable Nagle");
    }
    Ok(stream)
}

/// One request/reply round trip
async fn exchange(stream: &mut TcpStream) -> Result<NodeStateVector, ProtocolError> {
    write_request(stream).await?;
    match read_frame(stream).await? {
        Some(frame) => decode_state_reply(&frame),
        None => Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "node agent closed the connection",
        ))),
    }
}
