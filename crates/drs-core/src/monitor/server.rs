//! TCP server answering node state requests

use super::MetricAgent;
use crate::error::ProtocolError;
use crate::observability::AgentMetrics;
use crate::protocol::{read_frame, write_state_reply, FrameKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Accept scheduler connections until `shutdown` fires.
///
/// Each connection gets its own task. Requests that arrive before the
/// windows are warm wait for warm-up instead of failing.
pub async fn serve(
    listener: TcpListener,
    agent: Arc<MetricAgent>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let metrics = AgentMetrics::new();
    info!(addr = %listener.local_addr()?, "Node state server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let agent = Arc::clone(&agent);
                let metrics = metrics.clone();
                let shutdown = shutdown.resubscribe();
                let span = tracing::info_span!("connection", %peer);
                tokio::spawn(
                    async move {
                        run_connection(stream, peer, agent, metrics, shutdown).await;
                    }
                    .instrument(span),
                );
            }
            _ = shutdown.recv() => {
                info!("Shutting down node state server");
                return Ok(());
            }
        }
    }
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    agent: Arc<MetricAgent>,
    metrics: AgentMetrics,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle on connection");
    }
    metrics.connection_opened();
    info!(%peer, "Scheduler connected");

    tokio::select! {
        result = handle_connection(stream, &agent, &metrics) => match result {
            Ok(()) => info!(%peer, "Scheduler disconnected"),
            Err(e) => warn!(%peer, error = %e, "Closing connection after protocol error"),
        },
        _ = shutdown.recv() => debug!(%peer, "Connection closed on shutdown"),
    }

    metrics.connection_closed();
}

/// Serve requests on one connection until the peer closes it
async fn handle_connection(
    mut stream: TcpStream,
    agent: &MetricAgent,
    metrics: &AgentMetrics,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.split();

    while let Some(frame) = read_frame(&mut reader).await? {
        match frame.kind() {
            FrameKind::StateRequest => {
                let start = Instant::now();
                let state = agent.warm_state().await;
                write_state_reply(&mut writer, &state).await?;
                metrics.observe_request(start.elapsed().as_secs_f64());
                debug!(state = %state, "Served node state");
            }
            other => {
                return Err(ProtocolError::UnexpectedKind {
                    expected: FrameKind::StateRequest.name(),
                    got: other.name(),
                })
            }
        }
    }
    Ok(())
}
