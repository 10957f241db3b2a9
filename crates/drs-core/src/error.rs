//! Error types for the node agent and the scheduler
//!
//! Domain failures are typed so callers can decide between retrying,
//! rejecting a placement, or aborting startup. Binaries wrap these in
//! `anyhow` at the edges.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A probe could not produce a reading. The sampling loop skips the push.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {file}: {reason}")]
    Malformed { file: &'static str, reason: String },

    #[error("no time elapsed since the previous {0} reading")]
    NoElapsedTime(&'static str),

    #[error("probe task failed: {0}")]
    Task(String),
}

/// Wire protocol violations between the scheduler and a node agent.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown frame kind: {0:#06x}")]
    UnknownKind(u16),

    #[error("unexpected frame kind: expected {expected}, got {got}")]
    UnexpectedKind {
        expected: &'static str,
        got: &'static str,
    },

    #[error("payload length {got} does not match expected {expected}")]
    PayloadLength { expected: usize, got: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("field {0} of node state is not a finite number")]
    NonFinite(usize),

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to a single node agent.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("node {node} did not answer within {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    #[error("node {node} is backing off, next reconnect in {remaining:?}")]
    BackingOff { node: String, remaining: Duration },

    #[error("protocol error from node {node}: {source}")]
    Protocol {
        node: String,
        #[source]
        source: ProtocolError,
    },
}

/// Failures of the scheduling loop itself.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("expected {expected} node sources, got {got}")]
    NodeCount { expected: usize, got: usize },

    #[error("no cluster observation has been collected yet")]
    NoObservation,

    #[error("cluster observation unavailable: {0}")]
    Observation(#[from] NodeError),
}
