//! Core library of the dynamic resource scheduler
//!
//! This crate provides:
//! - Per-node metric sampling and the node state server
//! - The framed node-state protocol and its client
//! - Cluster observation, the DQN placement policy and the scheduling loop
//! - Health checks and observability

pub mod aggregator;
pub mod client;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod policy;
pub mod protocol;
pub mod scheduling;
pub mod window;

pub use error::{NodeError, ProtocolError, SchedulingError, SensorError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, SchedulerMetrics, StructuredLogger};
