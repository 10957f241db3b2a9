//! Observability infrastructure for the agent and the scheduler
//!
//! Provides:
//! - Prometheus metrics for the node agent (probe failures, window fill,
//!   requests served) and the scheduler (decisions, rewards, learning)
//! - Structured JSON logging of domain events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Buckets for the (negative) balance reward
const REWARD_BUCKETS: &[f64] = &[
    -400.0, -200.0, -100.0, -50.0, -25.0, -10.0, -5.0, -1.0, 0.0,
];

static AGENT_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();
static SCHEDULER_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    probe_latency_seconds: Histogram,
    probe_errors: IntCounterVec,
    window_len: IntGaugeVec,
    requests_served: IntCounter,
    request_latency_seconds: Histogram,
    open_connections: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            probe_latency_seconds: register_histogram!(
                "drs_agent_probe_latency_seconds",
                "Time spent reading one metric from the operating system",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            probe_errors: register_int_counter_vec!(
                "drs_agent_probe_errors_total",
                "Probe failures; the window keeps its previous samples",
                &["metric"]
            )
            .expect("Failed to register probe_errors"),

            window_len: register_int_gauge_vec!(
                "drs_agent_window_len",
                "Number of samples currently held per metric window",
                &["metric"]
            )
            .expect("Failed to register window_len"),

            requests_served: register_int_counter!(
                "drs_agent_requests_served_total",
                "Node state replies sent to the scheduler"
            )
            .expect("Failed to register requests_served"),

            request_latency_seconds: register_histogram!(
                "drs_agent_request_latency_seconds",
                "Time from request frame to reply, including warm-up waits",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_latency_seconds"),

            open_connections: register_int_gauge!(
                "drs_agent_open_connections",
                "Scheduler connections currently being served"
            )
            .expect("Failed to register open_connections"),
        }
    }
}

/// Node agent metrics for Prometheus exposition
///
/// A lightweight handle to the process-wide metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_probe_latency(&self, duration_secs: f64) {
        self.inner().probe_latency_seconds.observe(duration_secs);
    }

    pub fn inc_probe_errors(&self, metric: &str) {
        self.inner().probe_errors.with_label_values(&[metric]).inc();
    }

    pub fn set_window_len(&self, metric: &str, len: usize) {
        self.inner()
            .window_len
            .with_label_values(&[metric])
            .set(len as i64);
    }

    pub fn observe_request(&self, duration_secs: f64) {
        self.inner().requests_served.inc();
        self.inner().request_latency_seconds.observe(duration_secs);
    }

    pub fn connection_opened(&self) {
        self.inner().open_connections.inc();
    }

    pub fn connection_closed(&self) {
        self.inner().open_connections.dec();
    }
}

struct SchedulerMetricsInner {
    decisions: IntCounterVec,
    node_request_latency_seconds: Histogram,
    node_errors: IntCounterVec,
    rewards: Histogram,
    last_reward: Gauge,
    learn_steps: IntCounter,
    training_loss: Gauge,
    replay_len: IntGauge,
    episode_step: IntGauge,
    episodes_completed: IntCounter,
    evaluation_failures: IntCounter,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            decisions: register_int_counter_vec!(
                "drs_scheduler_decisions_total",
                "Placement decisions by node and whether the pod cache answered",
                &["node", "cached"]
            )
            .expect("Failed to register decisions"),

            node_request_latency_seconds: register_histogram!(
                "drs_scheduler_node_request_latency_seconds",
                "Round trip of one node state request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register node_request_latency_seconds"),

            node_errors: register_int_counter_vec!(
                "drs_scheduler_node_errors_total",
                "Failed node state requests",
                &["node"]
            )
            .expect("Failed to register node_errors"),

            rewards: register_histogram!(
                "drs_scheduler_reward",
                "Balance reward of evaluated placements",
                REWARD_BUCKETS.to_vec()
            )
            .expect("Failed to register rewards"),

            last_reward: register_gauge!(
                "drs_scheduler_last_reward",
                "Reward of the most recently evaluated placement"
            )
            .expect("Failed to register last_reward"),

            learn_steps: register_int_counter!(
                "drs_scheduler_learn_steps_total",
                "Optimizer steps taken by the placement policy"
            )
            .expect("Failed to register learn_steps"),

            training_loss: register_gauge!(
                "drs_scheduler_training_loss",
                "Mean squared TD error of the last learning step"
            )
            .expect("Failed to register training_loss"),

            replay_len: register_int_gauge!(
                "drs_scheduler_replay_len",
                "Transitions currently held in the replay buffer"
            )
            .expect("Failed to register replay_len"),

            episode_step: register_int_gauge!(
                "drs_scheduler_episode_step",
                "Placements evaluated since the last episode reset"
            )
            .expect("Failed to register episode_step"),

            episodes_completed: register_int_counter!(
                "drs_scheduler_episodes_completed_total",
                "Episodes that reached their length and were reset"
            )
            .expect("Failed to register episodes_completed"),

            evaluation_failures: register_int_counter!(
                "drs_scheduler_evaluation_failures_total",
                "Outcome evaluations dropped because the cluster could not be observed"
            )
            .expect("Failed to register evaluation_failures"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        SCHEDULER_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        SCHEDULER_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn inc_decisions(&self, node: &str, cached: bool) {
        let cached = if cached { "true" } else { "false" };
        self.inner()
            .decisions
            .with_label_values(&[node, cached])
            .inc();
    }

    pub fn observe_node_request(&self, duration_secs: f64) {
        self.inner().node_request_latency_seconds.observe(duration_secs);
    }

    pub fn inc_node_errors(&self, node: &str) {
        self.inner().node_errors.with_label_values(&[node]).inc();
    }

    pub fn observe_reward(&self, reward: f32) {
        self.inner().rewards.observe(reward as f64);
        self.inner().last_reward.set(reward as f64);
    }

    pub fn observe_learn_step(&self, loss: f32) {
        self.inner().learn_steps.inc();
        self.inner().training_loss.set(loss as f64);
    }

    pub fn set_replay_len(&self, len: usize) {
        self.inner().replay_len.set(len as i64);
    }

    pub fn set_episode_step(&self, step: u32) {
        self.inner().episode_step.set(step as i64);
    }

    pub fn inc_episodes_completed(&self) {
        self.inner().episodes_completed.inc();
    }

    pub fn inc_evaluation_failures(&self) {
        self.inner().evaluation_failures.inc();
    }
}

/// Structured logger for scheduler and agent events
///
/// Provides consistent JSON-formatted logging for placements, rewards,
/// episode boundaries and connection changes.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "component_started",
            component = %self.component,
            version = %version,
            "DRS component started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "component_shutdown",
            component = %self.component,
            reason = %reason,
            "DRS component shutting down"
        );
    }

    pub fn log_decision(&self, pod: &str, profile: &str, node: &str, cached: bool) {
        info!(
            event = "decision_made",
            component = %self.component,
            pod = %pod,
            profile = %profile,
            node = %node,
            cached = cached,
            "Placement decided"
        );
    }

    pub fn log_reward(&self, action: usize, reward: f32, episode_step: u32) {
        info!(
            event = "reward_observed",
            component = %self.component,
            action = action,
            reward = reward,
            episode_step = episode_step,
            "Placement outcome evaluated"
        );
    }

    pub fn log_episode_reset(&self, episodes_completed: u64, cleared_pods: usize) {
        info!(
            event = "episode_reset",
            component = %self.component,
            episodes_completed = episodes_completed,
            cleared_pods = cleared_pods,
            "Episode finished, pod cache cleared"
        );
    }

    pub fn log_target_synced(&self, learn_steps: u64) {
        info!(
            event = "target_synced",
            component = %self.component,
            learn_steps = learn_steps,
            "Target network synchronized from eval network"
        );
    }

    pub fn log_node_connection(&self, node: &str, endpoint: &str, connected: bool, attempts: u32) {
        if connected {
            info!(
                event = "node_reconnected",
                component = %self.component,
                node = %node,
                endpoint = %endpoint,
                attempts = attempts,
                "Connected to node agent"
            );
        } else {
            warn!(
                event = "node_disconnected",
                component = %self.component,
                node = %node,
                endpoint = %endpoint,
                attempts = attempts,
                "Lost connection to node agent, will reconnect with backoff"
            );
        }
    }
}
