//! Periodic sampling of a single metric into its window

use super::{MetricKind, MetricProbe};
use crate::error::SensorError;
use crate::observability::AgentMetrics;
use crate::window::MetricWindow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of one sampling attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Reading stored; window length after the push
    Pushed(usize),
    /// Probe failed; window left as it was
    Skipped,
}

/// Loop that reads one probe at a fixed interval and feeds one window
pub struct SamplingLoop<const W: usize> {
    kind: MetricKind,
    probe: Arc<dyn MetricProbe<W>>,
    window: Arc<MetricWindow<W>>,
    interval: Duration,
    /// Woken after every successful push so warm-up waiters can re-check
    pushed: Arc<Notify>,
    metrics: AgentMetrics,
}

impl<const W: usize> SamplingLoop<W> {
    pub fn new(
        kind: MetricKind,
        probe: Arc<dyn MetricProbe<W>>,
        window: Arc<MetricWindow<W>>,
        interval: Duration,
        pushed: Arc<Notify>,
    ) -> Self {
        Self {
            kind,
            probe,
            window,
            interval,
            pushed,
            metrics: AgentMetrics::new(),
        }
    }

    /// Take one reading and push it, or count the failure and keep the
    /// previous window contents.
    pub async fn sample_once(&self) -> SampleOutcome {
        let probe = Arc::clone(&self.probe);
        let start = Instant::now();
        let reading = tokio::task::spawn_blocking(move || probe.sample())
            .await
            .unwrap_or_else(|e| Err(SensorError::Task(e.to_string())));
        self.metrics
            .observe_probe_latency(start.elapsed().as_secs_f64());

        match reading {
            Ok(sample) => {
                let len = self.window.push(sample);
                self.metrics.set_window_len(self.kind.as_str(), len);
                self.pushed.notify_waiters();
                SampleOutcome::Pushed(len)
            }
            Err(e) => {
                warn!(metric = %self.kind, error = %e, "Probe failed, keeping previous samples");
                self.metrics.inc_probe_errors(self.kind.as_str());
                SampleOutcome::Skipped
            }
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            metric = %self.kind,
            interval_ms = self.interval.as_millis() as u64,
            "Starting sampling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.sample_once().await == SampleOutcome::Skipped {
                        failures += 1;
                        debug!(metric = %self.kind, failures, "Sampling failure count");
                    }
                }
                _ = shutdown.recv() => {
                    info!(metric = %self.kind, "Shutting down sampling loop");
                    break;
                }
            }
        }
    }
}
