//! Metric windows of one node and the smoothed state computed from them

use super::sampler::SamplingLoop;
use super::{round2, MetricKind, ProbeSet};
use crate::models::NodeStateVector;
use crate::window::{PairWindow, ScalarWindow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between two readings of the same metric (default: 500ms)
    pub sample_interval: Duration,
    /// Samples kept per metric (default: 10)
    pub window_capacity: usize,
    /// Most recent samples averaged into a reply (default: 2)
    pub average_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            window_capacity: 10,
            average_len: 2,
        }
    }
}

/// One sampling loop per metric, not yet spawned
pub struct Samplers {
    pub cpu: SamplingLoop<1>,
    pub memory: SamplingLoop<1>,
    pub network: SamplingLoop<2>,
    pub disk_io: SamplingLoop<2>,
}

/// Owns the four metric windows of a node
pub struct MetricAgent {
    config: MonitorConfig,
    cpu: Arc<ScalarWindow>,
    memory: Arc<ScalarWindow>,
    network: Arc<PairWindow>,
    disk_io: Arc<PairWindow>,
    pushed: Arc<Notify>,
}

impl MetricAgent {
    /// Capacity is at least 1 and `average_len` is kept within `1..=capacity`,
    /// otherwise warm-up could never complete.
    pub fn new(mut config: MonitorConfig) -> Self {
        config.window_capacity = config.window_capacity.max(1);
        config.average_len = config.average_len.clamp(1, config.window_capacity);
        let capacity = config.window_capacity;
        Self {
            config,
            cpu: Arc::new(ScalarWindow::new(capacity)),
            memory: Arc::new(ScalarWindow::new(capacity)),
            network: Arc::new(PairWindow::new(capacity)),
            disk_io: Arc::new(PairWindow::new(capacity)),
            pushed: Arc::new(Notify::new()),
        }
    }

    pub fn samplers(&self, probes: ProbeSet) -> Samplers {
        let interval = self.config.sample_interval;
        Samplers {
            cpu: SamplingLoop::new(
                MetricKind::Cpu,
                probes.cpu,
                Arc::clone(&self.cpu),
                interval,
                Arc::clone(&self.pushed),
            ),
            memory: SamplingLoop::new(
                MetricKind::Memory,
                probes.memory,
                Arc::clone(&self.memory),
                interval,
                Arc::clone(&self.pushed),
            ),
            network: SamplingLoop::new(
                MetricKind::Network,
                probes.network,
                Arc::clone(&self.network),
                interval,
                Arc::clone(&self.pushed),
            ),
            disk_io: SamplingLoop::new(
                MetricKind::DiskIo,
                probes.disk_io,
                Arc::clone(&self.disk_io),
                interval,
                Arc::clone(&self.pushed),
            ),
        }
    }

    /// Start the four sampling loops; each stops on `shutdown`
    pub fn spawn_samplers(
        &self,
        probes: ProbeSet,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let samplers = self.samplers(probes);
        vec![
            tokio::spawn(samplers.cpu.run(shutdown.subscribe())),
            tokio::spawn(samplers.memory.run(shutdown.subscribe())),
            tokio::spawn(samplers.network.run(shutdown.subscribe())),
            tokio::spawn(samplers.disk_io.run(shutdown.subscribe())),
        ]
    }

    pub fn window_lengths(&self) -> [(MetricKind, usize); 4] {
        [
            (MetricKind::Cpu, self.cpu.len()),
            (MetricKind::Memory, self.memory.len()),
            (MetricKind::Network, self.network.len()),
            (MetricKind::DiskIo, self.disk_io.len()),
        ]
    }

    /// Every window holds at least `average_len` samples
    pub fn is_warm(&self) -> bool {
        self.window_lengths()
            .iter()
            .all(|(_, len)| *len >= self.config.average_len)
    }

    /// Mean of the most recent `average_len` samples of every window.
    /// `None` while any window is still empty.
    pub fn state(&self) -> Option<NodeStateVector> {
        let k = self.config.average_len;
        let [cpu] = self.cpu.average(k)?;
        let [mem] = self.memory.average(k)?;
        let [net_in, net_out] = self.network.average(k)?;
        let [io_read, io_write] = self.disk_io.average(k)?;

        Some(NodeStateVector::from_array(
            [cpu, mem, net_in, net_out, io_read, io_write].map(round2),
        ))
    }

    pub async fn wait_until_warm(&self) {
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed
            notified.as_mut().enable();
            if self.is_warm() {
                return;
            }
            notified.await;
        }
    }

    /// Current state, waiting for warm-up first
    pub async fn warm_state(&self) -> NodeStateVector {
        loop {
            self.wait_until_warm().await;
            if let Some(state) = self.state() {
                return state;
            }
        }
    }
}
