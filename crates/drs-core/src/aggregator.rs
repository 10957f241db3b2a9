//! Cluster-wide observation built from the four node agents

use crate::client::NodeStateSource;
use crate::error::{NodeError, SchedulingError};
use crate::models::{ClusterObservation, NodeStateVector, NODE_COUNT, NODE_FIELDS, OBSERVATION_LEN};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Network rate treated as saturation, in KB/s
const NET_SATURATION_KBPS: f64 = 40.0;

/// Disk rate treated as saturation, in KB/s
const IO_SATURATION_KBPS: f64 = 10240.0;

/// Map raw node readings onto the 0..=100 scale the policy sees
pub fn scale(raw: &NodeStateVector) -> [f32; NODE_FIELDS] {
    let scaled = [
        raw.cpu_percent * 4.0,
        raw.mem_percent,
        raw.net_in_kbps / NET_SATURATION_KBPS * 100.0,
        raw.net_out_kbps / NET_SATURATION_KBPS * 100.0,
        raw.io_read_kbps / IO_SATURATION_KBPS * 100.0,
        raw.io_write_kbps / IO_SATURATION_KBPS * 100.0,
    ];
    scaled.map(|v| ((v.clamp(0.0, 100.0) * 100.0).round() / 100.0) as f32)
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    observation: ClusterObservation,
    observed_at: i64,
    /// When the refresh that produced it began
    started: Instant,
}

/// Queries every node and caches the latest scaled observation
pub struct ClusterStateAggregator {
    sources: Vec<Arc<dyn NodeStateSource>>,
    current: RwLock<Option<Snapshot>>,
}

impl ClusterStateAggregator {
    /// Sources must be in node order and exactly `NODE_COUNT` long
    pub fn new(sources: Vec<Arc<dyn NodeStateSource>>) -> Result<Self, SchedulingError> {
        if sources.len() != NODE_COUNT {
            return Err(SchedulingError::NodeCount {
                expected: NODE_COUNT,
                got: sources.len(),
            });
        }
        Ok(Self {
            sources,
            current: RwLock::new(None),
        })
    }

    pub fn nodes(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.node()).collect()
    }

    /// Query every node in order and replace the cached observation.
    ///
    /// On error the previous observation stays current. A refresh that
    /// finishes after a later-started one returns its reading but does not
    /// replace the newer cache entry.
    pub async fn refresh(&self) -> Result<ClusterObservation, NodeError> {
        let started = Instant::now();
        let mut values = [0.0f32; OBSERVATION_LEN];
        for (i, source) in self.sources.iter().enumerate() {
            let raw = source.get_node_state().await?;
            debug!(node = source.node(), state = %raw, "Node state received");
            values[i * NODE_FIELDS..(i + 1) * NODE_FIELDS].copy_from_slice(&scale(&raw));
        }

        let observation = ClusterObservation::new(values);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match *current {
            Some(newer) if newer.started > started => {
                debug!("Newer observation already cached, keeping it");
            }
            _ => {
                *current = Some(Snapshot {
                    observation,
                    observed_at: chrono::Utc::now().timestamp(),
                    started,
                });
            }
        }
        Ok(observation)
    }

    /// Last successfully refreshed observation
    pub fn current(&self) -> Option<ClusterObservation> {
        self.snapshot().map(|s| s.observation)
    }

    /// Unix timestamp of the last successful refresh, 0 if none
    pub fn observed_at(&self) -> i64 {
        self.snapshot().map_or(0, |s| s.observed_at)
    }

    fn snapshot(&self) -> Option<Snapshot> {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FixedNode {
        name: String,
        state: NodeStateVector,
        down: AtomicBool,
    }

    /// Answers slowly with a different reading while `slow` is set
    struct SlowNode {
        name: String,
        slow: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NodeStateSource for SlowNode {
        fn node(&self) -> &str {
            &self.name
        }

        async fn get_node_state(&self) -> Result<NodeStateVector, NodeError> {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                return Ok(raw(1.0, 10.0, 0.0, 0.0));
            }
            Ok(raw(2.0, 20.0, 0.0, 0.0))
        }
    }

    #[async_trait]
    impl NodeStateSource for FixedNode {
        fn node(&self) -> &str {
            &self.name
        }

        async fn get_node_state(&self) -> Result<NodeStateVector, NodeError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(NodeError::Unreachable {
                    node: self.name.clone(),
                    reason: "down".to_string(),
                });
            }
            Ok(self.state)
        }
    }

    fn raw(cpu: f64, mem: f64, net: f64, io: f64) -> NodeStateVector {
        NodeStateVector::from_array([cpu, mem, net, net, io, io])
    }

    fn fixed_nodes() -> Vec<Arc<FixedNode>> {
        (0..NODE_COUNT)
            .map(|i| {
                Arc::new(FixedNode {
                    name: format!("node{}", i + 1),
                    state: raw(5.0 * (i + 1) as f64, 40.0, 10.0, 1024.0),
                    down: AtomicBool::new(false),
                })
            })
            .collect()
    }

    fn as_sources(nodes: &[Arc<FixedNode>]) -> Vec<Arc<dyn NodeStateSource>> {
        nodes
            .iter()
            .map(|n| Arc::clone(n) as Arc<dyn NodeStateSource>)
            .collect()
    }

    #[test]
    fn test_scale_saturates_and_clamps() {
        assert_eq!(scale(&raw(30.0, 50.0, 10.0, 20000.0)), [100.0, 50.0, 25.0, 25.0, 100.0, 100.0]);
        assert_eq!(scale(&raw(120.0, 150.0, 0.0, 0.0))[..2], [100.0, 100.0]);
        assert_eq!(scale(&raw(-1.0, -5.0, -3.0, -3.0)), [0.0; 6]);
    }

    #[test]
    fn test_scale_rounds_to_two_decimals() {
        let scaled = scale(&raw(1.0 / 3.0, 33.333, 1.0, 100.0));
        assert_eq!(scaled[0], 1.33);
        assert_eq!(scaled[1], 33.33);
        assert_eq!(scaled[2], 2.5);
        assert_eq!(scaled[4], 0.98);
    }

    #[test]
    fn test_requires_four_sources() {
        let nodes = fixed_nodes();
        let result = ClusterStateAggregator::new(as_sources(&nodes[..3]));
        assert!(matches!(
            result,
            Err(SchedulingError::NodeCount { expected: 4, got: 3 })
        ));
    }

    #[tokio::test]
    async fn test_refresh_concatenates_in_node_order() {
        let nodes = fixed_nodes();
        let aggregator = ClusterStateAggregator::new(as_sources(&nodes)).unwrap();
        assert!(aggregator.current().is_none());

        let obs = aggregator.refresh().await.unwrap();
        assert_eq!(obs.field(0), [20.0, 40.0, 60.0, 80.0]);
        assert_eq!(obs.node(2), &[60.0, 40.0, 25.0, 25.0, 10.0, 10.0]);
        assert_eq!(aggregator.current(), Some(obs));
        assert!(aggregator.observed_at() > 0);
        assert_eq!(aggregator.nodes(), vec!["node1", "node2", "node3", "node4"]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_observation() {
        let nodes = fixed_nodes();
        let aggregator = ClusterStateAggregator::new(as_sources(&nodes)).unwrap();
        let before = aggregator.refresh().await.unwrap();

        nodes[3].down.store(true, Ordering::SeqCst);
        assert!(aggregator.refresh().await.is_err());
        assert_eq!(aggregator.current(), Some(before));
    }

    #[tokio::test]
    async fn test_late_refresh_does_not_replace_newer_observation() {
        let slow = Arc::new(AtomicBool::new(true));
        let sources: Vec<Arc<dyn NodeStateSource>> = (0..NODE_COUNT)
            .map(|i| {
                Arc::new(SlowNode {
                    name: format!("node{}", i + 1),
                    slow: Arc::clone(&slow),
                }) as Arc<dyn NodeStateSource>
            })
            .collect();
        let aggregator = Arc::new(ClusterStateAggregator::new(sources).unwrap());

        let early = tokio::spawn({
            let aggregator = Arc::clone(&aggregator);
            async move { aggregator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        slow.store(false, Ordering::SeqCst);

        let late = aggregator.refresh().await.unwrap();
        let early = early.await.unwrap().unwrap();
        // The early refresh saw node1 while it was still slow
        assert_eq!(early.node(0)[0], 4.0);
        assert_eq!(late.node(0)[0], 8.0);
        assert_eq!(aggregator.current(), Some(late));
    }
}
