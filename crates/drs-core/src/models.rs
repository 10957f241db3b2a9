//! Core data models shared by the node agent and the scheduler

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of worker nodes the scheduler places pods onto
pub const NODE_COUNT: usize = 4;

/// Fields per node: cpu, mem, net in/out, io read/write
pub const NODE_FIELDS: usize = 6;

/// Length of the scaled cluster observation
pub const OBSERVATION_LEN: usize = NODE_COUNT * NODE_FIELDS;

/// Length of the policy input (observation + workload footprint)
pub const STATE_LEN: usize = OBSERVATION_LEN + NODE_FIELDS;

/// Policy input vector
pub type StateVector = [f32; STATE_LEN];

/// Six-float footprint of a workload profile
pub type Footprint = [f32; NODE_FIELDS];

/// Smoothed resource usage of one node as served by its agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeStateVector {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub net_in_kbps: f64,
    pub net_out_kbps: f64,
    pub io_read_kbps: f64,
    pub io_write_kbps: f64,
}

impl NodeStateVector {
    pub fn from_array(values: [f64; NODE_FIELDS]) -> Self {
        Self {
            cpu_percent: values[0],
            mem_percent: values[1],
            net_in_kbps: values[2],
            net_out_kbps: values[3],
            io_read_kbps: values[4],
            io_write_kbps: values[5],
        }
    }

    pub fn to_array(&self) -> [f64; NODE_FIELDS] {
        [
            self.cpu_percent,
            self.mem_percent,
            self.net_in_kbps,
            self.net_out_kbps,
            self.io_read_kbps,
            self.io_write_kbps,
        ]
    }
}

impl fmt::Display for NodeStateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.to_array();
        write!(f, "[")?;
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")
    }
}

/// Scaled usage of all nodes, concatenated in node order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterObservation {
    values: [f32; OBSERVATION_LEN],
}

impl ClusterObservation {
    pub fn new(values: [f32; OBSERVATION_LEN]) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Scaled fields of a single node (0-based index)
    pub fn node(&self, index: usize) -> &[f32] {
        &self.values[index * NODE_FIELDS..(index + 1) * NODE_FIELDS]
    }

    /// One field across all nodes, e.g. every node's scaled cpu
    pub fn field(&self, field: usize) -> [f32; NODE_COUNT] {
        let mut out = [0.0; NODE_COUNT];
        for (node, slot) in out.iter_mut().enumerate() {
            *slot = self.values[node * NODE_FIELDS + field];
        }
        out
    }

    /// Append a workload footprint to form the policy input
    pub fn with_footprint(&self, footprint: &Footprint) -> StateVector {
        let mut state = [0.0; STATE_LEN];
        state[..OBSERVATION_LEN].copy_from_slice(&self.values);
        state[OBSERVATION_LEN..].copy_from_slice(footprint);
        state
    }
}

/// One stored step of experience. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StateVector,
    pub action: usize,
    pub reward: f32,
    pub next_state: StateVector,
}

/// Node identifier for a policy action (0 -> "node1")
pub fn node_name(action: usize) -> String {
    format!("node{}", action + 1)
}

/// Outcome of a placement request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: usize,
    pub node: String,
    pub cached: bool,
}

/// Snapshot of the scheduling loop for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub episode_step: u32,
    pub episode_length: u32,
    pub episode_done: bool,
    pub episodes_completed: u64,
    pub transitions_stored: u64,
    pub replay_len: usize,
    pub learn_steps: u64,
    pub cached_pods: usize,
    pub last_reward: Option<f32>,
    pub observed_at: i64,
}
