//! Per-node metric agent
//!
//! Four sampling loops feed bounded windows of recent readings; the protocol
//! server answers state requests with the smoothed averages once every window
//! is warm. Probes read `/proc` directly and are swappable for tests.

mod agent;
mod procfs;
mod sampler;
mod server;


pub use agent::{MetricAgent, MonitorConfig, Samplers};
pub use procfs::{CpuProbe, DiskIoProbe, MemoryProbe, NetworkProbe};
pub use sampler::{SampleOutcome, SamplingLoop};
pub use server::serve;

use crate::error::SensorError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The four metrics every node reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Memory,
    Network,
    DiskIo,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Network,
        MetricKind::DiskIo,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Network => "network",
            MetricKind::DiskIo => "disk_io",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads one metric from the operating system.
///
/// `W` is the number of values per reading: one for percentages, two for
/// in/out or read/write rate pairs. Calls block, so sampling loops run them
/// on the blocking pool.
pub trait MetricProbe<const W: usize>: Send + Sync {
    fn sample(&self) -> Result<[f64; W], SensorError>;
}

/// The probes backing one agent
#[derive(Clone)]
pub struct ProbeSet {
    pub cpu: Arc<dyn MetricProbe<1>>,
    pub memory: Arc<dyn MetricProbe<1>>,
    pub network: Arc<dyn MetricProbe<2>>,
    pub disk_io: Arc<dyn MetricProbe<2>>,
}

impl ProbeSet {
    /// Linux probes rooted at `proc_root` (normally `/proc`).
    ///
    /// Rate probes take their first baseline here so the first sample
    /// already reports a rate.
    pub fn procfs(
        proc_root: &Path,
        interface: Option<&str>,
        disk_devices: &[String],
    ) -> Result<Self, SensorError> {
        Ok(Self {
            cpu: Arc::new(CpuProbe::new(proc_root)?),
            memory: Arc::new(MemoryProbe::new(proc_root)),
            network: Arc::new(NetworkProbe::new(proc_root, interface)?),
            disk_io: Arc::new(DiskIoProbe::new(proc_root, disk_devices.to_vec())?),
        })
    }
}

/// Round to two decimals
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
