//! Linux `/proc` probes
//!
//! Rate probes keep the previous counter values and the instant they were
//! read; every successful sample replaces that baseline.

use super::{round2, MetricProbe};
use crate::error::SensorError;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

fn read_proc_file(path: &Path) -> Result<String, SensorError> {
    std::fs::read_to_string(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_u64(file: &'static str, raw: &str) -> Result<u64, SensorError> {
    raw.parse().map_err(|_| SensorError::Malformed {
        file,
        reason: format!("expected an integer, found {raw:?}"),
    })
}

/// Counter values plus the instant they were taken
#[derive(Debug, Clone, Copy)]
struct Baseline<const N: usize> {
    counters: [u64; N],
    at: Instant,
}

impl<const N: usize> Baseline<N> {
    /// Per-second rates in KB since `self`, rounded to two decimals
    fn rates_kb(&self, now: &Baseline<N>, metric: &'static str) -> Result<[f64; N], SensorError> {
        let elapsed = now.at.duration_since(self.at).as_secs_f64();
        if elapsed <= 0.0 {
            return Err(SensorError::NoElapsedTime(metric));
        }
        let mut rates = [0.0; N];
        for (i, rate) in rates.iter_mut().enumerate() {
            // Counters can reset when an interface is recreated
            let delta = now.counters[i].saturating_sub(self.counters[i]) as f64;
            *rate = round2(delta / elapsed / 1024.0);
        }
        Ok(rates)
    }
}

/// CPU jiffies from the aggregate `cpu` line: (busy + idle, idle + iowait)
pub(crate) fn parse_cpu_times(stat: &str) -> Result<(u64, u64), SensorError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| SensorError::Malformed {
            file: "/proc/stat",
            reason: "missing aggregate cpu line".to_string(),
        })?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|f| parse_u64("/proc/stat", f))
        .collect::<Result<Vec<_>, _>>()?;
    if fields.len() < 5 {
        return Err(SensorError::Malformed {
            file: "/proc/stat",
            reason: format!("expected at least 5 cpu fields, found {}", fields.len()),
        });
    }

    // guest and guest_nice are already included in user and nice
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields[4];
    Ok((total, idle))
}

/// Whole-system CPU utilization over the last sampling interval
pub struct CpuProbe {
    path: PathBuf,
    previous: Mutex<(u64, u64)>,
}

impl CpuProbe {
    pub fn new(proc_root: &Path) -> Result<Self, SensorError> {
        let path = proc_root.join("stat");
        let initial = parse_cpu_times(&read_proc_file(&path)?)?;
        Ok(Self {
            path,
            previous: Mutex::new(initial),
        })
    }
}

impl MetricProbe<1> for CpuProbe {
    fn sample(&self) -> Result<[f64; 1], SensorError> {
        let (total, idle) = parse_cpu_times(&read_proc_file(&self.path)?)?;
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let (prev_total, prev_idle) = *previous;

        let d_total = total.saturating_sub(prev_total);
        if d_total == 0 {
            return Err(SensorError::NoElapsedTime("cpu"));
        }
        let d_idle = idle.saturating_sub(prev_idle).min(d_total);
        *previous = (total, idle);

        let usage = (d_total - d_idle) as f64 * 100.0 / d_total as f64;
        Ok([round2(usage)])
    }
}

/// `(MemTotal - MemAvailable) / MemTotal * 100`
pub(crate) fn parse_mem_usage(meminfo: &str) -> Result<f64, SensorError> {
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest.split_whitespace().next().unwrap_or_default();
        match key {
            "MemTotal" => total = Some(parse_u64("/proc/meminfo", value)?),
            "MemAvailable" => available = Some(parse_u64("/proc/meminfo", value)?),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    match (total, available) {
        (Some(total), Some(available)) if total > 0 => {
            let used = total.saturating_sub(available) as f64;
            Ok(round2(used * 100.0 / total as f64))
        }
        _ => Err(SensorError::Malformed {
            file: "/proc/meminfo",
            reason: "MemTotal or MemAvailable missing".to_string(),
        }),
    }
}

pub struct MemoryProbe {
    path: PathBuf,
}

impl MemoryProbe {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("meminfo"),
        }
    }
}

impl MetricProbe<1> for MemoryProbe {
    fn sample(&self) -> Result<[f64; 1], SensorError> {
        Ok([parse_mem_usage(&read_proc_file(&self.path)?)?])
    }
}

/// Received and transmitted bytes from `/proc/net/dev`.
///
/// With an interface name only that interface counts; otherwise every
/// interface except loopback is summed.
pub(crate) fn parse_net_bytes(netdev: &str, interface: Option<&str>) -> Result<[u64; 2], SensorError> {
    let mut totals = [0u64; 2];
    let mut matched = false;

    for line in netdev.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let selected = match interface {
            Some(wanted) => name == wanted,
            None => name != "lo",
        };
        if !selected {
            continue;
        }

        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(SensorError::Malformed {
                file: "/proc/net/dev",
                reason: format!("interface {name} has {} fields", fields.len()),
            });
        }
        totals[0] += parse_u64("/proc/net/dev", fields[0])?;
        totals[1] += parse_u64("/proc/net/dev", fields[8])?;
        matched = true;
    }

    if let (Some(wanted), false) = (interface, matched) {
        return Err(SensorError::Malformed {
            file: "/proc/net/dev",
            reason: format!("interface {wanted} not found"),
        });
    }
    Ok(totals)
}

/// Network throughput in KB/s (in, out)
pub struct NetworkProbe {
    path: PathBuf,
    interface: Option<String>,
    baseline: Mutex<Baseline<2>>,
}

impl NetworkProbe {
    pub fn new(proc_root: &Path, interface: Option<&str>) -> Result<Self, SensorError> {
        let path = proc_root.join("net").join("dev");
        let counters = parse_net_bytes(&read_proc_file(&path)?, interface)?;
        Ok(Self {
            path,
            interface: interface.map(str::to_string),
            baseline: Mutex::new(Baseline {
                counters,
                at: Instant::now(),
            }),
        })
    }
}

impl MetricProbe<2> for NetworkProbe {
    fn sample(&self) -> Result<[f64; 2], SensorError> {
        let raw = read_proc_file(&self.path)?;
        let now = Baseline {
            counters: parse_net_bytes(&raw, self.interface.as_deref())?,
            at: Instant::now(),
        };
        let mut baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        let rates = baseline.rates_kb(&now, "network")?;
        *baseline = now;
        Ok(rates)
    }
}

const SECTOR_SIZE: u64 = 512;

fn is_virtual_device(name: &str) -> bool {
    ["loop", "ram", "dm-", "sr", "zram", "md"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Bytes read and written, from `/proc/diskstats`.
///
/// With an explicit device list only those devices count. Otherwise every
/// physical whole disk counts; a partition is recognized by its name
/// extending the name of another listed device (`sda1` after `sda`).
pub(crate) fn parse_disk_bytes(diskstats: &str, devices: &[String]) -> Result<[u64; 2], SensorError> {
    let mut rows = Vec::new();
    for line in diskstats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let read = parse_u64("/proc/diskstats", fields[5])?;
        let written = parse_u64("/proc/diskstats", fields[9])?;
        rows.push((fields[2], read, written));
    }

    let names: Vec<&str> = rows.iter().map(|(name, _, _)| *name).collect();
    let selected = |name: &str| -> bool {
        if !devices.is_empty() {
            return devices.iter().any(|d| d == name);
        }
        !is_virtual_device(name)
            && !names
                .iter()
                .any(|other| *other != name && name.starts_with(other))
    };

    let mut totals = [0u64; 2];
    for (name, read, written) in &rows {
        if selected(name) {
            totals[0] += read * SECTOR_SIZE;
            totals[1] += written * SECTOR_SIZE;
        }
    }
    Ok(totals)
}

/// Block device throughput in KB/s (read, write)
pub struct DiskIoProbe {
    path: PathBuf,
    devices: Vec<String>,
    baseline: Mutex<Baseline<2>>,
}

impl DiskIoProbe {
    pub fn new(proc_root: &Path, devices: Vec<String>) -> Result<Self, SensorError> {
        let path = proc_root.join("diskstats");
        let counters = parse_disk_bytes(&read_proc_file(&path)?, &devices)?;
        Ok(Self {
            path,
            devices,
            baseline: Mutex::new(Baseline {
                counters,
                at: Instant::now(),
            }),
        })
    }
}

impl MetricProbe<2> for DiskIoProbe {
    fn sample(&self) -> Result<[f64; 2], SensorError> {
        let raw = read_proc_file(&self.path)?;
        let now = Baseline {
            counters: parse_disk_bytes(&raw, &self.devices)?,
            at: Instant::now(),
        };
        let mut baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        let rates = baseline.rates_kb(&now, "disk_io")?;
        *baseline = now;
        Ok(rates)
    }
}
