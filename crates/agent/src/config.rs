//! Agent configuration
//!
//! Read from an optional TOML file named by `DRS_AGENT_CONFIG`, then from
//! `DRS_AGENT__*` environment variables (e.g. `DRS_AGENT__LISTEN_ADDR`).
//! Missing keys fall back to the defaults below.

use anyhow::{bail, Context, Result};
use drs_core::monitor::MonitorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name used in logs, from `NODE_NAME` when unset
    pub node_name: String,

    /// Address of the node state protocol listener
    pub listen_addr: String,

    /// HTTP port for health and metrics
    pub api_port: u16,

    pub sample_interval_ms: u64,

    /// Samples kept per metric
    pub window_capacity: usize,

    /// Samples averaged into each reply
    pub average_len: usize,

    /// Interface to measure; all but loopback when unset
    pub net_interface: Option<String>,

    /// Block devices to measure; all physical disks when empty
    pub disk_devices: Vec<String>,

    pub proc_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string()),
            listen_addr: "0.0.0.0:9000".to_string(),
            api_port: 8080,
            sample_interval_ms: 500,
            window_capacity: 10,
            average_len: 2,
            net_interface: None,
            disk_devices: Vec::new(),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment and config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os("DRS_AGENT_CONFIG").map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("DRS_AGENT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("disk_devices")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read agent configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Windows must be able to hold the samples a reply averages
    pub fn validate(&self) -> Result<()> {
        if self.window_capacity == 0 {
            bail!("window_capacity must be positive");
        }
        if self.average_len == 0 {
            bail!("average_len must be positive");
        }
        if self.average_len > self.window_capacity {
            bail!(
                "average_len ({}) cannot exceed window_capacity ({})",
                self.average_len,
                self.window_capacity
            );
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            window_capacity: self.window_capacity,
            average_len: self.average_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.api_port, 8080);

        let monitor = config.monitor_config();
        assert_eq!(monitor.sample_interval, Duration::from_millis(500));
        assert_eq!(monitor.window_capacity, 10);
        assert_eq!(monitor.average_len, 2);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_name = "worker-3"
listen_addr = "127.0.0.1:9100"
sample_interval_ms = 250
net_interface = "ens33"
disk_devices = ["sda", "nvme0n1"]
"#
        )
        .unwrap();

        let config = AgentConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.node_name, "worker-3");
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
        assert_eq!(config.net_interface.as_deref(), Some("ens33"));
        assert_eq!(config.disk_devices, vec!["sda", "nvme0n1"]);
        // Unset keys keep their defaults
        assert_eq!(config.window_capacity, 10);
        assert_eq!(config.monitor_config().sample_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_window_sizes() {
        assert!(AgentConfig::default().validate().is_ok());

        let empty = AgentConfig {
            window_capacity: 0,
            ..AgentConfig::default()
        };
        assert!(empty.validate().is_err());

        let no_average = AgentConfig {
            average_len: 0,
            ..AgentConfig::default()
        };
        assert!(no_average.validate().is_err());

        let single = AgentConfig {
            window_capacity: 1,
            average_len: 1,
            ..AgentConfig::default()
        };
        assert!(single.validate().is_ok());
    }

    #[test]
    fn test_average_longer_than_window_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "window_capacity = 1").unwrap();

        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(err
            .to_string()
            .contains("average_len (2) cannot exceed window_capacity (1)"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(Path::new("/nonexistent/drs-agent.toml")));
        assert!(result.is_err());
    }
}
