//! Scheduler configuration
//!
//! Read from an optional TOML file named by `DRS_SCHEDULER_CONFIG`, then from
//! `DRS_SCHEDULER__*` environment variables. Nested keys use `__`, e.g.
//! `DRS_SCHEDULER__POLICY__EPSILON=1.0`.

use anyhow::{bail, Context, Result};
use drs_core::client::ClientConfig;
use drs_core::policy::PolicyConfig;
use drs_core::scheduling::{ProfileTable, SchedulerConfig};
use drs_core::NODE_COUNT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeEndpoint {
    pub name: String,
    /// `host:port` of the node agent
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the `/choose` HTTP surface
    pub http_port: u16,

    /// Agents in action order. Action `i` always answers `node{i+1}`;
    /// `name` only labels the link in logs and health output.
    pub nodes: Vec<NodeEndpoint>,

    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Evaluated placements per episode
    pub episode_length: u32,

    /// Wait between a placement and its evaluation
    pub settle_delay_ms: u64,

    /// Append-only reward log, disabled when unset
    pub reward_log: Option<PathBuf>,

    /// Replay buffer snapshot, disabled when unset
    pub replay_snapshot: Option<PathBuf>,

    pub policy: PolicyConfig,

    pub profiles: ProfileTable,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 1234,
            nodes: (1..=NODE_COUNT)
                .map(|i| NodeEndpoint {
                    name: format!("node{}", i),
                    address: format!("node{}:9000", i),
                })
                .collect(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 2_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            episode_length: 100,
            settle_delay_ms: 5_000,
            reward_log: Some(PathBuf::from("reward.log")),
            replay_snapshot: Some(PathBuf::from("transition.json")),
            policy: PolicyConfig::default(),
            profiles: ProfileTable::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment and config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os("DRS_SCHEDULER_CONFIG").map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("DRS_SCHEDULER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read scheduler configuration")?
            .try_deserialize()
            .context("Invalid scheduler configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.len() != NODE_COUNT {
            bail!(
                "Expected {} node endpoints, got {}",
                NODE_COUNT,
                self.nodes.len()
            );
        }
        if self.policy.batch_size == 0 || self.policy.replay_capacity == 0 {
            bail!("policy.batch_size and policy.replay_capacity must be positive");
        }
        if self.episode_length == 0 {
            bail!("episode_length must be positive");
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            snapshot_path: self.replay_snapshot.clone(),
            ..self.policy.clone()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            episode_length: self.episode_length,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            reward_log: self.reward_log.clone(),
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drs_core::scheduling::WorkloadProfile;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 1234);
        assert_eq!(config.nodes.len(), 4);
        assert_eq!(config.nodes[3].name, "node4");
        assert_eq!(config.policy.batch_size, 32);
        assert_eq!(
            config.policy_config().snapshot_path,
            Some(PathBuf::from("transition.json"))
        );
        assert_eq!(config.client_config().request_timeout, Duration::from_secs(2));
        assert_eq!(config.scheduler_config().settle_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
http_port = 8088
settle_delay_ms = 100

[[nodes]]
name = "node1"
address = "10.0.0.1:9000"
[[nodes]]
name = "node2"
address = "10.0.0.2:9000"
[[nodes]]
name = "node3"
address = "10.0.0.3:9000"
[[nodes]]
name = "node4"
address = "10.0.0.4:9000"

[policy]
epsilon = 1.0
seed = 7

[[profiles.rules]]
pattern = "ffmpeg"
profile = "video"
footprint = [10.0, 0.0, 5.0, 5.0, 0.0, 0.0]
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.http_port, 8088);
        assert_eq!(config.nodes[0].address, "10.0.0.1:9000");
        assert_eq!(config.policy.epsilon, 1.0);
        assert_eq!(config.policy.seed, Some(7));
        // Keys absent from the section keep their defaults
        assert_eq!(config.policy.batch_size, 32);
        assert_eq!(config.profiles.rules.len(), 1);
        assert_eq!(config.profiles.rules[0].profile, WorkloadProfile::Video);
        assert_eq!(
            config.scheduler_config().settle_delay,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_wrong_node_count_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[nodes]]
name = "node1"
address = "10.0.0.1:9000"
"#
        )
        .unwrap();

        let err = ServerConfig::load_from(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Expected 4 node endpoints"));
    }
}
