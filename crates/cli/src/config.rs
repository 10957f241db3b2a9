//! Agent endpoints the CLI talks to

use anyhow::{bail, Result};
use drs_core::NODE_COUNT;
use std::str::FromStr;

/// A node agent given as `name=host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub name: String,
    pub address: String,
}

impl FromStr for AgentEndpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((name, address)) = s.split_once('=') else {
            bail!("expected name=host:port, got '{}'", s);
        };
        let (name, address) = (name.trim(), address.trim());
        if name.is_empty() || address.is_empty() {
            bail!("expected name=host:port, got '{}'", s);
        }
        if !address.contains(':') {
            bail!("agent address '{}' is missing a port", address);
        }
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
        })
    }
}

/// `node1=node1:9000` .. `node4=node4:9000`
pub fn default_agents() -> Vec<AgentEndpoint> {
    (1..=NODE_COUNT)
        .map(|i| AgentEndpoint {
            name: format!("node{}", i),
            address: format!("node{}:9000", i),
        })
        .collect()
}
