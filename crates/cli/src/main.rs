//! drsctl, the operator CLI of the dynamic resource scheduler
//!
//! Reads node state straight from the agents and talks to the scheduler's
//! HTTP API for placements, status and health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{nodes, scheduler};
use config::AgentEndpoint;
use std::time::Duration;

/// Dynamic resource scheduler CLI
#[derive(Parser)]
#[command(name = "drsctl")]
#[command(author, version, about = "CLI for the Dynamic Resource Scheduler", long_about = None)]
pub struct Cli {
    /// Scheduler API URL (can also be set via DRS_SCHEDULER_URL env var)
    #[arg(long, env = "DRS_SCHEDULER_URL", default_value = "http://localhost:1234")]
    pub scheduler_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current state reported by each node agent
    Nodes {
        /// Agents as name=host:port, comma separated (default: node1..node4 on port 9000)
        #[arg(long, env = "DRS_AGENTS", value_delimiter = ',')]
        agents: Vec<AgentEndpoint>,

        /// Show values on the 0-100 scale the policy sees
        #[arg(long)]
        scaled: bool,

        /// Connect and request timeout in milliseconds
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
    },

    /// Ask the scheduler where to place a pod
    Choose {
        /// Pod name, classified by substring into a workload profile
        pod: String,
    },

    /// Show episode and learning progress
    Status,

    /// Show scheduler component health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Nodes {
            agents,
            scaled,
            timeout_ms,
        } => {
            let agents = if agents.is_empty() {
                config::default_agents()
            } else {
                agents
            };
            nodes::show_nodes(&agents, Duration::from_millis(timeout_ms), scaled, cli.format)
                .await?;
        }
        Commands::Choose { pod } => {
            let client = client::ApiClient::new(&cli.scheduler_url)?;
            scheduler::choose(&client, &pod, cli.format).await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.scheduler_url)?;
            scheduler::show_status(&client, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.scheduler_url)?;
            scheduler::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
