//! Direct node agent queries over the node-state protocol

use anyhow::Result;
use colored::Colorize;
use drs_core::aggregator::scale;
use drs_core::client::{ClientConfig, NodeStateClient, NodeStateSource};
use drs_core::NodeStateVector;
use serde::Serialize;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

use crate::config::AgentEndpoint;
use crate::output::{color_load, format_rate, print_warning, OutputFormat};

#[derive(Debug, Serialize)]
struct NodeReport {
    node: String,
    endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<NodeStateVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scaled: Option<[f32; 6]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct RawRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "CPU %")]
    cpu: String,
    #[tabled(rename = "Mem %")]
    mem: String,
    #[tabled(rename = "Net In KB/s")]
    net_in: String,
    #[tabled(rename = "Net Out KB/s")]
    net_out: String,
    #[tabled(rename = "IO Read KB/s")]
    io_read: String,
    #[tabled(rename = "IO Write KB/s")]
    io_write: String,
}

#[derive(Tabled)]
struct ScaledRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Mem")]
    mem: String,
    #[tabled(rename = "Net In")]
    net_in: String,
    #[tabled(rename = "Net Out")]
    net_out: String,
    #[tabled(rename = "IO Read")]
    io_read: String,
    #[tabled(rename = "IO Write")]
    io_write: String,
}

async fn query(agent: &AgentEndpoint, timeout: Duration) -> NodeReport {
    let config = ClientConfig {
        connect_timeout: timeout,
        request_timeout: timeout,
        ..ClientConfig::default()
    };
    let result = match NodeStateClient::connect(&agent.name, &agent.address, config).await {
        Ok(client) => client.get_node_state().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(state) => NodeReport {
            node: agent.name.clone(),
            endpoint: agent.address.clone(),
            scaled: Some(scale(&state)),
            state: Some(state),
            error: None,
        },
        Err(e) => NodeReport {
            node: agent.name.clone(),
            endpoint: agent.address.clone(),
            state: None,
            scaled: None,
            error: Some(e.to_string()),
        },
    }
}

/// Ask every agent for its current smoothed state
pub async fn show_nodes(
    agents: &[AgentEndpoint],
    timeout: Duration,
    scaled: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut reports = Vec::with_capacity(agents.len());
    for agent in agents {
        reports.push(query(agent, timeout).await);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Table => {
            let table = if scaled {
                let rows: Vec<ScaledRow> = reports
                    .iter()
                    .filter_map(|r| r.scaled.map(|s| (r, s)))
                    .map(|(r, s)| ScaledRow {
                        node: r.node.clone(),
                        cpu: color_load(s[0]),
                        mem: color_load(s[1]),
                        net_in: color_load(s[2]),
                        net_out: color_load(s[3]),
                        io_read: color_load(s[4]),
                        io_write: color_load(s[5]),
                    })
                    .collect();
                Table::new(rows).with(Style::rounded()).to_string()
            } else {
                let rows: Vec<RawRow> = reports
                    .iter()
                    .filter_map(|r| r.state.map(|s| (r, s)))
                    .map(|(r, s)| RawRow {
                        node: r.node.clone(),
                        endpoint: r.endpoint.clone(),
                        cpu: format_rate(s.cpu_percent),
                        mem: format_rate(s.mem_percent),
                        net_in: format_rate(s.net_in_kbps),
                        net_out: format_rate(s.net_out_kbps),
                        io_read: format_rate(s.io_read_kbps),
                        io_write: format_rate(s.io_write_kbps),
                    })
                    .collect();
                Table::new(rows).with(Style::rounded()).to_string()
            };

            println!("{}", "Node State".bold());
            println!("{}", table);

            for report in &reports {
                if let Some(error) = &report.error {
                    print_warning(&format!("{} ({}): {}", report.node, report.endpoint, error));
                }
            }
        }
    }

    Ok(())
}
