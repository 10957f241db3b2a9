//! Commands served by the scheduler's HTTP API

use anyhow::Result;
use colored::Colorize;
use drs_core::{HealthResponse, SchedulerStatus};
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use crate::client::ApiClient;
use crate::output::{color_reward, color_status, format_timestamp, print_success, OutputFormat};

/// Request a placement for `pod`
pub async fn choose(client: &ApiClient, pod: &str, format: OutputFormat) -> Result<()> {
    let node = client.post_form("choose", &[("podname", pod)]).await?;
    let node = node.trim();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "pod": pod, "node": node }))?);
        }
        OutputFormat::Table => {
            print_success(&format!("{} -> {}", pod.cyan(), node.bold()));
        }
    }

    Ok(())
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: SchedulerStatus = client.get("status").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            let episode = if status.episode_done {
                "resetting".yellow().to_string()
            } else {
                format!("{}/{}", status.episode_step, status.episode_length)
            };

            println!("{}", "Scheduler Status".bold());
            println!("{}", "=".repeat(50));
            println!("Episode step:           {}", episode);
            println!("Episodes completed:     {}", status.episodes_completed);
            println!("Cached pods:            {}", status.cached_pods);
            println!();
            println!("{}", "Learning".bold());
            println!("{}", "-".repeat(50));
            println!("Transitions stored:     {}", status.transitions_stored);
            println!("Replay buffer:          {}", status.replay_len);
            println!("Learn steps:            {}", status.learn_steps);
            println!("Last reward:            {}", color_reward(status.last_reward));
            println!("Last observation:       {}", format_timestamp(status.observed_at));
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (u16, HealthResponse) = client.get_any_status("healthz").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        OutputFormat::Table => {
            println!("Scheduler: {}", color_status(health.status));

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status),
                    message: component.message.clone().unwrap_or_default(),
                    checked: format_timestamp(component.last_check_timestamp),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
    }

    Ok(())
}
