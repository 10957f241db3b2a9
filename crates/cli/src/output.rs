//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use drs_core::ComponentStatus;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Two decimals, the precision agents report with
pub fn format_rate(value: f64) -> String {
    format!("{:.2}", value)
}

/// Unix seconds as local-independent UTC
pub fn format_timestamp(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) if ts > 0 => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => "-".to_string(),
    }
}

pub fn color_status(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Healthy => "healthy".green().to_string(),
        ComponentStatus::Degraded => "degraded".yellow().to_string(),
        ComponentStatus::Unhealthy => "unhealthy".red().to_string(),
    }
}

/// Scaled load in the policy's 0..=100 range; hot values stand out
pub fn color_load(value: f32) -> String {
    let formatted = format!("{:.1}", value);
    if value >= 80.0 {
        formatted.red().to_string()
    } else if value >= 50.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Rewards are non-positive; closer to zero means better balance
pub fn color_reward(reward: Option<f32>) -> String {
    match reward {
        None => "-".to_string(),
        Some(r) if r > -25.0 => format!("{:.3}", r).green().to_string(),
        Some(r) if r > -100.0 => format!("{:.3}", r).yellow().to_string(),
        Some(r) => format!("{:.3}", r).red().to_string(),
    }
}
