//! Configuration validation command.
//!
//! Loads a router configuration, runs every validation rule and builds the
//! backend connections it declares.

use anyhow::Context;
use colored::Colorize;
use relay_router::{RouterConfig, RouterConfigLoader};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ValidationSummary {
    valid: bool,
    backends: usize,
    connected: usize,
    categories: Vec<String>,
    escalation_selector: Option<String>,
}

impl ValidationSummary {
    fn from_config(config: &RouterConfig, connected: usize) -> Self {
        Self {
            valid: true,
            backends: config.backends.len(),
            connected,
            categories: config.categories.keys().map(ToString::to_string).collect(),
            escalation_selector: config
                .escalation
                .as_ref()
                .filter(|escalation| escalation.enabled)
                .map(|escalation| escalation.selector.to_string()),
        }
    }
}

/// Execute the validate command.
pub fn execute(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = RouterConfigLoader::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    let connections = config.build_connections().context("Failed to build backend connections")?;

    let summary = ValidationSummary::from_config(&config, connections.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "relay validate".bold().cyan());
    println!();
    println!("  {} {}", "Config:".dimmed(), path.display());
    println!("  {} Configuration is valid", "✓".green());
    println!();
    println!("  {:<12} {} ({} connected)", "Backends:".bold(), summary.backends, summary.connected);
    if summary.categories.is_empty() {
        println!("  {:<12} {}", "Categories:".bold(), "none (catalogue order)".dimmed());
    } else {
        println!("  {:<12} {}", "Categories:".bold(), summary.categories.join(", "));
    }
    println!(
        "  {:<12} quality {:.2} / cost {:.2} / speed {:.2}",
        "Weights:".bold(),
        config.weights.quality,
        config.weights.cost,
        config.weights.speed
    );
    match &summary.escalation_selector {
        Some(selector) => println!(
            "  {:<12} {} (threshold {:.2})",
            "Escalation:".bold(),
            selector,
            config.escalation_threshold
        ),
        None => println!("  {:<12} {}", "Escalation:".bold(), "disabled".dimmed()),
    }

    Ok(())
}
