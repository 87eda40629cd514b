//! Usage statistics command.

use super::{load_router, percent, usd};
use colored::Colorize;
use relay_router::BackendStats;
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Requests")]
    requests: String,
    #[tabled(rename = "Tokens")]
    tokens: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Cost today")]
    cost_today: String,
    #[tabled(rename = "Circuit")]
    circuit: String,
    #[tabled(rename = "Failure rate")]
    failure_rate: String,
}

impl From<&BackendStats> for StatsRow {
    fn from(stats: &BackendStats) -> Self {
        let (requests, tokens, utilization, cost_today) = match &stats.usage {
            Some(usage) => (
                format!("{}/{}", usage.requests_in_window, usage.requests_per_window),
                format!("{}/{}", usage.tokens_in_window, usage.tokens_per_window),
                percent(usage.request_utilization.max(usage.token_utilization)),
                usd(usage.cost_today),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
        };
        Self {
            backend: stats.profile.id.to_string(),
            requests,
            tokens,
            utilization,
            cost_today,
            circuit: stats.circuit.to_string(),
            failure_rate: percent(stats.failure_rate),
        }
    }
}

/// Execute the stats command.
pub fn execute(path: &Path, json: bool) -> anyhow::Result<()> {
    let router = load_router(path)?;
    let stats = router.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "relay stats".bold().cyan());
    println!();
    println!(
        "  {} {}  {} {}s  {} {}",
        "Registry version:".dimmed(),
        stats.registry_version,
        "Window:".dimmed(),
        stats.window_secs,
        "Generated:".dimmed(),
        stats.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    let rows: Vec<StatsRow> = stats.backends.iter().map(StatsRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!();
    println!("  {} {}", "Total cost today:".bold(), usd(stats.total_cost_today));

    Ok(())
}
