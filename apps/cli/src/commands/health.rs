//! Backend health command.
//!
//! Probes every configured backend concurrently and exits non-zero when none
//! of them respond.

use super::load_router;
use colored::Colorize;
use relay_router::{HealthStatus, ProbeResult};
use std::path::Path;
use std::time::Duration;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&ProbeResult> for ProbeRow {
    fn from(probe: &ProbeResult) -> Self {
        Self {
            backend: probe.backend_id.to_string(),
            status: if probe.ok { "ok".to_string() } else { "fail".to_string() },
            latency: format!("{}ms", probe.latency_ms),
            message: probe.message.clone(),
        }
    }
}

/// Execute the health command.
pub async fn execute(path: &Path, timeout_secs: u64, json: bool) -> anyhow::Result<()> {
    let router = load_router(path)?;
    let report = router.health(Duration::from_secs(timeout_secs)).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", "relay health".bold().cyan());
        println!();
        let status = match report.status {
            HealthStatus::Healthy => report.status.to_string().green().bold(),
            HealthStatus::Degraded => report.status.to_string().yellow().bold(),
            HealthStatus::Unhealthy => report.status.to_string().red().bold(),
        };
        println!("  {} {}", "Status:".bold(), status);
        println!();
        let rows: Vec<ProbeRow> = report.backends.iter().map(ProbeRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    if report.status == HealthStatus::Unhealthy {
        anyhow::bail!("No backend passed its health check");
    }
    Ok(())
}
