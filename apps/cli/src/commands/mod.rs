//! Command implementations for the relay CLI.

pub mod health;
pub mod route;
pub mod stats;
pub mod validate;

use anyhow::Context;
use relay_router::BackendRouter;
use std::path::Path;

/// Builds a router from the configuration file at `path`.
pub fn load_router(path: &Path) -> anyhow::Result<BackendRouter> {
    BackendRouter::from_path(path)
        .with_context(|| format!("Failed to load router from {}", path.display()))
}

/// Formats a USD amount the way every command prints it.
pub fn usd(amount: f64) -> String {
    format!("${:.6}", amount)
}

/// Formats a fraction as a percentage.
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
