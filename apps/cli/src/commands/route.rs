//! Route command: analyze a message, pick a backend and dispatch it.

use super::{load_router, usd};
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use relay_router::{
    CandidateEvaluation, DecisionKind, DecisionPreview, RouteResult, RoutingDecision,
    RoutingRequest, TaskCategory,
};
use std::path::PathBuf;
use tabled::{Table, Tabled, settings::Style};

/// Arguments for `relay route`.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Path to the configuration file
    pub config: PathBuf,

    /// Task category (general, coding, reasoning, creative, summarization, extraction,
    /// conversation, vision)
    #[arg(short, long, default_value = "general")]
    pub category: TaskCategory,

    /// Message to route
    #[arg(short, long)]
    pub message: String,

    /// Cost budget in USD (defaults to the configured budget)
    #[arg(long)]
    pub budget: Option<f64>,

    /// Minimum acceptable quality in [0, 1]
    #[arg(long)]
    pub quality_floor: Option<f64>,

    /// Minimum acceptable speed in [0, 1]
    #[arg(long)]
    pub speed_floor: Option<f64>,

    /// Require function calling support
    #[arg(long)]
    pub function_calling: bool,

    /// Require vision support
    #[arg(long)]
    pub vision: bool,

    /// Show the routing decision without dispatching
    #[arg(long)]
    pub dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl RouteArgs {
    fn request(&self) -> RoutingRequest {
        let mut request = RoutingRequest::from_prompt(self.category, self.message.clone());
        if let Some(budget) = self.budget {
            request = request.with_cost_budget(budget);
        }
        if let Some(floor) = self.quality_floor {
            request = request.with_quality_floor(floor);
        }
        if let Some(floor) = self.speed_floor {
            request = request.with_speed_floor(floor);
        }
        if self.function_calling {
            request = request.requiring_function_calling();
        }
        if self.vision {
            request = request.requiring_vision();
        }
        request
    }
}

/// Execute the route command.
pub async fn execute(args: RouteArgs) -> anyhow::Result<()> {
    let router = load_router(&args.config)?;
    let request = args.request();

    if args.dry_run {
        let preview = router.decide(&request);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        } else {
            print_preview(&preview);
        }
        return Ok(());
    }

    let result = router.route(&request).await.context("Routing failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn kind_label(kind: DecisionKind) -> colored::ColoredString {
    match kind {
        DecisionKind::Scored => kind.to_string().green(),
        DecisionKind::MetaRouted => kind.to_string().cyan(),
        DecisionKind::ForcedFallback => kind.to_string().yellow(),
    }
}

fn print_decision(decision: &RoutingDecision) {
    println!("  {:<12} {}", "Selected:".bold(), decision.selected.to_string().green().bold());
    println!("  {:<12} {}", "Kind:".bold(), kind_label(decision.kind));
    println!("  {:<12} {:.3}", "Confidence:".bold(), decision.confidence);
    println!(
        "  {:<12} {} of {}",
        "Est. cost:".bold(),
        usd(decision.estimated_cost),
        usd(decision.budget)
    );
    if decision.fallback_chain.is_empty() {
        println!("  {:<12} {}", "Fallbacks:".bold(), "none".dimmed());
    } else {
        let chain: Vec<String> = decision.fallback_chain.iter().map(ToString::to_string).collect();
        println!("  {:<12} {}", "Fallbacks:".bold(), chain.join(" -> "));
    }
}

#[derive(Tabled)]
struct EvaluationRow {
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Filters")]
    filters: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Score")]
    score: String,
}

impl From<&CandidateEvaluation> for EvaluationRow {
    fn from(evaluation: &CandidateEvaluation) -> Self {
        let failed = evaluation.failed_filters();
        let filters = if failed.is_empty() {
            "pass".to_string()
        } else {
            failed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        };
        Self {
            backend: evaluation.backend_id.to_string(),
            rank: evaluation.preference_rank + 1,
            filters,
            cost: evaluation.projected_cost.map_or_else(|| "-".to_string(), usd),
            score: evaluation
                .score
                .map_or_else(|| "-".to_string(), |score| format!("{:.3}", score.total)),
        }
    }
}

fn print_preview(preview: &DecisionPreview) {
    let requirements = &preview.requirements;

    println!("{}", "relay route (dry run)".bold().cyan());
    println!();
    println!("{}", "Requirements".bold());
    println!("  {:<12} {}", "Category:".bold(), requirements.category);
    if !requirements.required_capabilities.is_empty() {
        let caps: Vec<String> =
            requirements.required_capabilities.iter().map(ToString::to_string).collect();
        println!("  {:<12} {}", "Needs:".bold(), caps.join(", "));
    }
    println!(
        "  {:<12} {} (score {:.2}), reasoning {}",
        "Complexity:".bold(),
        requirements.complexity,
        requirements.complexity_score.score,
        requirements.reasoning
    );
    println!(
        "  {:<12} quality >= {:.2}, speed >= {:.2}",
        "Floors:".bold(),
        requirements.quality_floor,
        requirements.speed_floor
    );
    println!();
    println!("{}", "Decision".bold());
    print_decision(&preview.decision);
    if preview.escalates {
        println!("  {:<12} {}", "Escalation:".bold(), "selector will be consulted".cyan());
    }
    println!();

    let rows: Vec<EvaluationRow> =
        preview.decision.evaluations.iter().map(EvaluationRow::from).collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}

fn print_result(result: &RouteResult) {
    println!("{}", "relay route".bold().cyan());
    println!();
    println!(
        "  {:<12} {} ({})",
        "Served by:".bold(),
        result.backend_id.to_string().green().bold(),
        result.model_id
    );
    let used: Vec<String> = result.fallback_chain_used.iter().map(ToString::to_string).collect();
    println!("  {:<12} {}", "Attempts:".bold(), used.join(" -> "));
    println!("  {:<12} {}", "Tokens:".bold(), result.tokens_used);
    println!(
        "  {:<12} {} (estimated {})",
        "Cost:".bold(),
        usd(result.actual_cost),
        usd(result.estimated_cost)
    );
    println!("  {:<12} {}", "Rationale:".bold(), result.decision_rationale.dimmed());
    println!();
    println!("{}", result.output_text);
}
