//! Weighted candidate scoring.

use crate::analyzer::RequirementProfile;
use crate::types::{BackendProfile, ScoringWeights};
use serde::Serialize;

/// Score of one candidate with its three terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub quality_term: f64,
    pub cost_term: f64,
    pub speed_term: f64,
    pub total: f64,
}

/// `min(value / floor, 1)`, or 1 when there is no floor.
fn floor_ratio(value: f64, floor: f64) -> f64 {
    if floor <= 0.0 { 1.0 } else { (value / floor).min(1.0) }
}

/// Scores a candidate that already passed every filter.
///
/// `quality_term = min(quality / floor, 1)`, `cost_term = max(0, 1 - cost / budget)`
/// and the speed term is the raw speed when there is no speed floor, otherwise
/// `min(speed / floor, 1)`. A non-positive budget only admits zero-cost
/// candidates, which get the full cost term.
pub fn score(
    profile: &BackendProfile,
    requirements: &RequirementProfile,
    projected_cost: f64,
    budget: f64,
    weights: &ScoringWeights,
) -> ScoreBreakdown {
    let quality_term = floor_ratio(profile.quality, requirements.quality_floor);

    let cost_term = if budget <= 0.0 { 1.0 } else { (1.0 - projected_cost / budget).max(0.0) };

    let speed_term = if requirements.speed_floor <= 0.0 {
        profile.speed.clamp(0.0, 1.0)
    } else {
        floor_ratio(profile.speed, requirements.speed_floor)
    };

    let total =
        weights.quality * quality_term + weights.cost * cost_term + weights.speed * speed_term;

    ScoreBreakdown { quality_term, cost_term, speed_term, total }
}
