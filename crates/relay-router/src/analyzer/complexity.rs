//! Complexity scoring for escalation decisions.

use serde::{Deserialize, Serialize};

/// Weights for the complexity factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityWeights {
    /// Weight for required-capability flags.
    pub capabilities: f64,
    /// Weight for content length.
    pub length: f64,
    /// Weight for code content.
    pub code: f64,
    /// Weight for questions and urgency.
    pub inquiry: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self { capabilities: 0.3, length: 0.25, code: 0.25, inquiry: 0.2 }
    }
}

/// Complexity score with the factor breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexityScore {
    /// Weighted total in [0, 1].
    pub score: f64,
    pub capability_factor: f64,
    pub length_factor: f64,
    pub code_factor: f64,
    pub inquiry_factor: f64,
}

/// Raw inputs to the complexity score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityInputs {
    pub capability_count: usize,
    pub content_chars: usize,
    pub has_code: bool,
    pub questions: usize,
    pub urgent: bool,
}

impl ComplexityScore {
    /// Scores the inputs with the given weights.
    #[must_use]
    pub fn compute(inputs: &ComplexityInputs, weights: &ComplexityWeights) -> Self {
        let capability_factor = match inputs.capability_count {
            0 => 0.0,
            1 => 0.6,
            _ => 1.0,
        };
        let length_factor = length_bucket(inputs.content_chars);
        let code_factor = if inputs.has_code { 1.0 } else { 0.0 };

        #[allow(clippy::cast_precision_loss)]
        let question_part = (inputs.questions as f64 * 0.35).min(0.7);
        let urgency_part = if inputs.urgent { 0.3 } else { 0.0 };
        let inquiry_factor = (question_part + urgency_part).min(1.0);

        let score = (weights.capabilities * capability_factor
            + weights.length * length_factor
            + weights.code * code_factor
            + weights.inquiry * inquiry_factor)
            .clamp(0.0, 1.0);

        Self { score, capability_factor, length_factor, code_factor, inquiry_factor }
    }
}

/// Maps content length in characters to a 0-1 bucket.
fn length_bucket(chars: usize) -> f64 {
    match chars {
        0..200 => 0.0,
        200..1000 => 0.35,
        1000..4000 => 0.7,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_request_scores_zero() {
        let score = ComplexityScore::compute(
            &ComplexityInputs { content_chars: 12, ..ComplexityInputs::default() },
            &ComplexityWeights::default(),
        );
        assert!(score.score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_heavy_request_crosses_default_threshold() {
        let inputs = ComplexityInputs {
            capability_count: 2,
            content_chars: 1500,
            has_code: true,
            questions: 1,
            urgent: false,
        };
        let score = ComplexityScore::compute(&inputs, &ComplexityWeights::default());
        // 0.3 + 0.25 * 0.7 + 0.25 + 0.2 * 0.35
        assert!((score.score - 0.795).abs() < 1e-9);
        assert!(score.score >= 0.7);
    }

    #[test]
    fn test_inquiry_factor_caps_at_one() {
        let inputs =
            ComplexityInputs { questions: 10, urgent: true, ..ComplexityInputs::default() };
        let score = ComplexityScore::compute(&inputs, &ComplexityWeights::default());
        assert!((score.inquiry_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_length_buckets() {
        assert!(length_bucket(0).abs() < f64::EPSILON);
        assert!((length_bucket(500) - 0.35).abs() < f64::EPSILON);
        assert!((length_bucket(3999) - 0.7).abs() < f64::EPSILON);
        assert!((length_bucket(10_000) - 1.0).abs() < f64::EPSILON);
    }
}
