//! Requirement analysis: turns a request into a requirement profile.
//!
//! The analyzer is pure. It starts from per-category defaults, raises them
//! with signals found in the content, applies the caller's overrides, and
//! scores overall complexity for the escalation threshold.

pub mod classifiers;
pub mod complexity;

pub use classifiers::{
    CodeContentClassifier, KeywordClassifier, QuestionClassifier, Signal, SignalClassifier,
    default_classifiers,
};
pub use complexity::{ComplexityInputs, ComplexityScore, ComplexityWeights};

use crate::request::RoutingRequest;
use crate::types::{Capability, TaskCategory};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Coarse task complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    /// Minimum quality a backend needs for this tier.
    #[must_use]
    pub fn quality_floor(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 0.65,
            Self::High => 0.8,
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How much multi-step reasoning the task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningDepth {
    Shallow,
    Moderate,
    Deep,
}

impl ReasoningDepth {
    /// Minimum quality a backend needs for this depth.
    #[must_use]
    pub fn quality_floor(self) -> f64 {
        match self {
            Self::Shallow => 0.0,
            Self::Moderate => 0.6,
            Self::Deep => 0.85,
        }
    }
}

impl fmt::Display for ReasoningDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shallow => write!(f, "shallow"),
            Self::Moderate => write!(f, "moderate"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

/// Defaults applied before any content signal is considered.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryDefaults {
    pub capabilities: BTreeSet<Capability>,
    pub quality_floor: f64,
    pub speed_floor: f64,
    pub complexity: ComplexityTier,
    pub reasoning: ReasoningDepth,
}

impl CategoryDefaults {
    /// Built-in defaults for a category.
    #[must_use]
    pub fn for_category(category: TaskCategory) -> Self {
        use ComplexityTier::{High, Low, Medium};
        use ReasoningDepth::{Deep, Moderate, Shallow};

        let (capabilities, quality_floor, speed_floor, complexity, reasoning) = match category {
            TaskCategory::General => (vec![], 0.5, 0.0, Low, Shallow),
            TaskCategory::Coding => (vec![], 0.7, 0.0, Medium, Moderate),
            TaskCategory::Reasoning => (vec![], 0.8, 0.0, High, Deep),
            TaskCategory::Creative => (vec![], 0.6, 0.0, Medium, Shallow),
            TaskCategory::Summarization => (vec![], 0.5, 0.0, Low, Shallow),
            TaskCategory::Extraction => (vec![Capability::JsonMode], 0.6, 0.0, Low, Shallow),
            TaskCategory::Conversation => (vec![], 0.5, 0.6, Low, Shallow),
            TaskCategory::Vision => (vec![Capability::Vision], 0.6, 0.0, Medium, Moderate),
        };

        Self {
            capabilities: capabilities.into_iter().collect(),
            quality_floor,
            speed_floor,
            complexity,
            reasoning,
        }
    }
}

/// What a backend must offer to serve a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementProfile {
    pub category: TaskCategory,
    pub required_capabilities: BTreeSet<Capability>,
    pub quality_floor: f64,
    pub speed_floor: f64,
    pub complexity: ComplexityTier,
    pub reasoning: ReasoningDepth,
    pub urgent: bool,
    /// Complexity score compared against the escalation threshold.
    pub complexity_score: ComplexityScore,
}

/// Speed floor applied when the content asks for urgency.
pub const URGENT_SPEED_FLOOR: f64 = 0.8;

/// Derives requirement profiles from requests.
pub struct RequirementAnalyzer {
    classifiers: Vec<Box<dyn SignalClassifier>>,
    weights: ComplexityWeights,
}

impl RequirementAnalyzer {
    /// Creates an analyzer with the built-in classifiers.
    #[must_use]
    pub fn new() -> Self {
        Self { classifiers: default_classifiers(), weights: ComplexityWeights::default() }
    }

    /// Creates an analyzer with no classifiers (category defaults only).
    #[must_use]
    pub fn without_classifiers() -> Self {
        Self { classifiers: Vec::new(), weights: ComplexityWeights::default() }
    }

    /// Adds a classifier after the existing ones.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn SignalClassifier>) -> Self {
        self.classifiers.push(classifier);
        self
    }

    /// Replaces the complexity weights.
    #[must_use]
    pub fn with_weights(mut self, weights: ComplexityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Runs every classifier over `content`.
    pub fn signals(&self, content: &str) -> Vec<Signal> {
        self.classifiers
            .iter()
            .flat_map(|classifier| {
                let found = classifier.detect(content);
                if !found.is_empty() {
                    debug!(classifier = classifier.name(), signals = ?found, "Classifier matched");
                }
                found
            })
            .collect()
    }

    /// Analyzes category and content only, ignoring caller overrides.
    pub fn analyze_content(&self, category: TaskCategory, content: &str) -> RequirementProfile {
        self.build(category, content, &BTreeSet::new())
    }

    /// Analyzes a request, applying its explicit capability flags and floor overrides.
    pub fn analyze(&self, request: &RoutingRequest) -> RequirementProfile {
        let mut explicit = BTreeSet::new();
        if request.require_function_calling {
            explicit.insert(Capability::FunctionCalling);
        }
        if request.require_vision {
            explicit.insert(Capability::Vision);
        }

        let mut profile = self.build(request.task_category, &request.content(), &explicit);

        if let Some(floor) = request.quality_floor {
            profile.quality_floor = floor.clamp(0.0, 1.0);
        }
        if let Some(floor) = request.speed_floor {
            profile.speed_floor = floor.clamp(0.0, 1.0);
        }

        debug!(
            category = %profile.category,
            capabilities = ?profile.required_capabilities,
            quality_floor = profile.quality_floor,
            speed_floor = profile.speed_floor,
            complexity = %profile.complexity,
            reasoning = %profile.reasoning,
            complexity_score = profile.complexity_score.score,
            "Analyzed request requirements"
        );

        profile
    }

    fn build(
        &self,
        category: TaskCategory,
        content: &str,
        explicit: &BTreeSet<Capability>,
    ) -> RequirementProfile {
        let defaults = CategoryDefaults::for_category(category);
        let mut capabilities = defaults.capabilities;
        capabilities.extend(explicit.iter().copied());

        let mut complexity = defaults.complexity;
        let mut reasoning = defaults.reasoning;
        let mut urgent = false;
        let mut has_code = false;
        let mut questions = 0;

        for signal in self.signals(content) {
            match signal {
                Signal::Capability(capability) => {
                    capabilities.insert(capability);
                }
                Signal::Complexity(tier) => complexity = complexity.max(tier),
                Signal::Reasoning(depth) => reasoning = reasoning.max(depth),
                Signal::Urgency => urgent = true,
                Signal::CodeContent => has_code = true,
                Signal::Questions(count) => questions += count,
            }
        }

        let complexity_score = ComplexityScore::compute(
            &ComplexityInputs {
                capability_count: capabilities.len(),
                content_chars: content.chars().count(),
                has_code,
                questions,
                urgent,
            },
            &self.weights,
        );

        let quality_floor =
            defaults.quality_floor.max(complexity.quality_floor()).max(reasoning.quality_floor());
        let speed_floor = if urgent {
            defaults.speed_floor.max(URGENT_SPEED_FLOOR)
        } else {
            defaults.speed_floor
        };

        RequirementProfile {
            category,
            required_capabilities: capabilities,
            quality_floor,
            speed_floor,
            complexity,
            reasoning,
            urgent,
            complexity_score,
        }
    }
}

impl Default for RequirementAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
