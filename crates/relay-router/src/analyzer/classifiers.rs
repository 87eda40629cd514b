//! Content classifiers that turn request text into routing signals.
//!
//! Each classifier is a pure function of the text. New classifiers plug in
//! through [`SignalClassifier`] without touching the analyzer.

use super::{ComplexityTier, ReasoningDepth};
use crate::types::Capability;
use regex::{Regex, RegexBuilder};

/// A signal detected in request content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The request needs a backend capability.
    Capability(Capability),
    /// The request looks at least this complex.
    Complexity(ComplexityTier),
    /// The request needs at least this much reasoning.
    Reasoning(ReasoningDepth),
    /// The caller wants a fast answer.
    Urgency,
    /// The content contains source code.
    CodeContent,
    /// The content asks this many questions.
    Questions(usize),
}

/// Detects signals in request content.
pub trait SignalClassifier: Send + Sync {
    /// Short name used in debug logs.
    fn name(&self) -> &str;

    /// Returns every signal found in `content`. Must be deterministic.
    fn detect(&self, content: &str) -> Vec<Signal>;
}

/// Emits a fixed signal when any keyword appears as a whole word (case-insensitive).
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    name: String,
    pattern: Option<Regex>,
    signal: Signal,
}

impl KeywordClassifier {
    /// Builds a classifier matching any of `keywords`.
    #[must_use]
    pub fn new(name: impl Into<String>, keywords: &[&str], signal: Signal) -> Self {
        let alternatives: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            // Escaped literals always form a valid pattern.
            RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { name: name.into(), pattern, signal }
    }

    /// Tool-use phrasing.
    #[must_use]
    pub fn tool_use() -> Self {
        Self::new(
            "tool-use",
            &[
                "call the api",
                "call a function",
                "function call",
                "function calling",
                "use the tool",
                "use a tool",
                "tools",
                "invoke",
                "look up",
                "search the web",
                "fetch",
                "api request",
            ],
            Signal::Capability(Capability::FunctionCalling),
        )
    }

    /// Image and visual-content phrasing.
    #[must_use]
    pub fn vision() -> Self {
        Self::new(
            "vision",
            &[
                "image",
                "images",
                "screenshot",
                "photo",
                "photograph",
                "picture",
                "diagram",
                "png",
                "jpg",
                "jpeg",
            ],
            Signal::Capability(Capability::Vision),
        )
    }

    /// Requests for strictly JSON output.
    #[must_use]
    pub fn json_output() -> Self {
        Self::new(
            "json-output",
            &[
                "respond in json",
                "return json",
                "json only",
                "valid json",
                "as json",
                "json schema",
            ],
            Signal::Capability(Capability::JsonMode),
        )
    }

    /// Keywords that indicate high task complexity.
    #[must_use]
    pub fn high_complexity() -> Self {
        Self::new(
            "high-complexity",
            &[
                "architecture",
                "refactor",
                "distributed",
                "concurrency",
                "optimize",
                "optimise",
                "migrate",
                "migration",
                "scalability",
                "security audit",
            ],
            Signal::Complexity(ComplexityTier::High),
        )
    }

    /// Keywords that indicate moderate task complexity.
    #[must_use]
    pub fn medium_complexity() -> Self {
        Self::new(
            "medium-complexity",
            &[
                "implement",
                "debug",
                "design",
                "analyze",
                "analyse",
                "integrate",
                "convert",
                "translate",
            ],
            Signal::Complexity(ComplexityTier::Medium),
        )
    }

    /// Keywords that indicate deep reasoning.
    #[must_use]
    pub fn deep_reasoning() -> Self {
        Self::new(
            "deep-reasoning",
            &[
                "step by step",
                "step-by-step",
                "prove",
                "proof",
                "derive",
                "trade-off",
                "trade-offs",
                "tradeoff",
                "tradeoffs",
                "reason through",
                "justify",
            ],
            Signal::Reasoning(ReasoningDepth::Deep),
        )
    }

    /// Keywords that indicate moderate reasoning.
    #[must_use]
    pub fn moderate_reasoning() -> Self {
        Self::new(
            "moderate-reasoning",
            &["explain", "compare", "evaluate", "why", "plan", "pros and cons"],
            Signal::Reasoning(ReasoningDepth::Moderate),
        )
    }

    /// Urgency phrasing.
    #[must_use]
    pub fn urgency() -> Self {
        Self::new(
            "urgency",
            &["urgent", "urgently", "asap", "immediately", "right now", "quick", "quickly", "fast"],
            Signal::Urgency,
        )
    }
}

impl SignalClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, content: &str) -> Vec<Signal> {
        match self.pattern {
            Some(ref pattern) if pattern.is_match(content) => vec![self.signal],
            _ => Vec::new(),
        }
    }
}

/// Detects source code via fenced blocks or several code-shaped lines.
#[derive(Debug, Clone)]
pub struct CodeContentClassifier {
    line_pattern: Option<Regex>,
    min_code_lines: usize,
}

impl CodeContentClassifier {
    #[must_use]
    pub fn new() -> Self {
        let line_pattern = Regex::new(concat!(
            r"^\s*(?:fn|def|class|impl|struct|enum|function|import|from|use|package|#include",
            r"|public|private|return)\b|[;{}]\s*$|=>",
        ))
        .ok();
        Self { line_pattern, min_code_lines: 2 }
    }
}

impl Default for CodeContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalClassifier for CodeContentClassifier {
    fn name(&self) -> &str {
        "code-content"
    }

    fn detect(&self, content: &str) -> Vec<Signal> {
        if content.contains("```") {
            return vec![Signal::CodeContent];
        }

        let Some(ref pattern) = self.line_pattern else {
            return Vec::new();
        };

        let code_lines = content.lines().filter(|line| pattern.is_match(line)).count();
        if code_lines >= self.min_code_lines { vec![Signal::CodeContent] } else { Vec::new() }
    }
}

/// Counts question marks.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionClassifier;

impl SignalClassifier for QuestionClassifier {
    fn name(&self) -> &str {
        "questions"
    }

    fn detect(&self, content: &str) -> Vec<Signal> {
        match content.matches('?').count() {
            0 => Vec::new(),
            count => vec![Signal::Questions(count)],
        }
    }
}

/// The built-in classifier set, in evaluation order.
pub fn default_classifiers() -> Vec<Box<dyn SignalClassifier>> {
    vec![
        Box::new(KeywordClassifier::tool_use()),
        Box::new(KeywordClassifier::vision()),
        Box::new(KeywordClassifier::json_output()),
        Box::new(KeywordClassifier::high_complexity()),
        Box::new(KeywordClassifier::medium_complexity()),
        Box::new(KeywordClassifier::deep_reasoning()),
        Box::new(KeywordClassifier::moderate_reasoning()),
        Box::new(KeywordClassifier::urgency()),
        Box::new(CodeContentClassifier::new()),
        Box::new(QuestionClassifier),
    ]
}
