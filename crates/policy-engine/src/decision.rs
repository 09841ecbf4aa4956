use serde::{Deserialize, Serialize};

use crate::schema::Severity;

/// Reasoning line used when no rule matched.
pub const DEFAULT_DENY_REASON: &str = "no matching rule; default deny";

/// The outcome of evaluating a request against the rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Final outcome.
    pub allowed: bool,
    /// Rule that produced the terminal outcome, if any.
    pub matched_rule: Option<String>,
    /// One line per rule that influenced the outcome, in evaluation order.
    pub reasoning: Vec<String>,
    pub warnings: Vec<String>,
    pub confirmations_required: Vec<String>,
    pub audit_required: bool,
    pub metadata: DecisionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub rules_evaluated: usize,
    pub subject_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_reputation: Option<f64>,
    pub resource_category: String,
    pub latency_micros: u64,
    /// Severity of the terminal rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_severity: Option<Severity>,
    pub source: DecisionSource,
}

/// Which path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A rule produced the terminal outcome.
    Rules,
    /// No rule matched.
    DefaultDeny,
    /// Subject lookup failed or timed out.
    ContextResolutionFailed,
    /// Evaluation faulted.
    InternalError,
    /// Produced by the fallback evaluator.
    Fallback,
    /// The fallback evaluator failed; allowed but flagged for review.
    FallbackFailed,
}

impl DecisionMetadata {
    pub fn new(
        subject_role: impl Into<String>,
        resource_category: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            rules_evaluated: 0,
            subject_role: subject_role.into(),
            subject_reputation: None,
            resource_category: resource_category.into(),
            latency_micros: 0,
            matched_severity: None,
            source,
        }
    }
}

impl Decision {
    /// Denial used when no rule matched.
    pub fn default_deny(metadata: DecisionMetadata) -> Self {
        Self {
            allowed: false,
            matched_rule: None,
            reasoning: vec![DEFAULT_DENY_REASON.to_string()],
            warnings: Vec::new(),
            confirmations_required: Vec::new(),
            audit_required: false,
            metadata,
        }
    }

    /// Denial with mandatory audit, used when evaluation could not complete.
    pub fn fail_closed(reason: impl Into<String>, metadata: DecisionMetadata) -> Self {
        Self {
            allowed: false,
            matched_rule: None,
            reasoning: vec![reason.into()],
            warnings: Vec::new(),
            confirmations_required: Vec::new(),
            audit_required: true,
            metadata,
        }
    }

    /// Permission with mandatory audit. Only the fallback evaluator's error
    /// path produces this; the rule engine itself never allows by default.
    pub fn allow_flagged_for_review(reason: impl Into<String>, metadata: DecisionMetadata) -> Self {
        let reason = reason.into();
        Self {
            allowed: true,
            matched_rule: None,
            reasoning: vec![reason.clone()],
            warnings: vec![reason],
            confirmations_required: Vec::new(),
            audit_required: true,
            metadata,
        }
    }

    /// True if this is a terminal denial by a critical rule.
    pub fn is_critical_denial(&self) -> bool {
        !self.allowed && self.metadata.matched_severity == Some(Severity::Critical)
    }
}
