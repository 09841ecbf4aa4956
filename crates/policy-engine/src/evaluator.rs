use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, trace};

use crate::decision::{Decision, DecisionMetadata, DecisionSource};
use crate::matcher::rule_matches;
use crate::request::{DecisionRequest, SubjectContext};
use crate::schema::{Effect, Rule, RuleMode};
use crate::store::{RuleSet, RuleStore};

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// The decision resolver.
///
/// Holds a handle to the shared [`RuleStore`] and evaluates each request
/// against one snapshot of it.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<RuleStore>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.store.snapshot();
        f.debug_struct("PolicyEngine")
            .field("num_rules", &snapshot.len())
            .field("emergency_mode", &snapshot.emergency_mode())
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Evaluate `request` for an already-resolved subject.
    ///
    /// The request timestamp (or "now" when absent) is sampled once and used
    /// for every time-window check.
    pub fn evaluate(&self, request: &DecisionRequest, subject: &SubjectContext) -> Decision {
        let snapshot = self.store.snapshot();
        resolve(&snapshot, request, subject, request.evaluation_time())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a decision over `rules` in evaluation order.
///
/// * An enforcing deny is terminal and stops the scan.
/// * An enforcing allow fixes the outcome; the scan continues, but only
///   advisory (warn / audit) rules of strictly lower priority contribute.
/// * Advisory rules add warnings, confirmations and the audit flag.
/// * If no enforcing rule matches, the request is denied.
pub fn resolve(
    rules: &RuleSet,
    request: &DecisionRequest,
    subject: &SubjectContext,
    at: DateTime<FixedOffset>,
) -> Decision {
    let started = Instant::now();
    debug!(
        request_id = %request.id,
        subject = %request.subject_id,
        action = %request.action,
        resource = %request.resource,
        role = %subject.role,
        "evaluating request against policy"
    );

    let mut acc = Accumulator::default();

    for rule in rules.iter() {
        acc.rules_evaluated += 1;

        if let Some(allowed) = acc.allowed_by {
            if rule.mode == RuleMode::Enforce || rule.priority >= allowed.priority {
                continue;
            }
        }
        if !rule_matches(rule, request, subject, at) {
            continue;
        }
        trace!(rule = %rule.id, "rule matched request");

        match (rule.mode, rule.effect) {
            (RuleMode::Enforce, Effect::Deny) => {
                acc.contribute(rule);
                acc.reasoning
                    .push(format!("denied by rule {}: {}", rule.id, rule.label()));
                acc.denied_by = Some(rule);
                break;
            }
            (RuleMode::Enforce, Effect::Allow) => {
                acc.contribute(rule);
                acc.reasoning
                    .push(format!("allowed by rule {}: {}", rule.id, rule.label()));
                acc.allowed_by = Some(rule);
            }
            (RuleMode::Warn, _) => {
                acc.contribute(rule);
                acc.warnings.push(format!("{}: {}", rule.id, rule.label()));
                acc.reasoning
                    .push(format!("warning from rule {}: {}", rule.id, rule.label()));
            }
            (RuleMode::Audit, _) => {
                acc.contribute(rule);
                acc.reasoning
                    .push(format!("audit noted by rule {}: {}", rule.id, rule.label()));
            }
        }
    }

    let decision = acc.finish(request, subject, started);
    debug!(
        request_id = %request.id,
        allowed = decision.allowed,
        matched_rule = ?decision.matched_rule,
        rules_evaluated = decision.metadata.rules_evaluated,
        "policy decision resolved"
    );
    decision
}

#[derive(Default)]
struct Accumulator<'a> {
    rules_evaluated: usize,
    allowed_by: Option<&'a Rule>,
    denied_by: Option<&'a Rule>,
    reasoning: Vec<String>,
    warnings: Vec<String>,
    confirmations: Vec<String>,
    audit_required: bool,
}

impl<'a> Accumulator<'a> {
    /// Collect the confirmation and audit flags of a contributing rule.
    fn contribute(&mut self, rule: &'a Rule) {
        if rule.requires_confirmation {
            self.confirmations.push(format!("{}: {}", rule.id, rule.label()));
        }
        self.audit_required |= rule.audit_required;
    }

    fn finish(
        self,
        request: &DecisionRequest,
        subject: &SubjectContext,
        started: Instant,
    ) -> Decision {
        let terminal = self.denied_by.or(self.allowed_by);
        let source = if terminal.is_some() {
            DecisionSource::Rules
        } else {
            DecisionSource::DefaultDeny
        };

        let mut metadata =
            DecisionMetadata::new(subject.role.clone(), request.resource_category(), source);
        metadata.rules_evaluated = self.rules_evaluated;
        metadata.subject_reputation = subject.reputation;
        metadata.matched_severity = terminal.map(|r| r.severity);
        metadata.latency_micros = started.elapsed().as_micros() as u64;

        let Some(rule) = terminal else {
            let mut decision = Decision::default_deny(metadata);
            // Advisory annotations still surface on a default denial.
            let mut reasoning = self.reasoning;
            reasoning.append(&mut decision.reasoning);
            decision.reasoning = reasoning;
            decision.warnings = self.warnings;
            decision.confirmations_required = self.confirmations;
            decision.audit_required = self.audit_required;
            return decision;
        };

        Decision {
            allowed: self.denied_by.is_none(),
            matched_rule: Some(rule.id.clone()),
            reasoning: self.reasoning,
            warnings: self.warnings,
            confirmations_required: self.confirmations,
            audit_required: self.audit_required,
            metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
