//! # policy-engine
//!
//! Core decision logic for rulegate. This crate owns the rule store, matches
//! individual rules against a request, and resolves a priority-ordered rule
//! set into an explained allow/deny [`Decision`].
//!
//! Resolution is deny-overrides with default deny: the first matching
//! enforcing deny ends evaluation, the first matching enforcing allow fixes
//! the outcome while lower advisory rules still add warnings, and a request
//! no enforcing rule matches is denied.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use policy_engine::{loader, DecisionRequest, PolicyEngine, SubjectContext};
//!
//! let config = loader::load_policy("policy.yaml").unwrap();
//! let store = Arc::new(loader::build_store(config).unwrap());
//! let engine = PolicyEngine::new(store);
//!
//! let request = DecisionRequest::new("u1", "read", "user.u1.profile");
//! let decision = engine.evaluate(&request, &SubjectContext::with_role("user"));
//! println!("{:?}", decision);
//! ```

mod decision;
mod error;
mod evaluator;
pub mod loader;
pub mod matcher;
mod request;
mod schema;
mod store;

// Re-export primary public API at crate root.
pub use decision::{Decision, DecisionMetadata, DecisionSource, DEFAULT_DENY_REASON};
pub use error::RuleError;
pub use evaluator::{resolve, PolicyEngine};
pub use request::{DecisionRequest, RequestContext, SubjectContext};
pub use schema::{
    Condition, Effect, PolicyConfig, Rule, RuleMode, RulePatch, Severity, TimeWindow,
    EMERGENCY_PRIORITY, EMERGENCY_RULE_ID, SUBJECT_PLACEHOLDER,
};
pub use store::{RuleSet, RuleStore, RuleSummary};
