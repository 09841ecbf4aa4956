//! # decision-service
//!
//! The facade in front of the policy engine. A [`DecisionService`] takes a
//! raw [`DecisionRequest`](policy_engine::DecisionRequest), looks up the
//! subject through a [`SubjectResolver`] under a timeout, evaluates the
//! request against a snapshot of the rule store, and records the outcome in
//! the audit log.
//!
//! Every failure before a decision exists (lookup error, lookup timeout,
//! evaluation fault) is converted into a denial with `audit_required` set.
//! The only path that can allow without a matching rule is
//! [`DecisionService::decide_with_fallback`], when the configured
//! [`FallbackEvaluator`] itself fails.

mod error;
mod fallback;
mod service;
mod subject;

pub use error::{FallbackError, ResolveError};
pub use fallback::FallbackEvaluator;
pub use service::{DecisionService, RequestState, ServiceSettings};
pub use subject::{SubjectDirectory, SubjectResolver};
