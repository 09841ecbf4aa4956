use async_trait::async_trait;
use policy_engine::{Decision, DecisionRequest};

use crate::error::FallbackError;

/// An external evaluator consulted only through
/// [`DecisionService::decide_with_fallback`](crate::DecisionService::decide_with_fallback).
///
/// A failure here is the one case where a request is allowed without a
/// matching rule; the resulting decision is flagged for audit.
#[async_trait]
pub trait FallbackEvaluator: Send + Sync {
    async fn evaluate(&self, request: &DecisionRequest) -> Result<Decision, FallbackError>;
}
