use std::time::Duration;

/// Subject lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown subject '{0}'")]
    UnknownSubject(String),

    #[error("subject directory unavailable: {0}")]
    Unavailable(String),
}

/// The fallback evaluator could not produce a decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FallbackError {
    #[error("fallback evaluator failed: {0}")]
    Failed(String),

    #[error("fallback evaluator timed out after {0:?}")]
    TimedOut(Duration),
}

/// Why a request could not be evaluated normally. The display form becomes
/// the reasoning of the resulting fail-closed decision.
#[derive(Debug, thiserror::Error)]
pub(crate) enum EvaluationError {
    #[error("subject lookup failed: {0}")]
    ContextResolution(#[from] ResolveError),

    #[error("subject lookup timed out after {0:?}")]
    LookupTimeout(Duration),

    #[error("evaluation failed: {0}")]
    Internal(String),

    #[error("no fallback evaluator configured")]
    NoFallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let err = EvaluationError::from(ResolveError::UnknownSubject("ghost".into()));
        assert_eq!(err.to_string(), "subject lookup failed: unknown subject 'ghost'");

        let err = EvaluationError::LookupTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "subject lookup timed out after 250ms");

        let err = FallbackError::TimedOut(Duration::from_secs(5));
        assert_eq!(err.to_string(), "fallback evaluator timed out after 5s");
    }
}
