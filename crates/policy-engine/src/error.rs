use thiserror::Error;

/// Errors returned by rule administration on the [`RuleStore`](crate::RuleStore).
///
/// A failed operation never mutates the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The rule is structurally malformed.
    #[error("invalid rule '{id}': {reason}")]
    Invalid { id: String, reason: String },

    /// A rule with the same id already exists.
    #[error("rule with id '{0}' already exists")]
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_displays_id_and_reason() {
        let err = RuleError::Invalid {
            id: "r1".into(),
            reason: "action must not be empty".into(),
        };
        assert_eq!(err.to_string(), "invalid rule 'r1': action must not be empty");
    }

    #[test]
    fn duplicate_displays_id() {
        let err = RuleError::Duplicate("admin-full-access".into());
        assert!(err.to_string().contains("admin-full-access"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuleError>();
    }
}
