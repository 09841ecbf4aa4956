use chrono::{DateTime, Utc};
use policy_engine::{Decision, DecisionRequest};
use serde::{Deserialize, Serialize};

/// One recorded decision: when it was made, what was asked, what was decided.
///
/// Entries are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub request: DecisionRequest,
    pub decision: Decision,
}

impl AuditEntry {
    /// Create a new `AuditEntry` with an auto-generated UUID v4 and the current
    /// UTC timestamp.
    pub fn new(request: DecisionRequest, decision: Decision) -> Self {
        Self::at(Utc::now(), request, decision)
    }

    /// Create an entry with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, request: DecisionRequest, decision: Decision) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp,
            request,
            decision,
        }
    }
}
