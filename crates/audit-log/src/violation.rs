use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policy_engine::{Decision, DecisionRequest, Severity};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::sink::{JsonLinesError, JsonLinesSink, SinkClosed};

/// Report emitted when a critical rule terminally denies a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub action_id: uuid::Uuid,
    pub action_type: String,
    pub subject_id: String,
    pub reasoning: Vec<String>,
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl ViolationRecord {
    /// Build a record for `decision`, or `None` unless it is a critical denial.
    pub fn from_decision(request: &DecisionRequest, decision: &Decision) -> Option<Self> {
        if !decision.is_critical_denial() {
            return None;
        }
        Some(Self {
            action_id: request.id,
            action_type: request.action.clone(),
            subject_id: request.subject_id.clone(),
            reasoning: decision.reasoning.clone(),
            rule_id: decision.matched_rule.clone(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViolationError {
    #[error(transparent)]
    Closed(#[from] SinkClosed),

    #[error("violation delivery failed: {0}")]
    Delivery(String),
}

/// Destination for violation records.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    async fn deliver(&self, record: ViolationRecord) -> Result<(), ViolationError>;
}

/// Appends violation records to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesViolationSink {
    sink: JsonLinesSink<ViolationRecord>,
}

impl JsonLinesViolationSink {
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), JsonLinesError> {
        let (sink, handle) = JsonLinesSink::start(path).await?;
        Ok((Self { sink }, handle))
    }
}

#[async_trait]
impl ViolationSink for JsonLinesViolationSink {
    async fn deliver(&self, record: ViolationRecord) -> Result<(), ViolationError> {
        self.sink.send(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine::{DecisionMetadata, DecisionSource};

    fn denial(severity: Option<Severity>) -> Decision {
        let mut metadata = DecisionMetadata::new("user", "system", DecisionSource::Rules);
        metadata.matched_severity = severity;
        let mut d = Decision::default_deny(metadata);
        d.matched_rule = Some("security-001".into());
        d.reasoning = vec!["denied by rule security-001: block deletes".into()];
        d
    }

    #[test]
    fn only_critical_denials_produce_records() {
        let request = DecisionRequest::new("agent-7", "delete", "system.root");

        let record = ViolationRecord::from_decision(&request, &denial(Some(Severity::Critical)))
            .expect("critical denial");
        assert_eq!(record.action_id, request.id);
        assert_eq!(record.action_type, "delete");
        assert_eq!(record.subject_id, "agent-7");
        assert_eq!(record.rule_id.as_deref(), Some("security-001"));
        assert_eq!(record.reasoning.len(), 1);

        assert!(ViolationRecord::from_decision(&request, &denial(Some(Severity::High))).is_none());
        assert!(ViolationRecord::from_decision(&request, &denial(None)).is_none());

        let mut allowed = denial(Some(Severity::Critical));
        allowed.allowed = true;
        assert!(ViolationRecord::from_decision(&request, &allowed).is_none());
    }

    #[tokio::test]
    async fn json_lines_sink_appends_records() {
        let path = std::env::temp_dir().join(format!("violations-{}.jsonl", uuid::Uuid::new_v4()));
        let (sink, handle) = JsonLinesViolationSink::start(&path).await.unwrap();

        let request = DecisionRequest::new("agent-7", "delete", "system.root");
        let record =
            ViolationRecord::from_decision(&request, &denial(Some(Severity::Critical))).unwrap();
        sink.deliver(record.clone()).await.unwrap();
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.ok();
        let parsed: ViolationRecord = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(parsed, record);
    }
}
