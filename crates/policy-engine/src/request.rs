use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to perform `action` on `resource` on behalf of `subject_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub subject_id: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: RequestContext,
}

/// Situational context attached to a [`DecisionRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Network origin of the caller, as a dotted IPv4 address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Instant of the request. The offset defines the wall clock used by
    /// time-window conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form attributes consulted by `attribute` and `amount` conditions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl DecisionRequest {
    pub fn new(
        subject_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            action: action.into(),
            resource: resource.into(),
            context: RequestContext::default(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.context.origin = Some(origin.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.context.timestamp = Some(timestamp);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.attributes.insert(key.into(), value);
        self
    }

    /// The instant this request is evaluated at: its own timestamp, or the
    /// current local time when it carries none.
    pub fn evaluation_time(&self) -> DateTime<FixedOffset> {
        self.context
            .timestamp
            .unwrap_or_else(|| Local::now().fixed_offset())
    }

    /// Fill in the timestamp if absent so every later stage sees one instant.
    pub fn pin_timestamp(&mut self) -> DateTime<FixedOffset> {
        let at = self.evaluation_time();
        self.context.timestamp = Some(at);
        at
    }

    /// First dot-separated segment of the resource, used for reporting.
    pub fn resource_category(&self) -> String {
        match self.resource.split('.').next() {
            Some(first) if !first.is_empty() => first.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

/// Attributes of the requesting subject, resolved by the caller before
/// evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectContext {
    pub role: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation: Option<f64>,
}

impl SubjectContext {
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_reputation(mut self, reputation: f64) -> Self {
        self.reputation = Some(reputation);
        self
    }
}
