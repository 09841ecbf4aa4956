use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Id of the synthetic deny-all rule injected by emergency mode.
pub const EMERGENCY_RULE_ID: &str = "emergency-mode";

/// Priority of the emergency rule. User rules must stay strictly below it.
pub const EMERGENCY_PRIORITY: i32 = i32::MAX;

/// Placeholder in a resource pattern that is replaced with the requesting
/// subject's id before matching.
pub const SUBJECT_PLACEHOLDER: &str = "{subjectId}";

/// Top-level policy file loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Rules in insertion order. Evaluation order is derived from priority.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A single declarative policy rule.
///
/// All conditions must hold for the rule to match (AND logic). A rule without
/// conditions applies to every subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique, immutable rule id.
    pub id: String,
    /// Resource pattern: `*`, `prefix.*`, or an exact name. May contain
    /// `{subjectId}`.
    #[serde(rename = "resource")]
    pub resource_pattern: String,
    /// Action name, `*`, or `|`-separated alternatives.
    pub action: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub effect: Effect,
    #[serde(default)]
    pub mode: RuleMode,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Higher evaluates first. Default 0.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub audit_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// Whether a matching rule settles the outcome or only annotates it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// The rule's effect is decisive.
    #[default]
    Enforce,
    /// Contributes a warning; never decides the outcome.
    Warn,
    /// Contributes confirmations and the audit flag; never decides the outcome.
    Audit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A typed condition checked against the request and the resolved subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Subject role must be one of `values`.
    Roles { values: Vec<String> },
    /// Subject id must be one of `values`.
    SubjectIds { values: Vec<String> },
    /// Request wall-clock time must fall in at least one window.
    TimeWindows { windows: Vec<TimeWindow> },
    /// Request origin must equal an address or fall in a `low-high` range.
    Origins { ranges: Vec<String> },
    /// Subject must hold every listed capability.
    Capabilities { values: Vec<String> },
    /// String request attribute `key` must be one of `values`.
    Attribute { key: String, values: Vec<String> },
    /// Numeric request attribute `key` must lie within the inclusive bounds.
    Amount {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

/// Same-day wall-clock window, `HH:MM` bounds, both inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Parse an `HH:MM` string into minutes after midnight.
pub(crate) fn parse_hh_mm(value: &str) -> Option<u32> {
    use chrono::Timelike;

    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .ok()
        .map(|t| t.hour() * 60 + t.minute())
}

/// Partial rule used by [`RuleStore::update`](crate::RuleStore::update).
/// `None` fields are left untouched; the id cannot change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default, rename = "resource")]
    pub resource_pattern: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub effect: Option<Effect>,
    #[serde(default)]
    pub mode: Option<RuleMode>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub requires_confirmation: Option<bool>,
    #[serde(default)]
    pub audit_required: Option<bool>,
}

impl Rule {
    /// Build an enforcing rule with no conditions and default classification.
    pub fn new(
        id: impl Into<String>,
        resource_pattern: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            resource_pattern: resource_pattern.into(),
            action: action.into(),
            conditions: Vec::new(),
            effect,
            mode: RuleMode::Enforce,
            severity: Severity::default(),
            category: None,
            description: None,
            priority,
            requires_confirmation: false,
            audit_required: false,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_mode(mut self, mode: RuleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn requiring_audit(mut self) -> Self {
        self.audit_required = true;
        self
    }

    /// The synthetic deny-all rule used by emergency mode.
    pub fn emergency() -> Self {
        Self::new(EMERGENCY_RULE_ID, "*", "*", Effect::Deny, EMERGENCY_PRIORITY)
            .with_severity(Severity::High)
            .with_category("emergency")
            .with_description("emergency mode is active; all access denied")
            .requiring_audit()
    }

    /// Human-readable label used in reasoning and warnings.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }

    /// Merge a patch onto a copy of this rule.
    pub(crate) fn patched(&self, patch: RulePatch) -> Rule {
        let mut rule = self.clone();
        if let Some(v) = patch.resource_pattern {
            rule.resource_pattern = v;
        }
        if let Some(v) = patch.action {
            rule.action = v;
        }
        if let Some(v) = patch.conditions {
            rule.conditions = v;
        }
        if let Some(v) = patch.effect {
            rule.effect = v;
        }
        if let Some(v) = patch.mode {
            rule.mode = v;
        }
        if let Some(v) = patch.severity {
            rule.severity = v;
        }
        if let Some(v) = patch.category {
            rule.category = Some(v);
        }
        if let Some(v) = patch.description {
            rule.description = Some(v);
        }
        if let Some(v) = patch.priority {
            rule.priority = v;
        }
        if let Some(v) = patch.requires_confirmation {
            rule.requires_confirmation = v;
        }
        if let Some(v) = patch.audit_required {
            rule.audit_required = v;
        }
        rule
    }

    /// Check the structural invariants of a user-supplied rule.
    pub fn validate(&self) -> Result<(), RuleError> {
        let invalid = |reason: String| RuleError::Invalid {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("rule id must not be empty".into()));
        }
        if self.id == EMERGENCY_RULE_ID {
            return Err(invalid(format!("rule id '{EMERGENCY_RULE_ID}' is reserved")));
        }
        if self.resource_pattern.trim().is_empty() {
            return Err(invalid("resource pattern must not be empty".into()));
        }
        if self.action.trim().is_empty() {
            return Err(invalid("action must not be empty".into()));
        }
        if self.priority >= EMERGENCY_PRIORITY {
            return Err(invalid(format!(
                "priority {} is reserved for emergency mode",
                self.priority
            )));
        }

        for condition in &self.conditions {
            condition.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

impl Condition {
    fn validate(&self) -> Result<(), String> {
        match self {
            Condition::Roles { values }
            | Condition::SubjectIds { values }
            | Condition::Capabilities { values }
            | Condition::Attribute { values, .. } => {
                if values.is_empty() {
                    return Err(format!("{} condition lists no values", self.kind()));
                }
            }
            Condition::Origins { ranges } => {
                if ranges.is_empty() {
                    return Err("origins condition lists no ranges".into());
                }
            }
            Condition::TimeWindows { windows } => {
                if windows.is_empty() {
                    return Err("time_windows condition lists no windows".into());
                }
                for w in windows {
                    for bound in [&w.start, &w.end] {
                        if parse_hh_mm(bound).is_none() {
                            return Err(format!("time window bound '{bound}' is not HH:MM"));
                        }
                    }
                }
            }
            Condition::Amount { min, max, .. } => match (min, max) {
                (None, None) => return Err("amount condition needs min or max".into()),
                (Some(lo), Some(hi)) if lo > hi => {
                    return Err(format!("amount condition min {lo} exceeds max {hi}"))
                }
                _ => {}
            },
        }

        if let Condition::Attribute { key, .. } | Condition::Amount { key, .. } = self {
            if key.trim().is_empty() {
                return Err(format!("{} condition has an empty key", self.kind()));
            }
        }
        Ok(())
    }

    /// Short name of the condition variant, matching its YAML tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Roles { .. } => "roles",
            Condition::SubjectIds { .. } => "subject_ids",
            Condition::TimeWindows { .. } => "time_windows",
            Condition::Origins { .. } => "origins",
            Condition::Capabilities { .. } => "capabilities",
            Condition::Attribute { .. } => "attribute",
            Condition::Amount { .. } => "amount",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_full_rule() {
        let yaml = r#"
id: "user-own-data"
resource: "user.{subjectId}.*"
action: "*"
effect: allow
priority: 60
conditions:
  - type: roles
    values: [user]
  - type: time_windows
    windows:
      - { start: "02:00", end: "04:00" }
  - type: origins
    ranges: ["10.0.0.1-10.0.0.255", "192.168.1.7"]
  - type: amount
    key: amount
    min: 1000
"#;
        let rule: Rule = serde_yml::from_str(yaml).unwrap();
        assert_eq!(rule.resource_pattern, "user.{subjectId}.*");
        assert_eq!(rule.effect, Effect::Allow);
        assert_eq!(rule.mode, RuleMode::Enforce);
        assert_eq!(rule.severity, Severity::Medium);
        assert_eq!(rule.conditions.len(), 4);
        match &rule.conditions[3] {
            Condition::Amount { key, min, max } => {
                assert_eq!(key, "amount");
                assert_eq!(*min, Some(1000.0));
                assert!(max.is_none());
            }
            other => panic!("expected Amount condition, got {:?}", other),
        }
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn default_priority_is_zero() {
        let yaml = r#"
id: "no-priority"
resource: "*"
action: "*"
effect: deny
"#;
        let rule: Rule = serde_yml::from_str(yaml).unwrap();
        assert_eq!(rule.priority, 0);
        assert!(!rule.requires_confirmation);
        assert!(!rule.audit_required);
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let rule = Rule::new("r", "", "read", Effect::Allow, 1);
        assert!(matches!(rule.validate(), Err(RuleError::Invalid { .. })));

        let rule = Rule::new("r", "docs.*", " ", Effect::Allow, 1);
        assert!(matches!(rule.validate(), Err(RuleError::Invalid { .. })));

        let rule = Rule::new("", "docs.*", "read", Effect::Allow, 1);
        assert!(matches!(rule.validate(), Err(RuleError::Invalid { .. })));
    }

    #[test]
    fn validate_rejects_reserved_id_and_priority() {
        let rule = Rule::new(EMERGENCY_RULE_ID, "*", "*", Effect::Deny, 1);
        assert!(rule.validate().is_err());

        let rule = Rule::new("r", "*", "*", Effect::Allow, EMERGENCY_PRIORITY);
        let err = rule.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"), "unexpected error: {err}");
    }

    #[test]
    fn validate_rejects_bad_time_window() {
        let rule = Rule::new("r", "*", "*", Effect::Allow, 1).with_condition(
            Condition::TimeWindows {
                windows: vec![TimeWindow::new("2:00", "04:00")],
            },
        );
        let err = rule.validate().unwrap_err();
        assert!(err.to_string().contains("HH:MM"), "unexpected error: {err}");
    }

    #[test]
    fn validate_accepts_inverted_window() {
        // Inverted windows are legal but never match.
        let rule = Rule::new("r", "*", "*", Effect::Allow, 1).with_condition(
            Condition::TimeWindows {
                windows: vec![TimeWindow::new("22:00", "02:00")],
            },
        );
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_condition_lists() {
        let rule = Rule::new("r", "*", "*", Effect::Allow, 1)
            .with_condition(Condition::Roles { values: vec![] });
        let err = rule.validate().unwrap_err();
        assert!(err.to_string().contains("roles"), "unexpected error: {err}");
    }

    #[test]
    fn validate_rejects_bad_amount_bounds() {
        let rule = Rule::new("r", "*", "*", Effect::Allow, 1).with_condition(Condition::Amount {
            key: "amount".into(),
            min: Some(10.0),
            max: Some(1.0),
        });
        assert!(rule.validate().is_err());

        let rule = Rule::new("r", "*", "*", Effect::Allow, 1).with_condition(Condition::Amount {
            key: "amount".into(),
            min: None,
            max: None,
        });
        assert!(rule.validate().is_err());
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let rule = Rule::new("r", "docs.*", "read", Effect::Allow, 5).with_description("docs");
        let patched = rule.patched(RulePatch {
            priority: Some(9),
            effect: Some(Effect::Deny),
            ..Default::default()
        });
        assert_eq!(patched.id, "r");
        assert_eq!(patched.priority, 9);
        assert_eq!(patched.effect, Effect::Deny);
        assert_eq!(patched.resource_pattern, "docs.*");
        assert_eq!(patched.description.as_deref(), Some("docs"));
    }

    #[test]
    fn parse_hh_mm_bounds() {
        assert_eq!(parse_hh_mm("00:00"), Some(0));
        assert_eq!(parse_hh_mm("23:59"), Some(23 * 60 + 59));
        assert_eq!(parse_hh_mm("24:00"), None);
        assert_eq!(parse_hh_mm("7:30"), None);
        assert_eq!(parse_hh_mm("ab:cd"), None);
    }
}
