use std::net::Ipv4Addr;

use chrono::{DateTime, FixedOffset, Timelike};

use crate::request::{DecisionRequest, SubjectContext};
use crate::schema::{parse_hh_mm, Condition, Rule, TimeWindow, SUBJECT_PLACEHOLDER};

/// Check whether `rule` applies to `request` for the resolved `subject` at
/// instant `at`.
///
/// Every condition must hold; a rule with no conditions matches any subject.
/// This never fails: malformed inputs simply do not match.
pub fn rule_matches(
    rule: &Rule,
    request: &DecisionRequest,
    subject: &SubjectContext,
    at: DateTime<FixedOffset>,
) -> bool {
    matches_resource(&rule.resource_pattern, &request.resource, &request.subject_id)
        && matches_action(&rule.action, &request.action)
        && rule
            .conditions
            .iter()
            .all(|c| matches_condition(c, request, subject, at))
}

/// Check whether `resource` matches a resource pattern.
///
/// * `{subjectId}` is replaced with `subject_id` first. A subject id that is
///   empty or contains `*` or `.` is never substituted, so it cannot widen
///   the pattern or step into another segment; such patterns do not match.
/// * `*` matches everything.
/// * `prefix.*` matches any resource starting with `prefix.` (the dot is part
///   of the prefix, so `services.*` does not match `servicesx`).
/// * Anything else requires exact equality.
pub fn matches_resource(pattern: &str, resource: &str, subject_id: &str) -> bool {
    let resolved = if pattern.contains(SUBJECT_PLACEHOLDER) {
        if subject_id.is_empty() || subject_id.contains(['*', '.']) {
            tracing::warn!(
                subject = subject_id,
                pattern,
                "subject id cannot be substituted into a resource pattern"
            );
            return false;
        }
        pattern.replace(SUBJECT_PLACEHOLDER, subject_id)
    } else {
        pattern.to_string()
    };

    if resolved == "*" {
        return true;
    }
    if let Some(prefix) = resolved.strip_suffix('*') {
        if prefix.ends_with('.') {
            return resource.starts_with(prefix);
        }
    }
    resource == resolved
}

/// Check whether `action` matches an action pattern.
///
/// The pattern is `*` or `|`-separated alternatives, each compared exactly.
pub fn matches_action(pattern: &str, action: &str) -> bool {
    pattern
        .split('|')
        .map(str::trim)
        .any(|alt| alt == "*" || alt == action)
}

/// Evaluate a single condition.
pub fn matches_condition(
    condition: &Condition,
    request: &DecisionRequest,
    subject: &SubjectContext,
    at: DateTime<FixedOffset>,
) -> bool {
    match condition {
        Condition::Roles { values } => values.iter().any(|r| *r == subject.role),
        Condition::SubjectIds { values } => values.iter().any(|id| *id == request.subject_id),
        Condition::TimeWindows { windows } => matches_time_windows(windows, at),
        Condition::Origins { ranges } => match request.context.origin.as_deref() {
            Some(origin) => matches_origin(ranges, origin),
            None => {
                tracing::debug!(request_id = %request.id, "request carries no origin; origins condition fails");
                false
            }
        },
        Condition::Capabilities { values } => {
            values.iter().all(|cap| subject.capabilities.contains(cap))
        }
        Condition::Attribute { key, values } => request
            .context
            .attributes
            .get(key)
            .and_then(|v| v.as_str())
            .is_some_and(|v| values.iter().any(|allowed| allowed == v)),
        Condition::Amount { key, min, max } => {
            match request.context.attributes.get(key).and_then(|v| v.as_f64()) {
                Some(amount) => {
                    min.map_or(true, |lo| amount >= lo) && max.map_or(true, |hi| amount <= hi)
                }
                None => false,
            }
        }
    }
}

/// Check whether the wall-clock `HH:MM` of `at` lies inside at least one
/// window, bounds inclusive.
///
/// Windows whose end precedes their start never match; there is no wrap past
/// midnight.
pub fn matches_time_windows(windows: &[TimeWindow], at: DateTime<FixedOffset>) -> bool {
    let minute_of_day = at.hour() * 60 + at.minute();

    windows.iter().any(|w| match (parse_hh_mm(&w.start), parse_hh_mm(&w.end)) {
        (Some(start), Some(end)) => start <= minute_of_day && minute_of_day <= end,
        _ => {
            tracing::warn!(
                start = %w.start,
                end = %w.end,
                "malformed time window; treating as non-match"
            );
            false
        }
    })
}

/// Check whether `origin` equals one of the literal entries or falls inside
/// one of the inclusive `low-high` ranges.
pub fn matches_origin(ranges: &[String], origin: &str) -> bool {
    ranges.iter().any(|range| match range.split_once('-') {
        Some((low, high)) => {
            match (
                ipv4_to_u32(low.trim()),
                ipv4_to_u32(high.trim()),
                ipv4_to_u32(origin),
            ) {
                (Some(lo), Some(hi), Some(addr)) => lo <= addr && addr <= hi,
                _ => {
                    tracing::warn!(
                        range = %range,
                        origin,
                        "malformed address in origin range check; treating as non-match"
                    );
                    false
                }
            }
        }
        None => range.trim() == origin,
    })
}

/// Canonicalize a dotted IPv4 address to its 32-bit value.
pub fn ipv4_to_u32(addr: &str) -> Option<u32> {
    addr.parse::<Ipv4Addr>().ok().map(u32::from)
}
