use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::RuleError;
use crate::schema::{Rule, RulePatch, EMERGENCY_RULE_ID};

// ---------------------------------------------------------------------------
// RuleSet: an immutable snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredRule {
    /// Original insertion sequence; the tie-break among equal priorities.
    seq: u64,
    rule: Arc<Rule>,
}

/// An immutable, evaluation-ordered view of the rule store.
///
/// Evaluations hold an `Arc<RuleSet>` for their whole run, so concurrent
/// writes to the store never change the rules an in-flight evaluation sees.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Sorted by priority descending, then insertion sequence ascending.
    rules: Vec<StoredRule>,
    next_seq: u64,
    emergency: Option<Arc<Rule>>,
}

impl RuleSet {
    /// Rules in evaluation order; the emergency rule comes first when active.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.emergency
            .iter()
            .map(|r| r.as_ref())
            .chain(self.rules.iter().map(|s| s.rule.as_ref()))
    }

    /// Number of rules an evaluation will consider.
    pub fn len(&self) -> usize {
        self.rules.len() + usize::from(self.emergency.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emergency_mode(&self) -> bool {
        self.emergency.is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.iter().find(|r| r.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rules.iter().position(|s| s.rule.id == id)
    }

    fn sort(&mut self) {
        // Stable order: priority desc, then original insertion asc.
        self.rules
            .sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority).then(a.seq.cmp(&b.seq)));
    }
}

/// Rule counts for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub emergency_mode: bool,
}

// ---------------------------------------------------------------------------
// RuleStore
// ---------------------------------------------------------------------------

/// Owner of the policy rules.
///
/// Readers take cheap [`snapshot`](Self::snapshot)s; writers build a new
/// [`RuleSet`] and swap it in under the write lock, so a reader observes
/// either the whole pre-write or the whole post-write set.
#[derive(Debug, Default)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from rules in insertion order. Fails on the first
    /// invalid or duplicate rule.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self, RuleError> {
        let store = Self::new();
        for rule in rules {
            store.add(rule)?;
        }
        Ok(store)
    }

    /// Current rule set for evaluation.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `f` to a copy of the current set and publish the result if `f`
    /// succeeds. The write lock is held throughout so writers serialize.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut RuleSet) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RuleSet::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    /// Insert a new rule.
    pub fn add(&self, rule: Rule) -> Result<(), RuleError> {
        rule.validate()?;
        let (id, priority) = (rule.id.clone(), rule.priority);

        self.write(|set| {
            if set.position(&rule.id).is_some() {
                return Err(RuleError::Duplicate(rule.id.clone()));
            }
            let seq = set.next_seq;
            set.next_seq += 1;
            set.rules.push(StoredRule {
                seq,
                rule: Arc::new(rule),
            });
            set.sort();
            Ok(())
        })?;

        info!(rule_id = %id, priority, "added policy rule");
        Ok(())
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .write(|set| {
                Ok(match set.position(id) {
                    Some(idx) => {
                        set.rules.remove(idx);
                        true
                    }
                    None => false,
                })
            })
            .unwrap_or(false);

        if removed {
            info!(rule_id = %id, "removed policy rule");
        }
        removed
    }

    /// Merge `patch` onto an existing rule, keeping its original insertion
    /// position. Returns `Ok(false)` if no rule has this id.
    pub fn update(&self, id: &str, patch: RulePatch) -> Result<bool, RuleError> {
        let updated = self.write(|set| {
            let Some(idx) = set.position(id) else {
                return Ok(false);
            };
            let merged = set.rules[idx].rule.patched(patch);
            merged.validate()?;
            set.rules[idx].rule = Arc::new(merged);
            set.sort();
            Ok(true)
        })?;

        if updated {
            info!(rule_id = %id, "updated policy rule");
        }
        Ok(updated)
    }

    /// Owned copy of the rules in evaluation order.
    pub fn list(&self) -> Vec<Rule> {
        self.snapshot().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.snapshot().get(id).cloned()
    }

    /// Number of rules, including the emergency rule when active.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn emergency mode on or off. Returns the previous state.
    ///
    /// While on, a synthetic deny-all rule with the maximum priority is
    /// evaluated before every other rule.
    pub fn set_emergency_mode(&self, on: bool) -> bool {
        let previous = self
            .write(|set| {
                let previous = set.emergency.is_some();
                set.emergency = on.then(|| Arc::new(Rule::emergency()));
                Ok(previous)
            })
            .unwrap_or(false);

        match (previous, on) {
            (false, true) => warn!(rule_id = EMERGENCY_RULE_ID, "emergency mode enabled; all access denied"),
            (true, false) => info!(rule_id = EMERGENCY_RULE_ID, "emergency mode disabled"),
            _ => {}
        }
        previous
    }

    pub fn emergency_mode(&self) -> bool {
        self.snapshot().emergency_mode()
    }

    /// Rule counts by category. Rules without a category count under
    /// `uncategorized`.
    pub fn summary(&self) -> RuleSummary {
        let snapshot = self.snapshot();
        let mut by_category = BTreeMap::new();
        for rule in snapshot.iter() {
            let category = rule.category.as_deref().unwrap_or("uncategorized");
            *by_category.entry(category.to_string()).or_insert(0) += 1;
        }
        RuleSummary {
            total: snapshot.len(),
            by_category,
            emergency_mode: snapshot.emergency_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Effect, EMERGENCY_PRIORITY};

    fn rule(id: &str, priority: i32) -> Rule {
        Rule::new(id, "*", "*", Effect::Allow, priority)
    }

    fn ids(store: &RuleStore) -> Vec<String> {
        store.list().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn add_and_list_in_priority_order() {
        let store = RuleStore::new();
        store.add(rule("low", 10)).unwrap();
        store.add(rule("high", 90)).unwrap();
        store.add(rule("mid", 50)).unwrap();
        assert_eq!(ids(&store), vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_keeps_insertion_order() {
        let store = RuleStore::new();
        store.add(rule("first", 10)).unwrap();
        store.add(rule("second", 10)).unwrap();
        store.add(rule("third", 10)).unwrap();
        assert_eq!(ids(&store), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_id_rejected_without_mutation() {
        let store = RuleStore::new();
        store.add(rule("r1", 10)).unwrap();
        let err = store.add(rule("r1", 99)).unwrap_err();
        assert_eq!(err, RuleError::Duplicate("r1".into()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap().priority, 10);
    }

    #[test]
    fn invalid_rule_rejected_without_mutation() {
        let store = RuleStore::new();
        let err = store
            .add(Rule::new("bad", "", "*", Effect::Deny, 1))
            .unwrap_err();
        assert!(matches!(err, RuleError::Invalid { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn add_remove_add_round_trip() {
        let store = RuleStore::new();
        let r = rule("r1", 10);
        store.add(r.clone()).unwrap();
        assert!(store.remove("r1"));
        assert!(!store.remove("r1"));
        store.add(r).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_keeps_original_insertion_slot() {
        let store = RuleStore::new();
        store.add(rule("a", 10)).unwrap();
        store.add(rule("b", 20)).unwrap();
        store.add(rule("c", 10)).unwrap();

        // Dropping "b" to 10 must place it after "a" (inserted earlier) but
        // before "c" (inserted later), regardless of when it was updated.
        let updated = store
            .update(
                "b",
                RulePatch {
                    priority: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn update_unknown_id_returns_false() {
        let store = RuleStore::new();
        let updated = store.update("missing", RulePatch::default()).unwrap();
        assert!(!updated);
    }

    #[test]
    fn update_with_invalid_merge_is_rejected() {
        let store = RuleStore::new();
        store.add(rule("a", 10)).unwrap();
        let err = store
            .update(
                "a",
                RulePatch {
                    action: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuleError::Invalid { .. }));
        assert_eq!(store.get("a").unwrap().action, "*");
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = RuleStore::new();
        store.add(rule("a", 10)).unwrap();
        let snapshot = store.snapshot();
        store.add(rule("b", 20)).unwrap();
        store.remove("a");

        let seen: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(seen, vec!["a"]);
        assert_eq!(ids(&store), vec!["b"]);
    }

    #[test]
    fn list_is_a_defensive_copy() {
        let store = RuleStore::new();
        store.add(rule("a", 10)).unwrap();
        let mut listed = store.list();
        listed[0].priority = 999;
        listed.clear();
        assert_eq!(store.get("a").unwrap().priority, 10);
    }

    #[test]
    fn emergency_rule_is_evaluated_first() {
        let store = RuleStore::new();
        store.add(rule("a", EMERGENCY_PRIORITY - 1)).unwrap();
        assert!(!store.set_emergency_mode(true));
        assert!(store.emergency_mode());

        let listed = store.list();
        assert_eq!(listed[0].id, EMERGENCY_RULE_ID);
        assert_eq!(listed[0].priority, EMERGENCY_PRIORITY);
        assert_eq!(listed[0].effect, Effect::Deny);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn emergency_toggle_is_idempotent() {
        let store = RuleStore::new();
        store.add(rule("a", 10)).unwrap();
        let before = store.list();

        store.set_emergency_mode(true);
        assert!(store.set_emergency_mode(true));
        assert_eq!(store.len(), 2);

        assert!(store.set_emergency_mode(false));
        assert!(!store.set_emergency_mode(false));
        assert_eq!(store.list(), before);
    }

    #[test]
    fn emergency_id_cannot_be_added_or_removed_by_users() {
        let store = RuleStore::new();
        store.set_emergency_mode(true);
        let err = store.add(Rule::emergency()).unwrap_err();
        assert!(matches!(err, RuleError::Invalid { .. }));
        assert!(!store.remove(EMERGENCY_RULE_ID));
        assert!(store.emergency_mode());
    }

    #[test]
    fn summary_counts_by_category() {
        let store = RuleStore::from_rules([
            rule("a", 1).with_category("security"),
            rule("b", 2).with_category("security"),
            rule("c", 3).with_category("privacy"),
            rule("d", 4),
        ])
        .unwrap();
        let summary = store.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_category["security"], 2);
        assert_eq!(summary.by_category["privacy"], 1);
        assert_eq!(summary.by_category["uncategorized"], 1);
        assert!(!summary.emergency_mode);
    }

    #[test]
    fn from_rules_stops_at_duplicate() {
        let err = RuleStore::from_rules([rule("a", 1), rule("a", 2)]).unwrap_err();
        assert_eq!(err, RuleError::Duplicate("a".into()));
    }

    #[test]
    fn concurrent_readers_see_whole_sets() {
        let store = Arc::new(RuleStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    // Every published set holds at most one x-rule.
                    store.add(rule(&format!("x{i}"), 1)).unwrap();
                    store.remove(&format!("x{i}"));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.len() <= 1);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert!(store.is_empty());
    }
}
