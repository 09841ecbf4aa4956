use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::schema::PolicyConfig;
use crate::store::RuleStore;

/// Policy shipped with the crate: the default access-control rules plus the
/// governance rules for agent actions.
const BUILTIN_POLICY: &str = include_str!("../policies/builtin.yaml");

/// Load a [`PolicyConfig`] from a YAML file on disk.
///
/// Validates the config after deserialization (version check, rule
/// invariants, unique ids).
pub fn load_policy(path: impl AsRef<Path>) -> Result<PolicyConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file: {}", path.display()))?;
    load_policy_from_str(&contents)
        .with_context(|| format!("failed to parse policy file: {}", path.display()))
}

/// Parse and validate a [`PolicyConfig`] from a YAML string.
pub fn load_policy_from_str(yaml: &str) -> Result<PolicyConfig> {
    let config: PolicyConfig =
        serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&config)?;
    Ok(config)
}

/// The embedded default policy.
pub fn builtin_policy() -> Result<PolicyConfig> {
    load_policy_from_str(BUILTIN_POLICY).context("built-in policy is invalid")
}

/// Build a [`RuleStore`] holding the rules of `config` in file order.
pub fn build_store(config: PolicyConfig) -> Result<RuleStore> {
    RuleStore::from_rules(config.rules).context("failed to load policy rules into the store")
}

/// Run post-deserialization validation checks.
fn validate(config: &PolicyConfig) -> Result<()> {
    if config.version != "1.0" {
        bail!(
            "unsupported policy version '{}'; only '1.0' is supported",
            config.version
        );
    }

    let mut seen = std::collections::HashSet::new();
    for rule in &config.rules {
        rule.validate()?;
        if !seen.insert(rule.id.as_str()) {
            bail!("duplicate rule id: '{}'", rule.id);
        }
    }

    Ok(())
}
