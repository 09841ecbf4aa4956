use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use audit_log::{DEFAULT_MAX_ENTRIES, DEFAULT_TOP_DENIED};
use decision_service::{ServiceSettings, SubjectDirectory};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Policy file; the built-in policy is used when unset.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub violations: ViolationsConfig,
    #[serde(default = "default_subjects")]
    pub subjects: SubjectDirectory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_top_denied")]
    pub top_denied: usize,
    /// Mirror every audit entry to this JSON-lines file.
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            top_denied: default_top_denied(),
            mirror_path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ViolationsConfig {
    /// Append violation records to this JSON-lines file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_top_denied() -> usize {
    DEFAULT_TOP_DENIED
}

/// Unknown subjects are treated as plain users unless the config says
/// otherwise.
fn default_subjects() -> SubjectDirectory {
    SubjectDirectory::new().with_default_role("user")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config {
            subjects: default_subjects(),
            ..Config::default()
        });
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    parse(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

fn parse(contents: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse("{}").unwrap();
        assert!(cfg.policy_file.is_none());
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.audit.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(cfg.audit.top_denied, DEFAULT_TOP_DENIED);
        assert_eq!(cfg.service, ServiceSettings::default());
        assert!(cfg.violations.log_path.is_none());
        assert_eq!(cfg.subjects.lookup("anyone").unwrap().role, "user");
    }

    #[test]
    fn full_document() {
        let yaml = r#"
policy_file: /etc/rulegate/policy.yaml
logging:
  level: debug
  format: text
audit:
  max_entries: 500
  top_denied: 3
  mirror_path: /var/log/rulegate/audit.jsonl
service:
  lookup_timeout_ms: 100
  fallback_timeout_ms: 250
violations:
  log_path: /var/log/rulegate/violations.jsonl
subjects:
  entries:
    alice:
      role: admin
"#;
        let cfg = parse(yaml).unwrap();
        assert_eq!(cfg.policy_file, Some(PathBuf::from("/etc/rulegate/policy.yaml")));
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert_eq!(cfg.audit.max_entries, 500);
        assert_eq!(cfg.audit.top_denied, 3);
        assert!(cfg.audit.mirror_path.is_some());
        assert_eq!(cfg.service.lookup_timeout_ms, 100);
        assert_eq!(cfg.service.fallback_timeout_ms, 250);
        assert!(cfg.violations.log_path.is_some());
        assert_eq!(cfg.subjects.lookup("alice").unwrap().role, "admin");
        // An explicit subjects section without a default role rejects strangers.
        assert!(cfg.subjects.lookup("mallory").is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(parse("logging:\n  format: xml\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("rulegate-{}.yaml", uuid::Uuid::new_v4()));
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.subjects.lookup("anyone").unwrap().role, "user");
    }
}
