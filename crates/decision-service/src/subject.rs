use std::collections::HashMap;

use async_trait::async_trait;
use policy_engine::SubjectContext;
use serde::Deserialize;

use crate::error::ResolveError;

/// Looks up the role, capabilities and reputation of a subject.
///
/// Implementations may block on I/O; the service bounds every call with a
/// timeout.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    async fn resolve(&self, subject_id: &str) -> Result<SubjectContext, ResolveError>;
}

/// Static, map-backed [`SubjectResolver`].
///
/// Unknown subjects receive `default_role` when one is set and are rejected
/// otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubjectDirectory {
    #[serde(default)]
    default_role: Option<String>,
    #[serde(default)]
    entries: HashMap<String, SubjectContext>,
}

impl SubjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = Some(role.into());
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>, subject: SubjectContext) -> Self {
        self.insert(subject_id, subject);
        self
    }

    pub fn insert(&mut self, subject_id: impl Into<String>, subject: SubjectContext) {
        self.entries.insert(subject_id.into(), subject);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Synchronous lookup used by the async resolver.
    pub fn lookup(&self, subject_id: &str) -> Result<SubjectContext, ResolveError> {
        if let Some(subject) = self.entries.get(subject_id) {
            return Ok(subject.clone());
        }
        match &self.default_role {
            Some(role) => Ok(SubjectContext::with_role(role.clone())),
            None => Err(ResolveError::UnknownSubject(subject_id.to_string())),
        }
    }
}

#[async_trait]
impl SubjectResolver for SubjectDirectory {
    async fn resolve(&self, subject_id: &str) -> Result<SubjectContext, ResolveError> {
        self.lookup(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_subjects_resolve_to_their_entry() {
        let dir = SubjectDirectory::new().with_subject(
            "alice",
            SubjectContext::with_role("admin").with_capability("deploy"),
        );
        let alice = dir.resolve("alice").await.unwrap();
        assert_eq!(alice.role, "admin");
        assert!(alice.capabilities.contains("deploy"));
    }

    #[tokio::test]
    async fn unknown_subject_without_default_is_an_error() {
        let dir = SubjectDirectory::new();
        assert_eq!(
            dir.resolve("ghost").await,
            Err(ResolveError::UnknownSubject("ghost".into()))
        );
    }

    #[tokio::test]
    async fn unknown_subject_gets_default_role() {
        let dir = SubjectDirectory::new().with_default_role("user");
        let subject = dir.resolve("newcomer").await.unwrap();
        assert_eq!(subject, SubjectContext::with_role("user"));
    }

    #[test]
    fn deserialize_from_yaml() {
        let yaml = r#"
default_role: user
entries:
  alice:
    role: admin
    capabilities: [deploy, audit]
    reputation: 0.9
  bob:
    role: developer
"#;
        let dir: SubjectDirectory = serde_yml::from_str(yaml).unwrap();
        assert_eq!(dir.len(), 2);
        let alice = dir.lookup("alice").unwrap();
        assert_eq!(alice.reputation, Some(0.9));
        assert_eq!(alice.capabilities.len(), 2);
        assert_eq!(dir.lookup("carol").unwrap().role, "user");
    }
}
