//! Per-project `.todos/config.json`.

use super::{read_json, update_json, write_json};
use crate::workflow::WorkflowMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Outbound webhook target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Who may skip the different-reviewer rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    /// Sessions treated as administrative for approvals.
    pub admin_sessions: Vec<String>,
}

impl ReviewPolicy {
    #[must_use]
    pub fn is_admin(&self, session_id: &str) -> bool {
        self.admin_sessions.iter().any(|s| s == session_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_work_session: Option<String>,
    pub workflow_mode: WorkflowMode,
    /// Explicit session name; folded into the session fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    /// Feature flag overrides keyed by flag name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, bool>,
    pub review: ReviewPolicy,
}

impl ProjectConfig {
    /// Load from `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but is not valid config JSON.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Replace the file with `self`.
    ///
    /// # Errors
    ///
    /// Fails on lock or I/O errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Read-modify-write under the config lock.
    ///
    /// # Errors
    ///
    /// Fails on lock, parse or I/O errors.
    pub fn update<R>(path: &Path, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        update_json(path, |cfg: &mut Self| Ok(f(cfg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_strict_mode_without_focus() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ProjectConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.workflow_mode, WorkflowMode::Strict);
        assert!(cfg.focus.is_none());
        assert!(cfg.webhook.is_none());
    }

    #[test]
    fn update_persists_and_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        ProjectConfig::update(&path, |c| {
            c.workflow_mode = WorkflowMode::Advisory;
            c.features.insert("notes".into(), false);
        })
        .unwrap();
        ProjectConfig::update(&path, |c| c.focus = Some("td-abc123".into())).unwrap();

        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.workflow_mode, WorkflowMode::Advisory);
        assert_eq!(cfg.focus.as_deref(), Some("td-abc123"));
        assert_eq!(cfg.features.get("notes"), Some(&false));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"workflow_mode":"liberal","legacy_field":1,"review":{"admin_sessions":["ses_aaaaaa"]}}"#,
        )
        .unwrap();
        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.workflow_mode, WorkflowMode::Liberal);
        assert!(cfg.review.is_admin("ses_aaaaaa"));
        assert!(!cfg.review.is_admin("ses_bbbbbb"));
    }
}
