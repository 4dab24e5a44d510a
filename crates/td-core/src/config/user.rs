//! User-scope sync settings and credentials under `$XDG_CONFIG_HOME/td/`.

use super::{EnvSource, env_bool, env_u64, read_json, write_json, write_json_private};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "td";
pub const USER_CONFIG_FILE: &str = "config.json";
pub const AUTH_FILE: &str = "auth.json";

const fn default_snapshot_threshold() -> u64 {
    100
}

const fn default_history_tail() -> u64 {
    500
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_debounce() -> u64 {
    3
}

const fn default_interval() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSyncSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub on_start: bool,
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for AutoSyncSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            on_start: default_true(),
            debounce_secs: default_debounce(),
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Pull lag (in server events) above which a snapshot is fetched.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,
    /// Sync history rows kept locally.
    #[serde(default = "default_history_tail")]
    pub history_tail: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub auto: AutoSyncSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            url: None,
            snapshot_threshold: default_snapshot_threshold(),
            history_tail: default_history_tail(),
            request_timeout_secs: default_request_timeout(),
            auto: AutoSyncSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub sync: SyncSettings,
}

impl UserConfig {
    /// Load the file and apply `TD_SYNC_*` overrides.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be parsed.
    pub fn load(dir: &Path, env: &dyn EnvSource) -> Result<Self> {
        let mut cfg: Self = read_json(&dir.join(USER_CONFIG_FILE))?;
        cfg.apply_env(env);
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Fails on lock or I/O errors.
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(USER_CONFIG_FILE), self)
    }

    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        let sync = &mut self.sync;
        if let Some(url) = env.var("TD_SYNC_URL") {
            sync.url = Some(url);
        }
        if let Some(n) = env_u64(env, "TD_SYNC_SNAPSHOT_THRESHOLD") {
            sync.snapshot_threshold = n;
        }
        if let Some(on) = env_bool(env, "TD_SYNC_AUTO") {
            sync.auto.enabled = on;
        }
        if let Some(on) = env_bool(env, "TD_SYNC_AUTO_START") {
            sync.auto.on_start = on;
        }
        if let Some(secs) = env_u64(env, "TD_SYNC_AUTO_DEBOUNCE") {
            sync.auto.debounce_secs = secs;
        }
        if let Some(secs) = env_u64(env, "TD_SYNC_AUTO_INTERVAL") {
            sync.auto.interval_secs = secs;
        }
    }
}

/// Sync credentials. Written owner-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl AuthConfig {
    /// Load `auth.json` and apply `TD_SYNC_API_KEY` / `TD_SYNC_PROJECT`.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be parsed.
    pub fn load(dir: &Path, env: &dyn EnvSource) -> Result<Self> {
        let mut auth: Self = read_json(&dir.join(AUTH_FILE))?;
        if let Some(key) = env.var("TD_SYNC_API_KEY") {
            auth.api_key = Some(key);
        }
        if let Some(project) = env.var("TD_SYNC_PROJECT") {
            auth.project_id = Some(project);
        }
        Ok(auth)
    }

    /// # Errors
    ///
    /// Fails on lock or I/O errors.
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json_private(&dir.join(AUTH_FILE), self)
    }

    /// Remove `auth.json`. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be removed.
    pub fn clear(dir: &Path) -> Result<bool> {
        let path = dir.join(AUTH_FILE);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Existing device id, or a fresh 16-hex-char one.
    pub fn ensure_device_id(&mut self) -> &str {
        self.device_id
            .get_or_insert_with(|| crate::ids::random_hex(16))
            .as_str()
    }
}

/// `$XDG_CONFIG_HOME/td`, falling back to the platform config directory.
///
/// # Errors
///
/// Fails when no config directory can be determined.
pub fn user_config_dir(env: &dyn EnvSource) -> Result<PathBuf> {
    if let Some(xdg) = env.var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Could not determine the user config directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = UserConfig::default();
        assert_eq!(cfg.sync.snapshot_threshold, 100);
        assert_eq!(cfg.sync.history_tail, 500);
        assert_eq!(cfg.sync.request_timeout_secs, 30);
        assert!(cfg.sync.auto.enabled);
        assert_eq!(cfg.sync.auto.debounce_secs, 3);
        assert_eq!(cfg.sync.auto.interval_secs, 300);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(USER_CONFIG_FILE),
            r#"{"sync":{"url":"https://sync.example","auto":{"enabled":false}}}"#,
        )
        .unwrap();
        let cfg = UserConfig::load(dir.path(), &MapEnv::default()).unwrap();
        assert_eq!(cfg.sync.url.as_deref(), Some("https://sync.example"));
        assert!(!cfg.sync.auto.enabled);
        assert!(cfg.sync.auto.on_start);
        assert_eq!(cfg.sync.snapshot_threshold, 100);
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        UserConfig::default().save(dir.path()).unwrap();
        let env = MapEnv::default()
            .with("TD_SYNC_URL", "http://localhost:9000")
            .with("TD_SYNC_SNAPSHOT_THRESHOLD", "7")
            .with("TD_SYNC_AUTO", "0")
            .with("TD_SYNC_AUTO_INTERVAL", "60");
        let cfg = UserConfig::load(dir.path(), &env).unwrap();
        assert_eq!(cfg.sync.url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(cfg.sync.snapshot_threshold, 7);
        assert!(!cfg.sync.auto.enabled);
        assert_eq!(cfg.sync.auto.interval_secs, 60);
    }

    #[test]
    fn auth_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = AuthConfig {
            api_key: Some("k".into()),
            ..AuthConfig::default()
        };
        let device = auth.ensure_device_id().to_string();
        assert_eq!(device.len(), 16);
        auth.save(dir.path()).unwrap();

        let loaded = AuthConfig::load(dir.path(), &MapEnv::default()).unwrap();
        assert!(loaded.is_authenticated());
        assert_eq!(loaded.device_id.as_deref(), Some(device.as_str()));

        assert!(AuthConfig::clear(dir.path()).unwrap());
        assert!(!AuthConfig::clear(dir.path()).unwrap());
        let empty = AuthConfig::load(dir.path(), &MapEnv::default()).unwrap();
        assert!(!empty.is_authenticated());
    }

    #[test]
    fn xdg_config_home_wins() {
        let env = MapEnv::default().with("XDG_CONFIG_HOME", "/tmp/xdg");
        assert_eq!(
            user_config_dir(&env).unwrap(),
            PathBuf::from("/tmp/xdg/td")
        );
    }
}
