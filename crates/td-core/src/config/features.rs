//! Feature flags.
//!
//! Resolution order for one flag: `TD_FEATURE_<NAME>`, then
//! `TD_DISABLE_EXPERIMENTAL` (experimental flags only), then the project
//! config's `features` map, then the flag's default.

use super::{EnvSource, ProcessEnv, ProjectConfig, env_bool};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Sync,
    Notes,
    Webhooks,
}

impl Feature {
    pub const ALL: [Self; 3] = [Self::Sync, Self::Notes, Self::Webhooks];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Notes => "notes",
            Self::Webhooks => "webhooks",
        }
    }

    #[must_use]
    pub const fn experimental(self) -> bool {
        matches!(self, Self::Sync | Self::Notes)
    }

    #[must_use]
    pub const fn default_enabled(self) -> bool {
        true
    }

    fn env_key(self) -> String {
        format!("TD_FEATURE_{}", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = crate::error::TdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::TdError::invalid(format!("unknown feature '{s}'")))
    }
}

/// Resolved flag values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    values: BTreeMap<Feature, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            values: Feature::ALL
                .into_iter()
                .map(|f| (f, f.default_enabled()))
                .collect(),
        }
    }
}

impl FeatureFlags {
    #[must_use]
    pub fn resolve(project: &ProjectConfig, env: &dyn EnvSource) -> Self {
        let no_experimental = env_bool(env, "TD_DISABLE_EXPERIMENTAL").unwrap_or(false);
        let values = Feature::ALL
            .into_iter()
            .map(|flag| {
                let value = env_bool(env, &flag.env_key())
                    .or_else(|| (no_experimental && flag.experimental()).then_some(false))
                    .or_else(|| project.features.get(flag.as_str()).copied())
                    .unwrap_or_else(|| flag.default_enabled());
                (flag, value)
            })
            .collect();
        Self { values }
    }

    #[must_use]
    pub fn enabled(&self, flag: Feature) -> bool {
        self.values
            .get(&flag)
            .copied()
            .unwrap_or_else(|| flag.default_enabled())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, bool)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }
}

static GLOBAL: OnceLock<FeatureFlags> = OnceLock::new();

/// Install the process-wide flags. The first call wins.
pub fn install(flags: FeatureFlags) -> &'static FeatureFlags {
    GLOBAL.get_or_init(|| flags)
}

/// Process-wide flags; resolves from the environment alone when nothing was
/// installed.
#[must_use]
pub fn global() -> &'static FeatureFlags {
    GLOBAL.get_or_init(|| FeatureFlags::resolve(&ProjectConfig::default(), &ProcessEnv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;

    fn project_with(flag: &str, value: bool) -> ProjectConfig {
        let mut cfg = ProjectConfig::default();
        cfg.features.insert(flag.to_string(), value);
        cfg
    }

    #[test]
    fn defaults_enable_everything() {
        let flags = FeatureFlags::resolve(&ProjectConfig::default(), &MapEnv::default());
        assert!(Feature::ALL.iter().all(|f| flags.enabled(*f)));
    }

    #[test]
    fn project_config_overrides_default() {
        let flags = FeatureFlags::resolve(&project_with("notes", false), &MapEnv::default());
        assert!(!flags.enabled(Feature::Notes));
        assert!(flags.enabled(Feature::Sync));
    }

    #[test]
    fn disable_experimental_beats_project_but_not_explicit_env() {
        let project = project_with("notes", true);
        let env = MapEnv::default().with("TD_DISABLE_EXPERIMENTAL", "1");
        let flags = FeatureFlags::resolve(&project, &env);
        assert!(!flags.enabled(Feature::Notes));
        assert!(!flags.enabled(Feature::Sync));
        assert!(flags.enabled(Feature::Webhooks));

        let env = env.with("TD_FEATURE_NOTES", "1");
        assert!(FeatureFlags::resolve(&project, &env).enabled(Feature::Notes));
    }

    #[test]
    fn env_flag_disables() {
        let env = MapEnv::default().with("TD_FEATURE_SYNC", "false");
        let flags = FeatureFlags::resolve(&ProjectConfig::default(), &env);
        assert!(!flags.enabled(Feature::Sync));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("NOTES".parse::<Feature>().unwrap(), Feature::Notes);
        assert!("telemetry".parse::<Feature>().is_err());
    }
}
