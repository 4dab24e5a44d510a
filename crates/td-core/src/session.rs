//! Session identity.
//!
//! A session id is `ses_` plus six hex characters of a SHA-256 over the
//! fingerprint components:
//! - process ancestry: names of the nearest ancestors (window of 3) and the
//!   pid of the first one that is not a shell or wrapper;
//! - allow-listed environment variables that identify a terminal or agent
//!   runtime;
//! - the controlling terminal of stdin;
//! - the explicit session name from project config, if any.
//!
//! `TD_SESSION` bypasses all of this. The resolved id is cached in
//! `.todos/session` with the time it was first seen.

use crate::config::{self, EnvSource};
use crate::workspace::Workspace;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const SESSION_PREFIX: &str = "ses_";
pub const ENV_SESSION: &str = "TD_SESSION";
const ANCESTRY_WINDOW: usize = 3;
const ID_HEX_LEN: usize = 6;

const ENV_ALLOW_LIST: &[&str] = &[
    "TERM_SESSION_ID",
    "ITERM_SESSION_ID",
    "TMUX_PANE",
    "STY",
    "WINDOWID",
    "WT_SESSION",
    "KITTY_WINDOW_ID",
    "VSCODE_PID",
    "CURSOR_TRACE_ID",
    "AGENT_SESSION_ID",
];

const WRAPPERS: &[&str] = &[
    "sh", "bash", "zsh", "fish", "dash", "ksh", "env", "sudo", "timeout", "xargs", "nohup",
];

/// Cached session record in `.todos/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
}

/// Resolved identity for this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    /// `true` when the id differs from the cached one.
    pub is_new: bool,
    /// `true` when `TD_SESSION` supplied the id.
    pub explicit: bool,
}

/// Inputs to the fingerprint, gathered separately so they can be faked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintInputs {
    pub ancestry: Vec<String>,
    pub env: Vec<(String, String)>,
    pub tty: Option<String>,
    pub name: Option<String>,
}

impl FingerprintInputs {
    /// Gather from the running process.
    #[must_use]
    pub fn collect(env: &dyn EnvSource, name: Option<&str>) -> Self {
        Self {
            ancestry: ancestry().to_vec(),
            env: ENV_ALLOW_LIST
                .iter()
                .filter_map(|key| env.var(key).map(|v| ((*key).to_string(), v)))
                .collect(),
            tty: controlling_tty(),
            name: name.map(str::to_string),
        }
    }

    /// Canonical text form that is hashed.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name={name}"));
        }
        for a in &self.ancestry {
            parts.push(format!("proc={a}"));
        }
        for (k, v) in &self.env {
            parts.push(format!("env:{k}={v}"));
        }
        if let Some(tty) = &self.tty {
            parts.push(format!("tty={tty}"));
        }
        parts.join("\n")
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        session_id_for(&self.canonical())
    }
}

/// `ses_` + the first six hex characters of SHA-256(`fingerprint`).
#[must_use]
pub fn session_id_for(fingerprint: &str) -> String {
    let digest = Sha256::digest(fingerprint.as_bytes());
    let hex: String = digest
        .iter()
        .take(ID_HEX_LEN.div_ceil(2))
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{SESSION_PREFIX}{}", &hex[..ID_HEX_LEN])
}

/// Resolve the session for `ws`, refreshing the cache when it changed.
///
/// # Errors
///
/// Fails when the cache file exists but cannot be read or written.
pub fn resolve(
    ws: &Workspace,
    env: &dyn EnvSource,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SessionInfo> {
    if let Some(explicit) = env.var(ENV_SESSION) {
        return Ok(SessionInfo {
            id: explicit.trim().to_string(),
            first_seen: now,
            is_new: false,
            explicit: true,
        });
    }
    let inputs = FingerprintInputs::collect(env, name);
    resolve_with(ws, &inputs, now)
}

/// [`resolve`] with pre-gathered fingerprint inputs.
///
/// # Errors
///
/// Fails when the cache file cannot be read or written.
pub fn resolve_with(
    ws: &Workspace,
    inputs: &FingerprintInputs,
    now: DateTime<Utc>,
) -> Result<SessionInfo> {
    let fingerprint = inputs.canonical();
    let id = session_id_for(&fingerprint);
    let path = ws.session_path();
    let cached: Option<SessionRecord> = config::read_json(&path)?;

    if let Some(record) = cached.as_ref().filter(|r| r.id == id) {
        return Ok(SessionInfo {
            id,
            first_seen: record.first_seen,
            is_new: false,
            explicit: false,
        });
    }

    if ws.is_initialized() {
        let record = SessionRecord {
            id: id.clone(),
            fingerprint,
            first_seen: now,
        };
        config::write_json(&path, &Some(record))?;
        tracing::debug!(session = %id, "new session recorded");
    }
    Ok(SessionInfo {
        id,
        first_seen: now,
        is_new: cached.is_some(),
        explicit: false,
    })
}

/// Cached record, if any.
///
/// # Errors
///
/// Fails when the file exists but cannot be parsed.
pub fn cached(ws: &Workspace) -> Result<Option<SessionRecord>> {
    config::read_json(&ws.session_path())
}

fn ancestry() -> &'static [String] {
    static ANCESTRY: OnceLock<Vec<String>> = OnceLock::new();
    ANCESTRY.get_or_init(walk_ancestry)
}

#[cfg(target_os = "linux")]
fn walk_ancestry() -> Vec<String> {
    let mut out = Vec::new();
    let mut pid = parent_of(std::process::id());
    let mut anchored = false;
    while let Some(current) = pid.filter(|p| *p > 1) {
        if out.len() >= ANCESTRY_WINDOW {
            break;
        }
        let name = std::fs::read_to_string(format!("/proc/{current}/comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if !anchored && !WRAPPERS.contains(&name.as_str()) {
            out.push(format!("{name}:{current}"));
            anchored = true;
        } else {
            out.push(name);
        }
        pid = parent_of(current);
    }
    out
}

#[cfg(target_os = "linux")]
fn parent_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_ppid(&stat)
}

/// Parent pid from a `/proc/<pid>/stat` line. The command name is wrapped in
/// parentheses and may itself contain spaces or parentheses.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn walk_ancestry() -> Vec<String> {
    Vec::new()
}

#[cfg(unix)]
fn controlling_tty() -> Option<String> {
    use std::io::IsTerminal;
    if !std::io::stdin().is_terminal() {
        return None;
    }
    std::fs::read_link("/proc/self/fd/0")
        .ok()
        .map(|p| p.display().to_string())
}

#[cfg(not(unix))]
fn controlling_tty() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;
    use chrono::TimeZone;

    fn inputs(name: &str) -> FingerprintInputs {
        FingerprintInputs {
            ancestry: vec!["agent:4242".into(), "bash".into()],
            env: vec![("TMUX_PANE".into(), "%3".into())],
            tty: Some("/dev/pts/3".into()),
            name: Some(name.into()),
        }
    }

    #[test]
    fn ids_are_stable_and_short() {
        let a = inputs("alpha").session_id();
        assert_eq!(a, inputs("alpha").session_id());
        assert!(a.starts_with(SESSION_PREFIX));
        assert_eq!(a.len(), SESSION_PREFIX.len() + ID_HEX_LEN);
        assert_ne!(a, inputs("beta").session_id());
    }

    #[test]
    fn ppid_parsing_handles_odd_names() {
        assert_eq!(parse_ppid("123 (cargo) S 45 123 123 0"), Some(45));
        assert_eq!(parse_ppid("77 (my (weird) proc) R 9 77"), Some(9));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[test]
    fn cache_keeps_first_seen_until_fingerprint_changes() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path());
        ws.init().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let first = resolve_with(&ws, &inputs("alpha"), t0).unwrap();
        assert!(!first.is_new);
        let again = resolve_with(&ws, &inputs("alpha"), t1).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.first_seen, t0);

        let changed = resolve_with(&ws, &inputs("beta"), t1).unwrap();
        assert!(changed.is_new);
        assert_ne!(changed.id, first.id);
        assert_eq!(cached(&ws).unwrap().unwrap().first_seen, t1);
    }

    #[test]
    fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path());
        let env = MapEnv::default().with(ENV_SESSION, "reviewer-b");
        let info = resolve(&ws, &env, None, Utc::now()).unwrap();
        assert_eq!(info.id, "reviewer-b");
        assert!(info.explicit);
    }
}
