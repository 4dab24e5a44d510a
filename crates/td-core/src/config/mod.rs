//! Configuration: per-project `config.json`, user-scope sync settings and
//! credentials, feature flags, and environment overrides.
//!
//! Every JSON file is written the same way: take an exclusive `fs2` lock on
//! a sibling `.lock` file, write a temp file in the same directory, then
//! rename it over the target.

pub mod features;
pub mod project;
pub mod user;

pub use features::{Feature, FeatureFlags};
pub use project::{ProjectConfig, WebhookConfig};
pub use user::{AuthConfig, AutoSyncSettings, SyncSettings, UserConfig};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Source of environment variables. Lets resolution be tested without
/// touching the process environment.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment. Empty values count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed map of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(pub HashMap<String, String>);

impl MapEnv {
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Parse a boolean-ish environment value.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn env_bool(env: &dyn EnvSource, key: &str) -> Option<bool> {
    env.var(key).as_deref().and_then(parse_bool)
}

pub(crate) fn env_u64(env: &dyn EnvSource, key: &str) -> Option<u64> {
    env.var(key).and_then(|v| v.trim().parse().ok())
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Read a JSON file, returning `T::default()` when it does not exist.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_locked<T: Serialize>(path: &Path, value: &T, mode: Option<u32>) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    let body = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&body)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Hold the exclusive lock for `path` while running `f`.
fn with_lock<R>(path: &Path, f: impl FnOnce() -> Result<R>) -> Result<R> {
    let lock = lock_path(path);
    if let Some(dir) = lock.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock)
        .with_context(|| format!("Failed to open {}", lock.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", lock.display()))?;
    let result = f();
    let _ = file.unlock();
    result
}

/// Replace `path` with `value` under the lock.
///
/// # Errors
///
/// Fails on lock, serialization or I/O errors.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    with_lock(path, || write_locked(path, value, None))
}

/// Like [`write_json`] with explicit unix permissions on the new file.
///
/// # Errors
///
/// Fails on lock, serialization or I/O errors.
pub fn write_json_private<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    with_lock(path, || write_locked(path, value, Some(0o600)))
}

/// Read-modify-write `path` under one lock hold.
///
/// # Errors
///
/// Fails on lock, parse, serialization or I/O errors, or when `f` fails.
pub fn update_json<T, R>(path: &Path, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R>
where
    T: Serialize + DeserializeOwned + Default,
{
    with_lock(path, || {
        let mut value: T = read_json(path)?;
        let out = f(&mut value)?;
        write_locked(path, &value, None)?;
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u32,
    }

    #[test]
    fn missing_or_empty_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        assert_eq!(read_json::<Counter>(&path).unwrap(), Counter::default());
        fs::write(&path, "  \n").unwrap();
        assert_eq!(read_json::<Counter>(&path).unwrap(), Counter::default());
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        update_json(&path, |c: &mut Counter| {
                            c.n += 1;
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(read_json::<Counter>(&path).unwrap().n, 80);
        assert!(lock_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        write_json_private(&path, &Counter { n: 1 }).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn map_env_treats_empty_as_unset() {
        let env = MapEnv::default().with("A", "").with("B", "yes");
        assert_eq!(env.var("A"), None);
        assert_eq!(env_bool(&env, "B"), Some(true));
    }
}
