//! Project root resolution.
//!
//! Precedence for a starting directory `dir`:
//! 1. `dir/.td-root` names the root (absolute, or relative to `dir`);
//! 2. `dir/.todos` exists, so `dir` is the root;
//! 3. the same two checks at the git top-level;
//! 4. the same two checks at the main worktree (parent of the common git
//!    directory), so a linked worktree shares the main checkout's state;
//! 5. otherwise `dir` itself.

use crate::db::DB_FILE;
use crate::error::{Result, TdError};
use crate::vcs;
use std::fs;
use std::path::{Path, PathBuf};

pub const TODOS_DIR: &str = ".todos";
pub const ROOT_FILE: &str = ".td-root";
pub const CONFIG_FILE: &str = "config.json";
pub const SESSION_FILE: &str = "session";
pub const KEYMAP_FILE: &str = "keymap.json";

/// A resolved project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `dir`.
    #[must_use]
    pub fn discover(dir: &Path) -> Self {
        Self::at(resolve(dir))
    }

    #[must_use]
    pub fn todos_dir(&self) -> PathBuf {
        self.root.join(TODOS_DIR)
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.todos_dir().join(DB_FILE)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.todos_dir().join(CONFIG_FILE)
    }

    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.todos_dir().join(SESSION_FILE)
    }

    #[must_use]
    pub fn keymap_path(&self) -> PathBuf {
        self.todos_dir().join(KEYMAP_FILE)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.todos_dir().is_dir()
    }

    /// Fail with `not_found` unless `.todos/` exists.
    ///
    /// # Errors
    ///
    /// Returns `not_found` naming the expected directory.
    pub fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TdError::not_found(
                "project",
                format!("{} (run `td init`)", self.todos_dir().display()),
            ))
        }
    }

    /// Create `.todos/`. Returns `false` when it already existed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory cannot be created.
    pub fn init(&self) -> Result<bool> {
        if self.is_initialized() {
            return Ok(false);
        }
        fs::create_dir_all(self.todos_dir())?;
        Ok(true)
    }
}

fn read_root_file(dir: &Path) -> Option<PathBuf> {
    let raw = fs::read_to_string(dir.join(ROOT_FILE)).ok()?;
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let target = PathBuf::from(line);
    let target = if target.is_absolute() {
        target
    } else {
        dir.join(target)
    };
    Some(target.canonicalize().unwrap_or(target))
}

fn check(dir: &Path) -> Option<PathBuf> {
    if let Some(target) = read_root_file(dir) {
        return Some(target);
    }
    dir.join(TODOS_DIR).is_dir().then(|| dir.to_path_buf())
}

/// Resolve the project root for `dir`. See the module docs.
#[must_use]
pub fn resolve(dir: &Path) -> PathBuf {
    if let Some(found) = check(dir) {
        return found;
    }
    if let Some(top) = vcs::toplevel(dir) {
        if let Some(found) = check(&top) {
            return found;
        }
    }
    if let Some(main) = vcs::common_dir(dir).and_then(|common| {
        let common = common.canonicalize().unwrap_or(common);
        common.parent().map(Path::to_path_buf)
    }) {
        if let Some(found) = check(&main) {
            return found;
        }
    }
    dir.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn todos_directory_marks_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(TODOS_DIR)).unwrap();
        assert_eq!(resolve(dir.path()), dir.path());
    }

    #[test]
    fn root_file_redirects_relative_and_absolute() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        let sub = dir.path().join("sub");
        fs::create_dir_all(real.join(TODOS_DIR)).unwrap();
        fs::create_dir_all(&sub).unwrap();

        fs::write(sub.join(ROOT_FILE), "../real\n").unwrap();
        assert_eq!(resolve(&sub), real.canonicalize().unwrap());

        fs::write(sub.join(ROOT_FILE), format!("{}\n", real.display())).unwrap();
        assert_eq!(resolve(&sub), real.canonicalize().unwrap());
    }

    #[test]
    fn unrelated_directory_resolves_to_itself() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(resolve(&nested), nested);
    }

    #[test]
    fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::at(dir.path());
        assert!(ws.require_initialized().is_err());
        assert!(ws.init().unwrap());
        assert!(!ws.init().unwrap());
        ws.require_initialized().unwrap();
        assert_eq!(ws.db_path(), dir.path().join(".todos/issues.db"));
    }
}
