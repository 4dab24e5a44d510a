//! Git probes.
//!
//! Everything here shells out to `git` and treats a missing binary, a
//! non-repository or a failed command as "no information": callers get
//! `None`, never an error.

use crate::ids;
use crate::model::GitSnapshot;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(?args, dir = %dir.display(), "git probe failed");
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim_end_matches(['\n', '\r']).to_string())
}

fn absolute(dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

/// Top-level directory of the working tree containing `dir`.
#[must_use]
pub fn toplevel(dir: &Path) -> Option<PathBuf> {
    git(dir, &["rev-parse", "--show-toplevel"])
        .filter(|s| !s.is_empty())
        .map(|s| absolute(dir, &s))
}

/// Shared `.git` directory; differs from the worktree's own git dir for
/// linked worktrees.
#[must_use]
pub fn common_dir(dir: &Path) -> Option<PathBuf> {
    git(dir, &["rev-parse", "--git-common-dir"])
        .filter(|s| !s.is_empty())
        .map(|s| absolute(dir, &s))
}

/// Current branch name, `HEAD` when detached.
#[must_use]
pub fn current_branch(dir: &Path) -> Option<String> {
    git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).filter(|s| !s.is_empty())
}

/// `(dirty, untracked)` counts from `git status --porcelain` output.
#[must_use]
pub fn count_status(porcelain: &str) -> (u32, u32) {
    let mut dirty = 0u32;
    let mut untracked = 0u32;
    for line in porcelain.lines().filter(|l| l.len() >= 2) {
        if line.starts_with("??") {
            untracked = untracked.saturating_add(1);
        } else if !line.starts_with("!!") {
            dirty = dirty.saturating_add(1);
        }
    }
    (dirty, untracked)
}

/// Capture HEAD, branch and working-tree counts.
#[must_use]
pub fn snapshot(dir: &Path, now: DateTime<Utc>) -> Option<GitSnapshot> {
    let commit_sha = git(dir, &["rev-parse", "HEAD"]).filter(|s| !s.is_empty())?;
    let branch = current_branch(dir).unwrap_or_else(|| "HEAD".to_string());
    let (dirty_files, untracked_files) = git(dir, &["status", "--porcelain"])
        .as_deref()
        .map_or((0, 0), count_status);
    Some(GitSnapshot {
        id: ids::new_child_id(ids::SNAPSHOT_PREFIX),
        issue_id: None,
        commit_sha,
        branch,
        dirty_files,
        untracked_files,
        captured_at: now,
    })
}
