//! `td link` / `td unlink`: associate files with an issue.

use super::parse_value;
use crate::app::App;
use crate::output::mutation_line;
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use std::path::{Path, PathBuf};
use td_core::model::FileRole;
use td_core::mutation::activity;
use td_core::vcs;

#[derive(Args, Debug)]
pub struct LinkArgs {
    pub id: String,

    /// File path, absolute or relative to the current directory.
    pub path: PathBuf,

    /// implementation, test, reference or config.
    #[arg(short, long, default_value = "implementation")]
    pub role: String,
}

#[derive(Args, Debug)]
pub struct UnlinkArgs {
    pub id: String,
    pub path: PathBuf,
}

/// Path relative to the project root when it lies inside it.
fn project_relative(root: &Path, path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    let absolute = absolute.canonicalize().unwrap_or(absolute);
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    absolute
        .strip_prefix(&root)
        .map_or(absolute.as_path(), |rel| rel)
        .to_string_lossy()
        .replace('\\', "/")
}

/// # Errors
///
/// `not_found` for unknown issues, `invalid_input` for a bad role.
pub fn run_link(args: &LinkArgs, app: &App) -> Result<()> {
    let id = App::issue_id(&args.id)?;
    let role = parse_value::<FileRole>(&args.role)?;
    let path = project_relative(app.root(), &args.path);
    let sha = vcs::snapshot(app.root(), Utc::now())
        .map(|s| s.commit_sha)
        .unwrap_or_default();
    let applied = activity::link_file(&app.store, app.ctx(), &id, &path, role, sha)?;
    mutation_line(app.output, &format!("LINKED {id} {path}"), &applied.value)
}

/// # Errors
///
/// `not_found` when the file is not linked.
pub fn run_unlink(args: &UnlinkArgs, app: &App) -> Result<()> {
    let id = App::issue_id(&args.id)?;
    let path = project_relative(app.root(), &args.path);
    let applied = activity::unlink_file(&app.store, app.ctx(), &id, &path)?;
    mutation_line(app.output, &format!("UNLINKED {id} {path}"), &applied.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_inside_root_become_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        let rel = project_relative(dir.path(), &dir.path().join("src/lib.rs"));
        assert_eq!(rel, "src/lib.rs");
    }

    #[test]
    fn paths_outside_root_stay_absolute() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let file = other.path().join("x.txt");
        std::fs::write(&file, "").unwrap();
        let rel = project_relative(root.path(), &file);
        assert!(rel.ends_with("x.txt"));
        assert!(Path::new(&rel).is_absolute());
    }
}
