use crate::output::{OutputMode, render};
use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use td_core::workspace::TODOS_DIR;
use td_core::{Store, Workspace, vcs};

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Leave `.gitignore` untouched.
    #[arg(long)]
    pub no_gitignore: bool,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    root: String,
    created: bool,
    gitignore_updated: bool,
}

/// Create `.todos/` and the issue database.
///
/// # Errors
///
/// Fails when the directory or database cannot be created.
pub fn run_init(args: &InitArgs, output: OutputMode, dir: &Path) -> Result<()> {
    let workspace = Workspace::discover(dir);
    let created = workspace.init()?;
    Store::open_project(&workspace.todos_dir())?;
    let gitignore_updated = if args.no_gitignore {
        false
    } else {
        ensure_gitignored(&workspace.root)?
    };
    tracing::info!(root = %workspace.root.display(), created, "project initialized");

    let out = InitOutput {
        root: workspace.root.display().to_string(),
        created,
        gitignore_updated,
    };
    render(output, &out, |o, w| {
        if o.created {
            writeln!(w, "INITIALIZED {}", o.root)
        } else {
            writeln!(w, "ALREADY INITIALIZED {}", o.root)
        }
    })
}

/// Append `.todos/` to the repository's `.gitignore` when inside git.
fn ensure_gitignored(root: &Path) -> Result<bool> {
    if vcs::toplevel(root).is_none() {
        return Ok(false);
    }
    let path = root.join(".gitignore");
    let existing = fs::read_to_string(&path).unwrap_or_default();
    let entry = format!("{TODOS_DIR}/");
    if existing
        .lines()
        .any(|l| l.trim() == entry || l.trim() == TODOS_DIR)
    {
        return Ok(false);
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{entry}")?;
    Ok(true)
}
