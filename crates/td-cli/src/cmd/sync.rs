//! `td sync`: replicate the action log with the sync server.
//!
//! Bare `td sync` pushes, bootstraps when far behind, then pulls.

use crate::app::{App, SyncSetup};
use crate::output::{pretty_kv, pretty_section, render, render_mode};
use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use std::io::Write as _;
use td_core::TdError;
use td_core::sync::{self, SyncEngine, SyncStatus, local_status};

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: Option<SyncCommand>,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    #[command(about = "Send unpushed local actions")]
    Push,

    #[command(about = "Fetch and apply remote events")]
    Pull,

    #[command(about = "Replace the local database with a server snapshot")]
    Bootstrap,

    #[command(about = "Show cursors, pending work and server position")]
    Status,

    #[command(
        about = "List field conflicts recorded while pulling",
        after_help = "EXAMPLES:\n    td sync conflicts\n    td sync conflicts --all --limit 100\n    td sync conflicts --resolve"
    )]
    Conflicts {
        /// Include already-resolved conflicts.
        #[arg(long)]
        all: bool,
        /// Mark every open conflict resolved.
        #[arg(long)]
        resolve: bool,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
}

fn require_setup(app: &App) -> Result<SyncSetup> {
    app.sync_setup()?.ok_or_else(|| {
        TdError::invalid(
            "sync is not configured; run `td auth login` and enable the sync feature",
        )
        .into()
    })
}

/// # Errors
///
/// `unauthorized`/`forbidden` from the server, `invalid_input` when sync
/// is not configured.
pub fn run_sync(args: &SyncArgs, app: &App) -> Result<()> {
    match &args.command {
        None => {
            let setup = require_setup(app)?;
            let transport = setup.transport();
            let report = SyncEngine::new(&app.store, &transport, setup.config)?.sync()?;
            render(app.output, &report, |r, w| {
                writeln!(w, "PUSHED {} (rejected {})", r.push.pushed, r.push.rejected)?;
                if let Some(b) = &r.bootstrap {
                    writeln!(w, "BOOTSTRAPPED to seq {} ({} bytes)", b.server_seq, b.bytes)?;
                }
                writeln!(w, "PULLED {} (conflicts {})", r.pull.applied, r.pull.conflicts)
            })
        }
        Some(SyncCommand::Push) => {
            let setup = require_setup(app)?;
            let transport = setup.transport();
            let report = SyncEngine::new(&app.store, &transport, setup.config)?.push()?;
            render(app.output, &report, |r, w| {
                writeln!(w, "PUSHED {} (rejected {}, skipped {})", r.pushed, r.rejected, r.skipped)
            })
        }
        Some(SyncCommand::Pull) => {
            let setup = require_setup(app)?;
            let transport = setup.transport();
            let report = SyncEngine::new(&app.store, &transport, setup.config)?.pull()?;
            render(app.output, &report, |r, w| {
                writeln!(
                    w,
                    "PULLED {} (conflicts {}, skipped {}) cursor {}",
                    r.applied, r.conflicts, r.skipped, r.cursor
                )
            })
        }
        Some(SyncCommand::Bootstrap) => {
            let setup = require_setup(app)?;
            let transport = setup.transport();
            let report = SyncEngine::new(&app.store, &transport, setup.config)?.bootstrap()?;
            render(app.output, &report, |r, w| {
                writeln!(w, "BOOTSTRAPPED to seq {} ({} bytes)", r.server_seq, r.bytes)
            })
        }
        Some(SyncCommand::Status) => {
            let status = match app.sync_setup()? {
                Some(setup) => {
                    let transport = setup.transport();
                    SyncEngine::new(&app.store, &transport, setup.config)?.status()?
                }
                None => SyncStatus {
                    local: local_status(&app.store)?,
                    remote: None,
                    remote_error: Some("sync is not configured".to_string()),
                },
            };
            render_mode(app.output, &status, write_status_text, write_status_pretty)
        }
        Some(SyncCommand::Conflicts { all, resolve, limit }) => {
            if *resolve {
                let count = sync::resolve_conflicts(&app.store, Utc::now())?;
                return render(app.output, &serde_json::json!({ "resolved": count }), |_, w| {
                    writeln!(w, "RESOLVED {count}")
                });
            }
            let records = sync::conflicts(&app.store, *all, *limit)?;
            render(app.output, &records, |items, w| {
                if items.is_empty() {
                    return writeln!(w, "(no conflicts)");
                }
                for c in items {
                    let state = if c.resolved_at.is_some() { "resolved" } else { "open" };
                    writeln!(
                        w,
                        "#{} {} {}/{} {}: local={} remote={} ({})",
                        c.id,
                        state,
                        c.entity_type,
                        c.entity_id,
                        c.field,
                        c.local_value.as_deref().unwrap_or("-"),
                        c.remote_value.as_deref().unwrap_or("-"),
                        c.remote_device
                    )?;
                }
                Ok(())
            })
        }
    }
}

fn write_status_text(s: &SyncStatus, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    let l = &s.local;
    writeln!(
        w,
        "pull={} push={} unpushed={} pending={} conflicts={}",
        l.pull_cursor, l.push_cursor, l.unpushed, l.pending, l.open_conflicts
    )?;
    match (&s.remote, &s.remote_error) {
        (Some(remote), _) => writeln!(
            w,
            "server seq={} events={}",
            remote.last_server_seq, remote.event_count
        ),
        (None, Some(err)) => writeln!(w, "server unavailable: {err}"),
        (None, None) => Ok(()),
    }
}

fn write_status_pretty(s: &SyncStatus, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    let l = &s.local;
    let when = |t: Option<chrono::DateTime<Utc>>| {
        t.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    };
    pretty_section(w, "Sync")?;
    pretty_kv(w, "Device", l.device_id.as_deref().unwrap_or("(unset)"))?;
    pretty_kv(w, "Pulled to", l.pull_cursor.to_string())?;
    pretty_kv(w, "Pushed to", l.push_cursor.to_string())?;
    pretty_kv(w, "Unpushed", l.unpushed.to_string())?;
    pretty_kv(w, "Pending", l.pending.to_string())?;
    pretty_kv(w, "Conflicts", l.open_conflicts.to_string())?;
    pretty_kv(w, "Last pull", when(l.last_pull_at))?;
    pretty_kv(w, "Last push", when(l.last_push_at))?;
    match (&s.remote, &s.remote_error) {
        (Some(remote), _) => pretty_kv(w, "Server seq", remote.last_server_seq.to_string()),
        (None, Some(err)) => pretty_kv(w, "Server", err),
        (None, None) => Ok(()),
    }
}
