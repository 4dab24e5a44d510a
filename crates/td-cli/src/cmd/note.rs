//! `td note`: free-form project notes, behind the `notes` feature flag.

use crate::app::App;
use crate::output::{mutation_line, render};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::io::Write as _;
use td_core::config::Feature;
use td_core::db::planning;
use td_core::model::Note;
use td_core::mutation::planning::{self as plan, NotePatch};
use td_core::TdError;

#[derive(Args, Debug)]
pub struct NoteArgs {
    #[command(subcommand)]
    pub command: NoteCommand,
}

#[derive(Subcommand, Debug)]
pub enum NoteCommand {
    #[command(
        about = "Add a note",
        after_help = "EXAMPLES:\n    td note add \"release checklist\" -c \"bump version, tag, publish\""
    )]
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        content: String,
    },

    #[command(about = "List notes, pinned first")]
    List {
        /// Include archived notes.
        #[arg(long)]
        archived: bool,
    },

    #[command(about = "Show one note")]
    Show { id: String },

    #[command(about = "Edit a note's title or content")]
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },

    #[command(about = "Pin a note")]
    Pin { id: String },

    #[command(about = "Unpin a note")]
    Unpin { id: String },

    #[command(about = "Archive a note")]
    Archive { id: String },

    #[command(about = "Restore an archived note")]
    Unarchive { id: String },

    #[command(about = "Delete a note")]
    Delete { id: String },
}

fn require_notes(app: &App) -> Result<()> {
    if app.flags.enabled(Feature::Notes) {
        Ok(())
    } else {
        Err(TdError::invalid("notes are disabled; enable with `td feature set notes on`").into())
    }
}

fn edit(app: &App, id: &str, patch: NotePatch, verb: &str) -> Result<()> {
    let applied = plan::edit_note(&app.store, app.ctx(), id.trim(), patch)?;
    mutation_line(app.output, &format!("{verb} {}", applied.value.id), &applied.value)
}

fn write_note(w: &mut dyn std::io::Write, note: &Note) -> std::io::Result<()> {
    let mut flags = String::new();
    if note.pinned {
        flags.push_str(" [pinned]");
    }
    if note.archived {
        flags.push_str(" [archived]");
    }
    writeln!(w, "{} {}{}", note.id, note.title, flags)
}

/// # Errors
///
/// `invalid_input` when notes are disabled, `not_found` for unknown ids.
pub fn run_note(args: &NoteArgs, app: &App) -> Result<()> {
    require_notes(app)?;
    match &args.command {
        NoteCommand::Add { title, content } => {
            let applied = plan::add_note(&app.store, app.ctx(), title, content)?;
            mutation_line(app.output, &format!("CREATED NOTE {}", applied.value.id), &applied.value)
        }
        NoteCommand::List { archived } => {
            let notes = app.store.read(|conn| planning::list_notes(conn, *archived))?;
            render(app.output, &notes, |items, w| {
                if items.is_empty() {
                    return writeln!(w, "(no notes)");
                }
                for note in items {
                    write_note(w, note)?;
                }
                Ok(())
            })
        }
        NoteCommand::Show { id } => {
            let id = id.trim();
            let note = app
                .store
                .read(|conn| planning::find_note(conn, id))?
                .filter(|n| n.deleted_at.is_none())
                .ok_or_else(|| TdError::not_found("note", id))?;
            render(app.output, &note, |n, w| {
                write_note(w, n)?;
                writeln!(w, "updated {}", n.updated_at.format("%Y-%m-%d %H:%M"))?;
                if !n.content.is_empty() {
                    writeln!(w)?;
                    writeln!(w, "{}", n.content)?;
                }
                Ok(())
            })
        }
        NoteCommand::Edit { id, title, content } => {
            let patch = NotePatch {
                title: title.clone(),
                content: content.clone(),
                ..NotePatch::default()
            };
            if patch == NotePatch::default() {
                return Err(TdError::invalid("nothing to change; pass --title or --content").into());
            }
            edit(app, id, patch, "UPDATED NOTE")
        }
        NoteCommand::Pin { id } => edit(
            app,
            id,
            NotePatch {
                pinned: Some(true),
                ..NotePatch::default()
            },
            "PINNED",
        ),
        NoteCommand::Unpin { id } => edit(
            app,
            id,
            NotePatch {
                pinned: Some(false),
                ..NotePatch::default()
            },
            "UNPINNED",
        ),
        NoteCommand::Archive { id } => edit(
            app,
            id,
            NotePatch {
                archived: Some(true),
                ..NotePatch::default()
            },
            "ARCHIVED",
        ),
        NoteCommand::Unarchive { id } => edit(
            app,
            id,
            NotePatch {
                archived: Some(false),
                ..NotePatch::default()
            },
            "UNARCHIVED",
        ),
        NoteCommand::Delete { id } => edit(
            app,
            id,
            NotePatch {
                deleted: true,
                ..NotePatch::default()
            },
            "DELETED NOTE",
        ),
    }
}
