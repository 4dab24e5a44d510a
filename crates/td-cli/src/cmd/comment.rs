//! `td comment`: discussion on an issue.

use crate::app::App;
use crate::output::{mutation_line, render};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::io::Write as _;
use td_core::db::activity;
use td_core::mutation::activity as act;

#[derive(Args, Debug)]
pub struct CommentArgs {
    #[command(subcommand)]
    pub command: CommentCommand,
}

#[derive(Subcommand, Debug)]
pub enum CommentCommand {
    #[command(
        about = "Add a comment",
        after_help = "EXAMPLES:\n    td comment add td-a1b2c3 \"edge case: empty labels\""
    )]
    Add {
        id: String,
        #[arg(required = true)]
        text: Vec<String>,
    },

    #[command(about = "List comments on an issue")]
    List { id: String },

    #[command(about = "Delete a comment by its id")]
    Rm { comment_id: String },
}

/// # Errors
///
/// `not_found` for unknown issues or comments.
pub fn run_comment(args: &CommentArgs, app: &App) -> Result<()> {
    match &args.command {
        CommentCommand::Add { id, text } => {
            let id = App::issue_id(id)?;
            let applied = act::add_comment(&app.store, app.ctx(), &id, &text.join(" "))?;
            mutation_line(app.output, &format!("COMMENTED {id}"), &applied.value)
        }
        CommentCommand::List { id } => {
            let id = App::issue_id(id)?;
            let comments = app.store.read(|conn| activity::comments_for_issue(conn, &id))?;
            render(app.output, &comments, |items, w| {
                if items.is_empty() {
                    return writeln!(w, "(no comments)");
                }
                for c in items {
                    writeln!(
                        w,
                        "{} {} {}: {}",
                        c.id,
                        c.created_at.format("%Y-%m-%d %H:%M"),
                        c.session_id,
                        c.text
                    )?;
                }
                Ok(())
            })
        }
        CommentCommand::Rm { comment_id } => {
            let applied = act::delete_comment(&app.store, app.ctx(), comment_id.trim())?;
            mutation_line(app.output, &format!("DELETED {}", applied.value.id), &applied.value)
        }
    }
}
