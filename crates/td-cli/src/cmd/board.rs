//! `td board`: saved TDQ queries with manual ordering.

use super::write_issue_row;
use crate::app::App;
use crate::output::{mutation_line, pretty_section, render, render_mode};
use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use std::io::Write as _;
use td_core::db::planning;
use td_core::mutation::planning::{self as plan, BoardPatch};
use td_core::tdq::QueryOptions;
use td_core::views::{self, BoardContents};

#[derive(Args, Debug)]
pub struct BoardArgs {
    #[command(subcommand)]
    pub command: BoardCommand,
}

#[derive(Subcommand, Debug)]
pub enum BoardCommand {
    #[command(
        about = "Create a board from a TDQ query",
        after_help = "EXAMPLES:\n    td board create bugs \"type = bug AND status != closed\"\n    td board create mine \"implementer = @me\" -d \"what I touched\""
    )]
    Create {
        name: String,
        query: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },

    #[command(about = "List boards")]
    List,

    #[command(about = "Show a board's issues in board order")]
    Show {
        /// Board id or name.
        board: String,
    },

    #[command(about = "Rename a board or change its query")]
    Edit {
        board: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    #[command(about = "Delete a board and its positions")]
    Delete { board: String },

    #[command(
        about = "Pin an issue at a position on a board",
        after_help = "EXAMPLES:\n    td board move bugs td-a1b2c3 1"
    )]
    Move {
        board: String,
        issue: String,
        position: i64,
    },

    #[command(about = "Drop an issue's manual position")]
    Unposition { board: String, issue: String },
}

fn write_board_text(contents: &BoardContents, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    writeln!(w, "{} {} [{}]", contents.board.id, contents.board.name, contents.board.query)?;
    if contents.entries.is_empty() {
        return writeln!(w, "(no issues)");
    }
    for entry in &contents.entries {
        match entry.position {
            Some(pos) => write!(w, "{pos:>4} ")?,
            None => write!(w, "   - ")?,
        }
        write_issue_row(w, &entry.issue)?;
    }
    Ok(())
}

fn write_board_pretty(contents: &BoardContents, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    pretty_section(w, &format!("{} ({})", contents.board.name, contents.entries.len()))?;
    if !contents.board.description.is_empty() {
        writeln!(w, "{}", contents.board.description)?;
    }
    writeln!(w, "query: {}", contents.board.query)?;
    writeln!(w)?;
    write_board_text(contents, w)
}

/// # Errors
///
/// `not_found` for unknown boards or issues, `conflict` for duplicate
/// names, query errors for invalid TDQ.
pub fn run_board(args: &BoardArgs, app: &App) -> Result<()> {
    match &args.command {
        BoardCommand::Create {
            name,
            query,
            description,
        } => {
            let applied = plan::create_board(&app.store, app.ctx(), name, query, description)?;
            mutation_line(
                app.output,
                &format!("CREATED BOARD {} ({})", applied.value.name, applied.value.id),
                &applied.value,
            )
        }
        BoardCommand::List => {
            let boards = app.store.read(planning::list_boards)?;
            render(app.output, &boards, |items, w| {
                if items.is_empty() {
                    return writeln!(w, "(no boards)");
                }
                for b in items {
                    writeln!(w, "{} {:<16} {}", b.id, b.name, b.query)?;
                }
                Ok(())
            })
        }
        BoardCommand::Show { board } => {
            let opts = QueryOptions::new(app.session_id(), Utc::now());
            let contents = views::board_contents(&app.store, board, &opts)?;
            render_mode(app.output, &contents, write_board_text, write_board_pretty)
        }
        BoardCommand::Edit {
            board,
            name,
            query,
            description,
        } => {
            let patch = BoardPatch {
                name: name.clone(),
                query: query.clone(),
                description: description.clone(),
            };
            if patch == BoardPatch::default() {
                return Err(td_core::TdError::invalid(
                    "nothing to change; pass --name, --query or --description",
                )
                .into());
            }
            let applied = plan::edit_board(&app.store, app.ctx(), board, patch)?;
            let line = format!("UPDATED BOARD {}", applied.value.name);
            mutation_line(app.output, &line, &applied.value)
        }
        BoardCommand::Delete { board } => {
            let applied = plan::delete_board(&app.store, app.ctx(), board)?;
            let line = format!("DELETED BOARD {}", applied.value.name);
            mutation_line(app.output, &line, &applied.value)
        }
        BoardCommand::Move {
            board,
            issue,
            position,
        } => {
            let issue = App::issue_id(issue)?;
            let applied = plan::position_issue(&app.store, app.ctx(), board, &issue, *position)?;
            mutation_line(
                app.output,
                &format!("POSITIONED {issue} AT {position}"),
                &applied.value,
            )
        }
        BoardCommand::Unposition { board, issue } => {
            let issue = App::issue_id(issue)?;
            let applied = plan::unposition_issue(&app.store, app.ctx(), board, &issue)?;
            mutation_line(app.output, &format!("UNPOSITIONED {issue}"), &applied.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: BoardArgs,
    }

    #[test]
    fn create_takes_name_and_query() {
        let w = Wrapper::parse_from(["test", "create", "bugs", "type = bug"]);
        match w.args.command {
            BoardCommand::Create { name, query, description } => {
                assert_eq!(name, "bugs");
                assert_eq!(query, "type = bug");
                assert!(description.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn move_parses_position() {
        let w = Wrapper::parse_from(["test", "move", "bugs", "td-a1b2c3", "2"]);
        assert!(matches!(w.args.command, BoardCommand::Move { position: 2, .. }));
    }
}
