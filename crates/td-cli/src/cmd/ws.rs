//! `td ws`: work sessions that group issues and fan logs out to them.

use super::{parse_value, write_issue_rows};
use crate::app::App;
use crate::output::{mutation_line, render};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write as _;
use td_core::db::{issues, planning};
use td_core::model::{Issue, LogFanout, LogType, WorkSession};
use td_core::mutation::planning as plan;

#[derive(Args, Debug)]
pub struct WsArgs {
    #[command(subcommand)]
    pub command: WsCommand,
}

#[derive(Subcommand, Debug)]
pub enum WsCommand {
    #[command(
        about = "Start a named work session",
        after_help = "EXAMPLES:\n    td ws start parser-rewrite\n    td ws start triage --fanout focused"
    )]
    Start {
        name: String,
        /// Where `td ws log` copies entries: tagged, focused or off.
        #[arg(long, default_value = "tagged")]
        fanout: String,
    },

    #[command(about = "End the active work session")]
    End,

    #[command(about = "Tag issues into the active work session")]
    Tag {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    #[command(about = "Remove issues from the active work session")]
    Untag {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    #[command(
        about = "Log to every issue the work session fans out to",
        after_help = "EXAMPLES:\n    td ws log \"switched to the new lexer\"\n    td ws log -t blocker \"CI is red\""
    )]
    Log {
        #[arg(required = true)]
        message: Vec<String>,
        #[arg(short = 't', long = "type", default_value = "progress")]
        log_type: String,
    },

    #[command(about = "Show the active work session and its issues")]
    Current,

    #[command(about = "List all work sessions")]
    List,
}

#[derive(Debug, Serialize)]
struct Current {
    work_session: Option<WorkSession>,
    issues: Vec<Issue>,
}

/// # Errors
///
/// `conflict` when starting while one is active, `not_found` when no
/// session is active for the other subcommands.
pub fn run_ws(args: &WsArgs, app: &mut App) -> Result<()> {
    match &args.command {
        WsCommand::Start { name, fanout } => {
            let fanout = parse_value::<LogFanout>(fanout)?;
            let applied = plan::start_work_session(&app.store, app.ctx(), name, fanout)?;
            let id = applied.value.id.clone();
            app.update_project(|cfg| cfg.active_work_session = Some(id))?;
            mutation_line(
                app.output,
                &format!("STARTED WORK SESSION {} ({})", applied.value.name, applied.value.id),
                &applied.value,
            )
        }
        WsCommand::End => {
            let applied = plan::end_work_session(&app.store, app.ctx())?;
            app.update_project(|cfg| cfg.active_work_session = None)?;
            mutation_line(
                app.output,
                &format!("ENDED WORK SESSION {}", applied.value.name),
                &applied.value,
            )
        }
        WsCommand::Tag { ids } => {
            let ids = ids.iter().map(|raw| App::issue_id(raw)).collect::<Result<Vec<_>>>()?;
            let applied = plan::tag_issues(&app.store, app.ctx(), &ids)?;
            render(app.output, &applied.value, |tagged, w| {
                for id in tagged {
                    writeln!(w, "TAGGED {id}")?;
                }
                Ok(())
            })
        }
        WsCommand::Untag { ids } => {
            let ids = ids.iter().map(|raw| App::issue_id(raw)).collect::<Result<Vec<_>>>()?;
            let applied = plan::untag_issues(&app.store, app.ctx(), &ids)?;
            render(app.output, &applied.value, |untagged, w| {
                for id in untagged {
                    writeln!(w, "UNTAGGED {id}")?;
                }
                Ok(())
            })
        }
        WsCommand::Log { message, log_type } => {
            let log_type = parse_value::<LogType>(log_type)?;
            let focus = app.project.focus.clone();
            let applied = plan::log_to_work_session(
                &app.store,
                app.ctx(),
                log_type,
                &message.join(" "),
                focus.as_deref(),
            )?;
            render(app.output, &applied.value, |logs, w| {
                for log in logs {
                    writeln!(w, "LOGGED {}", log.issue_id)?;
                }
                Ok(())
            })
        }
        WsCommand::Current => {
            let current = app.store.read(|conn| {
                let Some(ws) = planning::active_work_session(conn)? else {
                    return Ok(Current {
                        work_session: None,
                        issues: Vec::new(),
                    });
                };
                let mut tagged = Vec::new();
                for id in planning::tagged_issue_ids(conn, &ws.id)? {
                    if let Some(issue) = issues::find(conn, &id)? {
                        tagged.push(issue);
                    }
                }
                Ok(Current {
                    work_session: Some(ws),
                    issues: tagged,
                })
            })?;
            render(app.output, &current, |c, w| {
                let Some(ws) = &c.work_session else {
                    return writeln!(w, "(no active work session)");
                };
                writeln!(
                    w,
                    "{} {} fanout={} since {}",
                    ws.id,
                    ws.name,
                    ws.log_fanout,
                    ws.started_at.format("%Y-%m-%d %H:%M")
                )?;
                write_issue_rows(w, &c.issues)
            })
        }
        WsCommand::List => {
            let sessions = app.store.read(planning::list_work_sessions)?;
            render(app.output, &sessions, |items, w| {
                if items.is_empty() {
                    return writeln!(w, "(no work sessions)");
                }
                for ws in items {
                    let state = if ws.active { "active" } else { "ended" };
                    writeln!(w, "{} {:<6} {}", ws.id, state, ws.name)?;
                }
                Ok(())
            })
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
        args: WsArgs,
    }

    #[test]
    fn start_defaults_to_tagged_fanout() {
        let w = Wrapper::parse_from(["test", "start", "sprint-1"]);
        match w.args.command {
            WsCommand::Start { name, fanout } => {
                assert_eq!(name, "sprint-1");
                assert_eq!(fanout, "tagged");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn log_joins_words() {
        let w = Wrapper::parse_from(["test", "log", "-t", "blocker", "ci", "is", "red"]);
        match w.args.command {
            WsCommand::Log { message, log_type } => {
                assert_eq!(message.join(" "), "ci is red");
                assert_eq!(log_type, "blocker");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tag_requires_ids() {
        assert!(Wrapper::try_parse_from(["test", "tag"]).is_err());
    }
}
