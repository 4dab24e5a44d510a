#![forbid(unsafe_code)]

mod app;
mod cmd;
mod output;
mod transport;
mod tui;
mod webhook;

use app::{App, start_dir};
use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, exit_code, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use td_core::config::ProcessEnv;
use td_core::mutation::issues::Verb;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "td: local issue tracker for agent sessions",
    long_about = None
)]
struct Cli {
    /// Output format: pretty (TTY default), text, or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Run as if started in this directory.
    #[arg(long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create .todos/ in the current project",
        after_help = "EXAMPLES:\n    # Initialize at the git root (or the current directory)\n    td init\n\n    # Leave .gitignore alone\n    td init --no-gitignore"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Issues",
        about = "Create an issue",
        after_help = "EXAMPLES:\n    td create \"Fix login timeout\"\n    td create \"Crash on empty file\" -t bug -p P1 -l parser,crash\n    td create \"Write docs\" --parent td-a1b2c3 --json"
    )]
    Create(cmd::create::CreateArgs),

    #[command(
        next_help_heading = "Issues",
        about = "List issues",
        after_help = "EXAMPLES:\n    # Everything not closed\n    td list\n\n    # Filter\n    td list -s in_review -p P1\n    td list --all --sort -updated -n 20"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Issues",
        about = "Show one issue with its logs, handoffs and links",
        after_help = "EXAMPLES:\n    td show td-a1b2c3\n    td show a1b2c3 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Issues",
        about = "Change issue fields",
        after_help = "EXAMPLES:\n    td update td-a1b2c3 --priority P0\n    td update td-a1b2c3 --add-label urgent --due 2026-12-01"
    )]
    Update(cmd::update::UpdateArgs),

    #[command(next_help_heading = "Issues", about = "Soft-delete issues")]
    Delete(cmd::delete::DeleteArgs),

    #[command(next_help_heading = "Issues", about = "Restore soft-deleted issues")]
    Restore(cmd::delete::RestoreArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Start work (open → in_progress)",
        after_help = "EXAMPLES:\n    td start td-a1b2c3\n    td start td-a1b2c3 --force -m \"blocker is cosmetic\""
    )]
    Start(cmd::workflow::VerbArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Submit for review (requires a handoff)",
        after_help = "EXAMPLES:\n    td handoff td-a1b2c3 -d \"parser\" -r \"docs\"\n    td review td-a1b2c3"
    )]
    Review(cmd::workflow::VerbArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Approve a reviewed issue (not your own)",
        after_help = "EXAMPLES:\n    TD_SESSION=reviewer td approve td-a1b2c3"
    )]
    Approve(cmd::workflow::VerbArgs),

    #[command(next_help_heading = "Workflow", about = "Send a reviewed issue back to in_progress")]
    Reject(cmd::workflow::VerbArgs),

    #[command(next_help_heading = "Workflow", about = "Mark an issue blocked")]
    Block(cmd::workflow::VerbArgs),

    #[command(next_help_heading = "Workflow", about = "Clear a blocked issue")]
    Unblock(cmd::workflow::VerbArgs),

    #[command(next_help_heading = "Workflow", about = "Close an issue")]
    Close(cmd::workflow::VerbArgs),

    #[command(next_help_heading = "Workflow", about = "Reopen a closed issue")]
    Reopen(cmd::workflow::VerbArgs),

    #[command(
        next_help_heading = "Activity",
        about = "Append a log entry",
        after_help = "EXAMPLES:\n    td log \"lexer handles unicode now\"\n    td log -i td-a1b2c3 -t decision \"keep the recursive descent parser\""
    )]
    Log(cmd::log::LogArgs),

    #[command(
        next_help_heading = "Activity",
        about = "Record a handoff for the next session",
        after_help = "EXAMPLES:\n    td handoff -d \"parser\" -r \"error messages\" -u \"perf on 10k lines\"\n    echo '{\"done\":[\"lexer\"]}' | td handoff td-a1b2c3 --stdin"
    )]
    Handoff(cmd::handoff::HandoffArgs),

    #[command(next_help_heading = "Activity", about = "Comments on an issue")]
    Comment(cmd::comment::CommentArgs),

    #[command(next_help_heading = "Activity", about = "Blocking dependencies")]
    Dep(cmd::dep::DepArgs),

    #[command(
        next_help_heading = "Activity",
        about = "Link a file to an issue",
        after_help = "EXAMPLES:\n    td link td-a1b2c3 src/parser.rs\n    td link td-a1b2c3 tests/parser.rs -r test"
    )]
    Link(cmd::link::LinkArgs),

    #[command(next_help_heading = "Activity", about = "Unlink a file from an issue")]
    Unlink(cmd::link::UnlinkArgs),

    #[command(
        next_help_heading = "Session",
        about = "Set or show the focused issue",
        after_help = "EXAMPLES:\n    td focus td-a1b2c3\n    td focus"
    )]
    Focus(cmd::focus::FocusArgs),

    #[command(next_help_heading = "Session", about = "Clear the focused issue")]
    Unfocus,

    #[command(
        next_help_heading = "Session",
        about = "What to work on: focus, in progress, review queue, next up",
        after_help = "EXAMPLES:\n    td context\n    td context --logs 10 --json"
    )]
    Context(cmd::context::ContextArgs),

    #[command(next_help_heading = "Session", about = "Show or name the current session")]
    Session(cmd::session::SessionArgs),

    #[command(next_help_heading = "Session", about = "Work sessions")]
    Ws(cmd::ws::WsArgs),

    #[command(
        next_help_heading = "Session",
        about = "Reverse this session's recent actions",
        after_help = "EXAMPLES:\n    td undo\n    td undo --last 3"
    )]
    Undo(cmd::undo::UndoArgs),

    #[command(
        next_help_heading = "Query",
        about = "Search issues with TDQ",
        after_help = "EXAMPLES:\n    td query 'status = open AND priority <= P1'\n    td query 'labels ~ parser OR title ~ \"lexer\"' --sort -updated\n    td query --check 'implementer = @me'"
    )]
    Query(cmd::query::QueryArgs),

    #[command(next_help_heading = "Query", about = "Saved queries with manual ordering")]
    Board(cmd::board::BoardArgs),

    #[command(next_help_heading = "Query", about = "Files with a single implementer")]
    Silos(cmd::silos::SilosArgs),

    #[command(next_help_heading = "Query", about = "Project notes")]
    Note(cmd::note::NoteArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Sync with the server",
        after_help = "EXAMPLES:\n    td sync\n    td sync status\n    td sync conflicts --resolve"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(next_help_heading = "Sync", about = "Sync credentials")]
    Auth(cmd::auth::AuthArgs),

    #[command(next_help_heading = "Setup", about = "Feature flags")]
    Feature(cmd::feature::FeatureArgs),

    #[command(next_help_heading = "Setup", about = "Live dashboard")]
    Monitor(cmd::monitor::MonitorArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    td completions bash > ~/.local/share/bash-completion/completions/td\n    td completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

impl Commands {
    /// Commands that may write to the store and so need autosync and
    /// webhook listeners.
    const fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Create(_)
                | Self::Update(_)
                | Self::Delete(_)
                | Self::Restore(_)
                | Self::Start(_)
                | Self::Review(_)
                | Self::Approve(_)
                | Self::Reject(_)
                | Self::Block(_)
                | Self::Unblock(_)
                | Self::Close(_)
                | Self::Reopen(_)
                | Self::Log(_)
                | Self::Handoff(_)
                | Self::Comment(_)
                | Self::Dep(_)
                | Self::Link(_)
                | Self::Unlink(_)
                | Self::Ws(_)
                | Self::Undo(_)
                | Self::Board(_)
                | Self::Note(_)
        )
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TD_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "td=debug,warn"
        } else {
            "td=warn"
        })
    });

    let format = env::var("TD_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn dispatch(command: &Commands, app: &mut App) -> anyhow::Result<()> {
    match command {
        Commands::Create(args) => cmd::create::run_create(args, app),
        Commands::List(args) => cmd::list::run_list(args, app),
        Commands::Show(args) => cmd::show::run_show(args, app),
        Commands::Update(args) => cmd::update::run_update(args, app),
        Commands::Delete(args) => cmd::delete::run_delete(args, app),
        Commands::Restore(args) => cmd::delete::run_restore(args, app),
        Commands::Start(args) => cmd::workflow::run_verb(Verb::Start, args, app),
        Commands::Review(args) => cmd::workflow::run_verb(Verb::Review, args, app),
        Commands::Approve(args) => cmd::workflow::run_verb(Verb::Approve, args, app),
        Commands::Reject(args) => cmd::workflow::run_verb(Verb::Reject, args, app),
        Commands::Block(args) => cmd::workflow::run_verb(Verb::Block, args, app),
        Commands::Unblock(args) => cmd::workflow::run_verb(Verb::Unblock, args, app),
        Commands::Close(args) => cmd::workflow::run_verb(Verb::Close, args, app),
        Commands::Reopen(args) => cmd::workflow::run_verb(Verb::Reopen, args, app),
        Commands::Log(args) => cmd::log::run_log(args, app),
        Commands::Handoff(args) => cmd::handoff::run_handoff(args, app),
        Commands::Comment(args) => cmd::comment::run_comment(args, app),
        Commands::Dep(args) => cmd::dep::run_dep(args, app),
        Commands::Link(args) => cmd::link::run_link(args, app),
        Commands::Unlink(args) => cmd::link::run_unlink(args, app),
        Commands::Focus(args) => cmd::focus::run_focus(args, app),
        Commands::Unfocus => cmd::focus::run_unfocus(app),
        Commands::Context(args) => cmd::context::run_context(args, app),
        Commands::Session(args) => cmd::session::run_session(args, app),
        Commands::Ws(args) => cmd::ws::run_ws(args, app),
        Commands::Undo(args) => cmd::undo::run_undo(args, app),
        Commands::Query(args) => cmd::query::run_query(args, app),
        Commands::Board(args) => cmd::board::run_board(args, app),
        Commands::Silos(args) => cmd::silos::run_silos(args, app),
        Commands::Note(args) => cmd::note::run_note(args, app),
        Commands::Sync(args) => cmd::sync::run_sync(args, app),
        Commands::Feature(args) => cmd::feature::run_feature(args, app),
        Commands::Monitor(args) => cmd::monitor::run_monitor(args, app),
        // Run by `run` before any project is opened.
        Commands::Init(_) | Commands::Auth(_) | Commands::Completions(_) => {
            anyhow::bail!("{command:?} does not take a project")
        }
    }
}

fn run(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    let dir = start_dir(cli.work_dir.as_deref(), &ProcessEnv)?;
    match cli.command {
        Commands::Init(args) => cmd::init::run_init(&args, output, &dir),
        Commands::Auth(args) => cmd::auth::run_auth(&args, output),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
        command => {
            let mut app = App::open(&dir, output)?;
            if command.mutates() {
                app = app.with_listeners();
            }
            tracing::debug!(session = %app.session_id(), command = ?command, "dispatch");
            let result = dispatch(&command, &mut app);
            app.finish();
            result
        }
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();

    if let Err(err) = run(cli, output) {
        tracing::debug!(error = ?err, "command failed");
        // stderr closed: nothing left to report to
        let _ = render_error(output, &CliError::from_anyhow(&err));
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["td", "--json", "list"]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["td", "list", "--json"]);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn trailing_json_is_a_flag_not_text() {
        let cli = Cli::parse_from(["td", "query", "type = bug AND priority <= P1", "--json"]);
        assert!(cli.output_mode().is_json());
        match cli.command {
            Commands::Query(args) => assert_eq!(args.expr, vec!["type = bug AND priority <= P1"]),
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["td", "log", "halfway", "there", "--json"]);
        assert!(cli.output_mode().is_json());
        match cli.command {
            Commands::Log(args) => assert_eq!(args.message.join(" "), "halfway there"),
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["td", "ws", "log", "switched", "to", "logos", "--json"]);
        assert!(cli.output_mode().is_json());

        let cli = Cli::parse_from(["td", "comment", "add", "td-a1b2c3", "looks", "good", "--json"]);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn format_flag_wins() {
        let cli = Cli::parse_from(["td", "--format", "text", "--json", "list"]);
        assert_eq!(cli.output_mode(), OutputMode::Text);
    }

    #[test]
    fn work_dir_is_global() {
        let cli = Cli::parse_from(["td", "show", "td-a1b2c3", "--work-dir", "/tmp/p"]);
        assert_eq!(cli.work_dir, Some(PathBuf::from("/tmp/p")));
    }

    #[test]
    fn verbs_parse_ids_and_reason() {
        let cli = Cli::parse_from(["td", "block", "td-a1b2c3", "td-d4e5f6", "-m", "waiting on CI"]);
        match cli.command {
            Commands::Block(args) => {
                assert_eq!(args.ids.len(), 2);
                assert_eq!(args.reason.as_deref(), Some("waiting on CI"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn read_commands_do_not_attach_listeners() {
        assert!(!Cli::parse_from(["td", "list"]).command.mutates());
        assert!(!Cli::parse_from(["td", "context"]).command.mutates());
        assert!(Cli::parse_from(["td", "create", "x"]).command.mutates());
        assert!(Cli::parse_from(["td", "close"]).command.mutates());
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
