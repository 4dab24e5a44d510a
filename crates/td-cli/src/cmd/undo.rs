//! `td undo`: reverse this session's most recent actions.

use crate::app::App;
use crate::output::render;
use anyhow::Result;
use clap::Args;
use std::io::Write as _;
use td_core::mutation::undo;

#[derive(Args, Debug)]
pub struct UndoArgs {
    /// Number of actions to reverse, newest first.
    #[arg(long = "last", short = 'n', default_value_t = 1)]
    pub count: usize,
}

/// # Errors
///
/// `not_found` when the session has nothing left to undo.
pub fn run_undo(args: &UndoArgs, app: &App) -> Result<()> {
    let applied = undo::undo(&app.store, app.ctx(), args.count.max(1))?;
    render(app.output, &applied.value, |items, w| {
        for u in items {
            writeln!(
                w,
                "UNDONE {} {} {} (action #{})",
                u.action_type, u.entity_type, u.entity_id, u.original_id
            )?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: UndoArgs,
    }

    #[test]
    fn defaults_to_one() {
        assert_eq!(Wrapper::parse_from(["test"]).args.count, 1);
        assert_eq!(Wrapper::parse_from(["test", "--last", "3"]).args.count, 3);
    }
}
