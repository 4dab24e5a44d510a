use crate::app::App;
use crate::tui::keymap::Keymap;
use crate::tui::monitor;
use anyhow::Result;
use clap::Args;
use std::time::Duration;

/// Arguments for `td monitor`.
#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Seconds between dashboard refreshes.
    #[arg(long, default_value_t = 2)]
    pub refresh: u64,

    /// Do not pull from the sync server while running.
    #[arg(long)]
    pub no_sync: bool,
}

/// # Errors
///
/// Terminal setup failures or an invalid `.todos/keymap.json`.
pub fn run_monitor(args: &MonitorArgs, app: &App) -> Result<()> {
    let keymap = Keymap::load(&app.workspace.keymap_path())?;
    let sync = if args.no_sync { None } else { app.sync_setup()? };
    monitor::run_monitor(
        app.store.clone(),
        app.session.id.clone(),
        app.workspace.config_path(),
        Duration::from_secs(args.refresh.max(1)),
        sync,
        keymap,
    )
}
