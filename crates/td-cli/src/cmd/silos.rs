//! `td silos`: files only one session has ever implemented against.

use crate::app::App;
use crate::output::{pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use std::io::Write as _;
use td_core::analytics::{self, SiloReport};

#[derive(Args, Debug)]
pub struct SilosArgs {
    /// Show at most this many critical files.
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn run_silos(args: &SilosArgs, app: &App) -> Result<()> {
    let mut report = analytics::silo_report(&app.store)?;
    report.critical.truncate(args.limit);
    render_mode(app.output, &report, write_text, write_pretty)
}

fn write_text(r: &SiloReport, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    writeln!(
        w,
        "severity={} critical={}/{} ratio={:.2}",
        r.severity,
        r.critical.len(),
        r.total_files,
        r.critical_ratio
    )?;
    for silo in &r.critical {
        writeln!(w, "{} {}", silo.path, silo.authors.join(","))?;
    }
    Ok(())
}

fn write_pretty(r: &SiloReport, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    pretty_section(w, "Knowledge silos")?;
    pretty_kv(w, "Severity", r.severity.as_str())?;
    pretty_kv(w, "Files", &r.total_files.to_string())?;
    pretty_kv(w, "Ratio", &format!("{:.0}%", r.critical_ratio * 100.0))?;
    if r.critical.is_empty() {
        return writeln!(w, "\nEvery linked file has more than one implementer.");
    }
    writeln!(w)?;
    for silo in &r.critical {
        writeln!(w, "  {:<48} {}", silo.path, silo.authors.join(", "))?;
    }
    Ok(())
}
