//! Shared output layer: pretty, text and JSON renderings of every command.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / hidden `--json` flag
//! 2. `FORMAT` env var: `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.
//!
//! Mutation commands print one stable line (`CREATED td-a1b2c3`) in pretty
//! and text modes and the affected entity in JSON mode. Errors go to stderr
//! as `ERROR: <message>` or `{"error": {"code", "message"}}`.

use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use td_core::error::{ErrorCode, TdError};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, visual framing).
    Pretty,
    /// Token-efficient plain text for agents and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }
    if json_flag {
        return OutputMode::Json;
    }
    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }
    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment, and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value with explicit text and pretty renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render with one renderer shared by pretty and text.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if mode.is_json() {
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
    } else {
        human_fn(value, &mut out)?;
    }
    Ok(())
}

/// Print a stable mutation line, or `value` in JSON mode.
pub fn mutation_line<T: Serialize>(mode: OutputMode, line: &str, value: &T) -> anyhow::Result<()> {
    render(mode, value, |_, w| writeln!(w, "{line}"))
}

/// Print non-fatal warnings to stderr.
pub fn render_warnings(mode: OutputMode, warnings: &[String]) {
    if mode.is_json() || warnings.is_empty() {
        return;
    }
    let stderr = io::stderr();
    let mut err = stderr.lock();
    for warning in warnings {
        let _ = writeln!(err, "WARNING: {warning}");
    }
}

/// Error payload for `--json` mode.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl CliError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<TdError>() {
            Some(td) => {
                let details = match td {
                    TdError::Validation(items) => items.clone(),
                    _ => Vec::new(),
                };
                Self {
                    code: td.code().code().to_string(),
                    message: td.to_string(),
                    hint: td.code().hint().map(str::to_string),
                    details,
                }
            }
            None => Self {
                code: ErrorCode::DatabaseError.code().to_string(),
                message: format!("{err:#}"),
                hint: None,
                details: Vec::new(),
            },
        }
    }
}

/// Exit status for an error that escaped a command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TdError>()
        .map_or(2, |td| td.code().exit_code())
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    if mode.is_json() {
        let wrapper = serde_json::json!({ "error": error });
        serde_json::to_writer_pretty(&mut out, &wrapper)?;
        writeln!(out)?;
    } else {
        writeln!(out, "ERROR: {}", error.message)?;
        for detail in &error.details {
            writeln!(out, "  - {detail}")?;
        }
        if let Some(hint) = &error.hint {
            writeln!(out, "hint: {hint}")?;
        }
    }
    Ok(())
}

/// Shorten `text` to `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
