//! `td feature`: inspect and toggle project feature flags.

use super::parse_value;
use crate::app::App;
use crate::output::render;
use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Write as _;
use td_core::config::{Feature, FeatureFlags, ProcessEnv};

#[derive(Args, Debug)]
pub struct FeatureArgs {
    #[command(subcommand)]
    pub command: FeatureCommand,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
    #[command(about = "Show every flag and its effective value")]
    List,

    #[command(
        about = "Set a flag in the project config",
        after_help = "EXAMPLES:\n    td feature set notes off\n    td feature set sync on\n\nTD_FEATURE_<NAME> in the environment still wins over the project setting."
    )]
    Set { name: String, value: Toggle },

    #[command(about = "Remove a flag from the project config")]
    Unset { name: String },
}

#[derive(Debug, Serialize)]
struct FlagRow {
    name: &'static str,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<bool>,
    experimental: bool,
}

fn rows(app: &App) -> Vec<FlagRow> {
    let effective = FeatureFlags::resolve(&app.project, &ProcessEnv);
    Feature::ALL
        .into_iter()
        .map(|f| FlagRow {
            name: f.as_str(),
            enabled: effective.enabled(f),
            project: app.project.features.get(f.as_str()).copied(),
            experimental: f.experimental(),
        })
        .collect()
}

/// # Errors
///
/// `invalid_input` for unknown flag names.
pub fn run_feature(args: &FeatureArgs, app: &mut App) -> Result<()> {
    match &args.command {
        FeatureCommand::List => {
            let rows = rows(app);
            render(app.output, &rows, |items, w| {
                for r in items {
                    let state = if r.enabled { "on" } else { "off" };
                    let source = match r.project {
                        Some(_) => " (project)",
                        None => "",
                    };
                    writeln!(w, "{:<10} {state}{source}", r.name)?;
                }
                Ok(())
            })
        }
        FeatureCommand::Set { name, value } => {
            let feature = parse_value::<Feature>(name)?;
            let on = *value == Toggle::On;
            app.update_project(|cfg| cfg.features.insert(feature.as_str().to_string(), on))?;
            let state = if on { "ON" } else { "OFF" };
            render(app.output, &rows(app), |_, w| writeln!(w, "FEATURE {feature} {state}"))
        }
        FeatureCommand::Unset { name } => {
            let feature = parse_value::<Feature>(name)?;
            app.update_project(|cfg| cfg.features.remove(feature.as_str()))?;
            render(app.output, &rows(app), |_, w| writeln!(w, "FEATURE {feature} DEFAULT"))
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
        args: FeatureArgs,
    }

    #[test]
    fn set_accepts_on_off() {
        let w = Wrapper::parse_from(["test", "set", "notes", "off"]);
        assert!(matches!(
            w.args.command,
            FeatureCommand::Set { value: Toggle::Off, .. }
        ));
        assert!(Wrapper::try_parse_from(["test", "set", "notes", "maybe"]).is_err());
    }
}
