//! `td auth`: sync credentials stored under the user config directory.
//!
//! These commands work outside any project.

use crate::output::{OutputMode, pretty_kv, pretty_section, render, render_mode};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::io::Write as _;
use td_core::TdError;
use td_core::config::user::user_config_dir;
use td_core::config::{AuthConfig, MapEnv, ProcessEnv, UserConfig};

#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    #[command(
        about = "Store an API key and server for sync",
        after_help = "EXAMPLES:\n    td auth login --key tdk_123 --url https://sync.example.com --project p_42"
    )]
    Login {
        #[arg(long)]
        key: String,
        /// Sync server base URL.
        #[arg(long)]
        url: Option<String>,
        /// Remote project id.
        #[arg(long)]
        project: Option<String>,
    },

    #[command(about = "Forget the stored API key")]
    Logout,

    #[command(about = "Show what is configured")]
    Status,
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
}

/// `tdk_abcdef123` becomes `tdk_…f123`.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// # Errors
///
/// Fails when the config directory cannot be resolved or written.
pub fn run_auth(args: &AuthArgs, output: OutputMode) -> Result<()> {
    let dir = user_config_dir(&ProcessEnv)?;
    match &args.command {
        AuthCommand::Login { key, url, project } => {
            let key = key.trim();
            if key.is_empty() {
                return Err(TdError::invalid("API key must not be empty").into());
            }
            // Saved files must not pick up TD_SYNC_* overrides.
            let mut auth = AuthConfig::load(&dir, &MapEnv::default())?;
            auth.api_key = Some(key.to_string());
            if let Some(project) = project {
                auth.project_id = Some(project.trim().to_string());
            }
            let device = auth.ensure_device_id().to_string();
            auth.save(&dir)?;
            if let Some(url) = url {
                let mut user = UserConfig::load(&dir, &MapEnv::default())?;
                user.sync.url = Some(url.trim_end_matches('/').to_string());
                user.save(&dir)?;
            }
            tracing::info!(device = %device, "stored sync credentials");
            render(output, &json!({ "authenticated": true, "device_id": device }), |_, w| {
                writeln!(w, "LOGGED IN (device {device})")
            })
        }
        AuthCommand::Logout => {
            let removed = AuthConfig::clear(&dir)?;
            render(output, &json!({ "logged_out": removed }), |_, w| {
                if removed {
                    writeln!(w, "LOGGED OUT")
                } else {
                    writeln!(w, "NOT LOGGED IN")
                }
            })
        }
        AuthCommand::Status => {
            let auth = AuthConfig::load(&dir, &ProcessEnv)?;
            let user = UserConfig::load(&dir, &ProcessEnv)?;
            let status = AuthStatus {
                authenticated: auth.is_authenticated(),
                key: auth.api_key.as_deref().filter(|k| !k.is_empty()).map(mask_key),
                url: user.sync.url,
                device_id: auth.device_id,
                project_id: auth.project_id,
            };
            render_mode(
                output,
                &status,
                |s, w| {
                    let state = if s.authenticated { "authenticated" } else { "not authenticated" };
                    writeln!(w, "{state}")?;
                    if let Some(url) = &s.url {
                        writeln!(w, "url {url}")?;
                    }
                    if let Some(project) = &s.project_id {
                        writeln!(w, "project {project}")?;
                    }
                    Ok(())
                },
                |s, w| {
                    pretty_section(w, "Sync auth")?;
                    let status = if s.authenticated {
                        "authenticated"
                    } else {
                        "not authenticated"
                    };
                    pretty_kv(w, "Status", status)?;
                    pretty_kv(w, "Key", s.key.as_deref().unwrap_or("-"))?;
                    pretty_kv(w, "Server", s.url.as_deref().unwrap_or("-"))?;
                    pretty_kv(w, "Project", s.project_id.as_deref().unwrap_or("-"))?;
                    pretty_kv(w, "Device", s.device_id.as_deref().unwrap_or("-"))
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("tdk_abcdef123"), "tdk_…f123");
        assert_eq!(mask_key("short"), "*****");
    }
}
