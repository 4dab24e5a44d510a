//! Per-invocation context shared by every command: resolved workspace, open
//! store, session identity, configuration and the mutation context that
//! carries autosync and webhook listeners.

use crate::output::OutputMode;
use crate::transport::HttpTransport;
use crate::webhook::WebhookBuffer;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use td_core::config::{
    AuthConfig, EnvSource, Feature, FeatureFlags, ProcessEnv, ProjectConfig, UserConfig, features,
    user::user_config_dir,
};
use td_core::session::{self, SessionInfo};
use td_core::sync::{Debouncer, SyncConfig, SyncEngine, local_status, should_pull_on_start};
use td_core::{ChangeSignal, MutationContext, Store, Workspace, ids};

/// Sync wiring resolved from user config, auth and feature flags.
#[derive(Debug, Clone)]
pub struct SyncSetup {
    pub url: String,
    pub api_key: String,
    pub config: SyncConfig,
    pub timeout: Duration,
    pub user: UserConfig,
}

impl SyncSetup {
    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(&self.url, &self.api_key, self.timeout)
    }
}

pub struct App {
    pub workspace: Workspace,
    pub store: Store,
    pub session: SessionInfo,
    pub project: ProjectConfig,
    pub flags: &'static FeatureFlags,
    pub output: OutputMode,
    ctx: MutationContext,
    autosync: Option<Debouncer>,
    webhook: Option<Arc<WebhookBuffer>>,
}

/// Working directory: `--work-dir`, then `TD_WORK_DIR`, then the process cwd.
pub fn start_dir(flag: Option<&Path>, env: &dyn EnvSource) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env.var("TD_WORK_DIR") {
        return Ok(PathBuf::from(dir));
    }
    std::env::current_dir().context("Failed to read the current directory")
}

impl App {
    /// Open the project containing `dir`. Fails with `not_found` when no
    /// `.todos/` exists.
    pub fn open(dir: &Path, output: OutputMode) -> Result<Self> {
        let env = ProcessEnv;
        let workspace = Workspace::discover(dir);
        workspace.require_initialized()?;
        let project = ProjectConfig::load(&workspace.config_path())?;
        let flags = features::install(FeatureFlags::resolve(&project, &env));
        let store = Store::open_project(&workspace.todos_dir())?;
        let session = session::resolve(
            &workspace,
            &env,
            project.session_name.as_deref(),
            Utc::now(),
        )?;
        if session.is_new {
            tracing::info!(session = %session.id, "new session detected");
        }

        let admin = project.review.is_admin(&session.id);
        let ctx = MutationContext::new(session.id.clone())
            .with_mode(project.workflow_mode)
            .with_admin(admin);
        Ok(Self {
            workspace,
            store,
            session,
            project,
            flags,
            output,
            ctx,
            autosync: None,
            webhook: None,
        })
    }

    /// Attach change listeners for commands that mutate state: webhook
    /// buffering and debounced push. Pulls first when due.
    pub fn with_listeners(mut self) -> Self {
        let mut signal = ChangeSignal::new();

        if self.flags.enabled(Feature::Webhooks) && self.project.webhook.is_some() {
            let buffer = WebhookBuffer::new();
            signal.subscribe(buffer.clone());
            self.webhook = Some(buffer);
        }

        match self.sync_setup() {
            Ok(Some(setup)) if setup.user.sync.auto.enabled => {
                self.pull_on_start(&setup);
                let debouncer = spawn_autosync(self.store.clone(), setup);
                signal.subscribe(debouncer.listener());
                self.autosync = Some(debouncer);
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "autosync disabled"),
        }

        self.ctx = self.ctx.clone().with_signal(signal);
        self
    }

    pub const fn ctx(&self) -> &MutationContext {
        &self.ctx
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn root(&self) -> &Path {
        &self.workspace.root
    }

    /// Re-read `.todos/config.json`.
    pub fn reload_project(&mut self) -> Result<()> {
        self.project = ProjectConfig::load(&self.workspace.config_path())?;
        Ok(())
    }

    pub fn update_project<R>(&mut self, f: impl FnOnce(&mut ProjectConfig) -> R) -> Result<R> {
        let out = ProjectConfig::update(&self.workspace.config_path(), f)?;
        self.reload_project()?;
        Ok(out)
    }

    /// Sync settings when sync is enabled and credentials are complete.
    pub fn sync_setup(&self) -> Result<Option<SyncSetup>> {
        if !self.flags.enabled(Feature::Sync) {
            return Ok(None);
        }
        resolve_sync_setup(&self.session.id, self.flags.enabled(Feature::Notes))
    }

    fn pull_on_start(&self, setup: &SyncSetup) {
        let auto = &setup.user.sync.auto;
        let last_pull = match local_status(&self.store) {
            Ok(status) => status.last_pull_at,
            Err(err) => {
                tracing::warn!(error = %err, "could not read sync state");
                return;
            }
        };
        let interval = Duration::from_secs(auto.interval_secs);
        if !should_pull_on_start(last_pull, Utc::now(), interval, auto.on_start) {
            return;
        }
        let transport = setup.transport();
        let result = SyncEngine::new(&self.store, &transport, setup.config.clone())
            .and_then(|engine| engine.pull());
        match result {
            Ok(report) => tracing::info!(applied = report.applied, "startup pull"),
            Err(err) => tracing::warn!(error = %err, "startup pull failed"),
        }
    }

    /// Flush listeners: deliver webhooks and run any pending push.
    pub fn finish(mut self) {
        if let (Some(buffer), Some(target)) = (self.webhook.take(), self.project.webhook.as_ref()) {
            buffer.deliver(target, &self.workspace.root.display().to_string());
        }
        drop(self.autosync.take());
    }

    /// Normalize a user-supplied issue id.
    pub fn issue_id(raw: &str) -> Result<String> {
        Ok(ids::normalize_issue_id(raw)?)
    }
}

/// Sync settings from user config and auth, independent of any project.
pub fn resolve_sync_setup(session_id: &str, notes_enabled: bool) -> Result<Option<SyncSetup>> {
    let env = ProcessEnv;
    let dir = user_config_dir(&env)?;
    let user = UserConfig::load(&dir, &env)?;
    let auth = AuthConfig::load(&dir, &env)?;
    let (Some(url), Some(api_key), Some(device_id), Some(project_id)) = (
        user.sync.url.clone(),
        auth.api_key.clone().filter(|k| !k.is_empty()),
        auth.device_id.clone(),
        auth.project_id.clone(),
    ) else {
        return Ok(None);
    };
    let mut config = SyncConfig::new(device_id, project_id, session_id);
    config.snapshot_threshold = user.sync.snapshot_threshold;
    config.history_tail = usize::try_from(user.sync.history_tail).unwrap_or(usize::MAX);
    config.notes_enabled = notes_enabled;
    Ok(Some(SyncSetup {
        url,
        api_key,
        config,
        timeout: Duration::from_secs(user.sync.request_timeout_secs.max(1)),
        user,
    }))
}

fn spawn_autosync(store: Store, setup: SyncSetup) -> Debouncer {
    let window = Duration::from_secs(setup.user.sync.auto.debounce_secs);
    Debouncer::spawn(window, move || {
        let transport = setup.transport();
        let result = SyncEngine::new(&store, &transport, setup.config.clone())
            .and_then(|engine| engine.push());
        match result {
            Ok(report) => tracing::info!(pushed = report.pushed, "autosync push"),
            Err(err) => tracing::warn!(error = %err, "autosync push failed"),
        }
    })
}
