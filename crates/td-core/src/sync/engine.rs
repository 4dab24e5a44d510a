//! Push, pull and snapshot bootstrap.

use super::apply::{self, ApplyOptions, ApplyOutcome};
use super::transport::SyncTransport;
use super::wire::{PushRequest, ServerStatus, SyncEvent};
use crate::db::sync_state::{
    self, ConflictRecord, Direction, KEY_DEVICE_ID, KEY_LAST_PULL_AT, KEY_LAST_PUSH_AT,
    KEY_PULL_CURSOR, KEY_PUSH_CURSOR, SyncHistoryEntry,
};
use crate::db::{self, Store, action_log};
use crate::error::{Result, TdError};
use crate::model::EntityType;
use crate::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Engine settings, usually built from the user config and auth file.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub device_id: String,
    pub project_id: String,
    pub session_id: String,
    /// Bootstrap from a snapshot when this many events behind. Zero disables.
    pub snapshot_threshold: u64,
    pub history_tail: usize,
    pub batch_size: usize,
    pub notes_enabled: bool,
}

impl SyncConfig {
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        project_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            project_id: project_id.into(),
            session_id: session_id.into(),
            snapshot_threshold: 100,
            history_tail: 500,
            batch_size: DEFAULT_BATCH_SIZE,
            notes_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub rejected: usize,
    /// Entries that carried nothing to send (gated or empty).
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub applied: usize,
    pub buffered: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub cursor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub server_seq: i64,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    pub bootstrap: Option<BootstrapReport>,
    pub pull: PullReport,
}

/// Local replication bookkeeping; readable without a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSyncStatus {
    pub device_id: Option<String>,
    pub pull_cursor: i64,
    pub push_cursor: i64,
    pub unpushed: i64,
    pub pending: i64,
    pub open_conflicts: usize,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub local: LocalSyncStatus,
    pub remote: Option<ServerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn local_status(store: &Store) -> Result<LocalSyncStatus> {
    store.read(|conn| {
        let push_cursor = sync_state::get_i64(conn, KEY_PUSH_CURSOR)?;
        Ok(LocalSyncStatus {
            device_id: sync_state::get(conn, KEY_DEVICE_ID)?,
            pull_cursor: sync_state::get_i64(conn, KEY_PULL_CURSOR)?,
            push_cursor,
            unpushed: (action_log::max_id(conn)? - push_cursor).max(0),
            pending: sync_state::pending_count(conn)?,
            open_conflicts: sync_state::list_conflicts(conn, false, usize::MAX)?.len(),
            last_pull_at: sync_state::get_time(conn, KEY_LAST_PULL_AT)?,
            last_push_at: sync_state::get_time(conn, KEY_LAST_PUSH_AT)?,
        })
    })
}

pub struct SyncEngine<'a, T: SyncTransport + ?Sized> {
    store: &'a Store,
    transport: &'a T,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
}

impl<'a, T: SyncTransport + ?Sized> SyncEngine<'a, T> {
    /// Bind an engine to a store and record this device as the author of
    /// local writes.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` when the device or project id is empty.
    pub fn new(store: &'a Store, transport: &'a T, config: SyncConfig) -> Result<Self> {
        if config.device_id.trim().is_empty() {
            return Err(TdError::invalid("device id is not set; run `td auth login`"));
        }
        if config.project_id.trim().is_empty() {
            return Err(TdError::invalid("no sync project configured"));
        }
        store.write(|tx| sync_state::set(tx, KEY_DEVICE_ID, &config.device_id))?;
        Ok(Self {
            store,
            transport,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Send every action-log entry past the push cursor. The cursor only
    /// moves after the server answers.
    ///
    /// # Errors
    ///
    /// Transport failures leave the cursor where it was.
    pub fn push(&self) -> Result<PushReport> {
        let mut report = PushReport::default();
        let batch = self.config.batch_size.max(1);
        loop {
            let entries = self.store.read(|conn| {
                let cursor = sync_state::get_i64(conn, KEY_PUSH_CURSOR)?;
                action_log::after(conn, cursor, batch)
            })?;
            let Some(last_id) = entries.last().map(|e| e.id) else {
                break;
            };

            let events: Vec<SyncEvent> = entries
                .iter()
                .filter(|e| self.config.notes_enabled || e.entity_type != EntityType::Note)
                .filter_map(SyncEvent::from_action)
                .collect();
            report.skipped += entries.len() - events.len();

            let response = if events.is_empty() {
                None
            } else {
                let request = PushRequest {
                    device_id: self.config.device_id.clone(),
                    session_id: self.config.session_id.clone(),
                    events,
                };
                Some((
                    self.transport.push(&self.config.project_id, &request)?,
                    request,
                ))
            };

            let now = self.clock.now();
            self.store.write(|tx| {
                sync_state::set_i64(tx, KEY_PUSH_CURSOR, last_id)?;
                sync_state::set(tx, KEY_LAST_PUSH_AT, &crate::time::to_db(&now))?;
                if let Some((response, request)) = &response {
                    for ack in &response.accepted {
                        let Some(event) = request
                            .events
                            .iter()
                            .find(|e| e.client_action_id == ack.client_action_id)
                        else {
                            continue;
                        };
                        sync_state::record_history(
                            tx,
                            &SyncHistoryEntry {
                                direction: Direction::Push,
                                action_type: event.action_type.clone(),
                                entity_type: event.entity_type.clone(),
                                entity_id: event.entity_id.clone(),
                                server_seq: Some(ack.server_seq),
                                device_id: self.config.device_id.clone(),
                                timestamp: now,
                            },
                        )?;
                    }
                    sync_state::prune_history(tx, self.config.history_tail)?;
                }
                Ok(())
            })?;

            if let Some((response, _)) = response {
                for rejected in &response.rejected {
                    tracing::warn!(
                        client_action_id = rejected.client_action_id,
                        reason = %rejected.reason,
                        "server rejected event"
                    );
                }
                report.pushed += response.accepted.len();
                report.rejected += response.rejected.len();
            }
            if entries.len() < batch {
                break;
            }
        }
        tracing::debug!(pushed = report.pushed, rejected = report.rejected, "push finished");
        Ok(report)
    }

    /// Fetch and apply remote events past the pull cursor.
    ///
    /// # Errors
    ///
    /// Transport failures keep every page already applied.
    pub fn pull(&self) -> Result<PullReport> {
        let mut report = PullReport::default();
        let batch = self.config.batch_size.max(1);
        loop {
            let cursor = self.store.read(|conn| sync_state::get_i64(conn, KEY_PULL_CURSOR))?;
            let mut page = self.transport.pull(
                &self.config.project_id,
                cursor,
                batch,
                &self.config.device_id,
            )?;
            page.events.sort_by_key(|e| e.server_seq);

            let now = self.clock.now();
            let opts = ApplyOptions {
                notes_enabled: self.config.notes_enabled,
                now,
            };
            let next_cursor = self.store.write(|tx| {
                let mut next = cursor;
                for event in page.events.iter().filter(|e| e.server_seq > cursor) {
                    let outcome = apply::apply_remote(tx, event, opts)?;
                    match outcome {
                        ApplyOutcome::Applied { conflicts } => {
                            report.applied += 1;
                            report.conflicts += conflicts;
                        }
                        ApplyOutcome::Buffered => report.buffered += 1,
                        ApplyOutcome::Skipped { conflicts } => {
                            report.skipped += 1;
                            report.conflicts += conflicts;
                        }
                        ApplyOutcome::Noop | ApplyOutcome::Dropped => report.skipped += 1,
                    }
                    sync_state::record_history(
                        tx,
                        &SyncHistoryEntry {
                            direction: Direction::Pull,
                            action_type: event.event.action_type.clone(),
                            entity_type: event.event.entity_type.clone(),
                            entity_id: event.event.entity_id.clone(),
                            server_seq: Some(event.server_seq),
                            device_id: event.device_id.clone(),
                            timestamp: now,
                        },
                    )?;
                    next = event.server_seq;
                }
                if !page.has_more {
                    next = next.max(page.last_server_seq);
                }
                sync_state::set_i64(tx, KEY_PULL_CURSOR, next)?;
                sync_state::set(tx, KEY_LAST_PULL_AT, &crate::time::to_db(&now))?;
                sync_state::prune_history(tx, self.config.history_tail)?;
                Ok(next)
            })?;
            report.cursor = next_cursor;

            if !page.has_more || next_cursor <= cursor {
                break;
            }
        }
        tracing::debug!(
            applied = report.applied,
            conflicts = report.conflicts,
            cursor = report.cursor,
            "pull finished"
        );
        Ok(report)
    }

    /// Remote status when a snapshot bootstrap is warranted: far enough
    /// behind and nothing local waiting to be pushed.
    ///
    /// # Errors
    ///
    /// Transport or SQLite failure.
    pub fn bootstrap_candidate(&self) -> Result<Option<ServerStatus>> {
        if self.config.snapshot_threshold == 0 || self.store.path().is_none() {
            return Ok(None);
        }
        let local = local_status(self.store)?;
        if local.unpushed > 0 {
            return Ok(None);
        }
        let remote = self.transport.status(&self.config.project_id)?;
        let lag = u64::try_from(remote.last_server_seq - local.pull_cursor).unwrap_or(0);
        Ok((lag >= self.config.snapshot_threshold).then_some(remote))
    }

    /// Replace the local database with the server snapshot, then pull
    /// whatever landed after it.
    ///
    /// # Errors
    ///
    /// Returns `conflict` when local actions are unpushed and `database_error`
    /// when the snapshot is missing its sequence header or fails validation.
    /// The local database is untouched on error.
    pub fn bootstrap(&self) -> Result<BootstrapReport> {
        let Some(path) = self.store.path().map(std::path::Path::to_path_buf) else {
            return Err(TdError::invalid("in-memory store cannot bootstrap"));
        };
        if local_status(self.store)?.unpushed > 0 {
            return Err(TdError::Conflict(
                "local changes have not been pushed; run `td sync push` first".into(),
            ));
        }
        let snapshot = self.transport.snapshot(&self.config.project_id)?;
        let Some(server_seq) = snapshot.server_seq else {
            return Err(TdError::Execution(
                "snapshot response is missing X-Snapshot-Seq".into(),
            ));
        };

        let dir = path
            .parent()
            .ok_or_else(|| TdError::invalid("database path has no parent directory"))?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(&snapshot.bytes)?;
        staged.as_file().sync_all()?;
        let staged = staged.into_temp_path();
        db::validate_database_file(&staged)?;
        self.store.replace_file(&staged)?;
        // The file was renamed into place; nothing left to clean up.
        let _ = staged.keep();

        let now = self.clock.now();
        self.store.write(|tx| {
            sync_state::set(tx, KEY_DEVICE_ID, &self.config.device_id)?;
            sync_state::set_i64(tx, KEY_PUSH_CURSOR, action_log::max_id(tx)?)?;
            sync_state::set_i64(tx, KEY_PULL_CURSOR, server_seq)?;
            sync_state::set(tx, KEY_LAST_PULL_AT, &crate::time::to_db(&now))?;
            Ok(())
        })?;
        tracing::info!(server_seq, bytes = snapshot.bytes.len(), "bootstrapped from snapshot");
        Ok(BootstrapReport {
            server_seq,
            bytes: snapshot.bytes.len(),
        })
    }

    /// Push, bootstrap when far behind, then pull. A failed bootstrap falls
    /// back to an incremental pull.
    ///
    /// # Errors
    ///
    /// Push or pull failure.
    pub fn sync(&self) -> Result<SyncReport> {
        let push = self.push()?;
        let bootstrap = match self.bootstrap_candidate() {
            Ok(Some(_)) => match self.bootstrap() {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::warn!(%err, "snapshot bootstrap failed; pulling incrementally");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, "could not check server status");
                None
            }
        };
        let pull = self.pull()?;
        Ok(SyncReport {
            push,
            bootstrap,
            pull,
        })
    }

    /// Local status plus the server's view when reachable.
    ///
    /// # Errors
    ///
    /// Returns `database_error` on SQLite failure.
    pub fn status(&self) -> Result<SyncStatus> {
        let local = local_status(self.store)?;
        let (remote, remote_error) = match self.transport.status(&self.config.project_id) {
            Ok(status) => (Some(status), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Ok(SyncStatus {
            local,
            remote,
            remote_error,
        })
    }
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn conflicts(
    store: &Store,
    include_resolved: bool,
    limit: usize,
) -> Result<Vec<ConflictRecord>> {
    store.read(|conn| sync_state::list_conflicts(conn, include_resolved, limit))
}

/// Mark every open conflict resolved. Returns how many were open.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn resolve_conflicts(store: &Store, at: DateTime<Utc>) -> Result<usize> {
    store.write(|tx| sync_state::resolve_conflicts(tx, &at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::issues;
    use crate::model::{EntityRecord, Issue, IssuePatch};
    use crate::mutation::MutationContext;
    use crate::mutation::issues::NewIssue;
    use crate::mutation::{self as m};
    use crate::sync::transport::MemoryServer;
    use crate::time::FixedClock;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn ctx(session: &str, secs: i64) -> MutationContext {
        MutationContext::new(session).with_clock(Arc::new(FixedClock(at(secs))))
    }

    fn engine<'a>(
        store: &'a Store,
        server: &'a MemoryServer,
        device: &str,
    ) -> SyncEngine<'a, MemoryServer> {
        SyncEngine::new(store, server, SyncConfig::new(device, "proj", "ses_test")).unwrap()
    }

    #[test]
    fn last_writer_wins_per_field_across_clients() {
        let server = MemoryServer::new();
        let a = Store::open_in_memory().unwrap();
        let b = Store::open_in_memory().unwrap();
        let ea = engine(&a, &server, "dev-a");
        let eb = engine(&b, &server, "dev-b");

        let id = m::issues::create(&a, &ctx("ses_a", 0), NewIssue::titled("original"))
            .unwrap()
            .value
            .id;
        ea.push().unwrap();
        eb.pull().unwrap();

        m::issues::update(
            &a,
            &ctx("ses_a", 10),
            &id,
            IssuePatch {
                title: Some("A".into()),
                labels: Some(vec!["x".into()]),
                ..IssuePatch::default()
            },
        )
        .unwrap();
        m::issues::update(
            &b,
            &ctx("ses_b", 20),
            &id,
            IssuePatch {
                title: Some("B".into()),
                ..IssuePatch::default()
            },
        )
        .unwrap();

        ea.push().unwrap();
        eb.push().unwrap();
        let pulled_by_b = eb.pull().unwrap();
        ea.pull().unwrap();

        for store in [&a, &b] {
            let issue = store.read(|c| issues::get(c, &id)).unwrap();
            assert_eq!(issue.title, "B");
            assert_eq!(issue.labels, vec!["x".to_string()]);
        }
        assert_eq!(pulled_by_b.conflicts, 1);
        let recorded = conflicts(&b, false, 10).unwrap();
        assert_eq!(recorded[0].field, "title");
    }

    #[test]
    fn offline_push_keeps_cursor_and_retries() {
        let server = MemoryServer::new();
        let a = Store::open_in_memory().unwrap();
        let ea = engine(&a, &server, "dev-a");
        m::issues::create(&a, &ctx("ses_a", 0), NewIssue::titled("t")).unwrap();

        server.set_offline(true);
        assert!(ea.push().is_err());
        assert_eq!(local_status(&a).unwrap().push_cursor, 0);

        server.set_offline(false);
        let report = ea.push().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(local_status(&a).unwrap().unpushed, 0);
        assert_eq!(ea.push().unwrap().pushed, 0);
    }

    #[test]
    fn pulled_changes_are_not_pushed_back() {
        let server = MemoryServer::new();
        let a = Store::open_in_memory().unwrap();
        let b = Store::open_in_memory().unwrap();
        let ea = engine(&a, &server, "dev-a");
        let eb = engine(&b, &server, "dev-b");
        m::issues::create(&a, &ctx("ses_a", 0), NewIssue::titled("t")).unwrap();
        ea.push().unwrap();
        eb.pull().unwrap();
        assert_eq!(eb.push().unwrap().pushed, 0);
        assert_eq!(server.event_count("proj"), 1);
    }

    #[test]
    fn gated_notes_stay_local() {
        let server = MemoryServer::new();
        let a = Store::open_in_memory().unwrap();
        let mut config = SyncConfig::new("dev-a", "proj", "ses_a");
        config.notes_enabled = false;
        let ea = SyncEngine::new(&a, &server, config).unwrap();
        m::planning::add_note(&a, &ctx("ses_a", 0), "scratch", "body").unwrap();
        let report = ea.push().unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(server.event_count("proj"), 0);
    }

    #[test]
    fn pull_pages_until_caught_up() {
        let server = MemoryServer::new();
        let a = Store::open_in_memory().unwrap();
        let b = Store::open_in_memory().unwrap();
        let ea = engine(&a, &server, "dev-a");
        let mut config = SyncConfig::new("dev-b", "proj", "ses_b");
        config.batch_size = 2;
        let eb = SyncEngine::new(&b, &server, config).unwrap();
        for i in 0..5 {
            m::issues::create(&a, &ctx("ses_a", i), NewIssue::titled(format!("t{i}"))).unwrap();
        }
        ea.push().unwrap();
        let report = eb.pull().unwrap();
        assert_eq!(report.applied, 5);
        assert_eq!(report.cursor, 5);
        let count = b
            .read(|c| Ok(issues::list(c, &issues::IssueFilter::default())?.len()))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn bootstrap_replaces_a_lagging_database() {
        let dir = tempfile::tempdir().unwrap();
        let server = MemoryServer::new();
        let a = Store::open(&dir.path().join("a").join("issues.db")).unwrap();
        let c = Store::open(&dir.path().join("c").join("issues.db")).unwrap();
        let ea = engine(&a, &server, "dev-a");
        for i in 0..6 {
            m::issues::create(&a, &ctx("ses_a", i), NewIssue::titled(format!("t{i}"))).unwrap();
        }
        ea.push().unwrap();
        server.publish_snapshot("proj", 6, a.export_bytes().unwrap());

        let mut config = SyncConfig::new("dev-c", "proj", "ses_c");
        config.snapshot_threshold = 5;
        let ec = SyncEngine::new(&c, &server, config).unwrap();
        let report = ec.sync().unwrap();

        assert_eq!(report.bootstrap.map(|b| b.server_seq), Some(6));
        let status = local_status(&c).unwrap();
        assert_eq!(status.pull_cursor, 6);
        assert_eq!(status.device_id.as_deref(), Some("dev-c"));
        assert_eq!(status.unpushed, 0);
        let count = c
            .read(|conn| Ok(issues::list(conn, &issues::IssueFilter::default())?.len()))
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn bootstrap_refuses_with_unpushed_work() {
        let dir = tempfile::tempdir().unwrap();
        let server = MemoryServer::new();
        let c = Store::open(&dir.path().join("issues.db")).unwrap();
        let ec = engine(&c, &server, "dev-c");
        m::issues::create(&c, &ctx("ses_c", 0), NewIssue::titled("local")).unwrap();
        server.publish_snapshot("proj", 1, Vec::new());
        assert!(matches!(ec.bootstrap(), Err(TdError::Conflict(_))));
        let count = c
            .read(|conn| Ok(issues::list(conn, &issues::IssueFilter::default())?.len()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn garbage_snapshot_leaves_database_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let server = MemoryServer::new();
        let c = Store::open(&dir.path().join("issues.db")).unwrap();
        let ec = engine(&c, &server, "dev-c");
        c.write(|tx| {
            let keep = Issue::new("td-keep01", "keep", at(0));
            crate::db::records::put(tx, &EntityRecord::Issue(keep))
        })
        .unwrap();
        server.publish_snapshot("proj", 9, b"not a database".to_vec());
        assert!(ec.bootstrap().is_err());
        assert!(c.read(|conn| issues::find(conn, "td-keep01")).unwrap().is_some());
    }
}
