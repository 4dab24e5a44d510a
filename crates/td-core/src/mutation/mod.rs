//! The single write path.
//!
//! Every state change runs inside [`run`]: the closure receives a [`Batch`]
//! bound to one immediate transaction and records each entity change through
//! [`Batch::apply`], which writes the row, appends the action-log entry and
//! stamps per-field sync clocks. Nothing is visible until the closure returns
//! `Ok`; an `Err` rolls back the entity rows and their log entries together.
//! Listeners registered on the context's [`ChangeSignal`] hear about the
//! committed entries afterwards.

pub mod activity;
pub mod issues;
pub mod planning;
pub mod undo;

use crate::db::{Store, action_log, action_log::NewAction, records, sync_state};
use crate::error::{Result, TdError};
use crate::model::{ActionEntry, ActionType, EntityRecord, EntityType};
use crate::time::{Clock, SystemClock};
use crate::workflow::{WorkflowEngine, WorkflowMode};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Change notification
// ---------------------------------------------------------------------------

/// Receives committed action-log entries.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, entries: &[ActionEntry]);
}

/// Fan-out of committed changes to autosync, webhooks and monitors.
#[derive(Clone, Default)]
pub struct ChangeSignal {
    listeners: Vec<Arc<dyn ChangeListener>>,
}

impl ChangeSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    pub fn emit(&self, entries: &[ActionEntry]) {
        if entries.is_empty() {
            return;
        }
        for listener in &self.listeners {
            listener.on_change(entries);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Who is acting and under which rules. Passed explicitly to every mutation.
#[derive(Clone)]
pub struct MutationContext {
    pub session_id: String,
    pub mode: WorkflowMode,
    /// Administrative context bypasses the different-reviewer rule.
    pub admin: bool,
    pub clock: Arc<dyn Clock>,
    pub signal: ChangeSignal,
}

impl MutationContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: WorkflowMode::default(),
            admin: false,
            clock: Arc::new(SystemClock),
            signal: ChangeSignal::default(),
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: WorkflowMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: ChangeSignal) -> Self {
        self.signal = signal;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(self.mode)
    }
}

impl fmt::Debug for MutationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationContext")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// One entity change. `new = None` removes the row outright; soft deletes
/// carry the tombstoned record in `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub previous: Option<EntityRecord>,
    pub new: Option<EntityRecord>,
    pub undo_of: Option<i64>,
}

impl Mutation {
    #[must_use]
    pub fn create(record: EntityRecord) -> Self {
        Self {
            action_type: ActionType::Create,
            entity_type: record.entity_type(),
            entity_id: record.id().to_string(),
            previous: None,
            new: Some(record),
            undo_of: None,
        }
    }

    #[must_use]
    pub fn change(action_type: ActionType, previous: EntityRecord, new: EntityRecord) -> Self {
        Self {
            action_type,
            entity_type: new.entity_type(),
            entity_id: new.id().to_string(),
            previous: Some(previous),
            new: Some(new),
            undo_of: None,
        }
    }

    #[must_use]
    pub fn remove(previous: EntityRecord) -> Self {
        Self {
            action_type: ActionType::Delete,
            entity_type: previous.entity_type(),
            entity_id: previous.id().to_string(),
            previous: Some(previous),
            new: None,
            undo_of: None,
        }
    }
}

/// Top-level JSON fields whose values differ between two payloads.
#[must_use]
pub fn changed_fields(previous: Option<&Value>, new: Option<&Value>) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let before = previous.and_then(Value::as_object).unwrap_or(&empty);
    let after = new.and_then(Value::as_object).unwrap_or(&empty);
    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}

/// Result of a committed mutation.
#[derive(Debug, Clone)]
pub struct Applied<T> {
    pub value: T,
    pub actions: Vec<ActionEntry>,
    pub warnings: Vec<String>,
}

impl<T> Applied<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            value: f(self.value),
            actions: self.actions,
            warnings: self.warnings,
        }
    }
}

/// Write handle for one transaction. Every row it appends shares the
/// action-log batch of its first row, so undo reverts the mutation whole.
pub struct Batch<'a> {
    conn: &'a Connection,
    ctx: &'a MutationContext,
    device_id: String,
    actions: Vec<ActionEntry>,
    warnings: Vec<String>,
}

impl<'a> Batch<'a> {
    /// # Errors
    ///
    /// Returns `database_error` when the device id cannot be read.
    pub fn new(conn: &'a Connection, ctx: &'a MutationContext) -> Result<Self> {
        let device_id = sync_state::get(conn, sync_state::KEY_DEVICE_ID)?.unwrap_or_default();
        Ok(Self {
            conn,
            ctx,
            device_id,
            actions: Vec::new(),
            warnings: Vec::new(),
        })
    }

    #[must_use]
    pub const fn conn(&self) -> &'a Connection {
        self.conn
    }

    #[must_use]
    pub const fn ctx(&self) -> &'a MutationContext {
        self.ctx
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn extend_warnings(&mut self, messages: impl IntoIterator<Item = String>) {
        self.warnings.extend(messages);
    }

    /// Write the entity change and its action-log row.
    ///
    /// # Errors
    ///
    /// Returns `database_error` on SQLite failure, `invalid_input` when the
    /// mutation's record kind disagrees with its entity type.
    pub fn apply(&mut self, mutation: Mutation) -> Result<ActionEntry> {
        if let Some(record) = &mutation.new {
            if record.entity_type() != mutation.entity_type || record.id() != mutation.entity_id {
                return Err(TdError::invalid(format!(
                    "mutation for {} {} carries a {} record",
                    mutation.entity_type,
                    mutation.entity_id,
                    record.entity_type()
                )));
            }
            records::put(self.conn, record)?;
        } else {
            records::remove(self.conn, mutation.entity_type, &mutation.entity_id)?;
        }

        let previous_data = mutation.previous.as_ref().map(EntityRecord::to_json).transpose()?;
        let new_data = mutation.new.as_ref().map(EntityRecord::to_json).transpose()?;
        let timestamp = self.now();
        let action = NewAction {
            session_id: self.ctx.session_id.clone(),
            action_type: mutation.action_type,
            entity_type: mutation.entity_type,
            entity_id: mutation.entity_id.clone(),
            previous_data: previous_data.clone(),
            new_data: new_data.clone(),
            timestamp,
            undo_of: mutation.undo_of,
            batch_id: self.actions.first().map(|head| head.id),
        };
        let id = action_log::append(self.conn, &action)?;

        let stamp = sync_state::FieldClock {
            ts: timestamp,
            device_id: self.device_id.clone(),
        };
        for field in changed_fields(previous_data.as_ref(), new_data.as_ref()) {
            sync_state::set_field_clock(
                self.conn,
                mutation.entity_type,
                &mutation.entity_id,
                &field,
                &stamp,
            )?;
        }

        tracing::debug!(
            action_id = id,
            action = %mutation.action_type,
            entity = %mutation.entity_type,
            entity_id = %mutation.entity_id,
            "mutation applied"
        );

        let entry = ActionEntry {
            id,
            session_id: action.session_id,
            action_type: action.action_type,
            entity_type: action.entity_type,
            entity_id: action.entity_id,
            previous_data,
            new_data,
            timestamp,
            undo_of: action.undo_of,
        };
        self.actions.push(entry.clone());
        Ok(entry)
    }
}

/// Run `f` in one transaction, then notify listeners.
///
/// # Errors
///
/// Whatever `f` returns; the transaction is rolled back and no signal fires.
pub fn run<T>(
    store: &Store,
    ctx: &MutationContext,
    f: impl FnOnce(&mut Batch<'_>) -> Result<T>,
) -> Result<Applied<T>> {
    let applied = store.write(|tx| {
        let mut batch = Batch::new(tx, ctx)?;
        let value = f(&mut batch)?;
        Ok(Applied {
            value,
            actions: batch.actions,
            warnings: batch.warnings,
        })
    })?;
    ctx.signal.emit(&applied.actions);
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::issues;
    use crate::model::Issue;
    use crate::time;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<i64>>);

    impl ChangeListener for Recorder {
        fn on_change(&self, entries: &[ActionEntry]) {
            self.0
                .lock()
                .unwrap()
                .extend(entries.iter().map(|e| e.id));
        }
    }

    #[test]
    fn changed_fields_lists_differences_only() {
        let before = json!({"title": "a", "status": "open", "labels": []});
        let after = json!({"title": "b", "status": "open", "labels": [], "minor": true});
        let fields = changed_fields(Some(&before), Some(&after));
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec!["minor".to_string(), "title".to_string()]
        );
        assert_eq!(changed_fields(None, Some(&before)).len(), 3);
    }

    #[test]
    fn committed_mutation_writes_row_log_and_signal() {
        let store = Store::open_in_memory().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut signal = ChangeSignal::new();
        signal.subscribe(recorder.clone());
        let ctx = MutationContext::new("ses_a").with_signal(signal);

        let issue = Issue::new("td-aaaaaa", "Write docs", time::now());
        let applied = run(&store, &ctx, |batch| {
            batch.apply(Mutation::create(EntityRecord::Issue(issue.clone())))
        })
        .unwrap();

        let stored = store.read(|c| issues::get(c, "td-aaaaaa")).unwrap();
        assert_eq!(stored, issue);
        let entry = store.read(|c| action_log::get(c, applied.value.id)).unwrap();
        assert_eq!(entry.new_record().unwrap(), Some(EntityRecord::Issue(issue)));
        assert_eq!(*recorder.0.lock().unwrap(), vec![applied.value.id]);
        let clock = store
            .read(|c| sync_state::field_clock(c, EntityType::Issue, "td-aaaaaa", "title"))
            .unwrap();
        assert!(clock.is_some());
    }

    #[test]
    fn failed_closure_rolls_back_everything() {
        let store = Store::open_in_memory().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut signal = ChangeSignal::new();
        signal.subscribe(recorder.clone());
        let ctx = MutationContext::new("ses_a").with_signal(signal);

        let issue = Issue::new("td-bbbbbb", "x", time::now());
        let result: Result<Applied<()>> = run(&store, &ctx, |batch| {
            batch.apply(Mutation::create(EntityRecord::Issue(issue)))?;
            Err(TdError::invalid("boom"))
        });
        assert!(result.is_err());
        assert!(store.read(|c| issues::find(c, "td-bbbbbb")).unwrap().is_none());
        assert_eq!(store.read(action_log::max_id).unwrap(), 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
