//! Applying pulled events to the local store.
//!
//! Remote changes are written straight to the entity tables and never to the
//! action log, so they are not pushed back out.

use super::merge::{self, MergeOutcome};
use super::wire::{
    RemoteEvent, UpdateDiff, WIRE_CREATE, WIRE_DELETE, WIRE_SOFT_DELETE, WIRE_UPDATE,
};
use crate::db::sync_state::{self, FieldClock, NewConflict, PendingEvent};
use crate::db::{issues, links, planning, records};
use crate::error::Result;
use crate::model::{ActionType, EntityRecord, EntityType};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const REASON_LOCAL_NEWER: &str = "local_newer";
pub const REASON_DEPENDENCY_CYCLE: &str = "dependency_cycle";
pub const REASON_PARENT_CYCLE: &str = "parent_cycle";
pub const REASON_INVALID_PAYLOAD: &str = "invalid_payload";

/// Bookkeeping fields that still merge by clock but never count as conflicts.
const UNTRACKED_FIELDS: &[&str] = &["updated_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { conflicts: usize },
    /// Update for an entity not seen yet; replayed when its create arrives.
    Buffered,
    /// Already applied, or a delete of something never created here.
    Noop,
    /// Feature-gated entity.
    Dropped,
    Skipped { conflicts: usize },
}

impl ApplyOutcome {
    #[must_use]
    pub const fn conflicts(self) -> usize {
        match self {
            Self::Applied { conflicts } | Self::Skipped { conflicts } => conflicts,
            _ => 0,
        }
    }
}

/// Options that shape how events apply.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    pub notes_enabled: bool,
    pub now: DateTime<Utc>,
}

struct Origin<'a> {
    device_id: &'a str,
    server_seq: Option<i64>,
    clock: FieldClock,
}

/// Apply one pulled event and mark it applied.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure. Malformed events are skipped
/// with a conflict record instead of failing the batch.
pub fn apply_remote(
    conn: &Connection,
    event: &RemoteEvent,
    opts: ApplyOptions,
) -> Result<ApplyOutcome> {
    let Some(entity) = event.event.entity() else {
        tracing::warn!(
            entity_type = %event.event.entity_type,
            server_seq = event.server_seq,
            "skipping event with unknown entity type"
        );
        return Ok(ApplyOutcome::Skipped { conflicts: 0 });
    };
    if entity == EntityType::Note && !opts.notes_enabled {
        return Ok(ApplyOutcome::Dropped);
    }
    if sync_state::is_applied(conn, &event.device_id, event.event.client_action_id)? {
        return Ok(ApplyOutcome::Noop);
    }

    let origin = Origin {
        device_id: &event.device_id,
        server_seq: Some(event.server_seq),
        clock: FieldClock {
            ts: event.event.client_timestamp,
            device_id: event.device_id.clone(),
        },
    };
    let id = event.event.entity_id.as_str();
    let payload = event.event.payload.as_ref();

    let outcome = match normalize_action(&event.event.action_type) {
        Some(WIRE_CREATE) => apply_create(conn, entity, id, payload, &origin, opts)?,
        Some(WIRE_UPDATE) => {
            let diff = payload.map(UpdateDiff::from_payload).unwrap_or_default();
            match apply_update(conn, entity, id, &diff, &origin, opts)? {
                Some(outcome) => outcome,
                None => {
                    sync_state::buffer_pending(
                        conn,
                        &PendingEvent {
                            server_seq: event.server_seq,
                            device_id: event.device_id.clone(),
                            client_action_id: event.event.client_action_id,
                            action_type: WIRE_UPDATE.to_string(),
                            entity_type: entity,
                            entity_id: id.to_string(),
                            payload: payload.cloned(),
                            client_timestamp: event.event.client_timestamp,
                        },
                        &opts.now,
                    )?;
                    ApplyOutcome::Buffered
                }
            }
        }
        // Deletes of soft-deleting kinds only ever tombstone.
        Some(WIRE_SOFT_DELETE | WIRE_DELETE) if entity.soft_deletes() => {
            apply_soft_delete(conn, entity, id, payload, &origin, opts)?
        }
        Some(WIRE_SOFT_DELETE | WIRE_DELETE) => {
            if records::load(conn, entity, id)?.is_some() {
                records::remove(conn, entity, id)?;
                ApplyOutcome::Applied { conflicts: 0 }
            } else {
                ApplyOutcome::Noop
            }
        }
        _ => {
            tracing::warn!(
                action = %event.event.action_type,
                server_seq = event.server_seq,
                "skipping event with unknown action type"
            );
            ApplyOutcome::Skipped { conflicts: 0 }
        }
    };

    sync_state::mark_applied(
        conn,
        &event.device_id,
        event.event.client_action_id,
        event.server_seq,
        &opts.now,
    )?;
    Ok(outcome)
}

/// Map legacy action names onto the four wire actions.
fn normalize_action(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "create" => Some(WIRE_CREATE),
        "soft_delete" => Some(WIRE_SOFT_DELETE),
        "delete" => Some(WIRE_DELETE),
        other => match other.parse::<ActionType>() {
            Ok(a) if a.is_transition() || matches!(a, ActionType::Update | ActionType::Restore) => {
                Some(WIRE_UPDATE)
            }
            _ => None,
        },
    }
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
fn conflict(
    conn: &Connection,
    entity: EntityType,
    id: &str,
    field: &str,
    local: Option<String>,
    remote: Option<String>,
    origin: &Origin<'_>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    tracing::info!(entity = %entity, id, field, reason, "sync conflict recorded");
    sync_state::record_conflict(
        conn,
        &NewConflict {
            entity_type: entity,
            entity_id: id,
            field,
            local_value: local,
            remote_value: remote,
            remote_device: origin.device_id,
            server_seq: origin.server_seq,
            reason,
            recorded_at: now,
        },
    )
}

fn apply_create(
    conn: &Connection,
    entity: EntityType,
    id: &str,
    payload: Option<&Value>,
    origin: &Origin<'_>,
    opts: ApplyOptions,
) -> Result<ApplyOutcome> {
    let Some(payload) = payload else {
        conflict(conn, entity, id, "*", None, None, origin, REASON_INVALID_PAYLOAD, opts.now)?;
        return Ok(ApplyOutcome::Skipped { conflicts: 1 });
    };

    if records::load(conn, entity, id)?.is_some() {
        let diff = UpdateDiff::from_payload(payload);
        return Ok(apply_update(conn, entity, id, &diff, origin, opts)?
            .unwrap_or(ApplyOutcome::Noop));
    }

    let mut record = match EntityRecord::from_json(entity, payload.clone()) {
        Ok(record) if record.id() == id => record,
        _ => {
            conflict(
                conn,
                entity,
                id,
                "*",
                None,
                Some(payload.to_string()),
                origin,
                REASON_INVALID_PAYLOAD,
                opts.now,
            )?;
            return Ok(ApplyOutcome::Skipped { conflicts: 1 });
        }
    };

    let mut conflicts = 0;
    match &mut record {
        EntityRecord::Dependency(dep) => {
            if links::would_create_dependency_cycle(conn, &dep.blocked_id, &dep.blocker_id)? {
                conflict(
                    conn,
                    entity,
                    id,
                    "blocker_id",
                    None,
                    Some(dep.blocker_id.clone()),
                    origin,
                    REASON_DEPENDENCY_CYCLE,
                    opts.now,
                )?;
                return Ok(ApplyOutcome::Skipped { conflicts: 1 });
            }
        }
        EntityRecord::Issue(issue) => {
            let cyclic = match issue.parent_id.as_deref() {
                Some(parent) => issues::would_create_parent_cycle(conn, &issue.id, parent)?,
                None => false,
            };
            if cyclic {
                conflict(
                    conn,
                    entity,
                    id,
                    "parent_id",
                    None,
                    issue.parent_id.take(),
                    origin,
                    REASON_PARENT_CYCLE,
                    opts.now,
                )?;
                conflicts += 1;
            }
        }
        _ => {}
    }

    records::put(conn, &record)?;
    if let Some(fields) = record.to_json()?.as_object() {
        for field in fields.keys().filter(|f| f.as_str() != "id") {
            sync_state::set_field_clock(conn, entity, id, field, &origin.clock)?;
        }
    }

    for pending in sync_state::take_pending(conn, entity, id)? {
        let diff = pending
            .payload
            .as_ref()
            .map(UpdateDiff::from_payload)
            .unwrap_or_default();
        let replay = Origin {
            device_id: &pending.device_id,
            server_seq: Some(pending.server_seq),
            clock: FieldClock {
                ts: pending.client_timestamp,
                device_id: pending.device_id.clone(),
            },
        };
        if let Some(outcome) = apply_update(conn, entity, id, &diff, &replay, opts)? {
            conflicts += outcome.conflicts();
        }
        tracing::debug!(
            entity = %entity,
            id,
            server_seq = pending.server_seq,
            "replayed buffered update"
        );
    }
    Ok(ApplyOutcome::Applied { conflicts })
}

/// `None` when the entity does not exist locally.
fn apply_update(
    conn: &Connection,
    entity: EntityType,
    id: &str,
    diff: &UpdateDiff,
    origin: &Origin<'_>,
    opts: ApplyOptions,
) -> Result<Option<ApplyOutcome>> {
    let Some(local) = records::load(conn, entity, id)? else {
        return Ok(None);
    };
    let local_json = local.to_json()?;
    let mut object: Map<String, Value> = local_json.as_object().cloned().unwrap_or_default();

    let mut clocks = HashMap::new();
    for field in diff.fields.keys().chain(diff.cleared.iter()) {
        if let Some(clock) = sync_state::field_clock(conn, entity, id, field)? {
            clocks.insert(field.clone(), clock);
        }
    }

    let parent_cycle = match (entity, diff.fields.get("parent_id")) {
        (EntityType::Issue, Some(Value::String(parent))) => {
            issues::would_create_parent_cycle(conn, id, parent)?
        }
        _ => false,
    };

    let outcome: MergeOutcome = merge::merge_object(
        &mut object,
        &mut clocks,
        diff,
        &origin.clock,
        |field, _| parent_cycle && field == "parent_id",
    );

    let mut conflicts = 0;
    for rejected in outcome
        .rejected
        .iter()
        .filter(|r| !UNTRACKED_FIELDS.contains(&r.field.as_str()))
    {
        let reason = if rejected.field == "parent_id" && parent_cycle {
            REASON_PARENT_CYCLE
        } else {
            REASON_LOCAL_NEWER
        };
        conflict(
            conn,
            entity,
            id,
            &rejected.field,
            json_text(&rejected.local_value),
            json_text(&rejected.remote_value),
            origin,
            reason,
            opts.now,
        )?;
        conflicts += 1;
    }

    if outcome.changed() {
        match EntityRecord::from_json(entity, Value::Object(object)) {
            Ok(merged) => {
                records::put(conn, &merged)?;
                for field in &outcome.applied {
                    sync_state::set_field_clock(conn, entity, id, field, &origin.clock)?;
                }
            }
            Err(err) => {
                tracing::warn!(entity = %entity, id, %err, "merged record failed validation");
                conflict(
                    conn,
                    entity,
                    id,
                    "*",
                    None,
                    None,
                    origin,
                    REASON_INVALID_PAYLOAD,
                    opts.now,
                )?;
                return Ok(Some(ApplyOutcome::Skipped {
                    conflicts: conflicts + 1,
                }));
            }
        }
    }
    Ok(Some(ApplyOutcome::Applied { conflicts }))
}

fn apply_soft_delete(
    conn: &Connection,
    entity: EntityType,
    id: &str,
    payload: Option<&Value>,
    origin: &Origin<'_>,
    opts: ApplyOptions,
) -> Result<ApplyOutcome> {
    let deleted_at = payload
        .and_then(|p| p.get("deleted_at"))
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::String(crate::time::to_db(&origin.clock.ts)));
    let mut fields = Map::new();
    fields.insert("deleted_at".to_string(), deleted_at);
    let diff = UpdateDiff {
        fields,
        cleared: Vec::new(),
    };

    let Some(mut outcome) = apply_update(conn, entity, id, &diff, origin, opts)? else {
        tracing::debug!(entity = %entity, id, "delete for an entity never created here");
        return Ok(ApplyOutcome::Noop);
    };

    if entity == EntityType::Board {
        for position in planning::positions_for_board(conn, id)? {
            if let Some(cascade) =
                apply_update(conn, EntityType::BoardPosition, &position.id, &diff, origin, opts)?
            {
                if let ApplyOutcome::Applied { conflicts } = &mut outcome {
                    *conflicts += cascade.conflicts();
                }
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::model::{Board, BoardPosition, Dependency, Issue};
    use crate::sync::wire::SyncEvent;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn opts() -> ApplyOptions {
        ApplyOptions {
            notes_enabled: true,
            now: at(1000),
        }
    }

    fn remote(
        seq: i64,
        action: &str,
        entity: &str,
        id: &str,
        payload: Option<Value>,
        ts: i64,
    ) -> RemoteEvent {
        RemoteEvent {
            server_seq: seq,
            device_id: "remote-dev".into(),
            session_id: "ses_remote".into(),
            event: SyncEvent {
                client_action_id: seq,
                action_type: action.into(),
                entity_type: entity.into(),
                entity_id: id.into(),
                payload,
                client_timestamp: at(ts),
            },
        }
    }

    fn issue_json(id: &str, title: &str) -> Value {
        serde_json::to_value(Issue::new(id, title, at(0))).unwrap()
    }

    #[test]
    fn update_before_create_is_buffered_then_replayed() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let title = json!({"title": "later"});
                let early = remote(2, "update", "issue", "td-aaaaaa", Some(title), 20);
                assert_eq!(apply_remote(tx, &early, opts())?, ApplyOutcome::Buffered);
                assert_eq!(sync_state::pending_count(tx)?, 1);

                let body = issue_json("td-aaaaaa", "first");
                let create = remote(3, "create", "issues", "td-aaaaaa", Some(body), 10);
                apply_remote(tx, &create, opts())?;
                assert_eq!(sync_state::pending_count(tx)?, 0);
                assert_eq!(issues::get(tx, "td-aaaaaa")?.title, "later");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn repeated_event_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let body = issue_json("td-bbbbbb", "x");
                let create = remote(1, "create", "issues", "td-bbbbbb", Some(body), 1);
                assert!(matches!(apply_remote(tx, &create, opts())?, ApplyOutcome::Applied { .. }));
                assert_eq!(apply_remote(tx, &create, opts())?, ApplyOutcome::Noop);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_of_unknown_entity_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let body = json!({"id": "td-cccccc"});
                let del = remote(4, "soft_delete", "issues", "td-cccccc", Some(body), 5);
                assert_eq!(apply_remote(tx, &del, opts())?, ApplyOutcome::Noop);
                assert!(issues::find(tx, "td-cccccc")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn soft_delete_tombstones_existing_issue() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let body = issue_json("td-dddddd", "x");
                let create = remote(1, "create", "issues", "td-dddddd", Some(body), 1);
                apply_remote(tx, &create, opts())?;
                apply_remote(tx, &remote(2, "delete", "issue", "td-dddddd", None, 5), opts())?;
                let issue = issues::get_any(tx, "td-dddddd")?;
                assert!(issue.is_deleted());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn legacy_delete_tombstones_board_and_positions() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let board = Board {
                    id: "bd-000001".into(),
                    name: "triage".into(),
                    query: "status = open".into(),
                    description: String::new(),
                    created_at: at(0),
                    updated_at: at(0),
                    deleted_at: None,
                };
                planning::upsert_board(tx, &board)?;
                let pos = BoardPosition::new(&board.id, "td-000001", 10, at(0));
                planning::upsert_position(tx, &pos)?;

                let body = json!({"id": board.id});
                let del = remote(3, "delete", "boards", &board.id, Some(body), 5);
                assert!(matches!(apply_remote(tx, &del, opts())?, ApplyOutcome::Applied { .. }));
                let board = planning::find_board(tx, &board.id)?.expect("board row kept");
                assert!(board.deleted_at.is_some());
                let pos = planning::find_position(tx, &pos.id)?.expect("position row kept");
                assert!(pos.deleted_at.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_removes_hard_deleting_kinds() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let dep = Dependency::new("td-000001", "td-000002", at(0));
                links::upsert_dependency(tx, &dep)?;
                let del = remote(4, "delete", "issue_dependencies", &dep.id, None, 5);
                assert_eq!(apply_remote(tx, &del, opts())?, ApplyOutcome::Applied { conflicts: 0 });
                assert!(links::find_dependency(tx, &dep.id)?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cyclic_dependency_is_skipped_with_conflict() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                for id in ["td-000001", "td-000002"] {
                    issues::upsert(tx, &Issue::new(id, id, at(0)))?;
                }
                links::upsert_dependency(tx, &Dependency::new("td-000001", "td-000002", at(0)))?;
                let back = Dependency::new("td-000002", "td-000001", at(1));
                let ev = remote(
                    9,
                    "create",
                    "issue_dependencies",
                    &back.id,
                    Some(serde_json::to_value(&back).unwrap()),
                    1,
                );
                assert_eq!(apply_remote(tx, &ev, opts())?, ApplyOutcome::Skipped { conflicts: 1 });
                assert!(links::find_dependency(tx, &back.id)?.is_none());
                let conflicts = sync_state::list_conflicts(tx, false, 10)?;
                assert_eq!(conflicts[0].reason, REASON_DEPENDENCY_CYCLE);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn notes_are_dropped_when_gated() {
        let store = Store::open_in_memory().unwrap();
        let gated = ApplyOptions {
            notes_enabled: false,
            now: at(0),
        };
        store
            .write(|tx| {
                let body = json!({"id": "nt-00000001"});
                let ev = remote(1, "create", "notes", "nt-00000001", Some(body), 1);
                assert_eq!(apply_remote(tx, &ev, gated)?, ApplyOutcome::Dropped);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn parent_cycle_field_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let mut child = Issue::new("td-00000b", "b", at(0));
                child.parent_id = Some("td-00000a".into());
                issues::upsert(tx, &Issue::new("td-00000a", "a", at(0)))?;
                issues::upsert(tx, &child)?;
                let diff = json!({"parent_id": "td-00000b"});
                let ev = remote(1, "update", "issues", "td-00000a", Some(diff), 3);
                assert_eq!(apply_remote(tx, &ev, opts())?, ApplyOutcome::Applied { conflicts: 1 });
                assert!(issues::get(tx, "td-00000a")?.parent_id.is_none());
                Ok(())
            })
            .unwrap();
    }
}
