//! JSON bodies exchanged with the sync server.
//!
//! Wire action types are `create`, `update`, `delete` and `soft_delete`.
//! Workflow verbs and restores travel as `update`. Entity types use the
//! canonical plural names; singular spellings are accepted on input.

use crate::model::{ActionEntry, ActionType, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WIRE_CREATE: &str = "create";
pub const WIRE_UPDATE: &str = "update";
pub const WIRE_DELETE: &str = "delete";
pub const WIRE_SOFT_DELETE: &str = "soft_delete";

/// One replicated action-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Action-log id on the originating device; monotonic per device.
    pub client_action_id: i64,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub client_timestamp: DateTime<Utc>,
}

/// Body of an `update` event.
///
/// `fields` carries new values. A `null` inside `fields` comes from a partial
/// payload and never overwrites a non-null local value; deliberate clears are
/// listed in `cleared`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDiff {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleared: Vec<String>,
}

impl UpdateDiff {
    /// Diff between two full entity payloads.
    #[must_use]
    pub fn between(previous: Option<&Value>, new: &Value) -> Self {
        let mut diff = Self::default();
        let changed = crate::mutation::changed_fields(previous, Some(new));
        for field in changed {
            match new.get(&field) {
                Some(Value::Null) | None => diff.cleared.push(field),
                Some(value) => {
                    diff.fields.insert(field, value.clone());
                }
            }
        }
        diff
    }

    /// Accepts both the structured form and a bare object of fields.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let structured = payload
            .as_object()
            .is_some_and(|o| o.contains_key("fields") || o.contains_key("cleared"));
        if structured {
            if let Ok(diff) = serde_json::from_value(payload.clone()) {
                return diff;
            }
        }
        Self {
            fields: payload.as_object().cloned().unwrap_or_default(),
            cleared: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.cleared.is_empty()
    }
}

impl SyncEvent {
    /// Wire form of an action-log entry; `None` for entries that carry
    /// nothing to replicate.
    #[must_use]
    pub fn from_action(entry: &ActionEntry) -> Option<Self> {
        let (action_type, payload) = match (&entry.previous_data, &entry.new_data) {
            (_, None) => (WIRE_DELETE, Some(serde_json::json!({ "id": entry.entity_id }))),
            (None, Some(new)) => (WIRE_CREATE, Some(new.clone())),
            (Some(_), Some(new))
                if entry.action_type == ActionType::Delete && entry.entity_type.soft_deletes() =>
            {
                let mut body = Map::new();
                body.insert("id".into(), Value::String(entry.entity_id.clone()));
                if let Some(at) = new.get("deleted_at").filter(|v| !v.is_null()) {
                    body.insert("deleted_at".into(), at.clone());
                }
                (WIRE_SOFT_DELETE, Some(Value::Object(body)))
            }
            (Some(previous), Some(new)) => {
                let diff = UpdateDiff::between(Some(previous), new);
                if diff.is_empty() {
                    return None;
                }
                (WIRE_UPDATE, serde_json::to_value(diff).ok())
            }
        };
        Some(Self {
            client_action_id: entry.id,
            action_type: action_type.to_string(),
            entity_type: entry.entity_type.as_str().to_string(),
            entity_id: entry.entity_id.clone(),
            payload,
            client_timestamp: entry.timestamp,
        })
    }

    /// Parsed entity type, accepting singular and plural spellings.
    #[must_use]
    pub fn entity(&self) -> Option<EntityType> {
        self.entity_type.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub session_id: String,
    pub events: Vec<SyncEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub client_action_id: i64,
    pub server_seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReject {
    pub client_action_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub accepted: Vec<PushAck>,
    #[serde(default)]
    pub rejected: Vec<PushReject>,
}

/// An event as stored and served by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub server_seq: i64,
    pub device_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(flatten)]
    pub event: SyncEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
    #[serde(default)]
    pub last_server_seq: i64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub last_server_seq: i64,
    #[serde(default)]
    pub event_count: i64,
}

/// Database bytes plus the `X-Snapshot-Seq` header value, if the server sent
/// one that parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPayload {
    pub server_seq: Option<i64>,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(action: ActionType, prev: Option<Value>, new: Option<Value>) -> ActionEntry {
        ActionEntry {
            id: 11,
            session_id: "ses_aaaaaa".into(),
            action_type: action,
            entity_type: EntityType::Issue,
            entity_id: "td-a1b2c3".into(),
            previous_data: prev,
            new_data: new,
            timestamp: Utc::now(),
            undo_of: None,
        }
    }

    #[test]
    fn transitions_travel_as_diffs() {
        let prev = json!({"id": "td-a1b2c3", "status": "open", "closed_at": "x"});
        let new = json!({"id": "td-a1b2c3", "status": "in_progress", "closed_at": null});
        let ev = SyncEvent::from_action(&entry(ActionType::Start, Some(prev), Some(new))).unwrap();
        assert_eq!(ev.action_type, WIRE_UPDATE);
        assert_eq!(ev.entity_type, "issues");
        let diff = UpdateDiff::from_payload(ev.payload.as_ref().unwrap());
        assert_eq!(diff.fields.get("status"), Some(&json!("in_progress")));
        assert_eq!(diff.cleared, vec!["closed_at".to_string()]);
    }

    #[test]
    fn soft_delete_carries_id_and_time() {
        let prev = json!({"id": "td-a1b2c3", "deleted_at": null});
        let new = json!({"id": "td-a1b2c3", "deleted_at": "2026-01-01T00:00:00.000000Z"});
        let ev = SyncEvent::from_action(&entry(ActionType::Delete, Some(prev), Some(new))).unwrap();
        assert_eq!(ev.action_type, WIRE_SOFT_DELETE);
        assert_eq!(ev.payload.unwrap()["id"], "td-a1b2c3");
    }

    #[test]
    fn hard_delete_and_create() {
        let ev = SyncEvent::from_action(&entry(ActionType::Delete, Some(json!({})), None)).unwrap();
        assert_eq!(ev.action_type, WIRE_DELETE);
        let ev = SyncEvent::from_action(&entry(ActionType::Create, None, Some(json!({"id": "x"}))))
            .unwrap();
        assert_eq!(ev.action_type, WIRE_CREATE);
    }

    #[test]
    fn bare_object_payload_is_a_diff() {
        let diff = UpdateDiff::from_payload(&json!({"title": "t", "description": null}));
        assert_eq!(diff.fields.len(), 2);
        assert!(diff.cleared.is_empty());
    }

    #[test]
    fn remote_event_flattens() {
        let raw = json!({
            "server_seq": 5, "device_id": "d", "client_action_id": 1,
            "action_type": "create", "entity_type": "issue", "entity_id": "td-1",
            "client_timestamp": "2026-01-01T00:00:00Z"
        });
        let ev: RemoteEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.event.entity(), Some(EntityType::Issue));
        assert_eq!(ev.session_id, "");
    }
}
