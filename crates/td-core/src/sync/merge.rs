//! Per-field last-writer-wins.
//!
//! Each field carries the clock of its latest write from any device. A
//! remote value replaces the local one only when the remote clock beats the
//! local clock (timestamp first, then device id). The result is independent
//! of the order in which writes arrive.

use super::wire::UpdateDiff;
use crate::db::sync_state::FieldClock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// What to do with one incoming field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDecision {
    Apply,
    /// Local write is newer.
    Reject,
    /// A `null` from a partial payload over a non-null local value.
    IgnoreNull,
    /// Same clock already recorded.
    Unchanged,
}

#[must_use]
pub fn decide(
    local_value: Option<&Value>,
    local_clock: Option<&FieldClock>,
    remote_value: &Value,
    remote_clock: &FieldClock,
    explicit_clear: bool,
) -> FieldDecision {
    let local_set = local_value.is_some_and(|v| !v.is_null());
    if remote_value.is_null() && !explicit_clear && local_set {
        return FieldDecision::IgnoreNull;
    }
    match local_clock {
        Some(local) if local == remote_clock => FieldDecision::Unchanged,
        Some(local) if local.beats(remote_clock) => FieldDecision::Reject,
        _ => FieldDecision::Apply,
    }
}

/// A remote value that lost to a newer local write.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedField {
    pub field: String,
    pub local_value: Value,
    pub remote_value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub applied: Vec<String>,
    pub rejected: Vec<RejectedField>,
}

impl MergeOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Merge `diff` into `local`. `clocks` holds the local field clocks; applied
/// fields are stamped with `remote` in place. `veto` can refuse a field that
/// would otherwise be applied (used for graph-cycle checks).
pub fn merge_object(
    local: &mut Map<String, Value>,
    clocks: &mut HashMap<String, FieldClock>,
    diff: &UpdateDiff,
    remote: &FieldClock,
    mut veto: impl FnMut(&str, &Value) -> bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let cleared = diff.cleared.iter().map(|f| (f, Value::Null, true));
    let set = diff.fields.iter().map(|(f, v)| (f, v.clone(), false));
    for (field, value, explicit) in set.chain(cleared) {
        if field == "id" {
            continue;
        }
        let decision = decide(
            local.get(field),
            clocks.get(field),
            &value,
            remote,
            explicit,
        );
        match decision {
            FieldDecision::Apply if veto(field.as_str(), &value) => {
                outcome.rejected.push(RejectedField {
                    field: field.clone(),
                    local_value: local.get(field).cloned().unwrap_or(Value::Null),
                    remote_value: value,
                });
            }
            FieldDecision::Apply => {
                local.insert(field.clone(), value);
                clocks.insert(field.clone(), remote.clone());
                outcome.applied.push(field.clone());
            }
            FieldDecision::Reject => {
                let current = local.get(field).cloned().unwrap_or(Value::Null);
                if current != value {
                    outcome.rejected.push(RejectedField {
                        field: field.clone(),
                        local_value: current,
                        remote_value: value,
                    });
                }
            }
            FieldDecision::IgnoreNull | FieldDecision::Unchanged => {}
        }
    }
    outcome
}
