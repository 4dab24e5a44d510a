//! Webhook delivery: collects committed actions during a command and POSTs
//! them once, signed when a secret is configured.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use td_core::config::WebhookConfig;
use td_core::model::ActionEntry;
use td_core::webhook::{WebhookPayload, prepare};
use td_core::ChangeListener;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffers action entries until [`WebhookBuffer::deliver`].
#[derive(Default)]
pub struct WebhookBuffer {
    entries: Mutex<Vec<ActionEntry>>,
}

impl WebhookBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn drain(&self) -> Vec<ActionEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Send everything buffered so far. Failures are logged and dropped.
    pub fn deliver(&self, target: &WebhookConfig, project_dir: &str) {
        let entries = self.drain();
        if entries.is_empty() || target.url.trim().is_empty() {
            return;
        }
        let payload = WebhookPayload::new(project_dir, Utc::now(), &entries);
        let request = match prepare(&payload, target.secret.as_deref()) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "webhook payload could not be serialized");
                return;
            }
        };
        let agent = ureq::AgentBuilder::new().timeout(DELIVERY_TIMEOUT).build();
        let mut call = agent
            .post(&target.url)
            .set("Content-Type", "application/json");
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        match call.send_string(&request.body) {
            Ok(_) => {
                tracing::debug!(url = %target.url, actions = entries.len(), "webhook delivered");
            }
            Err(err) => tracing::warn!(url = %target.url, error = %err, "webhook delivery failed"),
        }
    }
}

impl ChangeListener for WebhookBuffer {
    fn on_change(&self, entries: &[ActionEntry]) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_core::model::{ActionType, EntityType};

    fn entry(id: i64) -> ActionEntry {
        ActionEntry {
            id,
            session_id: "ses_aaaaaa".into(),
            action_type: ActionType::Create,
            entity_type: EntityType::Issue,
            entity_id: "td-a1b2c3".into(),
            previous_data: None,
            new_data: None,
            timestamp: Utc::now(),
            undo_of: None,
        }
    }

    #[test]
    fn buffer_collects_until_drained() {
        let buffer = WebhookBuffer::new();
        buffer.on_change(&[entry(1), entry(2)]);
        buffer.on_change(&[entry(3)]);
        assert_eq!(buffer.drain().len(), 3);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn empty_url_skips_delivery() {
        let buffer = WebhookBuffer::new();
        buffer.on_change(&[entry(1)]);
        buffer.deliver(&WebhookConfig::default(), "/tmp/p");
        assert!(buffer.drain().is_empty());
    }
}
