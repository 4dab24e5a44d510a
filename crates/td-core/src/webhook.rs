//! Outbound webhook payloads and signatures. Delivery lives in the CLI.

use crate::model::ActionEntry;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

pub const HEADER_TIMESTAMP: &str = "X-TD-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-TD-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAction {
    pub id: i64,
    pub session_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ActionEntry> for WebhookAction {
    fn from(entry: &ActionEntry) -> Self {
        Self {
            id: entry.id,
            session_id: entry.session_id.clone(),
            action_type: entry.action_type.as_str().to_string(),
            entity_type: entry.entity_type.as_str().to_string(),
            entity_id: entry.entity_id.clone(),
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub project_dir: String,
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<WebhookAction>,
}

impl WebhookPayload {
    #[must_use]
    pub fn new(project_dir: &str, now: DateTime<Utc>, actions: &[ActionEntry]) -> Self {
        Self {
            project_dir: project_dir.to_string(),
            timestamp: now,
            actions: actions.iter().map(WebhookAction::from).collect(),
        }
    }
}

/// A serialized request ready to POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

/// `sha256=<hex>` over `timestamp + "." + body`.
#[must_use]
pub fn sign(secret: &str, timestamp: &str, body: &str) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    let hex: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("sha256={hex}")
}

/// Serialize `payload` and attach the timestamp and, with a secret, the
/// signature header.
///
/// # Errors
///
/// Fails only if the payload cannot be serialized.
pub fn prepare(
    payload: &WebhookPayload,
    secret: Option<&str>,
) -> serde_json::Result<SignedRequest> {
    let body = serde_json::to_string(payload)?;
    let timestamp = payload.timestamp.timestamp().to_string();
    let mut headers = vec![(HEADER_TIMESTAMP, timestamp.clone())];
    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        headers.push((HEADER_SIGNATURE, sign(secret, &timestamp, &body)));
    }
    Ok(SignedRequest { body, headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionType, EntityType};
    use chrono::TimeZone;

    fn entry() -> ActionEntry {
        ActionEntry {
            id: 7,
            session_id: "ses_aaaaaa".into(),
            action_type: ActionType::Start,
            entity_type: EntityType::Issue,
            entity_id: "td-a1b2c3".into(),
            previous_data: None,
            new_data: None,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            undo_of: None,
        }
    }

    #[test]
    fn signature_covers_timestamp_and_body() {
        assert_eq!(
            sign("key", "1700000000", r#"{"a":1}"#),
            "sha256=a438e398bfafc57e4396bb7fc2304422f0f768e965d073ca313cb52e22e6ad03"
        );
        assert_ne!(sign("k1", "1", "{}"), sign("k2", "1", "{}"));
        assert_ne!(sign("k", "1", "{}"), sign("k", "2", "{}"));
    }

    #[test]
    fn payload_shape_and_headers() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();
        let payload = WebhookPayload::new("/work/proj", now, &[entry()]);
        let req = prepare(&payload, Some("s3cret")).unwrap();

        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["project_dir"], "/work/proj");
        assert_eq!(body["actions"][0]["action_type"], "start");
        assert_eq!(body["actions"][0]["entity_type"], "issues");

        let ts = &req.headers[0];
        assert_eq!(ts.0, HEADER_TIMESTAMP);
        assert_eq!(ts.1, now.timestamp().to_string());
        let sig = &req.headers[1];
        assert_eq!(sig.0, HEADER_SIGNATURE);
        assert_eq!(sig.1, sign("s3cret", &ts.1, &req.body));
    }

    #[test]
    fn unsigned_without_secret() {
        let payload = WebhookPayload::new("/p", Utc::now(), &[]);
        let req = prepare(&payload, None).unwrap();
        assert_eq!(req.headers.len(), 1);
        let req = prepare(&payload, Some("")).unwrap();
        assert_eq!(req.headers.len(), 1);
    }
}
