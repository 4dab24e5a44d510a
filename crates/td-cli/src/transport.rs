//! HTTPS implementation of the sync transport.

use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;
use td_core::sync::{
    PullResponse, PushRequest, PushResponse, ServerStatus, SnapshotPayload, SyncTransport,
    TransportError,
};

const USER_AGENT: &str = concat!("td/", env!("CARGO_PKG_VERSION"));
const SNAPSHOT_SEQ_HEADER: &str = "X-Snapshot-Seq";
const MAX_SNAPSHOT_BYTES: u64 = 512 * 1024 * 1024;

pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, project: &str, endpoint: &str) -> String {
        format!("{}/v1/projects/{project}/sync/{endpoint}", self.base_url)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        request
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "application/json")
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let mut request = self.authorized(self.agent.get(url));
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request.call().map_err(map_error)?;
        response
            .into_json()
            .map_err(|err| TransportError::Protocol(format!("invalid response from {url}: {err}")))
    }
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .ok()
                .map(|body| extract_message(&body))
                .unwrap_or_default();
            match status {
                401 => TransportError::Unauthorized(message),
                403 => TransportError::Forbidden(message),
                _ => TransportError::Http { status, message },
            }
        }
        ureq::Error::Transport(transport) => TransportError::Network(transport.to_string()),
    }
}

/// Pull `error.message` (or `error`) out of a JSON error body, falling back
/// to the raw text.
fn extract_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(serde_json::Value::as_str)
        })
        .map_or_else(|| body.trim().to_string(), str::to_string)
}

impl SyncTransport for HttpTransport {
    fn push(&self, project: &str, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let url = self.url(project, "push");
        tracing::debug!(%url, events = request.events.len(), "sync push");
        let response = self
            .authorized(self.agent.post(&url))
            .send_json(request)
            .map_err(map_error)?;
        response
            .into_json()
            .map_err(|err| TransportError::Protocol(format!("invalid push response: {err}")))
    }

    fn pull(
        &self,
        project: &str,
        after_server_seq: i64,
        limit: usize,
        exclude_device: &str,
    ) -> Result<PullResponse, TransportError> {
        let url = self.url(project, "pull");
        tracing::debug!(%url, after_server_seq, limit, "sync pull");
        self.get_json(
            &url,
            &[
                ("after_server_seq", after_server_seq.to_string()),
                ("limit", limit.to_string()),
                ("exclude_client", exclude_device.to_string()),
            ],
        )
    }

    fn snapshot(&self, project: &str) -> Result<SnapshotPayload, TransportError> {
        let url = self.url(project, "snapshot");
        let response = self
            .authorized(self.agent.get(&url))
            .set("Accept", "application/octet-stream")
            .call()
            .map_err(map_error)?;
        let server_seq = response
            .header(SNAPSHOT_SEQ_HEADER)
            .and_then(|raw| raw.trim().parse().ok());
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|err| TransportError::Network(format!("reading snapshot: {err}")))?;
        Ok(SnapshotPayload { server_seq, bytes })
    }

    fn status(&self, project: &str) -> Result<ServerStatus, TransportError> {
        let url = self.url(project, "status");
        self.get_json(&url, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_drop_trailing_slash() {
        let t = HttpTransport::new("https://sync.example.com/", "k", Duration::from_secs(1));
        assert_eq!(
            t.url("p1", "push"),
            "https://sync.example.com/v1/projects/p1/sync/push"
        );
    }

    #[test]
    fn error_messages_prefer_json_body() {
        assert_eq!(
            extract_message(r#"{"error":{"code":"x","message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(extract_message(r#"{"error":"nope"}"#), "nope");
        assert_eq!(extract_message(" plain text \n"), "plain text");
    }
}
