//! Transport seam between the engine and a sync server.
//!
//! The CLI implements [`SyncTransport`] over HTTPS. [`MemoryServer`] is a
//! complete in-process server used by convergence tests.

use super::wire::{
    PullResponse, PushAck, PushReject, PushRequest, PushResponse, RemoteEvent, ServerStatus,
    SnapshotPayload,
};
use crate::error::TdError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<TransportError> for TdError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized(msg) => Self::Unauthorized(msg),
            TransportError::Forbidden(msg) => Self::Forbidden(msg),
            other => Self::Execution(format!("sync {other}")),
        }
    }
}

/// Per-project sync endpoints.
pub trait SyncTransport {
    /// `POST /v1/projects/{p}/sync/push`
    ///
    /// # Errors
    ///
    /// Transport or server failure.
    fn push(&self, project: &str, request: &PushRequest) -> Result<PushResponse, TransportError>;

    /// `GET /v1/projects/{p}/sync/pull?after_server_seq=S&limit=N&exclude_client=D`
    ///
    /// # Errors
    ///
    /// Transport or server failure.
    fn pull(
        &self,
        project: &str,
        after_server_seq: i64,
        limit: usize,
        exclude_device: &str,
    ) -> Result<PullResponse, TransportError>;

    /// `GET /v1/projects/{p}/sync/snapshot`
    ///
    /// # Errors
    ///
    /// Transport or server failure.
    fn snapshot(&self, project: &str) -> Result<SnapshotPayload, TransportError>;

    /// `GET /v1/projects/{p}/sync/status`
    ///
    /// # Errors
    ///
    /// Transport or server failure.
    fn status(&self, project: &str) -> Result<ServerStatus, TransportError>;
}

#[derive(Debug, Default)]
struct Project {
    events: Vec<RemoteEvent>,
    seen: HashMap<(String, i64), i64>,
    snapshot: Option<(i64, Vec<u8>)>,
}

/// In-process sync server. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    projects: Arc<Mutex<HashMap<String, Project>>>,
    offline: Arc<Mutex<bool>>,
}

impl MemoryServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a network error until set back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(PoisonError::into_inner) = offline;
    }

    /// Serve `bytes` as the project snapshot taken at `server_seq`.
    pub fn publish_snapshot(&self, project: &str, server_seq: i64, bytes: Vec<u8>) {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        projects.entry(project.to_string()).or_default().snapshot = Some((server_seq, bytes));
    }

    #[must_use]
    pub fn event_count(&self, project: &str) -> usize {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        projects.get(project).map_or(0, |p| p.events.len())
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if *self.offline.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Network("server unreachable".into()));
        }
        Ok(())
    }
}

impl SyncTransport for MemoryServer {
    fn push(&self, project: &str, request: &PushRequest) -> Result<PushResponse, TransportError> {
        self.check_online()?;
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let state = projects.entry(project.to_string()).or_default();
        let mut response = PushResponse::default();
        for event in &request.events {
            if event.entity().is_none() {
                response.rejected.push(PushReject {
                    client_action_id: event.client_action_id,
                    reason: format!("unknown entity type '{}'", event.entity_type),
                });
                continue;
            }
            let key = (request.device_id.clone(), event.client_action_id);
            if let Some(seq) = state.seen.get(&key) {
                response.accepted.push(PushAck {
                    client_action_id: event.client_action_id,
                    server_seq: *seq,
                });
                continue;
            }
            let seq = i64::try_from(state.events.len()).unwrap_or(i64::MAX - 1) + 1;
            state.events.push(RemoteEvent {
                server_seq: seq,
                device_id: request.device_id.clone(),
                session_id: request.session_id.clone(),
                event: event.clone(),
            });
            state.seen.insert(key, seq);
            response.accepted.push(PushAck {
                client_action_id: event.client_action_id,
                server_seq: seq,
            });
        }
        Ok(response)
    }

    fn pull(
        &self,
        project: &str,
        after_server_seq: i64,
        limit: usize,
        exclude_device: &str,
    ) -> Result<PullResponse, TransportError> {
        self.check_online()?;
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = projects.get(project) else {
            return Ok(PullResponse::default());
        };
        let last = state.events.last().map_or(0, |e| e.server_seq);
        let mut remaining = state
            .events
            .iter()
            .filter(|e| e.server_seq > after_server_seq && e.device_id != exclude_device)
            .peekable();
        let mut events = Vec::new();
        while events.len() < limit {
            let Some(event) = remaining.next() else {
                break;
            };
            events.push(event.clone());
        }
        let has_more = remaining.peek().is_some();
        Ok(PullResponse {
            events,
            last_server_seq: last,
            has_more,
        })
    }

    fn snapshot(&self, project: &str) -> Result<SnapshotPayload, TransportError> {
        self.check_online()?;
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let (seq, bytes) = projects
            .get(project)
            .and_then(|p| p.snapshot.clone())
            .ok_or_else(|| TransportError::Http {
                status: 404,
                message: "no snapshot available".into(),
            })?;
        Ok(SnapshotPayload {
            server_seq: Some(seq),
            bytes,
        })
    }

    fn status(&self, project: &str) -> Result<ServerStatus, TransportError> {
        self.check_online()?;
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let (last, count) = projects.get(project).map_or((0, 0), |p| {
            (
                p.events.last().map_or(0, |e| e.server_seq),
                i64::try_from(p.events.len()).unwrap_or(i64::MAX),
            )
        });
        Ok(ServerStatus {
            last_server_seq: last,
            event_count: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::wire::SyncEvent;
    use chrono::Utc;

    fn event(id: i64) -> SyncEvent {
        SyncEvent {
            client_action_id: id,
            action_type: "create".into(),
            entity_type: "issues".into(),
            entity_id: format!("td-{id:06}"),
            payload: None,
            client_timestamp: Utc::now(),
        }
    }

    fn push(server: &MemoryServer, device: &str, ids: &[i64]) -> PushResponse {
        server
            .push(
                "p",
                &PushRequest {
                    device_id: device.into(),
                    session_id: "s".into(),
                    events: ids.iter().copied().map(event).collect(),
                },
            )
            .unwrap()
    }

    #[test]
    fn duplicate_pushes_are_acked_with_original_seq() {
        let server = MemoryServer::new();
        let first = push(&server, "a", &[1, 2]);
        let again = push(&server, "a", &[2, 3]);
        assert_eq!(first.accepted[1].server_seq, 2);
        assert_eq!(again.accepted[0].server_seq, 2);
        assert_eq!(again.accepted[1].server_seq, 3);
        assert_eq!(server.event_count("p"), 3);
    }

    #[test]
    fn pull_excludes_own_device_and_pages() {
        let server = MemoryServer::new();
        push(&server, "a", &[1, 2, 3]);
        push(&server, "b", &[1]);
        let page = server.pull("p", 0, 1, "b").unwrap();
        assert_eq!(page.events.len(), 1);
        assert!(page.has_more);
        let rest = server.pull("p", 1, 10, "a").unwrap();
        assert_eq!(rest.events.len(), 1);
        assert_eq!(rest.events[0].device_id, "b");
        assert!(!rest.has_more);
        assert_eq!(rest.last_server_seq, 4);
    }

    #[test]
    fn offline_server_fails_with_network_error() {
        let server = MemoryServer::new();
        server.set_offline(true);
        let err = server.status("p").unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert_eq!(TdError::from(err).code().code(), "database_error");
    }
}
