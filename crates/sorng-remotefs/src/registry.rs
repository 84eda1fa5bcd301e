//! Session registry: exactly one `Session` per host, created lazily.
//! Optional per-host keepalive NOOPs run in the background.

use crate::backend::BackendFactory;
use crate::callbacks::Collaborators;
use crate::error::{RemoteError, RemoteResult};
use crate::session::{Session, SessionState};
use crate::types::{Host, Protocol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Snapshot of one registered session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host_id: String,
    pub protocol: Protocol,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub cached_paths: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_sessions: u32,
    pub connected_sessions: u32,
    pub idle_sessions: u32,
    /// 0 = unlimited.
    pub max_sessions: u32,
}

struct Registered {
    session: Arc<Session>,
    protocol: Protocol,
    created_at: DateTime<Utc>,
    keepalive: Option<JoinHandle<()>>,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Registered>>,
    factories: Vec<Arc<dyn BackendFactory>>,
    collaborators: Collaborators,
    /// Maximum number of sessions (0 = unlimited).
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factories: Vec::new(),
            collaborators,
            max_sessions: 0,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// The session for `host`, created on first request. Not yet connected.
    pub fn session_for(&self, host: &Host) -> RemoteResult<Arc<Session>> {
        let key = host.id();
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(&key) {
            return Ok(existing.session.clone());
        }
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(RemoteError::configuration(format!(
                "Session limit reached ({})",
                self.max_sessions
            )));
        }

        let factory = self
            .factories
            .iter()
            .find(|f| f.protocols().contains(&host.protocol))
            .ok_or_else(|| {
                RemoteError::unsupported(format!(
                    "No backend registered for {}",
                    host.protocol.scheme()
                ))
            })?;
        let backend = factory.create(host, self.collaborators.status.clone())?;
        let session = Session::new(host.clone(), backend, self.collaborators.clone());

        let keepalive = if host.keepalive_interval_sec > 0 {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => Some(
                    session.spawn_keepalive(Duration::from_secs(host.keepalive_interval_sec)),
                ),
                Err(_) => {
                    log::warn!("No async runtime, keepalive for {} disabled", key);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Registered session {} for {}", session.id(), key);
        sessions.insert(
            key,
            Registered {
                session: session.clone(),
                protocol: host.protocol,
                created_at: Utc::now(),
                keepalive,
            },
        );
        Ok(session)
    }

    pub fn get(&self, host_id: &str) -> Option<Arc<Session>> {
        self.lock().get(host_id).map(|r| r.session.clone())
    }

    /// Close and forget the session for `host_id`.
    pub async fn remove(&self, host_id: &str) -> bool {
        let removed = self.lock().remove(host_id);
        match removed {
            Some(registered) => {
                Self::shutdown(registered).await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<Registered> = self.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for registered in drained {
            Self::shutdown(registered).await;
        }
        if count > 0 {
            log::info!("Closed {} sessions", count);
        }
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.lock()
            .values()
            .map(|r| SessionInfo {
                id: r.session.id().to_string(),
                host_id: r.session.host_id().to_string(),
                protocol: r.protocol,
                state: r.session.state(),
                created_at: r.created_at,
                cached_paths: r.session.cache().len(),
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions = self.lock();
        let connected = sessions
            .values()
            .filter(|r| r.session.state() == SessionState::Connected)
            .count() as u32;
        RegistryStats {
            total_sessions: sessions.len() as u32,
            connected_sessions: connected,
            idle_sessions: sessions.len() as u32 - connected,
            max_sessions: self.max_sessions as u32,
        }
    }

    async fn shutdown(registered: Registered) {
        if let Some(handle) = registered.keepalive {
            handle.abort();
        }
        registered.session.close().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registered>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.lock().len())
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}
