//! Session: one logical connection to a backend.
//!
//! All backend calls go through a [`SessionGuard`] obtained from
//! [`Session::exclusive`]. The guard wraps a FIFO `tokio::sync::Mutex`, so
//! calls on one session never interleave and run in submission order, while
//! different sessions proceed in parallel. The lock is released when the
//! guard drops, on every exit path.

use crate::backend::{Backend, ListEntry};
use crate::cache::{AttributeCache, Listing};
use crate::callbacks::Collaborators;
use crate::error::{RemoteError, RemoteResult};
use crate::parser::{self, EntryParser};
use crate::path::RemotePath;
use crate::path_utils;
use crate::types::{Host, MessageCategory, PathType};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Everything only the lock holder may touch.
struct SessionCore {
    host: Host,
    backend: Box<dyn Backend>,
    parser: Box<dyn EntryParser>,
}

pub struct Session {
    id: String,
    host_id: String,
    core: Mutex<SessionCore>,
    state: StdMutex<SessionState>,
    cache: Arc<AttributeCache>,
    collaborators: Collaborators,
}

impl Session {
    pub fn new(host: Host, backend: Box<dyn Backend>, collaborators: Collaborators) -> Arc<Self> {
        Self::with_cache(host, backend, collaborators, Arc::new(AttributeCache::new()))
    }

    /// Build a session sharing an existing cache.
    pub fn with_cache(
        host: Host,
        backend: Box<dyn Backend>,
        collaborators: Collaborators,
        cache: Arc<AttributeCache>,
    ) -> Arc<Self> {
        let offset = parser::offset_from_minutes(host.utc_offset_minutes);
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            host_id: host.id(),
            core: Mutex::new(SessionCore {
                host,
                backend,
                parser: parser::parser_for_system(None, offset),
            }),
            state: StdMutex::new(SessionState::Disconnected),
            cache,
            collaborators,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity of the host this session connects to.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn cache(&self) -> &Arc<AttributeCache> {
        &self.cache
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Acquire exclusive access; waits behind earlier callers.
    pub async fn exclusive(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            core: self.core.lock().await,
        }
    }

    /// Snapshot of the host, including credentials updated by a prompt.
    pub async fn host(&self) -> Host {
        self.core.lock().await.host.clone()
    }

    pub async fn connect(&self) -> RemoteResult<()> {
        self.exclusive().await.connect().await
    }

    pub async fn close(&self) {
        self.exclusive().await.close().await
    }

    pub async fn interrupt(&self) {
        self.exclusive().await.interrupt()
    }

    /// Connect and resolve the home directory: the host's default path if
    /// it can be listed, otherwise the server's working directory.
    pub async fn mount(self: &Arc<Self>) -> RemoteResult<RemotePath> {
        let mut guard = self.exclusive().await;
        guard.ensure_connected().await?;

        let mut home = None;
        if let Some(default_path) = guard.host().default_path.clone() {
            let default_path = path_utils::normalize(&default_path);
            match guard.fetch_listing(&default_path).await {
                Ok(_) => home = Some(default_path),
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => log::warn!(
                    "Default path {} not readable, using working directory: {}",
                    default_path,
                    e
                ),
            }
        }
        let home = match home {
            Some(h) => h,
            None => match guard.backend().workdir().await {
                Ok(w) => path_utils::normalize(&w),
                Err(e) if e.is_connection() => return Err(guard.fail(e)),
                Err(e) => {
                    log::warn!("Cannot determine working directory: {}", e);
                    path_utils::ROOT.to_string()
                }
            },
        };
        drop(guard);
        Ok(RemotePath::new(self, &home, PathType::Directory))
    }

    /// Send a NOOP every `interval` while idle. Stops once the session is dropped.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                let mut guard = session.exclusive().await;
                if !guard.is_connected() {
                    continue;
                }
                if let Err(e) = guard.backend().noop().await {
                    log::warn!("Keepalive for {} failed: {}", session.host_id, e);
                    guard.interrupt();
                }
            }
        })
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.host_id == other.host_id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host_id)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Exclusive access ────────────────────────────────────────────────

/// Proof of exclusive access to a session's connection.
pub struct SessionGuard<'a> {
    session: &'a Session,
    core: MutexGuard<'a, SessionCore>,
}

impl<'a> SessionGuard<'a> {
    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn host(&self) -> &Host {
        &self.core.host
    }

    pub fn backend(&mut self) -> &mut dyn Backend {
        self.core.backend.as_mut()
    }

    pub fn parser(&self) -> &dyn EntryParser {
        self.core.parser.as_ref()
    }

    pub fn cache(&self) -> &'a AttributeCache {
        &self.session.cache
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Connected && self.core.backend.is_connected()
    }

    pub fn report(&self, key: &str, detail: &str, category: MessageCategory) {
        self.session.collaborators.report(key, detail, category);
    }

    /// Open, handshake and authenticate. No-op when already connected.
    #[tracing::instrument(skip_all, fields(host = %self.session.host_id))]
    pub async fn connect(&mut self) -> RemoteResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.session.set_state(SessionState::Connecting);
        let host = self.core.host.clone();
        self.report("status.opening", &host.hostname, MessageCategory::Start);

        if let Err(e) = self.core.backend.open(&host).await {
            return Err(self.abandon_connect(e));
        }
        if let Err(e) = self.authenticate().await {
            return Err(self.abandon_connect(e));
        }

        let system = self.core.backend.system_type();
        self.core.parser = parser::parser_for_system(
            system.as_deref(),
            parser::offset_from_minutes(host.utc_offset_minutes),
        );
        self.session.set_state(SessionState::Connected);
        log::info!("Session {} connected to {}", self.session.id, self.session.host_id);
        self.report("status.connected", &host.hostname, MessageCategory::Progress);
        Ok(())
    }

    fn abandon_connect(&mut self, e: RemoteError) -> RemoteError {
        self.core.backend.interrupt();
        self.session.set_state(SessionState::Disconnected);
        log::warn!("Connect to {} failed: {}", self.session.host_id, e);
        self.report("status.login-failed", &e.user_message(), MessageCategory::Error);
        e
    }

    /// Connect if needed; if the liveness check fails, drop the transport
    /// and reconnect once.
    pub async fn ensure_connected(&mut self) -> RemoteResult<()> {
        if !self.is_connected() {
            return self.connect().await;
        }
        match self.core.backend.noop().await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("Liveness check on {} failed, reconnecting: {}", self.session.host_id, e);
                self.interrupt();
                self.connect().await
            }
        }
    }

    /// Log in, prompting once for corrected credentials after a rejection.
    pub async fn authenticate(&mut self) -> RemoteResult<()> {
        let mut prompted = false;
        loop {
            let credentials = self.core.host.credentials.clone();
            self.report("status.login", &credentials.username, MessageCategory::Progress);
            match self.core.backend.login(&credentials).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_authentication() && !prompted => {
                    prompted = true;
                    self.report("status.login-failed", &e.user_message(), MessageCategory::Error);
                    let prompt = self.session.collaborators.credentials.clone();
                    match prompt.prompt_credentials(&e.user_message(), &credentials).await {
                        Some(corrected) => self.core.host.credentials = corrected,
                        None => {
                            return Err(RemoteError::authentication_canceled(format!(
                                "Login {}@{} canceled",
                                credentials.username, self.core.host.hostname
                            )))
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Graceful quit, then release the transport and forget the secret
    /// whether or not the quit succeeded.
    #[tracing::instrument(skip_all, fields(host = %self.session.host_id))]
    pub async fn close(&mut self) {
        if self.session.state() != SessionState::Disconnected || self.core.backend.is_connected() {
            self.session.set_state(SessionState::Closing);
            self.report("status.disconnecting", &self.core.host.hostname, MessageCategory::Progress);
            if let Err(e) = self.core.backend.quit().await {
                log::warn!("Quit on {} failed: {}", self.session.host_id, e);
            }
            self.core.backend.interrupt();
        }
        self.core.host.credentials.clear_password();
        self.session.set_state(SessionState::Disconnected);
        self.report("status.disconnected", &self.core.host.hostname, MessageCategory::Progress);
    }

    /// Force-close so the next `ensure_connected` starts clean.
    pub fn interrupt(&mut self) {
        self.core.backend.interrupt();
        self.session.set_state(SessionState::Disconnected);
    }

    /// Interrupt on transport errors; hand the error back either way.
    pub fn fail(&mut self, e: RemoteError) -> RemoteError {
        if e.is_connection() {
            log::warn!("I/O error on {}, interrupting session: {}", self.session.host_id, e);
            self.interrupt();
        }
        e
    }

    /// List `dir` on the server and cache the result.
    pub async fn fetch_listing(&mut self, dir: &str) -> RemoteResult<Listing> {
        let raw = match self.core.backend.list(dir).await {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail(e.with_path(dir))),
        };
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match item {
                ListEntry::Line(line) => entries.extend(parser::parse_listing(
                    self.core.parser.as_ref(),
                    [line.as_str()],
                )),
                ListEntry::Parsed(entry) => {
                    if entry.name != "." && entry.name != ".." {
                        entries.push(entry)
                    }
                }
            }
        }
        let listing = Listing::new(entries);
        self.session.cache.put_listing(dir, listing.clone());
        Ok(listing)
    }

    /// Cached listing of `dir`, fetched on a miss.
    pub async fn listing(&mut self, dir: &str) -> RemoteResult<Listing> {
        match self.session.cache.listing(dir) {
            Some(listing) => Ok(listing),
            None => self.fetch_listing(dir).await,
        }
    }
}
