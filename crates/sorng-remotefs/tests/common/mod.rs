//! In-memory backend shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sorng_remotefs::path_utils;
use sorng_remotefs::{
    Attributes, Backend, BackendFactory, Collaborators, Credentials, CredentialsPrompt, Entry,
    Host, ListEntry, MessageCategory, PathType, Permission, Protocol, RemoteError, RemoteReader,
    RemoteResult, RemoteWriter, Session, StatusListener, TransferType,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub type Shared = Arc<Mutex<MemoryState>>;
pub type ChunkHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub resume: bool,
    pub append: bool,
    pub permissions: bool,
    pub ownership: bool,
    pub timestamp_write: bool,
    pub size: bool,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            resume: true,
            append: true,
            permissions: true,
            ownership: true,
            timestamp_write: true,
            size: true,
        }
    }
}

pub struct MemoryState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub perms: HashMap<String, Permission>,
    pub mtimes: HashMap<String, DateTime<Utc>>,
    /// Raw dialect lines returned instead of the structured listing.
    pub raw_listing: HashMap<String, Vec<String>>,
    pub calls: Vec<String>,
    pub connected: bool,
    pub workdir: String,
    pub caps: Caps,
    /// When set, only this password is accepted.
    pub password: Option<String>,
    pub fail_open: usize,
    pub fail_noop: usize,
    /// Paths whose attribute commands are rejected.
    pub reject_attributes: BTreeSet<String>,
    pub read_chunk: usize,
    pub on_chunk: Option<ChunkHook>,
    /// Inject a data-channel error after this many chunks of the next read.
    pub fail_read_after: Option<usize>,
    pub fail_validate: bool,
    /// Listings carry file sizes.
    pub list_sizes: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            files: BTreeMap::new(),
            dirs,
            perms: HashMap::new(),
            mtimes: HashMap::new(),
            raw_listing: HashMap::new(),
            calls: Vec::new(),
            connected: false,
            workdir: "/".to_string(),
            caps: Caps::default(),
            password: None,
            fail_open: 0,
            fail_noop: 0,
            reject_attributes: BTreeSet::new(),
            read_chunk: 4,
            on_chunk: None,
            fail_read_after: None,
            fail_validate: false,
            list_sizes: true,
        }
    }
}

impl MemoryState {
    pub fn dir(&mut self, path: &str) -> &mut Self {
        let mut current = path_utils::normalize(path);
        while !path_utils::is_root(&current) {
            self.dirs.insert(current.clone());
            current = path_utils::parent(&current);
        }
        self
    }

    pub fn file(&mut self, path: &str, content: &[u8]) -> &mut Self {
        let path = path_utils::normalize(path);
        self.dir(&path_utils::parent(&path));
        self.files.insert(path, content.to_vec());
        self
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn exists(&self, path: &str) -> bool {
        self.dirs.contains(path) || self.files.contains_key(path)
    }

    fn children(&self, dir: &str) -> Vec<Entry> {
        let dirs = self
            .dirs
            .iter()
            .filter(|d| !path_utils::is_root(d) && path_utils::parent(d) == dir)
            .map(|d| Entry::new(path_utils::file_name(d), PathType::Directory));
        let files = self
            .files
            .iter()
            .filter(|(f, _)| path_utils::parent(f) == dir)
            .map(|(f, content)| {
                let mut entry = Entry::new(path_utils::file_name(f), PathType::File);
                if self.list_sizes {
                    entry = entry.with_size(content.len() as u64);
                }
                entry.attributes.permission = self.perms.get(f.as_str()).copied();
                entry.attributes.modified = self.mtimes.get(f.as_str()).copied();
                entry
            });
        dirs.chain(files).collect()
    }
}

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, MemoryState> {
    shared.lock().unwrap()
}

fn not_found(path: &str) -> RemoteError {
    RemoteError::from_reply(550, &format!("{}: No such file or directory", path))
}

pub struct MemoryBackend {
    state: Shared,
}

impl MemoryBackend {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, MemoryState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }

    fn require_connected(&self) -> RemoteResult<()> {
        if lock(&self.state).connected {
            Ok(())
        } else {
            Err(RemoteError::connection("Not connected"))
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn system_type(&self) -> Option<String> {
        Some("UNIX Type: L8".to_string())
    }

    fn supports_resume(&self) -> bool {
        lock(&self.state).caps.resume
    }

    fn supports_append(&self) -> bool {
        lock(&self.state).caps.append
    }

    fn supports_permissions(&self) -> bool {
        lock(&self.state).caps.permissions
    }

    fn supports_ownership(&self) -> bool {
        lock(&self.state).caps.ownership
    }

    fn supports_timestamp_write(&self) -> bool {
        lock(&self.state).caps.timestamp_write
    }

    async fn open(&mut self, _host: &Host) -> RemoteResult<()> {
        let mut state = self.record("OPEN".into());
        if state.fail_open > 0 {
            state.fail_open -= 1;
            return Err(RemoteError::connection("Connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> RemoteResult<()> {
        let state = self.record(format!("LOGIN {}", credentials.username));
        match &state.password {
            Some(expected) if expected != credentials.password() => {
                Err(RemoteError::from_reply(530, "Login incorrect."))
            }
            _ => Ok(()),
        }
    }

    async fn noop(&mut self) -> RemoteResult<()> {
        let mut state = self.record("NOOP".into());
        if state.fail_noop > 0 {
            state.fail_noop -= 1;
            return Err(RemoteError::connection("Connection reset by peer"));
        }
        Ok(())
    }

    async fn quit(&mut self) -> RemoteResult<()> {
        self.record("QUIT".into());
        Ok(())
    }

    fn interrupt(&mut self) {
        let mut state = self.record("INTERRUPT".into());
        state.connected = false;
    }

    async fn workdir(&mut self) -> RemoteResult<String> {
        self.require_connected()?;
        Ok(self.record("PWD".into()).workdir.clone())
    }

    async fn list(&mut self, dir: &str) -> RemoteResult<Vec<ListEntry>> {
        self.require_connected()?;
        let state = self.record(format!("LIST {}", dir));
        if let Some(lines) = state.raw_listing.get(dir) {
            return Ok(lines.iter().cloned().map(ListEntry::Line).collect());
        }
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        Ok(state.children(dir).into_iter().map(ListEntry::Parsed).collect())
    }

    async fn mkdir(&mut self, path: &str) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("MKD {}", path));
        if state.exists(path) {
            return Err(RemoteError::from_reply(550, "File exists"));
        }
        if !state.dirs.contains(&path_utils::parent(path)) {
            return Err(not_found(path));
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    async fn delete_file(&mut self, path: &str) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("DELE {}", path));
        state.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    async fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("RMD {}", path));
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        if !state.children(path).is_empty() {
            return Err(RemoteError::from_reply(550, "Directory not empty"));
        }
        state.dirs.remove(path);
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("RENAME {} {}", from, to));
        if let Some(content) = state.files.remove(from) {
            state.files.insert(to.to_string(), content);
            return Ok(());
        }
        if !state.dirs.contains(from) {
            return Err(not_found(from));
        }
        let prefix = format!("{}/", from);
        let moved_dirs: Vec<String> = state
            .dirs
            .iter()
            .filter(|d| *d == from || d.starts_with(&prefix))
            .cloned()
            .collect();
        for d in moved_dirs {
            state.dirs.remove(&d);
            state.dirs.insert(format!("{}{}", to, &d[from.len()..]));
        }
        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|f| f.starts_with(&prefix))
            .cloned()
            .collect();
        for f in moved_files {
            if let Some(content) = state.files.remove(&f) {
                state.files.insert(format!("{}{}", to, &f[from.len()..]), content);
            }
        }
        Ok(())
    }

    async fn size(&mut self, path: &str) -> RemoteResult<u64> {
        self.require_connected()?;
        let state = self.record(format!("SIZE {}", path));
        if !state.caps.size {
            return Err(RemoteError::from_reply(502, "SIZE not implemented"));
        }
        state
            .files
            .get(path)
            .map(|c| c.len() as u64)
            .ok_or_else(|| not_found(path))
    }

    async fn modification_time(&mut self, path: &str) -> RemoteResult<DateTime<Utc>> {
        self.require_connected()?;
        let state = self.record(format!("MDTM {}", path));
        state.mtimes.get(path).copied().ok_or_else(|| not_found(path))
    }

    async fn attributes(&mut self, path: &str) -> RemoteResult<Attributes> {
        self.require_connected()?;
        let state = self.record(format!("STAT {}", path));
        if !state.exists(path) {
            return Err(not_found(path));
        }
        let kind = if state.dirs.contains(path) {
            PathType::Directory
        } else {
            PathType::File
        };
        let mut attrs = Attributes::of_kind(kind);
        attrs.permission = state.perms.get(path).copied();
        Ok(attrs)
    }

    async fn set_permission(&mut self, path: &str, permission: Permission) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("CHMOD {} {}", permission.to_octal(), path));
        if state.reject_attributes.contains(path) {
            return Err(RemoteError::from_reply(550, "Operation not permitted"));
        }
        state.perms.insert(path.to_string(), permission);
        Ok(())
    }

    async fn set_owner(&mut self, path: &str, owner: &str) -> RemoteResult<()> {
        self.require_connected()?;
        self.record(format!("CHOWN {} {}", owner, path));
        Ok(())
    }

    async fn set_group(&mut self, path: &str, group: &str) -> RemoteResult<()> {
        self.require_connected()?;
        self.record(format!("CHGRP {} {}", group, path));
        Ok(())
    }

    async fn set_modification_time(&mut self, path: &str, time: DateTime<Utc>) -> RemoteResult<()> {
        self.require_connected()?;
        let mut state = self.record(format!("MFMT {}", path));
        state.mtimes.insert(path.to_string(), time);
        Ok(())
    }

    async fn open_read(
        &mut self,
        path: &str,
        offset: u64,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteReader> {
        self.require_connected()?;
        let mut state = self.record(format!("RETR {} @{} {:?}", path, offset, transfer_type));
        let content = state.files.get(path).ok_or_else(|| not_found(path))?;
        let data = content.get(offset as usize..).unwrap_or_default().to_vec();
        // injected failures fire once
        let fail_after = state.fail_read_after.take();
        Ok(Box::new(ChunkedReader {
            data,
            pos: 0,
            chunk: state.read_chunk.max(1),
            chunks: 0,
            on_chunk: state.on_chunk.clone(),
            fail_after,
        }))
    }

    async fn open_write(
        &mut self,
        path: &str,
        append: bool,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteWriter> {
        self.require_connected()?;
        let verb = if append { "APPE" } else { "STOR" };
        let mut state = self.record(format!("{} {} {:?}", verb, path, transfer_type));
        if !state.dirs.contains(&path_utils::parent(path)) {
            return Err(not_found(path));
        }
        let file = state.files.entry(path.to_string()).or_default();
        if !append {
            file.clear();
        }
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }

    async fn validate_transfer(&mut self) -> RemoteResult<()> {
        let state = self.record("VALIDATE".into());
        if state.fail_validate {
            return Err(RemoteError::from_reply(552, "Quota exceeded"));
        }
        Ok(())
    }

    async fn abort_transfer(&mut self) -> RemoteResult<()> {
        self.record("ABORT".into());
        Ok(())
    }
}

/// Hands out at most `chunk` bytes per read.
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    chunks: usize,
    on_chunk: Option<ChunkHook>,
    fail_after: Option<usize>,
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_after == Some(self.chunks) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "data connection reset",
            )));
        }
        let end = (self.pos + self.chunk).min(self.data.len()).min(self.pos + buf.remaining());
        if end > self.pos {
            let start = self.pos;
            buf.put_slice(&self.data[start..end]);
            self.pos = end;
            self.chunks += 1;
            if let Some(hook) = &self.on_chunk {
                hook(self.chunks);
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Writes straight into the shared file map.
struct MemoryWriter {
    state: Shared,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut state = lock(&self.state);
        state.files.entry(self.path.clone()).or_default().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub struct MemoryFactory {
    pub state: Shared,
}

impl BackendFactory for MemoryFactory {
    fn protocols(&self) -> &[Protocol] {
        &[Protocol::Ftp]
    }

    fn create(&self, _host: &Host, _listener: Arc<dyn StatusListener>) -> RemoteResult<Box<dyn Backend>> {
        Ok(Box::new(MemoryBackend::new(self.state.clone())))
    }
}

// ─── Collaborators ───────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingListener {
    pub messages: Mutex<Vec<(String, MessageCategory)>>,
}

impl RecordingListener {
    pub fn contains(&self, text: &str, category: MessageCategory) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(m, c)| *c == category && m.contains(text))
    }
}

impl StatusListener for RecordingListener {
    fn message(&self, text: &str, category: MessageCategory) {
        self.messages.lock().unwrap().push((text.to_string(), category));
    }
}

/// Answers every prompt with the configured credentials (or declines).
pub struct ScriptedPrompt {
    pub answer: Option<Credentials>,
    pub asked: Mutex<usize>,
}

#[async_trait]
impl CredentialsPrompt for ScriptedPrompt {
    async fn prompt_credentials(&self, _reason: &str, _current: &Credentials) -> Option<Credentials> {
        *self.asked.lock().unwrap() += 1;
        self.answer.clone()
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────

pub fn host() -> Host {
    Host::new(Protocol::Ftp, "files.example.com").with_credentials(Credentials::new("alice", "secret"))
}

pub fn shared(setup: impl FnOnce(&mut MemoryState)) -> Shared {
    let mut state = MemoryState::default();
    setup(&mut state);
    Arc::new(Mutex::new(state))
}

pub fn session(state: &Shared) -> Arc<Session> {
    session_with(state, Collaborators::default())
}

pub fn session_with(state: &Shared, collaborators: Collaborators) -> Arc<Session> {
    Session::new(host(), Box::new(MemoryBackend::new(state.clone())), collaborators)
}

pub fn calls(state: &Shared) -> Vec<String> {
    lock(state).calls.clone()
}

pub fn count(state: &Shared, prefix: &str) -> usize {
    lock(state).count(prefix)
}

pub fn clear_calls(state: &Shared) {
    lock(state).calls.clear();
}

pub fn file(state: &Shared, path: &str) -> Option<Vec<u8>> {
    lock(state).files.get(path).cloned()
}

pub fn with_state<T>(state: &Shared, f: impl FnOnce(&mut MemoryState) -> T) -> T {
    f(&mut lock(state))
}
