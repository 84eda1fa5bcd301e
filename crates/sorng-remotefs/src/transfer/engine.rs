//! Upload/download orchestration.
//!
//! One transfer holds the session guard from mode selection to the end of
//! reconciliation. The copy loop polls the cancel flag after every chunk.

use super::state::TransferState;
use super::throttle::{BandwidthThrottle, RateLimiter, Unlimited};
use super::translate::LineTranslator;
use crate::callbacks::Collaborators;
use crate::config::{DirectionPreferences, TransferPreferences};
use crate::error::{RemoteError, RemoteResult};
use crate::path::{exists_locked, mkdir_locked, RemotePath};
use crate::session::SessionGuard;
use crate::types::{MessageCategory, Permission, TransferStatus, TransferType};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// How a transfer attempt ended, when it did not fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub status: TransferStatus,
    /// Bytes moved by this attempt.
    pub bytes: u64,
    /// Resume offset the attempt started from.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Download,
    Upload,
}

/// Which end of the copy loop failed.
#[derive(Debug)]
enum CopyError {
    Remote(std::io::Error),
    Local(std::io::Error),
}

enum CopyEnd {
    Complete,
    Canceled,
}

pub struct TransferEngine {
    prefs: TransferPreferences,
    text_pattern: Option<Regex>,
    download_throttle: Option<Arc<dyn BandwidthThrottle>>,
    upload_throttle: Option<Arc<dyn BandwidthThrottle>>,
}

impl TransferEngine {
    pub fn new(prefs: TransferPreferences) -> RemoteResult<Self> {
        prefs.validate()?;
        let text_pattern = prefs.text_pattern()?;
        Ok(Self {
            prefs,
            text_pattern,
            download_throttle: None,
            upload_throttle: None,
        })
    }

    /// Replace the rate limiters built from `bandwidth_limit`.
    pub fn with_throttles(
        mut self,
        download: Arc<dyn BandwidthThrottle>,
        upload: Arc<dyn BandwidthThrottle>,
    ) -> Self {
        self.download_throttle = Some(download);
        self.upload_throttle = Some(upload);
        self
    }

    pub fn preferences(&self) -> &TransferPreferences {
        &self.prefs
    }

    /// Binary or text for `filename`; fails before any bytes move when the
    /// mode cannot be resolved.
    pub fn select_mode(&self, filename: &str) -> RemoteResult<TransferType> {
        self.prefs.resolve_mode(filename, self.text_pattern.as_ref())
    }

    fn direction_prefs(&self, direction: Direction) -> &DirectionPreferences {
        match direction {
            Direction::Download => &self.prefs.download,
            Direction::Upload => &self.prefs.upload,
        }
    }

    fn throttle(&self, direction: Direction) -> Arc<dyn BandwidthThrottle> {
        let custom = match direction {
            Direction::Download => self.download_throttle.clone(),
            Direction::Upload => self.upload_throttle.clone(),
        };
        custom.unwrap_or_else(|| match self.direction_prefs(direction).bandwidth_limit {
            Some(limit) if limit > 0 => Arc::new(RateLimiter::new(limit)),
            _ => Arc::new(Unlimited),
        })
    }

    // ─── Retry ───────────────────────────────────────────────────

    pub async fn download_with_retry(
        &self,
        path: &mut RemotePath,
        local: &Path,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        self.with_retry(Direction::Download, path, local, resume).await
    }

    pub async fn upload_with_retry(
        &self,
        path: &mut RemotePath,
        local: &Path,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        self.with_retry(Direction::Upload, path, local, resume).await
    }

    async fn with_retry(
        &self,
        direction: Direction,
        path: &mut RemotePath,
        local: &Path,
        mut resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        let mut attempt = 0;
        loop {
            let result = match direction {
                Direction::Download => self.download(path, local, resume).await,
                Direction::Upload => self.upload(path, local, resume).await,
            };
            match result {
                Err(e) if e.is_retryable() && attempt < self.prefs.retry_count => {
                    attempt += 1;
                    log::warn!(
                        "Transfer of {} failed ({}), retry {}/{} in {}s",
                        path.absolute(),
                        e,
                        attempt,
                        self.prefs.retry_count,
                        self.prefs.retry_delay_sec
                    );
                    tokio::time::sleep(Duration::from_secs(self.prefs.retry_delay_sec)).await;
                    if self.prefs.resume_on_retry {
                        resume = true;
                    }
                }
                other => return other,
            }
        }
    }

    // ─── Download ────────────────────────────────────────────────

    /// Download one path. A directory only gets its local folder; `Transfer`
    /// walks directory contents.
    pub async fn download(
        &self,
        path: &mut RemotePath,
        local: &Path,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        let session = path.session()?;
        let state = path.status().clone();

        if path.kind().is_directory() {
            state.begin(false);
            if let Err(e) = tokio::fs::create_dir_all(local).await {
                state.finish(TransferStatus::Failed);
                return Err(local_error(local, e));
            }
            if self.prefs.download.change_permissions {
                let perm = match path.attributes().permission {
                    Some(p) if !self.prefs.download.use_default_permissions => p,
                    _ => self.prefs.download.folder_permission,
                };
                set_local_permission(local, perm.with_owner_write_execute());
            }
            state.finish(TransferStatus::Complete);
            return Ok(TransferOutcome {
                status: TransferStatus::Complete,
                bytes: 0,
                offset: 0,
            });
        }

        let transfer_type = self.select_mode(&path.name())?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        state.begin(resume);

        let mut offset = 0;
        if resume {
            if transfer_type == TransferType::Ascii {
                log::warn!("Resume disabled for text-mode download of {}", path.absolute());
            } else if !guard.backend().supports_resume() {
                log::warn!("Server cannot resume, downloading {} from start", path.absolute());
            } else {
                let local_len = tokio::fs::metadata(local).await.map(|m| m.len()).unwrap_or(0);
                let remote_size = match path.attributes().size {
                    Some(size) => Some(size),
                    None => match path.read_size_locked(&mut guard).await {
                        Ok(size) => size,
                        Err(e) if e.is_connection() => {
                            state.finish(TransferStatus::Failed);
                            return Err(e);
                        }
                        Err(e) => {
                            log::debug!("Size query for {} failed: {}", path.absolute(), e);
                            None
                        }
                    },
                };
                match remote_size {
                    Some(size) if local_len <= size => offset = local_len,
                    Some(size) => log::warn!(
                        "Local file {} larger than remote ({} > {}), restarting",
                        local.display(),
                        local_len,
                        size
                    ),
                    None => log::warn!(
                        "Size of {} unknown, downloading from start",
                        path.absolute()
                    ),
                }
            }
        }
        state.set_offset(offset);
        guard.report("status.download", path.absolute(), MessageCategory::Start);

        let reader = match guard
            .backend()
            .open_read(path.absolute(), offset, transfer_type)
            .await
        {
            Ok(r) => r,
            Err(e) => return Err(failed(&mut guard, &state, e.with_path(path.absolute()))),
        };

        let local_file = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(local).await
        } else {
            tokio::fs::File::create(local).await
        };
        let local_file = match local_file {
            Ok(f) => f,
            Err(e) => {
                drop(reader);
                abort_quietly(&mut guard).await;
                return Err(failed(&mut guard, &state, local_error(local, e)));
            }
        };

        let translator = (transfer_type == TransferType::Ascii)
            .then(|| LineTranslator::from_net(self.prefs.line_separator));
        let status = self
            .run_copy(
                &mut guard,
                path,
                Direction::Download,
                reader,
                local_file,
                translator,
            )
            .await?;

        if status == TransferStatus::Complete {
            self.reconcile_download(&mut guard, path, local).await;
        }
        Ok(TransferOutcome {
            status,
            bytes: state.transferred(),
            offset,
        })
    }

    async fn reconcile_download(
        &self,
        guard: &mut SessionGuard<'_>,
        path: &mut RemotePath,
        local: &Path,
    ) {
        let prefs = &self.prefs.download;
        if prefs.change_permissions {
            let perm = if prefs.use_default_permissions {
                Some(prefs.file_permission)
            } else {
                path.attributes().permission
            };
            if let Some(perm) = perm {
                set_local_permission(local, perm);
            }
        }
        if prefs.preserve_timestamp {
            let modified = match path.attributes().modified {
                Some(t) => Some(t),
                None => match path.read_timestamp_locked(guard).await {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!("Cannot read timestamp of {}: {}", path.absolute(), e);
                        None
                    }
                },
            };
            if let Some(modified) = modified {
                set_local_mtime(local, modified);
            }
        }
    }

    // ─── Upload ──────────────────────────────────────────────────

    pub async fn upload(
        &self,
        path: &mut RemotePath,
        local: &Path,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        let session = path.session()?;
        let state = path.status().clone();
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|e| local_error(local, e))?;

        if metadata.is_dir() {
            let mut guard = session.exclusive().await;
            guard.ensure_connected().await?;
            state.begin(false);
            let result = match exists_locked(&mut guard, path.absolute()).await {
                Ok(true) => Ok(()),
                Ok(false) => mkdir_locked(&mut guard, path.absolute().to_string(), false).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                state.finish(TransferStatus::Failed);
                return Err(e);
            }
            path.attributes_mut().kind = crate::types::PathType::Directory;
            self.reconcile_upload(&mut guard, path, local, &metadata, true).await;
            state.finish(TransferStatus::Complete);
            return Ok(TransferOutcome {
                status: TransferStatus::Complete,
                bytes: 0,
                offset: 0,
            });
        }

        let transfer_type = self.select_mode(&path.name())?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        state.begin(resume);

        let mut offset = 0;
        if resume {
            if transfer_type == TransferType::Ascii {
                log::warn!("Resume disabled for text-mode upload of {}", path.absolute());
            } else if !guard.backend().supports_append() {
                log::warn!("Server cannot append, uploading {} from start", path.absolute());
            } else {
                match path.read_size_locked(&mut guard).await {
                    Ok(Some(size)) if size <= metadata.len() => offset = size,
                    Ok(Some(size)) => log::warn!(
                        "Remote {} larger than local file ({} > {}), restarting",
                        path.absolute(),
                        size,
                        metadata.len()
                    ),
                    Ok(None) => log::warn!(
                        "Size of {} unknown, uploading from start",
                        path.absolute()
                    ),
                    Err(e) if e.is_connection() => {
                        state.finish(TransferStatus::Failed);
                        return Err(e);
                    }
                    Err(e) => log::warn!(
                        "Size of {} unavailable ({}), uploading from start",
                        path.absolute(),
                        e
                    ),
                }
            }
        }
        state.set_offset(offset);
        guard.report("status.upload", path.absolute(), MessageCategory::Start);

        let mut local_file = match tokio::fs::File::open(local).await {
            Ok(f) => f,
            Err(e) => return Err(failed(&mut guard, &state, local_error(local, e))),
        };
        if offset > 0 {
            if let Err(e) = local_file.seek(std::io::SeekFrom::Start(offset)).await {
                return Err(failed(&mut guard, &state, local_error(local, e)));
            }
        }

        let writer = match guard
            .backend()
            .open_write(path.absolute(), offset > 0, transfer_type)
            .await
        {
            Ok(w) => w,
            Err(e) => {
                guard.cache().invalidate_with_parent(path.absolute());
                return Err(failed(&mut guard, &state, e.with_path(path.absolute())));
            }
        };

        let translator = (transfer_type == TransferType::Ascii).then(LineTranslator::to_net);
        let result = self
            .run_copy(&mut guard, path, Direction::Upload, local_file, writer, translator)
            .await;
        // The remote object changed whatever the outcome.
        guard.cache().invalidate_with_parent(path.absolute());
        let status = result?;

        if status == TransferStatus::Complete {
            path.attributes_mut().size = Some(metadata.len());
            self.reconcile_upload(&mut guard, path, local, &metadata, false).await;
            guard.cache().invalidate_with_parent(path.absolute());
        }
        Ok(TransferOutcome {
            status,
            bytes: state.transferred(),
            offset,
        })
    }

    /// Push local permission and timestamp to the server. Never fails the
    /// transfer; unsupported commands are skipped.
    async fn reconcile_upload(
        &self,
        guard: &mut SessionGuard<'_>,
        path: &mut RemotePath,
        local: &Path,
        metadata: &std::fs::Metadata,
        is_dir: bool,
    ) {
        let prefs = &self.prefs.upload;
        if prefs.change_permissions && guard.backend().supports_permissions() {
            let default = if is_dir {
                prefs.folder_permission
            } else {
                prefs.file_permission
            };
            let perm = if prefs.use_default_permissions {
                default
            } else {
                local_permission(metadata).unwrap_or(default)
            };
            match guard.backend().set_permission(path.absolute(), perm).await {
                Ok(()) => path.attributes_mut().permission = Some(perm),
                Err(e) => self.degrade(guard, "error.chmod", path.absolute(), e),
            }
        }

        if !prefs.preserve_timestamp {
            return;
        }
        let Some(local_mtime) = metadata.modified().ok().map(DateTime::<Utc>::from) else {
            return;
        };
        let pushed = if guard.backend().supports_timestamp_write() {
            match guard
                .backend()
                .set_modification_time(path.absolute(), local_mtime)
                .await
            {
                Ok(()) => {
                    path.attributes_mut().modified = Some(local_mtime);
                    true
                }
                Err(e) => {
                    self.degrade(guard, "error.timestamp", path.absolute(), e);
                    false
                }
            }
        } else {
            false
        };
        if !pushed && prefs.timestamp_fallback_to_local && !is_dir {
            // Server keeps its own time; mirror it locally instead.
            path.attributes_mut().modified = None;
            match path.read_timestamp_locked(guard).await {
                Ok(Some(remote)) => set_local_mtime(local, remote),
                Ok(None) => {}
                Err(e) => log::warn!("Cannot read timestamp of {}: {}", path.absolute(), e),
            }
        }
    }

    fn degrade(&self, guard: &mut SessionGuard<'_>, key: &str, path: &str, e: RemoteError) {
        if e.is_unsupported() {
            log::debug!("{} skipped for {}: {}", key, path, e);
            return;
        }
        let e = guard.fail(e);
        log::warn!("Post-transfer {} failed for {}: {}", key, path, e);
        guard.report(key, &format!("{} ({})", path, e.user_message()), MessageCategory::Error);
    }

    // ─── Copy loop & finalization ────────────────────────────────

    async fn run_copy<R, W>(
        &self,
        guard: &mut SessionGuard<'_>,
        path: &RemotePath,
        direction: Direction,
        mut reader: R,
        mut writer: W,
        translator: Option<LineTranslator>,
    ) -> RemoteResult<TransferStatus>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let state = path.status().clone();
        let throttle = self.throttle(direction);
        let collaborators = guard.session().collaborators().clone();
        let progress = Progress::new(direction, path, &collaborators);

        let copied = copy_chunks(
            &mut reader,
            &mut writer,
            translator,
            throttle.as_ref(),
            &state,
            direction,
            self.prefs.chunk_size,
            &progress,
        )
        .await;

        match copied {
            Ok(CopyEnd::Complete) => {
                let closed = writer.shutdown().await.map_err(|e| match direction {
                    Direction::Download => CopyError::Local(e),
                    Direction::Upload => CopyError::Remote(e),
                });
                drop(reader);
                drop(writer);
                if let Err(e) = closed {
                    return Err(self.copy_failed(guard, path, direction, &state, e).await);
                }
                if let Err(e) = guard.backend().validate_transfer().await {
                    let e = guard.fail(e.with_path(path.absolute()));
                    return Err(transfer_failed(guard, &state, e));
                }
                state.finish(TransferStatus::Complete);
                progress.done(state.transferred());
                log::info!(
                    "Transfer of {} complete ({} bytes)",
                    path.absolute(),
                    state.transferred()
                );
                guard.report("status.complete", &path.name(), MessageCategory::Progress);
                Ok(TransferStatus::Complete)
            }
            Ok(CopyEnd::Canceled) => {
                if direction == Direction::Download {
                    // keep every chunk already written
                    let _ = writer.flush().await;
                }
                drop(reader);
                drop(writer);
                if let Err(e) = guard.backend().abort_transfer().await {
                    let e = guard.fail(e);
                    log::warn!("Abort of {} failed: {}", path.absolute(), e);
                }
                state.finish(TransferStatus::Canceled);
                log::info!("Transfer of {} canceled", path.absolute());
                guard.report("status.canceled", &path.name(), MessageCategory::Progress);
                Ok(TransferStatus::Canceled)
            }
            Err(e) => {
                if direction == Direction::Download {
                    // partial data stays for a later resume
                    let _ = writer.flush().await;
                }
                drop(reader);
                drop(writer);
                Err(self.copy_failed(guard, path, direction, &state, e).await)
            }
        }
    }

    async fn copy_failed(
        &self,
        guard: &mut SessionGuard<'_>,
        path: &RemotePath,
        direction: Direction,
        state: &TransferState,
        error: CopyError,
    ) -> RemoteError {
        let e = match error {
            CopyError::Remote(e) => {
                if direction == Direction::Upload {
                    // A server that refuses the upload closes the data side;
                    // its reply explains the broken stream.
                    match guard.backend().validate_transfer().await {
                        Err(reply) if reply.code.is_some() && !reply.is_connection() => {
                            log::warn!("Upload of {} refused: {}", path.absolute(), reply);
                            return transfer_failed(guard, state, reply.with_path(path.absolute()));
                        }
                        Err(reply) => log::debug!("No reply for {}: {}", path.absolute(), reply),
                        Ok(()) => {}
                    }
                }
                log::warn!("Remote stream of {} failed, interrupting: {}", path.absolute(), e);
                guard.interrupt();
                RemoteError::transfer(format!("Data channel error: {}", e))
            }
            CopyError::Local(e) => {
                log::warn!("Local I/O during transfer of {} failed: {}", path.absolute(), e);
                abort_quietly(guard).await;
                RemoteError::transfer(format!("Local file error: {}", e))
            }
        };
        transfer_failed(guard, state, e.with_path(path.absolute()))
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("prefs", &self.prefs)
            .finish_non_exhaustive()
    }
}

/// Rate-limited progress reporting.
struct Progress<'a> {
    key: &'static str,
    name: String,
    total: Option<u64>,
    offset: u64,
    collaborators: &'a Collaborators,
    last: std::sync::Mutex<Instant>,
}

impl<'a> Progress<'a> {
    fn new(direction: Direction, path: &RemotePath, collaborators: &'a Collaborators) -> Self {
        Self {
            key: match direction {
                Direction::Download => "status.download",
                Direction::Upload => "status.upload",
            },
            name: path.name(),
            total: path.attributes().size,
            offset: path.status().offset(),
            collaborators,
            last: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn update(&self, transferred: u64) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if last.elapsed() < PROGRESS_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);
        self.emit(transferred);
    }

    fn done(&self, transferred: u64) {
        self.emit(transferred);
    }

    fn emit(&self, transferred: u64) {
        let current = self.offset + transferred;
        let detail = match self.total {
            Some(total) => format!("{} ({} of {} bytes)", self.name, current, total),
            None => format!("{} ({} bytes)", self.name, current),
        };
        self.collaborators
            .report(self.key, &detail, MessageCategory::Progress);
    }
}

/// Read, translate, throttle, write, count, check for cancel; per chunk.
#[allow(clippy::too_many_arguments)]
async fn copy_chunks<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut translator: Option<LineTranslator>,
    throttle: &dyn BandwidthThrottle,
    state: &TransferState,
    direction: Direction,
    chunk_size: usize,
    progress: &Progress<'_>,
) -> Result<CopyEnd, CopyError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let (read_err, write_err): (fn(std::io::Error) -> CopyError, fn(std::io::Error) -> CopyError) =
        match direction {
            Direction::Download => (CopyError::Remote, CopyError::Local),
            Direction::Upload => (CopyError::Local, CopyError::Remote),
        };
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut out = Vec::new();

    loop {
        let n = reader.read(&mut buf).await.map_err(read_err)?;
        out.clear();
        let data: &[u8] = match translator.as_mut() {
            Some(t) if n == 0 => {
                t.finish(&mut out);
                &out
            }
            Some(t) => {
                t.filter(&buf[..n], &mut out);
                &out
            }
            None => &buf[..n],
        };

        if !data.is_empty() {
            throttle.acquire(data.len()).await;
            writer.write_all(data).await.map_err(write_err)?;
            // progress counts bytes on the local side
            let counted = match direction {
                Direction::Download => data.len(),
                Direction::Upload => n,
            };
            let total = state.add_transferred(counted as u64);
            progress.update(total);
        }
        if n == 0 {
            return Ok(CopyEnd::Complete);
        }
        if state.is_canceled() {
            return Ok(CopyEnd::Canceled);
        }
    }
}

fn failed(guard: &mut SessionGuard<'_>, state: &TransferState, e: RemoteError) -> RemoteError {
    let e = guard.fail(e);
    transfer_failed(guard, state, e)
}

fn transfer_failed(guard: &SessionGuard<'_>, state: &TransferState, e: RemoteError) -> RemoteError {
    state.finish(TransferStatus::Failed);
    guard.report("error.transfer", &e.user_message(), MessageCategory::Error);
    e
}

async fn abort_quietly(guard: &mut SessionGuard<'_>) {
    if let Err(e) = guard.backend().abort_transfer().await {
        let e = guard.fail(e);
        log::debug!("Abort after local failure: {}", e);
    }
}

fn local_error(local: &Path, e: std::io::Error) -> RemoteError {
    RemoteError::transfer(format!("Local file {}: {}", local.display(), e))
}

fn set_local_mtime(local: &Path, time: DateTime<Utc>) {
    let mtime = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
    if let Err(e) = filetime::set_file_mtime(local, mtime) {
        log::warn!("Cannot set modification time of {}: {}", local.display(), e);
    }
}

#[cfg(unix)]
fn set_local_permission(local: &Path, perm: Permission) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(u32::from(perm.mode()));
    if let Err(e) = std::fs::set_permissions(local, mode) {
        log::warn!("Cannot set permissions of {}: {}", local.display(), e);
    }
}

#[cfg(not(unix))]
fn set_local_permission(local: &Path, perm: Permission) {
    log::debug!("Ignoring permission {} for {}", perm, local.display());
}

#[cfg(unix)]
fn local_permission(metadata: &std::fs::Metadata) -> Option<Permission> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permission::new((metadata.permissions().mode() & 0o7777) as u16))
}

#[cfg(not(unix))]
fn local_permission(_metadata: &std::fs::Metadata) -> Option<Permission> {
    None
}
