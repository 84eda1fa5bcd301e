//! Multi-item transfers.
//!
//! A `Transfer` holds one or more roots. Directory roots are expanded
//! depth-first into a single job list, the existing-file action is applied
//! to every file job, and the jobs then run one by one through the
//! `TransferEngine`. Size and progress are aggregated over the whole list.

use super::engine::{TransferEngine, TransferOutcome};
use super::state::TransferState;
use crate::error::{RemoteError, RemoteResult};
use crate::path::RemotePath;
use crate::types::{PathType, TransferAction, TransferStatus};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferKind {
    Download,
    Upload,
}

/// A remote path and its local counterpart.
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub remote: RemotePath,
    pub local: PathBuf,
}

impl TransferItem {
    pub fn new(remote: RemotePath, local: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            local: local.into(),
        }
    }
}

/// Picks the action when the configured one is `Callback` and a root
/// destination already exists.
#[async_trait]
pub trait TransferPrompt: Send + Sync {
    async fn prompt(&self, transfer: &Transfer) -> TransferAction;
}

/// Answers every prompt with the same action.
#[derive(Debug, Clone, Copy)]
pub struct FixedAction(pub TransferAction);

#[async_trait]
impl TransferPrompt for FixedAction {
    async fn prompt(&self, _transfer: &Transfer) -> TransferAction {
        self.0
    }
}

/// What happened to each job of one run, keyed by remote path.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, RemoteError)>,
    pub canceled: bool,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.canceled
    }
}

struct Job {
    item: TransferItem,
    is_dir: bool,
    resume: bool,
}

pub struct Transfer {
    kind: TransferKind,
    roots: Vec<TransferItem>,
    size: AtomicU64,
    /// Bytes of jobs that already finished.
    finished_bytes: AtomicU64,
    canceled: AtomicBool,
    running: AtomicBool,
    current: Mutex<Option<Arc<TransferState>>>,
}

impl Transfer {
    pub fn new(kind: TransferKind, roots: Vec<TransferItem>) -> Self {
        Self {
            kind,
            roots,
            size: AtomicU64::new(0),
            finished_bytes: AtomicU64::new(0),
            canceled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    pub fn download(roots: Vec<TransferItem>) -> Self {
        Self::new(TransferKind::Download, roots)
    }

    pub fn upload(roots: Vec<TransferItem>) -> Self {
        Self::new(TransferKind::Upload, roots)
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn roots(&self) -> &[TransferItem] {
        &self.roots
    }

    /// Local names of the roots, space separated.
    pub fn name(&self) -> String {
        self.roots
            .iter()
            .filter_map(|r| r.local.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Bytes the current run will move, skipped files excluded.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Bytes at the destinations so far, resumed prefixes included.
    pub fn transferred(&self) -> u64 {
        let running = self
            .current_state()
            .map(|s| s.offset() + s.transferred())
            .unwrap_or(0);
        self.finished_bytes.load(Ordering::SeqCst) + running
    }

    pub fn is_complete(&self) -> bool {
        let transferred = self.transferred();
        transferred > 0 && transferred == self.size()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Stop after the job in flight; that job is canceled as well.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        if let Some(state) = self.current_state() {
            state.cancel();
        }
    }

    fn current_state(&self) -> Option<Arc<TransferState>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_current(&self, state: Option<Arc<TransferState>>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    // ─── Run ─────────────────────────────────────────────────────

    /// Move every root. `resume` forces the `Resume` action; otherwise the
    /// direction's `file_exists` preference applies.
    ///
    /// Protocol failures of single jobs are collected in the report and the
    /// run goes on. A connection failure ends the run with that error.
    pub async fn run(
        &self,
        engine: &TransferEngine,
        resume: bool,
        prompt: &dyn TransferPrompt,
    ) -> RemoteResult<TransferReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::transfer(format!(
                "Transfer {} is already running",
                self.name()
            )));
        }
        self.canceled.store(false, Ordering::SeqCst);
        self.size.store(0, Ordering::SeqCst);
        self.finished_bytes.store(0, Ordering::SeqCst);

        let result = self.run_jobs(engine, resume, prompt).await;
        self.set_current(None);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_jobs(
        &self,
        engine: &TransferEngine,
        resume: bool,
        prompt: &dyn TransferPrompt,
    ) -> RemoteResult<TransferReport> {
        let mut report = TransferReport::default();
        let action = self.resolve_action(engine, resume, prompt).await?;
        if action == TransferAction::Cancel {
            log::info!("Transfer {} canceled before start", self.name());
            report.canceled = true;
            return Ok(report);
        }

        let mut items = Vec::new();
        for root in &self.roots {
            match self.kind {
                TransferKind::Download => expand_download(root.clone(), &mut items).await?,
                TransferKind::Upload => expand_upload(root.clone(), &mut items).await?,
            }
        }
        let jobs = self.prepare(items, action, &mut report).await?;
        log::info!(
            "Transfer {}: {} jobs, {} bytes, action {:?}",
            self.name(),
            jobs.len(),
            self.size(),
            action
        );

        for mut job in jobs {
            if self.is_canceled() {
                report.canceled = true;
                break;
            }
            let remote = job.item.remote.absolute().to_string();
            self.set_current(Some(job.item.remote.status().clone()));
            let result = match self.kind {
                TransferKind::Download => {
                    engine
                        .download_with_retry(&mut job.item.remote, &job.item.local, job.resume)
                        .await
                }
                TransferKind::Upload => {
                    engine
                        .upload_with_retry(&mut job.item.remote, &job.item.local, job.resume)
                        .await
                }
            };
            self.set_current(None);

            match result {
                Ok(TransferOutcome { status, bytes, offset }) => {
                    if !job.is_dir {
                        self.finished_bytes.fetch_add(offset + bytes, Ordering::SeqCst);
                    }
                    if status == TransferStatus::Canceled {
                        report.canceled = true;
                        break;
                    }
                    report.completed.push(remote);
                }
                Err(e) if e.is_connection() => {
                    log::warn!("Transfer {} stopped at {}: {}", self.name(), remote, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("Transfer of {} failed, continuing: {}", remote, e);
                    report.failed.push((remote, e));
                }
            }
        }
        Ok(report)
    }

    /// `Callback` becomes the prompt's answer when any root destination
    /// exists, and `Overwrite` when none does.
    async fn resolve_action(
        &self,
        engine: &TransferEngine,
        resume: bool,
        prompt: &dyn TransferPrompt,
    ) -> RemoteResult<TransferAction> {
        if resume {
            return Ok(TransferAction::Resume);
        }
        let configured = match self.kind {
            TransferKind::Download => engine.preferences().download.file_exists,
            TransferKind::Upload => engine.preferences().upload.file_exists,
        };
        if configured != TransferAction::Callback {
            return Ok(configured);
        }
        for root in &self.roots {
            if self.destination_exists(root).await? {
                return Ok(match prompt.prompt(self).await {
                    TransferAction::Callback => TransferAction::Overwrite,
                    chosen => chosen,
                });
            }
        }
        Ok(TransferAction::Overwrite)
    }

    async fn destination_exists(&self, item: &TransferItem) -> RemoteResult<bool> {
        match self.kind {
            TransferKind::Download => Ok(local_exists(&item.local).await),
            TransferKind::Upload => item.remote.exists().await,
        }
    }

    /// Apply `action` to every file job and add up the bytes to move.
    async fn prepare(
        &self,
        items: Vec<(TransferItem, bool)>,
        action: TransferAction,
        report: &mut TransferReport,
    ) -> RemoteResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(items.len());
        let mut total = 0u64;
        for (mut item, is_dir) in items {
            if is_dir {
                jobs.push(Job {
                    item,
                    is_dir,
                    resume: false,
                });
                continue;
            }
            let exists = self.destination_exists(&item).await?;
            let mut resume = false;
            if exists {
                match action {
                    TransferAction::Skip => {
                        log::debug!("Skipping existing {}", item.local.display());
                        report.skipped.push(item.remote.absolute().to_string());
                        continue;
                    }
                    TransferAction::Resume => resume = true,
                    TransferAction::Rename => item = self.renamed(item).await?,
                    _ => {}
                }
            }
            total += self.source_size(&mut item).await;
            jobs.push(Job {
                item,
                is_dir,
                resume,
            });
        }
        self.size.store(total, Ordering::SeqCst);
        Ok(jobs)
    }

    async fn source_size(&self, item: &mut TransferItem) -> u64 {
        match self.kind {
            TransferKind::Download => {
                if let Some(size) = item.remote.attributes().size {
                    return size;
                }
                match item.remote.read_size().await {
                    Ok(size) => size.unwrap_or(0),
                    Err(e) => {
                        log::debug!("Size of {} unknown: {}", item.remote.absolute(), e);
                        0
                    }
                }
            }
            TransferKind::Upload => tokio::fs::metadata(&item.local)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
        }
    }

    /// Point the destination at the first free `name-N.ext` sibling.
    async fn renamed(&self, item: TransferItem) -> RemoteResult<TransferItem> {
        match self.kind {
            TransferKind::Download => {
                let Some(name) = item.local.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    return Ok(item);
                };
                let parent = item.local.parent().map(Path::to_path_buf).unwrap_or_default();
                let mut n = 1;
                loop {
                    let candidate = parent.join(numbered(&name, n));
                    if !local_exists(&candidate).await {
                        log::info!("Downloading {} as {}", item.remote.absolute(), candidate.display());
                        return Ok(TransferItem::new(item.remote, candidate));
                    }
                    n += 1;
                }
            }
            TransferKind::Upload => {
                let parent = item.remote.parent();
                let taken: HashSet<String> = parent.children().await?.names().into_iter().collect();
                let name = item.remote.name();
                let mut n = 1;
                while taken.contains(&numbered(&name, n)) {
                    n += 1;
                }
                let remote = parent.child(&numbered(&name, n), item.remote.kind());
                log::info!("Uploading {} as {}", item.local.display(), remote.absolute());
                Ok(TransferItem::new(remote, item.local))
            }
        }
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("kind", &self.kind)
            .field("roots", &self.roots.len())
            .field("size", &self.size())
            .field("transferred", &self.transferred())
            .field("running", &self.is_running())
            .finish()
    }
}

// ─── Expansion ───────────────────────────────────────────────────────

/// Depth-first: a directory comes before its children. Symbolic links are
/// moved as files and never followed.
fn expand_download(
    item: TransferItem,
    out: &mut Vec<(TransferItem, bool)>,
) -> BoxFuture<'_, RemoteResult<()>> {
    async move {
        let is_dir = item.remote.kind().is_directory();
        let remote = item.remote.clone();
        let local = item.local.clone();
        out.push((item, is_dir));
        if !is_dir {
            return Ok(());
        }
        let listing = remote.children().await?;
        if !listing.readable {
            log::warn!("Cannot list {}, its contents are left out", remote.absolute());
        }
        for child in listing.paths {
            let child_local = local.join(child.name());
            expand_download(TransferItem::new(child, child_local), out).await?;
        }
        Ok(())
    }
    .boxed()
}

fn expand_upload(
    mut item: TransferItem,
    out: &mut Vec<(TransferItem, bool)>,
) -> BoxFuture<'_, RemoteResult<()>> {
    async move {
        let metadata = tokio::fs::metadata(&item.local).await.map_err(|e| {
            RemoteError::transfer(format!("Local file {}: {}", item.local.display(), e))
        })?;
        let is_dir = metadata.is_dir();
        if is_dir {
            item.remote.attributes_mut().kind = PathType::Directory;
        }
        let remote = item.remote.clone();
        let local = item.local.clone();
        out.push((item, is_dir));
        if !is_dir {
            return Ok(());
        }

        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(&local).await.map_err(|e| {
            RemoteError::transfer(format!("Local folder {}: {}", local.display(), e))
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            RemoteError::transfer(format!("Local folder {}: {}", local.display(), e))
        })? {
            children.push(entry.file_name().to_string_lossy().into_owned());
        }
        children.sort();
        for name in children {
            let child = remote.child(&name, PathType::File);
            expand_upload(TransferItem::new(child, local.join(&name)), out).await?;
        }
        Ok(())
    }
    .boxed()
}

async fn local_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// `report.pdf` → `report-2.pdf`; names without an extension get the suffix.
fn numbered(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{}-{}", name, n),
    }
}
