//! `RemotePath`: a handle to one object on a session.
//!
//! Every operation acquires the session's exclusive guard, makes sure the
//! session is connected, issues the backend call, invalidates the affected
//! cache entries and reports status. Parent and children are computed from
//! the path string; the handle only holds a weak reference to its session.

use crate::cache::Listing;
use crate::error::{RemoteError, RemoteResult};
use crate::path_utils;
use crate::session::{Session, SessionGuard};
use crate::transfer::{TransferEngine, TransferOutcome, TransferState};
use crate::types::{Attributes, Entry, MessageCategory, PathType, Permission};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::path::Path;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
pub struct RemotePath {
    session: Weak<Session>,
    path: String,
    attributes: Attributes,
    status: Arc<TransferState>,
}

/// Result of a listing. `readable` is `false` when the server refused it.
#[derive(Debug, Clone)]
pub struct PathList {
    pub paths: Vec<RemotePath>,
    pub readable: bool,
}

impl PathList {
    pub fn unreadable() -> Self {
        Self {
            paths: Vec::new(),
            readable: false,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.paths.iter().map(|p| p.name()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&RemotePath> {
        self.paths.iter().find(|p| p.name() == name)
    }
}

impl RemotePath {
    pub fn new(session: &Arc<Session>, path: &str, kind: PathType) -> Self {
        Self {
            session: Arc::downgrade(session),
            path: path_utils::normalize(path),
            attributes: Attributes::of_kind(kind),
            status: Arc::new(TransferState::new()),
        }
    }

    fn from_entry(session: &Weak<Session>, dir: &str, entry: Entry) -> Self {
        Self {
            session: session.clone(),
            path: path_utils::join(dir, &entry.name),
            attributes: entry.attributes,
            status: Arc::new(TransferState::new()),
        }
    }

    /// The owning session, if it still exists.
    pub fn session(&self) -> RemoteResult<Arc<Session>> {
        self.session.upgrade().ok_or_else(RemoteError::session_closed)
    }

    pub fn absolute(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> String {
        path_utils::file_name(&self.path)
    }

    pub fn is_root(&self) -> bool {
        path_utils::is_root(&self.path)
    }

    /// Parent directory; the root is its own parent.
    pub fn parent(&self) -> RemotePath {
        Self {
            session: self.session.clone(),
            path: path_utils::parent(&self.path),
            attributes: Attributes::of_kind(PathType::Directory),
            status: Arc::new(TransferState::new()),
        }
    }

    pub fn child(&self, name: &str, kind: PathType) -> RemotePath {
        Self {
            session: self.session.clone(),
            path: path_utils::join(&self.path, name),
            attributes: Attributes::of_kind(kind),
            status: Arc::new(TransferState::new()),
        }
    }

    pub fn kind(&self) -> PathType {
        self.attributes.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Transfer bookkeeping shared with whoever wants to observe or cancel.
    pub fn status(&self) -> &Arc<TransferState> {
        &self.status
    }

    /// Request cancellation of the running transfer. No-op unless one is in progress.
    pub fn cancel(&self) -> bool {
        self.status.cancel()
    }

    fn to_path_list(&self, listing: Listing) -> PathList {
        PathList {
            readable: listing.readable,
            paths: listing
                .entries
                .into_iter()
                .map(|e| Self::from_entry(&self.session, &self.path, e))
                .collect(),
        }
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// List the directory from the server, in server order.
    ///
    /// A protocol rejection yields an empty, unreadable result instead of an
    /// error; transport failures propagate and interrupt the session.
    pub async fn list(&self) -> RemoteResult<PathList> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        guard.report("status.listing", &self.path, MessageCategory::Progress);
        match guard.fetch_listing(&self.path).await {
            Ok(listing) => Ok(self.to_path_list(listing)),
            Err(e) if e.is_connection() => {
                guard.report("error.list", &e.user_message(), MessageCategory::Error);
                Err(e)
            }
            Err(e) => {
                log::warn!("Listing {} failed: {}", self.path, e);
                guard.report(
                    "error.list",
                    &format!("{} ({})", self.path, e.user_message()),
                    MessageCategory::Error,
                );
                Ok(PathList::unreadable())
            }
        }
    }

    /// Like [`list`](Self::list) but served from the cache when possible.
    pub async fn children(&self) -> RemoteResult<PathList> {
        let session = self.session()?;
        if let Some(listing) = session.cache().listing(&self.path) {
            return Ok(self.to_path_list(listing));
        }
        self.list().await
    }

    /// Whether the parent's listing contains this name.
    pub async fn exists(&self) -> RemoteResult<bool> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        exists_locked(&mut guard, &self.path).await
    }

    // ─── Namespace mutations ─────────────────────────────────────

    /// Create this directory, and missing parents first when `recursive`.
    pub async fn mkdir(&mut self, recursive: bool) -> RemoteResult<()> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        mkdir_locked(&mut guard, self.path.clone(), recursive).await?;
        self.attributes.kind = PathType::Directory;
        Ok(())
    }

    /// Rename to `new_name`, relative to the current parent unless absolute.
    pub async fn rename(&mut self, new_name: &str) -> RemoteResult<()> {
        let target = path_utils::join(&path_utils::parent(&self.path), new_name);
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        guard.report(
            "status.rename",
            &format!("{} to {}", self.path, target),
            MessageCategory::Progress,
        );

        guard.cache().invalidate_with_parent(&self.path);
        if let Err(e) = guard.backend().rename(&self.path, &target).await {
            let mut e = guard.fail(e.with_path(&self.path));
            let key = if self.kind().is_directory() {
                "error.rename-folder"
            } else {
                "error.rename-file"
            };
            let label = session.collaborators().localizer.localized(key);
            guard.report(key, &format!("{} ({})", self.name(), e.user_message()), MessageCategory::Error);
            e.message = format!("{}: {}", label, e.message);
            return Err(e);
        }
        guard.cache().invalidate_with_parent(&self.path);
        self.path = target;
        guard.cache().invalidate_with_parent(&self.path);
        Ok(())
    }

    /// Delete the object; directories are emptied depth-first, files before
    /// subdirectories. The parent listing is invalidated in every case.
    pub async fn delete(&self) -> RemoteResult<()> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        let result = delete_locked(&mut guard, self.path.clone(), self.kind()).await;
        guard.cache().invalidate_with_parent(&self.path);
        result
    }

    // ─── Attribute reads ─────────────────────────────────────────

    pub async fn read_size(&mut self) -> RemoteResult<Option<u64>> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        self.read_size_locked(&mut guard).await
    }

    pub async fn read_timestamp(&mut self) -> RemoteResult<Option<DateTime<Utc>>> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        self.read_timestamp_locked(&mut guard).await
    }

    pub async fn read_permission(&mut self) -> RemoteResult<Option<Permission>> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;

        match guard.backend().attributes(&self.path).await {
            Ok(attrs) if attrs.permission.is_some() => {
                self.attributes.permission = attrs.permission;
                return Ok(self.attributes.permission);
            }
            Ok(_) => {}
            Err(e) if e.is_connection() => return Err(guard.fail(e)),
            Err(e) => log::debug!("Direct metadata query for {} failed: {}", self.path, e),
        }
        if let Some(attrs) = self.refresh_from_parent(&mut guard).await? {
            self.attributes.permission = attrs.permission;
        }
        Ok(self.attributes.permission)
    }

    pub(crate) async fn read_size_locked(
        &mut self,
        guard: &mut SessionGuard<'_>,
    ) -> RemoteResult<Option<u64>> {
        if !self.kind().is_directory() {
            match guard.backend().size(&self.path).await {
                Ok(size) => {
                    self.attributes.size = Some(size);
                    return Ok(Some(size));
                }
                Err(e) if e.is_connection() => return Err(guard.fail(e)),
                Err(e) => log::debug!("Direct size query for {} failed: {}", self.path, e),
            }
        }
        if let Some(attrs) = self.refresh_from_parent(guard).await? {
            self.attributes.size = attrs.size;
        }
        Ok(self.attributes.size)
    }

    pub(crate) async fn read_timestamp_locked(
        &mut self,
        guard: &mut SessionGuard<'_>,
    ) -> RemoteResult<Option<DateTime<Utc>>> {
        match guard.backend().modification_time(&self.path).await {
            Ok(time) => {
                self.attributes.modified = Some(time);
                return Ok(Some(time));
            }
            Err(e) if e.is_connection() => return Err(guard.fail(e)),
            Err(e) => log::debug!("Direct timestamp query for {} failed: {}", self.path, e),
        }
        if let Some(attrs) = self.refresh_from_parent(guard).await? {
            self.attributes.modified = attrs.modified;
        }
        Ok(self.attributes.modified)
    }

    /// One fresh listing of the parent; the matching entry's attributes.
    async fn refresh_from_parent(
        &self,
        guard: &mut SessionGuard<'_>,
    ) -> RemoteResult<Option<Attributes>> {
        if self.is_root() {
            return Ok(None);
        }
        let parent = path_utils::parent(&self.path);
        match guard.fetch_listing(&parent).await {
            Ok(listing) => Ok(listing.find(&self.name()).map(|e| e.attributes.clone())),
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                log::debug!("Parent listing of {} failed: {}", self.path, e);
                Ok(None)
            }
        }
    }

    // ─── Attribute writes ────────────────────────────────────────

    pub async fn write_permissions(
        &mut self,
        permission: Permission,
        recursive: bool,
    ) -> RemoteResult<()> {
        self.write_attribute(AttributeChange::Permission(permission), recursive)
            .await?;
        self.attributes.permission = Some(permission);
        Ok(())
    }

    pub async fn write_owner(&mut self, owner: &str, recursive: bool) -> RemoteResult<()> {
        self.write_attribute(AttributeChange::Owner(owner.to_string()), recursive)
            .await?;
        self.attributes.owner = Some(owner.to_string());
        Ok(())
    }

    pub async fn write_group(&mut self, group: &str, recursive: bool) -> RemoteResult<()> {
        self.write_attribute(AttributeChange::Group(group.to_string()), recursive)
            .await?;
        self.attributes.group = Some(group.to_string());
        Ok(())
    }

    async fn write_attribute(&self, change: AttributeChange, recursive: bool) -> RemoteResult<()> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        let supported = match change {
            AttributeChange::Permission(_) => guard.backend().supports_permissions(),
            AttributeChange::Owner(_) | AttributeChange::Group(_) => {
                guard.backend().supports_ownership()
            }
        };
        if !supported {
            return Err(RemoteError::unsupported(format!(
                "{} not supported by this server",
                change.describe()
            ))
            .with_path(&self.path));
        }
        apply_locked(&mut guard, self.path.clone(), self.kind(), &change, recursive).await
    }

    pub async fn write_timestamp(&mut self, time: DateTime<Utc>) -> RemoteResult<()> {
        let session = self.session()?;
        let mut guard = session.exclusive().await;
        guard.ensure_connected().await?;
        if !guard.backend().supports_timestamp_write() {
            return Err(RemoteError::unsupported("Changing timestamp not supported").with_path(&self.path));
        }
        guard.report("status.timestamp", &self.path, MessageCategory::Progress);
        let result = guard.backend().set_modification_time(&self.path, time).await;
        guard.cache().invalidate_with_parent(&self.path);
        match result {
            Ok(()) => {
                self.attributes.modified = Some(time);
                Ok(())
            }
            Err(e) => {
                let e = guard.fail(e.with_path(&self.path));
                guard.report("error.timestamp", &e.user_message(), MessageCategory::Error);
                Err(e)
            }
        }
    }

    // ─── Transfers ───────────────────────────────────────────────

    pub async fn download(
        &mut self,
        local: &Path,
        engine: &TransferEngine,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        engine.download(self, local, resume).await
    }

    pub async fn upload(
        &mut self,
        local: &Path,
        engine: &TransferEngine,
        resume: bool,
    ) -> RemoteResult<TransferOutcome> {
        engine.upload(self, local, resume).await
    }
}

impl PartialEq for RemotePath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && Weak::ptr_eq(&self.session, &other.session)
    }
}

// ─── Locked helpers ──────────────────────────────────────────────────
//
// These run with the session guard already held, so recursion does not
// re-enter the lock.

pub(crate) async fn exists_locked(guard: &mut SessionGuard<'_>, path: &str) -> RemoteResult<bool> {
    if path_utils::is_root(path) {
        return Ok(true);
    }
    let parent = path_utils::parent(path);
    match guard.listing(&parent).await {
        Ok(listing) => Ok(listing.find(&path_utils::file_name(path)).is_some()),
        Err(e) if e.is_connection() => Err(e),
        Err(_) => Ok(false),
    }
}

pub(crate) fn mkdir_locked<'a, 'g: 'a>(
    guard: &'a mut SessionGuard<'g>,
    path: String,
    recursive: bool,
) -> BoxFuture<'a, RemoteResult<()>> {
    async move {
        let parent = path_utils::parent(&path);
        if recursive && !path_utils::is_root(&path) && !exists_locked(guard, &parent).await? {
            mkdir_locked(guard, parent.clone(), true).await?;
        }
        guard.report("status.mkdir", &path, MessageCategory::Progress);
        if let Err(e) = guard.backend().mkdir(&path).await {
            let e = guard.fail(e.with_path(&path));
            guard.report(
                "error.mkdir",
                &format!("{} ({})", path, e.user_message()),
                MessageCategory::Error,
            );
            return Err(e);
        }
        // A new directory is known to be empty.
        guard.cache().put_listing(&path, Listing::empty());
        guard
            .cache()
            .put(&path, Attributes::of_kind(PathType::Directory));
        guard.cache().invalidate(&parent);
        Ok(())
    }
    .boxed()
}

fn delete_locked<'a, 'g: 'a>(
    guard: &'a mut SessionGuard<'g>,
    path: String,
    kind: PathType,
) -> BoxFuture<'a, RemoteResult<()>> {
    async move {
        if !kind.is_directory() {
            guard.report("status.delete", &path, MessageCategory::Progress);
            let result = guard.backend().delete_file(&path).await;
            guard.cache().invalidate_with_parent(&path);
            return result.map_err(|e| {
                let e = guard.fail(e.with_path(&path));
                guard.report(
                    "error.delete-file",
                    &format!("{} ({})", path, e.user_message()),
                    MessageCategory::Error,
                );
                e
            });
        }

        let listing = match guard.listing(&path).await {
            Ok(listing) => listing,
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                log::warn!("Cannot list {} before deleting it: {}", path, e);
                Listing::unreadable()
            }
        };

        let mut first_error: Option<RemoteError> = None;
        let (dirs, files): (Vec<Entry>, Vec<Entry>) = listing
            .entries
            .into_iter()
            .partition(|e| e.attributes.kind.is_directory());

        for entry in files.into_iter().chain(dirs) {
            if !guard.is_connected() {
                log::warn!("Session disconnected while deleting {}", path);
                return Err(first_error
                    .unwrap_or_else(|| RemoteError::connection("Disconnected during delete")));
            }
            let child = path_utils::join(&path, &entry.name);
            if let Err(e) = delete_locked(guard, child, entry.attributes.kind).await {
                first_error.get_or_insert(e);
            }
        }

        if !guard.is_connected() {
            return Err(first_error
                .unwrap_or_else(|| RemoteError::connection("Disconnected during delete")));
        }
        guard.report("status.delete", &path, MessageCategory::Progress);
        let result = guard.backend().remove_dir(&path).await;
        guard.cache().invalidate_with_parent(&path);
        if let Err(e) = result {
            let e = guard.fail(e.with_path(&path));
            guard.report(
                "error.delete-folder",
                &format!("{} ({})", path, e.user_message()),
                MessageCategory::Error,
            );
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
    .boxed()
}

enum AttributeChange {
    Permission(Permission),
    Owner(String),
    Group(String),
}

impl AttributeChange {
    fn describe(&self) -> &'static str {
        match self {
            AttributeChange::Permission(_) => "Changing permissions",
            AttributeChange::Owner(_) => "Changing owner",
            AttributeChange::Group(_) => "Changing group",
        }
    }

    fn keys(&self) -> (&'static str, &'static str) {
        match self {
            AttributeChange::Permission(_) => ("status.chmod", "error.chmod"),
            AttributeChange::Owner(_) => ("status.chown", "error.chown"),
            AttributeChange::Group(_) => ("status.chgrp", "error.chgrp"),
        }
    }

    async fn apply(&self, guard: &mut SessionGuard<'_>, path: &str) -> RemoteResult<()> {
        match self {
            AttributeChange::Permission(p) => guard.backend().set_permission(path, *p).await,
            AttributeChange::Owner(o) => guard.backend().set_owner(path, o).await,
            AttributeChange::Group(g) => guard.backend().set_group(path, g).await,
        }
    }
}

/// Apply to `path`, then independently to every child when `recursive`.
/// A failure on one object does not stop the others; the first is returned.
fn apply_locked<'a, 'g: 'a>(
    guard: &'a mut SessionGuard<'g>,
    path: String,
    kind: PathType,
    change: &'a AttributeChange,
    recursive: bool,
) -> BoxFuture<'a, RemoteResult<()>> {
    async move {
        let (status_key, error_key) = change.keys();
        let mut first_error: Option<RemoteError> = None;

        if kind != PathType::SymbolicLink {
            guard.report(status_key, &path, MessageCategory::Progress);
            if let Err(e) = change.apply(guard, &path).await {
                let e = guard.fail(e.with_path(&path));
                guard.report(
                    error_key,
                    &format!("{} ({})", path, e.user_message()),
                    MessageCategory::Error,
                );
                if e.is_connection() {
                    return Err(e);
                }
                first_error = Some(e);
            }
            guard.cache().invalidate_with_parent(&path);
        }

        if recursive && kind.is_directory() {
            let listing = match guard.listing(&path).await {
                Ok(listing) => listing,
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => {
                    first_error.get_or_insert(e);
                    Listing::unreadable()
                }
            };
            for entry in listing.entries {
                if !guard.is_connected() {
                    break;
                }
                let child = path_utils::join(&path, &entry.name);
                if let Err(e) =
                    apply_locked(guard, child, entry.attributes.kind, change, true).await
                {
                    if e.is_connection() {
                        return Err(e);
                    }
                    first_error.get_or_insert(e);
                }
            }
            guard.cache().invalidate(&path);
        }

        first_error.map_or(Ok(()), Err)
    }
    .boxed()
}
