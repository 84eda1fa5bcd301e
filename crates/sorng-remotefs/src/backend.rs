//! The protocol contract every backend implements.
//!
//! Optional features are exposed through capability queries; callers branch
//! on those, never on which protocol sits behind the trait object. Methods
//! for optional features default to `Unsupported`.

use crate::callbacks::StatusListener;
use crate::error::{RemoteError, RemoteResult};
use crate::types::{
    Attributes, Credentials, Entry, Host, Permission, Protocol, TransferType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Remote data source handed to the copy loop.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
/// Remote data sink handed to the copy loop.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One item of a raw directory listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry {
    /// A text line still to be run through the dialect parser.
    Line(String),
    /// An entry the backend already decoded (structured protocols).
    Parsed(Entry),
}

#[async_trait]
pub trait Backend: Send {
    fn protocol(&self) -> Protocol;

    /// Whether the transport is believed to be usable.
    fn is_connected(&self) -> bool;

    /// Server system identification, used to pick the listing dialect.
    fn system_type(&self) -> Option<String> {
        None
    }

    // ─── Capability queries ─────────────────────────────────────

    /// Downloads can start at a byte offset.
    fn supports_resume(&self) -> bool {
        false
    }

    /// Uploads can append to an existing remote object.
    fn supports_append(&self) -> bool {
        false
    }

    fn supports_permissions(&self) -> bool {
        false
    }

    fn supports_ownership(&self) -> bool {
        false
    }

    fn supports_timestamp_write(&self) -> bool {
        false
    }

    // ─── Lifecycle ──────────────────────────────────────────────

    /// Open the transport and perform the protocol handshake.
    async fn open(&mut self, host: &Host) -> RemoteResult<()>;

    /// Authenticate. A rejection must be reported as `Authentication`.
    async fn login(&mut self, credentials: &Credentials) -> RemoteResult<()>;

    /// Liveness check.
    async fn noop(&mut self) -> RemoteResult<()>;

    /// Protocol-level goodbye. Best effort.
    async fn quit(&mut self) -> RemoteResult<()>;

    /// Drop the transport immediately without talking to the server.
    fn interrupt(&mut self);

    /// Server-side working directory after login.
    async fn workdir(&mut self) -> RemoteResult<String>;

    // ─── Namespace ──────────────────────────────────────────────

    async fn list(&mut self, dir: &str) -> RemoteResult<Vec<ListEntry>>;

    async fn mkdir(&mut self, path: &str) -> RemoteResult<()>;

    async fn delete_file(&mut self, path: &str) -> RemoteResult<()>;

    async fn remove_dir(&mut self, path: &str) -> RemoteResult<()>;

    async fn rename(&mut self, from: &str, to: &str) -> RemoteResult<()>;

    // ─── Metadata ───────────────────────────────────────────────

    /// Direct single-object metadata query.
    async fn attributes(&mut self, path: &str) -> RemoteResult<Attributes> {
        Err(RemoteError::unsupported("Metadata query not supported").with_path(path))
    }

    async fn size(&mut self, path: &str) -> RemoteResult<u64> {
        Err(RemoteError::unsupported("Size query not supported").with_path(path))
    }

    async fn modification_time(&mut self, path: &str) -> RemoteResult<DateTime<Utc>> {
        Err(RemoteError::unsupported("Timestamp query not supported").with_path(path))
    }

    async fn set_permission(&mut self, path: &str, _permission: Permission) -> RemoteResult<()> {
        Err(RemoteError::unsupported("Changing permissions not supported").with_path(path))
    }

    async fn set_owner(&mut self, path: &str, _owner: &str) -> RemoteResult<()> {
        Err(RemoteError::unsupported("Changing owner not supported").with_path(path))
    }

    async fn set_group(&mut self, path: &str, _group: &str) -> RemoteResult<()> {
        Err(RemoteError::unsupported("Changing group not supported").with_path(path))
    }

    async fn set_modification_time(&mut self, path: &str, _time: DateTime<Utc>) -> RemoteResult<()> {
        Err(RemoteError::unsupported("Changing timestamp not supported").with_path(path))
    }

    // ─── Content ────────────────────────────────────────────────

    /// Stream the object starting at `offset`.
    async fn open_read(
        &mut self,
        path: &str,
        offset: u64,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteReader>;

    /// Stream into the object, appending when `append` is set.
    async fn open_write(
        &mut self,
        path: &str,
        append: bool,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteWriter>;

    /// Confirm server-side that the transfer whose stream was just closed succeeded.
    async fn validate_transfer(&mut self) -> RemoteResult<()> {
        Ok(())
    }

    /// Tell the server to release a transfer that was stopped early.
    async fn abort_transfer(&mut self) -> RemoteResult<()> {
        Ok(())
    }
}

/// Creates backends for the protocols it serves.
pub trait BackendFactory: Send + Sync {
    fn protocols(&self) -> &[Protocol];

    fn create(
        &self,
        host: &Host,
        listener: Arc<dyn StatusListener>,
    ) -> RemoteResult<Box<dyn Backend>>;
}
