//! `Backend` implementation over `DavClient`.
//!
//! HTTP is stateless: "opening" builds the client, login checks the share
//! root. Listings come back already decoded, so no dialect parser is used.

use crate::webdav::client::DavClient;
use crate::webdav::transfer::{open_download, start_upload, PendingUpload};
use crate::webdav::types::PropfindDepth;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sorng_remotefs::{
    path_utils, Attributes, Backend, BackendFactory, Credentials, Host, ListEntry, Protocol,
    RemoteError, RemoteErrorKind, RemoteReader, RemoteResult, RemoteWriter, StatusListener,
    TransferType,
};
use std::sync::Arc;

pub struct WebDavBackend {
    protocol: Protocol,
    client: Option<DavClient>,
    upload: Option<PendingUpload>,
}

impl WebDavBackend {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            client: None,
            upload: None,
        }
    }

    fn client(&self) -> RemoteResult<&DavClient> {
        self.client
            .as_ref()
            .ok_or_else(|| RemoteError::connection("Not connected"))
    }

    async fn check_share(&self) -> RemoteResult<()> {
        self.client()?
            .propfind(path_utils::ROOT, PropfindDepth::Zero, true)
            .await
            .map(|_| ())
    }

    async fn single(&self, path: &str) -> RemoteResult<Attributes> {
        self.client()?
            .propfind(path, PropfindDepth::Zero, false)
            .await?
            .first()
            .map(|res| res.attributes())
            .ok_or_else(|| RemoteError::not_found(format!("No properties for {}", path)).with_path(path))
    }
}

#[async_trait]
impl Backend for WebDavBackend {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    // ─── Capability queries ─────────────────────────────────────

    fn supports_resume(&self) -> bool {
        true
    }

    // ─── Lifecycle ──────────────────────────────────────────────

    async fn open(&mut self, host: &Host) -> RemoteResult<()> {
        self.interrupt();
        let client = DavClient::new(host)?;
        log::info!("WebDAV client for {} ready", client.base());
        self.client = Some(client);
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> RemoteResult<()> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| RemoteError::connection("Not connected"))?;
        client.set_credentials(credentials);
        match self.check_share().await {
            // A share that refuses its root to these credentials refuses the login.
            Err(e) if matches!(e.code, Some(401) | Some(403)) => Err(RemoteError::new(
                RemoteErrorKind::Authentication,
                e.message,
            )
            .with_code(e.code.unwrap_or(401))),
            other => other,
        }
    }

    async fn noop(&mut self) -> RemoteResult<()> {
        self.check_share().await
    }

    async fn quit(&mut self) -> RemoteResult<()> {
        self.interrupt();
        Ok(())
    }

    fn interrupt(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
        self.client = None;
    }

    async fn workdir(&mut self) -> RemoteResult<String> {
        Ok(path_utils::ROOT.to_string())
    }

    // ─── Namespace ──────────────────────────────────────────────

    async fn list(&mut self, dir: &str) -> RemoteResult<Vec<ListEntry>> {
        let dir = path_utils::normalize(dir);
        let resources = self
            .client()?
            .propfind(&dir, PropfindDepth::One, true)
            .await?;
        Ok(resources
            .iter()
            .filter(|res| res.path != dir)
            .map(|res| ListEntry::Parsed(res.to_entry()))
            .collect())
    }

    async fn mkdir(&mut self, path: &str) -> RemoteResult<()> {
        self.client()?.mkcol(path).await
    }

    async fn delete_file(&mut self, path: &str) -> RemoteResult<()> {
        self.client()?.delete(path, false).await
    }

    async fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
        self.client()?.delete(path, true).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> RemoteResult<()> {
        self.client()?.move_resource(from, to).await
    }

    // ─── Metadata ───────────────────────────────────────────────

    async fn attributes(&mut self, path: &str) -> RemoteResult<Attributes> {
        self.single(path).await
    }

    async fn size(&mut self, path: &str) -> RemoteResult<u64> {
        self.single(path).await?.size.ok_or_else(|| {
            RemoteError::protocol("Server did not report a content length").with_path(path)
        })
    }

    async fn modification_time(&mut self, path: &str) -> RemoteResult<DateTime<Utc>> {
        self.single(path).await?.modified.ok_or_else(|| {
            RemoteError::protocol("Server did not report a modification time").with_path(path)
        })
    }

    // ─── Content ────────────────────────────────────────────────

    async fn open_read(
        &mut self,
        path: &str,
        offset: u64,
        _transfer_type: TransferType,
    ) -> RemoteResult<RemoteReader> {
        open_download(self.client()?, path, offset).await
    }

    async fn open_write(
        &mut self,
        path: &str,
        append: bool,
        _transfer_type: TransferType,
    ) -> RemoteResult<RemoteWriter> {
        if append {
            return Err(RemoteError::unsupported("WebDAV cannot append to a resource").with_path(path));
        }
        if let Some(stale) = self.upload.take() {
            stale.abort();
        }
        let (writer, pending) = start_upload(self.client()?, path)?;
        self.upload = Some(pending);
        Ok(writer)
    }

    async fn validate_transfer(&mut self) -> RemoteResult<()> {
        match self.upload.take() {
            Some(upload) => upload.finish().await,
            None => Ok(()),
        }
    }

    async fn abort_transfer(&mut self) -> RemoteResult<()> {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
        Ok(())
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

/// Creates `WebDavBackend`s for `http` and `https` shares.
#[derive(Debug, Default)]
pub struct WebDavBackendFactory;

impl WebDavBackendFactory {
    pub fn new() -> Self {
        Self
    }
}

const WEBDAV_PROTOCOLS: [Protocol; 2] = [Protocol::WebDav, Protocol::WebDavTls];

impl BackendFactory for WebDavBackendFactory {
    fn protocols(&self) -> &[Protocol] {
        &WEBDAV_PROTOCOLS
    }

    fn create(
        &self,
        host: &Host,
        _listener: Arc<dyn StatusListener>,
    ) -> RemoteResult<Box<dyn Backend>> {
        if !WEBDAV_PROTOCOLS.contains(&host.protocol) {
            return Err(RemoteError::unsupported(format!(
                "{} is not a WebDAV protocol",
                host.protocol.scheme()
            )));
        }
        Ok(Box::new(WebDavBackend::new(host.protocol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorng_remotefs::LogListener;

    #[test]
    fn capabilities() {
        let backend = WebDavBackend::new(Protocol::WebDavTls);
        assert!(backend.supports_resume());
        assert!(!backend.supports_append());
        assert!(!backend.supports_permissions());
        assert!(!backend.supports_ownership());
        assert!(!backend.supports_timestamp_write());
        assert!(!backend.is_connected());
    }

    #[test]
    fn factory_rejects_ftp() {
        let factory = WebDavBackendFactory::new();
        let ftp = Host::new(Protocol::Ftp, "ftp.example.com");
        let err = factory.create(&ftp, Arc::new(LogListener)).err().unwrap();
        assert_eq!(err.kind, RemoteErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn open_builds_client_without_network() {
        let mut backend = WebDavBackend::new(Protocol::WebDav);
        backend
            .open(&Host::new(Protocol::WebDav, "dav.invalid"))
            .await
            .unwrap();
        assert!(backend.is_connected());
        assert_eq!(backend.workdir().await.unwrap(), "/");

        backend.quit().await.unwrap();
        assert!(!backend.is_connected());
    }

    #[test]
    fn append_is_refused() {
        let mut backend = WebDavBackend::new(Protocol::WebDav);
        tokio_test::block_on(backend.open(&Host::new(Protocol::WebDav, "dav.invalid"))).unwrap();
        let err = tokio_test::block_on(backend.open_write("/a", true, TransferType::Binary))
            .err()
            .unwrap();
        assert_eq!(err.kind, RemoteErrorKind::Unsupported);
    }
}
