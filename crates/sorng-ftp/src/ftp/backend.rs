//! `Backend` implementation over `FtpClient`.

use crate::ftp::client::FtpClient;
use crate::ftp::tls::{RustlsTransport, SecureTransport};
use crate::ftp::types::FtpSecurityMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sorng_remotefs::{
    Attributes, Backend, BackendFactory, Credentials, Host, ListEntry, Permission, Protocol,
    RemoteError, RemoteReader, RemoteResult, RemoteWriter, StatusListener, TransferType,
};
use std::sync::Arc;

pub struct FtpBackend {
    protocol: Protocol,
    transport: Option<Arc<dyn SecureTransport>>,
    listener: Arc<dyn StatusListener>,
    client: Option<FtpClient>,
    /// A data transfer was started and its completion reply not yet read.
    pending_transfer: bool,
}

impl FtpBackend {
    pub fn new(
        protocol: Protocol,
        transport: Option<Arc<dyn SecureTransport>>,
        listener: Arc<dyn StatusListener>,
    ) -> Self {
        Self {
            protocol,
            transport,
            listener,
            client: None,
            pending_transfer: false,
        }
    }

    fn client(&mut self) -> RemoteResult<&mut FtpClient> {
        self.client
            .as_mut()
            .ok_or_else(|| RemoteError::connection("Not connected"))
    }

    /// Drop the client when `result` says the control channel is gone.
    fn settle<T>(&mut self, result: RemoteResult<T>) -> RemoteResult<T> {
        if let Err(ref e) = result {
            if e.is_connection() {
                self.interrupt();
            }
        }
        result
    }
}

#[async_trait]
impl Backend for FtpBackend {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn system_type(&self) -> Option<String> {
        self.client
            .as_ref()
            .and_then(|c| c.system_type())
            .map(str::to_string)
    }

    // ─── Capability queries ─────────────────────────────────────

    /// REST STREAM advertised, or assumed when FEAT told us nothing.
    fn supports_resume(&self) -> bool {
        self.client
            .as_ref()
            .and_then(|c| c.features())
            .map_or(true, |f| f.rest_stream)
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn supports_permissions(&self) -> bool {
        true
    }

    fn supports_ownership(&self) -> bool {
        true
    }

    fn supports_timestamp_write(&self) -> bool {
        self.client
            .as_ref()
            .and_then(|c| c.features())
            .map_or(false, |f| f.mfmt)
    }

    // ─── Lifecycle ──────────────────────────────────────────────

    async fn open(&mut self, host: &Host) -> RemoteResult<()> {
        self.interrupt();
        let client =
            FtpClient::connect(host, self.transport.clone(), self.listener.clone()).await?;
        log::info!(
            "FTP control connection to {}:{} open ({:?})",
            host.hostname,
            host.port,
            client.security()
        );
        self.client = Some(client);
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> RemoteResult<()> {
        let result = self.client()?.login(credentials).await;
        self.settle(result)
    }

    async fn noop(&mut self) -> RemoteResult<()> {
        let result = self.client()?.noop().await;
        self.settle(result)
    }

    async fn quit(&mut self) -> RemoteResult<()> {
        let result = match self.client.as_mut() {
            Some(client) => client.quit().await,
            None => Ok(()),
        };
        self.interrupt();
        result
    }

    fn interrupt(&mut self) {
        self.client = None;
        self.pending_transfer = false;
    }

    async fn workdir(&mut self) -> RemoteResult<String> {
        let result = self.client()?.pwd().await;
        self.settle(result)
    }

    // ─── Namespace ──────────────────────────────────────────────

    async fn list(&mut self, dir: &str) -> RemoteResult<Vec<ListEntry>> {
        let result = self.client()?.list(dir).await;
        self.settle(result)
            .map(|lines| lines.into_iter().map(ListEntry::Line).collect())
    }

    async fn mkdir(&mut self, path: &str) -> RemoteResult<()> {
        let result = self.client()?.mkdir(path).await;
        self.settle(result)
    }

    async fn delete_file(&mut self, path: &str) -> RemoteResult<()> {
        let result = self.client()?.delete(path).await;
        self.settle(result)
    }

    async fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
        let result = self.client()?.rmdir(path).await;
        self.settle(result)
    }

    async fn rename(&mut self, from: &str, to: &str) -> RemoteResult<()> {
        let result = self.client()?.rename(from, to).await;
        self.settle(result)
    }

    // ─── Metadata ───────────────────────────────────────────────

    async fn attributes(&mut self, path: &str) -> RemoteResult<Attributes> {
        let result = self.client()?.mlst(path).await;
        self.settle(result)
    }

    async fn size(&mut self, path: &str) -> RemoteResult<u64> {
        let result = self.client()?.size(path).await;
        self.settle(result.map_err(|e| e.with_path(path)))
    }

    async fn modification_time(&mut self, path: &str) -> RemoteResult<DateTime<Utc>> {
        let result = self.client()?.mdtm(path).await;
        self.settle(result.map_err(|e| e.with_path(path)))
    }

    async fn set_permission(&mut self, path: &str, permission: Permission) -> RemoteResult<()> {
        let result = self.client()?.chmod(path, permission).await;
        self.settle(result.map_err(|e| e.with_path(path)))
    }

    async fn set_owner(&mut self, path: &str, owner: &str) -> RemoteResult<()> {
        let result = self.client()?.chown(path, owner).await;
        self.settle(result.map_err(|e| e.with_path(path)))
    }

    async fn set_group(&mut self, path: &str, group: &str) -> RemoteResult<()> {
        let result = self.client()?.chgrp(path, group).await;
        self.settle(result.map_err(|e| e.with_path(path)))
    }

    async fn set_modification_time(&mut self, path: &str, time: DateTime<Utc>) -> RemoteResult<()> {
        let result = self.client()?.mfmt(path, &time).await;
        self.settle(result)
    }

    // ─── Content ────────────────────────────────────────────────

    async fn open_read(
        &mut self,
        path: &str,
        offset: u64,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteReader> {
        let result = self.client()?.retrieve(path, offset, transfer_type).await;
        let stream = self.settle(result)?;
        self.pending_transfer = true;
        Ok(Box::new(stream))
    }

    async fn open_write(
        &mut self,
        path: &str,
        append: bool,
        transfer_type: TransferType,
    ) -> RemoteResult<RemoteWriter> {
        let result = self.client()?.store(path, append, transfer_type).await;
        let stream = self.settle(result)?;
        self.pending_transfer = true;
        Ok(Box::new(stream))
    }

    async fn validate_transfer(&mut self) -> RemoteResult<()> {
        if !self.pending_transfer {
            return Ok(());
        }
        self.pending_transfer = false;
        let result = self.client()?.finish_transfer().await;
        self.settle(result)
    }

    async fn abort_transfer(&mut self) -> RemoteResult<()> {
        if !self.pending_transfer {
            return Ok(());
        }
        self.pending_transfer = false;
        let result = self.client()?.abort_transfer().await;
        self.settle(result)
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

/// Creates `FtpBackend`s for plain FTP, explicit FTPS and implicit FTPS.
#[derive(Default)]
pub struct FtpBackendFactory {
    /// Overrides the rustls transport built from the host settings.
    transport: Option<Arc<dyn SecureTransport>>,
}

impl FtpBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn SecureTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

const FTP_PROTOCOLS: [Protocol; 3] = [Protocol::Ftp, Protocol::FtpTls, Protocol::FtpsImplicit];

impl BackendFactory for FtpBackendFactory {
    fn protocols(&self) -> &[Protocol] {
        &FTP_PROTOCOLS
    }

    fn create(
        &self,
        host: &Host,
        listener: Arc<dyn StatusListener>,
    ) -> RemoteResult<Box<dyn Backend>> {
        if !FTP_PROTOCOLS.contains(&host.protocol) {
            return Err(RemoteError::unsupported(format!(
                "{} is not an FTP protocol",
                host.protocol.scheme()
            )));
        }
        let transport = match (&self.transport, FtpSecurityMode::for_protocol(host.protocol)) {
            (Some(t), _) => Some(t.clone()),
            (None, FtpSecurityMode::None) => None,
            (None, _) => {
                let rustls: Arc<dyn SecureTransport> =
                    Arc::new(RustlsTransport::new(host.accept_invalid_certs)?);
                Some(rustls)
            }
        };
        Ok(Box::new(FtpBackend::new(host.protocol, transport, listener)))
    }
}

impl std::fmt::Debug for FtpBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpBackendFactory")
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}
