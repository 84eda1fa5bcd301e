//! File content: RETR/STOR/APPE streams, completion and ABOR.
//!
//! Streams are handed out raw; the caller copies, closes the stream and
//! then calls `finish_transfer` (or `abort_transfer` when stopping early).

use crate::ftp::client::FtpClient;
use crate::ftp::protocol::BoxedStream;
use sorng_remotefs::{RemoteError, RemoteResult, TransferType};

impl FtpClient {
    // ─── DOWNLOAD (REST + RETR) ──────────────────────────────────

    /// Data stream for `path`, starting at `offset`.
    pub async fn retrieve(
        &mut self,
        path: &str,
        offset: u64,
        tt: TransferType,
    ) -> RemoteResult<BoxedStream> {
        self.open_data(&format!("RETR {}", path), tt, offset)
            .await
            .map_err(|e| e.with_path(path))
    }

    // ─── UPLOAD (STOR / APPE) ────────────────────────────────────

    /// Data stream into `path`. `append` continues an existing file.
    pub async fn store(
        &mut self,
        path: &str,
        append: bool,
        tt: TransferType,
    ) -> RemoteResult<BoxedStream> {
        let verb = if append { "APPE" } else { "STOR" };
        self.open_data(&format!("{} {}", verb, path), tt, 0)
            .await
            .map_err(|e| e.with_path(path))
    }

    // ─── Completion ──────────────────────────────────────────────

    /// Read the 226/250 reply for a transfer whose stream was closed.
    pub async fn finish_transfer(&mut self) -> RemoteResult<()> {
        self.read_completion().await.map(|_| ())
    }

    /// ABOR a transfer whose completion reply is still unread.
    ///
    /// Two replies follow: the transfer's own (426 when it was cut, 226 when
    /// it had already finished) and then the ABOR's 225/226. A lone 225
    /// means the server had no transfer left to close.
    pub async fn abort_transfer(&mut self) -> RemoteResult<()> {
        let first = self.codec.execute("ABOR").await?;
        if first.code == 225 {
            return Ok(());
        }
        log::debug!("Transfer ended with {} before ABOR reply", first.code);
        let second = self.codec.read_response().await?;
        if second.is_completion() {
            Ok(())
        } else {
            Err(RemoteError::from_reply(second.code, &second.text()))
        }
    }
}
