//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` (banner → optional AUTH TLS → PBSZ/PROT) →
//! `login()` (USER/PASS → FEAT → OPTS UTF8 → SYST) → commands.
//!
//! The client exposes low-level command helpers used by `directory.rs`
//! and `file_ops.rs` for higher-level operations.

use crate::ftp::connection::{self, ControlConnection};
use crate::ftp::protocol::{self, BoxedStream, FtpCodec};
use crate::ftp::tls::SecureTransport;
use crate::ftp::transfer;
use crate::ftp::types::*;
use sorng_remotefs::{
    Credentials, DataChannelMode, Host, RemoteError, RemoteResult, StatusListener, TransferType,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// A connected FTP client session.
pub struct FtpClient {
    pub(crate) codec: FtpCodec,
    hostname: String,
    security: FtpSecurityMode,
    transport: Option<Arc<dyn SecureTransport>>,
    /// PROT P accepted: data channels must be secured too.
    protected: bool,
    banner: String,
    /// `None` until login, or when the server does not understand FEAT.
    features: Option<ServerFeatures>,
    system_type: Option<String>,
    data_mode: DataChannelMode,
    data_timeout: Duration,
    local_ip: Option<IpAddr>,
    current_type: Option<TransferType>,
    utf8: bool,
}

impl FtpClient {
    /// Open the control connection and run the pre-login handshake.
    pub async fn connect(
        host: &Host,
        transport: Option<Arc<dyn SecureTransport>>,
        listener: Arc<dyn StatusListener>,
    ) -> RemoteResult<Self> {
        let security = FtpSecurityMode::for_protocol(host.protocol);
        let conn = connection::open_control(host, security, transport.as_deref()).await?;
        Self::establish(conn, host, security, transport, listener).await
    }

    /// Handshake over an already opened control stream.
    pub async fn establish(
        conn: ControlConnection,
        host: &Host,
        security: FtpSecurityMode,
        transport: Option<Arc<dyn SecureTransport>>,
        listener: Arc<dyn StatusListener>,
    ) -> RemoteResult<Self> {
        let reply_timeout = Duration::from_secs(host.data_timeout_sec.max(1));
        let mut codec = FtpCodec::new(conn.stream, listener, reply_timeout);

        // 120 = "service ready in nnn minutes", the real greeting follows.
        let mut banner = codec.read_response().await?;
        while banner.code == 120 {
            banner = codec.read_response().await?;
        }
        if banner.code != 220 {
            return Err(RemoteError::from_reply(banner.code, &banner.text()));
        }

        // ── Explicit FTPS: AUTH TLS ──────────────────────────────
        if security == FtpSecurityMode::Explicit {
            let resp = codec.execute("AUTH TLS").await?;
            if resp.code != 234 {
                return Err(RemoteError::connection(format!(
                    "AUTH TLS rejected: {}",
                    resp.text()
                ))
                .with_code(resp.code));
            }
            let tls = transport.as_deref().ok_or_else(|| {
                RemoteError::configuration("Explicit FTPS requires a TLS transport")
            })?;
            let (stream, listener, reply_timeout) = codec.into_stream()?;
            let secured = tls.wrap_stream(&host.hostname, stream).await?;
            codec = FtpCodec::new(secured, listener, reply_timeout);
        }

        // ── Protection level ─────────────────────────────────────
        let protected = if security.is_secure() {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
            true
        } else {
            false
        };

        Ok(Self {
            codec,
            hostname: host.hostname.clone(),
            security,
            transport,
            protected,
            banner: banner.text(),
            features: None,
            system_type: None,
            data_mode: host.data_channel_mode,
            data_timeout: Duration::from_secs(host.data_timeout_sec.max(1)),
            local_ip: conn.local_ip,
            current_type: None,
            utf8: host
                .encoding
                .as_deref()
                .map_or(true, |e| e.eq_ignore_ascii_case("utf-8") || e.eq_ignore_ascii_case("utf8")),
        })
    }

    // ─── Authentication ──────────────────────────────────────────

    /// USER/PASS, then query the server features. A 530 surfaces as
    /// `Authentication` so the session can prompt and call again.
    pub async fn login(&mut self, credentials: &Credentials) -> RemoteResult<()> {
        let user_resp = self
            .codec
            .execute(&format!("USER {}", credentials.username))
            .await?;
        match user_resp.code {
            230 => {}
            331 => {
                let pass_resp = self
                    .codec
                    .execute(&format!("PASS {}", credentials.password()))
                    .await?;
                match pass_resp.code {
                    230 | 202 => {}
                    332 => {
                        return Err(RemoteError::unsupported(
                            "Server requires an ACCT login, which is not supported",
                        )
                        .with_code(332))
                    }
                    code => return Err(RemoteError::from_reply(code, &pass_resp.text())),
                }
            }
            code => return Err(RemoteError::from_reply(code, &user_resp.text())),
        }

        // ── FEAT ─────────────────────────────────────────────────
        self.features = self.query_features().await?;

        // ── OPTS UTF8 ON ─────────────────────────────────────────
        if self.utf8 && self.features.as_ref().map_or(false, |f| f.utf8) {
            let _ = self.codec.execute("OPTS UTF8 ON").await?;
        }

        // ── SYST ─────────────────────────────────────────────────
        let syst = self.codec.execute("SYST").await?;
        self.system_type = if syst.is_completion() {
            Some(syst.message().to_string())
        } else {
            None
        };

        self.current_type = None;
        log::debug!(
            "Logged in to {} as {} (system {:?})",
            self.hostname,
            credentials.username,
            self.system_type
        );
        Ok(())
    }

    async fn query_features(&mut self) -> RemoteResult<Option<ServerFeatures>> {
        let resp = self.codec.execute("FEAT").await?;
        if !resp.is_completion() {
            log::debug!("FEAT not supported by {}: {}", self.hostname, resp.code);
            return Ok(None);
        }
        Ok(Some(ServerFeatures::from_response(&resp)))
    }

    // ─── Keepalive / session ─────────────────────────────────────

    /// Send a NOOP to keep the control connection alive.
    pub async fn noop(&mut self) -> RemoteResult<()> {
        self.codec.expect_ok("NOOP").await?;
        Ok(())
    }

    /// Polite goodbye. The caller drops the client afterwards either way.
    pub async fn quit(&mut self) -> RemoteResult<()> {
        self.codec.expect_ok("QUIT").await?;
        Ok(())
    }

    /// Parse the current working directory from a PWD reply.
    pub async fn pwd(&mut self) -> RemoteResult<String> {
        let resp = self.codec.expect_ok("PWD").await?;
        parse_pwd(&resp.text())
    }

    // ─── TYPE command ────────────────────────────────────────────

    /// Switch transfer type, skipping the round trip when already set.
    pub async fn set_type(&mut self, tt: TransferType) -> RemoteResult<()> {
        if self.current_type == Some(tt) {
            return Ok(());
        }
        self.codec.expect_ok(type_command(tt)).await?;
        self.current_type = Some(tt);
        Ok(())
    }

    // ─── Data channel helper ─────────────────────────────────────

    /// Negotiate a data channel, issue `cmd` and return the connected
    /// data stream once the server answered with a 1xx mark.
    pub(crate) async fn open_data(
        &mut self,
        cmd: &str,
        tt: TransferType,
        rest: u64,
    ) -> RemoteResult<BoxedStream> {
        self.set_type(tt).await?;
        let pending =
            transfer::prepare(&mut self.codec, self.data_mode, &self.hostname, self.local_ip).await?;
        if rest > 0 {
            self.codec.expect(&format!("REST {}", rest), 3).await?;
        }

        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() {
            return Err(RemoteError::from_reply(resp.code, &resp.text()));
        }

        let tls = match (self.protected, self.transport.as_deref()) {
            (true, Some(t)) => Some((t, self.hostname.as_str())),
            _ => None,
        };
        pending
            .establish(self.data_timeout, tls)
            .await
            // The control channel still owes a reply for `cmd`; only a
            // fresh connection is in a known state again.
            .map_err(|e| RemoteError::connection(format!("Data channel failed: {}", e.message)))
    }

    /// Read the completion reply that follows a closed data stream.
    pub(crate) async fn read_completion(&mut self) -> RemoteResult<FtpResponse> {
        let resp = self.codec.read_response().await?;
        protocol::check(resp, 2)
    }

    /// Open a data channel, send `cmd`, collect the body as text lines.
    pub async fn retrieve_lines(&mut self, cmd: &str) -> RemoteResult<Vec<String>> {
        let mut ds = self.open_data(cmd, TransferType::Ascii, 0).await?;
        let mut buf = Vec::new();
        let read = ds.read_to_end(&mut buf).await;
        drop(ds);
        read.map_err(|e| RemoteError::connection(format!("Listing data: {}", e)))?;
        self.read_completion().await?;

        Ok(String::from_utf8_lossy(&buf)
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn security(&self) -> FtpSecurityMode {
        self.security
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn features(&self) -> Option<&ServerFeatures> {
        self.features.as_ref()
    }

    pub(crate) fn features_mut(&mut self) -> Option<&mut ServerFeatures> {
        self.features.as_mut()
    }

    pub fn system_type(&self) -> Option<&str> {
        self.system_type.as_deref()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Parse `257 "/some/path"` into the path string. Doubled quotes inside
/// the path stand for one quote (RFC 959 Appendix II).
pub fn parse_pwd(text: &str) -> RemoteResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| RemoteError::protocol(format!("Cannot parse PWD: {}", text)))?;
    let mut out = String::new();
    let mut chars = text[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
                continue;
            }
            return Ok(out);
        }
        out.push(c);
    }
    Err(RemoteError::protocol(format!("Cannot parse PWD: {}", text)))
}
