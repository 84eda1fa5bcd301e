//! Data-channel management for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//! - **PORT**: client opens a port, tells server
//! - **EPRT**: extended active (IPv6-ready)
//!
//! Opening is two-phase: `prepare` negotiates the endpoint before the
//! transfer command is sent, `establish` completes the connection after
//! the server has answered it. Active-mode servers only dial back once
//! they have seen RETR/STOR/LIST.
//!
//! The data socket is TLS-wrapped when the control channel is protected
//! (PROT P).

use crate::ftp::protocol::{BoxedStream, FtpCodec};
use crate::ftp::tls::SecureTransport;
use lazy_static::lazy_static;
use regex::Regex;
use sorng_remotefs::{DataChannelMode, RemoteError, RemoteResult};
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").unwrap();
    static ref EPSV_RE: Regex = Regex::new(r"\((.)(.)(.)(\d+)(.)\)").unwrap();
}

/// Endpoint negotiated with the server but not connected yet.
pub enum PendingData {
    Passive(SocketAddrOrHost),
    Active(TcpListener),
}

/// Passive target: PASV yields an address, EPSV only a port on the
/// control host.
pub enum SocketAddrOrHost {
    Addr(SocketAddr),
    Host(String, u16),
}

/// Negotiate a data endpoint according to `mode`.
pub async fn prepare(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    host: &str,
    local_ip: Option<IpAddr>,
) -> RemoteResult<PendingData> {
    match mode {
        DataChannelMode::Passive => pasv(codec, host).await,
        DataChannelMode::ExtendedPassive => match epsv(codec, host).await {
            Err(e) if e.code.map_or(false, |c| c >= 500) => {
                log::debug!("EPSV refused ({}), falling back to PASV", e);
                pasv(codec, host).await
            }
            other => other,
        },
        DataChannelMode::Active => port(codec, local_ip).await,
        DataChannelMode::ExtendedActive => eprt(codec, local_ip).await,
    }
}

impl PendingData {
    /// Connect (passive) or accept (active), then secure the stream when
    /// `tls` is given.
    pub async fn establish(
        self,
        data_timeout: Duration,
        tls: Option<(&dyn SecureTransport, &str)>,
    ) -> RemoteResult<BoxedStream> {
        let tcp = match self {
            PendingData::Passive(target) => {
                let connect = async {
                    match target {
                        SocketAddrOrHost::Addr(addr) => TcpStream::connect(addr).await,
                        SocketAddrOrHost::Host(h, p) => TcpStream::connect((h.as_str(), p)).await,
                    }
                };
                timeout(data_timeout, connect)
                    .await
                    .map_err(|_| RemoteError::timeout("Data connection timed out"))?
                    .map_err(|e| RemoteError::transfer(format!("Data connection: {}", e)))?
            }
            PendingData::Active(listener) => {
                let (tcp, peer) = timeout(data_timeout, listener.accept())
                    .await
                    .map_err(|_| RemoteError::timeout("Server did not open the data connection"))?
                    .map_err(|e| RemoteError::transfer(format!("Data accept: {}", e)))?;
                log::trace!("Data connection from {}", peer);
                tcp
            }
        };
        tcp.set_nodelay(true).ok();

        match tls {
            Some((transport, host)) => {
                timeout(data_timeout, transport.wrap_stream(host, Box::new(tcp)))
                    .await
                    .map_err(|_| RemoteError::timeout("Data channel TLS handshake timed out"))?
            }
            None => Ok(Box::new(tcp)),
        }
    }
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Response format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
async fn pasv(codec: &mut FtpCodec, host: &str) -> RemoteResult<PendingData> {
    let resp = codec.expect_ok("PASV").await?;
    let addr = parse_pasv_response(&resp.text())?;
    // Servers behind NAT sometimes answer with an unusable address.
    if addr.ip().is_unspecified() {
        return Ok(PendingData::Passive(SocketAddrOrHost::Host(
            host.to_string(),
            addr.port(),
        )));
    }
    Ok(PendingData::Passive(SocketAddrOrHost::Addr(addr)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 response.
pub fn parse_pasv_response(text: &str) -> RemoteResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| RemoteError::protocol(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| RemoteError::protocol("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok(SocketAddr::new(ip, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Response format: `229 Entering Extended Passive Mode (|||port|)`
async fn epsv(codec: &mut FtpCodec, host: &str) -> RemoteResult<PendingData> {
    let resp = codec.expect_ok("EPSV").await?;
    let port = parse_epsv_response(&resp.text())?;
    Ok(PendingData::Passive(SocketAddrOrHost::Host(host.to_string(), port)))
}

/// The delimiter is any character the server picks, repeated.
pub fn parse_epsv_response(text: &str) -> RemoteResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .filter(|c| c[1] == c[2] && c[2] == c[3] && c[3] == c[5])
        .ok_or_else(|| RemoteError::protocol(format!("Cannot parse EPSV: {}", text)))?;
    caps[4]
        .parse::<u16>()
        .map_err(|_| RemoteError::protocol("EPSV port out of range"))
}

// ─── PORT ────────────────────────────────────────────────────────────

async fn bind_local(local_ip: Option<IpAddr>) -> RemoteResult<(TcpListener, SocketAddr)> {
    let ip = local_ip.ok_or_else(|| {
        RemoteError::configuration("Active mode needs the local address of the control connection")
    })?;
    let listener = TcpListener::bind(SocketAddr::new(ip, 0))
        .await
        .map_err(|e| RemoteError::transfer(format!("Data bind: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| RemoteError::transfer(format!("Data local_addr: {}", e)))?;
    Ok((listener, local))
}

/// Bind a local TCP listener and tell the server via `PORT`.
async fn port(codec: &mut FtpCodec, local_ip: Option<IpAddr>) -> RemoteResult<PendingData> {
    let (listener, local) = bind_local(local_ip).await?;
    let octets = match local.ip() {
        IpAddr::V4(v4) => v4.octets(),
        _ => return Err(RemoteError::configuration("PORT requires IPv4, use EPRT")),
    };
    let cmd = format!(
        "PORT {},{},{},{},{},{}",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        local.port() / 256,
        local.port() % 256
    );
    codec.expect_ok(&cmd).await?;
    Ok(PendingData::Active(listener))
}

// ─── EPRT ────────────────────────────────────────────────────────────

/// Command format: `EPRT |1|ip|port|` (1 = IPv4, 2 = IPv6)
async fn eprt(codec: &mut FtpCodec, local_ip: Option<IpAddr>) -> RemoteResult<PendingData> {
    let (listener, local) = bind_local(local_ip).await?;
    let af = match local.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    codec
        .expect_ok(&format!("EPRT |{}|{}|{}|", af, local.ip(), local.port()))
        .await?;
    Ok(PendingData::Active(listener))
}
