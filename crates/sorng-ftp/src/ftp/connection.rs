//! TCP + TLS transport: establishes the FTP control connection.
//!
//! Handles plain-TCP connect, implicit-FTPS wrapping, and the
//! connect timeout from the host configuration.

use crate::ftp::protocol::BoxedStream;
use crate::ftp::tls::SecureTransport;
use crate::ftp::types::FtpSecurityMode;
use sorng_remotefs::{Host, RemoteError, RemoteResult};
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A freshly opened control stream plus the local address it was opened
/// from (needed to advertise PORT/EPRT endpoints).
pub struct ControlConnection {
    pub stream: BoxedStream,
    pub local_ip: Option<IpAddr>,
}

/// Open a TCP connection within `dur`.
pub async fn tcp_connect(host: &str, port: u16, dur: Duration) -> RemoteResult<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let tcp = timeout(dur, TcpStream::connect(&addr))
        .await
        .map_err(|_| RemoteError::timeout(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| RemoteError::connection(format!("TCP connect to {}: {}", addr, e)))?;
    tcp.set_nodelay(true).ok();
    Ok(tcp)
}

/// Establish the control connection. For implicit FTPS the stream is
/// already secured; explicit FTPS upgrades later via AUTH TLS.
pub async fn open_control(
    host: &Host,
    security: FtpSecurityMode,
    transport: Option<&dyn SecureTransport>,
) -> RemoteResult<ControlConnection> {
    if host.hostname.is_empty() {
        return Err(RemoteError::configuration("Host must not be empty"));
    }
    if host.proxy.is_some() {
        log::warn!("Proxy settings are not applied to FTP connections to {}", host.hostname);
    }

    let dur = Duration::from_secs(host.connect_timeout_sec.max(1));
    let tcp = tcp_connect(&host.hostname, host.port, dur).await?;
    let local_ip = tcp.local_addr().ok().map(|a| a.ip());

    let stream: BoxedStream = match security {
        FtpSecurityMode::Implicit => {
            let transport = transport.ok_or_else(|| {
                RemoteError::configuration("Implicit FTPS requires a TLS transport")
            })?;
            timeout(dur, transport.wrap_stream(&host.hostname, Box::new(tcp)))
                .await
                .map_err(|_| RemoteError::timeout("Implicit TLS handshake timed out"))??
        }
        _ => Box::new(tcp),
    };

    Ok(ControlConnection { stream, local_ip })
}
