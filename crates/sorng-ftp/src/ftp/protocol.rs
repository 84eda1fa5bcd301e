//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code
//! - Echoing the exchange to the status listener as transcript lines

use crate::ftp::types::FtpResponse;
use sorng_remotefs::{MessageCategory, RemoteError, RemoteResult, StatusListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

/// Anything the control or data channel can run over: TCP, TLS, or an
/// in-memory pipe.
pub trait ControlStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ControlStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ControlStream>;

/// The FTP command/response codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: WriteHalf<BoxedStream>,
    listener: Arc<dyn StatusListener>,
    timeout: Duration,
}

impl FtpCodec {
    pub fn new(stream: BoxedStream, listener: Arc<dyn StatusListener>, timeout: Duration) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            listener,
            timeout,
        }
    }

    /// Give the underlying stream back, e.g. to wrap it in TLS.
    ///
    /// Fails if the server sent bytes we have not consumed yet.
    pub fn into_stream(self) -> RemoteResult<(BoxedStream, Arc<dyn StatusListener>, Duration)> {
        if !self.reader.buffer().is_empty() {
            return Err(RemoteError::protocol(
                "Unexpected data on control channel before TLS negotiation",
            ));
        }
        let stream = self.reader.into_inner().unsplit(self.writer);
        Ok((stream, self.listener, self.timeout))
    }

    pub fn listener(&self) -> &Arc<dyn StatusListener> {
        &self.listener
    }

    /// Send a raw FTP command (the CRLF is appended here).
    pub async fn send_command(&mut self, cmd: &str) -> RemoteResult<()> {
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        let shown = mask_secret(cmd);
        log::trace!(">>> {}", shown);
        self.listener.message(&shown, MessageCategory::Transcript);
        Ok(())
    }

    /// Read a single line from the control channel, CRLF stripped.
    async fn read_line_raw(&mut self) -> RemoteResult<String> {
        let mut buf = Vec::new();
        let n = tokio::time::timeout(self.timeout, self.reader.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| RemoteError::timeout("Timed out waiting for server reply"))??;
        if n == 0 {
            return Err(RemoteError::connection("Server closed connection"));
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .to_string();
        self.listener.message(&line, MessageCategory::Transcript);
        Ok(line)
    }

    /// Read a complete FTP response (possibly multi-line).
    ///
    /// Multi-line responses look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> RemoteResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        // "NNN-" means more lines follow until "NNN " is seen.
        let is_multi = lines[0].as_bytes().get(3) == Some(&b'-');
        if is_multi {
            let terminator = format!("{} ", code);
            let bare = code.to_string();
            loop {
                let next = self.read_line_raw().await?;
                let done = next.starts_with(&terminator) || next == bare;
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {}", resp.lines.last().map(String::as_str).unwrap_or(""));
        Ok(resp)
    }

    /// Send a command and return the response.
    pub async fn execute(&mut self, cmd: &str) -> RemoteResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Convenience: send a command, expect a specific response-code class.
    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> RemoteResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        check(resp, expected_first_digit)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> RemoteResult<FtpResponse> {
        self.expect(cmd, 2).await
    }
}

/// Turn a reply outside the expected class into a categorised error.
pub(crate) fn check(resp: FtpResponse, expected_first_digit: u16) -> RemoteResult<FtpResponse> {
    if resp.code / 100 != expected_first_digit {
        return Err(RemoteError::from_reply(resp.code, &resp.text()));
    }
    Ok(resp)
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> RemoteResult<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| RemoteError::protocol(format!("Invalid reply code in: '{}'", line)))
}

fn mask_secret(cmd: &str) -> String {
    if cmd.len() >= 5 && cmd[..5].eq_ignore_ascii_case("PASS ") {
        "PASS ****".to_string()
    } else {
        cmd.to_string()
    }
}
