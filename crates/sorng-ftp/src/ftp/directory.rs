//! Directory operations: list, mkdir, rmdir, rename, metadata, SITE.

use crate::ftp::client::FtpClient;
use sorng_remotefs::parser::mlsd::{format_time, parse_time};
use sorng_remotefs::parser::{EntryParser, MlsdParser};
use sorng_remotefs::{Attributes, Permission, RemoteError, RemoteResult, TransferType};
use chrono::{DateTime, Utc};

impl FtpClient {
    // ─── Listing ─────────────────────────────────────────────────

    /// Raw listing lines for `dir`: MLSD when advertised, otherwise
    /// `LIST -a`. Parsing is left to the session's dialect parser.
    pub async fn list(&mut self, dir: &str) -> RemoteResult<Vec<String>> {
        if self.features().map_or(false, |f| f.mlsd) {
            match self.retrieve_lines(&format!("MLSD {}", dir)).await {
                Err(e) if matches!(e.code, Some(500) | Some(502)) => {
                    log::debug!("MLSD advertised but refused, using LIST: {}", e);
                    if let Some(f) = self.features_mut() {
                        f.mlsd = false;
                    }
                }
                other => return other,
            }
        }

        match self.retrieve_lines(&format!("LIST -a {}", dir)).await {
            // Some servers take "-a" for a file name or reject the option.
            Err(e) if matches!(e.code, Some(500) | Some(501)) => {
                self.retrieve_lines(&format!("LIST {}", dir)).await
            }
            other => other,
        }
    }

    // ─── MKD / RMD / DELE ────────────────────────────────────────

    /// Create a directory on the remote server.
    pub async fn mkdir(&mut self, path: &str) -> RemoteResult<()> {
        self.codec.expect_ok(&format!("MKD {}", path)).await?;
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> RemoteResult<()> {
        self.codec.expect_ok(&format!("RMD {}", path)).await?;
        Ok(())
    }

    /// Delete a remote file.
    pub async fn delete(&mut self, path: &str) -> RemoteResult<()> {
        self.codec.expect_ok(&format!("DELE {}", path)).await?;
        Ok(())
    }

    // ─── RNFR / RNTO ────────────────────────────────────────────

    /// Rename (or move) a file or directory.
    pub async fn rename(&mut self, from: &str, to: &str) -> RemoteResult<()> {
        self.codec.expect(&format!("RNFR {}", from), 3).await?;
        self.codec.expect_ok(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    // ─── SIZE / MDTM / MLST ─────────────────────────────────────

    /// Size of a remote file (RFC 3659 SIZE). Asked in binary mode so the
    /// answer matches the bytes a binary RETR would deliver.
    pub async fn size(&mut self, path: &str) -> RemoteResult<u64> {
        self.set_type(TransferType::Binary).await?;
        let resp = self.codec.expect_ok(&format!("SIZE {}", path)).await?;
        resp.message()
            .parse::<u64>()
            .map_err(|_| RemoteError::protocol(format!("Cannot parse SIZE: {}", resp.text())))
    }

    /// Modification time of a remote file (RFC 3659 MDTM), always UTC.
    pub async fn mdtm(&mut self, path: &str) -> RemoteResult<DateTime<Utc>> {
        let resp = self.codec.expect_ok(&format!("MDTM {}", path)).await?;
        parse_time(resp.message())
            .ok_or_else(|| RemoteError::protocol(format!("Cannot parse MDTM: {}", resp.text())))
    }

    /// Facts about a single file/directory via MLST (RFC 3659).
    pub async fn mlst(&mut self, path: &str) -> RemoteResult<Attributes> {
        if !self.features().map_or(false, |f| f.mlst) {
            return Err(RemoteError::unsupported("Server does not support MLST").with_path(path));
        }

        let resp = self.codec.expect_ok(&format!("MLST {}", path)).await?;
        // The fact line travels on the control channel between 250 lines:
        // 250-Listing /foo
        //  type=file;size=1234;modify=20260101120000; foo.txt
        // 250 End
        resp.lines
            .iter()
            .filter(|l| l.starts_with(' '))
            .find_map(|l| MlsdParser.parse(l))
            .map(|entry| entry.attributes)
            .ok_or_else(|| RemoteError::protocol(format!("MLST: no fact line for {}", path)))
    }

    // ─── MFMT (set modification time) ───────────────────────────

    /// Set the modification time of a remote file (RFC 3659 MFMT).
    pub async fn mfmt(&mut self, path: &str, time: &DateTime<Utc>) -> RemoteResult<()> {
        if !self.features().map_or(false, |f| f.mfmt) {
            return Err(RemoteError::unsupported("Server does not support MFMT").with_path(path));
        }
        self.codec
            .expect_ok(&format!("MFMT {} {}", format_time(time), path))
            .await?;
        Ok(())
    }

    // ─── SITE ────────────────────────────────────────────────────

    /// Change file permissions via SITE CHMOD (common but not standard).
    pub async fn chmod(&mut self, path: &str, permission: Permission) -> RemoteResult<()> {
        self.site(&format!("CHMOD {} {}", permission.to_octal(), path)).await
    }

    pub async fn chown(&mut self, path: &str, owner: &str) -> RemoteResult<()> {
        self.site(&format!("CHOWN {} {}", owner, path)).await
    }

    pub async fn chgrp(&mut self, path: &str, group: &str) -> RemoteResult<()> {
        self.site(&format!("CHGRP {} {}", group, path)).await
    }

    async fn site(&mut self, args: &str) -> RemoteResult<()> {
        let resp = self.codec.execute(&format!("SITE {}", args)).await?;
        match resp.code {
            200..=299 => Ok(()),
            // 500 from SITE usually means the sub-command is unknown.
            500 | 502 | 504 => Err(RemoteError::unsupported(format!(
                "SITE {} not supported: {}",
                args.split_whitespace().next().unwrap_or(""),
                resp.message()
            ))
            .with_code(resp.code)),
            code => Err(RemoteError::from_reply(code, &resp.text())),
        }
    }
}
