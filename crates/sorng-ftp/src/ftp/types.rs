//! Shared types for the FTP crate.

use serde::{Deserialize, Serialize};
use sorng_remotefs::{Protocol, TransferType};

// ─── Security ────────────────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP (port 21).
    None,
    /// Explicit FTPS: starts plain then upgrades via AUTH TLS (port 21).
    Explicit,
    /// Implicit FTPS: TLS from the first byte (port 990).
    Implicit,
}

impl Default for FtpSecurityMode {
    fn default() -> Self {
        Self::None
    }
}

impl FtpSecurityMode {
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::FtpTls => Self::Explicit,
            Protocol::FtpsImplicit => Self::Implicit,
            _ => Self::None,
        }
    }

    pub fn is_secure(&self) -> bool {
        *self != Self::None
    }
}

/// RFC 959 TYPE argument.
pub(crate) fn type_command(transfer_type: TransferType) -> &'static str {
    match transfer_type {
        TransferType::Ascii => "TYPE A",
        TransferType::Binary => "TYPE I",
    }
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full response text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the final line without the reply code.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .and_then(|l| l.get(4..))
            .unwrap_or("")
            .trim()
    }

    /// Whether the response code indicates success (1xx–3xx).
    pub fn is_success(&self) -> bool {
        self.code < 400
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

// ─── Server Capabilities ─────────────────────────────────────────────

/// Parsed FEAT response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub mlst: bool,
    pub size: bool,
    pub mdtm: bool,
    pub rest_stream: bool,
    pub utf8: bool,
    pub epsv: bool,
    pub eprt: bool,
    pub auth_tls: bool,
    pub pbsz: bool,
    pub prot: bool,
    pub tvfs: bool,
    pub mfmt: bool,
    pub raw_features: Vec<String>,
}

impl ServerFeatures {
    /// Build from a `211-Features:` multi-line reply.
    pub fn from_response(resp: &FtpResponse) -> Self {
        let raw: Vec<String> = resp
            .lines
            .iter()
            .skip(1) // skip "211-Features:"
            .filter(|l| !l.starts_with("211"))
            .map(|l| l.trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .collect();

        let has = |feat: &str| raw.iter().any(|l| l.starts_with(feat));

        Self {
            mlsd: has("MLSD") || has("MLST"),
            mlst: has("MLST"),
            size: has("SIZE"),
            mdtm: has("MDTM"),
            rest_stream: has("REST STREAM"),
            utf8: has("UTF8"),
            epsv: has("EPSV"),
            eprt: has("EPRT"),
            auth_tls: has("AUTH TLS"),
            pbsz: has("PBSZ"),
            prot: has("PROT"),
            tvfs: has("TVFS"),
            mfmt: has("MFMT"),
            raw_features: raw,
        }
    }
}
