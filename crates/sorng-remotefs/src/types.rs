//! Shared types for the remote filesystem core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ─── Connection / Host ───────────────────────────────────────────────

/// Protocol spoken by a backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    /// Plain-text FTP.
    Ftp,
    /// Explicit FTPS: starts plain then upgrades via AUTH TLS.
    FtpTls,
    /// Implicit FTPS: TLS from the first byte.
    FtpsImplicit,
    /// WebDAV over plain HTTP.
    WebDav,
    /// WebDAV over HTTPS.
    WebDavTls,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::FtpTls => 21,
            Protocol::FtpsImplicit => 990,
            Protocol::WebDav => 80,
            Protocol::WebDavTls => 443,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(
            self,
            Protocol::FtpTls | Protocol::FtpsImplicit | Protocol::WebDavTls
        )
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::FtpTls => "ftpes",
            Protocol::FtpsImplicit => "ftps",
            Protocol::WebDav => "http",
            Protocol::WebDavTls => "https",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Ftp
    }
}

/// Username and secret used to log in.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".into(),
            password: Some("anonymous@".into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.eq_ignore_ascii_case("anonymous") || self.username.eq_ignore_ascii_case("ftp")
    }

    /// Forget the secret. The username stays for the next prompt.
    pub fn clear_password(&mut self) {
        self.password = None;
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// HTTP / SOCKS proxy used to reach the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Data-channel mode for protocols with a separate data connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// A bookmark-like description of one remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub credentials: Credentials,
    /// Directory to mount on connect. Falls back to the server's working directory.
    #[serde(default)]
    pub default_path: Option<String>,
    /// Offset of the server clock from UTC in minutes, used for listing timestamps.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    /// NOOP interval while idle (0 = disabled).
    #[serde(default)]
    pub keepalive_interval_sec: u64,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Accept self-signed / untrusted certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_connect_timeout() -> u64 {
    30
}
fn default_data_timeout() -> u64 {
    30
}

impl Host {
    pub fn new(protocol: Protocol, hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: protocol.default_port(),
            protocol,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Registry key: `scheme://user@host:port`.
    pub fn id(&self) -> String {
        format!(
            "{}://{}@{}:{}",
            self.protocol.scheme(),
            self.credentials.username,
            self.hostname,
            self.port
        )
    }

    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.hostname.clone())
    }
}

impl Default for Host {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: Protocol::Ftp.default_port(),
            protocol: Protocol::Ftp,
            credentials: Credentials::anonymous(),
            default_path: None,
            utc_offset_minutes: 0,
            encoding: None,
            proxy: None,
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            keepalive_interval_sec: 0,
            data_channel_mode: DataChannelMode::Passive,
            accept_invalid_certs: false,
            label: None,
        }
    }
}

// ─── Attributes ──────────────────────────────────────────────────────

/// Type of a remote filesystem object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PathType {
    File,
    Directory,
    SymbolicLink,
    Unknown,
}

impl PathType {
    pub fn is_directory(&self) -> bool {
        matches!(self, PathType::Directory)
    }
}

impl Default for PathType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Unix permission bits including setuid/setgid/sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission(u16);

impl Permission {
    pub const OWNER_WRITE: u16 = 0o200;
    pub const OWNER_EXECUTE: u16 = 0o100;

    pub fn new(mode: u16) -> Self {
        Self(mode & 0o7777)
    }

    pub fn mode(&self) -> u16 {
        self.0
    }

    /// Parse `"644"` / `"0755"` / `"4755"`.
    pub fn from_octal(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > 5 {
            return None;
        }
        u16::from_str_radix(s, 8).ok().filter(|m| *m <= 0o7777).map(Self)
    }

    /// Octal string without a leading zero for the common case (`"644"`).
    pub fn to_octal(&self) -> String {
        if self.0 > 0o777 {
            format!("{:04o}", self.0)
        } else {
            format!("{:03o}", self.0)
        }
    }

    /// Parse the nine permission characters of an `ls -l` line (`rwxr-sr-t`).
    pub fn from_symbolic(s: &str) -> Option<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 9 {
            return None;
        }
        let mut mode = 0u16;
        for (i, c) in chars[..9].iter().enumerate() {
            let triad = 2 - (i / 3) as u16;
            let shift = triad * 3;
            let special = match triad {
                2 => 0o4000,
                1 => 0o2000,
                _ => 0o1000,
            };
            match (i % 3, c) {
                (0, 'r') => mode |= 4 << shift,
                (1, 'w') => mode |= 2 << shift,
                (2, 'x') => mode |= 1 << shift,
                (2, 's') | (2, 't') => mode |= (1 << shift) | special,
                (2, 'S') | (2, 'T') => mode |= special,
                (_, '-') => {}
                _ => return None,
            }
        }
        Some(Self(mode))
    }

    pub fn to_symbolic(&self) -> String {
        let mut out = String::with_capacity(9);
        for triad in (0..3).rev() {
            let bits = (self.0 >> (triad * 3)) & 0o7;
            let special = match triad {
                2 => self.0 & 0o4000 != 0,
                1 => self.0 & 0o2000 != 0,
                _ => self.0 & 0o1000 != 0,
            };
            out.push(if bits & 4 != 0 { 'r' } else { '-' });
            out.push(if bits & 2 != 0 { 'w' } else { '-' });
            let exec = bits & 1 != 0;
            out.push(match (special, exec, triad) {
                (true, true, 0) => 't',
                (true, false, 0) => 'T',
                (true, true, _) => 's',
                (true, false, _) => 'S',
                (false, true, _) => 'x',
                (false, false, _) => '-',
            });
        }
        out
    }

    /// Directories must stay writable and traversable for their owner.
    pub fn with_owner_write_execute(&self) -> Self {
        Self(self.0 | Self::OWNER_WRITE | Self::OWNER_EXECUTE)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_octal())
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_octal())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Permission::from_octal(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid octal permission '{}'", s)))
    }
}

/// Last-known attributes of a remote object. `None` means unknown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub kind: PathType,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub permission: Option<Permission>,
    pub checksum: Option<String>,
    pub link_target: Option<String>,
}

impl Attributes {
    pub fn of_kind(kind: PathType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// One parsed directory-listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub attributes: Attributes,
}

impl Entry {
    pub fn new(name: impl Into<String>, kind: PathType) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::of_kind(kind),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.attributes.size = Some(size);
        self
    }
}

// ─── Transfer ────────────────────────────────────────────────────────

/// Configured transfer mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    /// Classify by filename against the text filetype pattern.
    Auto,
    Binary,
    Text,
}

impl Default for TransferMode {
    fn default() -> Self {
        Self::Binary
    }
}

/// Resolved wire representation for one transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

/// Local line-ending convention used by text-mode transfers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LineSeparator {
    Unix,
    Mac,
    Windows,
}

impl LineSeparator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineSeparator::Unix => b"\n",
            LineSeparator::Mac => b"\r",
            LineSeparator::Windows => b"\r\n",
        }
    }
}

impl Default for LineSeparator {
    fn default() -> Self {
        Self::Unix
    }
}

/// Lifecycle of one transfer attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Idle,
    InProgress,
    Complete,
    Canceled,
    Failed,
}

impl TransferStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Canceled | TransferStatus::Failed
        )
    }
}

/// What a multi-item transfer does with a destination that already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferAction {
    Overwrite,
    /// Continue from the bytes already at the destination.
    Resume,
    /// Transfer under a free sibling name (`name-1.ext`).
    Rename,
    Skip,
    /// Ask the transfer prompt when any root destination exists.
    Callback,
    Cancel,
}

impl Default for TransferAction {
    fn default() -> Self {
        Self::Callback
    }
}

// ─── Status reporting ────────────────────────────────────────────────

/// Category of a status message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageCategory {
    Progress,
    /// Raw control-channel traffic.
    Transcript,
    Error,
    Start,
}
