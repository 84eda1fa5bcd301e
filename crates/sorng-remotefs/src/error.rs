//! Categorised error type shared by the core and every backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised remote filesystem error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Protocol reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Remote path the operation targeted, if any.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transport / handshake failure. Interrupts the session.
    Connection,
    /// Connect or read timed out. Interrupts the session.
    Timeout,
    /// Credentials rejected by the server.
    Authentication,
    /// The user declined to supply corrected credentials.
    AuthenticationCanceled,
    /// Well-formed rejection from the remote side.
    Protocol,
    /// File/directory not found on the server.
    NotFound,
    /// Permission denied on the server.
    PermissionDenied,
    /// Disk quota exceeded.
    QuotaExceeded,
    /// I/O failure while copying transfer data.
    Transfer,
    /// The backend lacks the requested capability.
    Unsupported,
    /// Invalid preferences or unresolvable transfer mode.
    Configuration,
    /// Operation cancelled by request.
    Canceled,
    /// The session backing a path no longer exists.
    SessionClosed,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// ── Construction helpers ─────────────────────────────────────────────

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            path: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connection, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, msg)
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Authentication, msg)
    }

    pub fn authentication_canceled(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::AuthenticationCanceled, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Protocol, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, msg)
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transfer, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unsupported, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Configuration, msg)
    }

    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Canceled, msg)
    }

    pub fn session_closed() -> Self {
        Self::new(
            RemoteErrorKind::SessionClosed,
            "The session for this path has been closed",
        )
    }

    /// Classify a numeric protocol reply into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => RemoteErrorKind::Connection,
            425 | 426 => RemoteErrorKind::Transfer,
            430 | 530 => RemoteErrorKind::Authentication,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    RemoteErrorKind::PermissionDenied
                } else if lower.contains("not found")
                    || lower.contains("no such")
                    || lower.contains("does not exist")
                {
                    RemoteErrorKind::NotFound
                } else if lower.contains("quota") {
                    RemoteErrorKind::QuotaExceeded
                } else {
                    RemoteErrorKind::Protocol
                }
            }
            451 | 452 | 552 => RemoteErrorKind::Transfer,
            502 | 504 => RemoteErrorKind::Unsupported,
            _ => RemoteErrorKind::Protocol,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
            path: None,
        }
    }

    // ── Classification ───────────────────────────────────────────

    /// Transport-level failure: the session must be interrupted.
    pub fn is_connection(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Connection | RemoteErrorKind::Timeout
        )
    }

    /// Well-formed rejection: the session stays open.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Protocol
                | RemoteErrorKind::NotFound
                | RemoteErrorKind::PermissionDenied
                | RemoteErrorKind::QuotaExceeded
        )
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == RemoteErrorKind::Unsupported
    }

    pub fn is_authentication(&self) -> bool {
        self.kind == RemoteErrorKind::Authentication
    }

    /// Whether a transfer that failed with this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Connection | RemoteErrorKind::Timeout | RemoteErrorKind::Transfer
        )
    }

    /// Short category plus reason, safe to show to an end user.
    pub fn user_message(&self) -> String {
        let category = match self.kind {
            RemoteErrorKind::Connection | RemoteErrorKind::Timeout => "Connection failed",
            RemoteErrorKind::Authentication => "Login failed",
            RemoteErrorKind::AuthenticationCanceled => "Login canceled",
            RemoteErrorKind::Protocol => "Server error",
            RemoteErrorKind::NotFound => "Not found",
            RemoteErrorKind::PermissionDenied => "Permission denied",
            RemoteErrorKind::QuotaExceeded => "Quota exceeded",
            RemoteErrorKind::Transfer => "Transfer failed",
            RemoteErrorKind::Unsupported => "Not supported",
            RemoteErrorKind::Configuration => "Invalid configuration",
            RemoteErrorKind::Canceled => "Canceled",
            RemoteErrorKind::SessionClosed => "Disconnected",
        };
        // Transport errors are only logged; their text is not shown verbatim.
        if self.is_connection() && self.code.is_none() {
            return category.to_string();
        }
        match self.code {
            Some(code) => format!("{}: {} {}", category, code, self.message.trim()),
            None => format!("{}: {}", category, self.message.trim()),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.path) {
            (Some(code), Some(path)) => {
                write!(f, "[{:?} {}] {} ({})", self.kind, code, self.message, path)
            }
            (Some(code), None) => write!(f, "[{:?} {}] {}", self.kind, code, self.message),
            (None, Some(path)) => write!(f, "[{:?}] {} ({})", self.kind, self.message, path),
            (None, None) => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::connection(e.to_string())
        }
    }
}

impl From<RemoteError> for String {
    fn from(e: RemoteError) -> String {
        e.user_message()
    }
}
