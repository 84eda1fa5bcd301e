//! Transfer preferences consumed by the transfer engine.

use crate::error::{RemoteError, RemoteResult};
use crate::types::{LineSeparator, Permission, TransferAction, TransferMode, TransferType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default pattern of filenames transferred in text mode when the mode is `auto`.
pub const DEFAULT_TEXT_PATTERN: &str = r".*\.txt|.*\.cgi|.*\.htm|.*\.html|.*\.shtml|.*\.xml|.*\.xsl|.*\.php|.*\.php3|.*\.js|.*\.css|.*\.asp|.*\.java|.*\.c|.*\.cp|.*\.cpp|.*\.m|.*\.h|.*\.pl|.*\.py|.*\.rb|.*\.sh";

/// Preferences applied to every upload and download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPreferences {
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// Filenames matching this pattern use text mode when `transfer_mode` is `auto`.
    #[serde(default = "default_text_pattern")]
    pub text_filetype_pattern: Option<String>,
    #[serde(default)]
    pub line_separator: LineSeparator,
    /// Continue from the partial file when a failed transfer is retried.
    #[serde(default = "default_true")]
    pub resume_on_retry: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_sec: u64,
    /// Copy-loop buffer size (bytes).
    #[serde(default = "default_chunk")]
    pub chunk_size: usize,
    #[serde(default)]
    pub download: DirectionPreferences,
    #[serde(default)]
    pub upload: DirectionPreferences,
}

/// Post-transfer reconciliation settings for one direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionPreferences {
    #[serde(default = "default_true")]
    pub change_permissions: bool,
    /// Apply the configured defaults instead of the source permission.
    #[serde(default)]
    pub use_default_permissions: bool,
    #[serde(default = "default_file_permission")]
    pub file_permission: Permission,
    #[serde(default = "default_folder_permission")]
    pub folder_permission: Permission,
    #[serde(default = "default_true")]
    pub preserve_timestamp: bool,
    /// Upload only: when the server cannot take the timestamp, copy the
    /// remote one onto the local file instead.
    #[serde(default)]
    pub timestamp_fallback_to_local: bool,
    /// Bytes per second; absent means unlimited.
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
    /// Handling of existing destinations in multi-item transfers.
    #[serde(default)]
    pub file_exists: TransferAction,
}

fn default_text_pattern() -> Option<String> {
    Some(DEFAULT_TEXT_PATTERN.to_string())
}
fn default_true() -> bool {
    true
}
fn default_retry_count() -> u32 {
    1
}
fn default_retry_delay() -> u64 {
    10
}
fn default_chunk() -> usize {
    65_536
}
fn default_file_permission() -> Permission {
    Permission::new(0o644)
}
fn default_folder_permission() -> Permission {
    Permission::new(0o755)
}

impl Default for DirectionPreferences {
    fn default() -> Self {
        Self {
            change_permissions: true,
            use_default_permissions: false,
            file_permission: default_file_permission(),
            folder_permission: default_folder_permission(),
            preserve_timestamp: true,
            timestamp_fallback_to_local: false,
            bandwidth_limit: None,
            file_exists: TransferAction::Callback,
        }
    }
}

impl Default for TransferPreferences {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::Binary,
            text_filetype_pattern: default_text_pattern(),
            line_separator: LineSeparator::Unix,
            resume_on_retry: true,
            retry_count: default_retry_count(),
            retry_delay_sec: default_retry_delay(),
            chunk_size: default_chunk(),
            download: DirectionPreferences::default(),
            upload: DirectionPreferences::default(),
        }
    }
}

impl TransferPreferences {
    pub fn from_json(json: &str) -> RemoteResult<Self> {
        let prefs: Self = serde_json::from_str(json)
            .map_err(|e| RemoteError::configuration(format!("Invalid preferences: {}", e)))?;
        prefs.validate()?;
        Ok(prefs)
    }

    pub fn load(path: impl AsRef<Path>) -> RemoteResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RemoteError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> RemoteResult<()> {
        if self.chunk_size == 0 {
            return Err(RemoteError::configuration("chunkSize must be positive"));
        }
        self.text_pattern().map(|_| ())
    }

    /// Compile the text filetype pattern, anchored to the whole filename.
    pub fn text_pattern(&self) -> RemoteResult<Option<Regex>> {
        match self.text_filetype_pattern.as_deref() {
            None => Ok(None),
            Some(p) => Regex::new(&format!("^(?:{})$", p))
                .map(Some)
                .map_err(|e| {
                    RemoteError::configuration(format!("Invalid text filetype pattern: {}", e))
                }),
        }
    }

    /// Resolve the wire representation for `filename`.
    pub fn resolve_mode(&self, filename: &str, pattern: Option<&Regex>) -> RemoteResult<TransferType> {
        match self.transfer_mode {
            TransferMode::Binary => Ok(TransferType::Binary),
            TransferMode::Text => Ok(TransferType::Ascii),
            TransferMode::Auto => {
                let pattern = pattern
                    .ok_or_else(|| RemoteError::configuration("Transfer mode not set"))?;
                if pattern.is_match(filename) {
                    Ok(TransferType::Ascii)
                } else {
                    Ok(TransferType::Binary)
                }
            }
        }
    }
}
