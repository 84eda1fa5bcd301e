//! External collaborators: status sink, credential prompt, label lookup.

use crate::types::{Credentials, MessageCategory};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives progress and transcript messages. A pure sink.
pub trait StatusListener: Send + Sync {
    fn message(&self, text: &str, category: MessageCategory);
}

/// Asked for corrected credentials after the server rejected a login.
#[async_trait]
pub trait CredentialsPrompt: Send + Sync {
    /// `None` means the user declined.
    async fn prompt_credentials(&self, reason: &str, current: &Credentials) -> Option<Credentials>;
}

/// Resolves a label key to display text.
pub trait Localizer: Send + Sync {
    fn localized(&self, key: &str) -> String;
}

// ─── Defaults ────────────────────────────────────────────────────────

/// Routes status messages to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl StatusListener for LogListener {
    fn message(&self, text: &str, category: MessageCategory) {
        match category {
            MessageCategory::Transcript => log::trace!("{}", text),
            MessageCategory::Error => log::warn!("{}", text),
            MessageCategory::Start | MessageCategory::Progress => log::info!("{}", text),
        }
    }
}

/// Always declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

#[async_trait]
impl CredentialsPrompt for NoPrompt {
    async fn prompt_credentials(&self, reason: &str, _current: &Credentials) -> Option<Credentials> {
        log::debug!("No credential prompt available: {}", reason);
        None
    }
}

/// English labels for the status keys used by the core.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLocalizer;

impl Localizer for DefaultLocalizer {
    fn localized(&self, key: &str) -> String {
        let text = match key {
            "status.opening" => "Opening connection to",
            "status.connected" => "Connected to",
            "status.disconnecting" => "Disconnecting",
            "status.disconnected" => "Disconnected",
            "status.login" => "Sending login information",
            "status.login-failed" => "Login failed",
            "status.listing" => "Listing directory",
            "status.mkdir" => "Make directory",
            "status.rename" => "Renaming",
            "status.delete" => "Deleting",
            "status.chmod" => "Changing permission of",
            "status.chown" => "Changing owner of",
            "status.chgrp" => "Changing group of",
            "status.timestamp" => "Changing timestamp of",
            "status.download" => "Downloading",
            "status.upload" => "Uploading",
            "status.complete" => "Transfer complete",
            "status.canceled" => "Transfer canceled",
            "error.list" => "Listing directory failed",
            "error.mkdir" => "Cannot create folder",
            "error.rename-file" => "Cannot rename file",
            "error.rename-folder" => "Cannot rename folder",
            "error.delete-file" => "Cannot delete file",
            "error.delete-folder" => "Cannot delete folder",
            "error.chmod" => "Cannot change permissions",
            "error.chown" => "Cannot change owner",
            "error.chgrp" => "Cannot change group",
            "error.timestamp" => "Cannot change timestamp",
            "error.transfer" => "Transfer failed",
            other => other,
        };
        text.to_string()
    }
}

/// The three collaborators bundled for handing to sessions.
#[derive(Clone)]
pub struct Collaborators {
    pub status: Arc<dyn StatusListener>,
    pub credentials: Arc<dyn CredentialsPrompt>,
    pub localizer: Arc<dyn Localizer>,
}

impl Collaborators {
    pub fn with_status(mut self, status: Arc<dyn StatusListener>) -> Self {
        self.status = status;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsPrompt>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = localizer;
        self
    }

    /// Report `<label> <detail>`.
    pub fn report(&self, key: &str, detail: &str, category: MessageCategory) {
        let label = self.localizer.localized(key);
        if detail.is_empty() {
            self.status.message(&label, category);
        } else {
            self.status.message(&format!("{} {}", label, detail), category);
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            status: Arc::new(LogListener),
            credentials: Arc::new(NoPrompt),
            localizer: Arc::new(DefaultLocalizer),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
