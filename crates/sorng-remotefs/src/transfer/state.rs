use crate::types::TransferStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Bookkeeping for one transfer, shared between the copy loop and whoever
/// observes or cancels it.
#[derive(Debug, Default)]
pub struct TransferState {
    transferred: AtomicU64,
    offset: AtomicU64,
    resume: AtomicBool,
    canceled: AtomicBool,
    status: AtomicU8,
}

fn encode(status: TransferStatus) -> u8 {
    match status {
        TransferStatus::Idle => 0,
        TransferStatus::InProgress => 1,
        TransferStatus::Complete => 2,
        TransferStatus::Canceled => 3,
        TransferStatus::Failed => 4,
    }
}

fn decode(raw: u8) -> TransferStatus {
    match raw {
        1 => TransferStatus::InProgress,
        2 => TransferStatus::Complete,
        3 => TransferStatus::Canceled,
        4 => TransferStatus::Failed,
        _ => TransferStatus::Idle,
    }
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new attempt.
    pub fn begin(&self, resume: bool) {
        self.transferred.store(0, Ordering::SeqCst);
        self.offset.store(0, Ordering::SeqCst);
        self.resume.store(resume, Ordering::SeqCst);
        self.canceled.store(false, Ordering::SeqCst);
        self.status.store(encode(TransferStatus::InProgress), Ordering::SeqCst);
    }

    /// Request cancellation. Returns `false` (and does nothing) unless a
    /// transfer is in progress.
    pub fn cancel(&self) -> bool {
        if self.status() != TransferStatus::InProgress {
            return false;
        }
        !self.canceled.swap(true, Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_resume(&self) -> bool {
        self.resume.load(Ordering::SeqCst)
    }

    /// Byte count already present before this attempt.
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn add_transferred(&self, bytes: u64) -> u64 {
        self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    /// Bytes moved by this attempt, excluding the resume offset.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TransferStatus {
        decode(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn finish(&self, status: TransferStatus) {
        self.status.store(encode(status), Ordering::SeqCst);
    }
}
