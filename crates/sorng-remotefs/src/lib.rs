//! # sorng-remotefs: Session-Serialized Remote Filesystem Core
//!
//! One uniform remote-path abstraction over heterogeneous protocol backends
//! (FTP/FTPS control channels, HTTP document stores).
//!
//! Architecture:
//! - `types`: host, credentials, attributes, permission bits, enums
//! - `error`: categorised error type shared by every backend
//! - `config`: transfer preferences (mode, line endings, resume, reconciliation)
//! - `parser`: Unix / Windows / MLSD directory-listing dialects
//! - `cache`: per-session attribute & listing cache
//! - `callbacks`: status, credential prompt and localisation collaborators
//! - `backend`: the protocol contract plus capability queries
//! - `session`: connection lifecycle and the exclusive-access guard
//! - `registry`: one lazily created session per host
//! - `path`: `RemotePath` handles and their operations
//! - `path_utils`: string-based remote path composition
//! - `transfer`: transfer state, line-ending translation, throttling, engine,
//!   recursive multi-item transfers

pub mod types;
pub mod error;
pub mod config;
pub mod parser;
pub mod cache;
pub mod callbacks;
pub mod backend;
pub mod session;
pub mod registry;
pub mod path;
pub mod path_utils;
pub mod transfer;

pub use backend::{Backend, BackendFactory, ListEntry, RemoteReader, RemoteWriter};
pub use cache::{AttributeCache, Listing};
pub use callbacks::{
    Collaborators, CredentialsPrompt, DefaultLocalizer, Localizer, LogListener, NoPrompt,
    StatusListener,
};
pub use config::{DirectionPreferences, TransferPreferences};
pub use error::{RemoteError, RemoteErrorKind, RemoteResult};
pub use path::{PathList, RemotePath};
pub use registry::{RegistryStats, SessionInfo, SessionRegistry};
pub use session::{Session, SessionGuard, SessionState};
pub use transfer::{
    BandwidthThrottle, FixedAction, LineTranslator, RateLimiter, Transfer, TransferEngine,
    TransferItem, TransferKind, TransferOutcome, TransferPrompt, TransferReport, TransferState,
    Unlimited,
};
pub use types::*;
