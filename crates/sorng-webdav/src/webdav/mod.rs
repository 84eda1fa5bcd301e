//! # sorng-webdav: WebDAV backend
//!
//! HTTP document-store access (RFC 4918) through `reqwest`:
//! - `types`: resources returned by PROPFIND, depth, request bodies
//! - `xml`: `multistatus` parsing with `quick-xml`
//! - `client`: authenticated HTTP client, URL composition, status mapping
//! - `transfer`: ranged GET readers and streaming PUT uploads
//! - `backend`: `Backend` / `BackendFactory` for `sorng-remotefs`

pub mod types;
pub mod xml;
pub mod client;
pub mod transfer;
pub mod backend;

pub use backend::{WebDavBackend, WebDavBackendFactory};
pub use client::DavClient;
pub use types::*;
