//! # sorng-ftp: FTP/FTPS backend
//!
//! Implementation of the FTP protocol (RFC 959) with extensions:
//! - **RFC 2228 / 4217**: AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659**: Extensions: MLSD/MLST, SIZE, MDTM, REST STREAM
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 2428**: EPSV / EPRT (IPv6-ready)
//!
//! Architecture:
//! - `types`: reply, server features, security mode
//! - `protocol`: low-level command/response codec
//! - `connection`: TCP + implicit TLS transport
//! - `tls`: `SecureTransport` and the rustls implementation
//! - `transfer`: data channel management (PASV/EPSV/PORT/EPRT)
//! - `client`: stateful FTP client (handshake, login, FEAT, TYPE, PWD)
//! - `directory`: listing, mkdir, rmdir, rename, metadata, SITE commands
//! - `file_ops`: RETR/STOR/APPE streams, completion and ABOR
//! - `backend`: `Backend` / `BackendFactory` for `sorng-remotefs`

pub mod types;
pub mod protocol;
pub mod connection;
pub mod tls;
pub mod transfer;
pub mod client;
pub mod directory;
pub mod file_ops;
pub mod backend;

pub use backend::{FtpBackend, FtpBackendFactory};
pub use client::FtpClient;
pub use protocol::{BoxedStream, FtpCodec};
pub use tls::{RustlsTransport, SecureTransport};
pub use types::*;
