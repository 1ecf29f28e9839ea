#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Case storage gateway.
//!
//! Turns the remote file-storage provider into a safe primitive for the rest
//! of the application:
//!
//! - every path is confined to the root namespace before it leaves the process
//! - short-lived bearer credentials are refreshed single-flight
//! - listings are cached, identical concurrent reads and listings coalesced
//! - transient failures are retried on a fixed schedule, auth failures are not
//!
//! ## Architecture
//!
//! ```text
//!        collaborator (CLI, scanner, web handlers)
//!                 │
//!                 ▼ StorageApi
//! ┌────────────────────────────────────────┐
//! │            StorageGateway              │
//! │  PathGuard ─► cache / coalescer        │
//! │                 │                      │
//! │                 ▼                      │
//! │           RetryExecutor                │
//! │                 │ per attempt          │
//! │                 ▼                      │
//! │  ClientPool ─► CredentialBroker        │
//! └────────────────────────────────────────┘
//!                 │ StorageBackend
//!                 ▼
//!          Dropbox API v2 (HTTP)
//! ```
//!
//! ## Usage
//!
//! The public API is defined in `storage-gateway-sdk` and re-exported here.

// === PUBLIC API (from SDK) ===
pub use storage_gateway_sdk::{
    ConnectionStatus, Entry, EntryKind, FileContent, HighlightSpan, OpContext, SearchMatch,
    StorageApi, StorageApiExt, StorageError, WriteOptions,
};

// === GATEWAY ===
pub use config::{ConfigError, DropboxConfig, GatewayConfig, RetryConfig};
pub use domain::path_guard::{NormalizedPath, PathGuard};
pub use domain::ports::{AccountInfo, BackendConnector, ClassifiedError, StorageBackend};
pub use domain::service::{CASE_SUBFOLDERS, SelfTestReport, StorageGateway};
pub use infra::dropbox::{DropboxBackend, DropboxConnector};

// === CASE FOLDER SCANNING ===
pub mod scanner;

// === INTERNAL MODULES ===
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;
#[doc(hidden)]
pub mod infra;
