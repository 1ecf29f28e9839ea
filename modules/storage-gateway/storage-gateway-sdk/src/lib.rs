//! Storage gateway SDK
//!
//! Public contract for the case storage gateway: the confined, cached,
//! retrying access layer in front of the remote file-storage provider.
//!
//! ## API Traits
//!
//! - `StorageApi` - the operations collaborators may call
//! - `StorageApiExt` - JSON document helpers on top of `read`/`write`
//!
//! ## Usage
//!
//! ```ignore
//! use storage_gateway_sdk::{OpContext, StorageApi, StorageApiExt};
//!
//! let ctx = OpContext::for_case("C1");
//! let entries = gateway.list(&ctx, "/CASES/C1").await?;
//! let intake: Option<Intake> = gateway.get_json(&ctx, "/CASES/C1/intake.json").await?;
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod models;

pub use api::{StorageApi, StorageApiExt};

pub use error::StorageError;

pub use models::{
    ConnectionStatus, Entry, EntryKind, FileContent, HighlightSpan, OpContext, SearchMatch,
    WriteOptions,
};
