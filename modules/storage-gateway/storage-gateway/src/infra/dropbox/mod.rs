//! Dropbox HTTP API v2 adapter.
//!
//! RPC routes (`files/list_folder`, `files/create_folder_v2`, ...) take a JSON
//! body on the API host. Content routes (`files/download`, `files/upload`)
//! live on the content host and carry their argument in the
//! `Dropbox-API-Arg` header.

mod backend;
mod errors;
mod wire;

pub use backend::{DropboxBackend, DropboxConnector};
pub use errors::classify;
