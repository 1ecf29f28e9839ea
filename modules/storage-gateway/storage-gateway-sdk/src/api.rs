//! Storage gateway API traits.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;
use crate::models::{Entry, FileContent, OpContext, SearchMatch, WriteOptions};

/// Operations exposed to collaborators.
///
/// Every path is confined to the configured root namespace before anything
/// reaches the provider; a path that fails the check yields
/// [`StorageError::PathRejected`].
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Folder listing in provider order. Coalesced and cached.
    async fn list(&self, ctx: &OpContext, path: &str) -> Result<Vec<Entry>, StorageError>;

    /// File bytes and metadata. Coalesced; 404 is [`StorageError::NotFound`].
    async fn read(&self, ctx: &OpContext, path: &str) -> Result<FileContent, StorageError>;

    /// Upload, creating missing parent folders. Never coalesced.
    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        bytes: Bytes,
        options: WriteOptions,
    ) -> Result<Entry, StorageError>;

    /// Create a folder; an existing one is success.
    async fn ensure_folder(&self, ctx: &OpContext, path: &str) -> Result<(), StorageError>;

    /// Metadata probe; 404 is `false`.
    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool, StorageError>;

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<(), StorageError>;

    /// Single bounded search below `scope`.
    async fn search(
        &self,
        ctx: &OpContext,
        query: &str,
        scope: &str,
    ) -> Result<Vec<SearchMatch>, StorageError>;
}

/// JSON document helpers available on every [`StorageApi`].
#[async_trait]
pub trait StorageApiExt: StorageApi {
    /// Read and decode a JSON document; a missing file is `None`.
    async fn get_json<T>(&self, ctx: &OpContext, path: &str) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned + Send,
    {
        let content = match self.read(ctx, path).await {
            Ok(content) => content,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&content.bytes)
            .map(Some)
            .map_err(|e| StorageError::InvalidDocument {
                path: content.metadata.path.clone(),
                message: e.to_string(),
            })
    }

    /// Encode as pretty JSON and overwrite `path`.
    async fn put_json<T>(
        &self,
        ctx: &OpContext,
        path: &str,
        value: &T,
    ) -> Result<Entry, StorageError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::InvalidDocument {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        self.write(ctx, path, Bytes::from(bytes), WriteOptions::default())
            .await
    }
}

impl<S: StorageApi + ?Sized> StorageApiExt for S {}
