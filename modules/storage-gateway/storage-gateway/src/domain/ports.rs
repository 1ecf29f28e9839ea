//! Outbound ports: the provider SDK boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use casekit_utils::SecretString;
use storage_gateway_sdk::{Entry, FileContent, SearchMatch};

/// The single failure shape produced at the provider boundary.
///
/// Adapters translate every provider-specific error into this form;
/// classification (see [`crate::domain::retry::ErrorClass`]) reads nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    /// HTTP status, `None` for transport failures.
    pub status: Option<u16>,
    /// Short machine tag, e.g. `not_found`, `conflict`, `invalid_access_token`.
    pub tag: String,
    /// Provider summary for diagnostics. Never contains credentials.
    pub summary: String,
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(status: Option<u16>, tag: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            status,
            tag: tag.into(),
            summary: summary.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn http(status: u16, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::new(Some(status), tag.clone(), tag)
    }

    #[must_use]
    pub fn transport(summary: impl Into<String>) -> Self {
        Self::new(None, "transport", summary)
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == Some(409) && self.tag == "conflict"
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status} {}: {}", self.tag, self.summary),
            None => write!(f, "{}: {}", self.tag, self.summary),
        }
    }
}

/// Account behind the current credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// Remote file-storage operations, already authenticated.
///
/// Paths are normalized gateway paths; adapters must not rewrite them.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Complete listing in provider order, following pagination.
    async fn list_folder(&self, path: &str) -> Result<Vec<Entry>, ClassifiedError>;

    async fn download(&self, path: &str) -> Result<FileContent, ClassifiedError>;

    /// `overwrite = false` must fail with a 409 when the file exists.
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<Entry, ClassifiedError>;

    /// A 409 when something already occupies `path`.
    async fn create_folder(&self, path: &str) -> Result<Entry, ClassifiedError>;

    async fn delete(&self, path: &str) -> Result<(), ClassifiedError>;

    async fn get_metadata(&self, path: &str) -> Result<Entry, ClassifiedError>;

    async fn search(
        &self,
        query: &str,
        scope: &str,
        max_results: u32,
    ) -> Result<Vec<SearchMatch>, ClassifiedError>;

    async fn current_account(&self) -> Result<AccountInfo, ClassifiedError>;
}

/// Builds backend handles bound to a bearer token.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, token: SecretString) -> Arc<dyn StorageBackend>;
}
