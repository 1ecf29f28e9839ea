//! The storage gateway: confined, cached, coalesced and retried access to
//! the case document store.
//!
//! Every operation runs the same pipeline:
//!
//! 1. normalize the caller's path under the root and gate it with
//!    [`PathGuard::is_acceptable`];
//! 2. serve from cache / join an in-flight request where the operation
//!    allows it;
//! 3. otherwise run the backend call through [`RetryExecutor`], acquiring a
//!    client from [`ClientPool`] on every attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use casekit_auth::CredentialBroker;
use chrono::Utc;
use storage_gateway_sdk::{
    ConnectionStatus, Entry, FileContent, OpContext, SearchMatch, StorageApi, StorageError,
    WriteOptions,
};
use tracing::instrument;

use super::cache::ResultCache;
use super::coalescer::RequestCoalescer;
use super::path_guard::{NormalizedPath, PathGuard};
use super::pool::{ClientHandle, ClientPool};
use super::ports::{BackendConnector, ClassifiedError};
use super::retry::{AttemptFailure, ErrorClass, RetryExecutor};
use crate::config::{ConfigError, GatewayConfig};

/// Hard cap on search results regardless of configuration.
const SEARCH_RESULT_CAP: u32 = 1000;

/// Standard sub-folders of a case folder, parents before children.
pub const CASE_SUBFOLDERS: [&str; 10] = [
    "portal",
    "portal/drafts",
    "portal/events",
    "portal/tasks",
    "portal/hac",
    "portal/hac/req",
    "portal/hac/arc",
    "portal/tree",
    "portal/tree/sources",
    "portal/uploads",
];

/// Outcome of [`StorageGateway::self_test`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestReport {
    /// Probe file that was written, read back and deleted.
    pub path: String,
    pub bytes_written: usize,
    pub read_back_matches: bool,
    /// `false` if the probe could not be removed afterwards.
    pub cleaned_up: bool,
}

struct Inner {
    guard: PathGuard,
    pool: ClientPool,
    retry: RetryExecutor,
    listings: ResultCache<Vec<Entry>>,
    contents: ResultCache<FileContent>,
    list_flights: RequestCoalescer<Vec<Entry>>,
    read_flights: RequestCoalescer<FileContent>,
    list_ttl: Duration,
    read_ttl: Option<Duration>,
    search_max_results: u32,
}

/// Storage gateway. Cheap to clone; clones share caches and the client pool.
#[derive(Clone)]
pub struct StorageGateway {
    inner: Arc<Inner>,
}

impl StorageGateway {
    /// # Errors
    /// `ConfigError` if the root, health segment or retry schedule is invalid.
    pub fn new(
        config: &GatewayConfig,
        broker: CredentialBroker,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Self, ConfigError> {
        config.retry.validate()?;
        let guard = PathGuard::new(&config.root, &config.health_segment)?;
        Ok(Self {
            inner: Arc::new(Inner {
                guard,
                pool: ClientPool::new(broker, connector, config.client_ttl),
                retry: RetryExecutor::new(&config.retry),
                listings: ResultCache::new(),
                contents: ResultCache::new(),
                list_flights: RequestCoalescer::new(),
                read_flights: RequestCoalescer::new(),
                list_ttl: config.list_cache_ttl,
                read_ttl: config.read_cache_ttl,
                search_max_results: config.search_max_results.min(SEARCH_RESULT_CAP),
            }),
        })
    }

    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        &self.inner.guard
    }

    #[must_use]
    pub fn broker(&self) -> &CredentialBroker {
        self.inner.pool.broker()
    }

    /// Drop every cached listing and read.
    pub fn clear_caches(&self) {
        self.inner.listings.clear();
        self.inner.contents.clear();
    }

    /// Probe the connected account.
    ///
    /// Never fails; the reason a connection is unusable is reported in
    /// [`ConnectionStatus::note`].
    #[instrument(skip(self))]
    pub async fn connection_status(&self) -> ConnectionStatus {
        let root = self.inner.guard.root().to_owned();
        let result = self
            .inner
            .call("current_account", &root, |handle| async move {
                handle.backend().current_account().await
            })
            .await;

        match result {
            Ok(account) => ConnectionStatus {
                connected: true,
                account: Some(account.email.unwrap_or(account.display_name)),
                note: None,
            },
            Err(err) => {
                let note = match &err {
                    StorageError::AuthUnavailable { .. } => "not_connected",
                    StorageError::AuthTokenInvalid { .. } => "reconnect_required",
                    _ => "unavailable",
                };
                tracing::info!(error = %err, note, "storage connection not usable");
                ConnectionStatus {
                    connected: false,
                    account: None,
                    note: Some(note.to_owned()),
                }
            }
        }
    }

    /// Write, read back and delete a probe under the health folder.
    ///
    /// # Errors
    /// Any failure of the write or the read-back.
    #[instrument(skip(self))]
    pub async fn self_test(&self) -> Result<SelfTestReport, StorageError> {
        let ctx = OpContext::default();
        let stamp = Utc::now();
        let probe = format!(
            "{}/probe-{}.txt",
            self.inner.guard.health_path(),
            stamp.timestamp_millis()
        );
        let body = Bytes::from(format!("storage self-test {}", stamp.to_rfc3339()));

        let written = self
            .write(&ctx, &probe, body.clone(), WriteOptions::default())
            .await?;
        let read = self.read(&ctx, &written.path).await?;
        let read_back_matches = read.bytes == body;

        let cleaned_up = match self.delete(&ctx, &written.path).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(path = %written.path, error = %err, "self-test probe left behind");
                false
            }
        };

        Ok(SelfTestReport {
            path: written.path,
            bytes_written: body.len(),
            read_back_matches,
            cleaned_up,
        })
    }

    /// Create a case folder and its standard sub-folders.
    ///
    /// # Errors
    /// The first folder that could not be ensured.
    #[instrument(skip(self, ctx))]
    pub async fn ensure_case_structure(
        &self,
        ctx: &OpContext,
        case_folder: &str,
    ) -> Result<NormalizedPath, StorageError> {
        let base = self.inner.admit(ctx, case_folder)?;
        self.ensure_folder(ctx, base.as_str()).await?;
        for sub in CASE_SUBFOLDERS {
            let path = format!("{base}/{sub}");
            self.ensure_folder(ctx, &path).await?;
        }
        Ok(base)
    }
}

impl Inner {
    /// Normalize `raw` and gate it before anything reaches the network.
    fn admit(&self, ctx: &OpContext, raw: &str) -> Result<NormalizedPath, StorageError> {
        let path = self.guard.normalize(raw, ctx.case_id());
        if self.guard.is_acceptable(path.as_str()) {
            Ok(path)
        } else {
            tracing::warn!(raw, normalized = %path, "path rejected");
            Err(StorageError::path_rejected(
                raw,
                "not confined to the root namespace",
            ))
        }
    }

    /// One backend call under the retry policy.
    ///
    /// A client is acquired per attempt. A fatal-auth failure rejects that
    /// client's credential so the next call refreshes.
    async fn call<T, F, Fut>(&self, op: &'static str, path: &str, f: F) -> Result<T, StorageError>
    where
        F: Fn(ClientHandle) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let f = &f;
        self.retry
            .run(op, path, |_| async move {
                let handle = self
                    .pool
                    .get_client()
                    .await
                    .map_err(AttemptFailure::Client)?;
                match f(handle.clone()).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        if ErrorClass::of(&err) == ErrorClass::FatalAuth {
                            tracing::warn!(op, path, tag = %err.tag, "backend rejected credential");
                            self.pool.reject(&handle);
                        }
                        Err(AttemptFailure::Backend(err))
                    }
                }
            })
            .await
    }

    async fn fetch_listing(&self, path: NormalizedPath) -> Result<Vec<Entry>, StorageError> {
        let fill = self.listings.fill_token();
        let target = path.as_str().to_owned();
        let entries = self
            .call("list", path.as_str(), |handle| {
                let target = target.clone();
                async move { handle.backend().list_folder(&target).await }
            })
            .await?;
        self.listings
            .set(&path.cache_key(), entries.clone(), self.list_ttl, fill);
        Ok(entries)
    }

    async fn fetch_content(&self, path: NormalizedPath) -> Result<FileContent, StorageError> {
        let fill = self.contents.fill_token();
        let target = path.as_str().to_owned();
        let content = self
            .call("read", path.as_str(), |handle| {
                let target = target.clone();
                async move { handle.backend().download(&target).await }
            })
            .await?;
        if let Some(ttl) = self.read_ttl {
            self.contents
                .set(&path.cache_key(), content.clone(), ttl, fill);
        }
        Ok(content)
    }

    /// Create `path`; an existing entry (a 409 `conflict`) counts as success.
    async fn create_folder(&self, path: &NormalizedPath) -> Result<(), StorageError> {
        let target = path.as_str().to_owned();
        self.call("ensure_folder", path.as_str(), |handle| {
            let target = target.clone();
            async move {
                match handle.backend().create_folder(&target).await {
                    Ok(_) => Ok(()),
                    Err(err) if err.is_conflict() => {
                        tracing::debug!(path = %target, "folder already exists");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        })
        .await?;
        self.forget_listing(path);
        Ok(())
    }

    /// Drop cached state that a change at `path` makes stale: the entry
    /// itself and the listing of its parent.
    fn forget_listing(&self, path: &NormalizedPath) {
        let key = path.cache_key();
        self.listings.invalidate(&key);
        self.list_flights.forget(&key);
        self.contents.invalidate(&key);
        self.read_flights.forget(&key);
        if let Some(parent) = self.guard.parent(path) {
            let parent_key = parent.cache_key();
            self.listings.invalidate(&parent_key);
            self.list_flights.forget(&parent_key);
        }
    }

    fn forget_subtree(&self, path: &NormalizedPath) {
        let key = path.cache_key();
        self.listings.invalidate_subtree(&key);
        self.contents.invalidate_subtree(&key);
        self.list_flights.forget_subtree(&key);
        self.read_flights.forget_subtree(&key);
        self.forget_listing(path);
    }
}

#[async_trait]
impl StorageApi for StorageGateway {
    #[instrument(skip(self, ctx))]
    async fn list(&self, ctx: &OpContext, path: &str) -> Result<Vec<Entry>, StorageError> {
        let path = self.inner.admit(ctx, path)?;
        let key = path.cache_key();
        if let Some(entries) = self.inner.listings.get(&key) {
            tracing::trace!(path = %path, "listing served from cache");
            return Ok(entries);
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .list_flights
            .coalesce(&key, move || async move { inner.fetch_listing(path).await })
            .await
    }

    #[instrument(skip(self, ctx))]
    async fn read(&self, ctx: &OpContext, path: &str) -> Result<FileContent, StorageError> {
        let path = self.inner.admit(ctx, path)?;
        let key = path.cache_key();
        if let Some(content) = self.inner.contents.get(&key) {
            return Ok(content);
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .read_flights
            .coalesce(&key, move || async move { inner.fetch_content(path).await })
            .await
    }

    #[instrument(skip(self, ctx, bytes), fields(len = bytes.len()))]
    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        bytes: Bytes,
        options: WriteOptions,
    ) -> Result<Entry, StorageError> {
        let path = self.inner.admit(ctx, path)?;
        if let Some(parent) = self.inner.guard.parent(&path)
            && self.inner.listings.get(&parent.cache_key()).is_none()
        {
            self.inner.create_folder(&parent).await?;
        }

        let target = path.as_str().to_owned();
        let result = self
            .inner
            .call("write", path.as_str(), |handle| {
                let target = target.clone();
                let bytes = bytes.clone();
                async move {
                    handle
                        .backend()
                        .upload(&target, bytes, options.overwrite)
                        .await
                }
            })
            .await;
        // a failed attempt may still have landed
        self.inner.forget_listing(&path);
        result
    }

    #[instrument(skip(self, ctx))]
    async fn ensure_folder(&self, ctx: &OpContext, path: &str) -> Result<(), StorageError> {
        let path = self.inner.admit(ctx, path)?;
        self.inner.create_folder(&path).await
    }

    #[instrument(skip(self, ctx))]
    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool, StorageError> {
        let path = self.inner.admit(ctx, path)?;
        let target = path.as_str().to_owned();
        let probe = self
            .inner
            .call("exists", path.as_str(), |handle| {
                let target = target.clone();
                async move { handle.backend().get_metadata(&target).await }
            })
            .await;
        match probe {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, ctx))]
    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<(), StorageError> {
        let path = self.inner.admit(ctx, path)?;
        if path == self.inner.guard.root_path() {
            return Err(StorageError::path_rejected(
                path.as_str(),
                "the root namespace cannot be deleted",
            ));
        }

        let target = path.as_str().to_owned();
        let result = self
            .inner
            .call("delete", path.as_str(), |handle| {
                let target = target.clone();
                async move { handle.backend().delete(&target).await }
            })
            .await;
        self.inner.forget_subtree(&path);
        result
    }

    #[instrument(skip(self, ctx))]
    async fn search(
        &self,
        ctx: &OpContext,
        query: &str,
        scope: &str,
    ) -> Result<Vec<SearchMatch>, StorageError> {
        let scope = self.inner.admit(ctx, scope)?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let max_results = self.inner.search_max_results;
        let target = scope.as_str().to_owned();
        let query = query.to_owned();
        self.inner
            .call("search", scope.as_str(), |handle| {
                let target = target.clone();
                let query = query.clone();
                async move {
                    handle
                        .backend()
                        .search(&query, &target, max_results)
                        .await
                }
            })
            .await
    }
}
