//! Case folder discovery.
//!
//! [`CaseScanner`] walks the root namespace through the public
//! [`StorageApi`] and hands every case folder whose contents changed to an
//! [`IngestSink`]. [`CasePoller`] runs it on a schedule.

mod naming;
mod poller;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use storage_gateway_sdk::{Entry, OpContext, StorageApi, StorageError};
use thiserror::Error;

pub use naming::{CaseFolderName, parse_case_folder};
pub use poller::{CasePoller, PollerConfig};

/// Failure reported by an [`IngestSink`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("ingest sink: {0}")]
pub struct SinkError(pub String);

/// A file found inside a case folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub name: String,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// A case folder ready for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestCandidate {
    pub folder_path: String,
    pub folder_name: String,
    pub case: CaseFolderName,
    /// SHA-256 over the sorted `(path, size, modified)` file list.
    pub content_hash: String,
    pub files: Vec<ScannedFile>,
}

/// Where discovered case folders go.
#[async_trait]
pub trait IngestSink: Send + Sync {
    /// Whether `folder_path` was already enqueued with this exact content.
    async fn is_known(&self, folder_path: &str, content_hash: &str) -> Result<bool, SinkError>;

    async fn enqueue(&self, candidate: IngestCandidate) -> Result<(), SinkError>;
}

/// Process-local sink; keeps every enqueued candidate.
#[derive(Default)]
pub struct MemoryIngestSink {
    queue: Mutex<Vec<IngestCandidate>>,
}

impl MemoryIngestSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn queued(&self) -> Vec<IngestCandidate> {
        self.queue.lock().clone()
    }
}

#[async_trait]
impl IngestSink for MemoryIngestSink {
    async fn is_known(&self, folder_path: &str, content_hash: &str) -> Result<bool, SinkError> {
        Ok(self
            .queue
            .lock()
            .iter()
            .any(|c| c.folder_path == folder_path && c.content_hash == content_hash))
    }

    async fn enqueue(&self, candidate: IngestCandidate) -> Result<(), SinkError> {
        self.queue.lock().push(candidate);
        Ok(())
    }
}

/// Result of one scan. Per-folder failures do not abort the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub folders_seen: usize,
    pub enqueued: usize,
    pub skipped_invalid: usize,
    pub skipped_known: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
enum FolderError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

enum FolderOutcome {
    Enqueued,
    Known,
}

/// Discovers case folders below the root namespace.
pub struct CaseScanner {
    storage: Arc<dyn StorageApi>,
    sink: Arc<dyn IngestSink>,
    root: String,
}

impl CaseScanner {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageApi>,
        sink: Arc<dyn IngestSink>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            sink,
            root: root.into(),
        }
    }

    /// Scan the root once.
    ///
    /// # Errors
    /// Only if the root itself cannot be listed.
    pub async fn scan(&self) -> Result<ScanReport, StorageError> {
        let ctx = OpContext::default();
        let folders: Vec<Entry> = self
            .storage
            .list(&ctx, &self.root)
            .await?
            .into_iter()
            .filter(Entry::is_folder)
            .collect();

        let mut report = ScanReport {
            folders_seen: folders.len(),
            ..ScanReport::default()
        };

        for folder in folders {
            let Some(case) = parse_case_folder(&folder.name) else {
                tracing::debug!(folder = %folder.name, "skipping folder outside case naming");
                report.skipped_invalid += 1;
                continue;
            };

            match self.scan_folder(&folder, case).await {
                Ok(FolderOutcome::Enqueued) => report.enqueued += 1,
                Ok(FolderOutcome::Known) => report.skipped_known += 1,
                Err(e) => {
                    tracing::warn!(folder = %folder.name, error = %e, "case folder scan failed");
                    report.errors.push(format!("{}: {e}", folder.name));
                }
            }
        }

        tracing::info!(
            folders = report.folders_seen,
            enqueued = report.enqueued,
            errors = report.errors.len(),
            "case scan finished"
        );
        Ok(report)
    }

    async fn scan_folder(
        &self,
        folder: &Entry,
        case: CaseFolderName,
    ) -> Result<FolderOutcome, FolderError> {
        let ctx = OpContext::for_case(case.case_id.clone());
        let files = self.collect_files(&ctx, &folder.path).await?;
        let content_hash = content_hash(&files);

        if self.sink.is_known(&folder.path, &content_hash).await? {
            tracing::debug!(folder = %folder.name, "case folder unchanged");
            return Ok(FolderOutcome::Known);
        }

        tracing::info!(folder = %folder.name, files = files.len(), "case folder queued for ingest");
        self.sink
            .enqueue(IngestCandidate {
                folder_path: folder.path.clone(),
                folder_name: folder.name.clone(),
                case,
                content_hash,
                files,
            })
            .await?;
        Ok(FolderOutcome::Enqueued)
    }

    /// Every file below `folder`, breadth first. A folder that vanished
    /// mid-walk contributes nothing.
    async fn collect_files(
        &self,
        ctx: &OpContext,
        folder: &str,
    ) -> Result<Vec<ScannedFile>, StorageError> {
        let mut files = Vec::new();
        let mut pending = VecDeque::from([folder.to_owned()]);
        while let Some(next) = pending.pop_front() {
            let entries = match self.storage.list(ctx, &next).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                if entry.is_folder() {
                    pending.push_back(entry.path);
                } else {
                    files.push(ScannedFile {
                        path: entry.path,
                        name: entry.name,
                        size: entry.size,
                        modified: entry.modified_at,
                    });
                }
            }
        }
        Ok(files)
    }
}

#[derive(Serialize)]
struct HashedFile<'a> {
    path: String,
    size: Option<u64>,
    modified: Option<&'a DateTime<Utc>>,
}

/// SHA-256 (hex) over the file list sorted by case-folded path.
#[must_use]
pub fn content_hash(files: &[ScannedFile]) -> String {
    let mut rows: Vec<HashedFile<'_>> = files
        .iter()
        .map(|f| HashedFile {
            path: f.path.to_lowercase(),
            size: f.size,
            modified: f.modified.as_ref(),
        })
        .collect();
    rows.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    // serializing plain strings, numbers and timestamps cannot fail
    if let Ok(doc) = serde_json::to_vec(&rows) {
        hasher.update(&doc);
    }
    hex::encode(hasher.finalize())
}
