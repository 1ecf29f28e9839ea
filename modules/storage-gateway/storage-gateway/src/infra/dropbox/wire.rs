//! Dropbox API v2 request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage_gateway_sdk::{Entry, EntryKind, HighlightSpan, SearchMatch};

// === Requests ===

#[derive(Debug, Serialize)]
pub struct PathArg<'a> {
    pub path: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ListFolderArg<'a> {
    pub path: &'a str,
    pub recursive: bool,
    pub include_deleted: bool,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct ListFolderContinueArg<'a> {
    pub cursor: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderArg<'a> {
    pub path: &'a str,
    pub autorename: bool,
}

#[derive(Debug, Serialize)]
pub struct GetMetadataArg<'a> {
    pub path: &'a str,
    pub include_deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Add,
    Overwrite,
}

#[derive(Debug, Serialize)]
pub struct UploadArg<'a> {
    pub path: &'a str,
    pub mode: WriteMode,
    pub autorename: bool,
    pub mute: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchArg<'a> {
    pub query: &'a str,
    pub options: SearchOptions<'a>,
    pub match_field_options: MatchFieldOptions,
}

#[derive(Debug, Serialize)]
pub struct SearchOptions<'a> {
    pub path: &'a str,
    pub max_results: u32,
    pub file_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MatchFieldOptions {
    pub include_highlights: bool,
}

// === Responses ===

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(DeletedMetadata),
}

#[derive(Debug, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub id: String,
    pub path_display: Option<String>,
    pub size: u64,
    pub server_modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct FolderMetadata {
    pub name: String,
    pub id: String,
    pub path_display: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeletedMetadata {
    pub name: String,
}

impl From<FileMetadata> for Entry {
    fn from(m: FileMetadata) -> Self {
        Self {
            path: m.path_display.unwrap_or_else(|| m.name.clone()),
            name: m.name,
            kind: EntryKind::File,
            size: Some(m.size),
            modified_at: Some(m.server_modified),
            id: Some(m.id),
        }
    }
}

impl From<FolderMetadata> for Entry {
    fn from(m: FolderMetadata) -> Self {
        Self {
            path: m.path_display.unwrap_or_else(|| m.name.clone()),
            name: m.name,
            kind: EntryKind::Folder,
            size: None,
            modified_at: None,
            id: Some(m.id),
        }
    }
}

impl Metadata {
    /// `None` for deleted entries.
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Self::File(f) => Some(f.into()),
            Self::Folder(f) => Some(f.into()),
            Self::Deleted(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct MetadataResult {
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct FolderResult {
    pub metadata: FolderMetadata,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatchV2>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatchV2 {
    pub metadata: MetadataV2,
    #[serde(default)]
    pub highlight_spans: Vec<HighlightSpanV2>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum MetadataV2 {
    Metadata { metadata: Metadata },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct HighlightSpanV2 {
    pub highlight_str: String,
    pub is_highlighted: bool,
}

impl SearchMatchV2 {
    pub fn into_match(self) -> Option<SearchMatch> {
        let MetadataV2::Metadata { metadata } = self.metadata else {
            return None;
        };
        Some(SearchMatch {
            entry: metadata.into_entry()?,
            highlights: self
                .highlight_spans
                .into_iter()
                .map(|h| HighlightSpan {
                    text: h.highlight_str,
                    is_highlighted: h.is_highlighted,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FullAccount {
    pub account_id: String,
    pub name: AccountName,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountName {
    pub display_name: String,
}

/// Error document returned with 4xx/5xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error_summary: String,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// `error.retry_after` on rate-limit responses, in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.error.as_ref()?.get("retry_after")?.as_u64()
    }
}
