//! Storage gateway models.
//!
//! Transport-agnostic; provider wire formats live in the gateway crate.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Per-call context.
///
/// `case_id` names placeholder segments (`case-<id>`) when a path segment
/// sanitizes to nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpContext {
    pub case_id: Option<String>,
}

impl OpContext {
    #[must_use]
    pub fn for_case(case_id: impl Into<String>) -> Self {
        Self {
            case_id: Some(case_id.into()),
        }
    }

    #[must_use]
    pub fn case_id(&self) -> Option<&str> {
        self.case_id.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    #[must_use]
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file or folder as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// Display path (provider casing).
    pub path: String,
    pub kind: EntryKind,
    /// Files only.
    pub size: Option<u64>,
    /// Files only; server-side modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// Provider-assigned stable id, e.g. `id:a4ayc_80_OEAAAAAAAAAXw`.
    pub id: Option<String>,
}

impl Entry {
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// Downloaded bytes plus the metadata returned alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub bytes: Bytes,
    pub metadata: Entry,
}

/// Options for `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Replace an existing file. When false an existing file is a conflict.
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

/// A fragment of a search hit; `is_highlighted` marks the matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightSpan {
    pub text: String,
    pub is_highlighted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub entry: Entry,
    /// Empty when the provider sent no highlights.
    pub highlights: Vec<HighlightSpan>,
}

/// Outcome of a connection probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Display name or e-mail of the connected account.
    pub account: Option<String>,
    /// Why the connection is not usable: `not_connected`,
    /// `reconnect_required` or `unavailable`.
    pub note: Option<String>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn write_defaults_to_overwrite() {
        assert!(WriteOptions::default().overwrite);
    }

    #[test]
    fn op_context_carries_case_id() {
        assert_eq!(OpContext::default().case_id(), None);
        assert_eq!(OpContext::for_case("C1").case_id(), Some("C1"));
    }

    #[test]
    fn entry_kind_renders_lowercase() {
        assert_eq!(EntryKind::Folder.to_string(), "folder");
        assert_eq!(EntryKind::File.as_str(), "file");
    }
}
