//! Path confinement.
//!
//! Every path handed to the gateway is rewritten by [`PathGuard::normalize`]
//! into a [`NormalizedPath`] under the configured root, then checked again by
//! [`PathGuard::is_acceptable`] immediately before any backend call. The
//! second check is independent of the first: it re-derives containment from
//! the string alone.

use std::fmt;

use crate::config::ConfigError;

const GENERIC_PLACEHOLDER: &str = "unnamed-segment";

/// A path under the root namespace.
///
/// Starts with `/`, carries no `..` and no control characters, is prefixed
/// by the root, and has no trailing slash. Only [`PathGuard`] creates one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-folded form; the provider treats paths case-insensitively.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Enclosing folder, `None` for `/`-level paths.
    fn parent_str(&self) -> Option<&str> {
        match self.0.rfind('/') {
            Some(0) | None => None,
            Some(idx) => Some(&self.0[..idx]),
        }
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes and confines paths to a fixed root namespace.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: String,
    root_segments: Vec<String>,
    health_path: String,
}

impl PathGuard {
    /// # Errors
    /// `ConfigError::InvalidRoot` unless `root` is an absolute path whose
    /// segments are already in sanitized form; `ConfigError::InvalidHealthSegment`
    /// unless `health_segment` is a single dot-prefixed sanitized segment.
    pub fn new(root: &str, health_segment: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidRoot {
            root: root.to_owned(),
            reason,
        };
        if !root.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        let root_segments: Vec<String> = root[1..].split('/').map(str::to_owned).collect();
        if root_segments.iter().any(String::is_empty) {
            return Err(invalid("must not be '/' or contain empty segments"));
        }
        if root_segments
            .iter()
            .any(|s| s.starts_with('.') || sanitize_segment(s) != *s)
        {
            return Err(invalid("segments must use only [A-Za-z0-9 _.-]"));
        }

        let health_ok = health_segment.len() > 1
            && health_segment.starts_with('.')
            && !health_segment.contains("..")
            && sanitize_segment(health_segment) == health_segment;
        if !health_ok {
            return Err(ConfigError::InvalidHealthSegment {
                segment: health_segment.to_owned(),
            });
        }

        Ok(Self {
            root: root.to_owned(),
            health_path: format!("{root}/{health_segment}"),
            root_segments,
        })
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The root itself as a normalized path.
    #[must_use]
    pub fn root_path(&self) -> NormalizedPath {
        NormalizedPath(self.root.clone())
    }

    /// Diagnostic folder exempt from the dot-segment ban.
    #[must_use]
    pub fn health_path(&self) -> NormalizedPath {
        NormalizedPath(self.health_path.clone())
    }

    /// Rewrite `raw` into a path under the root. Never fails.
    ///
    /// Segments that sanitize to nothing (or to a lone `.`) become `case-<context_id>` when a
    /// context is given, `unnamed-segment` otherwise.
    #[must_use]
    pub fn normalize(&self, raw: &str, context_id: Option<&str>) -> NormalizedPath {
        let unified = raw.replace('\\', "/");
        let unified = unified.trim_start().trim_start_matches('~');

        let mut segments: Vec<&str> = unified
            .split('/')
            .filter(|s| !s.is_empty())
            .filter(|s| !matches!(s.trim(), ".." | "."))
            .collect();

        let rooted = segments.len() >= self.root_segments.len()
            && segments
                .iter()
                .zip(&self.root_segments)
                .all(|(s, r)| *s == r.as_str());
        let mut parts: Vec<String> = Vec::with_capacity(segments.len() + self.root_segments.len());
        if !rooted {
            parts.extend(self.root_segments.iter().cloned());
        }
        let placeholder = placeholder_for(context_id);
        for segment in segments.drain(..) {
            let clean = sanitize_segment(segment);
            parts.push(if clean.is_empty() || clean == "." {
                placeholder.clone()
            } else {
                clean
            });
        }

        let candidate = format!("/{}", parts.join("/"));
        if self.is_within_root(&candidate) && !candidate.contains("..") {
            if candidate != raw {
                tracing::debug!(raw, normalized = %candidate, "path rewritten under root");
            }
            NormalizedPath(candidate)
        } else {
            tracing::debug!(raw, root = %self.root, "path confined to root");
            self.root_path()
        }
    }

    /// Final gate before a backend call.
    ///
    /// Rejects `..`, `~`, NUL, backslashes, double slashes, a trailing slash,
    /// dot segments and characters outside `[A-Za-z0-9 _.-/]`, and anything
    /// not under the root. Paths under the health folder may contain dot
    /// segments but must still be under the root.
    #[must_use]
    pub fn is_acceptable(&self, path: &str) -> bool {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return false;
        }
        if ["..", "~", "//", "\\", "\0"].iter().any(|bad| path.contains(bad)) {
            return false;
        }
        if !self.is_within_root(path) {
            return false;
        }

        let is_health = path == self.health_path
            || path
                .strip_prefix(self.health_path.as_str())
                .is_some_and(|rest| rest.starts_with('/'));
        if !is_health && (path.contains("/.") || path.contains("./")) {
            return false;
        }

        path.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.' | '/'))
    }

    /// Enclosing folder of `path`, if that folder is still under the root.
    #[must_use]
    pub fn parent(&self, path: &NormalizedPath) -> Option<NormalizedPath> {
        path.parent_str()
            .filter(|p| self.is_within_root(p))
            .map(|p| NormalizedPath(p.to_owned()))
    }

    fn is_within_root(&self, path: &str) -> bool {
        path == self.root
            || path
                .strip_prefix(self.root.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn placeholder_for(context_id: Option<&str>) -> String {
    context_id
        .map(sanitize_segment)
        .filter(|id| !id.is_empty())
        .map_or_else(|| GENERIC_PLACEHOLDER.to_owned(), |id| format!("case-{id}"))
}

/// Replace characters outside `[A-Za-z0-9 _.-]` with `_`, collapse runs of
/// `_` and `.`, trim `_` and spaces at both ends.
fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.trim().chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.') {
            c
        } else {
            '_'
        };
        if matches!(c, '_' | '.') && out.ends_with(c) {
            continue;
        }
        out.push(c);
    }
    out.trim_matches(|c| c == '_' || c == ' ').to_owned()
}
