//! Persistence for the current credential.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use casekit_utils::SecretString;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::credential::Credential;
use crate::error::AuthError;

/// Where the broker keeps the credential between process runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// # Errors
    /// `AuthError::Store` when the store exists but cannot be read.
    async fn load(&self) -> Result<Option<Credential>, AuthError>;

    /// # Errors
    /// `AuthError::Store` when the credential cannot be written.
    async fn save(&self, credential: &Credential) -> Result<(), AuthError>;

    /// # Errors
    /// `AuthError::Store` when the stored credential cannot be removed.
    async fn clear(&self) -> Result<(), AuthError>;
}

/// On-disk document. Timestamps are unix seconds.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredTokens {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refreshed_at: Option<i64>,
}

impl StoredTokens {
    fn from_credential(c: &Credential) -> Self {
        Self {
            access_token: c.access_token.expose().to_owned(),
            refresh_token: c.refresh_token.as_ref().map(|t| t.expose().to_owned()),
            expires_in: c.ttl_seconds,
            created_at: c.issued_at.unix_timestamp(),
            refreshed_at: c.refreshed_at.map(OffsetDateTime::unix_timestamp),
        }
    }

    fn to_credential(&self) -> Result<Credential, AuthError> {
        let ts = |secs: i64| {
            OffsetDateTime::from_unix_timestamp(secs)
                .map_err(|e| AuthError::Store(format!("invalid timestamp {secs}: {e}")))
        };
        Ok(Credential {
            access_token: SecretString::new(self.access_token.as_str()),
            refresh_token: self.refresh_token.as_deref().map(SecretString::new),
            issued_at: ts(self.created_at)?,
            ttl_seconds: self.expires_in,
            refreshed_at: self.refreshed_at.map(ts).transpose()?,
        })
    }
}

/// JSON file store, e.g. `data/dropbox.json`.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash never leaves a half-written document behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_err(action: &str, path: &Path, e: &std::io::Error) -> AuthError {
    AuthError::Store(format!("failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => zeroize::Zeroizing::new(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", &self.path, &e)),
        };
        let stored: StoredTokens = serde_json::from_slice(&raw)
            .map_err(|e| AuthError::Store(format!("malformed token file: {e}")))?;
        stored.to_credential().map(Some)
    }

    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create", parent, &e))?;
        }

        let doc = StoredTokens::from_credential(credential);
        let bytes = zeroize::Zeroizing::new(
            serde_json::to_vec_pretty(&doc)
                .map_err(|e| AuthError::Store(format!("failed to encode tokens: {e}")))?,
        );

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes.as_slice())
            .await
            .map_err(|e| io_err("write", &tmp, &e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| io_err("chmod", &tmp, &e))?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err("replace", &self.path, &e))?;

        tracing::debug!(path = %self.path.display(), "token store updated");
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove", &self.path, &e)),
        }
    }
}

/// Process-local store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.slot.lock().take();
        Ok(())
    }
}
