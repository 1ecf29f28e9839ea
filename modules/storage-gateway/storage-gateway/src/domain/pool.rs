//! Backend handle reuse.

use std::sync::Arc;
use std::time::Duration;

use casekit_auth::{AuthError, CredentialBroker};
use parking_lot::Mutex;
use storage_gateway_sdk::StorageError;
use tokio::time::Instant;

use super::ports::{BackendConnector, StorageBackend};

/// A backend handle plus the credential generation it was built from.
#[derive(Clone)]
pub struct ClientHandle {
    backend: Arc<dyn StorageBackend>,
    generation: u64,
}

impl ClientHandle {
    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct CachedClient {
    handle: ClientHandle,
    expires_at: Instant,
}

/// Map credential failures into the public taxonomy.
#[must_use]
pub fn auth_error(err: AuthError) -> StorageError {
    match err {
        AuthError::Unavailable(message) | AuthError::NotConnected(message) => {
            StorageError::AuthUnavailable { message }
        }
        other => StorageError::AuthRefresh {
            message: other.to_string(),
        },
    }
}

/// Caches one backend handle for a fixed window.
///
/// The handle is rebuilt when the window lapses or the broker installed a
/// different credential. The pool never retries; failures go to the caller.
pub struct ClientPool {
    broker: CredentialBroker,
    connector: Arc<dyn BackendConnector>,
    ttl: Duration,
    cached: Mutex<Option<CachedClient>>,
}

impl ClientPool {
    #[must_use]
    pub fn new(broker: CredentialBroker, connector: Arc<dyn BackendConnector>, ttl: Duration) -> Self {
        Self {
            broker,
            connector,
            ttl,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    /// A handle bound to the current credential.
    ///
    /// Always consults the broker first so a credential nearing expiry is
    /// refreshed even while a handle is cached.
    ///
    /// # Errors
    /// `AuthUnavailable` or `AuthRefresh` when no credential can be obtained.
    pub async fn get_client(&self) -> Result<ClientHandle, StorageError> {
        let token = self.broker.get_token().await.map_err(auth_error)?;
        let generation = self.broker.generation();
        let now = Instant::now();

        let mut cached = self.cached.lock();
        if let Some(c) = cached.as_ref()
            && c.expires_at > now
            && c.handle.generation == generation
        {
            return Ok(c.handle.clone());
        }

        tracing::debug!(generation, "building storage backend handle");
        let handle = ClientHandle {
            backend: self.connector.connect(token),
            generation,
        };
        *cached = Some(CachedClient {
            handle: handle.clone(),
            expires_at: now + self.ttl,
        });
        Ok(handle)
    }

    /// The backend rejected the credential behind `handle`: drop the handle
    /// and make the broker refresh on next use.
    pub fn reject(&self, handle: &ClientHandle) {
        self.broker.invalidate_generation(handle.generation);
        let mut cached = self.cached.lock();
        if cached
            .as_ref()
            .is_some_and(|c| c.handle.generation == handle.generation)
        {
            *cached = None;
        }
    }
}
