use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use casekit_http::HttpClient;
use casekit_utils::SecretString;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::config::AuthConfig;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::source::{ConnectorSource, CredentialSource, OAuthRefreshSource};
use crate::store::{FileTokenStore, TokenStore};

/// Wall clock used for expiry checks; replaceable in tests.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// Diagnostic view of the broker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// No credential has been loaded or fetched yet.
    Unset,
    Valid,
    /// Expiring within the refresh margin, or invalidated by the backend.
    NearExpiry,
    Refreshing,
    /// The last refresh attempt failed.
    Failed,
}

struct Inner {
    current: ArcSwapOption<Credential>,
    /// Bumped on every installed credential.
    generation: AtomicU64,
    /// `generation + 1` when the credential of that generation was invalidated.
    stale_mark: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshing: AtomicBool,
    /// Completed refresh attempts, successful or not.
    attempts: AtomicU64,
    last_error: Mutex<Option<AuthError>>,
    seeded: AtomicBool,
    sources: Vec<Arc<dyn CredentialSource>>,
    store: Option<Arc<dyn TokenStore>>,
    margin: Duration,
    clock: Clock,
}

/// Owner of the single current bearer credential.
///
/// Reads are lock-free. A credential that is missing, near expiry or
/// invalidated is replaced under a single-flight refresh: callers that
/// arrive while a refresh is running wait for it and share its outcome,
/// including its error.
///
/// `CredentialBroker` is cheap to clone; clones share state.
#[derive(Clone)]
pub struct CredentialBroker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field(
                "sources",
                &self.inner.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Clears the refreshing flag even if the refreshing future is dropped.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CredentialBroker {
    #[must_use]
    pub fn builder() -> CredentialBrokerBuilder {
        CredentialBrokerBuilder::default()
    }

    /// Wire the broker from configuration: OAuth refresh first, connector
    /// second, file token store.
    ///
    /// # Errors
    /// `AuthError::ConfigError` when a configured source is invalid.
    pub fn from_config(config: &AuthConfig, client: &HttpClient) -> Result<Self, AuthError> {
        let mut builder = Self::builder()
            .refresh_margin(config.refresh_margin)
            .store(Arc::new(FileTokenStore::new(&config.token_store)));
        if let Some(oauth) = &config.oauth {
            builder = builder.source(Arc::new(OAuthRefreshSource::new(client.clone(), oauth)?));
        }
        if let Some(connector) = &config.connector {
            builder = builder.source(Arc::new(ConnectorSource::new(client.clone(), connector)?));
        }
        Ok(builder.build())
    }

    /// Current access token, refreshing first when needed.
    ///
    /// # Errors
    /// `AuthError::Unavailable` when no source is configured and nothing
    /// usable is stored; `AuthError::Refresh` when every source failed.
    pub async fn get_token(&self) -> Result<SecretString, AuthError> {
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }

        let observed = self.inner.attempts.load(Ordering::Acquire);
        let _guard = self.inner.refresh_lock.lock().await;

        if let Some(token) = self.usable_token() {
            return Ok(token);
        }
        // A refresh finished while we were queued and still left nothing
        // usable: report its failure instead of hammering the provider again.
        if self.inner.attempts.load(Ordering::Acquire) != observed
            && let Some(err) = self.inner.last_error.lock().clone()
        {
            return Err(err);
        }

        if !self.inner.seeded.swap(true, Ordering::AcqRel) {
            self.seed_from_store().await;
            if let Some(token) = self.usable_token() {
                return Ok(token);
            }
        }

        self.refresh_locked().await
    }

    /// Incremented every time a new credential is installed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Mark the current credential unusable; the next `get_token` refreshes.
    pub fn invalidate(&self) {
        self.invalidate_generation(self.generation());
    }

    /// Invalidate only if `generation` is still current, so a caller holding
    /// an old handle cannot discard a credential that was already replaced.
    pub fn invalidate_generation(&self, generation: u64) {
        if generation == self.generation() {
            tracing::info!(generation, "storage credential invalidated");
            self.inner
                .stale_mark
                .store(generation.wrapping_add(1), Ordering::Release);
        }
    }

    /// Install a credential obtained out of band (e.g. after onboarding).
    pub fn adopt(&self, credential: Credential) {
        self.inner.seeded.store(true, Ordering::Release);
        self.install(credential);
    }

    #[must_use]
    pub fn state(&self) -> BrokerState {
        if self.inner.refreshing.load(Ordering::Acquire) {
            return BrokerState::Refreshing;
        }
        if self.inner.last_error.lock().is_some() {
            return BrokerState::Failed;
        }
        match self.inner.current.load_full() {
            None => BrokerState::Unset,
            Some(c) if self.is_usable(&c) => BrokerState::Valid,
            Some(_) => BrokerState::NearExpiry,
        }
    }

    fn is_usable(&self, credential: &Credential) -> bool {
        let generation = self.generation();
        let invalidated =
            self.inner.stale_mark.load(Ordering::Acquire) == generation.wrapping_add(1);
        !invalidated && !credential.is_near_expiry((self.inner.clock)(), self.inner.margin)
    }

    fn usable_token(&self) -> Option<SecretString> {
        let current = self.inner.current.load_full()?;
        self.is_usable(&current)
            .then(|| current.access_token.clone())
    }

    fn install(&self, credential: Credential) {
        self.inner.current.store(Some(Arc::new(credential)));
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "storage credential installed");
    }

    async fn seed_from_store(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        match store.load().await {
            Ok(Some(credential)) => {
                tracing::debug!("seeded storage credential from token store");
                self.install(credential);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not read token store"),
        }
    }

    /// Must be called with `refresh_lock` held.
    async fn refresh_locked(&self) -> Result<SecretString, AuthError> {
        let result = self.run_sources().await;

        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        *self.inner.last_error.lock() = result.as_ref().err().cloned();
        result
    }

    async fn run_sources(&self) -> Result<SecretString, AuthError> {
        if self.inner.sources.is_empty() {
            return Err(AuthError::Unavailable(
                "no credential source configured".into(),
            ));
        }

        self.inner.refreshing.store(true, Ordering::Release);
        let _refreshing = RefreshingGuard(&self.inner.refreshing);

        let current = self.inner.current.load_full();
        let mut failures = Vec::new();

        for source in &self.inner.sources {
            tracing::info!(source = source.name(), "refreshing storage credential");
            let now = (self.inner.clock)();
            match source.fetch(current.as_deref(), now).await {
                Ok(credential) => {
                    if source.persists()
                        && let Some(store) = &self.inner.store
                        && let Err(e) = store.save(&credential).await
                    {
                        tracing::warn!(error = %e, "could not persist refreshed credential");
                    }
                    let token = credential.access_token.clone();
                    self.install(credential);
                    tracing::info!(
                        source = source.name(),
                        generation = self.generation(),
                        "storage credential refreshed"
                    );
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "credential source failed");
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }

        Err(AuthError::Refresh(failures.join("; ")))
    }
}

/// Builder for [`CredentialBroker`].
pub struct CredentialBrokerBuilder {
    sources: Vec<Arc<dyn CredentialSource>>,
    store: Option<Arc<dyn TokenStore>>,
    margin: Duration,
    clock: Clock,
}

impl Default for CredentialBrokerBuilder {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            store: None,
            margin: Duration::from_secs(60),
            clock: Arc::new(OffsetDateTime::now_utc),
        }
    }
}

impl CredentialBrokerBuilder {
    /// Append a source; sources are tried in insertion order.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn build(self) -> CredentialBroker {
        CredentialBroker {
            inner: Arc::new(Inner {
                current: ArcSwapOption::empty(),
                generation: AtomicU64::new(0),
                stale_mark: AtomicU64::new(0),
                refresh_lock: tokio::sync::Mutex::new(()),
                refreshing: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                last_error: Mutex::new(None),
                seeded: AtomicBool::new(false),
                sources: self.sources,
                store: self.store,
                margin: self.margin,
                clock: self.clock,
            }),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize};

    const T0: i64 = 1_700_000_000;

    /// Scriptable source: issues `tok-<n>` tokens with a one-hour TTL.
    struct FakeSource {
        name: &'static str,
        calls: AtomicUsize,
        fail: AtomicBool,
        persists: bool,
        delay: Duration,
    }

    impl FakeSource {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                persists: true,
                delay: Duration::from_millis(50),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            let s = Self::new(name);
            s.fail.store(true, Ordering::SeqCst);
            s
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialSource for FakeSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn persists(&self) -> bool {
            self.persists
        }

        async fn fetch(
            &self,
            _current: Option<&Credential>,
            now: OffsetDateTime,
        ) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Http(format!("{} HTTP 503", self.name)));
            }
            Ok(Credential::new(SecretString::new(format!("tok-{n}")), now).with_ttl(Some(3600)))
        }
    }

    fn clock() -> (Arc<AtomicI64>, Clock) {
        let secs = Arc::new(AtomicI64::new(T0));
        let handle = Arc::clone(&secs);
        let clock: Clock = Arc::new(move || {
            OffsetDateTime::from_unix_timestamp(handle.load(Ordering::SeqCst)).unwrap()
        });
        (secs, clock)
    }

    fn stored(issued: i64, ttl: u64) -> Credential {
        Credential::new(
            SecretString::new("stored"),
            OffsetDateTime::from_unix_timestamp(issued).unwrap(),
        )
        .with_ttl(Some(ttl))
        .with_refresh_token(Some(SecretString::new("rt")))
    }

    #[tokio::test]
    async fn no_source_is_unavailable() {
        let broker = CredentialBroker::builder().build();
        let err = broker.get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
        assert_eq!(broker.state(), BrokerState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_stored_credential_needs_no_refresh() {
        let source = FakeSource::new("oauth");
        let (_, clock) = clock();
        let broker = CredentialBroker::builder()
            .source(source.clone())
            .store(Arc::new(MemoryTokenStore::with_credential(stored(T0 - 100, 3600))))
            .clock(clock)
            .build();

        assert_eq!(broker.state(), BrokerState::Unset);
        assert_eq!(broker.get_token().await.unwrap().expose(), "stored");
        assert_eq!(source.calls(), 0);
        assert_eq!(broker.state(), BrokerState::Valid);
        assert_eq!(broker.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn near_expiry_triggers_refresh_and_persists() {
        let source = FakeSource::new("oauth");
        let store = Arc::new(MemoryTokenStore::with_credential(stored(T0 - 3_550, 3600)));
        let (_, clock) = clock();
        let broker = CredentialBroker::builder()
            .source(source.clone())
            .store(store.clone())
            .clock(clock)
            .build();

        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-1");
        assert_eq!(source.calls(), 1);
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.access_token.expose(), "tok-1");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let source = FakeSource::new("oauth");
        let (_, clock) = clock();
        let broker = CredentialBroker::builder()
            .source(source.clone())
            .clock(clock)
            .build();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let b = broker.clone();
                tokio::spawn(async move { b.get_token().await })
            })
            .collect();
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap().expose(), "tok-1");
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(broker.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_failure() {
        let source = FakeSource::failing("oauth");
        let broker = CredentialBroker::builder().source(source.clone()).build();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let b = broker.clone();
                tokio::spawn(async move { b.get_token().await })
            })
            .collect();
        for t in tasks {
            assert!(matches!(t.await.unwrap(), Err(AuthError::Refresh(_))));
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(broker.state(), BrokerState::Failed);

        // a later, non-concurrent call tries again
        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-2");
        assert_eq!(broker.state(), BrokerState::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_second_source() {
        let oauth = FakeSource::failing("oauth");
        let connector = FakeSource::new("connector");
        let broker = CredentialBroker::builder()
            .source(oauth.clone())
            .source(connector.clone())
            .build();

        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-1");
        assert_eq!(oauth.calls(), 1);
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_sources_failing_reports_both() {
        let broker = CredentialBroker::builder()
            .source(FakeSource::failing("oauth"))
            .source(FakeSource::failing("connector"))
            .build();

        let err = broker.get_token().await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AuthError::Refresh(_)));
        assert!(msg.contains("oauth: oauth HTTP 503"), "{msg}");
        assert!(msg.contains("connector: connector HTTP 503"), "{msg}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_persisting_source_leaves_store_alone() {
        let connector = Arc::new(FakeSource {
            name: "connector",
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            persists: false,
            delay: Duration::ZERO,
        });
        let store = Arc::new(MemoryTokenStore::new());
        let broker = CredentialBroker::builder()
            .source(connector)
            .store(store.clone())
            .build();

        broker.get_token().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn token_ages_into_refresh() {
        let source = FakeSource::new("oauth");
        let (secs, clock) = clock();
        let broker = CredentialBroker::builder()
            .source(source.clone())
            .clock(clock)
            .build();

        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-1");
        secs.fetch_add(3_540, Ordering::SeqCst);
        assert_eq!(broker.state(), BrokerState::Valid);
        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-1");
        secs.fetch_add(1, Ordering::SeqCst);
        assert_eq!(broker.state(), BrokerState::NearExpiry);
        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refresh_once() {
        let source = FakeSource::new("oauth");
        let broker = CredentialBroker::builder().source(source.clone()).build();

        broker.get_token().await.unwrap();
        let old_generation = broker.generation();
        broker.invalidate();
        assert_eq!(broker.state(), BrokerState::NearExpiry);
        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-2");

        // a stale handle reporting the old generation must not discard tok-2
        broker.invalidate_generation(old_generation);
        assert_eq!(broker.get_token().await.unwrap().expose(), "tok-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn adopt_installs_without_fetching() {
        let source = FakeSource::new("oauth");
        let broker = CredentialBroker::builder().source(source.clone()).build();
        broker.adopt(
            Credential::new(SecretString::new("onboarded"), OffsetDateTime::now_utc())
                .with_ttl(Some(14_400)),
        );
        assert_eq!(broker.get_token().await.unwrap().expose(), "onboarded");
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn debug_lists_sources_not_tokens() {
        let broker = CredentialBroker::builder()
            .source(FakeSource::new("oauth"))
            .build();
        broker.adopt(Credential::new(
            SecretString::new("sl.secret"),
            OffsetDateTime::now_utc(),
        ));
        let dbg = format!("{broker:?}");
        assert!(dbg.contains("oauth"));
        assert!(!dbg.contains("sl.secret"));
    }
}
