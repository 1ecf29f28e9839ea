//! In-memory storage backend for gateway tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use casekit_auth::{AuthError, Credential, CredentialBroker, CredentialSource, MemoryTokenStore};
use casekit_utils::SecretString;
use chrono::Utc;
use parking_lot::Mutex;
use storage_gateway::{
    AccountInfo, BackendConnector, ClassifiedError, GatewayConfig, StorageBackend, StorageGateway,
};
use storage_gateway_sdk::{Entry, EntryKind, FileContent, HighlightSpan, SearchMatch};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Download,
    Upload,
    CreateFolder,
    Delete,
    Metadata,
    Search,
    Account,
}

#[derive(Clone)]
struct Node {
    display: String,
    /// `None` for folders.
    bytes: Option<Bytes>,
}

#[derive(Default)]
struct State {
    /// Keyed by lowercase path.
    nodes: BTreeMap<String, Node>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, VecDeque<ClassifiedError>>,
    tokens: Vec<String>,
}

/// Shared backing store; every handle built by [`FakeConnector`] sees it.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    latency: Mutex<Duration>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_folder(self: &Arc<Self>, path: &str) -> Arc<Self> {
        self.state.lock().nodes.insert(
            path.to_lowercase(),
            Node {
                display: path.to_owned(),
                bytes: None,
            },
        );
        Arc::clone(self)
    }

    pub fn with_file(self: &Arc<Self>, path: &str, body: &str) -> Arc<Self> {
        self.state.lock().nodes.insert(
            path.to_lowercase(),
            Node {
                display: path.to_owned(),
                bytes: Some(Bytes::from(body.to_owned())),
            },
        );
        Arc::clone(self)
    }

    /// Every backend call sleeps this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// The next calls of `op` fail with these errors, in order.
    pub fn fail(&self, op: Op, errors: Vec<ClassifiedError>) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .extend(errors);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Bearer tokens seen, one per call.
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().tokens.clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(&path.to_lowercase())
    }

    async fn enter(&self, op: Op, token: &str) -> Result<(), ClassifiedError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        state.tokens.push(token.to_owned());
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn entry_of(node: &Node) -> Entry {
    let name = node.display.rsplit('/').next().unwrap_or_default().to_owned();
    match &node.bytes {
        Some(bytes) => Entry {
            name,
            path: node.display.clone(),
            kind: EntryKind::File,
            size: Some(u64::try_from(bytes.len()).unwrap()),
            modified_at: Some(Utc::now()),
            id: Some(format!("id:{}", node.display.len())),
        },
        None => Entry {
            name,
            path: node.display.clone(),
            kind: EntryKind::Folder,
            size: None,
            modified_at: None,
            id: None,
        },
    }
}

fn parent_key(key: &str) -> &str {
    key.rfind('/').map_or("", |idx| &key[..idx])
}

fn not_found(path: &str) -> ClassifiedError {
    ClassifiedError::new(Some(404), "not_found", format!("path/not_found/ {path}"))
}

pub struct FakeBackend {
    store: Arc<FakeStore>,
    token: String,
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn list_folder(&self, path: &str) -> Result<Vec<Entry>, ClassifiedError> {
        self.store.enter(Op::List, &self.token).await?;
        let state = self.store.state.lock();
        let key = path.to_lowercase();
        if !state.nodes.get(&key).is_some_and(|n| n.bytes.is_none()) {
            return Err(not_found(path));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(k, _)| parent_key(k) == key)
            .map(|(_, n)| entry_of(n))
            .collect())
    }

    async fn download(&self, path: &str) -> Result<FileContent, ClassifiedError> {
        self.store.enter(Op::Download, &self.token).await?;
        let state = self.store.state.lock();
        let node = state
            .nodes
            .get(&path.to_lowercase())
            .ok_or_else(|| not_found(path))?;
        let bytes = node.bytes.clone().ok_or_else(|| not_found(path))?;
        Ok(FileContent {
            bytes,
            metadata: entry_of(node),
        })
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<Entry, ClassifiedError> {
        self.store.enter(Op::Upload, &self.token).await?;
        let mut state = self.store.state.lock();
        let key = path.to_lowercase();
        if !overwrite && state.nodes.contains_key(&key) {
            return Err(ClassifiedError::new(
                Some(409),
                "conflict",
                "path/conflict/file/..",
            ));
        }
        let node = Node {
            display: path.to_owned(),
            bytes: Some(bytes),
        };
        let entry = entry_of(&node);
        state.nodes.insert(key, node);
        Ok(entry)
    }

    async fn create_folder(&self, path: &str) -> Result<Entry, ClassifiedError> {
        self.store.enter(Op::CreateFolder, &self.token).await?;
        let mut state = self.store.state.lock();
        let key = path.to_lowercase();
        if state.nodes.contains_key(&key) {
            return Err(ClassifiedError::new(
                Some(409),
                "conflict",
                "path/conflict/folder/..",
            ));
        }
        // intermediate folders are created implicitly
        let mut prefix = String::new();
        for segment in path.trim_start_matches('/').split('/') {
            prefix.push('/');
            prefix.push_str(segment);
            state
                .nodes
                .entry(prefix.to_lowercase())
                .or_insert_with(|| Node {
                    display: prefix.clone(),
                    bytes: None,
                });
        }
        Ok(entry_of(&Node {
            display: path.to_owned(),
            bytes: None,
        }))
    }

    async fn delete(&self, path: &str) -> Result<(), ClassifiedError> {
        self.store.enter(Op::Delete, &self.token).await?;
        let mut state = self.store.state.lock();
        let key = path.to_lowercase();
        if !state.nodes.contains_key(&key) {
            return Err(not_found(path));
        }
        let below = format!("{key}/");
        state
            .nodes
            .retain(|k, _| k != &key && !k.starts_with(&below));
        Ok(())
    }

    async fn get_metadata(&self, path: &str) -> Result<Entry, ClassifiedError> {
        self.store.enter(Op::Metadata, &self.token).await?;
        let state = self.store.state.lock();
        state
            .nodes
            .get(&path.to_lowercase())
            .map(entry_of)
            .ok_or_else(|| not_found(path))
    }

    async fn search(
        &self,
        query: &str,
        scope: &str,
        max_results: u32,
    ) -> Result<Vec<SearchMatch>, ClassifiedError> {
        self.store.enter(Op::Search, &self.token).await?;
        let state = self.store.state.lock();
        let scope = format!("{}/", scope.to_lowercase());
        let needle = query.to_lowercase();
        Ok(state
            .nodes
            .iter()
            .filter(|(k, _)| k.starts_with(&scope))
            .filter(|(k, _)| k.rsplit('/').next().is_some_and(|n| n.contains(&needle)))
            .take(usize::try_from(max_results).unwrap())
            .map(|(_, n)| SearchMatch {
                entry: entry_of(n),
                highlights: vec![HighlightSpan {
                    text: query.to_owned(),
                    is_highlighted: true,
                }],
            })
            .collect())
    }

    async fn current_account(&self) -> Result<AccountInfo, ClassifiedError> {
        self.store.enter(Op::Account, &self.token).await?;
        Ok(AccountInfo {
            account_id: "dbid:AAH4f99".into(),
            display_name: "Kancelaria".into(),
            email: Some("office@example.com".into()),
        })
    }
}

pub struct FakeConnector {
    store: Arc<FakeStore>,
}

impl BackendConnector for FakeConnector {
    fn connect(&self, token: SecretString) -> Arc<dyn StorageBackend> {
        Arc::new(FakeBackend {
            store: Arc::clone(&self.store),
            token: token.expose().to_owned(),
        })
    }
}

/// Hands out `sl.refreshed-<n>` tokens.
#[derive(Default)]
pub struct CountingSource {
    issued: Mutex<u32>,
}

#[async_trait]
impl CredentialSource for CountingSource {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn fetch(
        &self,
        _current: Option<&Credential>,
        now: OffsetDateTime,
    ) -> Result<Credential, AuthError> {
        let mut issued = self.issued.lock();
        *issued += 1;
        Ok(Credential::new(
            SecretString::new(format!("sl.refreshed-{issued}")),
            now,
        )
        .with_ttl(Some(14_400)))
    }
}

pub fn credential(token: &str) -> Credential {
    Credential::new(SecretString::new(token), OffsetDateTime::now_utc()).with_ttl(Some(14_400))
}

pub fn broker_with(token: &str) -> CredentialBroker {
    CredentialBroker::builder()
        .store(Arc::new(MemoryTokenStore::with_credential(credential(token))))
        .source(Arc::new(CountingSource::default()))
        .build()
}

pub fn gateway(store: &Arc<FakeStore>) -> StorageGateway {
    gateway_with(store, &GatewayConfig::default(), broker_with("sl.initial"))
}

pub fn gateway_with(
    store: &Arc<FakeStore>,
    config: &GatewayConfig,
    broker: CredentialBroker,
) -> StorageGateway {
    let connector = Arc::new(FakeConnector {
        store: Arc::clone(store),
    });
    StorageGateway::new(config, broker, connector).unwrap()
}
