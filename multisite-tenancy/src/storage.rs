//! Per-tenant content storage
//!
//! Each tenant instance exclusively owns one [`ContentRepository`], opened by
//! a [`StorageProvider`] for the tenant's storage namespace. Content is a set
//! of typed pieces: JSON objects grouped by a piece type and keyed by `_id`.
//!
//! The in-memory provider keeps namespace data alive across open/close so a
//! rebuilt instance sees what its predecessor wrote.

use crate::TenantError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Field holding a piece's identifier
pub const ID_FIELD: &str = "_id";

/// Equality filter over piece fields
///
/// A criterion on an array field matches when the array contains the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceQuery {
    criteria: Vec<(String, Value)>,
}

impl PieceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn matches(&self, piece: &Value) -> bool {
        self.criteria.iter().all(|(field, expected)| match piece.get(field) {
            Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
            Some(actual) => actual == expected,
            None => expected.is_null(),
        })
    }
}

/// Generic content store for one tenant
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Storage namespace this handle is bound to
    fn namespace(&self) -> &str;

    /// Pieces of `piece_type` matching `query`
    async fn find(&self, piece_type: &str, query: &PieceQuery) -> Result<Vec<Value>, TenantError>;

    /// Insert a piece; an `_id` is generated when absent
    async fn insert(&self, piece_type: &str, piece: Value) -> Result<Value, TenantError>;

    /// Replace the piece with the same `_id`
    async fn update(&self, piece_type: &str, piece: Value) -> Result<Value, TenantError>;

    /// Remove a piece, returning whether it existed
    async fn remove(&self, piece_type: &str, id: &str) -> Result<bool, TenantError>;

    /// Release the handle. Further calls fail.
    async fn close(&self) -> Result<(), TenantError>;

    fn is_closed(&self) -> bool;
}

/// Opens content repositories by namespace
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn ContentRepository>, TenantError>;
}

/// Pick a provider for a `storage_url`.
///
/// Only `memory://` is built in; other backends plug in through
/// [`StorageProvider`].
pub fn provider_for_url(url: &str) -> Result<Arc<dyn StorageProvider>, TenantError> {
    match url.split_once("://") {
        Some(("memory", _)) => Ok(Arc::new(InMemoryStorageProvider::new())),
        _ => Err(TenantError::Storage(format!(
            "unsupported storage url: {}",
            url
        ))),
    }
}

type NamespaceData = Arc<RwLock<HashMap<String, Vec<Value>>>>;

#[derive(Debug, Default)]
struct ProviderState {
    namespaces: HashMap<String, NamespaceData>,
    opens: HashMap<String, usize>,
    open_handles: HashMap<String, usize>,
    failing: HashSet<String>,
    query_delays: HashMap<String, Duration>,
}

/// In-memory storage provider
///
/// Supports failure injection and artificial open and query delays for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorageProvider {
    state: Arc<Mutex<ProviderState>>,
    open_delay: Option<Duration>,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `open`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Make `open` fail for `namespace` until [`heal`](Self::heal) is called
    pub fn fail_namespace(&self, namespace: &str) {
        self.state.lock().failing.insert(namespace.to_string());
    }

    pub fn heal(&self, namespace: &str) {
        self.state.lock().failing.remove(namespace);
    }

    /// Sleep this long inside every `find` against `namespace`
    pub fn delay_queries(&self, namespace: &str, delay: Duration) {
        self.state
            .lock()
            .query_delays
            .insert(namespace.to_string(), delay);
    }

    /// How many times `namespace` has been opened
    pub fn open_count(&self, namespace: &str) -> usize {
        self.state.lock().opens.get(namespace).copied().unwrap_or(0)
    }

    /// Handles for `namespace` that are open right now
    pub fn open_handles(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .open_handles
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.keys().cloned().collect()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn ContentRepository>, TenantError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let data = {
            let mut state = self.state.lock();
            if state.failing.contains(namespace) {
                return Err(TenantError::Storage(format!(
                    "cannot open namespace {}",
                    namespace
                )));
            }
            *state.opens.entry(namespace.to_string()).or_default() += 1;
            *state.open_handles.entry(namespace.to_string()).or_default() += 1;
            state
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .clone()
        };

        debug!(namespace, "opened in-memory content repository");

        Ok(Arc::new(InMemoryContentRepository {
            namespace: namespace.to_string(),
            data,
            closed: AtomicBool::new(false),
            provider: self.state.clone(),
        }))
    }
}

/// Handle returned by [`InMemoryStorageProvider`]
#[derive(Debug)]
pub struct InMemoryContentRepository {
    namespace: String,
    data: NamespaceData,
    closed: AtomicBool,
    provider: Arc<Mutex<ProviderState>>,
}

impl InMemoryContentRepository {
    fn ensure_open(&self) -> Result<(), TenantError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TenantError::Storage(format!(
                "repository {} is closed",
                self.namespace
            )));
        }
        Ok(())
    }
}

fn piece_id(piece: &Value) -> Option<&str> {
    piece.get(ID_FIELD).and_then(Value::as_str)
}

fn as_object(piece: Value) -> Result<Map<String, Value>, TenantError> {
    match piece {
        Value::Object(map) => Ok(map),
        _ => Err(TenantError::Invalid("piece must be a JSON object".to_string())),
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn find(&self, piece_type: &str, query: &PieceQuery) -> Result<Vec<Value>, TenantError> {
        let delay = self.provider.lock().query_delays.get(&self.namespace).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        let data = self.data.read();
        Ok(data
            .get(piece_type)
            .map(|pieces| pieces.iter().filter(|p| query.matches(p)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, piece_type: &str, piece: Value) -> Result<Value, TenantError> {
        self.ensure_open()?;
        let mut map = as_object(piece)?;
        if !map.get(ID_FIELD).is_some_and(Value::is_string) {
            map.insert(
                ID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        let piece = Value::Object(map);

        let mut data = self.data.write();
        let pieces = data.entry(piece_type.to_string()).or_default();
        if pieces.iter().any(|p| piece_id(p) == piece_id(&piece)) {
            return Err(TenantError::Storage(format!(
                "{} piece {} already exists",
                piece_type,
                piece_id(&piece).unwrap_or_default()
            )));
        }
        pieces.push(piece.clone());
        Ok(piece)
    }

    async fn update(&self, piece_type: &str, piece: Value) -> Result<Value, TenantError> {
        self.ensure_open()?;
        let id = piece_id(&piece)
            .ok_or_else(|| TenantError::Invalid("piece has no _id".to_string()))?
            .to_string();
        let piece = Value::Object(as_object(piece)?);

        let mut data = self.data.write();
        let slot = data
            .get_mut(piece_type)
            .and_then(|pieces| pieces.iter_mut().find(|p| piece_id(p) == Some(id.as_str())))
            .ok_or_else(|| TenantError::NotFound(format!("{} {}", piece_type, id)))?;
        *slot = piece.clone();
        Ok(piece)
    }

    async fn remove(&self, piece_type: &str, id: &str) -> Result<bool, TenantError> {
        self.ensure_open()?;
        let mut data = self.data.write();
        let Some(pieces) = data.get_mut(piece_type) else {
            return Ok(false);
        };
        let before = pieces.len();
        pieces.retain(|p| piece_id(p) != Some(id));
        Ok(pieces.len() != before)
    }

    async fn close(&self) -> Result<(), TenantError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.provider.lock();
            if let Some(handles) = state.open_handles.get_mut(&self.namespace) {
                *handles = handles.saturating_sub(1);
            }
            debug!(namespace = %self.namespace, "closed in-memory content repository");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
