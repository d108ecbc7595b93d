//! Session key/value persistence.
//!
//! [`SessionStore`] is the injected persistence capability: string values
//! addressed by namespace name, exactly like browser session storage.
//! [`NamespaceStore`] layers a typed `key -> value` map on top of one
//! namespace and owns the read-merge-write discipline.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::lock::mutex_lock;
use super::namespace::Namespace;

const SOURCE: &str = "cache::store";
const METRIC_STORE_WRITE_FAILURE: &str = "pitlane_store_write_failure_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("quota exceeded writing `{namespace}`: {needed} bytes over a {quota} byte quota")]
    QuotaExceeded {
        namespace: String,
        needed: usize,
        quota: usize,
    },
    #[error("invalid namespace name `{0}`")]
    InvalidNamespace(String),
}

/// Namespace-partitioned string storage scoped to one session.
pub trait SessionStore: Send + Sync {
    /// Returns the serialized namespace, or `None` if it was never written.
    fn get_item(&self, namespace: &str) -> Result<Option<String>, StoreError>;

    fn set_item(&self, namespace: &str, value: &str) -> Result<(), StoreError>;

    fn remove_item(&self, namespace: &str) -> Result<(), StoreError>;

    /// Drops every namespace. Called when the session ends.
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-process session store.
///
/// An optional byte quota mimics the storage limits browsers enforce; a write
/// that would push the total over the quota is rejected.
#[derive(Default)]
pub struct MemoryStore {
    items: DashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes held across namespaces (names included).
    pub fn used_bytes(&self) -> usize {
        self.items
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("namespaces", &self.items.len())
            .field("quota_bytes", &self.quota_bytes)
            .finish()
    }
}

impl SessionStore for MemoryStore {
    fn get_item(&self, namespace: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.get(namespace).map(|entry| entry.value().clone()))
    }

    fn set_item(&self, namespace: &str, value: &str) -> Result<(), StoreError> {
        if let Some(quota) = self.quota_bytes {
            let existing = self
                .items
                .get(namespace)
                .map(|entry| namespace.len() + entry.value().len())
                .unwrap_or(0);
            let needed = self.used_bytes() - existing + namespace.len() + value.len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded {
                    namespace: namespace.to_string(),
                    needed,
                    quota,
                });
            }
        }
        self.items.insert(namespace.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, namespace: &str) -> Result<(), StoreError> {
        self.items.remove(namespace);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.items.clear();
        Ok(())
    }
}

/// Session-wide cache handle: the injected backend plus one write lock per
/// namespace, shared by every [`NamespaceStore`] created from it.
#[derive(Clone)]
pub struct SessionCache {
    backend: Arc<dyn SessionStore>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionCache {
    pub fn new(backend: Arc<dyn SessionStore>) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// In-memory cache, mostly useful for tests and non-persistent sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn backend(&self) -> &Arc<dyn SessionStore> {
        &self.backend
    }

    pub fn namespace<V>(&self, namespace: Namespace) -> NamespaceStore<V>
    where
        V: Serialize + DeserializeOwned,
    {
        let write_lock = self
            .locks
            .entry(namespace.name().to_string())
            .or_default()
            .clone();
        NamespaceStore {
            namespace,
            backend: Arc::clone(&self.backend),
            write_lock,
            _value: PhantomData,
        }
    }

    /// Drops every namespace; used on logout.
    pub fn clear(&self) {
        match self.backend.clear() {
            Ok(()) => debug!("Session cache cleared"),
            Err(err) => warn!(error = %err, result = "swallowed", "Session cache clear failed"),
        }
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("namespaces", &self.locks.len())
            .finish()
    }
}

/// Typed view of one namespace.
///
/// Reads never fail: an absent or corrupt namespace reads as an empty map.
/// Writes never fail either: persistence errors are logged and counted, and
/// the caller's in-memory state stays authoritative for the session.
pub struct NamespaceStore<V> {
    namespace: Namespace,
    backend: Arc<dyn SessionStore>,
    write_lock: Arc<Mutex<()>>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for NamespaceStore<V> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            backend: Arc::clone(&self.backend),
            write_lock: Arc::clone(&self.write_lock),
            _value: PhantomData,
        }
    }
}

impl<V> NamespaceStore<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Reads the whole namespace, skipping entries that no longer decode as `V`.
    pub fn read(&self) -> BTreeMap<String, V> {
        self.read_raw()
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(decoded) => Some((key, decoded)),
                Err(err) => {
                    warn!(
                        namespace = %self.namespace,
                        key = %key,
                        error = %err,
                        "Skipping undecodable cache entry"
                    );
                    None
                }
            })
            .collect()
    }

    /// Replaces the namespace with `entries`.
    pub fn write(&self, entries: &BTreeMap<String, V>) {
        let _guard = mutex_lock(&self.write_lock, SOURCE, "write");
        let raw = entries
            .iter()
            .filter_map(|(key, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect();
        self.persist(&raw);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.read_raw().remove(key)?;
        serde_json::from_value(value).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_raw().contains_key(key)
    }

    /// Merges `{key: value}` into the namespace, leaving other keys untouched.
    pub fn put(&self, key: &str, value: &V) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(
                    namespace = %self.namespace,
                    key,
                    error = %err,
                    "Cache value failed to serialize"
                );
                return;
            }
        };

        let _guard = mutex_lock(&self.write_lock, SOURCE, "put");
        let mut entries = self.read_raw();
        entries.insert(key.to_string(), encoded);
        self.persist(&entries);
    }

    pub fn remove(&self, key: &str) {
        let _guard = mutex_lock(&self.write_lock, SOURCE, "remove");
        let mut entries = self.read_raw();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    pub fn clear(&self) {
        let _guard = mutex_lock(&self.write_lock, SOURCE, "clear");
        if let Err(err) = self.backend.remove_item(self.namespace.name()) {
            self.record_failure("clear", &err);
        }
    }

    fn read_raw(&self) -> BTreeMap<String, Value> {
        let serialized = match self.backend.get_item(self.namespace.name()) {
            Ok(Some(serialized)) => serialized,
            Ok(None) => return BTreeMap::new(),
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "Cache namespace read failed");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&serialized) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    namespace = %self.namespace,
                    error = %err,
                    "Discarding corrupt cache namespace"
                );
                BTreeMap::new()
            }
        }
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) {
        let serialized = match serde_json::to_string(entries) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "Cache namespace failed to serialize");
                return;
            }
        };

        match self.backend.set_item(self.namespace.name(), &serialized) {
            Ok(()) => debug!(
                namespace = %self.namespace,
                entries = entries.len(),
                bytes = serialized.len(),
                "Cache namespace persisted"
            ),
            Err(err) => self.record_failure("write", &err),
        }
    }

    fn record_failure(&self, op: &'static str, err: &StoreError) {
        counter!(METRIC_STORE_WRITE_FAILURE, "namespace" => self.namespace.to_string())
            .increment(1);
        warn!(
            op,
            namespace = %self.namespace,
            error = %err,
            result = "swallowed",
            "Cache persistence failed"
        );
    }
}
