//! Read-through lookup engine.
//!
//! A [`LookupEngine`] binds one namespace to one fetch capability. Each call
//! to [`LookupEngine::lookup`] creates a [`Lookup`] instance: the reactive
//! `{status, value}` binding of one consumer to one key.
//!
//! Instance lifecycle:
//!
//! 1. A locally resolvable key is `Success` immediately.
//! 2. A cached key is `Success` immediately unless the instance was created
//!    with `refetch`.
//! 3. Otherwise, if the fetcher is ready for the key, the instance goes
//!    `Loading`, fetches under a fresh token and commits the result to both
//!    the namespace and its own state. A fetcher that is not ready leaves the
//!    instance `Loading` with no request.
//!
//! Results are committed only while the token that started them is still the
//! instance's live token. Key changes and drops cancel the token, so a late
//! response can never land in a newer state.

use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::cancel::{CancelSlot, CancelToken};
use super::config::RefetchFailurePolicy;
use super::fetch::{CacheValue, FetchError, Fetcher};
use super::lock::mutex_lock;
use super::namespace::Namespace;
use super::state::{LookupState, LookupStatus};
use super::store::{NamespaceStore, SessionCache};

const SOURCE: &str = "cache::lookup";
const METRIC_LOOKUP_HIT: &str = "pitlane_lookup_hit_total";
const METRIC_LOOKUP_MISS: &str = "pitlane_lookup_miss_total";
const METRIC_LOOKUP_DISCARD: &str = "pitlane_lookup_discard_total";
const METRIC_LOOKUP_ERROR: &str = "pitlane_lookup_error_total";

/// Namespace + fetch capability + failure policy for one entity type.
pub struct LookupEngine<V> {
    store: NamespaceStore<V>,
    fetcher: Arc<dyn Fetcher<V>>,
    policy: RefetchFailurePolicy,
}

impl<V> Clone for LookupEngine<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            policy: self.policy,
        }
    }
}

impl<V: CacheValue> LookupEngine<V> {
    pub fn new(cache: &SessionCache, namespace: Namespace, fetcher: impl Fetcher<V>) -> Self {
        Self::from_shared(cache, namespace, Arc::new(fetcher))
    }

    pub fn from_shared(
        cache: &SessionCache,
        namespace: Namespace,
        fetcher: Arc<dyn Fetcher<V>>,
    ) -> Self {
        Self {
            store: cache.namespace(namespace),
            fetcher,
            policy: RefetchFailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RefetchFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        self.store.namespace()
    }

    pub fn policy(&self) -> RefetchFailurePolicy {
        self.policy
    }

    pub fn store(&self) -> &NamespaceStore<V> {
        &self.store
    }

    pub fn cached(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    pub fn invalidate(&self, key: &str) {
        self.store.remove(key);
    }

    /// Whether `key` is answered without cache or network.
    pub fn resolves_locally(&self, key: &str) -> bool {
        self.fetcher.resolve_locally(key).is_some()
    }

    /// Creates a lookup instance bound to `key`.
    ///
    /// Must be called from within a Tokio runtime: a cache miss spawns the
    /// fetch as a task.
    pub fn lookup(&self, key: impl Into<String>, refetch: bool) -> Lookup<V> {
        let key = key.into();
        let (state, _) = watch::channel(LookupState::default());
        let core = Arc::new(LookupCore {
            engine: self.clone(),
            refetch,
            key: Mutex::new(key.clone()),
            slot: CancelSlot::new(),
            state,
        });
        core.start(key);
        Lookup { core }
    }

    /// Fetches `key` outside of any instance and writes the namespace on
    /// success, unless `token` died first.
    pub async fn revalidate(&self, key: &str, token: &CancelToken) -> Result<V, FetchError> {
        if let Some(value) = self.fetcher.resolve_locally(key) {
            return Ok(value);
        }
        if !self.fetcher.ready(key) {
            return Err(FetchError::Precondition(format!(
                "`{}` is not ready for key `{key}`",
                self.namespace()
            )));
        }

        let value = self.fetcher.fetch(key, token).await?;
        if !token.is_live() {
            self.record_discard(key, token);
            return Err(FetchError::Cancelled);
        }
        self.store.put(key, &value);
        Ok(value)
    }

    fn record_discard(&self, key: &str, token: &CancelToken) {
        counter!(METRIC_LOOKUP_DISCARD, "namespace" => self.namespace().to_string()).increment(1);
        debug!(
            namespace = %self.namespace(),
            key,
            token = token.id(),
            result = "discarded",
            "Superseded fetch result dropped"
        );
    }
}

/// State shared between a [`Lookup`] handle and the tasks it spawns.
pub(crate) struct LookupCore<V> {
    engine: LookupEngine<V>,
    refetch: bool,
    key: Mutex<String>,
    slot: CancelSlot,
    state: watch::Sender<LookupState<V>>,
}

impl<V: CacheValue> LookupCore<V> {
    fn start(self: &Arc<Self>, key: String) {
        let engine = &self.engine;

        if let Some(value) = engine.fetcher.resolve_locally(&key) {
            self.slot.cancel();
            debug!(namespace = %engine.namespace(), key, "Lookup resolved locally");
            self.state.send_replace(LookupState::success(value));
            return;
        }

        let cached = engine.store.get(&key);
        if let Some(value) = cached.clone().filter(|_| !self.refetch) {
            self.slot.cancel();
            counter!(METRIC_LOOKUP_HIT, "namespace" => engine.namespace().to_string())
                .increment(1);
            debug!(namespace = %engine.namespace(), key, result = "hit", "Lookup served from cache");
            self.state.send_replace(LookupState::success(value));
            return;
        }

        if !engine.fetcher.ready(&key) {
            self.slot.cancel();
            debug!(
                namespace = %engine.namespace(),
                key,
                result = "precondition",
                "Lookup waiting for its precondition"
            );
            self.state.send_replace(LookupState::loading(cached));
            return;
        }

        if cached.is_none() {
            counter!(METRIC_LOOKUP_MISS, "namespace" => engine.namespace().to_string())
                .increment(1);
        }
        self.spawn_fetch(key, cached);
    }

    fn spawn_fetch(self: &Arc<Self>, key: String, shown: Option<V>) {
        let token = self.slot.begin();
        debug!(
            namespace = %self.engine.namespace(),
            key,
            token = token.id(),
            revalidating = shown.is_some(),
            "Lookup fetch started"
        );
        self.state.send_replace(LookupState::loading(shown));

        let core = Arc::clone(self);
        tokio::spawn(async move { core.run_fetch(key, token).await });
    }

    async fn run_fetch(self: Arc<Self>, key: String, token: CancelToken) {
        let engine = &self.engine;
        match engine.fetcher.fetch(&key, &token).await {
            Ok(value) => {
                let committed = self.slot.commit(&token, || {
                    engine.store.put(&key, &value);
                    self.state.send_replace(LookupState::success(value));
                });
                if committed {
                    debug!(
                        namespace = %engine.namespace(),
                        key,
                        token = token.id(),
                        result = "success",
                        "Lookup fetch committed"
                    );
                } else {
                    engine.record_discard(&key, &token);
                }
            }
            Err(err) if err.is_cancelled() => engine.record_discard(&key, &token),
            Err(err) => {
                let policy = engine.policy;
                let committed = self.slot.commit(&token, || {
                    self.state
                        .send_modify(|state| apply_failure(state, policy));
                });
                if committed {
                    counter!(
                        METRIC_LOOKUP_ERROR,
                        "namespace" => engine.namespace().to_string(),
                        "kind" => err.kind()
                    )
                    .increment(1);
                    warn!(
                        namespace = %engine.namespace(),
                        key,
                        token = token.id(),
                        error = %err,
                        result = "error",
                        "Lookup fetch failed"
                    );
                } else {
                    engine.record_discard(&key, &token);
                }
            }
        }
    }

    pub(crate) fn engine(&self) -> &LookupEngine<V> {
        &self.engine
    }

    pub(crate) fn key(&self) -> String {
        mutex_lock(&self.key, SOURCE, "key").clone()
    }

    pub(crate) fn state(&self) -> LookupState<V> {
        self.state.borrow().clone()
    }

    pub(crate) fn replace_state(&self, state: LookupState<V>) {
        self.state.send_replace(state);
    }

    /// Cancels an in-flight fetch without touching the published state.
    pub(crate) fn cancel_fetch(&self) {
        self.slot.cancel();
    }
}

fn apply_failure<V>(state: &mut LookupState<V>, policy: RefetchFailurePolicy) {
    state.status = match (policy, state.value.is_some()) {
        (RefetchFailurePolicy::KeepStale, true) => LookupStatus::Success,
        _ => LookupStatus::Error,
    };
}

/// One consumer's binding to a key. Dropping it cancels in-flight work.
pub struct Lookup<V: CacheValue> {
    core: Arc<LookupCore<V>>,
}

impl<V: CacheValue> Lookup<V> {
    pub fn key(&self) -> String {
        self.core.key()
    }

    pub fn namespace(&self) -> &Namespace {
        self.core.engine.namespace()
    }

    pub fn state(&self) -> LookupState<V> {
        self.core.state()
    }

    pub fn status(&self) -> LookupStatus {
        self.core.state.borrow().status
    }

    pub fn value(&self) -> Option<V> {
        self.core.state.borrow().value.clone()
    }

    /// Observer for every state this instance publishes.
    pub fn subscribe(&self) -> watch::Receiver<LookupState<V>> {
        self.core.state.subscribe()
    }

    pub fn is_fetching(&self) -> bool {
        self.core.slot.is_busy()
    }

    /// Rebinds the instance to `key`, cancelling any fetch for the old key.
    pub fn set_key(&self, key: impl Into<String>) {
        let key = key.into();
        let mut current = mutex_lock(&self.core.key, SOURCE, "set_key");
        if *current == key {
            return;
        }
        *current = key.clone();
        self.core.slot.cancel();
        self.core.start(key);
    }

    /// Refreshes the current key in the background.
    ///
    /// Skipped (returning `false`) while a fetch is already in flight, for
    /// locally resolved keys, and when the fetcher is not ready.
    pub fn refetch(&self) -> bool {
        if self.core.slot.is_busy() {
            return false;
        }
        let key = self.key();
        let fetcher = &self.core.engine.fetcher;
        if fetcher.resolve_locally(&key).is_some() || !fetcher.ready(&key) {
            return false;
        }
        let shown = self.value();
        self.core.spawn_fetch(key, shown);
        true
    }

    /// Republishes the namespace's value for the current key, picking up a
    /// write made by another engine. Skipped while a fetch is in flight.
    pub fn sync_from_store(&self) -> bool {
        if self.core.slot.is_busy() {
            return false;
        }
        match self.core.engine.cached(&self.key()) {
            Some(value) => {
                self.core.replace_state(LookupState::success(value));
                true
            }
            None => false,
        }
    }

    /// Cancels any in-flight fetch and runs the lookup again for the current
    /// key, so a fresh namespace value wins over a response already on its way.
    pub fn restart(&self) {
        let current = mutex_lock(&self.core.key, SOURCE, "restart");
        self.core.slot.cancel();
        self.core.start(current.clone());
    }

    /// Waits until the instance leaves `Loading`.
    ///
    /// Never completes for an instance held in `Loading` by an unmet
    /// precondition.
    pub async fn settled(&self) -> LookupState<V> {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    pub(crate) fn core(&self) -> &Arc<LookupCore<V>> {
        &self.core
    }
}

impl<V: CacheValue> Drop for Lookup<V> {
    fn drop(&mut self) {
        self.core.slot.cancel();
    }
}
