//! Hand-driven capabilities for engine tests.
//!
//! A [`Gate`] parks every call until the test resolves it, so tests decide
//! exactly when (and in which order) responses arrive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use super::cancel::CancelToken;
use super::fetch::{FetchError, Fetcher, Mutator};

type Pending<T> = (String, oneshot::Sender<Result<T, FetchError>>);

pub(crate) struct Gate<T> {
    pending: Mutex<VecDeque<Pending<T>>>,
    calls: watch::Sender<usize>,
    honour_cancellation: bool,
}

impl<T: Send + 'static> Gate<T> {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(true)
    }

    /// Gate whose calls keep waiting after cancellation, modelling a transport
    /// that cannot abort and delivers its response late.
    pub(crate) fn ignoring_cancellation() -> Arc<Self> {
        Self::build(false)
    }

    fn build(honour_cancellation: bool) -> Arc<Self> {
        let (calls, _) = watch::channel(0);
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            calls,
            honour_cancellation,
        })
    }

    async fn enter(&self, key: &str, token: &CancelToken) -> Result<T, FetchError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("gate lock")
            .push_back((key.to_string(), tx));
        self.calls.send_modify(|count| *count += 1);

        let received = if self.honour_cancellation {
            tokio::select! {
                _ = token.cancelled() => return Err(FetchError::Cancelled),
                received = rx => received,
            }
        } else {
            rx.await
        };
        received.unwrap_or_else(|_| Err(FetchError::Transport("gate closed".into())))
    }

    pub(crate) fn call_count(&self) -> usize {
        *self.calls.borrow()
    }

    pub(crate) async fn wait_calls(&self, count: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= count)
            .await
            .expect("gate sender alive");
    }

    /// Resolves the oldest parked call for `key`.
    pub(crate) fn resolve(&self, key: &str, result: Result<T, FetchError>) {
        let mut pending = self.pending.lock().expect("gate lock");
        let index = pending
            .iter()
            .position(|(parked, _)| parked == key)
            .unwrap_or_else(|| panic!("no parked call for `{key}`"));
        let (_, tx) = pending.remove(index).expect("index in range");
        let _ = tx.send(result);
    }

    /// Resolves the oldest parked call regardless of key.
    pub(crate) fn resolve_next(&self, result: Result<T, FetchError>) {
        let (_, tx) = self
            .pending
            .lock()
            .expect("gate lock")
            .pop_front()
            .expect("a parked call");
        let _ = tx.send(result);
    }
}

/// Fetcher backed by a [`Gate`].
pub(crate) struct GateFetcher<V> {
    gate: Arc<Gate<V>>,
    local: Option<(String, V)>,
}

impl<V> GateFetcher<V> {
    pub(crate) fn new(gate: &Arc<Gate<V>>) -> Self {
        Self {
            gate: Arc::clone(gate),
            local: None,
        }
    }

    /// Answers `key` locally with `value`, like the identity rule does.
    pub(crate) fn with_local(mut self, key: &str, value: V) -> Self {
        self.local = Some((key.to_string(), value));
        self
    }
}

#[async_trait]
impl<V> Fetcher<V> for GateFetcher<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn resolve_locally(&self, key: &str) -> Option<V> {
        self.local
            .as_ref()
            .filter(|(local_key, _)| local_key == key)
            .map(|(_, value)| value.clone())
    }

    async fn fetch(&self, key: &str, token: &CancelToken) -> Result<V, FetchError> {
        self.gate.enter(key, token).await
    }
}

/// Mutator backed by a [`Gate`].
pub(crate) struct GateMutator {
    gate: Arc<Gate<bool>>,
}

impl GateMutator {
    pub(crate) fn new(gate: &Arc<Gate<bool>>) -> Self {
        Self {
            gate: Arc::clone(gate),
        }
    }
}

#[async_trait]
impl Mutator for GateMutator {
    async fn mutate(&self, key: &str, token: &CancelToken) -> Result<bool, FetchError> {
        self.gate.enter(key, token).await
    }
}
