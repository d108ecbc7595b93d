//! Optimistic mutation of boolean relationships.
//!
//! A [`Relationship`] is a lookup of a boolean (follows, is a member of) plus
//! a `toggle()` action. Toggling flips the published value immediately, then
//! asks the [`Mutator`] for the server's verdict:
//!
//! - success commits the server-reported value (not the guess) to the
//!   namespace and the instance;
//! - failure restores the value held before the first unsettled flip;
//! - a toggle superseded by a newer one settles silently, the newer toggle
//!   owns the final state.

use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cancel::{CancelSlot, CancelToken};
use super::fetch::{CompanionRefresh, Mutator};
use super::lock::mutex_lock;
use super::lookup::{Lookup, LookupCore, LookupEngine};
use super::namespace::Namespace;
use super::state::{LookupState, LookupStatus};

const SOURCE: &str = "cache::mutation";
const METRIC_TOGGLE_COMMIT: &str = "pitlane_toggle_commit_total";
const METRIC_TOGGLE_ROLLBACK: &str = "pitlane_toggle_rollback_total";

/// Lookup engine for a boolean relationship plus its mutate capability.
#[derive(Clone)]
pub struct RelationshipEngine {
    lookups: LookupEngine<bool>,
    mutator: Arc<dyn Mutator>,
    companions: Vec<Arc<dyn CompanionRefresh>>,
}

impl RelationshipEngine {
    pub fn new(lookups: LookupEngine<bool>, mutator: impl Mutator) -> Self {
        Self {
            lookups,
            mutator: Arc::new(mutator),
            companions: Vec::new(),
        }
    }

    /// Adds a refresh that runs after every committed toggle.
    pub fn with_companion(mut self, companion: impl CompanionRefresh) -> Self {
        self.companions.push(Arc::new(companion));
        self
    }

    pub fn namespace(&self) -> &Namespace {
        self.lookups.namespace()
    }

    pub fn lookups(&self) -> &LookupEngine<bool> {
        &self.lookups
    }

    pub fn watch(&self, key: impl Into<String>, refetch: bool) -> Relationship {
        Relationship {
            lookup: self.lookups.lookup(key, refetch),
            engine: self.clone(),
            toggles: Arc::new(ToggleSlot::default()),
        }
    }
}

/// State to restore if an unsettled chain of toggles fails.
#[derive(Debug, Clone)]
struct FlipRecord {
    key: String,
    state: LookupState<bool>,
}

impl FlipRecord {
    fn restored(self) -> LookupState<bool> {
        let status = match self.state.status {
            // The revalidation that was running was cancelled by the flip.
            LookupStatus::Loading => LookupStatus::Success,
            status => status,
        };
        LookupState {
            status,
            value: self.state.value,
        }
    }
}

#[derive(Default)]
struct ToggleSlot {
    slot: CancelSlot,
    baseline: Mutex<Option<FlipRecord>>,
}

/// One consumer's view of a boolean relationship.
pub struct Relationship {
    lookup: Lookup<bool>,
    engine: RelationshipEngine,
    toggles: Arc<ToggleSlot>,
}

impl Relationship {
    pub fn key(&self) -> String {
        self.lookup.key()
    }

    pub fn state(&self) -> LookupState<bool> {
        self.lookup.state()
    }

    pub fn value(&self) -> Option<bool> {
        self.lookup.value()
    }

    pub fn subscribe(&self) -> watch::Receiver<LookupState<bool>> {
        self.lookup.subscribe()
    }

    pub async fn settled(&self) -> LookupState<bool> {
        self.lookup.settled().await
    }

    pub fn refetch(&self) -> bool {
        if self.is_toggling() {
            return false;
        }
        self.lookup.refetch()
    }

    pub fn is_toggling(&self) -> bool {
        self.toggles.slot.is_busy()
    }

    /// Rebinds to `key`. A pending toggle for the old key is abandoned.
    pub fn set_key(&self, key: impl Into<String>) {
        self.toggles.slot.cancel();
        mutex_lock(&self.toggles.baseline, SOURCE, "set_key").take();
        self.lookup.set_key(key);
    }

    /// Flips the relationship and reports whether the server confirmed it.
    ///
    /// Returns `false` without doing anything for locally resolved keys and
    /// while no value is known yet.
    pub async fn toggle(&self) -> bool {
        let core = Arc::clone(self.lookup.core());
        let key = core.key();
        if core.engine().resolves_locally(&key) {
            debug!(namespace = %self.engine.namespace(), key, "Toggle on fixed relationship ignored");
            return false;
        }
        let before = core.state();
        let Some(current) = before.value else {
            debug!(namespace = %self.engine.namespace(), key, "Toggle before value known ignored");
            return false;
        };

        core.cancel_fetch();
        let chained = self.toggles.slot.is_busy();
        let token = self.toggles.slot.begin();
        {
            let mut baseline = mutex_lock(&self.toggles.baseline, SOURCE, "toggle");
            let keep = chained && baseline.as_ref().is_some_and(|record| record.key == key);
            if !keep {
                *baseline = Some(FlipRecord {
                    key: key.clone(),
                    state: before,
                });
            }
        }
        core.replace_state(LookupState::success(!current));
        debug!(
            namespace = %self.engine.namespace(),
            key,
            token = token.id(),
            optimistic = !current,
            "Relationship flipped optimistically"
        );

        let run = ToggleRun {
            engine: self.engine.clone(),
            core,
            toggles: Arc::clone(&self.toggles),
            key,
            token,
        };
        tokio::spawn(run.execute()).await.unwrap_or(false)
    }
}

impl Drop for Relationship {
    fn drop(&mut self) {
        self.toggles.slot.cancel();
    }
}

struct ToggleRun {
    engine: RelationshipEngine,
    core: Arc<LookupCore<bool>>,
    toggles: Arc<ToggleSlot>,
    key: String,
    token: CancelToken,
}

impl ToggleRun {
    async fn execute(self) -> bool {
        let namespace = self.engine.namespace().to_string();
        match self.engine.mutator.mutate(&self.key, &self.token).await {
            Ok(confirmed) => {
                let committed = self.toggles.slot.commit(&self.token, || {
                    self.core.engine().store().put(&self.key, &confirmed);
                    self.core.replace_state(LookupState::success(confirmed));
                    mutex_lock(&self.toggles.baseline, SOURCE, "commit").take();
                });
                if !committed {
                    self.superseded();
                    return false;
                }
                counter!(METRIC_TOGGLE_COMMIT, "namespace" => namespace.clone()).increment(1);
                info!(
                    namespace = %namespace,
                    key = %self.key,
                    token = self.token.id(),
                    confirmed,
                    result = "committed",
                    "Relationship toggle committed"
                );
                self.refresh_companions(confirmed).await;
                true
            }
            Err(err) if err.is_cancelled() => {
                self.superseded();
                false
            }
            Err(err) => {
                let reverted = self.toggles.slot.commit(&self.token, || {
                    let record = mutex_lock(&self.toggles.baseline, SOURCE, "rollback").take();
                    if let Some(record) = record {
                        self.core.replace_state(record.restored());
                    }
                });
                if reverted {
                    counter!(METRIC_TOGGLE_ROLLBACK, "namespace" => namespace.clone())
                        .increment(1);
                    warn!(
                        namespace = %namespace,
                        key = %self.key,
                        token = self.token.id(),
                        error = %err,
                        result = "rolled_back",
                        "Relationship toggle failed"
                    );
                } else {
                    self.superseded();
                }
                false
            }
        }
    }

    fn superseded(&self) {
        debug!(
            namespace = %self.engine.namespace(),
            key = %self.key,
            token = self.token.id(),
            result = "superseded",
            "Relationship toggle settled without effect"
        );
    }

    async fn refresh_companions(&self, confirmed: bool) {
        for companion in &self.engine.companions {
            if let Err(err) = companion.refresh(&self.key, confirmed).await {
                warn!(
                    namespace = %self.engine.namespace(),
                    key = %self.key,
                    companion = companion.name(),
                    error = %err,
                    "Companion refresh failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::fetch::FetchError;
    use crate::cache::store::SessionCache;
    use crate::cache::testing::{Gate, GateFetcher, GateMutator};

    const FOLLOWS: Namespace = Namespace::new("is-following-cache");

    struct Fixture {
        engine: RelationshipEngine,
        reads: Arc<Gate<bool>>,
        writes: Arc<Gate<bool>>,
    }

    fn fixture(cache: &SessionCache) -> Fixture {
        let reads = Gate::new();
        let writes = Gate::new();
        let lookups = LookupEngine::new(
            cache,
            FOLLOWS,
            GateFetcher::new(&reads).with_local("me", true),
        );
        Fixture {
            engine: RelationshipEngine::new(lookups, GateMutator::new(&writes)),
            reads,
            writes,
        }
    }

    #[tokio::test]
    async fn server_verdict_is_committed_not_the_guess() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &true);
        let relationship = fx.engine.watch("uuid-2", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            assert_eq!(relationship.value(), Some(false));
            // Server reports `unfollowing`.
            fx.writes.resolve_next(Ok(false));
        });

        assert!(toggled);
        assert_eq!(relationship.state(), LookupState::success(false));
        assert_eq!(fx.engine.lookups().cached("uuid-2"), Some(false));
    }

    #[tokio::test]
    async fn confirmed_value_may_differ_from_optimistic_flip() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let relationship = fx.engine.watch("uuid-2", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            fx.writes.resolve_next(Ok(false));
        });

        assert!(toggled);
        assert_eq!(relationship.value(), Some(false));
    }

    #[tokio::test]
    async fn failure_rolls_back_and_leaves_namespace_untouched() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let before = cache.backend().get_item("is-following-cache").expect("read");
        let relationship = fx.engine.watch("uuid-2", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            assert_eq!(relationship.value(), Some(true));
            fx.writes.resolve_next(Err(FetchError::Status {
                code: 500,
                body: "boom".into(),
            }));
        });

        assert!(!toggled);
        assert_eq!(relationship.state(), LookupState::success(false));
        let after = cache.backend().get_item("is-following-cache").expect("read");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn identity_key_is_fixed_true_without_fetch() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        let relationship = fx.engine.watch("me", true);

        assert_eq!(relationship.state(), LookupState::success(true));
        assert!(!relationship.toggle().await);
        tokio::task::yield_now().await;

        assert_eq!(fx.reads.call_count(), 0);
        assert_eq!(fx.writes.call_count(), 0);
        assert_eq!(relationship.value(), Some(true));
    }

    #[tokio::test]
    async fn toggle_without_value_is_a_no_op() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        let relationship = fx.engine.watch("uuid-2", false);
        fx.reads.wait_calls(1).await;

        assert!(!relationship.toggle().await);
        assert_eq!(fx.writes.call_count(), 0);
        assert!(relationship.state().is_loading());
    }

    #[tokio::test]
    async fn superseded_toggle_does_not_revert() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let relationship = fx.engine.watch("uuid-2", false);

        let (first, second, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            relationship.toggle().await
        }, async {
            fx.writes.wait_calls(2).await;
            fx.writes.resolve_next(Err(FetchError::Transport("reset".into())));
            fx.writes.resolve_next(Ok(false));
        });

        assert!(!first);
        assert!(second);
        assert_eq!(relationship.state(), LookupState::success(false));
    }

    #[tokio::test]
    async fn failed_chain_snaps_back_to_last_confirmed_value() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let relationship = fx.engine.watch("uuid-2", false);

        let (first, second, third, ()) = tokio::join!(
            relationship.toggle(),
            async {
                fx.writes.wait_calls(1).await;
                relationship.toggle().await
            },
            async {
                fx.writes.wait_calls(2).await;
                relationship.toggle().await
            },
            async {
                fx.writes.wait_calls(3).await;
                assert_eq!(relationship.value(), Some(true));
                // The two superseded calls are parked first.
                fx.writes.resolve_next(Ok(true));
                fx.writes.resolve_next(Ok(false));
                fx.writes.resolve_next(Err(FetchError::Transport("offline".into())));
            }
        );

        assert!(!first);
        assert!(!second);
        assert!(!third);
        assert_eq!(relationship.state(), LookupState::success(false));
        assert_eq!(fx.engine.lookups().cached("uuid-2"), Some(false));
    }

    #[tokio::test]
    async fn toggle_cancels_inflight_revalidation() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let relationship = fx.engine.watch("uuid-2", true);
        fx.reads.wait_calls(1).await;

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            fx.writes.resolve_next(Ok(true));
        });

        assert!(toggled);
        assert_eq!(relationship.state(), LookupState::success(true));
        assert!(!relationship.lookup.is_fetching());
    }

    #[tokio::test]
    async fn rollback_after_cancelled_revalidation_reports_success() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &true);
        let relationship = fx.engine.watch("uuid-2", true);
        fx.reads.wait_calls(1).await;
        assert_eq!(relationship.state(), LookupState::loading(Some(true)));

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            fx.writes.resolve_next(Err(FetchError::domain("rate_limited", "slow down")));
        });

        assert!(!toggled);
        assert_eq!(relationship.state(), LookupState::success(true));
    }

    struct CountingCompanion {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CompanionRefresh for CountingCompanion {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn refresh(&self, _key: &str, _confirmed: bool) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FetchError::Transport("companion down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn companion_failure_does_not_change_result() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = fx.engine.clone().with_companion(CountingCompanion {
            calls: Arc::clone(&calls),
            fail: true,
        });
        engine.lookups().store().put("vehicle-7", &false);
        let relationship = engine.watch("vehicle-7", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            fx.writes.resolve_next(Ok(true));
        });

        assert!(toggled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(relationship.value(), Some(true));
    }

    #[tokio::test]
    async fn companions_skip_failed_toggles() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = fx.engine.clone().with_companion(CountingCompanion {
            calls: Arc::clone(&calls),
            fail: false,
        });
        engine.lookups().store().put("vehicle-7", &false);
        let relationship = engine.watch("vehicle-7", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            fx.writes.resolve_next(Err(FetchError::Transport("offline".into())));
        });

        assert!(!toggled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_toggle_future_still_settles() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        let relationship = fx.engine.watch("uuid-2", false);
        let mut rx = relationship.subscribe();

        {
            let toggle = relationship.toggle();
            tokio::pin!(toggle);
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), &mut toggle).await;
        }
        fx.writes.wait_calls(1).await;
        fx.writes.resolve_next(Ok(true));

        rx.wait_for(|state| state.is_success() && fx.engine.lookups().cached("uuid-2") == Some(true))
            .await
            .expect("committed");
        assert_eq!(relationship.value(), Some(true));
    }

    #[tokio::test]
    async fn set_key_abandons_pending_toggle() {
        let cache = SessionCache::in_memory();
        let fx = fixture(&cache);
        fx.engine.lookups().store().put("uuid-2", &false);
        fx.engine.lookups().store().put("uuid-3", &false);
        let relationship = fx.engine.watch("uuid-2", false);

        let (toggled, ()) = tokio::join!(relationship.toggle(), async {
            fx.writes.wait_calls(1).await;
            relationship.set_key("uuid-3");
        });

        assert!(!toggled);
        assert_eq!(relationship.key(), "uuid-3");
        assert_eq!(relationship.state(), LookupState::success(false));
        assert_eq!(fx.engine.lookups().cached("uuid-2"), Some(false));
    }
}
