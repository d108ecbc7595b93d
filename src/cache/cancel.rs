//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a shared liveness flag handed to every fetch and
//! mutation. A [`CancelSlot`] owns the token of one logical operation slot
//! (a lookup instance, a toggle slot, a provider action) and guarantees that
//! at most one token per slot is live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::cancel";

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct TokenInner {
    id: u64,
    live: AtomicBool,
    notify: Notify,
}

/// Liveness flag shared by an operation and the slot that started it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                live: AtomicBool::new(true),
                notify: Notify::new(),
            }),
        }
    }

    /// Process-unique id, used to correlate log lines.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Marks the token dead and wakes every `cancelled()` waiter. Idempotent.
    pub fn cancel(&self) {
        if self.inner.live.swap(false, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Completes once the token has been cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel cannot slip
        // between the check and the wait.
        notified.as_mut().enable();
        if !self.is_live() {
            return;
        }
        notified.await;
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Holder of the single live token of one operation slot.
#[derive(Debug, Default)]
pub struct CancelSlot {
    current: Mutex<Option<CancelToken>>,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the previous token, if any, and installs a fresh one.
    pub fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut current = mutex_lock(&self.current, SOURCE, "begin");
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancels and clears the current token.
    pub fn cancel(&self) {
        if let Some(previous) = mutex_lock(&self.current, SOURCE, "cancel").take() {
            previous.cancel();
        }
    }

    /// True while an operation started by [`begin`](Self::begin) is unsettled.
    pub fn is_busy(&self) -> bool {
        mutex_lock(&self.current, SOURCE, "is_busy")
            .as_ref()
            .is_some_and(CancelToken::is_live)
    }

    /// Runs `apply` only if `token` is still this slot's live token, then
    /// retires the token.
    ///
    /// The liveness check and `apply` happen under the slot lock, so a
    /// concurrent `begin`/`cancel` either lands before (and `apply` is skipped)
    /// or after (and sees the committed state). Returns whether `apply` ran.
    pub fn commit(&self, token: &CancelToken, apply: impl FnOnce()) -> bool {
        let mut current = mutex_lock(&self.current, SOURCE, "commit");
        let owned = current
            .as_ref()
            .is_some_and(|active| active.same_as(token) && active.is_live());
        if !owned {
            return false;
        }
        apply();
        current.take();
        true
    }
}

impl Drop for CancelSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_token_is_live_until_cancelled() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.is_live());

        token.cancel();
        token.cancel();
        assert!(!clone.is_live());
    }

    #[test]
    fn token_ids_are_unique() {
        assert_ne!(CancelToken::new().id(), CancelToken::new().id());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter woke up")
            .expect("waiter task completed");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_for_dead_token() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("dead token resolves immediately");
    }

    #[test]
    fn begin_cancels_previous_token() {
        let slot = CancelSlot::new();
        let first = slot.begin();
        let second = slot.begin();

        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(slot.is_busy());
    }

    #[test]
    fn commit_runs_only_for_current_token() {
        let slot = CancelSlot::new();
        let stale = slot.begin();
        let current = slot.begin();

        let mut applied = Vec::new();
        assert!(!slot.commit(&stale, || applied.push("stale")));
        assert!(slot.commit(&current, || applied.push("current")));

        assert_eq!(applied, vec!["current"]);
        assert!(!slot.is_busy());
    }

    #[test]
    fn commit_after_cancel_is_skipped() {
        let slot = CancelSlot::new();
        let token = slot.begin();
        slot.cancel();

        let mut applied = false;
        assert!(!slot.commit(&token, || applied = true));
        assert!(!applied);
        assert!(!token.is_live());
    }

    #[test]
    fn commit_retires_the_token() {
        let slot = CancelSlot::new();
        let token = slot.begin();
        assert!(slot.commit(&token, || {}));
        assert!(!slot.commit(&token, || panic!("second commit must not apply")));
    }

    #[test]
    fn dropping_slot_cancels_live_token() {
        let slot = CancelSlot::new();
        let token = slot.begin();
        drop(slot);
        assert!(!token.is_live());
    }

    #[test]
    fn cancel_on_idle_slot_is_a_no_op() {
        let slot = CancelSlot::new();
        slot.cancel();
        assert!(!slot.is_busy());
    }
}
