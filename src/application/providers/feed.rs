use pitlane_api_types::{FeedPage, Post};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::application::lookups::{Catalog, FEED_HEAD};
use crate::cache::{CancelSlot, FetchError, LookupEngine};

use super::ProviderStatus;

/// Posts shown by the feed, plus where the next page starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedState {
    pub status: ProviderStatus,
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
    /// Failure of the most recent page fetch that did not demote the feed.
    pub last_error: Option<String>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            status: ProviderStatus::Loading,
            posts: Vec::new(),
            next_cursor: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Replace,
    Append,
}

/// Cursor-paginated post feed.
///
/// Each action supersedes the previous one: a `reload` issued while a
/// `load_more` is pending wins, and the older page is dropped unseen.
pub struct FeedProvider {
    pages: LookupEngine<FeedPage>,
    posts: LookupEngine<Post>,
    slot: CancelSlot,
    state: watch::Sender<FeedState>,
}

impl FeedProvider {
    pub fn new(catalog: &Catalog) -> Self {
        Self::with_engines(catalog.feed.clone(), catalog.posts.clone())
    }

    pub fn with_engines(pages: LookupEngine<FeedPage>, posts: LookupEngine<Post>) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            pages,
            posts,
            slot: CancelSlot::new(),
            state,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ProviderStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Shows the first page, from the session cache when possible.
    pub async fn load(&self) -> ProviderStatus {
        if let Some(page) = self.pages.cached(FEED_HEAD) {
            self.slot.cancel();
            debug!(posts = page.posts.len(), result = "hit", "Feed served from cache");
            self.state.send_modify(|state| {
                merge_page(state, page, Merge::Replace);
            });
            return ProviderStatus::Loaded;
        }
        self.fetch_page(FEED_HEAD.to_string(), ProviderStatus::Loading, Merge::Replace)
            .await
    }

    /// Appends the next page. No-op unless loaded with a cursor to follow.
    pub async fn load_more(&self) -> ProviderStatus {
        let current = self.state();
        if current.status != ProviderStatus::Loaded {
            return current.status;
        }
        let Some(cursor) = current.next_cursor else {
            return current.status;
        };
        self.fetch_page(cursor, ProviderStatus::LoadingMore, Merge::Append)
            .await
    }

    /// Re-fetches the first page, keeping current posts visible meanwhile.
    pub async fn reload(&self) -> ProviderStatus {
        let pending = if self.state.borrow().posts.is_empty() {
            ProviderStatus::Loading
        } else {
            ProviderStatus::Reloading
        };
        self.fetch_page(FEED_HEAD.to_string(), pending, Merge::Replace)
            .await
    }

    async fn fetch_page(&self, key: String, pending: ProviderStatus, merge: Merge) -> ProviderStatus {
        let token = self.slot.begin();
        self.state.send_modify(|state| state.status = pending);

        let outcome = self.pages.revalidate(&key, &token).await;
        if matches!(outcome, Err(FetchError::Cancelled)) {
            debug!(key, token = token.id(), result = "superseded", "Feed page dropped");
            return self.status();
        }

        let committed = self.slot.commit(&token, || match outcome {
            // No credential yet: the feed waits for a session instead of failing.
            Err(FetchError::Precondition(reason)) => {
                debug!(key, reason = %reason, result = "not_ready", "Feed page deferred");
                self.state.send_modify(|state| {
                    state.status = if pending == ProviderStatus::Loading {
                        ProviderStatus::Loading
                    } else {
                        ProviderStatus::Loaded
                    };
                });
            }
            Ok(page) => {
                for post in &page.posts {
                    self.posts.store().put(&post.post_id, post);
                }
                self.state.send_modify(|state| merge_page(state, page, merge));
            }
            Err(err) => {
                warn!(key, error = %err, pending = ?pending, "Feed page failed");
                self.state.send_modify(|state| {
                    state.status = if pending == ProviderStatus::Loading {
                        ProviderStatus::Error
                    } else {
                        ProviderStatus::Loaded
                    };
                    state.last_error = Some(err.to_string());
                });
            }
        });
        if !committed {
            debug!(key, token = token.id(), result = "superseded", "Feed page dropped");
        }
        self.status()
    }
}

fn merge_page(state: &mut FeedState, page: FeedPage, merge: Merge) {
    match merge {
        Merge::Replace => state.posts = page.posts,
        Merge::Append => state.posts.extend(page.posts),
    }
    state.next_cursor = page.next_cursor;
    state.status = ProviderStatus::Loaded;
    state.last_error = None;
}

impl Drop for FeedProvider {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::application::providers::test_support::{Harness, failure, ok};

    fn post_json(post_id: &str) -> Value {
        json!({
            "post_id": post_id,
            "author_uuid": "uuid-2",
            "body": format!("post {post_id}"),
            "created_at": "2026-03-01T12:00:00Z",
            "comment_count": 0
        })
    }

    fn page_json(ids: &[&str], next: Option<&str>) -> String {
        let posts: Vec<Value> = ids.iter().map(|id| post_json(id)).collect();
        ok("feed", json!({"posts": posts, "next_cursor": next}))
    }

    fn ids(state: &FeedState) -> Vec<&str> {
        state.posts.iter().map(|post| post.post_id.as_str()).collect()
    }

    #[tokio::test]
    async fn load_then_load_more_appends() {
        let harness = Harness::signed_in();
        let mut head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1", "p2"], Some("c2")));
        });
        let feed = FeedProvider::new(&harness.catalog);

        assert_eq!(feed.load().await, ProviderStatus::Loaded);
        assert_eq!(ids(&feed.state()), vec!["p1", "p2"]);
        head.delete();

        let more = harness.server.mock(|when, then| {
            when.method("GET")
                .path("/api/v1/feed")
                .query_param("cursor", "c2");
            then.status(200).body(page_json(&["p3"], None));
        });
        assert_eq!(feed.load_more().await, ProviderStatus::Loaded);

        let state = feed.state();
        assert_eq!(ids(&state), vec!["p1", "p2", "p3"]);
        assert_eq!(state.next_cursor, None);
        more.assert();
        // Posts seen in the feed are cached for direct lookups.
        assert!(harness.catalog.posts.cached("p3").is_some());

        assert_eq!(feed.load_more().await, ProviderStatus::Loaded);
        more.assert_calls(1);
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let harness = Harness::signed_in();
        let head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1"], None));
        });

        FeedProvider::new(&harness.catalog).load().await;
        let feed = FeedProvider::new(&harness.catalog);
        assert_eq!(feed.load().await, ProviderStatus::Loaded);

        assert_eq!(ids(&feed.state()), vec!["p1"]);
        head.assert_calls(1);
    }

    #[tokio::test]
    async fn failed_first_page_is_error() {
        let harness = Harness::signed_in();
        harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(503).body("maintenance");
        });
        let feed = FeedProvider::new(&harness.catalog);

        assert_eq!(feed.load().await, ProviderStatus::Error);
        assert!(feed.state().last_error.is_some());
    }

    #[tokio::test]
    async fn failed_next_page_keeps_loaded_posts() {
        let harness = Harness::signed_in();
        let mut head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1"], Some("c2")));
        });
        let feed = FeedProvider::new(&harness.catalog);
        feed.load().await;
        head.delete();
        harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(failure("cursor_expired"));
        });

        assert_eq!(feed.load_more().await, ProviderStatus::Loaded);
        let state = feed.state();
        assert_eq!(ids(&state), vec!["p1"]);
        assert_eq!(state.next_cursor.as_deref(), Some("c2"));
        assert!(state.last_error.expect("recorded").contains("cursor_expired"));
    }

    #[tokio::test]
    async fn reload_replaces_posts() {
        let harness = Harness::signed_in();
        let mut head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1"], None));
        });
        let feed = FeedProvider::new(&harness.catalog);
        feed.load().await;
        head.delete();
        harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p9", "p1"], None));
        });

        let mut rx = feed.subscribe();
        let reload = feed.reload();
        tokio::pin!(reload);
        // Polling once issues the request and publishes Reloading.
        let _ = futures::poll!(reload.as_mut());
        assert_eq!(rx.borrow_and_update().status, ProviderStatus::Reloading);
        assert_eq!(ids(&rx.borrow()), vec!["p1"]);

        assert_eq!(reload.await, ProviderStatus::Loaded);
        assert_eq!(ids(&feed.state()), vec!["p9", "p1"]);
    }

    async fn loaded_with_cursor(harness: &Harness) -> FeedProvider {
        let mut head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1"], Some("c2")));
        });
        let feed = FeedProvider::new(&harness.catalog);
        assert_eq!(feed.load().await, ProviderStatus::Loaded);
        head.delete();
        feed
    }

    #[tokio::test]
    async fn load_more_publishes_loading_more_with_posts_visible() {
        let harness = Harness::signed_in();
        let feed = loaded_with_cursor(&harness).await;
        harness.server.mock(|when, then| {
            when.method("GET")
                .path("/api/v1/feed")
                .query_param("cursor", "c2");
            then.status(200)
                .delay(Duration::from_millis(100))
                .body(page_json(&["p2"], None));
        });

        let mut rx = feed.subscribe();
        let more = feed.load_more();
        tokio::pin!(more);
        let _ = futures::poll!(more.as_mut());
        assert_eq!(rx.borrow_and_update().status, ProviderStatus::LoadingMore);
        assert_eq!(ids(&rx.borrow()), vec!["p1"]);

        assert_eq!(more.await, ProviderStatus::Loaded);
        assert_eq!(ids(&feed.state()), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn reload_supersedes_pending_load_more() {
        let harness = Harness::signed_in();
        let feed = loaded_with_cursor(&harness).await;
        harness.server.mock(|when, then| {
            when.method("GET")
                .path("/api/v1/feed")
                .query_param("cursor", "c2");
            then.status(200)
                .delay(Duration::from_millis(300))
                .body(page_json(&["p3"], None));
        });
        harness.server.mock(|when, then| {
            when.method("GET")
                .path("/api/v1/feed")
                .query_param_missing("cursor");
            then.status(200).body(page_json(&["p9"], None));
        });

        let more = feed.load_more();
        tokio::pin!(more);
        let _ = futures::poll!(more.as_mut());
        assert_eq!(feed.status(), ProviderStatus::LoadingMore);

        assert_eq!(feed.reload().await, ProviderStatus::Loaded);
        assert_eq!(more.await, ProviderStatus::Loaded);
        tokio::time::sleep(Duration::from_millis(400)).await;

        let state = feed.state();
        assert_eq!(ids(&state), vec!["p9"]);
        assert_eq!(state.next_cursor, None);
        assert!(harness.catalog.posts.cached("p3").is_none());
        assert!(harness.catalog.feed.cached("c2").is_none());
    }

    #[tokio::test]
    async fn signed_out_feed_stays_loading_without_request() {
        let harness = Harness::anonymous();
        let head = harness.server.mock(|when, then| {
            when.method("GET").path("/api/v1/feed");
            then.status(200).body(page_json(&["p1"], None));
        });
        let feed = FeedProvider::new(&harness.catalog);

        assert_eq!(feed.load().await, ProviderStatus::Loading);
        let state = feed.state();
        assert!(state.posts.is_empty());
        assert_eq!(state.last_error, None);
        head.assert_calls(0);
    }
}
