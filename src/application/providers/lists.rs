use std::collections::BTreeMap;

use futures::future::join_all;
use pitlane_api_types::ListSummary;

use crate::application::lookups::{Catalog, membership_key};
use crate::cache::{Lookup, Relationship, RelationshipEngine};

use super::ProviderStatus;

/// The lists owned by a profile and whether one item sits in each of them.
pub struct ListMembershipProvider {
    lists: Lookup<Vec<ListSummary>>,
    engine: RelationshipEngine,
    item_id: String,
    memberships: BTreeMap<String, Relationship>,
}

impl ListMembershipProvider {
    pub fn new(catalog: &Catalog, owner_uuid: &str, item_id: impl Into<String>) -> Self {
        Self {
            lists: catalog.lists.lookup(owner_uuid, false),
            engine: catalog.memberships.clone(),
            item_id: item_id.into(),
            memberships: BTreeMap::new(),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Waits for the owner's lists, then watches the item's membership in
    /// each one. An empty owner stays `Loading`.
    pub async fn load(&mut self) -> ProviderStatus {
        if self.lists.key().is_empty() {
            return ProviderStatus::Loading;
        }
        let state = self.lists.settled().await;
        if let Some(lists) = &state.value {
            self.sync(lists);
        }
        ProviderStatus::from_lookup(&state)
    }

    /// Waits for every watched membership to leave `Loading`.
    pub async fn settled(&self) {
        join_all(self.memberships.values().map(Relationship::settled)).await;
    }

    fn sync(&mut self, lists: &[ListSummary]) {
        self.memberships
            .retain(|list_id, _| lists.iter().any(|list| &list.list_id == list_id));
        for list in lists {
            if !self.memberships.contains_key(&list.list_id) {
                let key = membership_key(&list.list_id, &self.item_id);
                self.memberships
                    .insert(list.list_id.clone(), self.engine.watch(key, false));
            }
        }
    }

    pub fn lists(&self) -> Vec<ListSummary> {
        self.lists.value().unwrap_or_default()
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.lists.state())
    }

    /// `None` until the membership for `list_id` is known.
    pub fn contains(&self, list_id: &str) -> Option<bool> {
        self.memberships.get(list_id).and_then(Relationship::value)
    }

    pub fn membership(&self, list_id: &str) -> Option<&Relationship> {
        self.memberships.get(list_id)
    }

    /// Adds the item to, or removes it from, `list_id`.
    pub async fn toggle(&self, list_id: &str) -> bool {
        match self.memberships.get(list_id) {
            Some(relationship) => relationship.toggle().await,
            None => false,
        }
    }
}
