use std::collections::BTreeMap;

use pitlane_api_types::VehicleRecord;

use crate::application::lookups::Catalog;
use crate::cache::{Lookup, Relationship, RelationshipEngine};

use super::{ProviderStatus, rebind};

/// Vehicles followed by the acting identity, plus per-vehicle follow toggles.
///
/// A committed toggle refreshes the following list through the engine's
/// companion; the provider then re-reads it from the namespace.
pub struct VehicleFollowingProvider {
    following: Lookup<Vec<VehicleRecord>>,
    engine: RelationshipEngine,
    follows: BTreeMap<String, Relationship>,
}

impl VehicleFollowingProvider {
    pub fn new(catalog: &Catalog, identity: &str) -> Self {
        Self {
            following: catalog.following_vehicles.lookup(identity, false),
            engine: catalog.vehicle_follows.clone(),
            follows: BTreeMap::new(),
        }
    }

    /// Points the provider at another identity, e.g. after login.
    pub fn rebind(&mut self, identity: &str) {
        rebind(&self.following, identity);
        self.follows.clear();
    }

    /// Starts tracking whether the identity follows `vehicle_id`.
    pub fn watch(&mut self, vehicle_id: &str) -> &Relationship {
        let engine = &self.engine;
        self.follows
            .entry(vehicle_id.to_string())
            .or_insert_with(|| engine.watch(vehicle_id, false))
    }

    pub fn is_following(&self, vehicle_id: &str) -> Option<bool> {
        self.follows.get(vehicle_id).and_then(Relationship::value)
    }

    pub async fn toggle(&mut self, vehicle_id: &str) -> bool {
        let committed = self.watch(vehicle_id).toggle().await;
        if committed && !self.following.sync_from_store() {
            // A list fetch issued before the commit may still answer with the
            // old list.
            self.following.restart();
        }
        committed
    }

    pub fn vehicles(&self) -> Vec<VehicleRecord> {
        self.following.value().unwrap_or_default()
    }

    pub fn following(&self) -> &Lookup<Vec<VehicleRecord>> {
        &self.following
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.following.state())
    }

    pub async fn settled(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.following.settled().await)
    }
}
