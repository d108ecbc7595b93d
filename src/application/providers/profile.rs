use pitlane_api_types::{FollowerSummary, Profile, VehicleRecord};

use crate::application::lookups::Catalog;
use crate::cache::{Lookup, Relationship};

use super::ProviderStatus;

/// Everything shown for one viewed profile.
///
/// [`show`](Self::show) moves every binding to another profile at once, so
/// rapid navigation cancels the superseded fetches instead of racing them.
pub struct ProfileProvider {
    profile: Lookup<Profile>,
    follow: Relationship,
    followers: Lookup<Vec<FollowerSummary>>,
    vehicles: Lookup<Vec<VehicleRecord>>,
}

impl ProfileProvider {
    pub fn new(catalog: &Catalog, uuid: &str) -> Self {
        Self {
            profile: catalog.profiles.lookup(uuid, false),
            follow: catalog.follows.watch(uuid, false),
            followers: catalog.followers.lookup(uuid, false),
            vehicles: catalog.profile_vehicles.lookup(uuid, false),
        }
    }

    pub fn show(&self, uuid: &str) {
        self.profile.set_key(uuid);
        self.follow.set_key(uuid);
        self.followers.set_key(uuid);
        self.vehicles.set_key(uuid);
    }

    pub fn uuid(&self) -> String {
        self.profile.key()
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.profile.state())
    }

    pub async fn settled(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.profile.settled().await)
    }

    /// Re-fetches the profile and its lists in the background.
    pub fn refresh(&self) {
        self.profile.refetch();
        self.followers.refetch();
        self.vehicles.refetch();
    }

    pub async fn toggle_follow(&self) -> bool {
        self.follow.toggle().await
    }

    pub fn profile(&self) -> &Lookup<Profile> {
        &self.profile
    }

    pub fn follow(&self) -> &Relationship {
        &self.follow
    }

    pub fn followers(&self) -> &Lookup<Vec<FollowerSummary>> {
        &self.followers
    }

    pub fn vehicles(&self) -> &Lookup<Vec<VehicleRecord>> {
        &self.vehicles
    }
}
