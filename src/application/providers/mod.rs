//! Provider composition: engines that share a lifecycle (one session, one
//! viewed profile) assembled behind one status and a handful of actions.

mod feed;
mod lists;
mod profile;
mod session;
mod vehicles;

use serde::Serialize;

use crate::cache::{CacheValue, Lookup, LookupState, LookupStatus};

pub use feed::{FeedProvider, FeedState};
pub use lists::ListMembershipProvider;
pub use profile::ProfileProvider;
pub use session::SessionProvider;
pub use vehicles::VehicleFollowingProvider;

/// Aggregate status of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Loading,
    Loaded,
    /// Loaded, with an additional page on its way.
    LoadingMore,
    /// Loaded, with a refresh on its way; current data stays visible.
    Reloading,
    Error,
}

impl ProviderStatus {
    /// Status of a provider whose state follows one lookup.
    pub fn from_lookup<V>(state: &LookupState<V>) -> Self {
        match (state.status, state.value.is_some()) {
            (LookupStatus::Loading, false) => Self::Loading,
            (LookupStatus::Loading, true) => Self::Reloading,
            (LookupStatus::Success, _) => Self::Loaded,
            (LookupStatus::Error, _) => Self::Error,
        }
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::LoadingMore | Self::Reloading)
    }
}

/// Points `lookup` at `key`, retrying a key that never got a value (for
/// example because the session had no token yet).
fn rebind<V: CacheValue>(lookup: &Lookup<V>, key: &str) {
    if lookup.key() != key {
        lookup.set_key(key);
    } else if lookup.value().is_none() && !lookup.is_fetching() {
        lookup.refetch();
    }
}
