//! Concrete entity lookups: one namespace, one route and one failure policy
//! per entity type, all assembled into a [`Catalog`].

mod companions;
mod endpoint;
mod routes;

use pitlane_api_types::{
    FeedPage, FollowResult, FollowerSummary, ListSummary, MembershipResult, NotificationCount,
    Post, Profile, Recall, VehicleRecord, VinDecode,
};

use crate::cache::{
    CacheConfig, LookupEngine, Namespace, RefetchFailurePolicy, RelationshipEngine, SessionCache,
};
use crate::infra::http::{ApiClient, Credentials};

pub use companions::RefreshFollowingVehicles;
pub use endpoint::{ApiFetcher, ApiMutator, LocalFn, RouteFn};
pub use routes::{FEED_HEAD, membership_key, split_membership_key};

pub const SESSION: Namespace = Namespace::new("session");
pub const PROFILES: Namespace = Namespace::new("profile-cache");
pub const FOLLOWERS: Namespace = Namespace::new("followers-cache");
pub const FOLLOWING: Namespace = Namespace::new("following-cache");
pub const IS_FOLLOWING: Namespace = Namespace::new("is-following-cache");
pub const VEHICLES: Namespace = Namespace::new("vehicle-cache");
pub const PROFILE_VEHICLES: Namespace = Namespace::new("profile-vehicles-cache");
pub const FOLLOWING_VEHICLES: Namespace = Namespace::new("following-vehicles-cache");
pub const IS_FOLLOWING_VEHICLE: Namespace = Namespace::new("is-following-vehicle-cache");
pub const VIN_DECODES: Namespace = Namespace::new("vin-decode-cache");
pub const RECALLS: Namespace = Namespace::new("recalls-cache");
pub const LISTS: Namespace = Namespace::new("lists-cache");
pub const LIST_MEMBERSHIP: Namespace = Namespace::new("list-membership-cache");
pub const NOTIFICATIONS: Namespace = Namespace::new("notification-count-cache");
pub const POSTS: Namespace = Namespace::new("post-cache");
pub const FEED: Namespace = Namespace::new("feed-cache");

/// A profile always follows itself.
fn follows_self(credentials: &Credentials, key: &str) -> Option<bool> {
    credentials.is_identity(key).then_some(true)
}

/// Every engine of one session, sharing one cache and one transport.
#[derive(Clone)]
pub struct Catalog {
    pub credentials: Credentials,
    pub session_profile: LookupEngine<Profile>,
    pub profiles: LookupEngine<Profile>,
    pub followers: LookupEngine<Vec<FollowerSummary>>,
    pub following: LookupEngine<Vec<FollowerSummary>>,
    pub follows: RelationshipEngine,
    pub vehicles: LookupEngine<VehicleRecord>,
    pub profile_vehicles: LookupEngine<Vec<VehicleRecord>>,
    pub following_vehicles: LookupEngine<Vec<VehicleRecord>>,
    pub vehicle_follows: RelationshipEngine,
    pub vin_decodes: LookupEngine<VinDecode>,
    pub recalls: LookupEngine<Vec<Recall>>,
    pub lists: LookupEngine<Vec<ListSummary>>,
    pub memberships: RelationshipEngine,
    pub notifications: LookupEngine<NotificationCount>,
    pub posts: LookupEngine<Post>,
    pub feed: LookupEngine<FeedPage>,
}

impl Catalog {
    pub fn new(cache: &SessionCache, client: &ApiClient, config: &CacheConfig) -> Self {
        use RefetchFailurePolicy::{Demote, KeepStale};

        let snapshot = config.refetch_policy(KeepStale);
        let live = config.refetch_policy(Demote);

        let following_vehicles = LookupEngine::new(
            cache,
            FOLLOWING_VEHICLES,
            ApiFetcher::new(client, routes::following_vehicles, "vehicles"),
        )
        .with_policy(live);

        Self {
            credentials: client.credentials().clone(),
            // Own profile shares the profile namespace with every other profile.
            session_profile: LookupEngine::new(
                cache,
                PROFILES,
                ApiFetcher::new(client, routes::session, "profile").authenticated(),
            )
            .with_policy(snapshot),
            profiles: LookupEngine::new(
                cache,
                PROFILES,
                ApiFetcher::new(client, routes::profile, "profile"),
            )
            .with_policy(snapshot),
            followers: LookupEngine::new(
                cache,
                FOLLOWERS,
                ApiFetcher::new(client, routes::followers, "followers"),
            )
            .with_policy(live),
            following: LookupEngine::new(
                cache,
                FOLLOWING,
                ApiFetcher::new(client, routes::following, "following")
                    .fallback("not_following", Vec::new),
            )
            .with_policy(live),
            follows: RelationshipEngine::new(
                LookupEngine::new(
                    cache,
                    IS_FOLLOWING,
                    ApiFetcher::new(client, routes::is_following, "is_following")
                        .authenticated()
                        .local(follows_self),
                )
                .with_policy(live),
                ApiMutator::new(
                    client,
                    routes::toggle_follow,
                    "follow_result",
                    |result: FollowResult| result.is_following(),
                ),
            ),
            vehicles: LookupEngine::new(
                cache,
                VEHICLES,
                ApiFetcher::new(client, routes::vehicle, "vehicle"),
            )
            .with_policy(snapshot),
            profile_vehicles: LookupEngine::new(
                cache,
                PROFILE_VEHICLES,
                ApiFetcher::new(client, routes::profile_vehicles, "vehicles"),
            )
            .with_policy(snapshot),
            vehicle_follows: RelationshipEngine::new(
                LookupEngine::new(
                    cache,
                    IS_FOLLOWING_VEHICLE,
                    ApiFetcher::new(client, routes::is_following_vehicle, "is_following")
                        .authenticated(),
                )
                .with_policy(live),
                ApiMutator::new(
                    client,
                    routes::toggle_vehicle_follow,
                    "follow_result",
                    |result: FollowResult| result.is_following(),
                ),
            )
            .with_companion(RefreshFollowingVehicles::new(
                following_vehicles.clone(),
                client.credentials().clone(),
            )),
            following_vehicles,
            vin_decodes: LookupEngine::new(
                cache,
                VIN_DECODES,
                ApiFetcher::new(client, routes::vin_decode, "decode"),
            )
            .with_policy(snapshot),
            recalls: LookupEngine::new(
                cache,
                RECALLS,
                ApiFetcher::new(client, routes::recalls, "recalls"),
            )
            .with_policy(snapshot),
            lists: LookupEngine::new(
                cache,
                LISTS,
                ApiFetcher::new(client, routes::lists, "lists"),
            )
            .with_policy(snapshot),
            memberships: RelationshipEngine::new(
                LookupEngine::new(
                    cache,
                    LIST_MEMBERSHIP,
                    ApiFetcher::new(client, routes::list_membership, "contains").authenticated(),
                )
                .with_policy(live),
                ApiMutator::new(
                    client,
                    routes::toggle_membership,
                    "membership",
                    |result: MembershipResult| result.contains,
                ),
            ),
            notifications: LookupEngine::new(
                cache,
                NOTIFICATIONS,
                ApiFetcher::new(client, routes::notification_count, "notifications")
                    .authenticated(),
            )
            .with_policy(live),
            posts: LookupEngine::new(
                cache,
                POSTS,
                ApiFetcher::new(client, routes::post, "post"),
            )
            .with_policy(snapshot),
            feed: LookupEngine::new(
                cache,
                FEED,
                ApiFetcher::new(client, routes::feed_page, "feed").authenticated(),
            )
            .with_policy(live),
        }
    }
}
