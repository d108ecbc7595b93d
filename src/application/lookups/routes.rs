use crate::infra::http::Route;

/// Key of the first feed page; later pages are keyed by their cursor.
pub const FEED_HEAD: &str = "head";

const MEMBERSHIP_SEPARATOR: char = ':';

/// Key of "is `item_id` in `list_id`".
pub fn membership_key(list_id: &str, item_id: &str) -> String {
    format!("{list_id}{MEMBERSHIP_SEPARATOR}{item_id}")
}

pub fn split_membership_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(MEMBERSHIP_SEPARATOR)
        .filter(|(list, item)| !list.is_empty() && !item.is_empty())
}

pub(super) fn session(_identity: &str) -> Route {
    Route::new("api/v1/session")
}

pub(super) fn profile(uuid: &str) -> Route {
    Route::new("api/v1/profiles").segment(uuid)
}

pub(super) fn followers(uuid: &str) -> Route {
    Route::new("api/v1/profiles").segment(uuid).segment("followers")
}

pub(super) fn following(uuid: &str) -> Route {
    Route::new("api/v1/profiles").segment(uuid).segment("following")
}

pub(super) fn is_following(uuid: &str) -> Route {
    Route::new("api/v1/follows").segment(uuid)
}

pub(super) fn toggle_follow(uuid: &str) -> Route {
    Route::new("api/v1/follows").segment(uuid).segment("toggle")
}

pub(super) fn vehicle(vehicle_id: &str) -> Route {
    Route::new("api/v1/vehicles").segment(vehicle_id)
}

pub(super) fn profile_vehicles(uuid: &str) -> Route {
    Route::new("api/v1/profiles").segment(uuid).segment("vehicles")
}

pub(super) fn following_vehicles(uuid: &str) -> Route {
    Route::new("api/v1/profiles")
        .segment(uuid)
        .segment("following-vehicles")
}

pub(super) fn is_following_vehicle(vehicle_id: &str) -> Route {
    Route::new("api/v1/vehicles").segment(vehicle_id).segment("follow")
}

pub(super) fn toggle_vehicle_follow(vehicle_id: &str) -> Route {
    is_following_vehicle(vehicle_id).segment("toggle")
}

pub(super) fn vin_decode(vin: &str) -> Route {
    Route::new("api/v1/vin").segment(vin)
}

pub(super) fn recalls(vin: &str) -> Route {
    vin_decode(vin).segment("recalls")
}

pub(super) fn lists(uuid: &str) -> Route {
    Route::new("api/v1/profiles").segment(uuid).segment("lists")
}

pub(super) fn list_membership(key: &str) -> Route {
    let (list, item) = split_membership_key(key).unwrap_or((key, ""));
    Route::new("api/v1/lists")
        .segment(list)
        .segment("items")
        .segment(item)
}

pub(super) fn toggle_membership(key: &str) -> Route {
    list_membership(key).segment("toggle")
}

pub(super) fn notification_count(_identity: &str) -> Route {
    Route::new("api/v1/notifications/count")
}

pub(super) fn post(post_id: &str) -> Route {
    Route::new("api/v1/posts").segment(post_id)
}

pub(super) fn feed_page(cursor: &str) -> Route {
    let route = Route::new("api/v1/feed");
    if cursor == FEED_HEAD {
        route
    } else {
        route.query("cursor", cursor)
    }
}
