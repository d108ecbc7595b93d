//! Shared request and response shapes for the Pitlane feed API.
//!
//! Every endpoint answers with a [`RawResponse`] envelope: a `status` string,
//! an optional `error` object and one endpoint-specific payload field sitting
//! next to them at the top level, e.g.
//!
//! ```json
//! {"status": "ok", "follow_result": {"state": "unfollowing"}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Envelope status reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    #[serde(other)]
    Error,
}

/// Business-level error carried by a non-`ok` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw response envelope with the payload fields left untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: EnvelopeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawResponse {
    pub fn is_ok(&self) -> bool {
        self.status == EnvelopeStatus::Ok
    }

    /// Removes and decodes one payload field.
    ///
    /// Returns `Ok(None)` when the field is absent.
    pub fn take<T: DeserializeOwned>(&mut self, field: &str) -> Result<Option<T>, serde_json::Error> {
        match self.payload.remove(field) {
            Some(value) => serde_json::from_value(value).map(Some),
            None => Ok(None),
        }
    }

    /// Error code of a non-`ok` envelope, if the server supplied one.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.code.as_str())
    }
}

/// Public profile snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub follower_count: u32,
    #[serde(default)]
    pub following_count: u32,
}

/// Compact profile row used by follower and following lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerSummary {
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    Following,
    Unfollowing,
}

/// Outcome of a follow toggle as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowResult {
    pub state: FollowState,
}

impl FollowResult {
    pub fn is_following(&self) -> bool {
        self.state == FollowState::Following
    }
}

/// Vehicle record owned by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub owner_uuid: String,
    pub year: u16,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Decoded VIN attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinDecode {
    pub vin: String,
    pub make: String,
    pub model: String,
    pub model_year: u16,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default)]
    pub body_class: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
}

/// Safety recall campaign affecting a VIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recall {
    pub campaign_number: String,
    pub component: String,
    pub summary: String,
    #[serde(default)]
    pub consequence: Option<String>,
    #[serde(default)]
    pub remedy: Option<String>,
}

/// Curated list owned by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSummary {
    pub list_id: String,
    pub owner_uuid: String,
    pub title: String,
    #[serde(default)]
    pub item_count: u32,
}

/// Membership state returned by a list toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResult {
    pub contains: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationCount {
    pub unread: u32,
}

/// Feed post snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    pub author_uuid: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

/// One page of the post feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}
