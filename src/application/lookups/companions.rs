use async_trait::async_trait;
use pitlane_api_types::VehicleRecord;

use crate::cache::{CancelToken, CompanionRefresh, FetchError, LookupEngine};
use crate::infra::http::Credentials;

/// Re-reads the acting identity's "following vehicles" list after a vehicle
/// follow toggle commits.
pub struct RefreshFollowingVehicles {
    following_vehicles: LookupEngine<Vec<VehicleRecord>>,
    credentials: Credentials,
}

impl RefreshFollowingVehicles {
    pub fn new(
        following_vehicles: LookupEngine<Vec<VehicleRecord>>,
        credentials: Credentials,
    ) -> Self {
        Self {
            following_vehicles,
            credentials,
        }
    }
}

#[async_trait]
impl CompanionRefresh for RefreshFollowingVehicles {
    fn name(&self) -> &'static str {
        "following_vehicles"
    }

    async fn refresh(&self, _vehicle_id: &str, _confirmed: bool) -> Result<(), FetchError> {
        let identity = self
            .credentials
            .identity()
            .ok_or_else(|| FetchError::Precondition("no acting identity".into()))?;
        self.following_vehicles
            .revalidate(&identity, &CancelToken::new())
            .await
            .map(|_| ())
    }
}
