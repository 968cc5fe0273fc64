//! Wire payloads of the Netpulse mobile backend
//!
//! Field names follow the upstream JSON (camelCase). These structs are the
//! only place the wire shapes appear; everything past the fetch layer works
//! on the canonical types in [`crate::domain::types`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw check-in record as returned by the visit-history endpoint.
///
/// `checkInDate` is a naive ISO-8601 timestamp in the gym's local time;
/// `duration` is in milliseconds, with `0` meaning the visit is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCheckIn {
    pub gym_location_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gym_location_address: Option<String>,
    pub check_in_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub duration: u64,
}

/// Response body of the visit-history endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitHistoryPayload {
    #[serde(default)]
    pub check_ins: Vec<RawCheckIn>,
}

/// One hourly slot of the occupancy histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyOccupancy {
    pub hour: String,
    pub percentage: u32,
}

/// Response body of the gym-busyness endpoint. Passed through to the
/// snapshot verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyPayload {
    pub gym_location_id: Uuid,
    pub gym_location_name: String,
    pub current_capacity: u32,
    pub current_percentage: u32,
    #[serde(default)]
    pub historical: Vec<HourlyOccupancy>,
    pub status: String,
}

/// Account fields nested under `customInfo` in the login response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_status: Option<String>,
}

/// Member profile returned by the login endpoint.
///
/// `uuid` and `home_club_uuid` drive the fetch URLs; the remaining fields
/// are account metadata exposed downstream as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uuid: Uuid,
    pub home_club_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_club_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_info: Option<CustomInfo>,
}
