use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use terrapulse_common::{ClaimStatus, DeviceStatus, SensorType};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub privy_id: String,
    pub email: String,
    pub name: Option<String>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub privy_id: String,
    pub email: String,
    pub name: Option<String>,
    pub meta: Value,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub meta: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub public_key: String,
    pub provider: Option<String>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: Uuid,
    pub public_key: String,
    pub provider: Option<String>,
    pub meta: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: Option<String>,
    pub region: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Uuid,
    /// Identifier burned into the hardware, unique across the fleet.
    pub device_id: String,
    pub name: Option<String>,
    pub owner_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub public_key: Option<String>,
    pub status: DeviceStatus,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub tags: Vec<String>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_id: String,
    pub name: Option<String>,
    pub owner_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub public_key: Option<String>,
    pub status: DeviceStatus,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub tags: Vec<String>,
    pub meta: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceChanges {
    pub name: Option<String>,
    pub status: Option<DeviceStatus>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub location_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: Uuid,
    pub device_id: Uuid,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub sample_rate: Option<i32>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSensor {
    pub device_id: Uuid,
    pub sensor_type: SensorType,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub sample_rate: Option<i32>,
    pub meta: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: Uuid,
    pub device_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub sensor_type: SensorType,
    pub value: f64,
    pub value_unit: Option<String>,
    pub raw_payload: Value,
    pub quality_score: f64,
    pub validated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    pub ipfs_cid: Option<String>,
    pub onchain_proof: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReading {
    pub device_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub sensor_type: SensorType,
    pub value: f64,
    pub value_unit: Option<String>,
    pub raw_payload: Value,
    pub quality_score: f64,
    pub validated: bool,
    pub recorded_at: OffsetDateTime,
    pub processed_at: OffsetDateTime,
    pub ipfs_cid: Option<String>,
    pub onchain_proof: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub reading_id: Option<Uuid>,
    pub points: f64,
    pub reason: String,
    pub meta: Value,
    pub synced: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub reading_id: Option<Uuid>,
    pub points: f64,
    pub reason: String,
    pub meta: Value,
}

/// An unsynced ledger row together with the sensor type of its reading.
/// Rows awarded by hand have no reading and therefore no sensor type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnsyncedEntry {
    pub id: Uuid,
    pub points: f64,
    pub sensor_type: Option<SensorType>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RewardMultipliers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RewardIndex {
    pub id: Uuid,
    pub base_points: f64,
    pub sensor_boosts: BTreeMap<SensorType, f64>,
    #[serde(rename = "multiplierJson")]
    pub multipliers: RewardMultipliers,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewRewardIndex {
    pub base_points: f64,
    #[serde(default)]
    pub sensor_boosts: BTreeMap<SensorType, f64>,
    #[serde(default, rename = "multiplierJson")]
    pub multipliers: RewardMultipliers,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub points_spent: f64,
    pub tokens_issued: f64,
    pub status: ClaimStatus,
    pub note: Option<String>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewClaim {
    pub user_id: Uuid,
    pub points_spent: f64,
    pub tokens_issued: f64,
    pub status: ClaimStatus,
    pub note: Option<String>,
    pub meta: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub owner_id: Option<Uuid>,
    pub status: Option<DeviceStatus>,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorFilter {
    pub device_id: Option<Uuid>,
    pub sensor_type: Option<SensorType>,
}

#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_id: Option<Uuid>,
    pub sensor_type: Option<SensorType>,
    pub validated: Option<bool>,
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub user_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<ClaimStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: i64) -> Self {
        Self { limit, offset: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Aggregates over the readings matching a [`ReadingFilter`].
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStats {
    pub average_value: Option<f64>,
    pub average_quality: Option<f64>,
    pub total_readings: i64,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStats {
    pub total_points_spent: f64,
    pub total_tokens_issued: f64,
    pub total_claims: i64,
}

/// Ledger points grouped by reason code.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReasonTotal {
    pub reason: String,
    pub points: f64,
    pub entries: i64,
}
