use std::collections::BTreeMap;
use std::str::FromStr;

use crate::database::schema::{
    devices, locations, points_ledger, reward_claims, reward_indexes, sensor_readings, sensors,
    users, wallets,
};
use crate::models;
use crate::store::StoreError;
use diesel::prelude::*;
use serde_json::Value;
use terrapulse_common::SensorType;
use time::OffsetDateTime;
use uuid::Uuid;

fn parse_enum<T: FromStr>(column: &str, raw: &str) -> Result<T, StoreError> {
    T::from_str(raw).map_err(|_| StoreError::Corrupt(format!("{column} = {raw:?}")))
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub privy_id: String,
    pub email: String,
    pub name: Option<String>,
    pub meta: Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn from_new(new: models::NewUser, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            privy_id: new.privy_id,
            email: new.email,
            name: new.name,
            meta: new.meta,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<User> for models::User {
    fn from(row: User) -> Self {
        Self {
            id: row.id,
            privy_id: row.privy_id,
            email: row.email,
            name: row.name,
            meta: row.meta,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = users)]
pub struct UserChangeset {
    pub email: Option<String>,
    pub name: Option<String>,
    pub meta: Option<Value>,
    pub updated_at: OffsetDateTime,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Insertable, Debug)]
#[diesel(table_name = wallets)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub public_key: String,
    pub provider: Option<String>,
    pub meta: Value,
    pub created_at: OffsetDateTime,
}

impl Wallet {
    pub fn from_new(new: models::NewWallet, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            public_key: new.public_key,
            provider: new.provider,
            meta: new.meta,
            created_at: now,
        }
    }
}

impl From<Wallet> for models::Wallet {
    fn from(row: Wallet) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            public_key: row.public_key,
            provider: row.provider,
            meta: row.meta,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = locations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: Option<String>,
    pub region: Option<String>,
    pub created_at: OffsetDateTime,
}

impl Location {
    pub fn from_new(new: models::NewLocation, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new.name,
            latitude: new.latitude,
            longitude: new.longitude,
            country: new.country,
            region: new.region,
            created_at: now,
        }
    }
}

impl From<Location> for models::Location {
    fn from(row: Location) -> Self {
        Self {
            id: row.id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            country: row.country,
            region: row.region,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = devices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Device {
    pub id: Uuid,
    pub device_id: String,
    pub name: Option<String>,
    pub owner_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub public_key: Option<String>,
    pub status: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub tags: Vec<String>,
    pub meta: Value,
    pub last_seen_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Device {
    pub fn from_new(new: models::NewDevice, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            name: new.name,
            owner_id: new.owner_id,
            wallet_id: new.wallet_id,
            location_id: new.location_id,
            public_key: new.public_key,
            status: new.status.to_string(),
            model: new.model,
            firmware_version: new.firmware_version,
            tags: new.tags,
            meta: new.meta,
            last_seen_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<Device> for models::Device {
    type Error = StoreError;

    fn try_from(row: Device) -> Result<Self, Self::Error> {
        Ok(Self {
            status: parse_enum("devices.status", &row.status)?,
            id: row.id,
            device_id: row.device_id,
            name: row.name,
            owner_id: row.owner_id,
            wallet_id: row.wallet_id,
            location_id: row.location_id,
            public_key: row.public_key,
            model: row.model,
            firmware_version: row.firmware_version,
            tags: row.tags,
            meta: row.meta,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = devices)]
pub struct DeviceChangeset {
    pub name: Option<String>,
    pub status: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub location_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<Value>,
    pub updated_at: OffsetDateTime,
}

impl DeviceChangeset {
    pub fn new(changes: models::DeviceChanges, now: OffsetDateTime) -> Self {
        Self {
            name: changes.name,
            status: changes.status.map(|s| s.to_string()),
            model: changes.model,
            firmware_version: changes.firmware_version,
            location_id: changes.location_id,
            tags: changes.tags,
            meta: changes.meta,
            updated_at: now,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Associations, Insertable, Debug)]
#[diesel(table_name = sensors)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Sensor {
    pub id: Uuid,
    pub device_id: Uuid,
    pub sensor_type: String,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub sample_rate: Option<i32>,
    pub meta: Value,
    pub created_at: OffsetDateTime,
}

impl Sensor {
    pub fn from_new(new: models::NewSensor, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            sensor_type: new.sensor_type.to_string(),
            label: new.label,
            unit: new.unit,
            sample_rate: new.sample_rate,
            meta: new.meta,
            created_at: now,
        }
    }
}

impl TryFrom<Sensor> for models::Sensor {
    type Error = StoreError;

    fn try_from(row: Sensor) -> Result<Self, Self::Error> {
        Ok(Self {
            sensor_type: parse_enum("sensors.sensor_type", &row.sensor_type)?,
            id: row.id,
            device_id: row.device_id,
            label: row.label,
            unit: row.unit,
            sample_rate: row.sample_rate,
            meta: row.meta,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Identifiable, Associations, Insertable, Debug)]
#[diesel(table_name = sensor_readings)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SensorReading {
    pub id: Uuid,
    pub device_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub sensor_type: String,
    pub value: f64,
    pub value_unit: Option<String>,
    pub raw_payload: Value,
    pub quality_score: f64,
    pub validated: bool,
    pub recorded_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
    pub ipfs_cid: Option<String>,
    pub onchain_proof: Option<String>,
}

impl SensorReading {
    pub fn from_new(new: models::NewReading) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            sensor_id: new.sensor_id,
            sensor_type: new.sensor_type.to_string(),
            value: new.value,
            value_unit: new.value_unit,
            raw_payload: new.raw_payload,
            quality_score: new.quality_score,
            validated: new.validated,
            recorded_at: new.recorded_at,
            processed_at: Some(new.processed_at),
            ipfs_cid: new.ipfs_cid,
            onchain_proof: new.onchain_proof,
        }
    }
}

impl TryFrom<SensorReading> for models::SensorReading {
    type Error = StoreError;

    fn try_from(row: SensorReading) -> Result<Self, Self::Error> {
        Ok(Self {
            sensor_type: parse_enum("sensor_readings.sensor_type", &row.sensor_type)?,
            id: row.id,
            device_id: row.device_id,
            sensor_id: row.sensor_id,
            value: row.value,
            value_unit: row.value_unit,
            raw_payload: row.raw_payload,
            quality_score: row.quality_score,
            validated: row.validated,
            recorded_at: row.recorded_at,
            processed_at: row.processed_at,
            ipfs_cid: row.ipfs_cid,
            onchain_proof: row.onchain_proof,
        })
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = points_ledger)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub reading_id: Option<Uuid>,
    pub points: f64,
    pub reason: String,
    pub meta: Value,
    pub synced: bool,
    pub created_at: OffsetDateTime,
}

impl LedgerEntry {
    pub fn from_new(new: models::NewLedgerEntry, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            device_id: new.device_id,
            reading_id: new.reading_id,
            points: new.points,
            reason: new.reason,
            meta: new.meta,
            synced: false,
            created_at: now,
        }
    }
}

impl From<LedgerEntry> for models::LedgerEntry {
    fn from(row: LedgerEntry) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            device_id: row.device_id,
            reading_id: row.reading_id,
            points: row.points,
            reason: row.reason,
            meta: row.meta,
            synced: row.synced,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = reward_indexes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RewardIndex {
    pub id: Uuid,
    pub base_points: f64,
    pub sensor_boosts: Value,
    pub multiplier_json: Value,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl RewardIndex {
    pub fn from_new(new: models::NewRewardIndex, now: OffsetDateTime) -> Result<Self, StoreError> {
        Ok(Self {
            id: Uuid::new_v4(),
            base_points: new.base_points,
            sensor_boosts: serde_json::to_value(&new.sensor_boosts)?,
            multiplier_json: serde_json::to_value(&new.multipliers)?,
            active: new.active,
            created_at: now,
        })
    }
}

impl From<RewardIndex> for models::RewardIndex {
    /// Boost keys that are not a known sensor type, and multipliers that do
    /// not parse, are ignored rather than failing the whole lookup.
    fn from(row: RewardIndex) -> Self {
        let sensor_boosts = serde_json::from_value::<BTreeMap<String, f64>>(row.sensor_boosts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, boost)| SensorType::from_str(&key).ok().map(|t| (t, boost)))
            .collect();
        let multipliers = serde_json::from_value(row.multiplier_json).unwrap_or_default();

        Self {
            id: row.id,
            base_points: row.base_points,
            sensor_boosts,
            multipliers,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug)]
#[diesel(table_name = reward_claims)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RewardClaim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub points_spent: f64,
    pub tokens_issued: f64,
    pub status: String,
    pub note: Option<String>,
    pub meta: Value,
    pub requested_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl RewardClaim {
    pub fn from_new(new: models::NewClaim, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            points_spent: new.points_spent,
            tokens_issued: new.tokens_issued,
            status: new.status.to_string(),
            note: new.note,
            meta: new.meta,
            requested_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<RewardClaim> for models::RewardClaim {
    type Error = StoreError;

    fn try_from(row: RewardClaim) -> Result<Self, Self::Error> {
        Ok(Self {
            status: parse_enum("reward_claims.status", &row.status)?,
            id: row.id,
            user_id: row.user_id,
            points_spent: row.points_spent,
            tokens_issued: row.tokens_issued,
            note: row.note,
            meta: row.meta,
            requested_at: row.requested_at,
            updated_at: row.updated_at,
        })
    }
}
