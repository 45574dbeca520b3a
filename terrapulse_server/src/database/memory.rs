//! In-memory [`Store`] with the same ordering and uniqueness rules as the
//! Postgres tables. Used by the test-suite and by `--in-memory` runs.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use terrapulse_common::SensorType;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::*;
use crate::store::{RewardIndexSource, Store, StoreError};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    wallets: Vec<Wallet>,
    locations: Vec<Location>,
    devices: Vec<Device>,
    sensors: Vec<Sensor>,
    readings: Vec<SensorReading>,
    ledger: Vec<LedgerEntry>,
    reward_indexes: Vec<RewardIndex>,
    claims: Vec<RewardClaim>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first by `key`; rows inserted later win ties.
fn page_of<T: Clone, K: Ord>(
    rows: &[T],
    keep: impl Fn(&T) -> bool,
    key: impl Fn(&T) -> K,
    page: Page,
) -> Paged<T> {
    let mut matching: Vec<&T> = rows.iter().rev().filter(|row| keep(row)).collect();
    matching.sort_by_key(|row| Reverse(key(row)));
    let total = matching.len() as i64;
    let items = matching
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .cloned()
        .collect();
    Paged { items, total }
}

fn within(at: OffsetDateTime, start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> bool {
    start.map_or(true, |s| at >= s) && end.map_or(true, |e| at <= e)
}

#[async_trait]
impl RewardIndexSource for MemoryStore {
    async fn active_reward_index(&self) -> Result<Option<RewardIndex>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .reward_indexes
            .iter()
            .filter(|index| index.active)
            .max_by_key(|index| index.created_at)
            .cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write();
        if tables.users.iter().any(|u| u.privy_id == new.privy_id) {
            return Err(StoreError::Duplicate(format!("users.privy_id = {}", new.privy_id)));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            privy_id: new.privy_id,
            email: new.email,
            name: new.name,
            meta: new.meta,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_privy_id(&self, privy_id: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.users.iter().find(|u| u.privy_id == privy_id).cloned())
    }

    async fn user_by_wallet(&self, public_key: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read();
        let Some(wallet) = tables.wallets.iter().find(|w| w.public_key == public_key) else {
            return Ok(None);
        };
        Ok(tables.users.iter().find(|u| u.id == wallet.user_id).cloned())
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User, StoreError> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound("user"))?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(name) = changes.name {
            user.name = Some(name);
        }
        if let Some(meta) = changes.meta {
            user.meta = meta;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn insert_wallet(&self, new: NewWallet) -> Result<Wallet, StoreError> {
        let mut tables = self.tables.write();
        if tables.wallets.iter().any(|w| w.public_key == new.public_key) {
            return Err(StoreError::Duplicate(format!(
                "wallets.public_key = {}",
                new.public_key
            )));
        }
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            public_key: new.public_key,
            provider: new.provider,
            meta: new.meta,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.wallets.push(wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, id: Uuid) -> Result<Option<Wallet>, StoreError> {
        Ok(self.tables.read().wallets.iter().find(|w| w.id == id).cloned())
    }

    async fn wallet_by_key(&self, public_key: &str) -> Result<Option<Wallet>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.wallets.iter().find(|w| w.public_key == public_key).cloned())
    }

    async fn wallets_for_user(&self, user_id: Uuid) -> Result<Vec<Wallet>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .wallets
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn sync_wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        let tables = self.tables.read();
        let mut first: Vec<Wallet> = Vec::new();
        for wallet in &tables.wallets {
            if !first.iter().any(|w| w.user_id == wallet.user_id) {
                first.push(wallet.clone());
            }
        }
        first.sort_by_key(|w| w.user_id);
        Ok(first)
    }

    async fn insert_location(&self, new: NewLocation) -> Result<Location, StoreError> {
        let location = Location {
            id: Uuid::new_v4(),
            name: new.name,
            latitude: new.latitude,
            longitude: new.longitude,
            country: new.country,
            region: new.region,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.write().locations.push(location.clone());
        Ok(location)
    }

    async fn location(&self, id: Uuid) -> Result<Option<Location>, StoreError> {
        Ok(self.tables.read().locations.iter().find(|l| l.id == id).cloned())
    }

    async fn locations(&self, page: Page) -> Result<Paged<Location>, StoreError> {
        let tables = self.tables.read();
        let mut sorted = tables.locations.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let total = sorted.len() as i64;
        let items = sorted
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect();
        Ok(Paged { items, total })
    }

    async fn insert_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        let mut tables = self.tables.write();
        if tables.devices.iter().any(|d| d.device_id == new.device_id) {
            return Err(StoreError::Duplicate(format!(
                "devices.device_id = {}",
                new.device_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let device = Device {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            name: new.name,
            owner_id: new.owner_id,
            wallet_id: new.wallet_id,
            location_id: new.location_id,
            public_key: new.public_key,
            status: new.status,
            model: new.model,
            firmware_version: new.firmware_version,
            tags: new.tags,
            meta: new.meta,
            last_seen_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        tables.devices.push(device.clone());
        Ok(device)
    }

    async fn device(&self, id: Uuid) -> Result<Option<Device>, StoreError> {
        Ok(self.tables.read().devices.iter().find(|d| d.id == id).cloned())
    }

    async fn device_by_identifier(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.devices.iter().find(|d| d.device_id == device_id).cloned())
    }

    async fn devices(&self, filter: &DeviceFilter, page: Page) -> Result<Paged<Device>, StoreError> {
        let tables = self.tables.read();
        Ok(page_of(
            &tables.devices,
            |d| device_matches(d, filter),
            |d| d.last_seen_at,
            page,
        ))
    }

    async fn device_status_counts(
        &self,
        filter: &DeviceFilter,
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let tables = self.tables.read();
        let mut counts = BTreeMap::new();
        for device in tables.devices.iter().filter(|d| device_matches(d, filter)) {
            *counts.entry(device.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn update_device(&self, id: Uuid, changes: DeviceChanges) -> Result<Device, StoreError> {
        let mut tables = self.tables.write();
        let device = tables
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(StoreError::NotFound("device"))?;
        if let Some(name) = changes.name {
            device.name = Some(name);
        }
        if let Some(status) = changes.status {
            device.status = status;
        }
        if let Some(model) = changes.model {
            device.model = Some(model);
        }
        if let Some(firmware_version) = changes.firmware_version {
            device.firmware_version = Some(firmware_version);
        }
        if let Some(location_id) = changes.location_id {
            device.location_id = Some(location_id);
        }
        if let Some(tags) = changes.tags {
            device.tags = tags;
        }
        if let Some(meta) = changes.meta {
            device.meta = meta;
        }
        device.updated_at = OffsetDateTime::now_utc();
        Ok(device.clone())
    }

    async fn touch_device(&self, id: Uuid, seen_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(device) = tables.devices.iter_mut().find(|d| d.id == id) {
            device.last_seen_at = Some(seen_at);
        }
        Ok(())
    }

    async fn insert_sensor(&self, new: NewSensor) -> Result<Sensor, StoreError> {
        let mut tables = self.tables.write();
        if tables
            .sensors
            .iter()
            .any(|s| s.device_id == new.device_id && s.sensor_type == new.sensor_type)
        {
            return Err(StoreError::Duplicate(format!(
                "sensors.(device_id, sensor_type) = ({}, {})",
                new.device_id, new.sensor_type
            )));
        }
        let sensor = Sensor {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            sensor_type: new.sensor_type,
            label: new.label,
            unit: new.unit,
            sample_rate: new.sample_rate,
            meta: new.meta,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.sensors.push(sensor.clone());
        Ok(sensor)
    }

    async fn sensor_of_type(
        &self,
        device_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<Sensor>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .sensors
            .iter()
            .find(|s| s.device_id == device_id && s.sensor_type == sensor_type)
            .cloned())
    }

    async fn sensors(&self, filter: &SensorFilter, page: Page) -> Result<Paged<Sensor>, StoreError> {
        let tables = self.tables.read();
        Ok(page_of(
            &tables.sensors,
            |s| {
                filter.device_id.map_or(true, |d| s.device_id == d)
                    && filter.sensor_type.map_or(true, |t| s.sensor_type == t)
            },
            |s| s.created_at,
            page,
        ))
    }

    async fn insert_reading(&self, new: NewReading) -> Result<SensorReading, StoreError> {
        let reading = SensorReading {
            id: Uuid::new_v4(),
            device_id: new.device_id,
            sensor_id: new.sensor_id,
            sensor_type: new.sensor_type,
            value: new.value,
            value_unit: new.value_unit,
            raw_payload: new.raw_payload,
            quality_score: new.quality_score,
            validated: new.validated,
            recorded_at: new.recorded_at,
            processed_at: Some(new.processed_at),
            ipfs_cid: new.ipfs_cid,
            onchain_proof: new.onchain_proof,
        };
        self.tables.write().readings.push(reading.clone());
        Ok(reading)
    }

    async fn readings(
        &self,
        filter: &ReadingFilter,
        page: Page,
    ) -> Result<Paged<SensorReading>, StoreError> {
        let tables = self.tables.read();
        Ok(page_of(
            &tables.readings,
            |r| reading_matches(r, filter),
            |r| r.recorded_at,
            page,
        ))
    }

    async fn reading_stats(&self, filter: &ReadingFilter) -> Result<ReadingStats, StoreError> {
        let tables = self.tables.read();
        let matching: Vec<&SensorReading> =
            tables.readings.iter().filter(|r| reading_matches(r, filter)).collect();
        if matching.is_empty() {
            return Ok(ReadingStats::default());
        }
        let n = matching.len() as f64;
        Ok(ReadingStats {
            average_value: Some(matching.iter().map(|r| r.value).sum::<f64>() / n),
            average_quality: Some(matching.iter().map(|r| r.quality_score).sum::<f64>() / n),
            total_readings: matching.len() as i64,
        })
    }

    async fn append_ledger(&self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            device_id: new.device_id,
            reading_id: new.reading_id,
            points: new.points,
            reason: new.reason,
            meta: new.meta,
            synced: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.write().ledger.push(entry.clone());
        Ok(entry)
    }

    async fn ledger(&self, filter: &LedgerFilter, page: Page) -> Result<Paged<LedgerEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(page_of(
            &tables.ledger,
            |e| ledger_matches(e, filter),
            |e| e.created_at,
            page,
        ))
    }

    async fn ledger_total(&self, filter: &LedgerFilter) -> Result<f64, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .ledger
            .iter()
            .filter(|e| ledger_matches(e, filter))
            .map(|e| e.points)
            .sum())
    }

    async fn ledger_by_reason(&self, filter: &LedgerFilter) -> Result<Vec<ReasonTotal>, StoreError> {
        let tables = self.tables.read();
        let mut by_reason: BTreeMap<&str, (f64, i64)> = BTreeMap::new();
        for entry in tables.ledger.iter().filter(|e| ledger_matches(e, filter)) {
            let total = by_reason.entry(entry.reason.as_str()).or_insert((0.0, 0));
            total.0 += entry.points;
            total.1 += 1;
        }
        Ok(by_reason
            .into_iter()
            .map(|(reason, (points, entries))| ReasonTotal {
                reason: reason.to_string(),
                points,
                entries,
            })
            .collect())
    }

    async fn unsynced_entries(&self, user_id: Uuid) -> Result<Vec<UnsyncedEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id && !e.synced)
            .map(|e| UnsyncedEntry {
                id: e.id,
                points: e.points,
                sensor_type: e.reading_id.and_then(|reading_id| {
                    tables
                        .readings
                        .iter()
                        .find(|r| r.id == reading_id)
                        .map(|r| r.sensor_type)
                }),
            })
            .collect())
    }

    async fn mark_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.flip_synced(ids, false, true))
    }

    async fn release_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.flip_synced(ids, true, false))
    }

    async fn insert_reward_index(&self, new: NewRewardIndex) -> Result<RewardIndex, StoreError> {
        let index = RewardIndex {
            id: Uuid::new_v4(),
            base_points: new.base_points,
            sensor_boosts: new.sensor_boosts,
            multipliers: new.multipliers,
            active: new.active,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.write().reward_indexes.push(index.clone());
        Ok(index)
    }

    async fn insert_claim(&self, new: NewClaim) -> Result<RewardClaim, StoreError> {
        let now = OffsetDateTime::now_utc();
        let claim = RewardClaim {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            points_spent: new.points_spent,
            tokens_issued: new.tokens_issued,
            status: new.status,
            note: new.note,
            meta: new.meta,
            requested_at: now,
            updated_at: now,
        };
        self.tables.write().claims.push(claim.clone());
        Ok(claim)
    }

    async fn claims(&self, filter: &ClaimFilter, page: Page) -> Result<Paged<RewardClaim>, StoreError> {
        let tables = self.tables.read();
        Ok(page_of(
            &tables.claims,
            |c| claim_matches(c, filter),
            |c| c.requested_at,
            page,
        ))
    }

    async fn claim_stats(&self, filter: &ClaimFilter) -> Result<ClaimStats, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .claims
            .iter()
            .filter(|c| claim_matches(c, filter))
            .fold(ClaimStats::default(), |mut stats, claim| {
                stats.total_points_spent += claim.points_spent;
                stats.total_tokens_issued += claim.tokens_issued;
                stats.total_claims += 1;
                stats
            }))
    }

    async fn committed_claim_points(&self, user_id: Uuid) -> Result<f64, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .claims
            .iter()
            .filter(|c| c.user_id == user_id && c.status.is_committed())
            .map(|c| c.points_spent)
            .sum())
    }
}

impl MemoryStore {
    fn flip_synced(&self, ids: &[Uuid], from: bool, to: bool) -> Vec<Uuid> {
        let mut tables = self.tables.write();
        let mut flipped = Vec::new();
        for entry in tables.ledger.iter_mut() {
            if entry.synced == from && ids.contains(&entry.id) {
                entry.synced = to;
                flipped.push(entry.id);
            }
        }
        flipped
    }
}

fn device_matches(device: &Device, filter: &DeviceFilter) -> bool {
    filter.owner_id.map_or(true, |o| device.owner_id == o)
        && filter.status.map_or(true, |s| device.status == s)
        && filter.location_id.map_or(true, |l| device.location_id == Some(l))
}

fn reading_matches(reading: &SensorReading, filter: &ReadingFilter) -> bool {
    filter.device_id.map_or(true, |d| reading.device_id == d)
        && filter.sensor_type.map_or(true, |t| reading.sensor_type == t)
        && filter.validated.map_or(true, |v| reading.validated == v)
        && within(reading.recorded_at, filter.start, filter.end)
}

fn claim_matches(claim: &RewardClaim, filter: &ClaimFilter) -> bool {
    filter.user_id.map_or(true, |u| claim.user_id == u)
        && filter.status.map_or(true, |s| claim.status == s)
}

fn ledger_matches(entry: &LedgerEntry, filter: &LedgerFilter) -> bool {
    filter.user_id.map_or(true, |u| entry.user_id == u)
        && filter.device_id.map_or(true, |d| entry.device_id == Some(d))
        && within(entry.created_at, filter.start, filter.end)
}
