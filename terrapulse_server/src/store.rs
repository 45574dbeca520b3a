//! The persistence seam.
//!
//! Every handler talks to a [`Store`]. [`crate::database::PgStore`] backs it with
//! Postgres; [`crate::database::MemoryStore`] keeps the same contract in memory
//! for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use terrapulse_common::SensorType;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unique constraint violated: {0}")]
    Duplicate(String),
    #[error("corrupt column value {0}")]
    Corrupt(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lookup of the reward configuration in force right now.
#[async_trait]
pub trait RewardIndexSource: Send + Sync {
    /// Most recently created active index, if any.
    async fn active_reward_index(&self) -> Result<Option<RewardIndex>, StoreError>;
}

/// A fixed configuration, for callers that already know which index applies.
pub struct FixedRewardIndex(pub Option<RewardIndex>);

#[async_trait]
impl RewardIndexSource for FixedRewardIndex {
    async fn active_reward_index(&self) -> Result<Option<RewardIndex>, StoreError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
pub trait Store: RewardIndexSource {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn user_by_privy_id(&self, privy_id: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_wallet(&self, public_key: &str) -> Result<Option<User>, StoreError>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User, StoreError>;

    async fn insert_wallet(&self, new: NewWallet) -> Result<Wallet, StoreError>;
    async fn wallet(&self, id: Uuid) -> Result<Option<Wallet>, StoreError>;
    async fn wallet_by_key(&self, public_key: &str) -> Result<Option<Wallet>, StoreError>;
    async fn wallets_for_user(&self, user_id: Uuid) -> Result<Vec<Wallet>, StoreError>;
    /// The first wallet linked by each user, ordered by user.
    async fn sync_wallets(&self) -> Result<Vec<Wallet>, StoreError>;

    async fn insert_location(&self, new: NewLocation) -> Result<Location, StoreError>;
    async fn location(&self, id: Uuid) -> Result<Option<Location>, StoreError>;
    async fn locations(&self, page: Page) -> Result<Paged<Location>, StoreError>;

    async fn insert_device(&self, new: NewDevice) -> Result<Device, StoreError>;
    async fn device(&self, id: Uuid) -> Result<Option<Device>, StoreError>;
    async fn device_by_identifier(&self, device_id: &str) -> Result<Option<Device>, StoreError>;
    /// Ordered by last seen, most recent first.
    async fn devices(&self, filter: &DeviceFilter, page: Page) -> Result<Paged<Device>, StoreError>;
    /// Matching devices counted per status, keyed by the status string.
    async fn device_status_counts(
        &self,
        filter: &DeviceFilter,
    ) -> Result<BTreeMap<String, i64>, StoreError>;
    async fn update_device(&self, id: Uuid, changes: DeviceChanges) -> Result<Device, StoreError>;
    async fn touch_device(&self, id: Uuid, seen_at: OffsetDateTime) -> Result<(), StoreError>;

    async fn insert_sensor(&self, new: NewSensor) -> Result<Sensor, StoreError>;
    async fn sensor_of_type(
        &self,
        device_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<Sensor>, StoreError>;
    /// Ordered by creation, newest first.
    async fn sensors(&self, filter: &SensorFilter, page: Page) -> Result<Paged<Sensor>, StoreError>;

    async fn insert_reading(&self, new: NewReading) -> Result<SensorReading, StoreError>;
    /// Ordered by recording time, newest first.
    async fn readings(
        &self,
        filter: &ReadingFilter,
        page: Page,
    ) -> Result<Paged<SensorReading>, StoreError>;

    async fn reading_stats(&self, filter: &ReadingFilter) -> Result<ReadingStats, StoreError>;

    async fn append_ledger(&self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;
    /// Ordered by creation, newest first.
    async fn ledger(&self, filter: &LedgerFilter, page: Page) -> Result<Paged<LedgerEntry>, StoreError>;
    async fn ledger_total(&self, filter: &LedgerFilter) -> Result<f64, StoreError>;
    /// Ordered by reason.
    async fn ledger_by_reason(&self, filter: &LedgerFilter) -> Result<Vec<ReasonTotal>, StoreError>;
    async fn unsynced_entries(&self, user_id: Uuid) -> Result<Vec<UnsyncedEntry>, StoreError>;
    /// Flips `synced` from false to true for the given rows and returns the
    /// ids that actually flipped. Rows already synced are left untouched.
    async fn mark_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError>;
    /// Inverse of [`Store::mark_synced`].
    async fn release_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError>;

    async fn insert_reward_index(&self, new: NewRewardIndex) -> Result<RewardIndex, StoreError>;

    async fn insert_claim(&self, new: NewClaim) -> Result<RewardClaim, StoreError>;
    /// Ordered by request time, newest first.
    async fn claims(&self, filter: &ClaimFilter, page: Page) -> Result<Paged<RewardClaim>, StoreError>;
    async fn claim_stats(&self, filter: &ClaimFilter) -> Result<ClaimStats, StoreError>;
    /// Points spent by the user's pending, processing and completed claims.
    async fn committed_claim_points(&self, user_id: Uuid) -> Result<f64, StoreError>;
}
