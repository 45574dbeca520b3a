//! Reconciles unsynced ledger points with the reward program.
//!
//! For every user with a wallet, unsynced ledger rows are grouped by the
//! sensor type of their reading and each group is pushed to the matching
//! program bucket. Rows are reserved (flipped to synced) before the program
//! call and released again if the call fails, so a row is credited at most
//! once even when two runs overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use terrapulse_common::{RewardBucket, SensorType};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Wallet;
use crate::program::{ProgramError, RewardProgram};
use crate::store::{Store, StoreError};

pub const UNSUPPORTED_SENSOR_TYPE: &str = "unsupported sensor type";
pub const ALREADY_SYNCING: &str = "already being synced";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Ok,
    Skipped,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketUpdate {
    pub sensor_type: SensorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<RewardBucket>,
    pub points: f64,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BucketUpdate {
    fn new(sensor_type: SensorType, bucket: Option<RewardBucket>, points: f64) -> Self {
        Self { sensor_type, bucket, points, status: SyncStatus::Ok, error: None }
    }

    fn skipped(mut self, reason: &str) -> Self {
        self.status = SyncStatus::Skipped;
        self.error = Some(reason.to_string());
        self
    }

    fn failed(mut self, reason: String) -> Self {
        self.status = SyncStatus::Error;
        self.error = Some(reason);
        self
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSync {
    pub user_id: Uuid,
    pub wallet: String,
    pub updates: Vec<BucketUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub results: Vec<UserSync>,
}

impl SyncReport {
    pub fn updates(&self) -> impl Iterator<Item = &BucketUpdate> {
        self.results.iter().flat_map(|user| user.updates.iter())
    }
}

/// Unsynced points of one user and sensor type.
struct Group {
    total: f64,
    ids: Vec<Uuid>,
}

/// Runs ledger syncs one at a time.
pub struct LedgerSync {
    store: Arc<dyn Store>,
    program: Arc<dyn RewardProgram>,
    admin: String,
    lock: Mutex<()>,
}

impl LedgerSync {
    pub fn new(store: Arc<dyn Store>, program: Arc<dyn RewardProgram>, admin: impl Into<String>) -> Self {
        Self { store, program, admin: admin.into(), lock: Mutex::new(()) }
    }

    pub async fn run(&self) -> Result<SyncReport, StoreError> {
        let _running = self.lock.lock().await;

        let wallets = self.store.sync_wallets().await?;
        let mut report = SyncReport::default();
        for wallet in wallets {
            report.results.push(self.sync_user(&wallet).await);
        }

        let submitted = report.updates().filter(|u| u.status == SyncStatus::Ok).count();
        info!("Ledger sync finished: {} users, {} buckets submitted", report.results.len(), submitted);
        Ok(report)
    }

    async fn sync_user(&self, wallet: &Wallet) -> UserSync {
        let mut result = UserSync {
            user_id: wallet.user_id,
            wallet: wallet.public_key.clone(),
            updates: Vec::new(),
            error: None,
        };

        let entries = match self.store.unsynced_entries(wallet.user_id).await {
            Ok(entries) => entries,
            Err(err) => {
                error!("Could not load unsynced points of {}: {err}", wallet.user_id);
                result.error = Some(err.to_string());
                return result;
            }
        };

        let mut groups: BTreeMap<SensorType, Group> = BTreeMap::new();
        for entry in entries {
            // manual awards carry no reading and never reach the program
            let Some(sensor_type) = entry.sensor_type else {
                continue;
            };
            let group = groups.entry(sensor_type).or_insert(Group { total: 0.0, ids: Vec::new() });
            group.total += entry.points;
            group.ids.push(entry.id);
        }

        let mut user_ready = false;
        for (sensor_type, group) in groups {
            let total = group.total.floor();
            if total <= 0.0 {
                continue;
            }
            let update = BucketUpdate::new(sensor_type, RewardBucket::for_sensor(sensor_type), total);
            let Some(bucket) = update.bucket else {
                result.updates.push(update.skipped(UNSUPPORTED_SENSOR_TYPE));
                continue;
            };
            if total > u32::MAX as f64 {
                let reason = format!("{total} points exceed the program counter");
                result.updates.push(update.failed(reason));
                continue;
            }

            let update = self
                .sync_bucket(wallet, &mut user_ready, bucket, total as u32, &group.ids, update)
                .await;
            match update.status {
                SyncStatus::Ok => info!("Synced {total} {bucket} points for {}", wallet.public_key),
                SyncStatus::Skipped => debug!("Skipped {bucket} for {}: already syncing", wallet.public_key),
                SyncStatus::Error => warn!(
                    "Sync of {bucket} for {} failed: {}",
                    wallet.public_key,
                    update.error.as_deref().unwrap_or_default()
                ),
            }
            result.updates.push(update);
        }
        result
    }

    async fn sync_bucket(
        &self,
        wallet: &Wallet,
        user_ready: &mut bool,
        bucket: RewardBucket,
        amount: u32,
        ids: &[Uuid],
        update: BucketUpdate,
    ) -> BucketUpdate {
        let reserved = match self.store.mark_synced(ids).await {
            Ok(reserved) => reserved,
            Err(err) => return update.failed(err.to_string()),
        };
        if reserved.len() < ids.len() {
            if let Err(err) = self.store.release_synced(&reserved).await {
                return update.failed(format!("{ALREADY_SYNCING}; release failed: {err}"));
            }
            return update.skipped(ALREADY_SYNCING);
        }

        match self.submit(wallet, user_ready, bucket, amount).await {
            Ok(()) => update,
            Err(err) => {
                let mut reason = err.to_string();
                if let Err(release) = self.store.release_synced(&reserved).await {
                    reason.push_str(&format!("; release failed: {release}"));
                }
                update.failed(reason)
            }
        }
    }

    async fn submit(
        &self,
        wallet: &Wallet,
        user_ready: &mut bool,
        bucket: RewardBucket,
        amount: u32,
    ) -> Result<(), ProgramError> {
        let user = wallet.public_key.as_str();
        if !*user_ready {
            if self.program.user_account(user).await?.is_none() {
                self.program.initialize_user(&self.admin, user).await?;
            }
            *user_ready = true;
        }
        self.program.update_points(&self.admin, user, bucket, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::*;
    use crate::program::{RewardRates, SimulatedProgram, UserPoints};
    use async_trait::async_trait;
    use serde_json::json;
    use terrapulse_common::DeviceStatus;
    use time::OffsetDateTime;

    const ADMIN: &str = "AdminKey";

    struct Fixture {
        store: Arc<MemoryStore>,
        program: Arc<SimulatedProgram>,
    }

    impl Fixture {
        async fn new() -> Self {
            let program = Arc::new(SimulatedProgram::new());
            program.initialize(ADMIN, RewardRates::default()).await.unwrap();
            Self { store: Arc::new(MemoryStore::new()), program }
        }

        fn sync(&self) -> LedgerSync {
            LedgerSync::new(self.store.clone(), self.program.clone(), ADMIN)
        }

        async fn user(&self, privy_id: &str, wallet: &str) -> (User, Device) {
            let user = self
                .store
                .insert_user(NewUser {
                    privy_id: privy_id.into(),
                    email: String::new(),
                    name: None,
                    meta: json!({}),
                })
                .await
                .unwrap();
            self.store
                .insert_wallet(NewWallet {
                    user_id: user.id,
                    public_key: wallet.into(),
                    provider: None,
                    meta: json!({}),
                })
                .await
                .unwrap();
            let device = self
                .store
                .insert_device(NewDevice {
                    device_id: format!("{privy_id}-device"),
                    name: None,
                    owner_id: user.id,
                    wallet_id: None,
                    location_id: None,
                    public_key: None,
                    status: DeviceStatus::Active,
                    model: None,
                    firmware_version: None,
                    tags: vec![],
                    meta: json!({}),
                })
                .await
                .unwrap();
            (user, device)
        }

        async fn earn(&self, user: &User, device: &Device, sensor_type: SensorType, points: f64) {
            let now = OffsetDateTime::now_utc();
            let reading = self
                .store
                .insert_reading(NewReading {
                    device_id: device.id,
                    sensor_id: None,
                    sensor_type,
                    value: 1.0,
                    value_unit: None,
                    raw_payload: json!({}),
                    quality_score: 1.0,
                    validated: true,
                    recorded_at: now,
                    processed_at: now,
                    ipfs_cid: None,
                    onchain_proof: None,
                })
                .await
                .unwrap();
            self.store
                .append_ledger(NewLedgerEntry {
                    user_id: user.id,
                    device_id: Some(device.id),
                    reading_id: Some(reading.id),
                    points,
                    reason: "BASE_SUBMISSION".into(),
                    meta: json!({}),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn second_run_submits_nothing() {
        let fx = Fixture::new().await;
        let (user, device) = fx.user("did:privy:a", "WalletA").await;
        fx.earn(&user, &device, SensorType::Temperature, 12.0).await;
        fx.earn(&user, &device, SensorType::Temperature, 3.7).await;
        fx.earn(&user, &device, SensorType::Noise, 5.0).await;

        let sync = fx.sync();
        let report = sync.run().await.unwrap();
        let updates: Vec<_> = report.updates().collect();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.status == SyncStatus::Ok));
        assert_eq!(updates[0].bucket, Some(RewardBucket::Temp));
        assert_eq!(updates[0].points, 15.0);

        let account = fx.program.user_account("WalletA").await.unwrap().unwrap();
        assert_eq!(account.temp_points, 15);
        assert_eq!(account.noise_points, 5);

        let again = sync.run().await.unwrap();
        assert_eq!(again.results.len(), 1);
        assert_eq!(again.updates().count(), 0);
        let account = fx.program.user_account("WalletA").await.unwrap().unwrap();
        assert_eq!(account.temp_points, 15);
    }

    #[tokio::test]
    async fn unsupported_types_and_manual_awards_stay_unsynced() {
        let fx = Fixture::new().await;
        let (user, device) = fx.user("did:privy:b", "WalletB").await;
        fx.earn(&user, &device, SensorType::Humidity, 9.0).await;
        fx.earn(&user, &device, SensorType::Co2, 0.4).await;
        fx.store
            .append_ledger(NewLedgerEntry {
                user_id: user.id,
                device_id: None,
                reading_id: None,
                points: 50.0,
                reason: "BONUS".into(),
                meta: json!({}),
            })
            .await
            .unwrap();

        let report = fx.sync().run().await.unwrap();
        let updates: Vec<_> = report.updates().collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].sensor_type, SensorType::Humidity);
        assert_eq!(updates[0].status, SyncStatus::Skipped);
        assert_eq!(updates[0].error.as_deref(), Some(UNSUPPORTED_SENSOR_TYPE));
        assert_eq!(fx.store.unsynced_entries(user.id).await.unwrap().len(), 3);
    }

    /// Fails every bucket except `ok_for`.
    struct FlakyProgram {
        inner: SimulatedProgram,
        ok_for: RewardBucket,
    }

    #[async_trait]
    impl RewardProgram for FlakyProgram {
        async fn initialize(&self, admin: &str, rates: RewardRates) -> Result<(), ProgramError> {
            self.inner.initialize(admin, rates).await
        }

        async fn initialize_user(&self, admin: &str, user: &str) -> Result<(), ProgramError> {
            self.inner.initialize_user(admin, user).await
        }

        async fn update_points(
            &self,
            admin: &str,
            user: &str,
            bucket: RewardBucket,
            amount: u32,
        ) -> Result<(), ProgramError> {
            if bucket != self.ok_for {
                return Err(ProgramError::Transport("connection reset".into()));
            }
            self.inner.update_points(admin, user, bucket, amount).await
        }

        async fn claim(&self, user: &str) -> Result<u64, ProgramError> {
            self.inner.claim(user).await
        }

        async fn user_account(&self, user: &str) -> Result<Option<UserPoints>, ProgramError> {
            self.inner.user_account(user).await
        }
    }

    #[tokio::test]
    async fn failed_bucket_is_released_and_others_continue() {
        let fx = Fixture::new().await;
        let (alice, alice_device) = fx.user("did:privy:alice", "WalletAlice").await;
        let (bob, bob_device) = fx.user("did:privy:bob", "WalletBob").await;
        fx.earn(&alice, &alice_device, SensorType::Heat, 4.0).await;
        fx.earn(&alice, &alice_device, SensorType::Vibration, 6.0).await;
        fx.earn(&bob, &bob_device, SensorType::Heat, 2.0).await;

        let program = Arc::new(FlakyProgram { inner: SimulatedProgram::new(), ok_for: RewardBucket::Heat });
        program.initialize(ADMIN, RewardRates::default()).await.unwrap();
        let sync = LedgerSync::new(fx.store.clone(), program.clone(), ADMIN);

        let report = sync.run().await.unwrap();
        assert_eq!(report.results.len(), 2);
        let failed: Vec<_> = report.updates().filter(|u| u.status == SyncStatus::Error).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].bucket, Some(RewardBucket::Vibration));
        assert!(failed[0].error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(report.updates().filter(|u| u.status == SyncStatus::Ok).count(), 2);

        let unsynced = fx.store.unsynced_entries(alice.id).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].sensor_type, Some(SensorType::Vibration));
        assert!(fx.store.unsynced_entries(bob.id).await.unwrap().is_empty());

        let bob_account = program.user_account("WalletBob").await.unwrap().unwrap();
        assert_eq!(bob_account.heat_points, 2);
    }

    #[tokio::test]
    async fn rows_reserved_elsewhere_are_skipped() {
        let fx = Fixture::new().await;
        let (user, device) = fx.user("did:privy:c", "WalletC").await;
        fx.earn(&user, &device, SensorType::Noise, 3.0).await;
        fx.earn(&user, &device, SensorType::Noise, 4.0).await;

        // another run already reserved one of the rows
        let entries = fx.store.unsynced_entries(user.id).await.unwrap();
        let taken = fx.store.mark_synced(&[entries[0].id]).await.unwrap();
        assert_eq!(taken.len(), 1);

        // reading the rows happens before the competing reservation here,
        // so drive the bucket step directly with the stale id list
        let sync = fx.sync();
        let wallet = fx.store.sync_wallets().await.unwrap().remove(0);
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        let update = BucketUpdate::new(SensorType::Noise, Some(RewardBucket::Noise), 7.0);
        let update = sync
            .sync_bucket(&wallet, &mut false, RewardBucket::Noise, 7, &ids, update)
            .await;

        assert_eq!(update.status, SyncStatus::Skipped);
        assert_eq!(update.error.as_deref(), Some(ALREADY_SYNCING));
        // our own reservation was released, the competing one kept
        let unsynced = fx.store.unsynced_entries(user.id).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, entries[1].id);
        assert!(fx.program.user_account("WalletC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_totals_are_reported() {
        let fx = Fixture::new().await;
        let (user, device) = fx.user("did:privy:d", "WalletD").await;
        fx.earn(&user, &device, SensorType::Temperature, 5e9).await;

        let report = fx.sync().run().await.unwrap();
        let update = report.updates().next().unwrap();
        assert_eq!(update.status, SyncStatus::Error);
        assert_eq!(fx.store.unsynced_entries(user.id).await.unwrap().len(), 1);
    }
}
