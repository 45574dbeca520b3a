pub mod memory;
pub mod models;
pub mod schema;

pub use memory::MemoryStore;

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::dsl::{self, avg, count_star, sum};
use diesel::query_dsl::methods;
use diesel::{insert_into, prelude::*, update};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::collections::BTreeMap;
use std::str::FromStr;
use terrapulse_common::{ClaimStatus, SensorType};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models as domain;
use crate::store::{RewardIndexSource, Store, StoreError};

type PgPool = Pool<AsyncPgConnection>;

fn unique_or(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::Duplicate(info.message().to_string())
        }
        other => StoreError::Database(other),
    }
}

pub async fn insert_user(
    row: models::User,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::User> {
    insert_into(schema::users::table)
        .values(&row)
        .returning(models::User::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_user(id: Uuid, conn: &mut AsyncPgConnection) -> QueryResult<Option<models::User>> {
    schema::users::table
        .find(id)
        .select(models::User::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_user_by_privy_id(
    privy_id: &str,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::User>> {
    schema::users::table
        .filter(schema::users::privy_id.eq(privy_id))
        .select(models::User::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_user_by_wallet(
    public_key: &str,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::User>> {
    schema::wallets::table
        .inner_join(schema::users::table)
        .filter(schema::wallets::public_key.eq(public_key))
        .select(models::User::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn update_user(
    id: Uuid,
    changes: models::UserChangeset,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::User>> {
    update(schema::users::table.find(id))
        .set(&changes)
        .returning(models::User::as_returning())
        .get_result(conn)
        .await
        .optional()
}

pub async fn insert_wallet(
    row: models::Wallet,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::Wallet> {
    insert_into(schema::wallets::table)
        .values(&row)
        .returning(models::Wallet::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_wallet(
    id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Wallet>> {
    schema::wallets::table
        .find(id)
        .select(models::Wallet::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_wallet_by_key(
    public_key: &str,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Wallet>> {
    schema::wallets::table
        .filter(schema::wallets::public_key.eq(public_key))
        .select(models::Wallet::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_wallets_for_user(
    user_id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Vec<models::Wallet>> {
    schema::wallets::table
        .filter(schema::wallets::user_id.eq(user_id))
        .order(schema::wallets::created_at.asc())
        .select(models::Wallet::as_select())
        .load(conn)
        .await
}

pub async fn get_first_wallets(conn: &mut AsyncPgConnection) -> QueryResult<Vec<models::Wallet>> {
    schema::wallets::table
        .distinct_on(schema::wallets::user_id)
        .order((schema::wallets::user_id, schema::wallets::created_at.asc()))
        .select(models::Wallet::as_select())
        .load(conn)
        .await
}

pub async fn insert_location(
    row: models::Location,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::Location> {
    insert_into(schema::locations::table)
        .values(&row)
        .returning(models::Location::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_location(
    id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Location>> {
    schema::locations::table
        .find(id)
        .select(models::Location::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_locations(
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::Location>, i64)> {
    let total = schema::locations::table.count().get_result(conn).await?;
    let rows = schema::locations::table
        .order(schema::locations::name.asc())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::Location::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn insert_device(
    row: models::Device,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::Device> {
    insert_into(schema::devices::table)
        .values(&row)
        .returning(models::Device::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_device(
    id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Device>> {
    schema::devices::table
        .find(id)
        .select(models::Device::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn get_device_by_identifier(
    device_id: &str,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Device>> {
    schema::devices::table
        .filter(schema::devices::device_id.eq(device_id))
        .select(models::Device::as_select())
        .first(conn)
        .await
        .optional()
}

/// Applies a [`domain::DeviceFilter`] to any boxed query over `devices`,
/// grouped or not.
fn with_device_filter<Q>(mut query: Q, filter: &domain::DeviceFilter) -> Q
where
    Q: methods::FilterDsl<dsl::Eq<schema::devices::owner_id, Uuid>, Output = Q>
        + methods::FilterDsl<dsl::Eq<schema::devices::status, String>, Output = Q>
        + methods::FilterDsl<dsl::Eq<schema::devices::location_id, Uuid>, Output = Q>,
{
    if let Some(owner_id) = filter.owner_id {
        query = methods::FilterDsl::filter(query, schema::devices::owner_id.eq(owner_id));
    }
    if let Some(status) = filter.status {
        query = methods::FilterDsl::filter(query, schema::devices::status.eq(status.to_string()));
    }
    if let Some(location_id) = filter.location_id {
        query = methods::FilterDsl::filter(query, schema::devices::location_id.eq(location_id));
    }
    query
}

fn filtered_devices(filter: &domain::DeviceFilter) -> schema::devices::BoxedQuery<'static, Pg> {
    with_device_filter(schema::devices::table.into_boxed(), filter)
}

pub async fn get_devices(
    filter: &domain::DeviceFilter,
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::Device>, i64)> {
    let total = filtered_devices(filter).count().get_result(conn).await?;
    let rows = filtered_devices(filter)
        .order(schema::devices::last_seen_at.desc().nulls_last())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::Device::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn get_device_status_counts(
    filter: &domain::DeviceFilter,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Vec<(String, i64)>> {
    let grouped = schema::devices::table
        .group_by(schema::devices::status)
        .select((schema::devices::status, count_star()))
        .into_boxed::<Pg>();
    with_device_filter(grouped, filter).load(conn).await
}

pub async fn update_device(
    id: Uuid,
    changes: models::DeviceChangeset,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Device>> {
    update(schema::devices::table.find(id))
        .set(&changes)
        .returning(models::Device::as_returning())
        .get_result(conn)
        .await
        .optional()
}

pub async fn touch_device(
    id: Uuid,
    seen_at: OffsetDateTime,
    conn: &mut AsyncPgConnection,
) -> QueryResult<usize> {
    update(schema::devices::table.find(id))
        .set(schema::devices::last_seen_at.eq(seen_at))
        .execute(conn)
        .await
}

pub async fn insert_sensor(
    row: models::Sensor,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::Sensor> {
    insert_into(schema::sensors::table)
        .values(&row)
        .returning(models::Sensor::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_sensor_of_type(
    device_id: Uuid,
    sensor_type: SensorType,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::Sensor>> {
    schema::sensors::table
        .filter(schema::sensors::device_id.eq(device_id))
        .filter(schema::sensors::sensor_type.eq(sensor_type.to_string()))
        .select(models::Sensor::as_select())
        .first(conn)
        .await
        .optional()
}

fn filtered_sensors(filter: &domain::SensorFilter) -> schema::sensors::BoxedQuery<'static, Pg> {
    let mut query = schema::sensors::table.into_boxed();
    if let Some(device_id) = filter.device_id {
        query = query.filter(schema::sensors::device_id.eq(device_id));
    }
    if let Some(sensor_type) = filter.sensor_type {
        query = query.filter(schema::sensors::sensor_type.eq(sensor_type.to_string()));
    }
    query
}

pub async fn get_sensors(
    filter: &domain::SensorFilter,
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::Sensor>, i64)> {
    let total = filtered_sensors(filter).count().get_result(conn).await?;
    let rows = filtered_sensors(filter)
        .order(schema::sensors::created_at.desc())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::Sensor::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn insert_reading(
    row: models::SensorReading,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::SensorReading> {
    insert_into(schema::sensor_readings::table)
        .values(&row)
        .returning(models::SensorReading::as_returning())
        .get_result(conn)
        .await
}

fn filtered_readings(
    filter: &domain::ReadingFilter,
) -> schema::sensor_readings::BoxedQuery<'static, Pg> {
    use schema::sensor_readings::dsl;

    let mut query = dsl::sensor_readings.into_boxed();
    if let Some(device_id) = filter.device_id {
        query = query.filter(dsl::device_id.eq(device_id));
    }
    if let Some(sensor_type) = filter.sensor_type {
        query = query.filter(dsl::sensor_type.eq(sensor_type.to_string()));
    }
    if let Some(validated) = filter.validated {
        query = query.filter(dsl::validated.eq(validated));
    }
    if let Some(start) = filter.start {
        query = query.filter(dsl::recorded_at.ge(start));
    }
    if let Some(end) = filter.end {
        query = query.filter(dsl::recorded_at.le(end));
    }
    query
}

pub async fn get_readings(
    filter: &domain::ReadingFilter,
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::SensorReading>, i64)> {
    let total = filtered_readings(filter).count().get_result(conn).await?;
    let rows = filtered_readings(filter)
        .order(schema::sensor_readings::recorded_at.desc())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::SensorReading::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn get_reading_stats(
    filter: &domain::ReadingFilter,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Option<f64>, Option<f64>, i64)> {
    use schema::sensor_readings::dsl;

    filtered_readings(filter)
        .select((avg(dsl::value), avg(dsl::quality_score), count_star()))
        .get_result(conn)
        .await
}

pub async fn insert_ledger_entry(
    row: models::LedgerEntry,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::LedgerEntry> {
    insert_into(schema::points_ledger::table)
        .values(&row)
        .returning(models::LedgerEntry::as_returning())
        .get_result(conn)
        .await
}

fn with_ledger_filter<Q>(mut query: Q, filter: &domain::LedgerFilter) -> Q
where
    Q: methods::FilterDsl<dsl::Eq<schema::points_ledger::user_id, Uuid>, Output = Q>
        + methods::FilterDsl<dsl::Eq<schema::points_ledger::device_id, Uuid>, Output = Q>
        + methods::FilterDsl<dsl::GtEq<schema::points_ledger::created_at, OffsetDateTime>, Output = Q>
        + methods::FilterDsl<dsl::LtEq<schema::points_ledger::created_at, OffsetDateTime>, Output = Q>,
{
    use schema::points_ledger::dsl as ledger;

    if let Some(user_id) = filter.user_id {
        query = methods::FilterDsl::filter(query, ledger::user_id.eq(user_id));
    }
    if let Some(device_id) = filter.device_id {
        query = methods::FilterDsl::filter(query, ledger::device_id.eq(device_id));
    }
    if let Some(start) = filter.start {
        query = methods::FilterDsl::filter(query, ledger::created_at.ge(start));
    }
    if let Some(end) = filter.end {
        query = methods::FilterDsl::filter(query, ledger::created_at.le(end));
    }
    query
}

fn filtered_ledger(filter: &domain::LedgerFilter) -> schema::points_ledger::BoxedQuery<'static, Pg> {
    with_ledger_filter(schema::points_ledger::table.into_boxed(), filter)
}

pub async fn get_ledger(
    filter: &domain::LedgerFilter,
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::LedgerEntry>, i64)> {
    let total = filtered_ledger(filter).count().get_result(conn).await?;
    let rows = filtered_ledger(filter)
        .order(schema::points_ledger::created_at.desc())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::LedgerEntry::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn get_ledger_total(
    filter: &domain::LedgerFilter,
    conn: &mut AsyncPgConnection,
) -> QueryResult<f64> {
    let total: Option<f64> = filtered_ledger(filter)
        .select(sum(schema::points_ledger::points))
        .get_result(conn)
        .await?;
    Ok(total.unwrap_or(0.0))
}

pub async fn get_ledger_by_reason(
    filter: &domain::LedgerFilter,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Vec<(String, Option<f64>, i64)>> {
    use schema::points_ledger::dsl as ledger;

    let grouped = ledger::points_ledger
        .group_by(ledger::reason)
        .select((ledger::reason, sum(ledger::points), count_star()))
        .into_boxed::<Pg>();
    let mut rows: Vec<(String, Option<f64>, i64)> =
        with_ledger_filter(grouped, filter).load(conn).await?;
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(rows)
}

pub async fn get_unsynced_entries(
    user_id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Vec<(Uuid, f64, Option<String>)>> {
    schema::points_ledger::table
        .left_join(schema::sensor_readings::table)
        .filter(schema::points_ledger::user_id.eq(user_id))
        .filter(schema::points_ledger::synced.eq(false))
        .select((
            schema::points_ledger::id,
            schema::points_ledger::points,
            schema::sensor_readings::sensor_type.nullable(),
        ))
        .load(conn)
        .await
}

/// Compare-and-set on the `synced` flag; returns the ids that flipped.
pub async fn set_synced(
    ids: &[Uuid],
    from: bool,
    to: bool,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Vec<Uuid>> {
    update(
        schema::points_ledger::table
            .filter(schema::points_ledger::id.eq_any(ids.to_vec()))
            .filter(schema::points_ledger::synced.eq(from)),
    )
    .set(schema::points_ledger::synced.eq(to))
    .returning(schema::points_ledger::id)
    .get_results(conn)
    .await
}

pub async fn insert_reward_index(
    row: models::RewardIndex,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::RewardIndex> {
    insert_into(schema::reward_indexes::table)
        .values(&row)
        .returning(models::RewardIndex::as_returning())
        .get_result(conn)
        .await
}

pub async fn get_active_reward_index(
    conn: &mut AsyncPgConnection,
) -> QueryResult<Option<models::RewardIndex>> {
    schema::reward_indexes::table
        .filter(schema::reward_indexes::active.eq(true))
        .order(schema::reward_indexes::created_at.desc())
        .select(models::RewardIndex::as_select())
        .first(conn)
        .await
        .optional()
}

pub async fn insert_claim(
    row: models::RewardClaim,
    conn: &mut AsyncPgConnection,
) -> QueryResult<models::RewardClaim> {
    insert_into(schema::reward_claims::table)
        .values(&row)
        .returning(models::RewardClaim::as_returning())
        .get_result(conn)
        .await
}

fn filtered_claims(filter: &domain::ClaimFilter) -> schema::reward_claims::BoxedQuery<'static, Pg> {
    let mut query = schema::reward_claims::table.into_boxed();
    if let Some(user_id) = filter.user_id {
        query = query.filter(schema::reward_claims::user_id.eq(user_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(schema::reward_claims::status.eq(status.to_string()));
    }
    query
}

pub async fn get_claims(
    filter: &domain::ClaimFilter,
    page: domain::Page,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Vec<models::RewardClaim>, i64)> {
    let total = filtered_claims(filter).count().get_result(conn).await?;
    let rows = filtered_claims(filter)
        .order(schema::reward_claims::requested_at.desc())
        .limit(page.limit)
        .offset(page.offset)
        .select(models::RewardClaim::as_select())
        .load(conn)
        .await?;
    Ok((rows, total))
}

pub async fn get_claim_stats(
    filter: &domain::ClaimFilter,
    conn: &mut AsyncPgConnection,
) -> QueryResult<(Option<f64>, Option<f64>, i64)> {
    use schema::reward_claims::dsl;

    filtered_claims(filter)
        .select((sum(dsl::points_spent), sum(dsl::tokens_issued), count_star()))
        .get_result(conn)
        .await
}

pub async fn get_committed_claim_points(
    user_id: Uuid,
    conn: &mut AsyncPgConnection,
) -> QueryResult<f64> {
    let committed: Vec<String> = ClaimStatus::COMMITTED.iter().map(|s| s.to_string()).collect();
    let total: Option<f64> = schema::reward_claims::table
        .filter(schema::reward_claims::user_id.eq(user_id))
        .filter(schema::reward_claims::status.eq_any(committed))
        .select(sum(schema::reward_claims::points_spent))
        .get_result(conn)
        .await?;
    Ok(total.unwrap_or(0.0))
}

fn paged<R, T>(rows: Vec<R>, total: i64) -> Result<domain::Paged<T>, StoreError>
where
    R: TryInto<T>,
    StoreError: From<<R as TryInto<T>>::Error>,
{
    let items = rows
        .into_iter()
        .map(|row| row.try_into().map_err(StoreError::from))
        .collect::<Result<Vec<T>, StoreError>>()?;
    Ok(domain::Paged { items, total })
}

/// Postgres-backed [`Store`] over a deadpool of async Diesel connections.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl RewardIndexSource for PgStore {
    async fn active_reward_index(&self) -> Result<Option<domain::RewardIndex>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_active_reward_index(&mut conn).await?.map(Into::into))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, new: domain::NewUser) -> Result<domain::User, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::User::from_new(new, OffsetDateTime::now_utc());
        Ok(insert_user(row, &mut conn).await.map_err(unique_or)?.into())
    }

    async fn user(&self, id: Uuid) -> Result<Option<domain::User>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_user(id, &mut conn).await?.map(Into::into))
    }

    async fn user_by_privy_id(&self, privy_id: &str) -> Result<Option<domain::User>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_user_by_privy_id(privy_id, &mut conn).await?.map(Into::into))
    }

    async fn user_by_wallet(&self, public_key: &str) -> Result<Option<domain::User>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_user_by_wallet(public_key, &mut conn).await?.map(Into::into))
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: domain::UserChanges,
    ) -> Result<domain::User, StoreError> {
        let mut conn = self.conn().await?;
        let changeset = models::UserChangeset {
            email: changes.email,
            name: changes.name,
            meta: changes.meta,
            updated_at: OffsetDateTime::now_utc(),
        };
        update_user(id, changeset, &mut conn)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound("user"))
    }

    async fn insert_wallet(&self, new: domain::NewWallet) -> Result<domain::Wallet, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::Wallet::from_new(new, OffsetDateTime::now_utc());
        Ok(insert_wallet(row, &mut conn).await.map_err(unique_or)?.into())
    }

    async fn wallet(&self, id: Uuid) -> Result<Option<domain::Wallet>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_wallet(id, &mut conn).await?.map(Into::into))
    }

    async fn wallet_by_key(&self, public_key: &str) -> Result<Option<domain::Wallet>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_wallet_by_key(public_key, &mut conn).await?.map(Into::into))
    }

    async fn wallets_for_user(&self, user_id: Uuid) -> Result<Vec<domain::Wallet>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = get_wallets_for_user(user_id, &mut conn).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn sync_wallets(&self) -> Result<Vec<domain::Wallet>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = get_first_wallets(&mut conn).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_location(
        &self,
        new: domain::NewLocation,
    ) -> Result<domain::Location, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::Location::from_new(new, OffsetDateTime::now_utc());
        Ok(insert_location(row, &mut conn).await?.into())
    }

    async fn location(&self, id: Uuid) -> Result<Option<domain::Location>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_location(id, &mut conn).await?.map(Into::into))
    }

    async fn locations(
        &self,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::Location>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_locations(page, &mut conn).await?;
        Ok(domain::Paged {
            items: rows.into_iter().map(Into::into).collect(),
            total,
        })
    }

    async fn insert_device(&self, new: domain::NewDevice) -> Result<domain::Device, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::Device::from_new(new, OffsetDateTime::now_utc());
        insert_device(row, &mut conn).await.map_err(unique_or)?.try_into()
    }

    async fn device(&self, id: Uuid) -> Result<Option<domain::Device>, StoreError> {
        let mut conn = self.conn().await?;
        get_device(id, &mut conn).await?.map(TryInto::try_into).transpose()
    }

    async fn device_by_identifier(
        &self,
        device_id: &str,
    ) -> Result<Option<domain::Device>, StoreError> {
        let mut conn = self.conn().await?;
        get_device_by_identifier(device_id, &mut conn)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn devices(
        &self,
        filter: &domain::DeviceFilter,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::Device>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_devices(filter, page, &mut conn).await?;
        paged(rows, total)
    }

    async fn device_status_counts(
        &self,
        filter: &domain::DeviceFilter,
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_device_status_counts(filter, &mut conn).await?.into_iter().collect())
    }

    async fn update_device(
        &self,
        id: Uuid,
        changes: domain::DeviceChanges,
    ) -> Result<domain::Device, StoreError> {
        let mut conn = self.conn().await?;
        let changeset = models::DeviceChangeset::new(changes, OffsetDateTime::now_utc());
        update_device(id, changeset, &mut conn)
            .await?
            .ok_or(StoreError::NotFound("device"))?
            .try_into()
    }

    async fn touch_device(&self, id: Uuid, seen_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        touch_device(id, seen_at, &mut conn).await?;
        Ok(())
    }

    async fn insert_sensor(&self, new: domain::NewSensor) -> Result<domain::Sensor, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::Sensor::from_new(new, OffsetDateTime::now_utc());
        insert_sensor(row, &mut conn).await.map_err(unique_or)?.try_into()
    }

    async fn sensor_of_type(
        &self,
        device_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<domain::Sensor>, StoreError> {
        let mut conn = self.conn().await?;
        get_sensor_of_type(device_id, sensor_type, &mut conn)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn sensors(
        &self,
        filter: &domain::SensorFilter,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::Sensor>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_sensors(filter, page, &mut conn).await?;
        paged(rows, total)
    }

    async fn insert_reading(
        &self,
        new: domain::NewReading,
    ) -> Result<domain::SensorReading, StoreError> {
        let mut conn = self.conn().await?;
        insert_reading(models::SensorReading::from_new(new), &mut conn)
            .await?
            .try_into()
    }

    async fn readings(
        &self,
        filter: &domain::ReadingFilter,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::SensorReading>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_readings(filter, page, &mut conn).await?;
        paged(rows, total)
    }

    async fn reading_stats(
        &self,
        filter: &domain::ReadingFilter,
    ) -> Result<domain::ReadingStats, StoreError> {
        let mut conn = self.conn().await?;
        let (average_value, average_quality, total_readings) =
            get_reading_stats(filter, &mut conn).await?;
        Ok(domain::ReadingStats { average_value, average_quality, total_readings })
    }

    async fn append_ledger(
        &self,
        new: domain::NewLedgerEntry,
    ) -> Result<domain::LedgerEntry, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::LedgerEntry::from_new(new, OffsetDateTime::now_utc());
        Ok(insert_ledger_entry(row, &mut conn).await?.into())
    }

    async fn ledger(
        &self,
        filter: &domain::LedgerFilter,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::LedgerEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_ledger(filter, page, &mut conn).await?;
        Ok(domain::Paged {
            items: rows.into_iter().map(Into::into).collect(),
            total,
        })
    }

    async fn ledger_total(&self, filter: &domain::LedgerFilter) -> Result<f64, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_ledger_total(filter, &mut conn).await?)
    }

    async fn ledger_by_reason(
        &self,
        filter: &domain::LedgerFilter,
    ) -> Result<Vec<domain::ReasonTotal>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_ledger_by_reason(filter, &mut conn)
            .await?
            .into_iter()
            .map(|(reason, points, entries)| domain::ReasonTotal {
                reason,
                points: points.unwrap_or(0.0),
                entries,
            })
            .collect())
    }

    async fn unsynced_entries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<domain::UnsyncedEntry>, StoreError> {
        let mut conn = self.conn().await?;
        get_unsynced_entries(user_id, &mut conn)
            .await?
            .into_iter()
            .map(|(id, points, sensor_type)| {
                let sensor_type = sensor_type
                    .map(|raw| {
                        SensorType::from_str(&raw).map_err(|_| {
                            StoreError::Corrupt(format!("sensor_readings.sensor_type = {raw:?}"))
                        })
                    })
                    .transpose()?;
                Ok(domain::UnsyncedEntry {
                    id,
                    points,
                    sensor_type,
                })
            })
            .collect()
    }

    async fn mark_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(set_synced(ids, false, true, &mut conn).await?)
    }

    async fn release_synced(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(set_synced(ids, true, false, &mut conn).await?)
    }

    async fn insert_reward_index(
        &self,
        new: domain::NewRewardIndex,
    ) -> Result<domain::RewardIndex, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::RewardIndex::from_new(new, OffsetDateTime::now_utc())?;
        Ok(insert_reward_index(row, &mut conn).await?.into())
    }

    async fn insert_claim(&self, new: domain::NewClaim) -> Result<domain::RewardClaim, StoreError> {
        let mut conn = self.conn().await?;
        let row = models::RewardClaim::from_new(new, OffsetDateTime::now_utc());
        insert_claim(row, &mut conn).await?.try_into()
    }

    async fn claims(
        &self,
        filter: &domain::ClaimFilter,
        page: domain::Page,
    ) -> Result<domain::Paged<domain::RewardClaim>, StoreError> {
        let mut conn = self.conn().await?;
        let (rows, total) = get_claims(filter, page, &mut conn).await?;
        paged(rows, total)
    }

    async fn claim_stats(&self, filter: &domain::ClaimFilter) -> Result<domain::ClaimStats, StoreError> {
        let mut conn = self.conn().await?;
        let (spent, issued, total_claims) = get_claim_stats(filter, &mut conn).await?;
        Ok(domain::ClaimStats {
            total_points_spent: spent.unwrap_or(0.0),
            total_tokens_issued: issued.unwrap_or(0.0),
            total_claims,
        })
    }

    async fn committed_claim_points(&self, user_id: Uuid) -> Result<f64, StoreError> {
        let mut conn = self.conn().await?;
        Ok(get_committed_claim_points(user_id, &mut conn).await?)
    }
}
