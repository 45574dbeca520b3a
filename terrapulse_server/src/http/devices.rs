use std::collections::BTreeMap;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use terrapulse_common::DeviceStatus;
use uuid::Uuid;

use super::{page, required, AppState, Pagination};
use crate::error::ApiError;
use crate::models::*;

const DEFAULT_LIMIT: i64 = 50;
const RECENT_READINGS: i64 = 10;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    owner_id: Option<Uuid>,
    status: Option<DeviceStatus>,
    location_id: Option<Uuid>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    by_status: BTreeMap<String, i64>,
    total: i64,
}

#[derive(Serialize, Debug)]
pub struct DeviceList {
    devices: Vec<Device>,
    pagination: Pagination,
    stats: FleetStats,
}

pub async fn list_devices(
    State(state): State<AppState>,
    query: Result<Query<DeviceQuery>, QueryRejection>,
) -> Result<Json<DeviceList>, ApiError> {
    let Query(query) = query?;
    let page = page(query.limit, query.offset, DEFAULT_LIMIT)?;
    let filter = DeviceFilter {
        owner_id: query.owner_id,
        status: query.status,
        location_id: query.location_id,
    };
    let devices = state.store.devices(&filter, page).await?;
    let by_status = state.store.device_status_counts(&filter).await?;
    Ok(Json(DeviceList {
        pagination: Pagination::new(page, devices.total),
        stats: FleetStats { by_status, total: devices.total },
        devices: devices.items,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDevice {
    device_id: Option<String>,
    owner_id: Option<Uuid>,
    name: Option<String>,
    wallet_id: Option<Uuid>,
    location_id: Option<Uuid>,
    public_key: Option<String>,
    model: Option<String>,
    firmware_version: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    meta: Option<Value>,
}

pub async fn create_device(
    State(state): State<AppState>,
    body: Result<Json<RegisterDevice>, JsonRejection>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let Json(body) = body?;
    let device_id = required(
        body.device_id.filter(|id| !id.trim().is_empty()),
        "deviceId and ownerId are required",
    )?;
    let owner_id = required(body.owner_id, "deviceId and ownerId are required")?;

    if state.store.user(owner_id).await?.is_none() {
        return Err(ApiError::not_found("Owner"));
    }
    if let Some(location_id) = body.location_id {
        if state.store.location(location_id).await?.is_none() {
            return Err(ApiError::not_found("Location"));
        }
    }
    if let Some(wallet_id) = body.wallet_id {
        match state.store.wallet(wallet_id).await? {
            Some(wallet) if wallet.user_id == owner_id => {}
            Some(_) => return Err(ApiError::validation("Wallet does not belong to the owner")),
            None => return Err(ApiError::not_found("Wallet")),
        }
    }
    if state.store.device_by_identifier(&device_id).await?.is_some() {
        return Err(ApiError::Conflict("Device with this deviceId already exists".into()));
    }

    let device = state
        .store
        .insert_device(NewDevice {
            device_id,
            name: body.name,
            owner_id,
            wallet_id: body.wallet_id,
            location_id: body.location_id,
            public_key: body.public_key,
            status: DeviceStatus::Pending,
            model: body.model,
            firmware_version: body.firmware_version,
            tags: body.tags,
            meta: body.meta.unwrap_or_else(|| json!({})),
        })
        .await?;
    info!("Registered device {} for {}", device.device_id, owner_id);
    Ok((StatusCode::CREATED, Json(device)))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    total_readings: i64,
    total_points_earned: f64,
}

#[derive(Serialize, Debug)]
pub struct DeviceDetail {
    device: Device,
    sensors: Vec<Sensor>,
    readings: Vec<SensorReading>,
    stats: DeviceStats,
}

pub async fn get_device(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeviceDetail>, ApiError> {
    let Path(id) = id?;
    let device = state
        .store
        .device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Device"))?;

    let sensor_filter = SensorFilter { device_id: Some(id), ..Default::default() };
    let sensors = state.store.sensors(&sensor_filter, Page::first(DEFAULT_LIMIT)).await?;
    let reading_filter = ReadingFilter { device_id: Some(id), ..Default::default() };
    let readings = state.store.readings(&reading_filter, Page::first(RECENT_READINGS)).await?;
    let ledger_filter = LedgerFilter { device_id: Some(id), ..Default::default() };
    let total_points_earned = state.store.ledger_total(&ledger_filter).await?;

    Ok(Json(DeviceDetail {
        device,
        sensors: sensors.items,
        stats: DeviceStats { total_readings: readings.total, total_points_earned },
        readings: readings.items,
    }))
}

/// Fields absent from the body keep their stored value.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    name: Option<String>,
    status: Option<DeviceStatus>,
    model: Option<String>,
    firmware_version: Option<String>,
    location_id: Option<Uuid>,
    tags: Option<Vec<String>>,
    meta: Option<Value>,
}

pub async fn update_device(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<DevicePatch>, JsonRejection>,
) -> Result<Json<Device>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    if state.store.device(id).await?.is_none() {
        return Err(ApiError::not_found("Device"));
    }
    if let Some(location_id) = patch.location_id {
        if state.store.location(location_id).await?.is_none() {
            return Err(ApiError::not_found("Location"));
        }
    }

    let changes = DeviceChanges {
        name: patch.name,
        status: patch.status,
        model: patch.model,
        firmware_version: patch.firmware_version,
        location_id: patch.location_id,
        tags: patch.tags,
        meta: patch.meta,
    };
    let device = state.store.update_device(id, changes).await?;
    if let Some(status) = patch.status {
        info!("Device {} is now {status}", device.device_id);
    }
    Ok(Json(device))
}
