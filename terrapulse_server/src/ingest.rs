//! Reading ingestion: score, persist, award.

use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use terrapulse_common::web::{server_payload, QuickReadingRequest, ReadingRequest};
use terrapulse_common::{DeviceStatus, SensorType};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::*;
use crate::rewards::points_for;
use crate::scoring::{is_validated, quality_score};
use crate::store::{Store, StoreError};

pub const BASE_SUBMISSION: &str = "BASE_SUBMISSION";
pub const TEMPERATURE_READING: &str = "TEMPERATURE_READING";
pub const HUMIDITY_READING: &str = "HUMIDITY_READING";

/// Sample rate recorded for sensors created on the quick path.
const QUICK_SAMPLE_RATE: i32 = 60;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Device is {0}, only ACTIVE devices can submit readings")]
    DeviceInactive(DeviceStatus),
    #[error("Device has no {0} sensor")]
    SensorMissing(SensorType),
    #[error("sensorId does not match the device's {0} sensor")]
    SensorMismatch(SensorType),
    #[error("User not found. Please register first.")]
    UserNotFound,
    #[error("At least one sensor value (temperature or humidity) is required")]
    NoValues,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub reading: SensorReading,
    pub points_awarded: f64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuickIngested {
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub device_name: Option<String>,
    pub readings: Vec<SensorReading>,
    pub points_earned: f64,
}

/// Ingests a reading from a registered device.
pub async fn submit_reading(
    store: &dyn Store,
    request: ReadingRequest,
) -> Result<Ingested, IngestError> {
    let device = store
        .device(request.device_id)
        .await?
        .ok_or(IngestError::DeviceNotFound)?;
    if device.status != DeviceStatus::Active {
        return Err(IngestError::DeviceInactive(device.status));
    }
    let sensor = store
        .sensor_of_type(device.id, request.sensor_type)
        .await?
        .ok_or(IngestError::SensorMissing(request.sensor_type))?;
    if request.sensor_id.is_some_and(|id| id != sensor.id) {
        return Err(IngestError::SensorMismatch(request.sensor_type));
    }

    let now = OffsetDateTime::now_utc();
    let new = NewReading {
        device_id: device.id,
        sensor_id: Some(sensor.id),
        sensor_type: request.sensor_type,
        value: request.value,
        value_unit: request.value_unit.or(sensor.unit),
        quality_score: quality_score(request.sensor_type, request.value, &request.raw_payload),
        validated: false,
        raw_payload: request.raw_payload,
        recorded_at: request.recorded_at.unwrap_or(now),
        processed_at: now,
        ipfs_cid: request.ipfs_cid,
        onchain_proof: request.onchain_proof,
    };

    record(store, &device, new, BASE_SUBMISSION).await
}

/// Ingests the simplified firmware submission on behalf of a user.
pub async fn submit_quick_reading(
    store: &dyn Store,
    request: QuickReadingRequest,
) -> Result<QuickIngested, IngestError> {
    let values = request.values();
    if values.is_empty() {
        return Err(IngestError::NoValues);
    }
    let user = store
        .user_by_privy_id(&request.privy_id)
        .await?
        .ok_or(IngestError::UserNotFound)?;

    let device = active_device_for(store, &user).await?;

    let mut readings = Vec::with_capacity(values.len());
    let mut points_earned = 0.0;
    for (sensor_type, value) in values {
        let sensor = match store.sensor_of_type(device.id, sensor_type).await? {
            Some(sensor) => sensor,
            None => {
                store
                    .insert_sensor(NewSensor {
                        device_id: device.id,
                        sensor_type,
                        label: Some(quick_label(sensor_type).to_string()),
                        unit: Some(sensor_type.default_unit().to_string()),
                        sample_rate: Some(QUICK_SAMPLE_RATE),
                        meta: json!({}),
                    })
                    .await?
            }
        };

        let now = OffsetDateTime::now_utc();
        let raw_payload = server_payload(sensor_type, value, now);
        let new = NewReading {
            device_id: device.id,
            sensor_id: Some(sensor.id),
            sensor_type,
            value,
            value_unit: sensor.unit,
            quality_score: quality_score(sensor_type, value, &raw_payload),
            validated: false,
            raw_payload,
            recorded_at: now,
            processed_at: now,
            ipfs_cid: None,
            onchain_proof: None,
        };

        let reason = match sensor_type {
            SensorType::Humidity => HUMIDITY_READING,
            _ => TEMPERATURE_READING,
        };
        let ingested = record(store, &device, new, reason).await?;
        points_earned += ingested.points_awarded;
        readings.push(ingested.reading);
    }

    Ok(QuickIngested {
        user_id: user.id,
        device_id: device.id,
        device_name: device.name,
        readings,
        points_earned,
    })
}

/// Persists a scored reading and credits the device owner when it validates.
async fn record(
    store: &dyn Store,
    device: &Device,
    mut new: NewReading,
    reason: &str,
) -> Result<Ingested, IngestError> {
    new.validated = is_validated(new.quality_score);
    let reading = store.insert_reading(new).await?;

    let mut points_awarded = 0.0;
    if reading.validated {
        let points = points_for(store, reading.sensor_type, reading.quality_score).await?;
        if points > 0.0 {
            store
                .append_ledger(NewLedgerEntry {
                    user_id: device.owner_id,
                    device_id: Some(device.id),
                    reading_id: Some(reading.id),
                    points,
                    reason: reason.to_string(),
                    meta: json!({
                        "sensorType": reading.sensor_type,
                        "qualityScore": reading.quality_score,
                        "value": reading.value,
                    }),
                })
                .await?;
            points_awarded = points;
        }
    } else {
        debug!(
            "Reading {} from {} scored {:.2}, not validated",
            reading.id, device.device_id, reading.quality_score
        );
    }

    store.touch_device(device.id, reading.processed_at.unwrap_or(reading.recorded_at)).await?;
    Ok(Ingested { reading, points_awarded })
}

async fn active_device_for(store: &dyn Store, user: &User) -> Result<Device, IngestError> {
    let filter = DeviceFilter {
        owner_id: Some(user.id),
        status: Some(DeviceStatus::Active),
        ..Default::default()
    };
    if let Some(device) = store.devices(&filter, Page::first(1)).await?.items.into_iter().next() {
        return Ok(device);
    }

    let now = OffsetDateTime::now_utc();
    let device = store
        .insert_device(NewDevice {
            device_id: format!("device-{}-{}", user.id, (now.unix_timestamp_nanos() / 1_000_000)),
            name: Some(format!("{}'s Device", user.name.as_deref().unwrap_or("User"))),
            owner_id: user.id,
            wallet_id: None,
            location_id: None,
            public_key: None,
            status: DeviceStatus::Active,
            model: Some("ESP32-Default".to_string()),
            firmware_version: None,
            tags: Vec::new(),
            meta: json!({}),
        })
        .await?;
    info!("Created default device {} for user {}", device.device_id, user.id);
    Ok(device)
}

fn quick_label(sensor_type: SensorType) -> &'static str {
    match sensor_type {
        SensorType::Humidity => "Humidity Sensor",
        _ => "Temperature Sensor",
    }
}
