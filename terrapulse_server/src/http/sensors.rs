use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use terrapulse_common::SensorType;
use uuid::Uuid;

use super::{page, AppState, Pagination};
use crate::error::ApiError;
use crate::models::{NewSensor, Sensor, SensorFilter};

const DEFAULT_LIMIT: i64 = 50;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SensorQuery {
    device_id: Option<Uuid>,
    #[serde(rename = "type")]
    sensor_type: Option<SensorType>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct SensorList {
    sensors: Vec<Sensor>,
    pagination: Pagination,
}

pub async fn list_sensors(
    State(state): State<AppState>,
    query: Result<Query<SensorQuery>, QueryRejection>,
) -> Result<Json<SensorList>, ApiError> {
    let Query(query) = query?;
    let page = page(query.limit, query.offset, DEFAULT_LIMIT)?;
    let filter = SensorFilter { device_id: query.device_id, sensor_type: query.sensor_type };
    let sensors = state.store.sensors(&filter, page).await?;
    Ok(Json(SensorList {
        pagination: Pagination::new(page, sensors.total),
        sensors: sensors.items,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSensor {
    device_id: Uuid,
    #[serde(rename = "type")]
    sensor_type: SensorType,
    label: Option<String>,
    unit: Option<String>,
    sample_rate: Option<i32>,
    meta: Option<Value>,
}

pub async fn create_sensor(
    State(state): State<AppState>,
    body: Result<Json<CreateSensor>, JsonRejection>,
) -> Result<(StatusCode, Json<Sensor>), ApiError> {
    let Json(body) = body?;
    if body.sample_rate.is_some_and(|rate| rate <= 0) {
        return Err(ApiError::validation("sampleRate must be positive"));
    }
    if state.store.device(body.device_id).await?.is_none() {
        return Err(ApiError::not_found("Device"));
    }
    if state.store.sensor_of_type(body.device_id, body.sensor_type).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Device already has a {} sensor",
            body.sensor_type
        )));
    }

    let sensor = state
        .store
        .insert_sensor(NewSensor {
            device_id: body.device_id,
            sensor_type: body.sensor_type,
            label: body.label,
            unit: body.unit.or_else(|| Some(body.sensor_type.default_unit().to_string())),
            sample_rate: body.sample_rate,
            meta: body.meta.unwrap_or_else(|| json!({})),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(sensor)))
}
