use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use terrapulse_common::web::{QuickReadingRequest, ReadingRequest};
use terrapulse_common::SensorType;
use uuid::Uuid;

use super::{date, page, AppState, Pagination};
use crate::error::ApiError;
use crate::ingest::{self, Ingested, QuickIngested};
use crate::models::{ReadingFilter, ReadingStats, SensorReading};

const DEFAULT_LIMIT: i64 = 100;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReadingQuery {
    device_id: Option<Uuid>,
    sensor_type: Option<SensorType>,
    validated: Option<bool>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct ReadingList {
    readings: Vec<SensorReading>,
    pagination: Pagination,
    stats: ReadingStats,
}

pub async fn list_readings(
    State(state): State<AppState>,
    query: Result<Query<ReadingQuery>, QueryRejection>,
) -> Result<Json<ReadingList>, ApiError> {
    let Query(query) = query?;
    let page = page(query.limit, query.offset, DEFAULT_LIMIT)?;
    let filter = ReadingFilter {
        device_id: query.device_id,
        sensor_type: query.sensor_type,
        validated: query.validated,
        start: date(query.start_date.as_deref(), "startDate")?,
        end: date(query.end_date.as_deref(), "endDate")?,
    };
    let readings = state.store.readings(&filter, page).await?;
    let stats = state.store.reading_stats(&filter).await?;
    Ok(Json(ReadingList {
        pagination: Pagination::new(page, readings.total),
        stats,
        readings: readings.items,
    }))
}

pub async fn submit_reading(
    State(state): State<AppState>,
    body: Result<Json<ReadingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Ingested>), ApiError> {
    let Json(request) = body?;
    if !request.value.is_finite() {
        return Err(ApiError::validation("value must be a finite number"));
    }
    let ingested = ingest::submit_reading(state.store.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

pub async fn submit_quick_reading(
    State(state): State<AppState>,
    body: Result<Json<QuickReadingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QuickIngested>), ApiError> {
    let Json(request) = body?;
    if request.privy_id.is_empty() {
        return Err(ApiError::validation("privyId is required"));
    }
    let ingested = ingest::submit_quick_reading(state.store.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}
