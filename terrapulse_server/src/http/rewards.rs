use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use terrapulse_common::ClaimStatus;
use uuid::Uuid;

use super::{date, page, required, AppState, Pagination};
use crate::claims;
use crate::error::ApiError;
use crate::models::*;

const LEDGER_LIMIT: i64 = 100;
const CLAIMS_LIMIT: i64 = 50;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PointsQuery {
    user_id: Option<Uuid>,
    device_id: Option<Uuid>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PointsSummary {
    total_points: f64,
    total_entries: i64,
    available_points: f64,
    breakdown: Vec<ReasonTotal>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PointsList {
    points_ledger: Vec<LedgerEntry>,
    summary: PointsSummary,
    pagination: Pagination,
}

pub async fn list_points(
    State(state): State<AppState>,
    query: Result<Query<PointsQuery>, QueryRejection>,
) -> Result<Json<PointsList>, ApiError> {
    let Query(query) = query?;
    let user_id = required(query.user_id, "userId is required")?;
    let page = page(query.limit, query.offset, LEDGER_LIMIT)?;
    let filter = LedgerFilter {
        user_id: Some(user_id),
        device_id: query.device_id,
        start: date(query.start_date.as_deref(), "startDate")?,
        end: date(query.end_date.as_deref(), "endDate")?,
    };

    let ledger = state.store.ledger(&filter, page).await?;
    let total_points = state.store.ledger_total(&filter).await?;
    let breakdown = state.store.ledger_by_reason(&filter).await?;
    let available_points = claims::available_points(state.store.as_ref(), user_id).await?;
    Ok(Json(PointsList {
        pagination: Pagination::new(page, ledger.total),
        summary: PointsSummary {
            total_points,
            total_entries: ledger.total,
            available_points,
            breakdown,
        },
        points_ledger: ledger.items,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AwardPoints {
    user_id: Option<Uuid>,
    device_id: Option<Uuid>,
    points: Option<f64>,
    reason: Option<String>,
    meta: Option<Value>,
}

/// Manual ledger entry, e.g. a bonus or a correction.
pub async fn award_points(
    State(state): State<AppState>,
    body: Result<Json<AwardPoints>, JsonRejection>,
) -> Result<(StatusCode, Json<LedgerEntry>), ApiError> {
    let Json(body) = body?;
    const REQUIRED: &str = "userId, points, and reason are required";
    let user_id = required(body.user_id, REQUIRED)?;
    let points = required(body.points.filter(|p| *p != 0.0), REQUIRED)?;
    let reason = required(body.reason.filter(|r| !r.is_empty()), REQUIRED)?;
    if !points.is_finite() {
        return Err(ApiError::validation("points must be a finite number"));
    }

    if state.store.user(user_id).await?.is_none() {
        return Err(ApiError::not_found("User"));
    }
    if let Some(device_id) = body.device_id {
        if state.store.device(device_id).await?.is_none() {
            return Err(ApiError::not_found("Device"));
        }
    }

    let entry = state
        .store
        .append_ledger(NewLedgerEntry {
            user_id,
            device_id: body.device_id,
            reading_id: None,
            points,
            reason,
            meta: body.meta.unwrap_or_else(|| json!({})),
        })
        .await?;
    info!("Awarded {points} points to {user_id} ({})", entry.reason);
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn active_index(State(state): State<AppState>) -> Result<Json<RewardIndex>, ApiError> {
    let index = state
        .store
        .active_reward_index()
        .await?
        .ok_or_else(|| ApiError::NotFound("No active reward index".into()))?;
    Ok(Json(index))
}

/// Publishes a new index version. Earlier rewards are not recomputed.
pub async fn publish_index(
    State(state): State<AppState>,
    body: Result<Json<NewRewardIndex>, JsonRejection>,
) -> Result<(StatusCode, Json<RewardIndex>), ApiError> {
    let Json(new) = body?;
    if !new.base_points.is_finite() || new.base_points < 0.0 {
        return Err(ApiError::validation("basePoints must be a non-negative number"));
    }
    let boosts_ok = new.sensor_boosts.values().all(|b| b.is_finite() && *b >= 0.0);
    let quality_ok = new.multipliers.data_quality.map_or(true, |dq| dq.is_finite() && dq >= 0.0);
    if !boosts_ok || !quality_ok {
        return Err(ApiError::validation("multipliers must be non-negative numbers"));
    }

    let index = state.store.insert_reward_index(new).await?;
    info!("Published reward index {} (base {})", index.id, index.base_points);
    Ok((StatusCode::CREATED, Json(index)))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClaimQuery {
    user_id: Option<Uuid>,
    status: Option<ClaimStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct ClaimList {
    claims: Vec<RewardClaim>,
    pagination: Pagination,
    stats: ClaimStats,
}

pub async fn list_claims(
    State(state): State<AppState>,
    query: Result<Query<ClaimQuery>, QueryRejection>,
) -> Result<Json<ClaimList>, ApiError> {
    let Query(query) = query?;
    let page = page(query.limit, query.offset, CLAIMS_LIMIT)?;
    let filter = ClaimFilter { user_id: query.user_id, status: query.status };
    let claims = state.store.claims(&filter, page).await?;
    let stats = state.store.claim_stats(&filter).await?;
    Ok(Json(ClaimList {
        pagination: Pagination::new(page, claims.total),
        stats,
        claims: claims.items,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateClaim {
    user_id: Option<Uuid>,
    points_spent: Option<f64>,
    note: Option<String>,
}

pub async fn create_claim(
    State(state): State<AppState>,
    body: Result<Json<CreateClaim>, JsonRejection>,
) -> Result<(StatusCode, Json<RewardClaim>), ApiError> {
    let Json(body) = body?;
    const REQUIRED: &str = "userId and pointsSpent are required";
    let user_id = required(body.user_id, REQUIRED)?;
    let points = required(body.points_spent, REQUIRED)?;

    let claim = claims::create_claim(state.store.as_ref(), user_id, points, body.note).await?;
    Ok((StatusCode::CREATED, Json(claim)))
}
