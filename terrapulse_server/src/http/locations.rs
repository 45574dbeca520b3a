use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{page, AppState, Pagination};
use crate::error::ApiError;
use crate::models::{Location, NewLocation};

const DEFAULT_LIMIT: i64 = 50;

#[derive(Deserialize, Debug)]
pub struct LocationQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct LocationList {
    locations: Vec<Location>,
    pagination: Pagination,
}

pub async fn list_locations(
    State(state): State<AppState>,
    query: Result<Query<LocationQuery>, QueryRejection>,
) -> Result<Json<LocationList>, ApiError> {
    let Query(query) = query?;
    let page = page(query.limit, query.offset, DEFAULT_LIMIT)?;
    let locations = state.store.locations(page).await?;
    Ok(Json(LocationList {
        pagination: Pagination::new(page, locations.total),
        locations: locations.items,
    }))
}

pub async fn create_location(
    State(state): State<AppState>,
    body: Result<Json<NewLocation>, JsonRejection>,
) -> Result<(StatusCode, Json<Location>), ApiError> {
    let Json(new) = body?;
    if new.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if !(-90.0..=90.0).contains(&new.latitude) || !(-180.0..=180.0).contains(&new.longitude) {
        return Err(ApiError::validation("latitude or longitude out of range"));
    }
    let location = state.store.insert_location(new).await?;
    Ok((StatusCode::CREATED, Json(location)))
}
