//! JSON API.

mod devices;
mod locations;
mod readings;
mod rewards;
mod sensors;
mod sync;
mod users;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::models::Page;
use crate::program::RewardProgram;
use crate::store::Store;
use crate::sync::LedgerSync;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub program: Arc<dyn RewardProgram>,
    /// Signer for admin-only program instructions.
    pub admin_key: String,
    pub sync: Arc<LedgerSync>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, program: Arc<dyn RewardProgram>, admin_key: String) -> Self {
        let sync = Arc::new(LedgerSync::new(store.clone(), program.clone(), admin_key.clone()));
        Self { store, program, admin_key, sync }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/users", get(users::get_user).post(users::upsert_user))
        .route(
            "/api/locations",
            get(locations::list_locations).post(locations::create_location),
        )
        .route("/api/devices", get(devices::list_devices).post(devices::create_device))
        .route(
            "/api/devices/{id}",
            get(devices::get_device).patch(devices::update_device),
        )
        .route("/api/sensors", get(sensors::list_sensors).post(sensors::create_sensor))
        .route(
            "/api/sensor-readings",
            get(readings::list_readings).post(readings::submit_reading),
        )
        .route("/api/sensor-data", axum::routing::post(readings::submit_quick_reading))
        .route(
            "/api/rewards/points",
            get(rewards::list_points).post(rewards::award_points),
        )
        .route(
            "/api/rewards/index",
            get(rewards::active_index).post(rewards::publish_index),
        )
        .route(
            "/api/rewards/claims",
            get(rewards::list_claims).post(rewards::create_claim),
        )
        .route("/api/sync", get(sync::run_sync).post(sync::run_sync))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: Page, total: i64) -> Self {
        Self {
            total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.offset + page.limit < total,
        }
    }
}

const MAX_LIMIT: i64 = 1000;

/// Builds a page from optional `limit`/`offset` query parameters.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>, default_limit: i64) -> Result<Page, ApiError> {
    let limit = limit.unwrap_or(default_limit);
    let offset = offset.unwrap_or(0);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    if offset < 0 {
        return Err(ApiError::validation("offset must not be negative"));
    }
    Ok(Page::new(limit, offset))
}

/// Parses an RFC 3339 query date.
pub(crate) fn date(value: Option<&str>, name: &str) -> Result<Option<OffsetDateTime>, ApiError> {
    value
        .map(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|_| ApiError::validation(format!("{name} must be an RFC 3339 timestamp")))
        })
        .transpose()
}

pub(crate) fn required<T>(value: Option<T>, message: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::validation(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_bounds() {
        assert_eq!(page(None, None, 50).unwrap(), Page::new(50, 0));
        assert_eq!(page(Some(5), Some(10), 50).unwrap(), Page::new(5, 10));
        assert!(page(Some(0), None, 50).is_err());
        assert!(page(Some(5000), None, 50).is_err());
        assert!(page(None, Some(-1), 50).is_err());
    }

    #[test]
    fn has_more() {
        assert!(Pagination::new(Page::new(10, 0), 11).has_more);
        assert!(!Pagination::new(Page::new(10, 0), 10).has_more);
        assert!(!Pagination::new(Page::new(10, 20), 25).has_more);
    }

    #[test]
    fn dates_are_rfc3339() {
        assert!(date(Some("2024-05-01T12:00:00Z"), "startDate").unwrap().is_some());
        assert!(date(None, "startDate").unwrap().is_none());
        let err = date(Some("yesterday"), "startDate").unwrap_err();
        assert_eq!(err.to_string(), "startDate must be an RFC 3339 timestamp");
    }
}
