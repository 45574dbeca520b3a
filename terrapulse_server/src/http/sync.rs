use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::error::ApiError;
use crate::sync::SyncReport;

pub async fn run_sync(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.sync.run().await?))
}
