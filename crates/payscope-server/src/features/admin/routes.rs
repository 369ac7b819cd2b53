//! Admin endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{AppError, AppResult};

use super::queries::counts::{self, CountsError, ValidationCounts};

#[derive(Debug, Deserialize)]
pub struct CountsParams {
    pub bank_id: String,
}

/// `GET /admin/validation/counts?bank_id=...`
pub async fn validation_counts(
    State(state): State<AppState>,
    Query(params): Query<CountsParams>,
) -> AppResult<Json<ValidationCounts>> {
    if params.bank_id.trim().is_empty() {
        return Err(AppError::BadRequest("missing_bank_id".to_string()));
    }
    let counts = counts::handle(&state.db, params.bank_id.trim())
        .await
        .map_err(|e| match e {
            CountsError::Database(e) => AppError::Database(e),
            CountsError::Db(e) => AppError::Internal(e.to_string()),
        })?;
    Ok(Json(counts))
}
