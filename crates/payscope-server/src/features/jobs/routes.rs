//! Job status endpoint

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::models::ParseJob;

use super::queries::get_job::{self, GetJobError, GetJobQuery};

/// `GET /jobs/by-artifact/{artifact_id}`
pub async fn get_job_by_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
) -> AppResult<Json<ParseJob>> {
    let job = get_job::handle(&state.db, GetJobQuery { artifact_id })
        .await
        .map_err(|e| match e {
            GetJobError::NotFound(_) => AppError::NotFound(e.to_string()),
            GetJobError::Database(e) => AppError::Database(e),
        })?;
    Ok(Json(job))
}
