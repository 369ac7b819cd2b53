//! Parse job status lookup

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ParseJob;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobQuery {
    pub artifact_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("No parse job found for artifact {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: &PgPool, query: GetJobQuery) -> Result<ParseJob, GetJobError> {
    sqlx::query_as::<_, ParseJob>(
        r#"
        SELECT job_id, artifact_id, status, task_ref, error, updated_at
        FROM parse_jobs
        WHERE artifact_id = $1
        "#,
    )
    .bind(query.artifact_id)
    .fetch_optional(pool)
    .await?
    .ok_or(GetJobError::NotFound(query.artifact_id))
}
