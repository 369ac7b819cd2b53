//! Idempotent job claiming
//!
//! Before the pipeline runs, the worker claims the artifact's parse job
//! inside one transaction: the row is locked, the current status is
//! inspected, and the job moves to STARTED only when no other attempt
//! already succeeded or is in flight. The STARTED transition commits
//! before any pipeline work begins, so duplicate deliveries of the same
//! task short-circuit instead of double-processing.

use sqlx::PgPool;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use payscope_common::types::JobStatus;

use crate::models::Artifact;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Claim transaction failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("No parse job found for artifact {0}")]
    JobNotFound(Uuid),

    #[error("Parse job for artifact {0} has invalid status '{1}'")]
    InvalidStatus(Uuid, String),
}

/// What the claim decided for this delivery
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A previous attempt already finished; nothing to do
    AlreadySuccess,
    /// Another worker is processing the job right now
    AlreadyStarted,
    /// This delivery owns the job; run the pipeline
    Claimed(ClaimedJob),
}

#[derive(Debug)]
pub struct ClaimedJob {
    pub job_id: Uuid,
    pub artifact: Artifact,
}

/// Pure status decision, separated so the state machine is testable
/// without a database.
pub fn decide(status: JobStatus) -> Decision {
    match status {
        JobStatus::Success => Decision::AlreadySuccess,
        JobStatus::Started => Decision::AlreadyStarted,
        JobStatus::Queued | JobStatus::Failed => Decision::Claim,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    AlreadySuccess,
    AlreadyStarted,
    Claim,
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    job_id: Uuid,
    status: String,
    artifact_id: Uuid,
    checksum_sha256: String,
    file_format: String,
    pdf_kind: Option<String>,
    object_key: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Claim the parse job for an artifact.
#[instrument(skip(pool))]
pub async fn claim_parse_job(pool: &PgPool, artifact_id: Uuid) -> Result<ClaimOutcome, ClaimError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ClaimRow>(
        r#"
        SELECT j.job_id, j.status, a.artifact_id, a.checksum_sha256,
               a.file_format, a.pdf_kind, a.object_key, a.created_at
        FROM parse_jobs j
        JOIN artifacts a ON a.artifact_id = j.artifact_id
        WHERE j.artifact_id = $1
        FOR UPDATE OF j
        "#,
    )
    .bind(artifact_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ClaimError::JobNotFound(artifact_id))?;

    let status = JobStatus::from_str(&row.status)
        .map_err(|_| ClaimError::InvalidStatus(artifact_id, row.status.clone()))?;

    match decide(status) {
        Decision::AlreadySuccess => {
            debug!(%artifact_id, "Job already succeeded; skipping");
            tx.rollback().await?;
            Ok(ClaimOutcome::AlreadySuccess)
        }
        Decision::AlreadyStarted => {
            debug!(%artifact_id, "Job already in flight; skipping");
            tx.rollback().await?;
            Ok(ClaimOutcome::AlreadyStarted)
        }
        Decision::Claim => {
            sqlx::query(
                r#"
                UPDATE parse_jobs
                SET status = $2, error = NULL, updated_at = now()
                WHERE job_id = $1
                "#,
            )
            .bind(row.job_id)
            .bind(JobStatus::Started.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(%artifact_id, job_id = %row.job_id, "Claimed parse job");
            Ok(ClaimOutcome::Claimed(ClaimedJob {
                job_id: row.job_id,
                artifact: Artifact {
                    artifact_id: row.artifact_id,
                    checksum_sha256: row.checksum_sha256,
                    file_format: row.file_format,
                    pdf_kind: row.pdf_kind,
                    object_key: row.object_key,
                    created_at: row.created_at,
                },
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_terminal() {
        assert_eq!(decide(JobStatus::Success), Decision::AlreadySuccess);
    }

    #[test]
    fn test_started_is_not_reclaimed() {
        assert_eq!(decide(JobStatus::Started), Decision::AlreadyStarted);
    }

    #[test]
    fn test_queued_and_failed_are_claimable() {
        assert_eq!(decide(JobStatus::Queued), Decision::Claim);
        assert_eq!(decide(JobStatus::Failed), Decision::Claim);
    }
}
