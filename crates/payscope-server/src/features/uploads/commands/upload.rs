//! Artifact registration
//!
//! One upload call registers one file: detect its format, deduplicate
//! by checksum, land the bytes in object storage, and make parse work
//! durable. The object write happens before the database transaction;
//! if the transaction then fails, the orphaned object is deleted as
//! compensation. A byte-identical re-upload always gets a fresh
//! ReportUpload row but never a second artifact or a second parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use payscope_common::types::JobStatus;

use crate::detect::{detect_file_format, FormatDetection};
use crate::models::Artifact;
use crate::queue::{ParseQueue, QueueError};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct RegisterUploadCommand {
    pub bank_id: String,
    pub uploader: String,
    pub filename: String,
    pub content_type: Option<String>,
    /// Streamed temp copy of the upload
    pub temp_path: PathBuf,
    /// First bytes of the file, for magic-number detection
    pub head: Vec<u8>,
    pub checksum_sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUploadResponse {
    pub report_id: Uuid,
    pub artifact_id: Uuid,
    pub filename: String,
    pub uploader: String,
    pub checksum_sha256: String,
    pub file_format: String,
    pub pdf_kind: Option<String>,
    pub parse_status: String,
    /// True when the bytes were already known
    pub deduplicated: bool,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterUploadError {
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Filename is required and cannot be empty")]
    FilenameRequired,
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl RegisterUploadCommand {
    pub fn validate(&self) -> Result<(), RegisterUploadError> {
        if self.filename.trim().is_empty() {
            return Err(RegisterUploadError::FilenameRequired);
        }
        if self.size_bytes == 0 {
            return Err(RegisterUploadError::EmptyFile);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(pool, storage, queue, command), fields(filename = %command.filename, bank_id = %command.bank_id))]
pub async fn handle(
    pool: &PgPool,
    storage: &Storage,
    queue: &ParseQueue,
    command: RegisterUploadCommand,
) -> Result<RegisterUploadResponse, RegisterUploadError> {
    command.validate()?;

    let FormatDetection {
        file_format,
        pdf_kind,
    } = detect_file_format(&command.head, &command.filename, &command.temp_path);

    let existing = sqlx::query_as::<_, Artifact>(
        r#"
        SELECT artifact_id, checksum_sha256, file_format, pdf_kind, object_key, created_at
        FROM artifacts
        WHERE checksum_sha256 = $1
        "#,
    )
    .bind(&command.checksum_sha256)
    .fetch_optional(pool)
    .await?;

    let (artifact, first_seen) = match existing {
        Some(artifact) => {
            info!(artifact_id = %artifact.artifact_id, "Duplicate upload; reusing artifact");
            (artifact, false)
        }
        None => {
            let object_key = Storage::raw_key(&command.checksum_sha256, file_format);

            // Object first, rows second. A crash between the two leaves
            // an unreferenced object, which is harmless; rows pointing
            // at a missing object would not be.
            storage
                .upload_file(&object_key, &command.temp_path, command.content_type.clone())
                .await?;

            match insert_artifact_and_job(pool, &command.checksum_sha256, file_format.as_str(), pdf_kind.map(|k| k.as_str()), &object_key).await {
                Ok(artifact) => (artifact, true),
                Err(e) => {
                    warn!(error = %e, "Artifact insert failed; deleting uploaded object");
                    if let Err(del) = storage.delete(&object_key).await {
                        warn!(error = %del, key = object_key, "Compensating delete failed");
                    }
                    return Err(e.into());
                }
            }
        }
    };

    // Every call gets its own upload record, duplicates included
    let report_id = Uuid::new_v4();
    let upload_time: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO report_uploads (report_id, artifact_id, bank_id, filename, uploader,
                                    checksum_sha256, upload_time)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        RETURNING upload_time
        "#,
    )
    .bind(report_id)
    .bind(artifact.artifact_id)
    .bind(&command.bank_id)
    .bind(&command.filename)
    .bind(&command.uploader)
    .bind(&command.checksum_sha256)
    .fetch_one(pool)
    .await?;

    let parse_status = if first_seen {
        enqueue_parse(pool, queue, artifact.artifact_id, &command.bank_id).await?;
        JobStatus::Queued.as_str().to_string()
    } else {
        // Exactly one parse job per artifact. A registry row without
        // one cannot ever parse, so recreate and re-enqueue it.
        let recreated = sqlx::query(
            r#"
            INSERT INTO parse_jobs (job_id, artifact_id, status, updated_at)
            VALUES (gen_random_uuid(), $1, $2, now())
            ON CONFLICT (artifact_id) DO NOTHING
            "#,
        )
        .bind(artifact.artifact_id)
        .bind(JobStatus::Queued.as_str())
        .execute(pool)
        .await?
        .rows_affected()
            == 1;

        if recreated {
            warn!(artifact_id = %artifact.artifact_id, "Artifact had no parse job; re-enqueued");
            enqueue_parse(pool, queue, artifact.artifact_id, &command.bank_id).await?;
            JobStatus::Queued.as_str().to_string()
        } else {
            sqlx::query_scalar::<_, String>(
                "SELECT status FROM parse_jobs WHERE artifact_id = $1",
            )
            .bind(artifact.artifact_id)
            .fetch_one(pool)
            .await?
        }
    };

    Ok(RegisterUploadResponse {
        report_id,
        artifact_id: artifact.artifact_id,
        filename: command.filename,
        uploader: command.uploader,
        checksum_sha256: command.checksum_sha256,
        file_format: artifact.file_format.clone(),
        pdf_kind: artifact.pdf_kind.clone(),
        parse_status,
        deduplicated: !first_seen,
        upload_time,
    })
}

/// Enqueue the parse task and record its id on the job row.
async fn enqueue_parse(
    pool: &PgPool,
    queue: &ParseQueue,
    artifact_id: Uuid,
    bank_id: &str,
) -> Result<(), RegisterUploadError> {
    let task_id = queue.enqueue(artifact_id, bank_id).await?;
    sqlx::query("UPDATE parse_jobs SET task_ref = $2 WHERE artifact_id = $1")
        .bind(artifact_id)
        .bind(task_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert the artifact row and its QUEUED parse job in one transaction.
async fn insert_artifact_and_job(
    pool: &PgPool,
    checksum: &str,
    file_format: &str,
    pdf_kind: Option<&str>,
    object_key: &str,
) -> Result<Artifact, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let artifact = sqlx::query_as::<_, Artifact>(
        r#"
        INSERT INTO artifacts (artifact_id, checksum_sha256, file_format, pdf_kind,
                               object_key, created_at)
        VALUES (gen_random_uuid(), $1, $2, $3, $4, now())
        RETURNING artifact_id, checksum_sha256, file_format, pdf_kind, object_key, created_at
        "#,
    )
    .bind(checksum)
    .bind(file_format)
    .bind(pdf_kind)
    .bind(object_key)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO parse_jobs (job_id, artifact_id, status, updated_at)
        VALUES (gen_random_uuid(), $1, $2, now())
        "#,
    )
    .bind(artifact.artifact_id)
    .bind(JobStatus::Queued.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(filename: &str, size: u64) -> RegisterUploadCommand {
        RegisterUploadCommand {
            bank_id: "bank-a".to_string(),
            uploader: "ops@bank-a".to_string(),
            filename: filename.to_string(),
            content_type: Some("text/csv".to_string()),
            temp_path: PathBuf::from("/tmp/upload"),
            head: b"txn_id,amount".to_vec(),
            checksum_sha256: "ab".repeat(32),
            size_bytes: size,
        }
    }

    #[test]
    fn test_validation_success() {
        assert!(command("report.csv", 128).validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_file() {
        assert!(matches!(
            command("report.csv", 0).validate(),
            Err(RegisterUploadError::EmptyFile)
        ));
    }

    #[test]
    fn test_validation_rejects_blank_filename() {
        assert!(matches!(
            command("  ", 128).validate(),
            Err(RegisterUploadError::FilenameRequired)
        ));
    }
}
