//! Worker loop and parse pipeline
//!
//! The worker polls the durable queue, claims the artifact's parse job,
//! and runs the pipeline: download, extract, normalize, persist. Any
//! pipeline error marks the job FAILED and schedules a retry with
//! jittered backoff; the retry budget exhausting moves the task to the
//! dead letter queue. SUCCESS is only written after every persistence
//! stage committed.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use payscope_common::types::JobStatus;

use crate::config::PipelineConfig;
use crate::normalize::{self, NormalizeContext};
use crate::oracles::{EmbeddingOracle, ExtractionInput, FieldExtractionOracle, MappingOracle};
use crate::persist::{self, GraphStore, PersistTargets, VectorStore};
use crate::queue::{ParseQueue, QueueTask};
use crate::storage::Storage;

use super::backoff::backoff_with_jitter;
use super::claim::{claim_parse_job, ClaimError, ClaimOutcome, ClaimedJob};
use super::dlq::write_dlq;

pub struct Worker {
    pub pool: PgPool,
    pub storage: Storage,
    pub queue: ParseQueue,
    pub extraction: Arc<dyn FieldExtractionOracle>,
    pub mapping: Arc<dyn MappingOracle>,
    pub embedder: Option<Arc<dyn EmbeddingOracle>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub vector: Option<Arc<dyn VectorStore>>,
    pub pipeline: PipelineConfig,
}

impl Worker {
    /// Poll the queue forever.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.pipeline.worker_poll_interval_ms,
            max_retries = self.pipeline.max_retries,
            "Worker started"
        );

        loop {
            match self.queue.dequeue().await {
                Ok(Some(task)) => {
                    if let Err(e) = self.handle_task(&task).await {
                        error!(task_id = %task.task_id, error = %e, "Task handling failed");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(
                        self.pipeline.worker_poll_interval_ms,
                    ))
                    .await;
                }
                Err(e) => {
                    error!(error = %e, "Queue poll failed");
                    tokio::time::sleep(Duration::from_millis(
                        self.pipeline.worker_poll_interval_ms,
                    ))
                    .await;
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id, attempt = task.attempt))]
    pub async fn handle_task(&self, task: &QueueTask) -> Result<()> {
        let payload = match task.parse_payload() {
            Ok(p) => p,
            Err(e) => {
                // Unparseable payloads can never succeed; dead-letter
                // immediately instead of burning retries.
                write_dlq(
                    &self.pool,
                    &task.task_name,
                    &task.task_id.to_string(),
                    None,
                    &format!("invalid payload: {e}"),
                    &task.payload,
                )
                .await?;
                self.queue.complete(task.task_id).await?;
                return Ok(());
            }
        };

        let outcome = match claim_parse_job(&self.pool, payload.artifact_id).await {
            Ok(outcome) => outcome,
            Err(ClaimError::JobNotFound(artifact_id)) => {
                write_dlq(
                    &self.pool,
                    &task.task_name,
                    &task.task_id.to_string(),
                    Some(artifact_id),
                    "no parse job for artifact",
                    &task.payload,
                )
                .await?;
                self.queue.complete(task.task_id).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let job = match outcome {
            ClaimOutcome::AlreadySuccess | ClaimOutcome::AlreadyStarted => {
                self.queue.complete(task.task_id).await?;
                return Ok(());
            }
            ClaimOutcome::Claimed(job) => job,
        };

        match self.run_pipeline(&payload.bank_id, &job).await {
            Ok(transactions) => {
                mark_job(&self.pool, job.job_id, JobStatus::Success, None).await?;
                self.queue.complete(task.task_id).await?;
                info!(
                    artifact_id = %payload.artifact_id,
                    bank_id = %payload.bank_id,
                    transactions,
                    "Parse succeeded"
                );
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(
                    artifact_id = %payload.artifact_id,
                    attempt = task.attempt,
                    error = %message,
                    "Parse attempt failed"
                );
                mark_job(&self.pool, job.job_id, JobStatus::Failed, Some(&message)).await?;

                let next_attempt = task.attempt.saturating_add(1) as u32;
                if next_attempt >= self.pipeline.max_retries {
                    write_dlq(
                        &self.pool,
                        &task.task_name,
                        &task.task_id.to_string(),
                        Some(payload.artifact_id),
                        &message,
                        &task.payload,
                    )
                    .await?;
                    self.queue.complete(task.task_id).await?;
                } else {
                    let delay = backoff_with_jitter(
                        task.attempt.max(0) as u32,
                        self.pipeline.backoff_cap_secs,
                    );
                    info!(
                        task_id = %task.task_id,
                        delay_secs = delay,
                        next_attempt,
                        "Scheduling retry"
                    );
                    self.queue.retry(task.task_id, delay).await?;
                }
            }
        }

        Ok(())
    }

    /// Download, extract, normalize, persist. Returns the number of
    /// persisted transactions.
    async fn run_pipeline(&self, bank_id: &str, job: &ClaimedJob) -> Result<usize> {
        let artifact = &job.artifact;
        let file_format = artifact.file_format()?;

        let upload = latest_upload(&self.pool, bank_id, artifact.artifact_id)
            .await
            .context("Looking up report upload")?;

        let bytes = self
            .storage
            .download(&artifact.object_key)
            .await
            .context("Downloading artifact")?;

        let document = self
            .extraction
            .extract(&ExtractionInput {
                artifact_id: artifact.artifact_id,
                object_key: artifact.object_key.clone(),
                file_format,
                pdf_kind: artifact.pdf_kind(),
                bytes,
            })
            .await
            .context("Field extraction")?;

        let ctx = NormalizeContext {
            bank_id: bank_id.to_string(),
            artifact_id: artifact.artifact_id,
            report_id: upload.report_id,
            report_type: format!("{}_report", file_format.extension()),
            source_network: "UNKNOWN".to_string(),
            object_key: artifact.object_key.clone(),
            file_format,
            ingestion_time: upload.upload_time,
        };

        let result = normalize::normalize(
            &ctx,
            &document,
            self.mapping.as_ref(),
            self.pipeline.mapping_confidence_threshold,
        )
        .await;

        if !result.errors.is_empty() {
            warn!(
                artifact_id = %artifact.artifact_id,
                errors = result.errors.len(),
                "Normalization recorded validation errors"
            );
        }

        let targets = PersistTargets {
            graph: self.graph.as_deref(),
            embedder: self.embedder.as_deref(),
            vector: self.vector.as_deref(),
        };
        persist::persist_all(&self.pool, &targets, bank_id, &result)
            .await
            .context("Persisting normalized batch")?;

        Ok(result.transactions.len())
    }
}

#[derive(sqlx::FromRow)]
struct UploadRef {
    report_id: Uuid,
    upload_time: chrono::DateTime<chrono::Utc>,
}

/// Most recent upload of this artifact for this bank; its report id is
/// the one the batch persists under.
async fn latest_upload(pool: &PgPool, bank_id: &str, artifact_id: Uuid) -> Result<UploadRef> {
    let upload = sqlx::query_as::<_, UploadRef>(
        r#"
        SELECT report_id, upload_time
        FROM report_uploads
        WHERE artifact_id = $1 AND bank_id = $2
        ORDER BY upload_time DESC
        LIMIT 1
        "#,
    )
    .bind(artifact_id)
    .bind(bank_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("No report upload found for artifact {artifact_id}"))?;
    Ok(upload)
}

async fn mark_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE parse_jobs
        SET status = $2, error = $3, updated_at = now()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
