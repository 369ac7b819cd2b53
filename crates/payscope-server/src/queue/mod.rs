//! Durable parse task queue
//!
//! A Postgres table doubles as the task queue so enqueue can share the
//! upload transaction and survive restarts. Dequeue claims one due task
//! with `FOR UPDATE SKIP LOCKED`, so concurrent workers never hand out
//! the same task twice. A claimed task that is neither completed nor
//! retried becomes visible again after the visibility timeout.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Seconds before a claimed-but-unfinished task is handed out again
const VISIBILITY_TIMEOUT_SECS: i64 = 600;

pub const PARSE_TASK_NAME: &str = "parse_artifact";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Payload of a parse task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsePayload {
    pub artifact_id: Uuid,
    pub bank_id: String,
}

/// A claimed queue task
#[derive(Debug, Clone, FromRow)]
pub struct QueueTask {
    pub task_id: Uuid,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
}

impl QueueTask {
    pub fn parse_payload(&self) -> Result<ParsePayload, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Clone)]
pub struct ParseQueue {
    pool: PgPool,
}

impl ParseQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a parse task, immediately available. Returns the task id
    /// the caller records as the job's task_ref.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, artifact_id: Uuid, bank_id: &str) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_value(ParsePayload {
            artifact_id,
            bank_id: bank_id.to_string(),
        })?;

        let task_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO parse_queue (task_id, task_name, payload, attempt, available_at)
            VALUES (gen_random_uuid(), $1, $2, 0, now())
            RETURNING task_id
            "#,
        )
        .bind(PARSE_TASK_NAME)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(%task_id, %artifact_id, "Enqueued parse task");
        Ok(task_id)
    }

    /// Claim the next due task, if any.
    ///
    /// The claim and the visibility update happen in one statement, so
    /// two workers polling simultaneously get different tasks or none.
    pub async fn dequeue(&self) -> Result<Option<QueueTask>, QueueError> {
        let task = sqlx::query_as::<_, QueueTask>(
            r#"
            UPDATE parse_queue
            SET locked_at = now()
            WHERE task_id = (
                SELECT task_id
                FROM parse_queue
                WHERE available_at <= now()
                  AND (locked_at IS NULL OR locked_at < now() - make_interval(secs => $1))
                ORDER BY available_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING task_id, task_name, payload, attempt
            "#,
        )
        .bind(VISIBILITY_TIMEOUT_SECS as f64)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(task) = &task {
            debug!(task_id = %task.task_id, attempt = task.attempt, "Dequeued task");
        }
        Ok(task)
    }

    /// Remove a finished task (success or dead-lettered).
    #[instrument(skip(self))]
    pub async fn complete(&self, task_id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM parse_queue WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Schedule a failed task for another attempt after `delay_secs`.
    #[instrument(skip(self))]
    pub async fn retry(&self, task_id: Uuid, delay_secs: u64) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE parse_queue
            SET attempt = attempt + 1,
                locked_at = NULL,
                available_at = now() + make_interval(secs => $2)
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(delay_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
