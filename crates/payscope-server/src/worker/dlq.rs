//! Dead letter queue
//!
//! A task that exhausts its retry budget lands here with its full
//! payload so an operator can inspect and replay it by hand. Nothing is
//! ever deleted automatically.

use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Record an exhausted task. Returns the DLQ row id.
#[instrument(skip(pool, payload))]
pub async fn write_dlq(
    pool: &PgPool,
    task_name: &str,
    task_id: &str,
    artifact_id: Option<Uuid>,
    error: &str,
    payload: &serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO dlq_events (id, task_name, task_id, artifact_id, error, payload, created_at)
        VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now())
        RETURNING id
        "#,
    )
    .bind(task_name)
    .bind(task_id)
    .bind(artifact_id)
    .bind(error)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    warn!(
        task_name,
        task_id,
        dlq_id = %id,
        "Task moved to dead letter queue"
    );
    Ok(id)
}
