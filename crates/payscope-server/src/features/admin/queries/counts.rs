//! Per-bank persistence counts
//!
//! Operator-facing sanity check after a batch of uploads: how many
//! rows landed in each store for one bank. Counts run under the bank's
//! tenant context like every other read.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCounts {
    pub bank_id: String,
    pub reports: i64,
    pub transactions: i64,
    pub merchants: i64,
    pub volume_buckets: i64,
    pub parse_jobs_failed: i64,
    pub dlq_events: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum CountsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Db(#[from] db::DbError),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: &PgPool, bank_id: &str) -> Result<ValidationCounts, CountsError> {
    let mut tx = pool.begin().await?;
    db::set_tenant(&mut *tx, bank_id).await?;

    let reports: i64 = sqlx::query_scalar("SELECT count(*) FROM reports WHERE bank_id = $1")
        .bind(bank_id)
        .fetch_one(&mut *tx)
        .await?;
    let transactions: i64 =
        sqlx::query_scalar("SELECT count(*) FROM transactions WHERE bank_id = $1")
            .bind(bank_id)
            .fetch_one(&mut *tx)
            .await?;
    let merchants: i64 = sqlx::query_scalar("SELECT count(*) FROM merchants WHERE bank_id = $1")
        .bind(bank_id)
        .fetch_one(&mut *tx)
        .await?;
    let volume_buckets: i64 =
        sqlx::query_scalar("SELECT count(*) FROM transaction_volume WHERE bank_id = $1")
            .bind(bank_id)
            .fetch_one(&mut *tx)
            .await?;
    let parse_jobs_failed: i64 = sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM parse_jobs j
        JOIN report_uploads u ON u.artifact_id = j.artifact_id
        WHERE u.bank_id = $1 AND j.status = 'FAILED'
        "#,
    )
    .bind(bank_id)
    .fetch_one(&mut *tx)
    .await?;
    let dlq_events: i64 = sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM dlq_events
        WHERE payload ->> 'bank_id' = $1
        "#,
    )
    .bind(bank_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ValidationCounts {
        bank_id: bank_id.to_string(),
        reports,
        transactions,
        merchants,
        volume_buckets,
        parse_jobs_failed,
        dlq_events,
    })
}
