//! Persistence coordinator
//!
//! Fans one normalization batch out to the relational store, the
//! timeseries table, the transaction graph, and the vector index, in
//! that order. A failing stage fails the whole parse attempt; the
//! orchestrator's retry machinery owns recovery, so nothing here
//! swallows errors. Stage failures are logged with enough context to
//! find the batch again.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info, instrument};

use payscope_common::types::LifecycleStage;

use crate::db;
use crate::normalize::NormalizationResult;
use crate::oracles::EmbeddingOracle;
use crate::reconcile::{analyze_lifecycle, LifecycleAnomalies, StageRecord};

pub mod graph;
pub mod relational;
pub mod vector;

pub use graph::{GraphStore, Neo4jGraphStore};
pub use vector::{HttpVectorStore, VectorStore};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Relational(#[from] relational::RelationalError),

    #[error(transparent)]
    Graph(#[from] graph::GraphError),

    #[error(transparent)]
    Vector(#[from] vector::VectorError),

    #[error("Stage record lookup failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Db(#[from] db::DbError),
}

/// Optional downstream stores. Absent targets are skipped, which keeps
/// single-store deployments and tests simple.
pub struct PersistTargets<'a> {
    pub graph: Option<&'a dyn GraphStore>,
    pub embedder: Option<&'a dyn EmbeddingOracle>,
    pub vector: Option<&'a dyn VectorStore>,
}

impl PersistTargets<'_> {
    pub fn relational_only() -> Self {
        PersistTargets {
            graph: None,
            embedder: None,
            vector: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    transaction_id: String,
    lifecycle_stage: String,
    amount: f64,
    currency: String,
    timestamp_utc: DateTime<Utc>,
}

/// Load every known stage event for the given transactions and derive
/// per-transaction anomaly flags. Reads cross report boundaries: a
/// settlement from last week still counts.
async fn compute_anomalies(
    pool: &PgPool,
    bank_id: &str,
    transaction_ids: &[String],
) -> Result<BTreeMap<String, LifecycleAnomalies>, PersistError> {
    if transaction_ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut tx = pool.begin().await?;
    db::set_tenant(&mut *tx, bank_id).await?;

    let rows = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT transaction_id, lifecycle_stage, amount::float8 AS amount,
               currency, timestamp_utc
        FROM transactions
        WHERE bank_id = $1 AND transaction_id = ANY($2)
        "#,
    )
    .bind(bank_id)
    .bind(transaction_ids)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut by_txn: BTreeMap<String, Vec<StageRecord>> = BTreeMap::new();
    for row in rows {
        let Ok(stage) = LifecycleStage::from_str(&row.lifecycle_stage) else {
            continue;
        };
        by_txn
            .entry(row.transaction_id.clone())
            .or_default()
            .push(StageRecord {
                stage,
                amount: row.amount,
                currency: row.currency,
                event_time: row.timestamp_utc,
            });
    }

    Ok(by_txn
        .into_iter()
        .map(|(txn, records)| (txn, analyze_lifecycle(&records)))
        .collect())
}

/// Persist one normalization batch everywhere.
#[instrument(skip_all, fields(bank_id, report_id = %result.report.report_id))]
pub async fn persist_all(
    pool: &PgPool,
    targets: &PersistTargets<'_>,
    bank_id: &str,
    result: &NormalizationResult,
) -> Result<(), PersistError> {
    relational::persist_relational(pool, bank_id, result)
        .await
        .map_err(|e| stage_failed("relational", bank_id, result, e))?;

    relational::persist_timeseries(pool, bank_id, result)
        .await
        .map_err(|e| stage_failed("timeseries", bank_id, result, e))?;

    if let Some(graph_store) = targets.graph {
        let transaction_ids: Vec<String> = result
            .transactions
            .iter()
            .map(|f| f.transaction_id.clone())
            .collect();
        let anomalies = compute_anomalies(pool, bank_id, &transaction_ids).await?;

        graph::persist_graph(graph_store, bank_id, result, &anomalies)
            .await
            .map_err(|e| stage_failed("graph", bank_id, result, e))?;
    }

    if let (Some(embedder), Some(vector_store)) = (targets.embedder, targets.vector) {
        vector::persist_embeddings(embedder, vector_store, bank_id, result)
            .await
            .map_err(|e| stage_failed("vector", bank_id, result, e))?;
    }

    info!(
        bank_id,
        transactions = result.transactions.len(),
        "All persistence stages complete"
    );
    Ok(())
}

fn stage_failed<E: Into<PersistError> + std::fmt::Display>(
    stage: &str,
    bank_id: &str,
    result: &NormalizationResult,
    err: E,
) -> PersistError {
    error!(
        stage,
        bank_id,
        report_id = %result.report.report_id,
        error = %err,
        "Persistence stage failed"
    );
    err.into()
}
