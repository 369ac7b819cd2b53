//! Relational and timeseries persistence
//!
//! All statements run inside one transaction with the tenant context
//! set, so row-level security scopes every write to the owning bank.
//! Upserts carry natural keys, which makes a replayed parse of the same
//! artifact converge instead of duplicating rows.

use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::db;
use crate::normalize::NormalizationResult;

#[derive(Error, Debug)]
pub enum RelationalError {
    #[error("Relational persistence failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Tenant(#[from] db::DbError),
}

/// Write the report, merchants, and per-stage transaction rows.
#[instrument(skip(pool, result), fields(report_id = %result.report.report_id))]
pub async fn persist_relational(
    pool: &PgPool,
    bank_id: &str,
    result: &NormalizationResult,
) -> Result<(), RelationalError> {
    let mut tx = pool.begin().await?;
    db::set_tenant(&mut *tx, bank_id).await?;

    sqlx::query(
        r#"
        INSERT INTO reports (report_id, bank_id, report_type, ingestion_time,
                             source_network, record_count, schema_version)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (bank_id, report_id, schema_version) DO UPDATE
        SET record_count = EXCLUDED.record_count,
            source_network = EXCLUDED.source_network,
            ingestion_time = EXCLUDED.ingestion_time
        "#,
    )
    .bind(result.report.report_id)
    .bind(bank_id)
    .bind(&result.report.report_type)
    .bind(result.report.ingestion_time)
    .bind(&result.report.source_network)
    .bind(result.report.record_count)
    .bind(&result.report.schema_version)
    .execute(&mut *tx)
    .await?;

    for fact in &result.transactions {
        let merchant_name = fact
            .extensions
            .get("merchant_name")
            .and_then(|v| v.as_str());
        let merchant_country = fact
            .extensions
            .get("merchant_country")
            .and_then(|v| v.as_str());

        sqlx::query(
            r#"
            INSERT INTO merchants (merchant_id, bank_id, schema_version, name, country)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (merchant_id, bank_id, schema_version) DO UPDATE
            SET name = COALESCE(EXCLUDED.name, merchants.name),
                country = COALESCE(EXCLUDED.country, merchants.country)
            "#,
        )
        .bind(&fact.merchant_id)
        .bind(bank_id)
        .bind(&result.report.schema_version)
        .bind(merchant_name)
        .bind(merchant_country)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (bank_id, transaction_id, lifecycle_stage, schema_version,
                                      amount, currency, timestamp_utc, merchant_id, card_network,
                                      report_id, confidence_score, raw_source_ref, extensions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (bank_id, transaction_id, lifecycle_stage, schema_version) DO UPDATE
            SET amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                timestamp_utc = EXCLUDED.timestamp_utc,
                merchant_id = EXCLUDED.merchant_id,
                card_network = EXCLUDED.card_network,
                report_id = EXCLUDED.report_id,
                confidence_score = EXCLUDED.confidence_score,
                raw_source_ref = EXCLUDED.raw_source_ref,
                extensions = EXCLUDED.extensions
            "#,
        )
        .bind(bank_id)
        .bind(&fact.transaction_id)
        .bind(fact.lifecycle_stage.as_str())
        .bind(&result.report.schema_version)
        .bind(&fact.amount)
        .bind(&fact.currency)
        .bind(fact.timestamp_utc)
        .bind(&fact.merchant_id)
        .bind(&fact.card_network)
        .bind(result.report.report_id)
        .bind(fact.confidence_score)
        .bind(serde_json::to_value(&fact.raw_source_ref)?)
        .bind(serde_json::to_value(&fact.extensions)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        bank_id,
        transactions = result.transactions.len(),
        "Relational persistence complete"
    );
    Ok(())
}

/// Write daily volume buckets to the timeseries table.
///
/// Buckets use `ON CONFLICT DO NOTHING`: a replayed parse never
/// double-counts a bucket it already wrote.
#[instrument(skip(pool, result), fields(report_id = %result.report.report_id))]
pub async fn persist_timeseries(
    pool: &PgPool,
    bank_id: &str,
    result: &NormalizationResult,
) -> Result<(), RelationalError> {
    // (day, currency, stage) -> (count, total)
    let mut buckets: BTreeMap<(chrono::NaiveDate, String, &'static str), (i64, BigDecimal)> =
        BTreeMap::new();

    for fact in &result.transactions {
        let key = (
            fact.timestamp_utc.date_naive(),
            fact.currency.clone(),
            fact.lifecycle_stage.as_str(),
        );
        let entry = buckets
            .entry(key)
            .or_insert_with(|| (0, BigDecimal::from(0)));
        entry.0 += 1;
        entry.1 += &fact.amount;
    }

    if buckets.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    db::set_tenant(&mut *tx, bank_id).await?;

    for ((day, currency, stage), (count, total)) in &buckets {
        sqlx::query(
            r#"
            INSERT INTO transaction_volume (bank_id, bucket_date, currency, lifecycle_stage,
                                            report_id, txn_count, total_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (bank_id, bucket_date, currency, lifecycle_stage, report_id)
            DO NOTHING
            "#,
        )
        .bind(bank_id)
        .bind(day)
        .bind(currency)
        .bind(stage)
        .bind(result.report.report_id)
        .bind(count)
        .bind(total)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    debug!(bank_id, buckets = buckets.len(), "Timeseries buckets written");
    Ok(())
}
