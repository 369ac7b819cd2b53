//! Vector persistence
//!
//! Each transaction fact becomes one embedding point with a canonical
//! text rendering. The text template has a fixed field order so the
//! same fact always embeds to the same vector, and the point id is
//! `{bank_id}:{transaction_id}:{stage}` so replays overwrite instead of
//! accumulating.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::normalize::{NormalizationResult, TransactionFact};
use crate::oracles::{EmbeddingOracle, OracleError};

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Vector store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] OracleError),

    #[error("Vector store returned an error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), VectorError>;
}

/// Deterministic point id for a fact
pub fn vector_id(bank_id: &str, fact: &TransactionFact) -> String {
    format!(
        "{}:{}:{}",
        bank_id,
        fact.transaction_id,
        fact.lifecycle_stage.as_str()
    )
}

/// Canonical text rendering of a fact. Field order is fixed; changing
/// it would silently re-embed the whole corpus.
pub fn canonical_text(fact: &TransactionFact) -> String {
    format!(
        "transaction {} amount {} {} at {} stage {} merchant {} network {}",
        fact.transaction_id,
        fact.amount,
        fact.currency,
        fact.timestamp_utc.to_rfc3339(),
        fact.lifecycle_stage.as_str(),
        fact.merchant_id,
        fact.card_network,
    )
}

/// Embed and upsert all facts of a normalization batch.
#[instrument(skip_all, fields(report_id = %result.report.report_id))]
pub async fn persist_embeddings(
    embedder: &dyn EmbeddingOracle,
    store: &dyn VectorStore,
    bank_id: &str,
    result: &NormalizationResult,
) -> Result<(), VectorError> {
    if result.transactions.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = result.transactions.iter().map(canonical_text).collect();
    let vectors = embedder.embed(&texts).await?;

    let points: Vec<VectorPoint> = result
        .transactions
        .iter()
        .zip(vectors)
        .map(|(fact, vector)| VectorPoint {
            id: vector_id(bank_id, fact),
            vector,
            metadata: json!({
                "bank_id": bank_id,
                "transaction_id": fact.transaction_id,
                "lifecycle_stage": fact.lifecycle_stage.as_str(),
                "report_id": result.report.report_id.to_string(),
                "source_type": fact.raw_source_ref.source_type.as_str(),
            }),
        })
        .collect();

    store.upsert(&points).await?;

    info!(bank_id, points = points.len(), "Vector persistence complete");
    Ok(())
}

/// HTTP vector index backend with a Pinecone-style upsert endpoint
#[derive(Clone)]
pub struct HttpVectorStore {
    client: Client,
    base_url: String,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, VectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), VectorError> {
        debug!(points = points.len(), "Upserting vectors");

        let response = self
            .client
            .post(format!("{}/vectors/upsert", self.base_url))
            .json(&json!({ "vectors": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Backend(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic embedder: vector is [len, first-byte] of the text
    pub struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingOracle for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().next().unwrap_or(0) as f32])
                .collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryVectorStore {
        pub points: Mutex<Vec<VectorPoint>>,
    }

    #[async_trait]
    impl VectorStore for InMemoryVectorStore {
        async fn upsert(&self, points: &[VectorPoint]) -> Result<(), VectorError> {
            let mut stored = self.points.lock().unwrap();
            for point in points {
                stored.retain(|p| p.id != point.id);
                stored.push(point.clone());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeEmbedder, InMemoryVectorStore};
    use super::*;
    use crate::normalize::schema::{RawSourceRef, ReportFact, SourceType};
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use payscope_common::types::LifecycleStage;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn fact(id: &str, stage: LifecycleStage) -> TransactionFact {
        TransactionFact {
            transaction_id: id.to_string(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            timestamp_utc: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            lifecycle_stage: stage,
            merchant_id: "M1".to_string(),
            card_network: "VISA".to_string(),
            raw_source_ref: RawSourceRef {
                artifact_id: Uuid::nil(),
                object_key: "raw/a.csv".to_string(),
                source_type: SourceType::CsvRow,
                sheet_name: None,
                source_row_number: Some(1),
                page_number: None,
                element_id: None,
                raw_fields_used: vec![],
            },
            confidence_score: 0.9,
            extensions: BTreeMap::new(),
        }
    }

    fn result(facts: Vec<TransactionFact>) -> NormalizationResult {
        NormalizationResult {
            artifact_id: Uuid::nil(),
            report: ReportFact {
                report_id: Uuid::new_v4(),
                report_type: "csv_report".to_string(),
                ingestion_time: Utc::now(),
                source_network: "VISA".to_string(),
                record_count: facts.len() as i64,
                schema_version: payscope_common::types::SCHEMA_VERSION.to_string(),
            },
            transactions: facts,
            mapping: None,
            errors: vec![],
        }
    }

    #[test]
    fn test_canonical_text_is_deterministic() {
        let f = fact("T1", LifecycleStage::Auth);
        assert_eq!(canonical_text(&f), canonical_text(&f));
        assert!(canonical_text(&f).starts_with("transaction T1 amount 100 USD"));
    }

    #[test]
    fn test_vector_id_separates_stages_and_tenants() {
        let auth = fact("T1", LifecycleStage::Auth);
        let settled = fact("T1", LifecycleStage::Settlement);
        assert_eq!(vector_id("bank-a", &auth), "bank-a:T1:AUTH");
        assert_ne!(vector_id("bank-a", &auth), vector_id("bank-a", &settled));
        assert_ne!(vector_id("bank-a", &auth), vector_id("bank-b", &auth));
    }

    #[tokio::test]
    async fn test_persist_embeddings_writes_one_point_per_fact() {
        let store = InMemoryVectorStore::default();
        let batch = result(vec![
            fact("T1", LifecycleStage::Auth),
            fact("T2", LifecycleStage::Clearing),
        ]);

        persist_embeddings(&FakeEmbedder, &store, "bank-a", &batch)
            .await
            .unwrap();

        let points = store.points.lock().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].metadata["lifecycle_stage"], "AUTH");
        assert_eq!(points[0].metadata["bank_id"], "bank-a");
    }

    #[tokio::test]
    async fn test_replay_overwrites_instead_of_duplicating() {
        let store = InMemoryVectorStore::default();
        let batch = result(vec![fact("T1", LifecycleStage::Auth)]);

        persist_embeddings(&FakeEmbedder, &store, "bank-a", &batch)
            .await
            .unwrap();
        persist_embeddings(&FakeEmbedder, &store, "bank-a", &batch)
            .await
            .unwrap();

        assert_eq!(store.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = InMemoryVectorStore::default();
        persist_embeddings(&FakeEmbedder, &store, "bank-a", &result(vec![]))
            .await
            .unwrap();
        assert!(store.points.lock().unwrap().is_empty());
    }
}
