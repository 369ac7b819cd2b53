//! Graph persistence
//!
//! Transactions become nodes, report stage events become edges labeled
//! AUTHORIZED / CLEARED / SETTLED, and lifecycle anomaly flags live on
//! the node. Writes go through the `GraphStore` trait; the shipped
//! backend speaks the Neo4j transactional HTTP API.
//!
//! Temporal ordering is enforced at write time: an incoming stage event
//! older than the latest one already recorded for the transaction is a
//! hard error, because it means two reports disagree about history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use payscope_common::types::LifecycleStage;

use crate::normalize::NormalizationResult;
use crate::reconcile::LifecycleAnomalies;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error(
        "Temporal ordering violation for {transaction_pk}: incoming {incoming_stage} event at \
         {incoming} precedes latest recorded stage event at {existing}"
    )]
    TemporalOrderingViolation {
        transaction_pk: String,
        incoming_stage: String,
        incoming: DateTime<Utc>,
        existing: DateTime<Utc>,
    },

    #[error("Graph request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Graph backend returned an error: {0}")]
    Backend(String),
}

/// Node key is `{bank_id}:{transaction_id}` so tenants never collide.
pub fn transaction_pk(bank_id: &str, transaction_id: &str) -> String {
    format!("{bank_id}:{transaction_id}")
}

#[derive(Debug, Clone)]
pub struct TransactionNode {
    pub transaction_pk: String,
    pub bank_id: String,
    pub transaction_id: String,
    pub merchant_id: String,
    pub card_network: String,
}

#[derive(Debug, Clone)]
pub struct StageEdge {
    pub transaction_pk: String,
    pub stage: LifecycleStage,
    pub report_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub event_time: DateTime<Utc>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn merge_transaction(&self, node: &TransactionNode) -> Result<(), GraphError>;

    /// Latest stage event time already recorded for a transaction
    async fn last_stage_event_time(
        &self,
        transaction_pk: &str,
    ) -> Result<Option<DateTime<Utc>>, GraphError>;

    async fn merge_stage_edge(&self, edge: &StageEdge) -> Result<(), GraphError>;

    async fn set_anomaly_flags(
        &self,
        transaction_pk: &str,
        anomalies: &LifecycleAnomalies,
    ) -> Result<(), GraphError>;
}

/// Merge one normalization batch into the graph.
///
/// Edges are applied in event-time order within the batch; each edge is
/// checked against the latest recorded event before it is merged.
#[instrument(skip_all, fields(report_id = %result.report.report_id))]
pub async fn persist_graph(
    store: &dyn GraphStore,
    bank_id: &str,
    result: &NormalizationResult,
    anomalies_by_txn: &BTreeMap<String, LifecycleAnomalies>,
) -> Result<(), GraphError> {
    let mut edges_by_txn: BTreeMap<String, Vec<StageEdge>> = BTreeMap::new();
    let mut nodes: BTreeMap<String, TransactionNode> = BTreeMap::new();

    for fact in &result.transactions {
        let pk = transaction_pk(bank_id, &fact.transaction_id);
        nodes.entry(pk.clone()).or_insert_with(|| TransactionNode {
            transaction_pk: pk.clone(),
            bank_id: bank_id.to_string(),
            transaction_id: fact.transaction_id.clone(),
            merchant_id: fact.merchant_id.clone(),
            card_network: fact.card_network.clone(),
        });
        edges_by_txn.entry(pk.clone()).or_default().push(StageEdge {
            transaction_pk: pk,
            stage: fact.lifecycle_stage,
            report_id: result.report.report_id,
            amount: amount_to_f64(&fact.amount),
            currency: fact.currency.clone(),
            event_time: fact.timestamp_utc,
        });
    }

    for (pk, node) in &nodes {
        store.merge_transaction(node).await?;

        let mut edges = edges_by_txn.remove(pk).unwrap_or_default();
        edges.sort_by_key(|e| e.event_time);

        for edge in &edges {
            if let Some(existing) = store.last_stage_event_time(pk).await? {
                if edge.event_time < existing {
                    return Err(GraphError::TemporalOrderingViolation {
                        transaction_pk: pk.clone(),
                        incoming_stage: edge.stage.relation().to_string(),
                        incoming: edge.event_time,
                        existing,
                    });
                }
            }
            store.merge_stage_edge(edge).await?;
        }

        if let Some(anomalies) = anomalies_by_txn.get(&node.transaction_id) {
            store.set_anomaly_flags(pk, anomalies).await?;
        }
    }

    info!(bank_id, nodes = nodes.len(), "Graph persistence complete");
    Ok(())
}

fn amount_to_f64(amount: &bigdecimal::BigDecimal) -> f64 {
    use bigdecimal::ToPrimitive;
    amount.to_f64().unwrap_or(0.0)
}

/// Neo4j transactional HTTP API backend
#[derive(Clone)]
pub struct Neo4jGraphStore {
    client: Client,
    commit_url: String,
}

impl Neo4jGraphStore {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, GraphError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            commit_url: format!("{}/db/neo4j/tx/commit", base_url.into()),
        })
    }

    async fn run(
        &self,
        statement: String,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, GraphError> {
        debug!(%statement, "Running graph statement");

        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let response: serde_json::Value = self
            .client
            .post(&self.commit_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(GraphError::Backend(errors[0].to_string()));
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn merge_transaction(&self, node: &TransactionNode) -> Result<(), GraphError> {
        self.run(
            "MERGE (t:Transaction {pk: $pk}) \
             SET t.bank_id = $bank_id, t.transaction_id = $transaction_id, \
                 t.merchant_id = $merchant_id, t.card_network = $card_network"
                .to_string(),
            json!({
                "pk": node.transaction_pk,
                "bank_id": node.bank_id,
                "transaction_id": node.transaction_id,
                "merchant_id": node.merchant_id,
                "card_network": node.card_network,
            }),
        )
        .await?;
        Ok(())
    }

    async fn last_stage_event_time(
        &self,
        transaction_pk: &str,
    ) -> Result<Option<DateTime<Utc>>, GraphError> {
        let response = self
            .run(
                "MATCH (:Report)-[e]->(t:Transaction {pk: $pk}) \
                 RETURN max(e.event_time)"
                    .to_string(),
                json!({ "pk": transaction_pk }),
            )
            .await?;

        let cell = response
            .pointer("/results/0/data/0/row/0")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        match cell {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| GraphError::Backend(format!("bad event_time '{s}': {e}"))),
            other => Err(GraphError::Backend(format!(
                "unexpected event_time value: {other}"
            ))),
        }
    }

    async fn merge_stage_edge(&self, edge: &StageEdge) -> Result<(), GraphError> {
        // Relationship types cannot be parameterized; the label comes
        // from a closed enum, never from input data.
        let statement = format!(
            "MATCH (t:Transaction {{pk: $pk}}) \
             MERGE (r:Report {{report_id: $report_id}}) \
             MERGE (r)-[e:{}]->(t) \
             SET e.amount = $amount, e.currency = $currency, e.event_time = $event_time",
            edge.stage.relation()
        );
        self.run(
            statement,
            json!({
                "pk": edge.transaction_pk,
                "report_id": edge.report_id.to_string(),
                "amount": edge.amount,
                "currency": edge.currency,
                "event_time": edge.event_time.to_rfc3339(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_anomaly_flags(
        &self,
        transaction_pk: &str,
        anomalies: &LifecycleAnomalies,
    ) -> Result<(), GraphError> {
        self.run(
            "MATCH (t:Transaction {pk: $pk}) \
             SET t.missing_settlement = $missing_settlement, \
                 t.currency_conflict = $currency_conflict, \
                 t.has_amount_mismatch = $has_amount_mismatch, \
                 t.timestamp_violation = $timestamp_violation, \
                 t.lifecycle_gap_secs = $lifecycle_gap_secs"
                .to_string(),
            json!({
                "pk": transaction_pk,
                "missing_settlement": anomalies.missing_settlement,
                "currency_conflict": anomalies.currency_conflict,
                "has_amount_mismatch": anomalies.has_amount_mismatch,
                "timestamp_violation": anomalies.timestamp_violation,
                "lifecycle_gap_secs": anomalies.lifecycle_gap_secs,
            }),
        )
        .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::InMemoryGraphStore;
    use super::*;
    use crate::normalize::schema::{RawSourceRef, ReportFact, SourceType, TransactionFact};
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    fn fact(id: &str, stage: LifecycleStage, offset: i64) -> TransactionFact {
        TransactionFact {
            transaction_id: id.to_string(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            timestamp_utc: at(offset),
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

    #[tokio::test]
    async fn test_in_order_edges_merge() {
        let store = InMemoryGraphStore::default();
        let batch = result(vec![
            fact("T1", LifecycleStage::Auth, 0),
            fact("T1", LifecycleStage::Settlement, 86400),
        ]);

        persist_graph(&store, "bank-a", &batch, &BTreeMap::new())
            .await
            .unwrap();

        let state = store.state.lock().unwrap();
        let txn = state.get("bank-a:T1").unwrap();
        assert_eq!(txn.edges.len(), 2);
        assert_eq!(txn.node.as_ref().unwrap().card_network, "VISA");
    }

    #[tokio::test]
    async fn test_out_of_order_event_is_hard_error() {
        let store = InMemoryGraphStore::default();

        let first = result(vec![fact("T1", LifecycleStage::Settlement, 86400)]);
        persist_graph(&store, "bank-a", &first, &BTreeMap::new())
            .await
            .unwrap();

        let late = result(vec![fact("T1", LifecycleStage::Auth, 0)]);
        let err = persist_graph(&store, "bank-a", &late, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::TemporalOrderingViolation { .. }
        ));
    }

    #[tokio::test]
    async fn test_anomaly_flags_written() {
        let store = InMemoryGraphStore::default();
        let batch = result(vec![fact("T1", LifecycleStage::Auth, 0)]);

        let mut anomalies = BTreeMap::new();
        anomalies.insert(
            "T1".to_string(),
            LifecycleAnomalies {
                missing_settlement: true,
                ..Default::default()
            },
        );

        persist_graph(&store, "bank-a", &batch, &anomalies)
            .await
            .unwrap();

        let state = store.state.lock().unwrap();
        let flags = state.get("bank-a:T1").unwrap().flags.clone().unwrap();
        assert!(flags.missing_settlement);
    }

    #[tokio::test]
    async fn test_tenants_do_not_collide() {
        let store = InMemoryGraphStore::default();
        let batch = result(vec![fact("T1", LifecycleStage::Auth, 0)]);

        persist_graph(&store, "bank-a", &batch, &BTreeMap::new())
            .await
            .unwrap();
        persist_graph(&store, "bank-b", &batch, &BTreeMap::new())
            .await
            .unwrap();

        let state = store.state.lock().unwrap();
        assert!(state.contains_key("bank-a:T1"));
        assert!(state.contains_key("bank-b:T1"));
    }
}
