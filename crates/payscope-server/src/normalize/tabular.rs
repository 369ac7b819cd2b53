//! Tabular normalization (CSV / XLSX)
//!
//! Column headers are never trusted. A sample of values per column goes
//! to the mapping oracle, which returns canonical-field decisions with
//! confidence scores. Low-confidence decisions are discarded, and a
//! table whose lifecycle classification or required fields fall below
//! the threshold is rejected whole rather than persisted as a guess.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use payscope_common::types::FileFormat;

use crate::oracles::{
    ColumnSample, MappingDecision, MappingOracle, MappingRequest, MappingResponse, Table,
};

use super::schema::{
    NormalizationResult, RawSourceRef, ReportFact, SourceType, TransactionFact,
    ValidationErrorItem,
};
use super::validate::{
    clamp01, dedupe_transactions, parse_amount, parse_timestamp_utc, validate_currency,
    RowLocator,
};
use super::NormalizeContext;

/// Rows scanned per column when gathering mapping evidence
const SAMPLE_SCAN_LIMIT: usize = 25;

/// Longest sample value shipped to the oracle
const SAMPLE_VALUE_MAX_CHARS: usize = 80;

/// Samples actually sent per column
const SAMPLES_PER_COLUMN: usize = 8;

/// Fields the mapping must cover for a table to be accepted at all
pub const REQUIRED_CANONICAL_FIELDS: [&str; 4] =
    ["transaction_id", "amount", "currency", "timestamp"];

/// Additional fields every tabular row must carry a value for. Their
/// mapping may legitimately be absent for a table, but then every row
/// fails with a `*_missing` error rather than persisting a guess.
pub const ROW_REQUIRED_FIELDS: [&str; 2] = ["merchant_id", "card_network"];

/// Build per-column evidence for the mapping oracle.
pub fn build_column_samples(table: &Table) -> Vec<ColumnSample> {
    table
        .columns
        .iter()
        .map(|column| {
            let mut samples = Vec::new();
            for row in table.rows.iter().take(SAMPLE_SCAN_LIMIT) {
                if samples.len() >= SAMPLES_PER_COLUMN {
                    break;
                }
                if let Some(value) = row.values.get(column) {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() && trimmed.chars().count() <= SAMPLE_VALUE_MAX_CHARS {
                        samples.push(trimmed.to_string());
                    }
                }
            }
            let inferred_type = infer_value_type(&samples);
            ColumnSample {
                raw_field: column.clone(),
                sample_values: samples,
                inferred_type: inferred_type.to_string(),
            }
        })
        .collect()
}

/// Cheap structural type hint for a column's sampled values
fn infer_value_type(samples: &[String]) -> &'static str {
    if samples.is_empty() {
        return "unknown";
    }
    if samples
        .iter()
        .all(|s| s.replace(['$', ',', '(', ')'], "").trim().parse::<f64>().is_ok())
    {
        return "numeric";
    }
    if samples.iter().all(|s| {
        s.chars().any(|c| c.is_ascii_digit()) && s.chars().any(|c| matches!(c, '-' | '/' | ':'))
    }) {
        return "datetime_or_id";
    }
    "text"
}

/// Why a table was rejected instead of normalized
#[derive(Debug)]
pub enum GateRejection {
    LifecycleBelowThreshold { confidence: f64 },
    MissingRequiredField { canonical_field: &'static str },
}

impl GateRejection {
    fn message(&self, threshold: f64) -> String {
        match self {
            GateRejection::LifecycleBelowThreshold { confidence } => format!(
                "lifecycle classification confidence {confidence:.2} below threshold {threshold:.2}"
            ),
            GateRejection::MissingRequiredField { canonical_field } => format!(
                "no mapping for required field '{canonical_field}' at or above threshold {threshold:.2}"
            ),
        }
    }
}

/// Discard low-confidence decisions and reject the table when the
/// lifecycle call or any required field does not survive the threshold.
pub fn apply_confidence_gate(
    mut response: MappingResponse,
    threshold: f64,
) -> Result<MappingResponse, GateRejection> {
    if response.lifecycle.confidence_score < threshold {
        return Err(GateRejection::LifecycleBelowThreshold {
            confidence: response.lifecycle.confidence_score,
        });
    }

    response
        .mappings
        .retain(|decision| decision.confidence_score >= threshold);

    for required in REQUIRED_CANONICAL_FIELDS {
        if !response
            .mappings
            .iter()
            .any(|d| d.canonical_field == required)
        {
            return Err(GateRejection::MissingRequiredField {
                canonical_field: required,
            });
        }
    }

    Ok(response)
}

/// Highest-confidence surviving decision per canonical field
fn decisions_by_canonical(response: &MappingResponse) -> BTreeMap<String, &MappingDecision> {
    let mut chosen: BTreeMap<String, &MappingDecision> = BTreeMap::new();
    for decision in &response.mappings {
        match chosen.get(&decision.canonical_field) {
            Some(current) if current.confidence_score >= decision.confidence_score => {}
            _ => {
                chosen.insert(decision.canonical_field.clone(), decision);
            }
        }
    }
    chosen
}

/// Normalize a tabular document into transaction facts.
pub async fn normalize_tabular(
    ctx: &NormalizeContext,
    tables: &[Table],
    oracle: &dyn MappingOracle,
    threshold: f64,
) -> NormalizationResult {
    let source_type = match ctx.file_format {
        FileFormat::Xlsx => SourceType::XlsxRow,
        _ => SourceType::CsvRow,
    };

    let mut transactions = Vec::new();
    let mut errors = Vec::new();
    let mut kept_mapping: Option<MappingResponse> = None;

    for table in tables {
        let request = MappingRequest {
            artifact_id: ctx.artifact_id,
            report_context: vec![ctx.report_type.clone(), ctx.source_network.clone()],
            columns: build_column_samples(table),
            required_canonical_fields: REQUIRED_CANONICAL_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        };

        let response = match oracle.infer_mapping(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(artifact_id = %ctx.artifact_id, error = %e, "Mapping oracle call failed");
                errors.push(ValidationErrorItem {
                    code: "mapping_failed".to_string(),
                    message: e.to_string(),
                    field: None,
                    raw_value: None,
                    sheet_name: table.sheet_name.clone(),
                    source_row_number: None,
                    page_number: None,
                });
                continue;
            }
        };

        let gated = match apply_confidence_gate(response, threshold) {
            Ok(g) => g,
            Err(rejection) => {
                info!(
                    artifact_id = %ctx.artifact_id,
                    sheet = table.sheet_name.as_deref().unwrap_or(""),
                    "Mapping rejected: {}",
                    rejection.message(threshold)
                );
                errors.push(ValidationErrorItem {
                    code: "mapping_rejected".to_string(),
                    message: rejection.message(threshold),
                    field: None,
                    raw_value: None,
                    sheet_name: table.sheet_name.clone(),
                    source_row_number: None,
                    page_number: None,
                });
                continue;
            }
        };

        normalize_table_rows(ctx, table, &gated, source_type.clone(), &mut transactions, &mut errors);

        if kept_mapping.is_none() {
            kept_mapping = Some(gated);
        }
    }

    let transactions = dedupe_transactions(transactions);

    debug!(
        artifact_id = %ctx.artifact_id,
        transactions = transactions.len(),
        errors = errors.len(),
        "Tabular normalization complete"
    );

    NormalizationResult {
        artifact_id: ctx.artifact_id,
        report: ReportFact {
            report_id: ctx.report_id,
            report_type: ctx.report_type.clone(),
            ingestion_time: ctx.ingestion_time,
            source_network: ctx.source_network.clone(),
            record_count: transactions.len() as i64,
            schema_version: payscope_common::types::SCHEMA_VERSION.to_string(),
        },
        transactions,
        mapping: kept_mapping,
        errors,
    }
}

fn normalize_table_rows(
    ctx: &NormalizeContext,
    table: &Table,
    mapping: &MappingResponse,
    source_type: SourceType,
    transactions: &mut Vec<TransactionFact>,
    errors: &mut Vec<ValidationErrorItem>,
) {
    let chosen = decisions_by_canonical(mapping);
    let mapped_raw_fields: Vec<&str> = chosen.values().map(|d| d.raw_field.as_str()).collect();

    for row in &table.rows {
        let locator = RowLocator {
            sheet_name: table.sheet_name.clone(),
            source_row_number: Some(row.source_row_number),
            page_number: None,
        };

        let raw_value = |canonical: &str| -> Option<(String, &MappingDecision)> {
            chosen.get(canonical).and_then(|decision| {
                row.values
                    .get(&decision.raw_field)
                    .map(|v| (v.trim().to_string(), *decision))
            })
        };

        let mapped_field = |canonical: &str| chosen.get(canonical).map(|d| d.raw_field.as_str());

        let Some((transaction_id, id_decision)) = raw_value("transaction_id") else {
            errors.push(locator.missing("transaction_id", mapped_field("transaction_id")));
            continue;
        };
        if transaction_id.is_empty() {
            errors.push(locator.missing("transaction_id", Some(id_decision.raw_field.as_str())));
            continue;
        }

        let mut used_decisions = vec![id_decision];

        let amount = match raw_value("amount") {
            Some((raw, decision)) => match parse_amount(&raw, &decision.raw_field, &locator) {
                Ok(a) => {
                    used_decisions.push(decision);
                    a
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            },
            None => {
                errors.push(locator.missing("amount", mapped_field("amount")));
                continue;
            }
        };

        let currency = match raw_value("currency") {
            Some((raw, decision)) => match validate_currency(&raw, &decision.raw_field, &locator) {
                Ok(c) => {
                    used_decisions.push(decision);
                    c
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            },
            None => {
                errors.push(locator.missing("currency", mapped_field("currency")));
                continue;
            }
        };

        let timestamp_utc = match raw_value("timestamp") {
            Some((raw, decision)) => {
                match parse_timestamp_utc(&raw, &decision.raw_field, &locator) {
                    Ok(ts) => {
                        used_decisions.push(decision);
                        ts
                    }
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                }
            }
            None => {
                errors.push(locator.missing("timestamp", mapped_field("timestamp")));
                continue;
            }
        };

        // Tabular reports name their merchant and network explicitly;
        // only the PDF path gets document-level fallbacks.
        let merchant_id = match raw_value("merchant_id") {
            Some((v, decision)) if !v.is_empty() => {
                used_decisions.push(decision);
                v
            }
            _ => {
                errors.push(locator.missing("merchant_id", mapped_field("merchant_id")));
                continue;
            }
        };

        let card_network = match raw_value("card_network") {
            Some((v, decision)) if !v.is_empty() => {
                used_decisions.push(decision);
                v.to_uppercase()
            }
            _ => {
                errors.push(locator.missing("card_network", mapped_field("card_network")));
                continue;
            }
        };

        let mut extensions = BTreeMap::new();
        if let Some((status, decision)) = raw_value("status") {
            if !status.is_empty() {
                used_decisions.push(decision);
                extensions.insert("status".to_string(), serde_json::Value::String(status));
            }
        }
        // Unmapped columns survive as extensions instead of being dropped
        for (field, value) in &row.values {
            let trimmed = value.trim();
            if !trimmed.is_empty() && !mapped_raw_fields.contains(&field.as_str()) {
                extensions.insert(
                    field.clone(),
                    serde_json::Value::String(trimmed.to_string()),
                );
            }
        }

        let confidence_score = clamp01(
            used_decisions
                .iter()
                .map(|d| d.confidence_score)
                .sum::<f64>()
                / used_decisions.len() as f64,
        );

        let mut raw_fields_used: Vec<String> = used_decisions
            .iter()
            .map(|d| d.raw_field.clone())
            .collect();
        raw_fields_used.sort();
        raw_fields_used.dedup();

        transactions.push(TransactionFact {
            transaction_id,
            amount,
            currency,
            timestamp_utc,
            lifecycle_stage: mapping.lifecycle.lifecycle_stage,
            merchant_id,
            card_network,
            raw_source_ref: RawSourceRef {
                artifact_id: ctx.artifact_id,
                object_key: ctx.object_key.clone(),
                source_type: source_type.clone(),
                sheet_name: table.sheet_name.clone(),
                source_row_number: Some(row.source_row_number),
                page_number: None,
                element_id: None,
                raw_fields_used,
            },
            confidence_score,
            extensions,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracles::{LifecycleInference, OracleError, TableRow};
    use async_trait::async_trait;
    use chrono::Utc;
    use payscope_common::types::LifecycleStage;
    use std::str::FromStr;
    use uuid::Uuid;

    struct FakeMapper {
        response: MappingResponse,
    }

    #[async_trait]
    impl MappingOracle for FakeMapper {
        async fn infer_mapping(
            &self,
            _request: &MappingRequest,
        ) -> Result<MappingResponse, OracleError> {
            Ok(self.response.clone())
        }
    }

    fn decision(raw: &str, canonical: &str, confidence: f64) -> MappingDecision {
        MappingDecision {
            raw_field: raw.to_string(),
            canonical_field: canonical.to_string(),
            confidence_score: confidence,
            rationale: "test".to_string(),
        }
    }

    fn full_mapping(confidence: f64) -> MappingResponse {
        MappingResponse {
            lifecycle: LifecycleInference {
                lifecycle_stage: LifecycleStage::Auth,
                confidence_score: confidence,
                rationale: "test".to_string(),
            },
            mappings: vec![
                decision("ref_no", "transaction_id", confidence),
                decision("amt", "amount", confidence),
                decision("ccy", "currency", confidence),
                decision("posted", "timestamp", confidence),
                decision("merch", "merchant_id", confidence),
                decision("net", "card_network", confidence),
            ],
        }
    }

    fn row(n: i64, values: &[(&str, &str)]) -> TableRow {
        TableRow {
            source_row_number: n,
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn table(rows: Vec<TableRow>) -> Table {
        Table {
            sheet_name: None,
            columns: vec![
                "ref_no".to_string(),
                "amt".to_string(),
                "ccy".to_string(),
                "posted".to_string(),
                "merch".to_string(),
                "net".to_string(),
            ],
            rows,
        }
    }

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            bank_id: "bank-a".to_string(),
            artifact_id: Uuid::new_v4(),
            report_id: Uuid::new_v4(),
            report_type: "csv_report".to_string(),
            source_network: "VISA".to_string(),
            object_key: "raw/abc.csv".to_string(),
            file_format: FileFormat::Csv,
            ingestion_time: Utc::now(),
        }
    }

    #[test]
    fn test_column_samples_respect_limits() {
        let mut rows = Vec::new();
        for i in 0..40 {
            rows.push(row(i, &[("ref_no", &format!("T{i}")), ("amt", "1.00")]));
        }
        let t = Table {
            sheet_name: None,
            columns: vec!["ref_no".to_string(), "amt".to_string(), "empty".to_string()],
            rows,
        };
        let samples = build_column_samples(&t);
        assert_eq!(samples[0].sample_values.len(), SAMPLES_PER_COLUMN);
        assert_eq!(samples[1].inferred_type, "numeric");
        assert_eq!(samples[2].inferred_type, "unknown");
    }

    #[test]
    fn test_long_values_excluded_from_samples() {
        let long = "x".repeat(200);
        let t = Table {
            sheet_name: None,
            columns: vec!["memo".to_string()],
            rows: vec![row(1, &[("memo", long.as_str())]), row(2, &[("memo", "ok")])],
        };
        let samples = build_column_samples(&t);
        assert_eq!(samples[0].sample_values, vec!["ok".to_string()]);
    }

    #[test]
    fn test_gate_rejects_low_lifecycle_confidence() {
        let rejection = apply_confidence_gate(full_mapping(0.50), 0.70).unwrap_err();
        assert!(matches!(
            rejection,
            GateRejection::LifecycleBelowThreshold { .. }
        ));
    }

    #[test]
    fn test_gate_rejects_missing_required_field() {
        let mut mapping = full_mapping(0.90);
        mapping.mappings[1].confidence_score = 0.30; // amount falls below threshold
        let rejection = apply_confidence_gate(mapping, 0.70).unwrap_err();
        assert!(matches!(
            rejection,
            GateRejection::MissingRequiredField {
                canonical_field: "amount"
            }
        ));
    }

    #[tokio::test]
    async fn test_normalize_happy_path() {
        let mapper = FakeMapper {
            response: full_mapping(0.95),
        };
        let tables = vec![table(vec![
            row(1, &[("ref_no", "T1"), ("amt", "$1,000.00"), ("ccy", "usd"), ("posted", "2024-03-01 10:00:00"), ("merch", "M-77"), ("net", "visa")]),
            row(2, &[("ref_no", "T2"), ("amt", "(5.00)"), ("ccy", "EUR"), ("posted", "2024-03-01T12:00:00+02:00"), ("merch", "M-78"), ("net", "AMEX")]),
        ])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 2);
        assert!(result.errors.is_empty());
        assert_eq!(result.report.record_count, 2);

        let t1 = &result.transactions[0];
        assert_eq!(t1.transaction_id, "T1");
        assert_eq!(t1.amount, bigdecimal::BigDecimal::from_str("1000.00").unwrap());
        assert_eq!(t1.currency, "USD");
        assert_eq!(t1.lifecycle_stage, LifecycleStage::Auth);
        assert_eq!(t1.card_network, "VISA");
        assert_eq!(t1.merchant_id, "M-77");

        let t2 = &result.transactions[1];
        assert_eq!(t2.amount, bigdecimal::BigDecimal::from_str("-5.00").unwrap());
        assert_eq!(t2.timestamp_utc.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_bad_row_fails_alone() {
        let mapper = FakeMapper {
            response: full_mapping(0.95),
        };
        let tables = vec![table(vec![
            row(1, &[("ref_no", "T1"), ("amt", "not-money"), ("ccy", "USD"), ("posted", "2024-03-01"), ("merch", "M-1"), ("net", "VISA")]),
            row(2, &[("ref_no", "T2"), ("amt", "20.00"), ("ccy", "USD"), ("posted", "2024-03-01"), ("merch", "M-1"), ("net", "VISA")]),
        ])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].transaction_id, "T2");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "amount_invalid");
        assert_eq!(result.errors[0].source_row_number, Some(1));
    }

    #[tokio::test]
    async fn test_rejected_table_yields_no_transactions() {
        let mapper = FakeMapper {
            response: full_mapping(0.40),
        };
        let tables = vec![table(vec![row(
            1,
            &[("ref_no", "T1"), ("amt", "10.00"), ("ccy", "USD"), ("posted", "2024-03-01"), ("merch", "M-1"), ("net", "VISA")],
        )])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert!(result.transactions.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "mapping_rejected");
    }

    #[tokio::test]
    async fn test_unmapped_merchant_fails_every_row() {
        // Mapping covers only the oracle-gated fields; merchant and
        // network values cannot be located, so no row may persist.
        let mut mapping = full_mapping(0.95);
        mapping.mappings.truncate(4);
        let mapper = FakeMapper { response: mapping };
        let tables = vec![table(vec![row(
            1,
            &[("ref_no", "T1"), ("amt", "10.00"), ("ccy", "USD"), ("posted", "2024-03-01")],
        )])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert!(result.transactions.is_empty());
        assert_eq!(result.report.record_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "merchant_id_missing");
        assert_eq!(result.errors[0].source_row_number, Some(1));
    }

    #[tokio::test]
    async fn test_row_without_mapped_amount_cell_is_an_error() {
        let mapper = FakeMapper {
            response: full_mapping(0.95),
        };
        let tables = vec![table(vec![row(
            1,
            &[("ref_no", "T1"), ("ccy", "USD"), ("posted", "2024-03-01"), ("merch", "M-1"), ("net", "VISA")],
        )])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert!(result.transactions.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "amount_missing");
        assert_eq!(result.errors[0].field.as_deref(), Some("amt"));
    }

    #[tokio::test]
    async fn test_empty_network_value_is_a_row_error() {
        let mapper = FakeMapper {
            response: full_mapping(0.95),
        };
        let tables = vec![table(vec![row(
            1,
            &[("ref_no", "T1"), ("amt", "10.00"), ("ccy", "USD"), ("posted", "2024-03-01"), ("merch", "M-1"), ("net", "  ")],
        )])];

        let result = normalize_tabular(&ctx(), &tables, &mapper, 0.70).await;
        assert!(result.transactions.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "card_network_missing");
    }

    #[tokio::test]
    async fn test_unmapped_columns_land_in_extensions() {
        let mapper = FakeMapper {
            response: full_mapping(0.95),
        };
        let mut t = table(vec![row(
            1,
            &[
                ("ref_no", "T1"),
                ("amt", "10.00"),
                ("ccy", "USD"),
                ("posted", "2024-03-01"),
                ("merch", "M-1"),
                ("net", "VISA"),
                ("issuer_batch", "B-77"),
            ],
        )]);
        t.columns.push("issuer_batch".to_string());

        let result = normalize_tabular(&ctx(), &[t], &mapper, 0.70).await;
        assert_eq!(
            result.transactions[0].extensions.get("issuer_batch"),
            Some(&serde_json::Value::String("B-77".to_string()))
        );
    }
}
