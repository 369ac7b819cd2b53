//! Canonical normalized record types
//!
//! Everything downstream of normalization (relational, graph, vector)
//! consumes these types and nothing else. Amounts are exact decimals,
//! timestamps are always UTC, and every transaction carries provenance
//! back to the exact source location it came from.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use payscope_common::types::LifecycleStage;

use crate::oracles::MappingResponse;

/// Where a transaction fact came from inside its artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    CsvRow,
    XlsxRow,
    PdfElement,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::CsvRow => "csv_row",
            SourceType::XlsxRow => "xlsx_row",
            SourceType::PdfElement => "pdf_element",
        }
    }
}

/// Provenance for one normalized transaction. Only the locator fields
/// that apply to the source type are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceRef {
    pub artifact_id: Uuid,
    pub object_key: String,
    pub source_type: SourceType,
    pub sheet_name: Option<String>,
    pub source_row_number: Option<i64>,
    pub page_number: Option<u32>,
    pub element_id: Option<String>,
    /// Raw field names that contributed values to this fact
    pub raw_fields_used: Vec<String>,
}

impl RawSourceRef {
    /// Stable lexical key used to break confidence ties during
    /// deduplication. Identical inputs must always win the same way.
    pub fn tiebreak_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.object_key,
            self.page_number.map(|p| p.to_string()).unwrap_or_default(),
            self.sheet_name.clone().unwrap_or_default(),
            self.source_row_number
                .map(|r| r.to_string())
                .unwrap_or_default(),
            self.element_id.clone().unwrap_or_default(),
        )
    }
}

/// One normalized transaction event at one lifecycle stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFact {
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub timestamp_utc: DateTime<Utc>,
    pub lifecycle_stage: LifecycleStage,
    pub merchant_id: String,
    pub card_network: String,
    pub raw_source_ref: RawSourceRef,
    /// Joint confidence in the mapping decisions behind this fact, in [0, 1]
    pub confidence_score: f64,
    /// Issuer-specific fields that survived normalization without a
    /// canonical home. Never silently dropped.
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// Report-level metadata emitted alongside the transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFact {
    pub report_id: Uuid,
    pub report_type: String,
    pub ingestion_time: DateTime<Utc>,
    pub source_network: String,
    pub record_count: i64,
    pub schema_version: String,
}

/// A row or element that failed validation. Recorded, never fatal to
/// the rest of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorItem {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub raw_value: Option<String>,
    pub sheet_name: Option<String>,
    pub source_row_number: Option<i64>,
    pub page_number: Option<u32>,
}

/// Output of normalizing one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub artifact_id: Uuid,
    pub report: ReportFact,
    pub transactions: Vec<TransactionFact>,
    /// Mapping decisions that produced the facts, kept for audit
    pub mapping: Option<MappingResponse>,
    pub errors: Vec<ValidationErrorItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiebreak_key_is_stable() {
        let source = RawSourceRef {
            artifact_id: Uuid::nil(),
            object_key: "raw/abc.csv".to_string(),
            source_type: SourceType::CsvRow,
            sheet_name: None,
            source_row_number: Some(7),
            page_number: None,
            element_id: None,
            raw_fields_used: vec!["txn".to_string()],
        };
        assert_eq!(source.tiebreak_key(), "raw/abc.csv|||7|");
    }

    #[test]
    fn test_tiebreak_key_distinguishes_pages() {
        let base = RawSourceRef {
            artifact_id: Uuid::nil(),
            object_key: "raw/x.pdf".to_string(),
            source_type: SourceType::PdfElement,
            sheet_name: None,
            source_row_number: None,
            page_number: Some(1),
            element_id: Some("e1".to_string()),
            raw_fields_used: vec![],
        };
        let mut other = base.clone();
        other.page_number = Some(2);
        assert_ne!(base.tiebreak_key(), other.tiebreak_key());
    }
}
