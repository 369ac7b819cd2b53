//! Normalization engine
//!
//! Turns an extracted document (tabular or PDF elements) into canonical
//! transaction facts plus a report record. All schema inference goes
//! through the mapping oracle; this module owns validation, confidence
//! gating, provenance, and deduplication.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use payscope_common::types::FileFormat;

use crate::oracles::{ExtractedDocument, MappingOracle};

pub mod iso4217;
pub mod pdf;
pub mod schema;
pub mod tabular;
pub mod validate;

pub use schema::{NormalizationResult, RawSourceRef, ReportFact, TransactionFact};

/// Per-artifact context threaded through normalization
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub bank_id: String,
    pub artifact_id: Uuid,
    pub report_id: Uuid,
    pub report_type: String,
    /// Document-level card network default; row values override it
    pub source_network: String,
    pub object_key: String,
    pub file_format: FileFormat,
    pub ingestion_time: DateTime<Utc>,
}

/// Normalize one extracted document, dispatching on its structure.
pub async fn normalize(
    ctx: &NormalizeContext,
    document: &ExtractedDocument,
    oracle: &dyn MappingOracle,
    threshold: f64,
) -> NormalizationResult {
    match document {
        ExtractedDocument::Tabular(doc) => {
            tabular::normalize_tabular(ctx, &doc.tables, oracle, threshold).await
        }
        ExtractedDocument::PdfElements(doc) => {
            pdf::normalize_pdf(ctx, doc, oracle, threshold).await
        }
    }
}
