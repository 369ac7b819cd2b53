//! External model contracts
//!
//! Field extraction, column mapping, and embeddings are pluggable backends
//! behind narrow typed traits. The pipeline only ever sees these types;
//! whatever model (or heuristic) sits behind an HTTP endpoint is invisible
//! to the core. Test fakes implement the same traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use payscope_common::types::{FileFormat, LifecycleStage, PdfKind};

pub mod http;

/// Errors from oracle backends
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle endpoint not configured: {0}")]
    NotConfigured(&'static str),

    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned an invalid response: {0}")]
    Contract(String),
}

// ============================================================================
// Field extraction
// ============================================================================

/// Input to the field-extraction oracle: raw artifact bytes plus the
/// classification decided at upload time.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub artifact_id: Uuid,
    pub object_key: String,
    pub file_format: FileFormat,
    pub pdf_kind: Option<PdfKind>,
    pub bytes: Vec<u8>,
}

/// Extracted document structure. A tagged union, never duck-typed: the
/// normalization engine dispatches on the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractedDocument {
    Tabular(TabularDocument),
    PdfElements(PdfDocument),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularDocument {
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub sheet_name: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRow {
    /// 1-based line/row number in the source file
    pub source_row_number: i64,
    /// Values keyed by normalized column name. BTreeMap keeps iteration
    /// deterministic across replays.
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfDocument {
    pub elements: Vec<PdfElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfElement {
    pub element_id: String,
    pub page_number: u32,
    pub text: String,
    pub bounding_box: Option<BoundingBox>,
    pub predictions: Vec<FieldPrediction>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn y_center(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// Per-element field prediction from the layout tagger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPrediction {
    pub field_type: String,
    pub confidence: f64,
}

#[async_trait]
pub trait FieldExtractionOracle: Send + Sync {
    async fn extract(&self, input: &ExtractionInput) -> Result<ExtractedDocument, OracleError>;
}

// ============================================================================
// Column mapping / lifecycle classification
// ============================================================================

/// Per-column evidence shipped to the mapping oracle: a handful of sample
/// values plus a cheap type hint. No raw column name assumptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSample {
    pub raw_field: String,
    pub sample_values: Vec<String>,
    pub inferred_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRequest {
    pub artifact_id: Uuid,
    pub report_context: Vec<String>,
    pub columns: Vec<ColumnSample>,
    pub required_canonical_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDecision {
    pub raw_field: String,
    pub canonical_field: String,
    pub confidence_score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleInference {
    pub lifecycle_stage: LifecycleStage,
    pub confidence_score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResponse {
    pub lifecycle: LifecycleInference,
    pub mappings: Vec<MappingDecision>,
}

#[async_trait]
pub trait MappingOracle: Send + Sync {
    async fn infer_mapping(&self, request: &MappingRequest) -> Result<MappingResponse, OracleError>;
}

// ============================================================================
// Embeddings
// ============================================================================

#[async_trait]
pub trait EmbeddingOracle: Send + Sync {
    /// Embed a batch of texts into fixed-dimension vectors, one per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError>;
}
