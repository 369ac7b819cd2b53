//! Shared domain enums for the PayScope pipeline
//!
//! These are stored as text in Postgres and as properties/metadata in the
//! graph and vector stores, so every variant has a stable wire string.

use serde::{Deserialize, Serialize};

/// Version stamped on every ReportFact/TransactionFact and used in all
/// upsert keys. Bump when the canonical schema changes shape.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Detected format of an uploaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Pdf,
    Csv,
    Xlsx,
}

impl FileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Pdf => "PDF",
            FileFormat::Csv => "CSV",
            FileFormat::Xlsx => "XLSX",
        }
    }

    /// Extension used in the canonical object key `raw/{checksum}.{ext}`
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Pdf => "pdf",
            FileFormat::Csv => "csv",
            FileFormat::Xlsx => "xlsx",
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PDF" => Ok(FileFormat::Pdf),
            "CSV" => Ok(FileFormat::Csv),
            "XLSX" => Ok(FileFormat::Xlsx),
            _ => Err(anyhow::anyhow!("Invalid file format: {}", s)),
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PDF sub-classification decided at upload time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PdfKind {
    /// Text layer present; extractable without OCR
    Digital,
    /// No usable text layer; OCR required downstream
    Scanned,
    /// Text extraction itself failed
    Unknown,
}

impl PdfKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PdfKind::Digital => "DIGITAL",
            PdfKind::Scanned => "SCANNED",
            PdfKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::str::FromStr for PdfKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DIGITAL" => Ok(PdfKind::Digital),
            "SCANNED" => Ok(PdfKind::Scanned),
            "UNKNOWN" => Ok(PdfKind::Unknown),
            _ => Err(anyhow::anyhow!("Invalid pdf kind: {}", s)),
        }
    }
}

impl std::fmt::Display for PdfKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse job status machine: QUEUED -> STARTED -> {SUCCESS | FAILED}.
///
/// Transitions are monotonic; a job never returns to QUEUED once started
/// and SUCCESS is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Started,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "STARTED" => Ok(JobStatus::Started),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a transaction record in the payment processing flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStage {
    Auth,
    Clearing,
    Settlement,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Auth => "AUTH",
            LifecycleStage::Clearing => "CLEARING",
            LifecycleStage::Settlement => "SETTLEMENT",
        }
    }

    /// Canonical ordering AUTH <= CLEARING <= SETTLEMENT
    pub const CANONICAL_ORDER: [LifecycleStage; 3] = [
        LifecycleStage::Auth,
        LifecycleStage::Clearing,
        LifecycleStage::Settlement,
    ];

    /// Graph edge label for this stage
    pub fn relation(self) -> &'static str {
        match self {
            LifecycleStage::Auth => "AUTHORIZED",
            LifecycleStage::Clearing => "CLEARED",
            LifecycleStage::Settlement => "SETTLED",
        }
    }
}

impl std::str::FromStr for LifecycleStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTH" => Ok(LifecycleStage::Auth),
            "CLEARING" => Ok(LifecycleStage::Clearing),
            "SETTLEMENT" => Ok(LifecycleStage::Settlement),
            _ => Err(anyhow::anyhow!("Invalid lifecycle stage: {}", s)),
        }
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_file_format_round_trip() {
        for fmt in [FileFormat::Pdf, FileFormat::Csv, FileFormat::Xlsx] {
            assert_eq!(FileFormat::from_str(fmt.as_str()).unwrap(), fmt);
        }
        assert!(FileFormat::from_str("DOCX").is_err());
    }

    #[test]
    fn test_lifecycle_canonical_order() {
        assert!(LifecycleStage::Auth < LifecycleStage::Clearing);
        assert!(LifecycleStage::Clearing < LifecycleStage::Settlement);
    }

    #[test]
    fn test_job_status_parse() {
        assert_eq!(JobStatus::from_str("queued").unwrap(), JobStatus::Queued);
        assert_eq!(JobStatus::from_str("SUCCESS").unwrap(), JobStatus::Success);
        assert!(JobStatus::from_str("RUNNING").is_err());
    }

    #[test]
    fn test_stage_relations() {
        assert_eq!(LifecycleStage::Auth.relation(), "AUTHORIZED");
        assert_eq!(LifecycleStage::Settlement.relation(), "SETTLED");
    }
}
