//! Relational row types
//!
//! Status/format enums are stored as text; the typed accessors parse them
//! on the way out so callers never match on raw strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use payscope_common::types::{FileFormat, JobStatus, PdfKind};

/// A unique raw upload, identified by content checksum.
///
/// Immutable once created; exactly one row per checksum.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artifact {
    pub artifact_id: Uuid,
    pub checksum_sha256: String,
    pub file_format: String,
    pub pdf_kind: Option<String>,
    pub object_key: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn file_format(&self) -> anyhow::Result<FileFormat> {
        FileFormat::from_str(&self.file_format)
    }

    pub fn pdf_kind(&self) -> Option<PdfKind> {
        self.pdf_kind
            .as_deref()
            .and_then(|k| PdfKind::from_str(k).ok())
    }
}

/// Parse work for one artifact (1:1). Mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParseJob {
    pub job_id: Uuid,
    pub artifact_id: Uuid,
    pub status: String,
    pub task_ref: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ParseJob {
    pub fn status(&self) -> anyhow::Result<JobStatus> {
        JobStatus::from_str(&self.status)
    }
}

/// One row per upload call, even when bytes are identical to a prior
/// upload. Many ReportUploads can reference one Artifact.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportUpload {
    pub report_id: Uuid,
    pub artifact_id: Uuid,
    pub bank_id: String,
    pub filename: String,
    pub uploader: String,
    pub checksum_sha256: String,
    pub upload_time: DateTime<Utc>,
}

/// Terminal record of an unrecoverable parse failure. Retains the full
/// enqueue payload for manual replay.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DlqEvent {
    pub id: Uuid,
    pub task_name: String,
    pub task_id: String,
    pub artifact_id: Option<Uuid>,
    pub error: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_typed_accessors() {
        let artifact = Artifact {
            artifact_id: Uuid::new_v4(),
            checksum_sha256: "00".repeat(32),
            file_format: "PDF".to_string(),
            pdf_kind: Some("DIGITAL".to_string()),
            object_key: "raw/0000.pdf".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(artifact.file_format().unwrap(), FileFormat::Pdf);
        assert_eq!(artifact.pdf_kind(), Some(PdfKind::Digital));
    }

    #[test]
    fn test_parse_job_status_accessor() {
        let job = ParseJob {
            job_id: Uuid::new_v4(),
            artifact_id: Uuid::new_v4(),
            status: "QUEUED".to_string(),
            task_ref: None,
            error: None,
            updated_at: Utc::now(),
        };
        assert_eq!(job.status().unwrap(), JobStatus::Queued);
    }
}
