//! Upload endpoint
//!
//! `POST /upload` accepts multipart files. Each file is streamed to a
//! temp file while its checksum accumulates, so large reports never sit
//! fully in memory. Per-file failures are reported per file; one bad
//! report does not fail its batch-mates.

use axum::extract::{multipart::Field, Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{info, warn};

use payscope_common::checksum::Sha256Stream;

use crate::api::AppState;
use crate::error::{AppError, AppResult};

use super::commands::upload::{handle, RegisterUploadCommand, RegisterUploadResponse};

/// Bytes kept aside for magic-number format detection
const DETECTION_HEAD_BYTES: usize = 8192;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadBatchResponse {
    pub uploads: Vec<RegisterUploadResponse>,
    pub errors: Vec<UploadFileError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFileError {
    pub filename: String,
    pub error: String,
}

pub async fn upload_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<UploadBatchResponse>> {
    let bank_id = headers
        .get("x-bank-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing_bank_id".to_string()))?
        .to_string();

    let uploader = headers
        .get("x-uploader")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string();

    let mut uploads = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(|f| f.to_string()) else {
            continue;
        };
        let content_type = field.content_type().map(|ct| ct.to_string());

        let staged = match stream_to_temp(field).await {
            Ok(staged) => staged,
            Err(e) => {
                errors.push(UploadFileError {
                    filename,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let command = RegisterUploadCommand {
            bank_id: bank_id.clone(),
            uploader: uploader.clone(),
            filename: filename.clone(),
            content_type,
            temp_path: staged.file.path().to_path_buf(),
            head: staged.head,
            checksum_sha256: staged.checksum,
            size_bytes: staged.size,
        };

        match handle(&state.db, &state.storage, &state.queue, command).await {
            Ok(response) => uploads.push(response),
            Err(e) => {
                warn!(filename, error = %e, "Upload registration failed");
                errors.push(UploadFileError {
                    filename,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        bank_id,
        accepted = uploads.len(),
        failed = errors.len(),
        "Upload batch processed"
    );

    if uploads.is_empty() && !errors.is_empty() {
        let detail = errors
            .iter()
            .map(|e| format!("{}: {}", e.filename, e.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AppError::BadRequest(format!("all files failed: {detail}")));
    }

    Ok(Json(UploadBatchResponse { uploads, errors }))
}

struct StagedUpload {
    file: tempfile::NamedTempFile,
    head: Vec<u8>,
    checksum: String,
    size: u64,
}

/// Drain one multipart field to disk, hashing as bytes arrive.
async fn stream_to_temp(mut field: Field<'_>) -> AppResult<StagedUpload> {
    let mut file = tempfile::NamedTempFile::new()?;
    let mut hasher = Sha256Stream::new();
    let mut head: Vec<u8> = Vec::with_capacity(DETECTION_HEAD_BYTES);
    let mut size: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("upload stream interrupted: {e}")))?
    {
        hasher.update(&chunk);
        size += chunk.len() as u64;
        if head.len() < DETECTION_HEAD_BYTES {
            let take = (DETECTION_HEAD_BYTES - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        file.write_all(&chunk)?;
    }
    file.flush()?;

    Ok(StagedUpload {
        file,
        head,
        checksum: hasher.finish(),
        size,
    })
}
