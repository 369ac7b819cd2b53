//! HTTP-backed oracle clients
//!
//! Each oracle is a plain JSON-over-HTTP service. The clients keep zero
//! state beyond a reqwest client and a base URL, so the worker can clone
//! them freely across tasks.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    EmbeddingOracle, ExtractedDocument, ExtractionInput, FieldExtractionOracle, MappingOracle,
    MappingRequest, MappingResponse, OracleError,
};

fn build_client(timeout_secs: u64) -> Result<Client, OracleError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(OracleError::Http)
}

/// Field-extraction service client. Ships raw artifact bytes and the
/// upload-time classification; receives the structured document back.
#[derive(Clone)]
pub struct HttpExtractionOracle {
    client: Client,
    base_url: String,
}

impl HttpExtractionOracle {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, OracleError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl FieldExtractionOracle for HttpExtractionOracle {
    #[instrument(skip(self, input), fields(artifact_id = %input.artifact_id))]
    async fn extract(&self, input: &ExtractionInput) -> Result<ExtractedDocument, OracleError> {
        debug!(
            object_key = %input.object_key,
            bytes = input.bytes.len(),
            "Requesting field extraction"
        );

        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .query(&[
                ("artifact_id", input.artifact_id.to_string()),
                ("object_key", input.object_key.clone()),
                ("file_format", input.file_format.to_string()),
                (
                    "pdf_kind",
                    input
                        .pdf_kind
                        .map(|k| k.to_string())
                        .unwrap_or_default(),
                ),
            ])
            .header("content-type", "application/octet-stream")
            .body(input.bytes.clone())
            .send()
            .await?
            .error_for_status()?;

        response
            .json::<ExtractedDocument>()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))
    }
}

/// Column-mapping / lifecycle-classification service client
#[derive(Clone)]
pub struct HttpMappingOracle {
    client: Client,
    base_url: String,
}

impl HttpMappingOracle {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, OracleError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl MappingOracle for HttpMappingOracle {
    #[instrument(skip(self, request), fields(artifact_id = %request.artifact_id))]
    async fn infer_mapping(&self, request: &MappingRequest) -> Result<MappingResponse, OracleError> {
        debug!(columns = request.columns.len(), "Requesting column mapping");

        let response = self
            .client
            .post(format!("{}/map", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let mapping = response
            .json::<MappingResponse>()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))?;

        for decision in &mapping.mappings {
            if !(0.0..=1.0).contains(&decision.confidence_score) {
                return Err(OracleError::Contract(format!(
                    "confidence out of range for field '{}': {}",
                    decision.raw_field, decision.confidence_score
                )));
            }
        }

        Ok(mapping)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

/// Embedding service client
#[derive(Clone)]
pub struct HttpEmbeddingOracle {
    client: Client,
    base_url: String,
}

impl HttpEmbeddingOracle {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, OracleError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl EmbeddingOracle for HttpEmbeddingOracle {
    #[instrument(skip_all, fields(batch = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError> {
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { texts })
            .send()
            .await?
            .error_for_status()?;

        let body = response
            .json::<EmbedResponse>()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))?;

        if body.vectors.len() != texts.len() {
            return Err(OracleError::Contract(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                body.vectors.len()
            )));
        }

        Ok(body.vectors)
    }
}
