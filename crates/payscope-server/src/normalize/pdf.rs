//! PDF normalization
//!
//! Extracted PDF elements arrive with bounding boxes and per-element
//! field predictions. Elements are clustered into visual rows by
//! vertical position, then the best prediction per field inside each
//! cluster supplies the raw values. Layout is data here, so the bucket
//! size adapts to the document's own median element height.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use payscope_common::types::LifecycleStage;

use crate::oracles::{MappingOracle, MappingRequest, PdfDocument, PdfElement};

use super::schema::{
    NormalizationResult, RawSourceRef, ReportFact, SourceType, TransactionFact,
    ValidationErrorItem,
};
use super::validate::{
    clamp01, dedupe_transactions, parse_amount, parse_timestamp_utc, validate_currency,
    RowLocator,
};
use super::NormalizeContext;

/// Minimum row-bucket height in PDF points
const MIN_ROW_BUCKET: f64 = 10.0;

/// Bucket scale relative to the median element height
const ROW_BUCKET_SCALE: f64 = 1.5;

const PDF_FIELDS: [&str; 5] = ["transaction_id", "amount", "currency", "date", "status"];

/// Group one page's elements into visual rows.
///
/// Bucket height is `max(10pt, 1.5 x median element height)`; elements
/// whose y-centers fall in the same bucket form a row. Elements without
/// a bounding box or predictions cannot participate.
pub fn cluster_page_rows<'a>(elements: &[&'a PdfElement]) -> Vec<Vec<&'a PdfElement>> {
    let mut heights: Vec<f64> = elements
        .iter()
        .filter_map(|e| e.bounding_box.map(|b| b.height()))
        .filter(|h| *h > 0.0)
        .collect();
    if heights.is_empty() {
        return Vec::new();
    }
    heights.sort_by(f64::total_cmp);
    let median = heights[heights.len() / 2];
    let bucket = (ROW_BUCKET_SCALE * median).max(MIN_ROW_BUCKET);

    let mut rows: BTreeMap<i64, Vec<&PdfElement>> = BTreeMap::new();
    for element in elements {
        let Some(bbox) = element.bounding_box else {
            continue;
        };
        let key = (bbox.y_center() / bucket).floor() as i64;
        rows.entry(key).or_default().push(element);
    }
    rows.into_values().collect()
}

/// Best-confidence element for a field within one row cluster
fn best_for_field<'a>(cluster: &[&'a PdfElement], field: &str) -> Option<(&'a PdfElement, f64)> {
    cluster
        .iter()
        .filter_map(|element| {
            element
                .predictions
                .iter()
                .filter(|p| p.field_type == field)
                .map(|p| (*element, p.confidence))
                .max_by(|a, b| a.1.total_cmp(&b.1))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Normalize a PDF's tagged elements into transaction facts.
///
/// Lifecycle stage is classified at document level; when the classifier
/// is unavailable or unsure the document falls back to AUTH and the
/// degradation is recorded as a validation error.
pub async fn normalize_pdf(
    ctx: &NormalizeContext,
    document: &PdfDocument,
    oracle: &dyn MappingOracle,
    threshold: f64,
) -> NormalizationResult {
    let mut errors = Vec::new();

    let lifecycle_request = MappingRequest {
        artifact_id: ctx.artifact_id,
        report_context: vec![ctx.report_type.clone(), ctx.source_network.clone()],
        columns: Vec::new(),
        required_canonical_fields: Vec::new(),
    };
    let (lifecycle_stage, mapping) = match oracle.infer_mapping(&lifecycle_request).await {
        Ok(response) => {
            if response.lifecycle.confidence_score < threshold {
                errors.push(ValidationErrorItem {
                    code: "lifecycle_low_confidence".to_string(),
                    message: format!(
                        "lifecycle confidence {:.2} below threshold {:.2}; defaulting to AUTH",
                        response.lifecycle.confidence_score, threshold
                    ),
                    field: None,
                    raw_value: None,
                    sheet_name: None,
                    source_row_number: None,
                    page_number: None,
                });
                (LifecycleStage::Auth, Some(response))
            } else {
                (response.lifecycle.lifecycle_stage, Some(response))
            }
        }
        Err(e) => {
            warn!(artifact_id = %ctx.artifact_id, error = %e, "Lifecycle inference failed");
            errors.push(ValidationErrorItem {
                code: "lifecycle_inference_failed".to_string(),
                message: e.to_string(),
                field: None,
                raw_value: None,
                sheet_name: None,
                source_row_number: None,
                page_number: None,
            });
            (LifecycleStage::Auth, None)
        }
    };

    let mut by_page: BTreeMap<u32, Vec<&PdfElement>> = BTreeMap::new();
    for element in &document.elements {
        by_page.entry(element.page_number).or_default().push(element);
    }

    let mut transactions = Vec::new();

    for (page_number, elements) in &by_page {
        for cluster in cluster_page_rows(elements) {
            if let Some(fact) =
                normalize_cluster(ctx, *page_number, &cluster, lifecycle_stage, &mut errors)
            {
                transactions.push(fact);
            }
        }
    }

    let transactions = dedupe_transactions(transactions);

    debug!(
        artifact_id = %ctx.artifact_id,
        transactions = transactions.len(),
        errors = errors.len(),
        "PDF normalization complete"
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
        mapping,
        errors,
    }
}

fn normalize_cluster(
    ctx: &NormalizeContext,
    page_number: u32,
    cluster: &[&PdfElement],
    lifecycle_stage: LifecycleStage,
    errors: &mut Vec<ValidationErrorItem>,
) -> Option<TransactionFact> {
    let locator = RowLocator {
        sheet_name: None,
        source_row_number: None,
        page_number: Some(page_number),
    };

    // A cluster without a transaction id is layout noise, not an error
    let (id_element, id_confidence) = best_for_field(cluster, "transaction_id")?;
    let transaction_id = id_element.text.trim().to_string();
    if transaction_id.is_empty() {
        return None;
    }

    let mut confidences = vec![id_confidence];

    // An identified cluster that lacks a required prediction is a real
    // row the extractor could not finish, not layout noise.
    let Some((amount_element, amount_confidence)) = best_for_field(cluster, "amount") else {
        errors.push(locator.missing("amount", Some("amount")));
        return None;
    };
    let amount = match parse_amount(amount_element.text.trim(), "amount", &locator) {
        Ok(a) => {
            confidences.push(amount_confidence);
            a
        }
        Err(e) => {
            errors.push(e);
            return None;
        }
    };

    let Some((currency_element, currency_confidence)) = best_for_field(cluster, "currency") else {
        errors.push(locator.missing("currency", Some("currency")));
        return None;
    };
    let currency = match validate_currency(currency_element.text.trim(), "currency", &locator) {
        Ok(c) => {
            confidences.push(currency_confidence);
            c
        }
        Err(e) => {
            errors.push(e);
            return None;
        }
    };

    let Some((date_element, date_confidence)) = best_for_field(cluster, "date") else {
        errors.push(locator.missing("timestamp", Some("date")));
        return None;
    };
    let timestamp_utc = match parse_timestamp_utc(date_element.text.trim(), "date", &locator) {
        Ok(ts) => {
            confidences.push(date_confidence);
            ts
        }
        Err(e) => {
            errors.push(e);
            return None;
        }
    };

    let mut extensions = BTreeMap::new();
    if let Some((status_element, status_confidence)) = best_for_field(cluster, "status") {
        let status = status_element.text.trim();
        if !status.is_empty() {
            confidences.push(status_confidence);
            extensions.insert(
                "status".to_string(),
                serde_json::Value::String(status.to_string()),
            );
        }
    }

    let confidence_score =
        clamp01(confidences.iter().sum::<f64>() / confidences.len() as f64);

    let mut raw_fields_used: Vec<String> = PDF_FIELDS
        .iter()
        .copied()
        .filter(|f| best_for_field(cluster, f).is_some())
        .map(|f| f.to_string())
        .collect();
    raw_fields_used.sort();

    Some(TransactionFact {
        transaction_id,
        amount,
        currency,
        timestamp_utc,
        lifecycle_stage,
        merchant_id: "UNKNOWN".to_string(),
        card_network: ctx.source_network.clone(),
        raw_source_ref: RawSourceRef {
            artifact_id: ctx.artifact_id,
            object_key: ctx.object_key.clone(),
            source_type: SourceType::PdfElement,
            sheet_name: None,
            source_row_number: None,
            page_number: Some(page_number),
            element_id: Some(id_element.element_id.clone()),
            raw_fields_used,
        },
        confidence_score,
        extensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracles::{
        BoundingBox, FieldPrediction, LifecycleInference, MappingResponse, OracleError,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use payscope_common::types::FileFormat;
    use uuid::Uuid;

    struct FakeMapper {
        result: Result<MappingResponse, &'static str>,
    }

    #[async_trait]
    impl MappingOracle for FakeMapper {
        async fn infer_mapping(
            &self,
            _request: &MappingRequest,
        ) -> Result<MappingResponse, OracleError> {
            self.result
                .clone()
                .map_err(|m| OracleError::Contract(m.to_string()))
        }
    }

    fn lifecycle_response(stage: LifecycleStage, confidence: f64) -> MappingResponse {
        MappingResponse {
            lifecycle: LifecycleInference {
                lifecycle_stage: stage,
                confidence_score: confidence,
                rationale: "test".to_string(),
            },
            mappings: vec![],
        }
    }

    fn element(id: &str, page: u32, y: f64, text: &str, field: &str, conf: f64) -> PdfElement {
        PdfElement {
            element_id: id.to_string(),
            page_number: page,
            text: text.to_string(),
            bounding_box: Some(BoundingBox {
                x1: 0.0,
                y1: y,
                x2: 100.0,
                y2: y + 12.0,
            }),
            predictions: vec![FieldPrediction {
                field_type: field.to_string(),
                confidence: conf,
            }],
        }
    }

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            bank_id: "bank-a".to_string(),
            artifact_id: Uuid::new_v4(),
            report_id: Uuid::new_v4(),
            report_type: "pdf_report".to_string(),
            source_network: "MASTERCARD".to_string(),
            object_key: "raw/abc.pdf".to_string(),
            file_format: FileFormat::Pdf,
            ingestion_time: Utc::now(),
        }
    }

    fn statement_row(page: u32, y: f64, suffix: &str) -> Vec<PdfElement> {
        vec![
            element(&format!("id-{suffix}"), page, y, &format!("T{suffix}"), "transaction_id", 0.95),
            element(&format!("amt-{suffix}"), page, y, "$250.00", "amount", 0.90),
            element(&format!("ccy-{suffix}"), page, y, "USD", "currency", 0.92),
            element(&format!("dt-{suffix}"), page, y, "2024-03-01 09:30:00", "date", 0.88),
        ]
    }

    #[test]
    fn test_cluster_rows_by_vertical_position() {
        let elements: Vec<PdfElement> = statement_row(1, 700.0, "1")
            .into_iter()
            .chain(statement_row(1, 650.0, "2"))
            .collect();
        let refs: Vec<&PdfElement> = elements.iter().collect();
        let rows = cluster_page_rows(&refs);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 4);
    }

    #[test]
    fn test_elements_without_bbox_are_skipped() {
        let mut e = element("e1", 1, 100.0, "T1", "transaction_id", 0.9);
        e.bounding_box = None;
        let refs = vec![&e];
        assert!(cluster_page_rows(&refs).is_empty());
    }

    #[tokio::test]
    async fn test_pdf_happy_path() {
        let mapper = FakeMapper {
            result: Ok(lifecycle_response(LifecycleStage::Settlement, 0.93)),
        };
        let elements: Vec<PdfElement> = statement_row(1, 700.0, "1")
            .into_iter()
            .chain(statement_row(1, 650.0, "2"))
            .collect();
        let doc = PdfDocument { elements };

        let result = normalize_pdf(&ctx(), &doc, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 2);
        assert!(result.errors.is_empty());

        let t1 = &result.transactions[0];
        assert_eq!(t1.lifecycle_stage, LifecycleStage::Settlement);
        assert_eq!(t1.merchant_id, "UNKNOWN");
        assert_eq!(t1.card_network, "MASTERCARD");
        assert_eq!(t1.raw_source_ref.page_number, Some(1));
        assert!(t1.raw_source_ref.element_id.is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_failure_defaults_to_auth() {
        let mapper = FakeMapper {
            result: Err("classifier down"),
        };
        let doc = PdfDocument {
            elements: statement_row(1, 700.0, "1"),
        };

        let result = normalize_pdf(&ctx(), &doc, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].lifecycle_stage, LifecycleStage::Auth);
        assert_eq!(result.errors[0].code, "lifecycle_inference_failed");
    }

    #[tokio::test]
    async fn test_low_confidence_lifecycle_recorded() {
        let mapper = FakeMapper {
            result: Ok(lifecycle_response(LifecycleStage::Clearing, 0.40)),
        };
        let doc = PdfDocument {
            elements: statement_row(1, 700.0, "1"),
        };

        let result = normalize_pdf(&ctx(), &doc, &mapper, 0.70).await;
        assert_eq!(result.transactions[0].lifecycle_stage, LifecycleStage::Auth);
        assert_eq!(result.errors[0].code, "lifecycle_low_confidence");
    }

    #[tokio::test]
    async fn test_identified_cluster_without_amount_is_an_error() {
        let mapper = FakeMapper {
            result: Ok(lifecycle_response(LifecycleStage::Auth, 0.90)),
        };
        let mut incomplete = statement_row(1, 700.0, "1");
        incomplete.remove(1); // no amount prediction in the row
        let elements: Vec<PdfElement> = incomplete
            .into_iter()
            .chain(statement_row(1, 650.0, "2"))
            .collect();
        let doc = PdfDocument { elements };

        let result = normalize_pdf(&ctx(), &doc, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].transaction_id, "T2");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "amount_missing");
        assert_eq!(result.errors[0].page_number, Some(1));
    }

    #[tokio::test]
    async fn test_bad_amount_fails_cluster_only() {
        let mapper = FakeMapper {
            result: Ok(lifecycle_response(LifecycleStage::Auth, 0.90)),
        };
        let mut bad = statement_row(1, 700.0, "1");
        bad[1].text = "two hundred".to_string();
        let elements: Vec<PdfElement> =
            bad.into_iter().chain(statement_row(1, 650.0, "2")).collect();
        let doc = PdfDocument { elements };

        let result = normalize_pdf(&ctx(), &doc, &mapper, 0.70).await;
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].transaction_id, "T2");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "amount_invalid");
        assert_eq!(result.errors[0].page_number, Some(1));
    }
}
