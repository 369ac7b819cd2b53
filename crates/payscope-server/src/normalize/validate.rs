//! Field-level validation and canonicalization
//!
//! Every parser returns a `Result` with a structured error item; a bad
//! value fails its own row and nothing else. Amounts become exact
//! decimals, currencies are checked against ISO 4217, and timestamps
//! always come out as UTC.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use payscope_common::types::LifecycleStage;

use super::iso4217;
use super::schema::{TransactionFact, ValidationErrorItem};

/// Source location attached to every validation error
#[derive(Debug, Clone, Default)]
pub struct RowLocator {
    pub sheet_name: Option<String>,
    pub source_row_number: Option<i64>,
    pub page_number: Option<u32>,
}

impl RowLocator {
    /// Error item for a row that has no usable value for a canonical
    /// field. Codes follow the `<canonical>_missing` convention.
    pub fn missing(&self, canonical: &str, raw_field: Option<&str>) -> ValidationErrorItem {
        ValidationErrorItem {
            code: format!("{canonical}_missing"),
            message: format!("row has no usable value for {canonical}"),
            field: raw_field.map(|f| f.to_string()),
            raw_value: None,
            sheet_name: self.sheet_name.clone(),
            source_row_number: self.source_row_number,
            page_number: self.page_number,
        }
    }

    fn error(
        &self,
        code: &str,
        message: String,
        field: &str,
        raw_value: &str,
    ) -> ValidationErrorItem {
        ValidationErrorItem {
            code: code.to_string(),
            message,
            field: Some(field.to_string()),
            raw_value: Some(raw_value.to_string()),
            sheet_name: self.sheet_name.clone(),
            source_row_number: self.source_row_number,
            page_number: self.page_number,
        }
    }
}

/// Parse a monetary amount into an exact decimal.
///
/// Accepts currency-symbol and thousands-separator noise, and
/// accounting-style parentheses for negatives. Anything that does not
/// parse as a finite decimal is rejected; there is no NaN in money.
pub fn parse_amount(
    raw: &str,
    field: &str,
    locator: &RowLocator,
) -> Result<BigDecimal, ValidationErrorItem> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(locator.error(
            "amount_missing",
            format!("field '{field}' is empty"),
            field,
            raw,
        ));
    }

    let mut cleaned = trimmed.replace(['$', ','], "");
    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    let cleaned = cleaned.trim();

    let amount = BigDecimal::from_str(cleaned).map_err(|_| {
        locator.error(
            "amount_invalid",
            format!("field '{field}' is not a valid amount: '{trimmed}'"),
            field,
            raw,
        )
    })?;

    Ok(if negative { -amount } else { amount })
}

/// Uppercase and validate a currency code against ISO 4217.
pub fn validate_currency(
    raw: &str,
    field: &str,
    locator: &RowLocator,
) -> Result<String, ValidationErrorItem> {
    let code = raw.trim().to_uppercase();
    if iso4217::is_valid_code(&code) {
        Ok(code)
    } else {
        Err(locator.error(
            "currency_invalid",
            format!("'{}' is not an ISO 4217 currency code", raw.trim()),
            field,
            raw,
        ))
    }
}

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

const NAIVE_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

/// Parse a timestamp into UTC.
///
/// Offset-aware inputs are converted; naive inputs are interpreted as
/// already being UTC. Date-only inputs land on midnight UTC.
pub fn parse_timestamp_utc(
    raw: &str,
    field: &str,
    locator: &RowLocator,
) -> Result<DateTime<Utc>, ValidationErrorItem> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(locator.error(
            "timestamp_missing",
            format!("field '{field}' is empty"),
            field,
            raw,
        ));
    }

    if let Ok(aware) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(aware.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }

    Err(locator.error(
        "timestamp_invalid",
        format!("field '{field}' is not a recognized timestamp: '{trimmed}'"),
        field,
        raw,
    ))
}

/// Clamp a confidence score into [0, 1].
pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Collapse duplicate (transaction_id, lifecycle_stage) facts.
///
/// Highest confidence wins; exact confidence ties fall back to the
/// lexically smallest provenance key so replays always produce the same
/// survivor. Output is sorted by (transaction_id, stage).
pub fn dedupe_transactions(facts: Vec<TransactionFact>) -> Vec<TransactionFact> {
    let mut best: BTreeMap<(String, LifecycleStage), TransactionFact> = BTreeMap::new();

    for fact in facts {
        let key = (fact.transaction_id.clone(), fact.lifecycle_stage);
        match best.get(&key) {
            None => {
                best.insert(key, fact);
            }
            Some(current) => {
                let replace = match fact.confidence_score.total_cmp(&current.confidence_score) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        fact.raw_source_ref.tiebreak_key()
                            < current.raw_source_ref.tiebreak_key()
                    }
                };
                if replace {
                    best.insert(key, fact);
                }
            }
        }
    }

    // BTreeMap iteration already orders by (transaction_id, stage)
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::schema::{RawSourceRef, SourceType};
    use chrono::Datelike;
    use uuid::Uuid;

    fn locator() -> RowLocator {
        RowLocator {
            sheet_name: None,
            source_row_number: Some(3),
            page_number: None,
        }
    }

    #[test]
    fn test_parse_amount_plain() {
        let amount = parse_amount("10.50", "amount", &locator()).unwrap();
        assert_eq!(amount, BigDecimal::from_str("10.50").unwrap());
    }

    #[test]
    fn test_parse_amount_currency_noise() {
        let amount = parse_amount("$1,234.56", "amount", &locator()).unwrap();
        assert_eq!(amount, BigDecimal::from_str("1234.56").unwrap());
    }

    #[test]
    fn test_parse_amount_parentheses_negative() {
        let amount = parse_amount("(42.00)", "amount", &locator()).unwrap();
        assert_eq!(amount, BigDecimal::from_str("-42.00").unwrap());
    }

    #[test]
    fn test_parse_amount_rejects_nan_and_garbage() {
        assert_eq!(
            parse_amount("NaN", "amount", &locator()).unwrap_err().code,
            "amount_invalid"
        );
        assert_eq!(
            parse_amount("ten dollars", "amount", &locator())
                .unwrap_err()
                .code,
            "amount_invalid"
        );
        assert_eq!(
            parse_amount("  ", "amount", &locator()).unwrap_err().code,
            "amount_missing"
        );
    }

    #[test]
    fn test_validate_currency() {
        assert_eq!(validate_currency("usd", "currency", &locator()).unwrap(), "USD");
        assert_eq!(
            validate_currency("ZZZ", "currency", &locator())
                .unwrap_err()
                .code,
            "currency_invalid"
        );
    }

    #[test]
    fn test_parse_timestamp_offset_converted_to_utc() {
        let ts = parse_timestamp_utc("2024-03-01T10:00:00+02:00", "ts", &locator()).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T08:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_naive_is_utc() {
        let ts = parse_timestamp_utc("2024-03-01 10:00:00", "ts", &locator()).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_date_only() {
        let ts = parse_timestamp_utc("2024-03-01", "ts", &locator()).unwrap();
        assert_eq!(ts.day(), 1);
        assert_eq!(ts.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        let err = parse_timestamp_utc("yesterday", "ts", &locator()).unwrap_err();
        assert_eq!(err.code, "timestamp_invalid");
        assert_eq!(err.source_row_number, Some(3));
    }

    fn fact(id: &str, stage: LifecycleStage, confidence: f64, row: i64) -> TransactionFact {
        TransactionFact {
            transaction_id: id.to_string(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            timestamp_utc: Utc::now(),
            lifecycle_stage: stage,
            merchant_id: "M1".to_string(),
            card_network: "VISA".to_string(),
            raw_source_ref: RawSourceRef {
                artifact_id: Uuid::nil(),
                object_key: "raw/a.csv".to_string(),
                source_type: SourceType::CsvRow,
                sheet_name: None,
                source_row_number: Some(row),
                page_number: None,
                element_id: None,
                raw_fields_used: vec![],
            },
            confidence_score: confidence,
            extensions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_dedupe_keeps_highest_confidence() {
        let facts = vec![
            fact("T1", LifecycleStage::Auth, 0.80, 1),
            fact("T1", LifecycleStage::Auth, 0.95, 2),
            fact("T1", LifecycleStage::Clearing, 0.70, 3),
        ];
        let out = dedupe_transactions(facts);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].lifecycle_stage, LifecycleStage::Auth);
        assert_eq!(out[0].confidence_score, 0.95);
        assert_eq!(out[0].raw_source_ref.source_row_number, Some(2));
    }

    #[test]
    fn test_dedupe_tie_breaks_lexically() {
        let facts = vec![
            fact("T1", LifecycleStage::Auth, 0.90, 9),
            fact("T1", LifecycleStage::Auth, 0.90, 2),
        ];
        let out = dedupe_transactions(facts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_source_ref.source_row_number, Some(2));
    }

    #[test]
    fn test_dedupe_output_sorted() {
        let facts = vec![
            fact("T2", LifecycleStage::Settlement, 0.9, 1),
            fact("T1", LifecycleStage::Clearing, 0.9, 2),
            fact("T1", LifecycleStage::Auth, 0.9, 3),
        ];
        let out = dedupe_transactions(facts);
        let keys: Vec<_> = out
            .iter()
            .map(|f| (f.transaction_id.clone(), f.lifecycle_stage))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("T1".to_string(), LifecycleStage::Auth),
                ("T1".to_string(), LifecycleStage::Clearing),
                ("T2".to_string(), LifecycleStage::Settlement),
            ]
        );
    }
}
