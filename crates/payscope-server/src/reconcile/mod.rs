//! Lifecycle reconciliation
//!
//! Cross-stage analysis for one transaction: given its known stage
//! events (AUTH, CLEARING, SETTLEMENT), derive anomaly flags and the
//! end-to-end gap. Pure computation; persistence of the flags happens
//! in the graph layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use payscope_common::types::LifecycleStage;

/// Relative amount difference beyond which two stages disagree
const AMOUNT_MISMATCH_TOLERANCE: f64 = 0.01;

/// One stage event for a transaction, as seen across all reports
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: LifecycleStage,
    pub amount: f64,
    pub currency: String,
    pub event_time: DateTime<Utc>,
}

/// Derived cross-stage findings for one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAnomalies {
    /// No SETTLEMENT stage recorded (so far)
    pub missing_settlement: bool,
    /// Stages disagree on currency
    pub currency_conflict: bool,
    /// Non-zero stage amounts differ by more than the tolerance
    pub has_amount_mismatch: bool,
    /// Event times run backwards relative to AUTH -> CLEARING -> SETTLEMENT
    pub timestamp_violation: bool,
    /// Seconds from AUTH to SETTLEMENT when both are present
    pub lifecycle_gap_secs: Option<i64>,
}

impl LifecycleAnomalies {
    pub fn any(&self) -> bool {
        self.missing_settlement
            || self.currency_conflict
            || self.has_amount_mismatch
            || self.timestamp_violation
    }
}

/// Analyze the stage events of a single transaction.
///
/// When a stage appears more than once the first record wins; upstream
/// deduplication makes that case rare.
pub fn analyze_lifecycle(records: &[StageRecord]) -> LifecycleAnomalies {
    let mut by_stage: BTreeMap<LifecycleStage, &StageRecord> = BTreeMap::new();
    for record in records {
        by_stage.entry(record.stage).or_insert(record);
    }

    let mut anomalies = LifecycleAnomalies::default();
    if by_stage.is_empty() {
        return anomalies;
    }

    anomalies.missing_settlement = !by_stage.contains_key(&LifecycleStage::Settlement);

    let mut currencies: Vec<&str> = by_stage.values().map(|r| r.currency.as_str()).collect();
    currencies.sort_unstable();
    currencies.dedup();
    anomalies.currency_conflict = currencies.len() > 1;

    // Zero-amount legs (e.g. reversals reported as zero) are excluded
    // from the mismatch comparison.
    let amounts: Vec<f64> = by_stage
        .values()
        .map(|r| r.amount)
        .filter(|a| *a != 0.0)
        .collect();
    // Every pair of stages must agree, not just adjacent ones; a slow
    // drift across three stages can exceed the tolerance only at the ends.
    anomalies.has_amount_mismatch = amounts.iter().enumerate().any(|(i, a)| {
        amounts[i + 1..].iter().any(|b| {
            let denom = a.abs().max(b.abs());
            (a - b).abs() / denom > AMOUNT_MISMATCH_TOLERANCE
        })
    });

    // BTreeMap iterates in canonical stage order, so event times must be
    // non-decreasing along it.
    let times: Vec<DateTime<Utc>> = by_stage.values().map(|r| r.event_time).collect();
    anomalies.timestamp_violation = times.windows(2).any(|pair| pair[1] < pair[0]);

    if let (Some(auth), Some(settlement)) = (
        by_stage.get(&LifecycleStage::Auth),
        by_stage.get(&LifecycleStage::Settlement),
    ) {
        anomalies.lifecycle_gap_secs =
            Some((settlement.event_time - auth.event_time).num_seconds());
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    fn record(stage: LifecycleStage, amount: f64, currency: &str, offset: i64) -> StageRecord {
        StageRecord {
            stage,
            amount,
            currency: currency.to_string(),
            event_time: at(offset),
        }
    }

    #[test]
    fn test_clean_lifecycle_has_no_anomalies() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 0),
            record(LifecycleStage::Clearing, 100.0, "USD", 3600),
            record(LifecycleStage::Settlement, 100.0, "USD", 86400),
        ]);
        assert!(!anomalies.any());
        assert_eq!(anomalies.lifecycle_gap_secs, Some(86400));
    }

    #[test]
    fn test_auth_then_larger_settlement_next_day() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 0),
            record(LifecycleStage::Settlement, 102.0, "USD", 86400),
        ]);
        assert!(anomalies.has_amount_mismatch);
        assert!(!anomalies.missing_settlement);
        assert!(!anomalies.timestamp_violation);
        assert_eq!(anomalies.lifecycle_gap_secs, Some(86400));
    }

    #[test]
    fn test_missing_settlement() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 50.0, "USD", 0),
            record(LifecycleStage::Clearing, 50.0, "USD", 100),
        ]);
        assert!(anomalies.missing_settlement);
        assert_eq!(anomalies.lifecycle_gap_secs, None);
    }

    #[test]
    fn test_clearing_only_flags_missing_settlement() {
        let anomalies = analyze_lifecycle(&[record(LifecycleStage::Clearing, 50.0, "USD", 0)]);
        assert!(anomalies.missing_settlement);
    }

    #[test]
    fn test_settlement_alone_is_not_missing() {
        let anomalies = analyze_lifecycle(&[record(LifecycleStage::Settlement, 50.0, "USD", 0)]);
        assert!(!anomalies.missing_settlement);
    }

    #[test]
    fn test_amount_drift_flagged_across_nonadjacent_stages() {
        // Adjacent stages stay within 1% of each other; only the ends differ
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 0),
            record(LifecycleStage::Clearing, 101.0, "USD", 3600),
            record(LifecycleStage::Settlement, 102.0, "USD", 86400),
        ]);
        assert!(anomalies.has_amount_mismatch);
    }

    #[test]
    fn test_currency_conflict() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 0),
            record(LifecycleStage::Settlement, 100.0, "EUR", 100),
        ]);
        assert!(anomalies.currency_conflict);
    }

    #[test]
    fn test_small_amount_drift_within_tolerance() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 0),
            record(LifecycleStage::Settlement, 100.5, "USD", 100),
        ]);
        assert!(!anomalies.has_amount_mismatch);
    }

    #[test]
    fn test_zero_legs_excluded_from_mismatch() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 0.0, "USD", 0),
            record(LifecycleStage::Settlement, 100.0, "USD", 100),
        ]);
        assert!(!anomalies.has_amount_mismatch);
    }

    #[test]
    fn test_timestamp_violation() {
        let anomalies = analyze_lifecycle(&[
            record(LifecycleStage::Auth, 100.0, "USD", 1000),
            record(LifecycleStage::Settlement, 100.0, "USD", 0),
        ]);
        assert!(anomalies.timestamp_violation);
        assert_eq!(anomalies.lifecycle_gap_secs, Some(-1000));
    }

    #[test]
    fn test_empty_input() {
        assert!(!analyze_lifecycle(&[]).any());
    }
}
