//! # Stage: Outcome Statistics
//!
//! ## Responsibility
//! Two-proportion z statistics of every alternative against the baseline
//! (alternative 0), the discrete confidence table, serializable stats
//! snapshots, and the default "best alternative" ranking used at completion.
//!
//! ## Guarantees
//! - Non-panicking: every division is guarded; empty alternatives score 0
//! - Zero standard error with differing rates is definitively significant
//!   (signed infinity), mirroring how zero-variance samples are treated
//!   elsewhere in the engine
//!
//! ## NOT Responsible For
//! - Deciding *when* an experiment completes (user predicate's concern)

use serde::Serialize;

use crate::alternative::AltValue;
use crate::experiment::ExperimentStatus;

// ---------------------------------------------------------------------------
// Confidence table
// ---------------------------------------------------------------------------

/// `|z|` thresholds and the confidence level each one grants, strongest first.
///
/// These are the one-sided normal critical values for 99 %, 95 % and 90 %.
pub const CONFIDENCE_LEVELS: [(f64, u8); 3] = [(2.33, 99), (1.65, 95), (1.29, 90)];

/// Map a z statistic to a confidence level: 99, 95, 90 or 0.
pub fn confidence(z: f64) -> u8 {
    let z = z.abs();
    if z.is_nan() {
        return 0;
    }
    CONFIDENCE_LEVELS
        .iter()
        .find(|(threshold, _)| z >= *threshold)
        .map_or(0, |&(_, level)| level)
}

// ---------------------------------------------------------------------------
// Rates and z statistics
// ---------------------------------------------------------------------------

/// `hits / total`, 0 when `total` is 0.
pub fn rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Unpooled two-proportion z statistic of `(n1, x1)` against baseline `(n0, x0)`.
///
/// `n` is participants and `x` distinct conversions. Returns 0 when either
/// side has no participants.
pub fn z_score(n0: u64, x0: u64, n1: u64, x1: u64) -> f64 {
    if n0 == 0 || n1 == 0 {
        return 0.0;
    }
    let p0 = rate(x0, n0);
    let p1 = rate(x1, n1);
    let diff = p1 - p0;
    let variance = p0 * (1.0 - p0) / n0 as f64 + p1 * (1.0 - p1) / n1 as f64;

    if variance <= 0.0 {
        return if diff.abs() < 1e-12 {
            0.0
        } else {
            f64::INFINITY.copysign(diff)
        };
    }
    diff / variance.sqrt()
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time statistics for one alternative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeStats {
    pub index: usize,
    pub value: AltValue,
    pub participants: u64,
    pub converted: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    /// Against alternative 0; always 0 for alternative 0 itself.
    pub z_score: f64,
    pub confidence: u8,
}

/// Point-in-time statistics for a whole experiment.
///
/// This is what `complete_if` and `outcome_is` predicates observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentStats {
    pub name: String,
    pub status: ExperimentStatus,
    pub outcome: Option<AltValue>,
    pub alternatives: Vec<AlternativeStats>,
}

impl ExperimentStats {
    /// Distinct participants across all alternatives.
    pub fn total_participants(&self) -> u64 {
        self.alternatives.iter().map(|a| a.participants).sum()
    }

    /// Distinct converted participants across all alternatives.
    pub fn total_converted(&self) -> u64 {
        self.alternatives.iter().map(|a| a.converted).sum()
    }

    pub fn alternative(&self, value: &AltValue) -> Option<&AlternativeStats> {
        self.alternatives.iter().find(|a| &a.value == value)
    }

    /// Index of the alternative the default outcome policy would pick.
    pub fn best_index(&self) -> usize {
        best_index(&self.alternatives)
    }

    /// Render the snapshot as a JSON report.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Highest z score wins; ties go to the lowest index. Empty input yields 0.
pub fn best_index(alternatives: &[AlternativeStats]) -> usize {
    let mut best: Option<&AlternativeStats> = None;
    for alt in alternatives {
        if best.map_or(true, |b| alt.z_score > b.z_score) {
            best = Some(alt);
        }
    }
    best.map_or(0, |b| b.index)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stats(index: usize, participants: u64, converted: u64, z_score: f64) -> AlternativeStats {
        AlternativeStats {
            index,
            value: AltValue::Int(index as i64),
            participants,
            converted,
            conversions: converted,
            conversion_rate: rate(converted, participants),
            z_score,
            confidence: confidence(z_score),
        }
    }

    // ===== z statistic =====

    #[rstest]
    #[case(180, 45, "1.33")]
    #[case(189, 28, "-1.13")]
    #[case(188, 61, "2.94")]
    fn test_z_score_worked_example(#[case] n: u64, #[case] x: u64, #[case] expected: &str) {
        assert_eq!(format!("{:.2}", z_score(182, 35, n, x)), expected);
    }

    #[test]
    fn test_z_score_zero_participants() {
        assert_eq!(z_score(0, 0, 10, 5), 0.0);
        assert_eq!(z_score(10, 5, 0, 0), 0.0);
    }

    #[test]
    fn test_z_score_zero_variance_equal_rates() {
        assert_eq!(z_score(8, 8, 7, 7), 0.0);
        assert_eq!(z_score(5, 0, 9, 0), 0.0);
    }

    #[test]
    fn test_z_score_zero_variance_different_rates_is_infinite() {
        assert_eq!(z_score(2, 0, 10, 10), f64::INFINITY);
        assert_eq!(z_score(10, 10, 2, 0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_z_score_identical_samples_is_zero() {
        assert!(z_score(100, 20, 100, 20).abs() < 1e-12);
    }

    // ===== confidence =====

    #[rstest]
    #[case(0.0, 0)]
    #[case(1.28, 0)]
    #[case(1.29, 90)]
    #[case(1.33, 90)]
    #[case(-1.13, 0)]
    #[case(1.65, 95)]
    #[case(2.32, 95)]
    #[case(2.33, 99)]
    #[case(2.94, 99)]
    #[case(-2.94, 99)]
    #[case(f64::INFINITY, 99)]
    fn test_confidence_table(#[case] z: f64, #[case] expected: u8) {
        assert_eq!(confidence(z), expected);
    }

    #[test]
    fn test_confidence_nan_is_zero() {
        assert_eq!(confidence(f64::NAN), 0);
    }

    // ===== best alternative =====

    #[test]
    fn test_best_index_highest_z() {
        let alts = vec![stats(0, 10, 1, 0.0), stats(1, 10, 5, 2.1), stats(2, 10, 3, 1.0)];
        assert_eq!(best_index(&alts), 1);
    }

    #[test]
    fn test_best_index_tie_prefers_first() {
        let alts = vec![stats(0, 8, 8, 0.0), stats(1, 7, 7, 0.0)];
        assert_eq!(best_index(&alts), 0);
    }

    #[test]
    fn test_best_index_baseline_beats_negative() {
        let alts = vec![stats(0, 50, 20, 0.0), stats(1, 50, 5, -3.0)];
        assert_eq!(best_index(&alts), 0);
    }

    #[test]
    fn test_best_index_infinite_wins() {
        let alts = vec![stats(0, 2, 0, 0.0), stats(1, 10, 10, f64::INFINITY)];
        assert_eq!(best_index(&alts), 1);
    }

    #[test]
    fn test_best_index_empty() {
        assert_eq!(best_index(&[]), 0);
    }

    // ===== snapshot =====

    #[test]
    fn test_experiment_stats_totals_and_json() {
        let snapshot = ExperimentStats {
            name: "abcd".into(),
            status: ExperimentStatus::Running,
            outcome: None,
            alternatives: vec![stats(0, 182, 35, 0.0), stats(1, 180, 45, 1.33)],
        };
        assert_eq!(snapshot.total_participants(), 362);
        assert_eq!(snapshot.total_converted(), 80);
        assert_eq!(snapshot.alternative(&AltValue::Int(1)).map(|a| a.confidence), Some(90));
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"name\": \"abcd\""));
        assert!(json.contains("\"status\": \"running\""));
    }
}
