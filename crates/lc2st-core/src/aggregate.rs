//! Accumulate-then-finalize bookkeeping for independent work units.
//!
//! Every fold, ensemble member, null trial and alpha level runs as its own
//! unit and yields a [`UnitOutcome`]. Outcomes are only folded into a final
//! aggregate once all of them are available. Unit-scoped failures
//! (`ClassifierFitFailure`, `InsufficientSamples`) and cancellations are
//! recorded as [`ExcludedUnit`]s; any other error aborts the invocation.

use std::collections::BTreeMap;
use std::fmt;

use lc2st_error::{ErrorKind, Lc2stError, Result};
use lc2st_types::MetricKind;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::DIAG_ID;
use crate::metrics::MetricValues;
use crate::stats::mean;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Fold,
    EnsembleMember,
    NullTrial,
    AlphaLevel,
}

/// Identity of one work unit within a test invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub kind: UnitKind,
    pub index: usize,
}

impl UnitId {
    #[must_use]
    pub const fn new(kind: UnitKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            UnitKind::Fold => "fold",
            UnitKind::EnsembleMember => "ensemble_member",
            UnitKind::NullTrial => "null_trial",
            UnitKind::AlphaLevel => "alpha_level",
        };
        write!(f, "{kind}#{}", self.index)
    }
}

/// What happened to a unit.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    Completed(T),
    Failed(Lc2stError),
    /// Cancelled by an external executor before completion.
    Cancelled,
}

impl<T> From<Result<T>> for UnitOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(err) => Self::Failed(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    Failed { error: ErrorKind, message: String },
    Cancelled,
}

/// A unit left out of aggregation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedUnit {
    pub unit: UnitId,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// A completed unit's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord<T> {
    pub unit: UnitId,
    pub value: T,
}

/// Completed records and excluded units, both ordered by unit index.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitioned<T> {
    pub completed: Vec<UnitRecord<T>>,
    pub excluded: Vec<ExcludedUnit>,
}

/// Split unit outcomes into completed records and exclusions.
///
/// Returns the first invocation-level error (dimension mismatch or
/// configuration) instead of excluding it.
pub fn partition_outcomes<T>(outcomes: Vec<(UnitId, UnitOutcome<T>)>) -> Result<Partitioned<T>> {
    let mut completed = Vec::with_capacity(outcomes.len());
    let mut excluded = Vec::new();
    for (unit, outcome) in outcomes {
        match outcome {
            UnitOutcome::Completed(value) => completed.push(UnitRecord { unit, value }),
            UnitOutcome::Failed(err) if err.is_unit_scoped() => {
                warn!(diag_id = DIAG_ID, %unit, error = %err, "excluding failed unit");
                excluded.push(ExcludedUnit {
                    unit,
                    reason: ExclusionReason::Failed {
                        error: err.kind(),
                        message: err.to_string(),
                    },
                });
            }
            UnitOutcome::Failed(err) => return Err(err),
            UnitOutcome::Cancelled => {
                warn!(diag_id = DIAG_ID, %unit, "excluding cancelled unit");
                excluded.push(ExcludedUnit {
                    unit,
                    reason: ExclusionReason::Cancelled,
                });
            }
        }
    }
    completed.sort_by_key(|r| r.unit);
    excluded.sort_by_key(|e| e.unit);
    Ok(Partitioned {
        completed,
        excluded,
    })
}

/// Output of one fold: statistics, probabilities and (two-class) accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRecord {
    pub scores: MetricValues,
    pub probabilities: Vec<f64>,
    pub accuracy: Option<f64>,
}

/// Per-fold statistics of a cross-validated test.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FoldScores {
    /// Metric values in completed-fold order.
    pub scores: BTreeMap<MetricKind, Vec<f64>>,
    /// Class-0 probabilities per completed fold.
    pub probabilities: Vec<Vec<f64>>,
    /// Indices of the completed folds.
    pub folds: Vec<usize>,
    pub excluded: Vec<ExcludedUnit>,
}

impl FoldScores {
    /// Fold completed records into per-metric sequences.
    #[must_use]
    pub fn finalize(metrics: &[MetricKind], partitioned: Partitioned<FoldRecord>) -> Self {
        let mut scores: BTreeMap<MetricKind, Vec<f64>> =
            metrics.iter().map(|&m| (m, Vec::new())).collect();
        let mut probabilities = Vec::with_capacity(partitioned.completed.len());
        let mut folds = Vec::with_capacity(partitioned.completed.len());
        for record in partitioned.completed {
            for (metric, values) in &mut scores {
                if let Some(v) = record.value.scores.get(metric) {
                    values.push(*v);
                }
            }
            probabilities.push(record.value.probabilities);
            folds.push(record.unit.index);
        }
        Self {
            scores,
            probabilities,
            folds,
            excluded: partitioned.excluded,
        }
    }

    /// Fold-mean of `metric`; `None` when no fold completed.
    #[must_use]
    pub fn statistic(&self, metric: MetricKind) -> Option<f64> {
        self.scores.get(&metric).and_then(|v| mean(v))
    }

    /// Fold-mean of every metric with at least one completed fold.
    #[must_use]
    pub fn statistics(&self) -> MetricValues {
        self.scores
            .iter()
            .filter_map(|(&m, v)| mean(v).map(|s| (m, s)))
            .collect()
    }

    #[must_use]
    pub fn n_excluded(&self) -> usize {
        self.excluded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(i: usize) -> UnitId {
        UnitId::new(UnitKind::Fold, i)
    }

    #[test]
    fn unit_failures_are_excluded_with_reason() {
        let outcomes = vec![
            (fold(1), UnitOutcome::Completed(1.0)),
            (fold(0), UnitOutcome::Failed(Lc2stError::fit_failure("diverged"))),
            (fold(2), UnitOutcome::Cancelled),
        ];
        let part = partition_outcomes(outcomes).unwrap();
        assert_eq!(part.completed.len(), 1);
        assert_eq!(part.excluded.len(), 2);
        assert_eq!(part.excluded[0].unit, fold(0));
        assert!(matches!(
            part.excluded[0].reason,
            ExclusionReason::Failed {
                error: ErrorKind::ClassifierFitFailure,
                ..
            }
        ));
        assert_eq!(part.excluded[1].reason, ExclusionReason::Cancelled);
    }

    #[test]
    fn invocation_errors_propagate() {
        let outcomes: Vec<(UnitId, UnitOutcome<f64>)> = vec![
            (fold(0), UnitOutcome::Completed(1.0)),
            (fold(1), UnitOutcome::Failed(Lc2stError::config("bad grid"))),
        ];
        assert!(matches!(
            partition_outcomes(outcomes),
            Err(Lc2stError::Configuration(_))
        ));
    }

    #[test]
    fn completed_records_are_ordered_by_index() {
        let outcomes = (0..5)
            .rev()
            .map(|i| (fold(i), UnitOutcome::Completed(i)))
            .collect();
        let part = partition_outcomes(outcomes).unwrap();
        let order: Vec<usize> = part.completed.iter().map(|r| r.value).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn fold_scores_mean_ignores_excluded_folds() {
        let record = |v: f64| FoldRecord {
            scores: [(MetricKind::Divergence, v)].into_iter().collect(),
            probabilities: vec![0.5],
            accuracy: None,
        };
        let part = partition_outcomes(vec![
            (fold(0), UnitOutcome::Completed(record(0.1))),
            (fold(1), UnitOutcome::Failed(Lc2stError::fit_failure("x"))),
            (fold(2), UnitOutcome::Completed(record(0.3))),
        ])
        .unwrap();
        let scores = FoldScores::finalize(&[MetricKind::Divergence], part);
        assert_eq!(scores.folds, vec![0, 2]);
        assert_eq!(scores.n_excluded(), 1);
        let stat = scores.statistic(MetricKind::Divergence).unwrap();
        assert!((stat - 0.2).abs() < 1e-12);
    }

    #[test]
    fn classifier_errors_are_classified_as_unit_failures() {
        let one_row = lc2st_types::SampleSet::new(ndarray::Array2::zeros((1, 2))).unwrap();
        let many_rows = lc2st_types::SampleSet::new(ndarray::Array2::ones((10, 2))).unwrap();
        let classifier = lc2st_classifier::ClassifierConfig::default();
        let outcomes: Vec<(UnitId, UnitOutcome<()>)> = vec![
            (
                fold(0),
                lc2st_classifier::train(&one_row, &many_rows, &classifier, 0)
                    .map(|_| ())
                    .into(),
            ),
            (fold(1), UnitOutcome::Completed(())),
        ];
        let part = partition_outcomes(outcomes).unwrap();
        assert_eq!(part.completed.len(), 1);
        assert_eq!(part.excluded.len(), 1);
        let ExclusionReason::Failed { error, message } = &part.excluded[0].reason else {
            panic!("failed exclusion expected");
        };
        assert_eq!(*error, ErrorKind::InsufficientSamples);
        assert!(message.contains("class 0"), "{message}");
    }

    #[test]
    fn exclusion_serializes_flat() {
        let excluded = ExcludedUnit {
            unit: UnitId::new(UnitKind::NullTrial, 3),
            reason: ExclusionReason::Cancelled,
        };
        let json = serde_json::to_string(&excluded).unwrap();
        assert!(json.contains(r#""reason":"cancelled""#), "{json}");
        assert!(json.contains(r#""kind":"null_trial""#), "{json}");
    }
}
