//! Vanilla classifier two-sample test with k-fold cross-validation.

use lc2st_classifier::{ClassifierConfig, evaluate, train};
use lc2st_error::{Lc2stError, Result, ensure_dim};
use lc2st_types::{MetricKind, SampleSet, SeedTaxonomy, unit_seed};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info};

use crate::DIAG_ID;
use crate::aggregate::{FoldRecord, FoldScores, UnitId, UnitKind, UnitOutcome, partition_outcomes};
use crate::folds::{FoldSplit, kfold_splits};
use crate::metrics::{check_metrics_for_eval, compute_metrics};

/// Seed-derivation scope for the vanilla test.
pub const C2ST_SCOPE: &str = "c2st";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct C2stConfig {
    pub n_folds: usize,
    pub metrics: Vec<MetricKind>,
    /// Score only the held-out part of population 0.
    pub single_class_eval: bool,
    pub classifier: ClassifierConfig,
    pub seed: u64,
}

impl Default for C2stConfig {
    fn default() -> Self {
        Self {
            n_folds: 2,
            metrics: vec![MetricKind::Divergence],
            single_class_eval: true,
            classifier: ClassifierConfig::default(),
            seed: 0,
        }
    }
}

impl C2stConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(Lc2stError::config(format!(
                "n_folds must be >= 2, got {}",
                self.n_folds
            )));
        }
        check_metrics_for_eval(&self.metrics, self.single_class_eval)?;
        self.classifier.validate()
    }

    #[must_use]
    pub fn seeds(&self) -> SeedTaxonomy {
        SeedTaxonomy::derive(self.seed, C2ST_SCOPE)
    }
}

/// One cross-validation fold, runnable independently of the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldUnit {
    pub fold: usize,
    pub split_0: FoldSplit,
    pub split_1: FoldSplit,
    pub seed: u64,
}

impl FoldUnit {
    #[must_use]
    pub const fn id(&self) -> UnitId {
        UnitId::new(UnitKind::Fold, self.fold)
    }

    /// Train on the other folds of both populations and score the held-out fold.
    pub fn run(
        &self,
        population_0: &SampleSet,
        population_1: &SampleSet,
        config: &C2stConfig,
    ) -> Result<FoldRecord> {
        let _span = debug_span!("c2st_fold", diag_id = DIAG_ID, fold = self.fold).entered();
        let train_0 = population_0.select(&self.split_0.train);
        let train_1 = population_1.select(&self.split_1.train);
        let classifier = train(&train_0, &train_1, &config.classifier, self.seed)?;

        let eval_0 = population_0.select(&self.split_0.held_out);
        let eval_1 = (!config.single_class_eval)
            .then(|| population_1.select(&self.split_1.held_out));
        let evaluation = evaluate(classifier.as_ref(), &eval_0, eval_1.as_ref())?;

        let scores = compute_metrics(
            &config.metrics,
            &evaluation.probabilities,
            evaluation.labels.as_deref(),
        )?;
        debug!(fold = self.fold, ?scores, "c2st fold scored");
        Ok(FoldRecord {
            scores,
            probabilities: evaluation.probabilities,
            accuracy: evaluation.accuracy,
        })
    }
}

/// Plan the fold units for populations of sizes `n_0` and `n_1`.
///
/// Each population is partitioned with its own seeded shuffle; fold `j` of
/// population 0 pairs with fold `j` of population 1.
pub fn plan_c2st_folds(n_0: usize, n_1: usize, config: &C2stConfig) -> Result<Vec<FoldUnit>> {
    config.validate()?;
    let seeds = config.seeds();
    let splits_0 = kfold_splits(n_0, config.n_folds, unit_seed(seeds.shuffle, 0))?;
    let splits_1 = kfold_splits(n_1, config.n_folds, unit_seed(seeds.shuffle, 1))?;
    Ok(splits_0
        .into_iter()
        .zip(splits_1)
        .map(|(split_0, split_1)| FoldUnit {
            fold: split_0.fold,
            seed: unit_seed(seeds.classifier, split_0.fold as u64),
            split_0,
            split_1,
        })
        .collect())
}

/// Combine fold outcomes into the per-fold score sequences.
pub fn finalize_c2st(
    config: &C2stConfig,
    outcomes: Vec<(UnitId, UnitOutcome<FoldRecord>)>,
) -> Result<FoldScores> {
    let partitioned = partition_outcomes(outcomes)?;
    let scores = FoldScores::finalize(&config.metrics, partitioned);
    info!(
        diag_id = DIAG_ID,
        completed = scores.folds.len(),
        excluded = scores.n_excluded(),
        "c2st finalized"
    );
    Ok(scores)
}

/// Cross-validated C2ST scores between `population_0` (P) and `population_1` (Q).
pub fn c2st_scores(
    population_0: &SampleSet,
    population_1: &SampleSet,
    config: &C2stConfig,
) -> Result<FoldScores> {
    ensure_dim("c2st population dimension", population_0.dim(), population_1.dim())?;
    let units = plan_c2st_folds(population_0.n_samples(), population_1.n_samples(), config)?;
    let outcomes: Vec<(UnitId, UnitOutcome<FoldRecord>)> = units
        .par_iter()
        .map(|unit| (unit.id(), unit.run(population_0, population_1, config).into()))
        .collect();
    finalize_c2st(config, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ExclusionReason;
    use crate::test_support::gaussian;
    use lc2st_error::ErrorKind;

    fn two_class(metrics: Vec<MetricKind>) -> C2stConfig {
        C2stConfig {
            metrics,
            single_class_eval: false,
            ..C2stConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        C2stConfig::default().validate().unwrap();
    }

    #[test]
    fn accuracy_under_single_class_eval_is_rejected() {
        let config = C2stConfig {
            metrics: vec![MetricKind::Accuracy],
            ..C2stConfig::default()
        };
        let p = gaussian(40, 2, 0.0, 1);
        let err = c2st_scores(&p, &p, &config).unwrap_err();
        assert!(matches!(err, Lc2stError::Configuration(_)), "{err}");
    }

    #[test]
    fn dimension_mismatch_fails_immediately() {
        let p = gaussian(40, 2, 0.0, 1);
        let q = gaussian(40, 3, 0.0, 2);
        let err = c2st_scores(&p, &q, &C2stConfig::default()).unwrap_err();
        assert!(matches!(err, Lc2stError::DimensionMismatch { .. }));
    }

    #[test]
    fn too_many_folds_is_configuration_error() {
        let p = gaussian(5, 2, 0.0, 1);
        let config = C2stConfig {
            n_folds: 6,
            ..C2stConfig::default()
        };
        assert!(matches!(
            c2st_scores(&p, &p, &config),
            Err(Lc2stError::Configuration(_))
        ));
    }

    #[test]
    fn reports_every_fold() {
        let p = gaussian(100, 2, 0.0, 1);
        let q = gaussian(100, 2, 0.0, 2);
        let config = C2stConfig {
            n_folds: 5,
            metrics: vec![MetricKind::Divergence, MetricKind::Regression],
            ..C2stConfig::default()
        };
        let scores = c2st_scores(&p, &q, &config).unwrap();
        assert_eq!(scores.folds, vec![0, 1, 2, 3, 4]);
        assert_eq!(scores.scores[&MetricKind::Divergence].len(), 5);
        assert_eq!(scores.probabilities.len(), 5);
        // single-class evaluation scores only the 20 held-out rows of P
        assert!(scores.probabilities.iter().all(|p| p.len() == 20));
        assert_eq!(scores.n_excluded(), 0);
    }

    #[test]
    fn separable_populations_reach_high_accuracy() {
        let p = gaussian(100, 3, 0.0, 1);
        let q = gaussian(100, 3, 2.5, 2);
        let scores = c2st_scores(&p, &q, &two_class(vec![MetricKind::Accuracy])).unwrap();
        let acc = scores.statistic(MetricKind::Accuracy).unwrap();
        assert!(acc > 0.9, "accuracy {acc}");
        assert!(scores.probabilities.iter().all(|p| p.len() == 100));
    }

    #[test]
    fn deterministic_under_parallel_execution() {
        let p = gaussian(60, 2, 0.0, 3);
        let q = gaussian(60, 2, 0.5, 4);
        let config = C2stConfig {
            n_folds: 3,
            classifier: ClassifierConfig::Mlp(lc2st_classifier::MlpConfig {
                hidden_layers: vec![8],
                max_epochs: 20,
                ..lc2st_classifier::MlpConfig::default()
            }),
            ..C2stConfig::default()
        };
        assert_eq!(
            c2st_scores(&p, &q, &config).unwrap(),
            c2st_scores(&p, &q, &config).unwrap()
        );
    }

    #[test]
    fn non_converging_classifier_excludes_every_fold() {
        let p = gaussian(40, 2, 0.0, 1);
        let q = gaussian(40, 2, 0.5, 2);
        let config = C2stConfig {
            classifier: ClassifierConfig::Logistic(lc2st_classifier::LogisticConfig {
                max_iter: 1,
                ..lc2st_classifier::LogisticConfig::default()
            }),
            ..C2stConfig::default()
        };
        let scores = c2st_scores(&p, &q, &config).unwrap();
        assert!(scores.folds.is_empty());
        assert_eq!(scores.n_excluded(), 2);
        assert!(scores.excluded.iter().all(|e| matches!(
            e.reason,
            ExclusionReason::Failed {
                error: ErrorKind::ClassifierFitFailure,
                ..
            }
        )));
        assert!(scores.statistics().is_empty());
    }

    #[test]
    fn undersized_fold_is_excluded_with_its_index() {
        let p = gaussian(40, 2, 0.0, 1);
        let q = gaussian(3, 2, 0.0, 2);
        let scores = c2st_scores(&p, &q, &C2stConfig::default()).unwrap();
        // fold 0 holds out two of Q's three rows and trains on one
        assert_eq!(scores.folds, vec![1]);
        assert_eq!(scores.excluded.len(), 1);
        assert_eq!(scores.excluded[0].unit, UnitId::new(UnitKind::Fold, 0));
        assert!(matches!(
            scores.excluded[0].reason,
            ExclusionReason::Failed {
                error: ErrorKind::InsufficientSamples,
                ..
            }
        ));
        assert!(scores.statistic(MetricKind::Divergence).is_some());
    }

    #[test]
    fn fold_units_run_independently() {
        let p = gaussian(30, 2, 0.0, 5);
        let q = gaussian(30, 2, 0.0, 6);
        let config = C2stConfig {
            n_folds: 3,
            ..C2stConfig::default()
        };
        let units = plan_c2st_folds(30, 30, &config).unwrap();
        // run in reverse order, then cancel one unit
        let mut outcomes: Vec<(UnitId, UnitOutcome<FoldRecord>)> = units
            .iter()
            .rev()
            .map(|u| (u.id(), u.run(&p, &q, &config).into()))
            .collect();
        outcomes[0].1 = UnitOutcome::Cancelled;
        let scores = finalize_c2st(&config, outcomes).unwrap();
        assert_eq!(scores.folds, vec![0, 1]);
        assert_eq!(scores.n_excluded(), 1);

        let full = c2st_scores(&p, &q, &config).unwrap();
        assert_eq!(full.probabilities[..2], scores.probabilities[..]);
    }
}
