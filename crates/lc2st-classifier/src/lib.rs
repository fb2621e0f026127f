//! Classifier capability and the train/evaluate step of C2ST-style tests.
//!
//! # Label convention
//!
//! Population 0 (`P`) is labelled `0`, population 1 (`Q`) is labelled `1`.
//! [`Classifier::predict_proba`] returns the probability of **class 0** for
//! every row, matching the statistics in `lc2st-core`.
//!
//! # Ownership
//!
//! A classifier is built from a [`ClassifierConfig`] and an explicit seed for
//! exactly one fold, trial or ensemble member, then dropped. Nothing here is
//! shared between units.

pub mod config;
pub mod lda;
pub mod logistic;
pub mod mlp;

use std::fmt;

use lc2st_error::{Lc2stError, Result, ensure_dim, ensure_samples};
use lc2st_types::SampleSet;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

pub use config::{ClassifierConfig, LdaConfig, LogisticConfig, MlpConfig};
pub use lda::LinearDiscriminant;
pub use logistic::LogisticRegression;
pub use mlp::MlpClassifier;

/// A binary probabilistic classifier.
pub trait Classifier: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Smallest number of training rows per class the model can fit.
    fn min_samples_per_class(&self) -> usize {
        2
    }

    /// Fit on `features` (rows) with labels in `{0, 1}`.
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<()>;

    /// Probability of class 0 for every row, each in `[0, 1]`.
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>>;

    /// Accuracy against `labels` at threshold 0.5.
    fn score(&self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<f64> {
        let proba = self.predict_proba(features)?.to_vec();
        accuracy(&proba, labels)
    }
}

/// Hard label for a class-0 probability. Ties go to class 0.
#[must_use]
pub fn predicted_label(p_class0: f64) -> u8 {
    u8::from(p_class0 < 0.5)
}

/// Fraction of rows whose predicted label matches `labels`.
pub fn accuracy(probabilities: &[f64], labels: &[u8]) -> Result<f64> {
    ensure_dim("accuracy labels", probabilities.len(), labels.len())?;
    if labels.is_empty() {
        return Err(Lc2stError::InsufficientSamples {
            context: "accuracy",
            required: 1,
            actual: 0,
        });
    }
    let correct = probabilities
        .iter()
        .zip(labels)
        .filter(|(p, y)| predicted_label(**p) == **y)
        .count();
    Ok(correct as f64 / labels.len() as f64)
}

/// Validate a training set and return the per-class counts `(n0, n1)`.
pub(crate) fn check_training_data(
    features: ArrayView2<'_, f64>,
    labels: &[u8],
    min_per_class: usize,
) -> Result<(usize, usize)> {
    ensure_dim("training labels", features.nrows(), labels.len())?;
    if let Some(bad) = labels.iter().find(|&&y| y > 1) {
        return Err(Lc2stError::config(format!("label {bad} is not in {{0, 1}}")));
    }
    let n1 = labels.iter().filter(|&&y| y == 1).count();
    let n0 = labels.len() - n1;
    ensure_samples("class 0 training rows", min_per_class, n0)?;
    ensure_samples("class 1 training rows", min_per_class, n1)?;
    Ok((n0, n1))
}

/// Numerically safe logistic function.
#[must_use]
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Labels for `[population_0; population_1]`.
#[must_use]
pub fn stacked_labels(n0: usize, n1: usize) -> Vec<u8> {
    let mut labels = vec![0_u8; n0];
    labels.resize(n0 + n1, 1);
    labels
}

/// Train a fresh classifier to separate `population_0` (label 0) from
/// `population_1` (label 1).
pub fn train(
    population_0: &SampleSet,
    population_1: &SampleSet,
    config: &ClassifierConfig,
    seed: u64,
) -> Result<Box<dyn Classifier>> {
    ensure_dim("population dimension", population_0.dim(), population_1.dim())?;
    let features = population_0.stack_rows(population_1)?;
    let labels = stacked_labels(population_0.n_samples(), population_1.n_samples());
    let mut classifier = config.build(seed)?;
    classifier.fit(features.view(), &labels)?;
    Ok(classifier)
}

/// Outcome of evaluating a fitted classifier on held-out data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `None` under single-class evaluation.
    pub accuracy: Option<f64>,
    /// Class-0 probabilities for `eval_0` rows, then `eval_1` rows.
    pub probabilities: Vec<f64>,
    /// Ground-truth labels aligned with `probabilities` when both classes were scored.
    pub labels: Option<Vec<u8>>,
}

/// Evaluate on `eval_0` (and `eval_1` when present).
///
/// Without `eval_1` only class-0 probabilities are produced and accuracy is
/// undefined; callers must use a label-free statistic.
pub fn evaluate(
    classifier: &dyn Classifier,
    eval_0: &SampleSet,
    eval_1: Option<&SampleSet>,
) -> Result<Evaluation> {
    match eval_1 {
        None => {
            let proba = classifier.predict_proba(eval_0.view())?;
            Ok(Evaluation {
                accuracy: None,
                probabilities: proba.to_vec(),
                labels: None,
            })
        }
        Some(eval_1) => {
            let features = eval_0.stack_rows(eval_1)?;
            let labels = stacked_labels(eval_0.n_samples(), eval_1.n_samples());
            let proba = classifier.predict_proba(features.view())?.to_vec();
            let acc = accuracy(&proba, &labels)?;
            Ok(Evaluation {
                accuracy: Some(acc),
                probabilities: proba,
                labels: Some(labels),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::gaussian;
    use super::*;

    #[test]
    fn predicted_label_breaks_ties_toward_class_zero() {
        assert_eq!(predicted_label(0.5), 0);
        assert_eq!(predicted_label(0.49), 1);
        assert_eq!(predicted_label(0.9), 0);
    }

    #[test]
    fn accuracy_counts_matches() {
        let acc = accuracy(&[0.9, 0.2, 0.6, 0.4], &[0, 1, 1, 1]).unwrap();
        assert!((acc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn accuracy_rejects_length_mismatch() {
        assert!(matches!(
            accuracy(&[0.9, 0.2], &[0]),
            Err(Lc2stError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn train_rejects_dimension_mismatch() {
        let p = gaussian(20, 3, 0.0, 1);
        let q = gaussian(20, 2, 0.0, 2);
        let err = train(&p, &q, &ClassifierConfig::default(), 0).unwrap_err();
        assert!(matches!(err, Lc2stError::DimensionMismatch { .. }), "{err}");
    }

    #[test]
    fn train_rejects_tiny_class() {
        let p = gaussian(20, 2, 0.0, 1);
        let q = gaussian(1, 2, 0.0, 2);
        let err = train(&p, &q, &ClassifierConfig::default(), 0).unwrap_err();
        assert!(matches!(err, Lc2stError::InsufficientSamples { .. }), "{err}");
    }

    #[test]
    fn single_class_evaluation_has_no_accuracy() {
        let p = gaussian(50, 2, 0.0, 1);
        let q = gaussian(50, 2, 2.0, 2);
        let clf = train(&p, &q, &ClassifierConfig::default(), 0).unwrap();
        let eval = evaluate(clf.as_ref(), &gaussian(10, 2, 0.0, 3), None).unwrap();
        assert!(eval.accuracy.is_none());
        assert!(eval.labels.is_none());
        assert_eq!(eval.probabilities.len(), 10);
    }

    #[test]
    fn two_class_evaluation_separates_shifted_gaussians() {
        let p = gaussian(200, 2, 0.0, 1);
        let q = gaussian(200, 2, 3.0, 2);
        let clf = train(&p, &q, &ClassifierConfig::default(), 0).unwrap();
        let eval = evaluate(
            clf.as_ref(),
            &gaussian(100, 2, 0.0, 3),
            Some(&gaussian(100, 2, 3.0, 4)),
        )
        .unwrap();
        let acc = eval.accuracy.unwrap();
        assert!(acc > 0.9, "accuracy {acc} should reflect a 3-sigma shift");
        assert_eq!(eval.probabilities.len(), 200);
        assert!(eval.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
