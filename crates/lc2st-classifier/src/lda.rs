//! Linear discriminant analysis with a pooled covariance.

use lc2st_error::{Lc2stError, Result, ensure_dim};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView2};
use tracing::debug;

use crate::{Classifier, LdaConfig, check_training_data, sigmoid};

/// Diagonal jitter added before factorization, relative to the mean variance.
const RIDGE: f64 = 1e-9;

#[derive(Debug, Clone)]
struct LdaModel {
    weights: DVector<f64>,
    bias: f64,
}

/// Two-class LDA. The decision function is `z = w.x + b` with
/// `w = S^-1 (mu_1 - mu_0)` and the class-prior log ratio folded into `b`.
#[derive(Debug, Clone)]
pub struct LinearDiscriminant {
    config: LdaConfig,
    model: Option<LdaModel>,
}

impl LinearDiscriminant {
    #[must_use]
    pub const fn new(config: LdaConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    /// Number of features seen during `fit`, if fitted.
    #[must_use]
    pub fn n_features(&self) -> Option<usize> {
        self.model.as_ref().map(|m| m.weights.len())
    }
}

impl Classifier for LinearDiscriminant {
    fn name(&self) -> &'static str {
        "linear_discriminant"
    }

    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<()> {
        let (n0, n1) = check_training_data(features, labels, self.min_samples_per_class())?;
        let d = features.ncols();

        let mut mu0 = DVector::<f64>::zeros(d);
        let mut mu1 = DVector::<f64>::zeros(d);
        for (row, &y) in features.rows().into_iter().zip(labels) {
            let target = if y == 0 { &mut mu0 } else { &mut mu1 };
            for (j, v) in row.iter().enumerate() {
                target[j] += v;
            }
        }
        mu0 /= n0 as f64;
        mu1 /= n1 as f64;

        let mut cov = DMatrix::<f64>::zeros(d, d);
        let mut centered = DVector::<f64>::zeros(d);
        for (row, &y) in features.rows().into_iter().zip(labels) {
            let mu = if y == 0 { &mu0 } else { &mu1 };
            for j in 0..d {
                centered[j] = row[j] - mu[j];
            }
            cov.ger(1.0, &centered, &centered, 1.0);
        }
        cov /= (n0 + n1 - 2).max(1) as f64;

        let mean_var = cov.trace() / d as f64;
        if self.config.shrinkage > 0.0 {
            cov *= 1.0 - self.config.shrinkage;
            for j in 0..d {
                cov[(j, j)] += self.config.shrinkage * mean_var;
            }
        }
        let jitter = RIDGE * mean_var.max(1.0);
        for j in 0..d {
            cov[(j, j)] += jitter;
        }

        let chol = cov.cholesky().ok_or_else(|| {
            Lc2stError::fit_failure("pooled covariance is not positive definite")
        })?;
        let diff = &mu1 - &mu0;
        let weights = chol.solve(&diff);
        let midpoint = (&mu0 + &mu1) * 0.5;
        let bias = -weights.dot(&midpoint) + (n1 as f64 / n0 as f64).ln();

        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(Lc2stError::fit_failure("non-finite discriminant coefficients"));
        }
        debug!(n0, n1, dim = d, "fitted linear discriminant");
        self.model = Some(LdaModel { weights, bias });
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Lc2stError::config("linear discriminant used before fit"))?;
        ensure_dim("lda feature dimension", model.weights.len(), features.ncols())?;
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let z = row
                    .iter()
                    .zip(model.weights.iter())
                    .map(|(x, w)| x * w)
                    .sum::<f64>()
                    + model.bias;
                // z is the log-odds of class 1.
                sigmoid(-z)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacked_labels;
    use crate::test_support::gaussian;
    use ndarray::{Array2, array};

    fn fitted(shift: f64, seed: u64) -> LinearDiscriminant {
        let p = gaussian(300, 2, 0.0, seed);
        let q = gaussian(300, 2, shift, seed + 1);
        let x = p.stack_rows(&q).unwrap();
        let mut lda = LinearDiscriminant::new(LdaConfig::default());
        lda.fit(x.view(), &stacked_labels(300, 300)).unwrap();
        lda
    }

    #[test]
    fn predicts_class_zero_near_mu0() {
        let lda = fitted(4.0, 10);
        let proba = lda.predict_proba(array![[0.0, 0.0], [4.0, 4.0]].view()).unwrap();
        assert!(proba[0] > 0.95, "p0 at mu0 was {}", proba[0]);
        assert!(proba[1] < 0.05, "p0 at mu1 was {}", proba[1]);
    }

    #[test]
    fn identical_populations_stay_near_half() {
        let lda = fitted(0.0, 20);
        let grid_points = gaussian(200, 2, 0.0, 99);
        let proba = lda.predict_proba(grid_points.view()).unwrap();
        let mean = proba.mean().unwrap();
        assert!((mean - 0.5).abs() < 0.1, "mean p0 {mean}");
    }

    #[test]
    fn predict_checks_feature_dimension() {
        let lda = fitted(1.0, 30);
        assert_eq!(lda.n_features(), Some(2));
        let err = lda.predict_proba(Array2::zeros((3, 5)).view()).unwrap_err();
        assert!(matches!(err, Lc2stError::DimensionMismatch { .. }));
    }

    #[test]
    fn constant_features_are_regularized() {
        // Zero within-class variance in the second column.
        let x = array![[0.0, 1.0], [0.1, 1.0], [0.2, 1.0], [1.0, 1.0], [1.1, 1.0], [1.2, 1.0]];
        let mut lda = LinearDiscriminant::new(LdaConfig { shrinkage: 0.1 });
        lda.fit(x.view(), &stacked_labels(3, 3)).unwrap();
        let proba = lda.predict_proba(x.view()).unwrap();
        assert!(proba.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p)));
    }

    #[test]
    fn unfitted_model_is_a_configuration_error() {
        let lda = LinearDiscriminant::new(LdaConfig::default());
        assert!(matches!(
            lda.predict_proba(Array2::zeros((1, 2)).view()),
            Err(Lc2stError::Configuration(_))
        ));
    }
}
