//! L2-regularized logistic regression fitted with iteratively reweighted
//! least squares.

use lc2st_error::{Lc2stError, Result, ensure_dim};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView2};
use tracing::{debug, warn};

use crate::{Classifier, LogisticConfig, check_training_data, sigmoid};

/// Floor on IRLS weights so the Hessian stays well conditioned under separation.
const MIN_WEIGHT: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    config: LogisticConfig,
    /// `[intercept, w_1, ..., w_d]`, log-odds of class 1.
    coef: Option<DVector<f64>>,
    iterations: usize,
}

impl LogisticRegression {
    #[must_use]
    pub const fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            coef: None,
            iterations: 0,
        }
    }

    /// Newton iterations used by the last `fit`.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    fn design(features: ArrayView2<'_, f64>) -> DMatrix<f64> {
        let (n, d) = features.dim();
        DMatrix::from_fn(n, d + 1, |i, j| if j == 0 { 1.0 } else { features[(i, j - 1)] })
    }
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn min_samples_per_class(&self) -> usize {
        1
    }

    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<()> {
        let (n0, n1) = check_training_data(features, labels, self.min_samples_per_class())?;
        let x = Self::design(features);
        let y = DVector::from_iterator(labels.len(), labels.iter().map(|&l| f64::from(l)));
        let p = x.ncols();

        let mut beta = DVector::<f64>::zeros(p);
        beta[0] = (n1 as f64 / n0 as f64).ln();

        let mut converged = false;
        for iter in 1..=self.config.max_iter {
            let eta = &x * &beta;
            let mu = eta.map(sigmoid);
            let w = mu.map(|m| (m * (1.0 - m)).max(MIN_WEIGHT));

            let mut gradient = x.transpose() * (&y - &mu);
            let mut hessian = DMatrix::<f64>::zeros(p, p);
            for (i, row) in x.row_iter().enumerate() {
                hessian.ger(w[i], &row.transpose(), &row.transpose(), 1.0);
            }
            for j in 1..p {
                gradient[j] -= self.config.l2 * beta[j];
                hessian[(j, j)] += self.config.l2;
            }

            let chol = hessian.cholesky().ok_or_else(|| {
                Lc2stError::fit_failure(format!("singular Hessian at iteration {iter}"))
            })?;
            let step = chol.solve(&gradient);
            beta += &step;

            if beta.iter().any(|b| !b.is_finite()) {
                return Err(Lc2stError::fit_failure(format!(
                    "coefficients diverged at iteration {iter}"
                )));
            }
            self.iterations = iter;
            if step.amax() < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(max_iter = self.config.max_iter, "logistic regression did not converge");
            return Err(Lc2stError::fit_failure(format!(
                "logistic regression did not converge in {} iterations",
                self.config.max_iter
            )));
        }
        debug!(n0, n1, iterations = self.iterations, "fitted logistic regression");
        self.coef = Some(beta);
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let coef = self
            .coef
            .as_ref()
            .ok_or_else(|| Lc2stError::config("logistic regression used before fit"))?;
        ensure_dim("logistic feature dimension", coef.len() - 1, features.ncols())?;
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let z = coef[0]
                    + row
                        .iter()
                        .zip(coef.iter().skip(1))
                        .map(|(x, w)| x * w)
                        .sum::<f64>();
                sigmoid(-z)
            })
            .collect())
    }
}
