//! Multi-layer perceptron: ReLU hidden layers, a single sigmoid output unit,
//! binary cross-entropy loss and Adam updates over shuffled minibatches.

use lc2st_error::{Lc2stError, Result, ensure_dim};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::{Classifier, MlpConfig, check_training_data, sigmoid};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
/// Clamp for probabilities inside the log loss.
const LOSS_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Dense {
    /// Glorot-uniform initialization.
    fn init(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit)),
            bias: Array1::from_shape_fn(fan_out, |_| rng.gen_range(-limit..limit)),
        }
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

/// First and second moment estimates for one layer.
#[derive(Debug, Clone)]
struct AdamState {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl AdamState {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            m_w: Array2::zeros(layer.weights.raw_dim()),
            v_w: Array2::zeros(layer.weights.raw_dim()),
            m_b: Array1::zeros(layer.bias.raw_dim()),
            v_b: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MlpClassifier {
    config: MlpConfig,
    seed: u64,
    layers: Vec<Dense>,
    n_features: Option<usize>,
    epochs_run: usize,
    final_loss: f64,
}

impl MlpClassifier {
    #[must_use]
    pub const fn new(config: MlpConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            layers: Vec::new(),
            n_features: None,
            epochs_run: 0,
            final_loss: f64::NAN,
        }
    }

    #[must_use]
    pub const fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    /// Mean training loss of the last completed epoch.
    #[must_use]
    pub const fn final_loss(&self) -> f64 {
        self.final_loss
    }

    /// Activations of every layer; the last entry holds the output logits.
    fn forward_all(&self, input: Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input);
        for (k, layer) in self.layers.iter().enumerate() {
            let mut z = layer.forward(&activations[k]);
            if k + 1 < self.layers.len() {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activations.push(z);
        }
        activations
    }

    /// One Adam step on a minibatch; returns the batch's summed log loss.
    fn train_batch(
        &mut self,
        batch_x: Array2<f64>,
        batch_y: &Array1<f64>,
        adam: &mut [AdamState],
        step: i32,
    ) -> f64 {
        let n = batch_x.nrows() as f64;
        let activations = self.forward_all(batch_x);
        let logits = activations[self.layers.len()].column(0).to_owned();
        let p1 = logits.mapv(sigmoid);

        let loss: f64 = p1
            .iter()
            .zip(batch_y)
            .map(|(&p, &y)| {
                let p = p.clamp(LOSS_EPS, 1.0 - LOSS_EPS);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum();

        // d(loss)/d(logit) for sigmoid + cross-entropy, averaged over the batch.
        let mut delta = (&p1 - batch_y).insert_axis(Axis(1)) / n;
        let lr = self.config.learning_rate;
        let l2 = self.config.l2;
        let correction1 = 1.0 - ADAM_BETA1.powi(step);
        let correction2 = 1.0 - ADAM_BETA2.powi(step);

        for k in (0..self.layers.len()).rev() {
            let input = &activations[k];
            let mut grad_w = input.t().dot(&delta);
            if l2 > 0.0 {
                grad_w.scaled_add(l2 / n, &self.layers[k].weights);
            }
            let grad_b = delta.sum_axis(Axis(0));

            if k > 0 {
                let mut back = delta.dot(&self.layers[k].weights.t());
                back.zip_mut_with(input, |g, &a| {
                    if a <= 0.0 {
                        *g = 0.0;
                    }
                });
                delta = back;
            }

            let state = &mut adam[k];
            let layer = &mut self.layers[k];
            let corrections = (correction1, correction2);
            adam_update(
                &mut layer.weights,
                &grad_w,
                &mut state.m_w,
                &mut state.v_w,
                lr,
                corrections,
            );
            adam_update(&mut layer.bias, &grad_b, &mut state.m_b, &mut state.v_b, lr, corrections);
        }
        loss
    }
}

fn adam_update<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    lr: f64,
    (correction1, correction2): (f64, f64),
) {
    ndarray::Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
        });
}

impl Classifier for MlpClassifier {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<()> {
        let (n0, n1) = check_training_data(features, labels, self.min_samples_per_class())?;
        let n = n0 + n1;
        let d = features.ncols();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut widths = Vec::with_capacity(self.config.hidden_layers.len() + 2);
        widths.push(d);
        widths.extend_from_slice(&self.config.hidden_layers);
        widths.push(1);
        self.layers = widths
            .windows(2)
            .map(|w| Dense::init(w[0], w[1], &mut rng))
            .collect();
        self.n_features = Some(d);
        let mut adam: Vec<AdamState> = self.layers.iter().map(AdamState::zeros_like).collect();

        let targets: Array1<f64> = labels.iter().map(|&y| f64::from(y)).collect();
        let batch_size = self.config.batch_size.min(n);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0_usize;
        let mut step = 0_i32;
        self.epochs_run = 0;

        for epoch in 1..=self.config.max_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch_size) {
                let batch_x = features.select(Axis(0), chunk);
                let batch_y = targets.select(Axis(0), chunk);
                step = step.saturating_add(1);
                epoch_loss += self.train_batch(batch_x, &batch_y, &mut adam, step);
            }
            epoch_loss /= n as f64;
            self.epochs_run = epoch;
            self.final_loss = epoch_loss;

            if !epoch_loss.is_finite() {
                return Err(Lc2stError::fit_failure(format!(
                    "mlp loss became non-finite at epoch {epoch}"
                )));
            }
            if epoch_loss > best_loss - self.config.tolerance {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);
            if no_improvement > self.config.n_iter_no_change {
                debug!(epoch, loss = epoch_loss, "mlp training stalled; stopping");
                break;
            }
        }

        if self.epochs_run == self.config.max_epochs
            && no_improvement <= self.config.n_iter_no_change
        {
            warn!(
                max_epochs = self.config.max_epochs,
                loss = self.final_loss,
                "mlp reached max_epochs before the loss settled"
            );
        }
        debug!(n0, n1, epochs = self.epochs_run, loss = self.final_loss, "fitted mlp");
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let expected = self
            .n_features
            .ok_or_else(|| Lc2stError::config("mlp used before fit"))?;
        ensure_dim("mlp feature dimension", expected, features.ncols())?;
        let activations = self.forward_all(features.to_owned());
        let logits = activations[self.layers.len()].column(0).to_owned();
        Ok(logits.mapv(|z| sigmoid(-z)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacked_labels;
    use crate::test_support::gaussian;

    fn small_config() -> MlpConfig {
        MlpConfig {
            hidden_layers: vec![16],
            learning_rate: 1e-2,
            max_epochs: 150,
            batch_size: 64,
            ..MlpConfig::default()
        }
    }

    fn training_set(shift: f64) -> (Array2<f64>, Vec<u8>) {
        let p = gaussian(200, 2, 0.0, 11);
        let q = gaussian(200, 2, shift, 12);
        (p.stack_rows(&q).unwrap().into_inner(), stacked_labels(200, 200))
    }

    #[test]
    fn learns_shifted_gaussians() {
        let (x, y) = training_set(2.5);
        let mut clf = MlpClassifier::new(small_config(), 5);
        clf.fit(x.view(), &y).unwrap();
        let acc = clf.score(x.view(), &y).unwrap();
        assert!(acc > 0.85, "training accuracy {acc}");
        assert!(clf.final_loss().is_finite());
    }

    #[test]
    fn same_seed_same_predictions() {
        let (x, y) = training_set(1.0);
        let mut a = MlpClassifier::new(small_config(), 77);
        let mut b = MlpClassifier::new(small_config(), 77);
        a.fit(x.view(), &y).unwrap();
        b.fit(x.view(), &y).unwrap();
        assert_eq!(
            a.predict_proba(x.view()).unwrap(),
            b.predict_proba(x.view()).unwrap()
        );
    }

    #[test]
    fn different_seeds_differ() {
        let (x, y) = training_set(1.0);
        let mut a = MlpClassifier::new(small_config(), 1);
        let mut b = MlpClassifier::new(small_config(), 2);
        a.fit(x.view(), &y).unwrap();
        b.fit(x.view(), &y).unwrap();
        assert_ne!(
            a.predict_proba(x.view()).unwrap(),
            b.predict_proba(x.view()).unwrap()
        );
    }

    #[test]
    fn predict_checks_feature_dimension() {
        let (x, y) = training_set(1.0);
        let mut clf = MlpClassifier::new(small_config(), 9);
        clf.fit(x.view(), &y).unwrap();
        assert!(matches!(
            clf.predict_proba(Array2::zeros((1, 3)).view()),
            Err(Lc2stError::DimensionMismatch { .. })
        ));
    }
}
