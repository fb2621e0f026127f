//! Configuration-time classifier selection.

use lc2st_error::{Lc2stError, Result};
use serde::{Deserialize, Serialize};

use crate::{Classifier, LinearDiscriminant, LogisticRegression, MlpClassifier};

/// Which classifier family to build, with its hyperparameters.
///
/// Serialized with an internal `kind` tag:
/// `{"kind": "mlp", "hidden_layers": [64, 64], ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierConfig {
    LinearDiscriminant(LdaConfig),
    Logistic(LogisticConfig),
    Mlp(MlpConfig),
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::LinearDiscriminant(LdaConfig::default())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::LinearDiscriminant(cfg) => cfg.validate(),
            Self::Logistic(cfg) => cfg.validate(),
            Self::Mlp(cfg) => cfg.validate(),
        }
    }

    /// Construct a fresh, unfitted classifier owned by one work unit.
    pub fn build(&self, seed: u64) -> Result<Box<dyn Classifier>> {
        self.validate()?;
        Ok(match self {
            Self::LinearDiscriminant(cfg) => Box::new(LinearDiscriminant::new(cfg.clone())),
            Self::Logistic(cfg) => Box::new(LogisticRegression::new(cfg.clone())),
            Self::Mlp(cfg) => Box::new(MlpClassifier::new(cfg.clone(), seed)),
        })
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LinearDiscriminant(_) => "linear_discriminant",
            Self::Logistic(_) => "logistic",
            Self::Mlp(_) => "mlp",
        }
    }
}

/// Linear discriminant analysis with a shared covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdaConfig {
    /// Shrinkage of the pooled covariance toward `trace/d * I`, in `[0, 1]`.
    pub shrinkage: f64,
}

impl Default for LdaConfig {
    fn default() -> Self {
        Self { shrinkage: 0.0 }
    }
}

impl LdaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.shrinkage) {
            return Err(Lc2stError::fit_failure(format!(
                "lda shrinkage must be in [0, 1], got {}",
                self.shrinkage
            )));
        }
        Ok(())
    }
}

/// L2-regularized logistic regression fitted by Newton iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// Penalty weight on the coefficients (the intercept is not penalized).
    pub l2: f64,
    pub max_iter: usize,
    /// Convergence threshold on the largest Newton step component.
    pub tolerance: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }
}

impl LogisticConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(Lc2stError::fit_failure(format!(
                "logistic l2 must be finite and >= 0, got {}",
                self.l2
            )));
        }
        if self.max_iter == 0 {
            return Err(Lc2stError::fit_failure("logistic max_iter must be > 0"));
        }
        if !(self.tolerance > 0.0) {
            return Err(Lc2stError::fit_failure("logistic tolerance must be > 0"));
        }
        Ok(())
    }
}

/// Feed-forward ReLU network with a sigmoid output, trained with Adam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub batch_size: usize,
    pub l2: f64,
    /// Stop after this many epochs without a `tolerance` improvement in loss.
    pub n_iter_no_change: usize,
    pub tolerance: f64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            learning_rate: 1e-3,
            max_epochs: 200,
            batch_size: 200,
            l2: 0.0,
            n_iter_no_change: 10,
            tolerance: 1e-4,
        }
    }
}

impl MlpConfig {
    /// Two hidden layers of `10 * input_dim` units each.
    #[must_use]
    pub fn scaled_to_input(input_dim: usize) -> Self {
        Self {
            hidden_layers: vec![10 * input_dim, 10 * input_dim],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_layers.is_empty() || self.hidden_layers.contains(&0) {
            return Err(Lc2stError::fit_failure(
                "mlp hidden_layers must be non-empty with positive widths",
            ));
        }
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(Lc2stError::fit_failure("mlp learning_rate must be finite and > 0"));
        }
        if self.max_epochs == 0 || self.batch_size == 0 {
            return Err(Lc2stError::fit_failure("mlp max_epochs and batch_size must be > 0"));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(Lc2stError::fit_failure("mlp l2 must be finite and >= 0"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Lc2stError::fit_failure("mlp tolerance must be finite and >= 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json_roundtrip() {
        let cfg = ClassifierConfig::Mlp(MlpConfig::scaled_to_input(3));
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""kind":"mlp""#), "{json}");
        let back: ClassifierConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ClassifierConfig = serde_json::from_str(r#"{"kind":"logistic"}"#).unwrap();
        assert_eq!(cfg, ClassifierConfig::Logistic(LogisticConfig::default()));
    }

    #[test]
    fn invalid_hyperparameters_fail_at_build() {
        let cfg = ClassifierConfig::Mlp(MlpConfig {
            hidden_layers: vec![],
            ..MlpConfig::default()
        });
        assert!(matches!(cfg.build(0), Err(Lc2stError::ClassifierFitFailure(_))));

        let cfg = ClassifierConfig::LinearDiscriminant(LdaConfig { shrinkage: 1.5 });
        assert!(matches!(cfg.validate(), Err(Lc2stError::ClassifierFitFailure(_))));

        let cfg = ClassifierConfig::Logistic(LogisticConfig {
            max_iter: 0,
            ..LogisticConfig::default()
        });
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), lc2st_error::ErrorKind::ClassifierFitFailure);
        assert!(err.to_string().contains("max_iter"), "{err}");
    }

    #[test]
    fn invalid_hyperparameters_surface_from_train() {
        let p = lc2st_types::SampleSet::new(ndarray::Array2::zeros((4, 2))).unwrap();
        let cfg = ClassifierConfig::Mlp(MlpConfig {
            learning_rate: 0.0,
            ..MlpConfig::default()
        });
        assert!(matches!(
            crate::train(&p, &p, &cfg, 0),
            Err(Lc2stError::ClassifierFitFailure(_))
        ));
    }
}
