//! Error taxonomy for classifier two-sample testing.
//!
//! Two families of failure exist:
//!
//! - **Invocation errors** (`DimensionMismatch`, `Configuration`) indicate
//!   caller misuse. They abort the whole test invocation.
//! - **Unit errors** (`ClassifierFitFailure`, `InsufficientSamples`) are tied
//!   to a single fold, ensemble member or null trial. Orchestrators record them
//!   and exclude the unit from aggregation instead of aborting.
//!
//! A degenerate null distribution is not an error at all; it is reported as a
//! warning next to the p-value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Lc2stError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Lc2stError {
    /// Feature, conditioning or probability dimensions disagree.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A fold, trial or population is too small for the classifier.
    #[error("insufficient samples for {context}: need at least {required}, got {actual}")]
    InsufficientSamples {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    /// The optimizer did not converge, the system was singular, or the
    /// hyperparameters are invalid.
    #[error("classifier fit failed: {0}")]
    ClassifierFitFailure(String),

    /// Unknown metric, invalid grid, fold count larger than the sample count, ...
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification of an error, used when serializing exclusion records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DimensionMismatch,
    InsufficientSamples,
    ClassifierFitFailure,
    Configuration,
}

impl Lc2stError {
    /// Build a `Configuration` error from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Build a `ClassifierFitFailure` from any displayable message.
    pub fn fit_failure(message: impl Into<String>) -> Self {
        Self::ClassifierFitFailure(message.into())
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::InsufficientSamples { .. } => ErrorKind::InsufficientSamples,
            Self::ClassifierFitFailure(_) => ErrorKind::ClassifierFitFailure,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether this error is scoped to a single work unit.
    ///
    /// Unit-scoped errors exclude the unit from aggregation; all others abort
    /// the invocation.
    #[must_use]
    pub const fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            Self::ClassifierFitFailure(_) | Self::InsufficientSamples { .. }
        )
    }
}

/// Fail with `DimensionMismatch` unless `actual == expected`.
pub fn ensure_dim(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Lc2stError::DimensionMismatch {
            context,
            expected,
            actual,
        })
    }
}

/// Fail with `InsufficientSamples` unless `actual >= required`.
pub fn ensure_samples(context: &'static str, required: usize, actual: usize) -> Result<()> {
    if actual >= required {
        Ok(())
    } else {
        Err(Lc2stError::InsufficientSamples {
            context,
            required,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scoped_classification() {
        assert!(Lc2stError::fit_failure("singular").is_unit_scoped());
        assert!(
            Lc2stError::InsufficientSamples {
                context: "fold",
                required: 2,
                actual: 1
            }
            .is_unit_scoped()
        );
        assert!(!Lc2stError::config("bad grid").is_unit_scoped());
        assert!(
            !Lc2stError::DimensionMismatch {
                context: "x_eval",
                expected: 2,
                actual: 3
            }
            .is_unit_scoped()
        );
    }

    #[test]
    fn ensure_helpers() {
        assert!(ensure_dim("probabilities", 4, 4).is_ok());
        assert_eq!(
            ensure_dim("probabilities", 4, 3).unwrap_err().kind(),
            ErrorKind::DimensionMismatch
        );
        assert!(ensure_samples("fold", 2, 2).is_ok());
        assert_eq!(
            ensure_samples("fold", 2, 1).unwrap_err().kind(),
            ErrorKind::InsufficientSamples
        );
    }

    #[test]
    fn display_mentions_context() {
        let err = Lc2stError::DimensionMismatch {
            context: "x_eval",
            expected: 2,
            actual: 3,
        };
        let text = err.to_string();
        assert!(text.contains("x_eval"), "unexpected message: {text}");
        assert!(text.contains("expected 2"), "unexpected message: {text}");
    }
}
