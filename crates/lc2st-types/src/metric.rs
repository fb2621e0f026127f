//! Closed set of classifier-based test statistics.

use std::fmt;
use std::str::FromStr;

use lc2st_error::{Lc2stError, Result};
use serde::{Deserialize, Serialize};

/// Which direction of a statistic counts as evidence against H0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Larger values are more extreme under H1.
    LargerRejects,
    /// Smaller values are more extreme under H1.
    SmallerRejects,
}

impl Orientation {
    /// Map a raw statistic onto the "larger rejects" scale used by p-values.
    #[must_use]
    pub fn orient(self, value: f64) -> f64 {
        match self {
            Self::LargerRejects => value,
            Self::SmallerRejects => -value,
        }
    }
}

/// A named scalar summary of classifier output.
///
/// All statistics are computed from predicted class-0 probabilities `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Fraction of correct predictions at threshold 0.5. Needs labels.
    Accuracy,
    /// `mean |p - 0.5|`.
    #[serde(alias = "div")]
    Divergence,
    /// `mean (p - 0.5)^2`.
    #[serde(alias = "mse")]
    Regression,
    /// `mean p`.
    ProbasMean,
    /// Population standard deviation of `p`.
    ProbasStd,
}

impl MetricKind {
    pub const ALL: [Self; 5] = [
        Self::Accuracy,
        Self::Divergence,
        Self::Regression,
        Self::ProbasMean,
        Self::ProbasStd,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Divergence => "divergence",
            Self::Regression => "regression",
            Self::ProbasMean => "probas_mean",
            Self::ProbasStd => "probas_std",
        }
    }

    /// Whether ground-truth labels of both classes are needed.
    #[must_use]
    pub const fn requires_labels(self) -> bool {
        matches!(self, Self::Accuracy)
    }

    /// Every statistic here grows as the classifier separates the classes
    /// better, so all of them reject on large values. Regression is kept on
    /// its raw scale with no additive offset.
    #[must_use]
    pub const fn orientation(self) -> Orientation {
        match self {
            Self::Accuracy
            | Self::Divergence
            | Self::Regression
            | Self::ProbasMean
            | Self::ProbasStd => Orientation::LargerRejects,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = Lc2stError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "accuracy" => Ok(Self::Accuracy),
            "div" | "divergence" => Ok(Self::Divergence),
            "mse" | "regression" => Ok(Self::Regression),
            "probas_mean" => Ok(Self::ProbasMean),
            "probas_std" => Ok(Self::ProbasStd),
            other => Err(Lc2stError::config(format!("unknown metric name `{other}`"))),
        }
    }
}

/// Parse metric names, dropping duplicates while keeping first-seen order.
pub fn parse_metrics<S: AsRef<str>>(names: &[S]) -> Result<Vec<MetricKind>> {
    if names.is_empty() {
        return Err(Lc2stError::config("at least one metric is required"));
    }
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let kind: MetricKind = name.as_ref().parse()?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("div".parse::<MetricKind>().unwrap(), MetricKind::Divergence);
        assert_eq!("mse".parse::<MetricKind>().unwrap(), MetricKind::Regression);
        assert_eq!(
            "accuracy".parse::<MetricKind>().unwrap(),
            MetricKind::Accuracy
        );
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let err = parse_metrics(&["accuracy", "w_dist"]).unwrap_err();
        assert!(matches!(err, Lc2stError::Configuration(_)), "{err}");
    }

    #[test]
    fn parse_metrics_dedups_in_order() {
        let kinds = parse_metrics(&["mse", "accuracy", "regression"]).unwrap();
        assert_eq!(kinds, vec![MetricKind::Regression, MetricKind::Accuracy]);
    }

    #[test]
    fn name_roundtrips_through_from_str() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.name().parse::<MetricKind>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_accepts_short_aliases() {
        let kinds: Vec<MetricKind> =
            serde_json::from_str(r#"["div","mse","probas_mean"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![
                MetricKind::Divergence,
                MetricKind::Regression,
                MetricKind::ProbasMean
            ]
        );
    }

    #[test]
    fn orientation_negates_smaller_rejects() {
        assert_eq!(Orientation::LargerRejects.orient(0.3), 0.3);
        assert_eq!(Orientation::SmallerRejects.orient(0.3), -0.3);
        assert!(!MetricKind::Divergence.requires_labels());
        assert!(MetricKind::Accuracy.requires_labels());
    }
}
