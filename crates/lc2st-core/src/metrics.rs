//! Metric layer: probabilities (and labels) to named scalar statistics.

use std::collections::BTreeMap;

use lc2st_classifier::accuracy;
use lc2st_error::{Lc2stError, Result, ensure_dim};
use lc2st_types::MetricKind;

use crate::stats::{mean, population_std};

/// Named statistic values, ordered by metric.
pub type MetricValues = BTreeMap<MetricKind, f64>;

/// Compute one statistic from class-0 probabilities.
///
/// `labels` must be present for [`MetricKind::Accuracy`] and, when present,
/// match `probabilities` in length.
pub fn compute_metric(
    kind: MetricKind,
    probabilities: &[f64],
    labels: Option<&[u8]>,
) -> Result<f64> {
    if let Some(labels) = labels {
        ensure_dim("metric labels", probabilities.len(), labels.len())?;
    }
    if probabilities.is_empty() {
        return Err(Lc2stError::InsufficientSamples {
            context: "metric probabilities",
            required: 1,
            actual: 0,
        });
    }
    let value = match kind {
        MetricKind::Accuracy => {
            let labels = labels.ok_or_else(|| {
                Lc2stError::config("accuracy needs labels; disable single_class_eval")
            })?;
            accuracy(probabilities, labels)?
        }
        MetricKind::Divergence => {
            probabilities.iter().map(|p| (p - 0.5).abs()).sum::<f64>() / probabilities.len() as f64
        }
        MetricKind::Regression => {
            probabilities.iter().map(|p| (p - 0.5).powi(2)).sum::<f64>()
                / probabilities.len() as f64
        }
        MetricKind::ProbasMean => mean(probabilities).unwrap_or(0.5),
        MetricKind::ProbasStd => population_std(probabilities).unwrap_or(0.0),
    };
    Ok(value)
}

/// Compute every requested statistic over the same probabilities.
pub fn compute_metrics(
    kinds: &[MetricKind],
    probabilities: &[f64],
    labels: Option<&[u8]>,
) -> Result<MetricValues> {
    kinds
        .iter()
        .map(|&kind| compute_metric(kind, probabilities, labels).map(|v| (kind, v)))
        .collect()
}

/// Fail with `DimensionMismatch` unless `probabilities` has `expected` entries.
pub fn check_probabilities(expected: usize, probabilities: &[f64]) -> Result<()> {
    ensure_dim("probability count", expected, probabilities.len())
}

/// Reject label-dependent metrics under single-class evaluation.
pub fn check_metrics_for_eval(kinds: &[MetricKind], single_class_eval: bool) -> Result<()> {
    if kinds.is_empty() {
        return Err(Lc2stError::config("at least one metric is required"));
    }
    if single_class_eval {
        if let Some(kind) = kinds.iter().find(|k| k.requires_labels()) {
            return Err(Lc2stError::config(format!(
                "metric `{kind}` needs both classes at evaluation; set single_class_eval = false"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_free_metrics() {
        let p = [0.5, 0.7, 0.3, 1.0];
        let div = compute_metric(MetricKind::Divergence, &p, None).unwrap();
        assert!((div - 0.225).abs() < 1e-12);
        let mse = compute_metric(MetricKind::Regression, &p, None).unwrap();
        assert!((mse - (0.04 + 0.04 + 0.25) / 4.0).abs() < 1e-12);
        let m = compute_metric(MetricKind::ProbasMean, &p, None).unwrap();
        assert!((m - 0.625).abs() < 1e-12);
    }

    #[test]
    fn chance_level_probabilities_give_zero_divergence() {
        let p = vec![0.5; 16];
        for kind in [MetricKind::Divergence, MetricKind::Regression, MetricKind::ProbasStd] {
            assert_eq!(compute_metric(kind, &p, None).unwrap(), 0.0, "{kind}");
        }
    }

    #[test]
    fn accuracy_needs_labels() {
        let err = compute_metric(MetricKind::Accuracy, &[0.9], None).unwrap_err();
        assert!(matches!(err, Lc2stError::Configuration(_)));
        let acc = compute_metric(MetricKind::Accuracy, &[0.9, 0.1], Some(&[0, 1])).unwrap();
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn label_length_mismatch_is_dimension_error() {
        let err = compute_metrics(&[MetricKind::Divergence], &[0.2, 0.3], Some(&[0])).unwrap_err();
        assert!(matches!(err, Lc2stError::DimensionMismatch { .. }));
        assert!(check_probabilities(3, &[0.1, 0.2]).is_err());
    }

    #[test]
    fn single_class_eval_rejects_accuracy() {
        assert!(check_metrics_for_eval(&[MetricKind::Accuracy], true).is_err());
        assert!(check_metrics_for_eval(&[MetricKind::Accuracy], false).is_ok());
        assert!(check_metrics_for_eval(&[MetricKind::Divergence], true).is_ok());
        assert!(check_metrics_for_eval(&[], false).is_err());
    }
}
