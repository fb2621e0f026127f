//! Statistical scenarios with known answers.
//!
//! Each runner draws fresh populations from the Gaussian reference
//! simulators, runs the tests repeatedly and returns the raw per-run outcomes
//! so callers can check type-I error, power and uniformity of p-values.

use std::collections::BTreeMap;

use lc2st_classifier::ClassifierConfig;
use lc2st_core::c2st::{C2stConfig, c2st_scores};
use lc2st_core::calibration::pp_vals;
use lc2st_core::lc2st::{Lc2stConfig, LocalData, LocalEval};
use lc2st_core::null::{
    HtestReport, LocalNull, NullWarning, empirical_rejection_rate, run_c2st_test, run_lc2st_test,
};
use lc2st_error::{Lc2stError, Result};
use lc2st_types::{AlphaGrid, ConditioningValue, MetricKind, SampleSet, SeedTaxonomy, unit_seed};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::DIAG_ID;
use crate::simulator::{LinearGaussian, isotropic_gaussian};

pub const POWER_SWEEP_SCOPE: &str = "power_sweep";
pub const NULL_ACCURACY_SCOPE: &str = "null_accuracy";
pub const LOCAL_NULL_SCOPE: &str = "local_null";

/// Held-out accuracy of a two-class C2ST between two samples of
/// `N(0, I_dim)`, one value per repeat.
pub fn null_accuracy_study(
    dim: usize,
    n: usize,
    n_folds: usize,
    repeats: usize,
    classifier: &ClassifierConfig,
    seed: u64,
) -> Result<Vec<f64>> {
    let stream = SeedTaxonomy::derive(seed, NULL_ACCURACY_SCOPE).reference;
    let config = C2stConfig {
        n_folds,
        metrics: vec![MetricKind::Accuracy],
        single_class_eval: false,
        classifier: classifier.clone(),
        seed,
    };
    config.validate()?;
    let accuracies = (0..repeats)
        .into_par_iter()
        .map(|r| {
            let root = unit_seed(stream, r as u64);
            let p = isotropic_gaussian(n, dim, 0.0, unit_seed(root, 0))?;
            let q = isotropic_gaussian(n, dim, 0.0, unit_seed(root, 1))?;
            let run_config = C2stConfig {
                seed: root,
                ..config.clone()
            };
            let scores = c2st_scores(&p, &q, &run_config)?;
            Ok(scores.statistic(MetricKind::Accuracy))
        })
        .collect::<Result<Vec<Option<f64>>>>()?;
    Ok(accuracies.into_iter().flatten().collect())
}

/// Largest `|PP(alpha) - alpha|` over a `grid_points` grid on `[0, 1)` for
/// `n` uniform PIT values.
pub fn uniform_pit_deviation(n: usize, grid_points: usize, seed: u64) -> Result<f64> {
    let grid = AlphaGrid::half_open_unit(grid_points)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let pit: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>()).collect();
    Ok(pp_vals(&pit, &grid)?.max_deviation_from_identity())
}

/// Dvoretzky-Kiefer-Wolfowitz radius: `P(sup |F_n - F| > eps) <= delta`.
#[must_use]
pub fn dkw_epsilon(n: usize, delta: f64) -> f64 {
    ((2.0 / delta).ln() / (2.0 * n as f64)).sqrt()
}

/// Vanilla C2ST power study over mean shifts of `N(shift * 1, I_dim)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSweepConfig {
    pub dim: usize,
    pub n: usize,
    pub shifts: Vec<f64>,
    pub alpha: f64,
    pub runs: usize,
    pub n_null_trials: usize,
    pub n_folds: usize,
    pub metrics: Vec<MetricKind>,
    pub classifier: ClassifierConfig,
    pub seed: u64,
}

impl Default for PowerSweepConfig {
    fn default() -> Self {
        Self {
            dim: 5,
            n: 100,
            shifts: vec![0.0, 0.2, 0.4, 0.7, 1.0],
            alpha: 0.05,
            runs: 50,
            n_null_trials: 50,
            n_folds: 2,
            metrics: vec![MetricKind::Divergence],
            classifier: ClassifierConfig::default(),
            seed: 0,
        }
    }
}

impl PowerSweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 || self.n == 0 {
            return Err(Lc2stError::config("dim and n must be positive"));
        }
        if self.shifts.is_empty() || self.shifts.iter().any(|s| !s.is_finite()) {
            return Err(Lc2stError::config("shifts must be a non-empty list of finite values"));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Lc2stError::config(format!("alpha {} outside [0, 1]", self.alpha)));
        }
        if self.runs == 0 || self.n_null_trials == 0 {
            return Err(Lc2stError::config("runs and n_null_trials must be positive"));
        }
        self.c2st_config(self.seed).validate()
    }

    fn c2st_config(&self, seed: u64) -> C2stConfig {
        C2stConfig {
            n_folds: self.n_folds,
            metrics: self.metrics.clone(),
            single_class_eval: true,
            classifier: self.classifier.clone(),
            seed,
        }
    }
}

/// Rejection behaviour at one shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerPoint {
    pub shift: f64,
    pub rejection_rate: BTreeMap<MetricKind, f64>,
    pub mean_p_value: BTreeMap<MetricKind, f64>,
    pub runs: usize,
    /// Runs where some metric's null distribution was degenerate.
    pub degenerate_runs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSweepReport {
    pub config: PowerSweepConfig,
    pub points: Vec<PowerPoint>,
}

impl PowerSweepReport {
    /// Rejection rates of `metric` in shift order.
    #[must_use]
    pub fn power_curve(&self, metric: MetricKind) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.rejection_rate.get(&metric).copied().unwrap_or(0.0))
            .collect()
    }
}

fn power_run(config: &PowerSweepConfig, shift: f64, root: u64) -> Result<HtestReport> {
    let p = isotropic_gaussian(config.n, config.dim, 0.0, unit_seed(root, 0))?;
    let q = isotropic_gaussian(config.n, config.dim, shift, unit_seed(root, 1))?;
    let nulls = (0..config.n_null_trials)
        .map(|t| isotropic_gaussian(config.n, config.dim, 0.0, unit_seed(root, 2 + t as u64)))
        .collect::<Result<Vec<SampleSet>>>()?;
    let result = run_c2st_test(&p, &q, &nulls, &config.c2st_config(root), config.alpha)?;
    Ok(result.reports)
}

fn summarize(shift: f64, runs: &[HtestReport]) -> PowerPoint {
    let mut sums: BTreeMap<MetricKind, (f64, usize)> = BTreeMap::new();
    for run in runs {
        for (metric, report) in run {
            if let Some(p) = report.p_value {
                let entry = sums.entry(*metric).or_default();
                entry.0 += p;
                entry.1 += 1;
            }
        }
    }
    let degenerate_runs = runs
        .iter()
        .filter(|run| run.values().any(|r| r.has_warning(NullWarning::DegenerateNull)))
        .count();
    PowerPoint {
        shift,
        rejection_rate: empirical_rejection_rate(runs),
        mean_p_value: sums
            .into_iter()
            .map(|(m, (sum, count))| (m, sum / count as f64))
            .collect(),
        runs: runs.len(),
        degenerate_runs,
    }
}

/// Run `config.runs` full C2ST tests (observed plus `n_null_trials` null
/// trials) at every shift.
pub fn power_sweep(config: &PowerSweepConfig) -> Result<PowerSweepReport> {
    config.validate()?;
    let stream = SeedTaxonomy::derive(config.seed, POWER_SWEEP_SCOPE).reference;
    let mut points = Vec::with_capacity(config.shifts.len());
    for (s, &shift) in config.shifts.iter().enumerate() {
        let shift_stream = unit_seed(stream, s as u64);
        let runs = (0..config.runs)
            .into_par_iter()
            .map(|r| power_run(config, shift, unit_seed(shift_stream, r as u64)))
            .collect::<Result<Vec<_>>>()?;
        let point = summarize(shift, &runs);
        info!(
            diag_id = DIAG_ID,
            shift,
            rejection_rate = ?point.rejection_rate,
            "power sweep point"
        );
        points.push(point);
    }
    Ok(PowerSweepReport {
        config: config.clone(),
        points,
    })
}

/// Repeated local tests where `Q | x` equals `P | x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalNullStudy {
    pub dim: usize,
    pub n_train: usize,
    pub n_eval: usize,
    pub n_null_trials: usize,
    pub repetitions: usize,
    pub metric: MetricKind,
    pub classifier: ClassifierConfig,
    pub seed: u64,
}

impl Default for LocalNullStudy {
    fn default() -> Self {
        Self {
            dim: 2,
            n_train: 200,
            n_eval: 100,
            n_null_trials: 100,
            repetitions: 50,
            metric: MetricKind::ProbasMean,
            classifier: ClassifierConfig::default(),
            seed: 0,
        }
    }
}

fn local_null_run(study: &LocalNullStudy, root: u64) -> Result<Option<f64>> {
    let sim = LinearGaussian::new(study.dim, 0.0);
    let x_eval = ConditioningValue::new(vec![0.0; study.dim])?;
    let (p, x_p) = sim.sample_joint(study.n_train, unit_seed(root, 0))?;
    let (q, x_q) = sim.sample_joint(study.n_train, unit_seed(root, 1))?;
    let p_eval = sim.sample_at(&x_eval, study.n_eval, unit_seed(root, 2))?;

    let mut null_samples = Vec::with_capacity(study.n_null_trials);
    let mut null_conditioning = Vec::with_capacity(study.n_null_trials);
    for t in 0..study.n_null_trials {
        let (theta, x) = sim.sample_joint(study.n_train, unit_seed(root, 3 + t as u64))?;
        null_samples.push(theta);
        null_conditioning.push(x);
    }

    let config = Lc2stConfig {
        metrics: vec![study.metric],
        classifier: study.classifier.clone(),
        seed: root,
        ..Lc2stConfig::default()
    };
    let data = LocalData {
        p: &p,
        q: &q,
        x_p: &x_p,
        x_q: &x_q,
    };
    let eval = LocalEval {
        x_eval: &x_eval,
        p_eval: Some(&p_eval),
        q_eval: None,
    };
    let null = LocalNull::Trials {
        samples: &null_samples,
        conditioning: &null_conditioning,
        q_eval: None,
    };
    let result = run_lc2st_test(&data, &eval, null, &config, 0.05)?;
    let p_value = result.reports.get(&study.metric).and_then(|r| r.p_value);
    debug!(
        ?p_value,
        excluded = result.null.excluded.len(),
        partial = result.null.partial.len(),
        "local null repetition"
    );
    Ok(p_value)
}

/// p-values of `repetitions` L-C2ST runs under H0.
pub fn local_null_pvalues(study: &LocalNullStudy) -> Result<Vec<f64>> {
    if study.repetitions == 0 || study.n_null_trials == 0 {
        return Err(Lc2stError::config("repetitions and n_null_trials must be positive"));
    }
    let stream = SeedTaxonomy::derive(study.seed, LOCAL_NULL_SCOPE).reference;
    let p_values = (0..study.repetitions)
        .into_par_iter()
        .map(|r| local_null_run(study, unit_seed(stream, r as u64)))
        .collect::<Result<Vec<Option<f64>>>>()?;
    Ok(p_values.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dkw_radius_shrinks_with_n() {
        let small = dkw_epsilon(100, 0.05);
        let large = dkw_epsilon(10_000, 0.05);
        assert!(large < small);
        assert!((dkw_epsilon(1000, 0.001) - 0.061_7).abs() < 1e-3);
    }

    #[test]
    fn sweep_config_validation() {
        PowerSweepConfig::default().validate().unwrap();
        let bad = PowerSweepConfig {
            shifts: vec![],
            ..PowerSweepConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = PowerSweepConfig {
            metrics: vec![MetricKind::Accuracy],
            ..PowerSweepConfig::default()
        };
        assert!(matches!(bad.validate(), Err(Lc2stError::Configuration(_))));
    }

    #[test]
    fn sweep_config_parses_partial_json() {
        let config: PowerSweepConfig =
            serde_json::from_str(r#"{"dim": 2, "shifts": [0.0, 1.5], "metrics": ["div"]}"#)
                .unwrap();
        assert_eq!(config.dim, 2);
        assert_eq!(config.shifts, vec![0.0, 1.5]);
        assert_eq!(config.metrics, vec![MetricKind::Divergence]);
        assert_eq!(config.runs, PowerSweepConfig::default().runs);
    }

    #[test]
    fn tiny_sweep_is_reproducible() {
        let config = PowerSweepConfig {
            dim: 2,
            n: 40,
            shifts: vec![0.0, 2.0],
            runs: 4,
            n_null_trials: 10,
            ..PowerSweepConfig::default()
        };
        let report = power_sweep(&config).unwrap();
        assert_eq!(report.points.len(), 2);
        assert_eq!(report.points[1].runs, 4);
        assert_eq!(report.power_curve(MetricKind::Divergence)[1], 1.0);
        assert_eq!(report, power_sweep(&config).unwrap());
    }
}
