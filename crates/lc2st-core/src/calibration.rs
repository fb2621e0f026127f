//! PIT / SBC calibration diagnostics.
//!
//! A PP curve maps every level `alpha` of an [`AlphaGrid`] to the fraction of
//! values `<= alpha`. For calibrated PIT values the curve follows the
//! identity; for L-C2ST class-0 probabilities under H0 it follows the step at
//! 0.5 ([`dirac_half_curve`]). SBC rank histograms are compared against a
//! Binomial confidence band or a Monte-Carlo band from uniform draws.

use lc2st_classifier::{ClassifierConfig, train};
use lc2st_error::{Lc2stError, Result, ensure_dim};
use lc2st_types::{AlphaGrid, ConditioningValue, SampleSet, SeedTaxonomy, unit_seed};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info};

use crate::DIAG_ID;
use crate::aggregate::{ExcludedUnit, UnitId, UnitKind, UnitOutcome, partition_outcomes};
use crate::lc2st::{LocalData, train_lc2st};
use crate::null::{NullWarning, check_alpha, compute_pvalue, is_degenerate};
use crate::stats::{binomial_quantile, quantile_sorted};

/// Seed-derivation scope for local PIT regression.
pub const LOCAL_PIT_SCOPE: &str = "local_pit";
/// Seed-derivation scope for local flow calibration.
pub const LOCAL_FLOW_SCOPE: &str = "local_flow";
/// Seed-derivation scope for simulated uniform bands.
pub const UNIFORM_BAND_SCOPE: &str = "uniform_band";

/// Default two-sided level of SBC confidence bands.
pub const DEFAULT_BAND_ALPHA: f64 = 0.01;

/// A curve sampled on an alpha grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpCurve {
    pub alphas: Vec<f64>,
    pub values: Vec<f64>,
}

impl PpCurve {
    /// `max_alpha |curve(alpha) - alpha|`.
    #[must_use]
    pub fn max_deviation_from_identity(&self) -> f64 {
        self.alphas
            .iter()
            .zip(&self.values)
            .map(|(a, v)| (v - a).abs())
            .fold(0.0, f64::max)
    }
}

/// Fraction of `values` that are `<= alpha`, for every grid level.
pub fn pp_vals(values: &[f64], grid: &AlphaGrid) -> Result<PpCurve> {
    if values.is_empty() {
        return Err(Lc2stError::InsufficientSamples {
            context: "pp values",
            required: 1,
            actual: 0,
        });
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let curve = grid
        .values()
        .iter()
        .map(|&alpha| sorted.partition_point(|&v| v <= alpha) as f64 / n)
        .collect();
    Ok(PpCurve {
        alphas: grid.values().to_vec(),
        values: curve,
    })
}

/// PP curve of a point mass at 0.5: 0 below 0.5, 1 from 0.5 on.
#[must_use]
pub fn dirac_half_curve(grid: &AlphaGrid) -> PpCurve {
    PpCurve {
        alphas: grid.values().to_vec(),
        values: grid
            .values()
            .iter()
            .map(|&a| if a >= 0.5 { 1.0 } else { 0.0 })
            .collect(),
    }
}

/// `sum (curve - baseline)^2 / len`; both curves must share the grid.
pub fn local_pp_statistic(curve: &PpCurve, baseline: &PpCurve) -> Result<f64> {
    ensure_dim("pp curve length", baseline.values.len(), curve.values.len())?;
    if curve.values.is_empty() {
        return Err(Lc2stError::config("pp curves must not be empty"));
    }
    let sum: f64 = curve
        .values
        .iter()
        .zip(&baseline.values)
        .map(|(c, b)| (c - b).powi(2))
        .sum();
    Ok(sum / curve.values.len() as f64)
}

/// Local calibration of L-C2ST class-0 probabilities at one `x0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPpReport {
    pub curve: PpCurve,
    pub baseline: PpCurve,
    pub statistic: f64,
}

pub fn local_pp_report(probabilities: &[f64], grid: &AlphaGrid) -> Result<LocalPpReport> {
    let curve = pp_vals(probabilities, grid)?;
    let baseline = dirac_half_curve(grid);
    let statistic = local_pp_statistic(&curve, &baseline)?;
    Ok(LocalPpReport {
        curve,
        baseline,
        statistic,
    })
}

/// Estimate of `r_alpha(x0) = P(PIT <= alpha | x0)` at one grid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RAlpha {
    pub alpha: f64,
    pub value: f64,
    /// The empirical fraction was used because one class was too small to fit.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPitRegression {
    /// Completed levels in grid order.
    pub levels: Vec<RAlpha>,
    pub excluded: Vec<ExcludedUnit>,
}

impl LocalPitRegression {
    /// The regressed curve over the completed levels.
    #[must_use]
    pub fn curve(&self) -> PpCurve {
        PpCurve {
            alphas: self.levels.iter().map(|r| r.alpha).collect(),
            values: self.levels.iter().map(|r| r.value).collect(),
        }
    }
}

fn regress_level(
    x_cal: &SampleSet,
    pit: &[f64],
    x0: &SampleSet,
    alpha: f64,
    classifier: &ClassifierConfig,
    seed: u64,
) -> Result<RAlpha> {
    let (below, above): (Vec<usize>, Vec<usize>) = (0..pit.len()).partition(|&i| pit[i] <= alpha);
    let fraction = below.len() as f64 / pit.len() as f64;
    let fallback = RAlpha {
        alpha,
        value: fraction,
        fallback: true,
    };
    if below.is_empty() || above.is_empty() {
        return Ok(fallback);
    }
    // class 0: PIT <= alpha, so the class-0 probability is r_alpha
    match train(&x_cal.select(&below), &x_cal.select(&above), classifier, seed) {
        Ok(model) => {
            let proba = model.predict_proba(x0.view())?;
            Ok(RAlpha {
                alpha,
                value: proba[0],
                fallback: false,
            })
        }
        Err(Lc2stError::InsufficientSamples { .. }) => {
            debug!(alpha, n_below = below.len(), "too few samples, using empirical fraction");
            Ok(fallback)
        }
        Err(err) => Err(err),
    }
}

/// Regress the local PIT distribution at `x0` from calibration pairs
/// `(x_cal[i], pit[i])`, one classifier per grid level.
pub fn local_pit_regression(
    x_cal: &SampleSet,
    pit: &[f64],
    x0: &ConditioningValue,
    grid: &AlphaGrid,
    classifier: &ClassifierConfig,
    seed: u64,
) -> Result<LocalPitRegression> {
    ensure_dim("pit values", x_cal.n_samples(), pit.len())?;
    ensure_dim("x0 dimension", x_cal.dim(), x0.dim())?;
    if let Some(bad) = pit.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(Lc2stError::config(format!("pit value {bad} outside [0, 1]")));
    }
    if pit.is_empty() {
        return Err(Lc2stError::InsufficientSamples {
            context: "pit values",
            required: 1,
            actual: 0,
        });
    }
    classifier.validate()?;
    let x0 = SampleSet::new(x0.as_array().clone().insert_axis(Axis(0)))?;
    let stream = SeedTaxonomy::derive(seed, LOCAL_PIT_SCOPE).classifier;

    let outcomes: Vec<(UnitId, UnitOutcome<RAlpha>)> = grid
        .values()
        .par_iter()
        .enumerate()
        .map(|(i, &alpha)| {
            let _span = debug_span!("alpha_level", diag_id = DIAG_ID, level = i).entered();
            let seed = unit_seed(stream, i as u64);
            let outcome = regress_level(x_cal, pit, &x0, alpha, classifier, seed);
            (UnitId::new(UnitKind::AlphaLevel, i), outcome.into())
        })
        .collect();
    let partitioned = partition_outcomes(outcomes)?;
    Ok(LocalPitRegression {
        levels: partitioned.completed.into_iter().map(|r| r.value).collect(),
        excluded: partitioned.excluded,
    })
}

/// SBC ranks: for every observation `i` and coordinate `j`, the number of
/// posterior samples strictly below `theta_true[i, j]`. Indexed `[j][i]`.
pub fn sbc_ranks(
    theta_true: &SampleSet,
    posterior_samples: &[SampleSet],
) -> Result<Vec<Vec<u64>>> {
    ensure_dim("posterior sample sets", theta_true.n_samples(), posterior_samples.len())?;
    let dim = theta_true.dim();
    let mut ranks = vec![Vec::with_capacity(posterior_samples.len()); dim];
    for (truth, samples) in theta_true.as_array().rows().into_iter().zip(posterior_samples) {
        ensure_dim("posterior sample dimension", dim, samples.dim())?;
        for (j, ranks_j) in ranks.iter_mut().enumerate() {
            let below = samples.as_array().column(j).iter().filter(|&&s| s < truth[j]).count();
            ranks_j.push(below as u64);
        }
    }
    Ok(ranks)
}

/// Normalized cumulative rank histogram of one coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbcCdf {
    /// Bin edges, `nbins + 1` entries.
    pub edges: Vec<f64>,
    /// Cumulative counts divided by their maximum.
    pub cdf: Vec<f64>,
}

/// Histogram `ranks` into `nbins` equal-width bins spanning `[min, max]`
/// (or `[v - 0.5, v + 0.5]` when all ranks equal `v`), then cumulate and
/// normalize by the total.
pub fn sbc_cdf(ranks: &[u64], nbins: usize) -> Result<SbcCdf> {
    if nbins == 0 {
        return Err(Lc2stError::config("sbc histogram needs at least one bin"));
    }
    let (Some(&min), Some(&max)) = (ranks.iter().min(), ranks.iter().max()) else {
        return Err(Lc2stError::InsufficientSamples {
            context: "sbc ranks",
            required: 1,
            actual: 0,
        });
    };
    let (lo, hi) = if min == max {
        (min as f64 - 0.5, max as f64 + 0.5)
    } else {
        (min as f64, max as f64)
    };
    let width = (hi - lo) / nbins as f64;
    let mut counts = vec![0_u64; nbins];
    for &r in ranks {
        // the last bin is closed on the right
        let bin = (((r as f64 - lo) / width).floor() as usize).min(nbins - 1);
        counts[bin] += 1;
    }
    let mut running = 0_u64;
    let total = ranks.len() as f64;
    let cdf = counts
        .iter()
        .map(|&c| {
            running += c;
            running as f64 / total
        })
        .collect();
    let edges = (0..=nbins).map(|i| lo + width * i as f64).collect();
    Ok(SbcCdf { edges, cdf })
}

/// Pointwise confidence band aligned with `grid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub grid: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Two-sided level after Bonferroni correction.
    pub conf_alpha: f64,
}

fn corrected_level(conf_alpha: f64, n_dims: usize) -> Result<f64> {
    check_alpha(conf_alpha)?;
    if n_dims == 0 {
        return Err(Lc2stError::config("band needs at least one dimension"));
    }
    Ok(conf_alpha / n_dims as f64)
}

/// Binomial band for an SBC cumulative histogram of `n_ranks` ranks in
/// `nbins` bins: bin `i` has success probability `(i + 1) / nbins`, bounds
/// are the `conf/2` and `1 - conf/2` quantiles of `Binomial(n_ranks, .)`,
/// both normalized by the largest lower bound. `conf_alpha` is divided by
/// `n_dims` (Bonferroni).
pub fn binomial_band(
    n_ranks: usize,
    nbins: usize,
    conf_alpha: f64,
    n_dims: usize,
) -> Result<ConfidenceBand> {
    if nbins == 0 {
        return Err(Lc2stError::config("binomial band needs at least one bin"));
    }
    let conf = corrected_level(conf_alpha, n_dims)?;
    let n = n_ranks as u64;
    let mut grid: Vec<f64> = (0..nbins).map(|i| (i + 1) as f64 / nbins as f64).collect();
    grid[nbins - 1] -= 1e-9;

    let mut lower = Vec::with_capacity(nbins);
    let mut upper = Vec::with_capacity(nbins);
    for &p in &grid {
        lower.push(binomial_quantile(conf / 2.0, n, p)? as f64);
        upper.push(binomial_quantile(1.0 - conf / 2.0, n, p)? as f64);
    }
    let scale = lower.iter().copied().fold(0.0, f64::max);
    if scale <= 0.0 {
        return Err(Lc2stError::InsufficientSamples {
            context: "binomial band ranks",
            required: 1,
            actual: n_ranks,
        });
    }
    for v in lower.iter_mut().chain(upper.iter_mut()) {
        *v /= scale;
    }
    Ok(ConfidenceBand {
        grid,
        lower,
        upper,
        conf_alpha: conf,
    })
}

/// Monte-Carlo band for PP curves of `n` PIT values: `n_trials` sets of `n`
/// uniform draws, pointwise `conf/2` and `1 - conf/2` quantiles.
pub fn simulated_uniform_band(
    n: usize,
    grid: &AlphaGrid,
    n_trials: usize,
    conf_alpha: f64,
    n_dims: usize,
    seed: u64,
) -> Result<ConfidenceBand> {
    let conf = corrected_level(conf_alpha, n_dims)?;
    if n == 0 || n_trials == 0 {
        return Err(Lc2stError::config("uniform band needs n > 0 and n_trials > 0"));
    }
    let stream = SeedTaxonomy::derive(seed, UNIFORM_BAND_SCOPE).reference;
    let curves = (0..n_trials)
        .into_par_iter()
        .map(|t| {
            let mut rng = StdRng::seed_from_u64(unit_seed(stream, t as u64));
            let draws: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>()).collect();
            pp_vals(&draws, grid).map(|c| c.values)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut lower = Vec::with_capacity(grid.len());
    let mut upper = Vec::with_capacity(grid.len());
    let mut column = Vec::with_capacity(n_trials);
    for k in 0..grid.len() {
        column.clear();
        column.extend(curves.iter().map(|c| c[k]));
        column.sort_by(f64::total_cmp);
        lower.push(quantile_sorted(&column, conf / 2.0)?);
        upper.push(quantile_sorted(&column, 1.0 - conf / 2.0)?);
    }
    Ok(ConfidenceBand {
        grid: grid.values().to_vec(),
        lower,
        upper,
        conf_alpha: conf,
    })
}

/// `n` draws from `N(0, I_dim)`.
pub fn standard_normal_samples(n: usize, dim: usize, seed: u64) -> Result<SampleSet> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data =
        Array2::from_shape_simple_fn((n, dim), || -> f64 { StandardNormal.sample(&mut rng) });
    SampleSet::new(data)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFlowConfig {
    /// Base-space draws evaluated at `x0`.
    pub n_rounds: usize,
    pub n_null_trials: usize,
    pub classifier: ClassifierConfig,
    pub seed: u64,
}

impl Default for LocalFlowConfig {
    fn default() -> Self {
        Self {
            n_rounds: 1000,
            n_null_trials: 100,
            classifier: ClassifierConfig::default(),
            seed: 0,
        }
    }
}

impl LocalFlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_rounds == 0 {
            return Err(Lc2stError::config("n_rounds must be >= 1"));
        }
        self.classifier.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFlowReport {
    pub observed: LocalPpReport,
    /// Local PP statistics of completed null trials.
    pub null_statistics: Vec<f64>,
    pub trials: Vec<usize>,
    pub excluded: Vec<ExcludedUnit>,
    pub p_value: Option<f64>,
    pub reject: bool,
    pub warning: Option<NullWarning>,
}

/// Train `N(0, I)` draws (label 0) against `base` (label 1), both paired
/// with `x_cal`, then the local PP statistic of `n_rounds` fresh normal
/// draws at `x0`.
fn flow_statistic(
    reference: &SampleSet,
    base: &SampleSet,
    x_cal: &SampleSet,
    x0: &ConditioningValue,
    grid: &AlphaGrid,
    config: &LocalFlowConfig,
    seeds: (u64, u64),
) -> Result<LocalPpReport> {
    let (classifier_seed, eval_seed) = seeds;
    let data = LocalData {
        p: reference,
        q: base,
        x_p: x_cal,
        x_q: x_cal,
    };
    let model = train_lc2st(&data, &config.classifier, classifier_seed)?;
    let eval = standard_normal_samples(config.n_rounds, base.dim(), eval_seed)?;
    let evaluation = model.evaluate(&eval, x0, None, true)?;
    local_pp_report(&evaluation.probabilities, grid)
}

/// Local calibration of a normalizing-flow posterior estimator at `x0`.
///
/// `flow_values` are the calibration parameters mapped into the flow's base
/// space; under a calibrated estimator they are `N(0, I)` given `x`. Null
/// trials replace them with fresh standard-normal draws.
pub fn local_flow_calibration(
    flow_values: &SampleSet,
    x_cal: &SampleSet,
    x0: &ConditioningValue,
    grid: &AlphaGrid,
    config: &LocalFlowConfig,
    alpha: f64,
) -> Result<LocalFlowReport> {
    check_alpha(alpha)?;
    config.validate()?;
    ensure_dim("flow value rows", x_cal.n_samples(), flow_values.n_samples())?;
    ensure_dim("x0 dimension", x_cal.dim(), x0.dim())?;
    let (n, dim) = (flow_values.n_samples(), flow_values.dim());
    let seeds = SeedTaxonomy::derive(config.seed, LOCAL_FLOW_SCOPE);
    let reference = standard_normal_samples(n, dim, unit_seed(seeds.reference, 0))?;

    let observed = flow_statistic(
        &reference,
        flow_values,
        x_cal,
        x0,
        grid,
        config,
        (unit_seed(seeds.classifier, 0), unit_seed(seeds.reference, 1)),
    )?;

    let outcomes: Vec<(UnitId, UnitOutcome<f64>)> = (0..config.n_null_trials)
        .into_par_iter()
        .map(|t| {
            let _span =
                debug_span!("local_flow_null_trial", diag_id = DIAG_ID, trial = t).entered();
            let trial_seeds =
                SeedTaxonomy::derive(unit_seed(seeds.null, t as u64), LOCAL_FLOW_SCOPE);
            let outcome = standard_normal_samples(n, dim, trial_seeds.null).and_then(|null_base| {
                flow_statistic(
                    &reference,
                    &null_base,
                    x_cal,
                    x0,
                    grid,
                    config,
                    (trial_seeds.classifier, trial_seeds.reference),
                )
                .map(|report| report.statistic)
            });
            (UnitId::new(UnitKind::NullTrial, t), outcome.into())
        })
        .collect();
    let partitioned = partition_outcomes(outcomes)?;
    let trials = partitioned.completed.iter().map(|r| r.unit.index).collect();
    let null_statistics: Vec<f64> = partitioned.completed.into_iter().map(|r| r.value).collect();

    let (p_value, warning) = if null_statistics.is_empty() {
        (None, Some(NullWarning::EmptyNull))
    } else {
        let p = compute_pvalue(observed.statistic, &null_statistics)?;
        let warning = is_degenerate(&null_statistics).then_some(NullWarning::DegenerateNull);
        (Some(p), warning)
    };
    let reject = p_value.is_some_and(|p| p < alpha);
    info!(
        diag_id = DIAG_ID,
        statistic = observed.statistic,
        ?p_value,
        excluded = partitioned.excluded.len(),
        "local flow calibration finished"
    );
    Ok(LocalFlowReport {
        observed,
        null_statistics,
        trials,
        excluded: partitioned.excluded,
        p_value,
        reject,
        warning,
    })
}
