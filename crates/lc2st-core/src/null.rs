//! Null calibration: empirical null distributions, p-values and decisions.
//!
//! The p-value is the one-sided empirical estimate
//!
//! ```text
//! p = (1 / n) * #{ i : observed < null_i }
//! ```
//!
//! computed on statistics mapped through each metric's [`Orientation`] so
//! that larger values always count as evidence against H0. H0 is rejected at
//! level `alpha` iff `p < alpha`.

use std::collections::BTreeMap;

use lc2st_error::{Lc2stError, Result, ensure_dim};
use lc2st_types::{MetricKind, Orientation, SampleSet, unit_seed};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug_span, info, warn};

use crate::DIAG_ID;
use crate::aggregate::{ExcludedUnit, FoldScores, UnitId, UnitKind, UnitOutcome, partition_outcomes};
use crate::c2st::{C2stConfig, c2st_scores};
use crate::lc2st::{Lc2stConfig, Lc2stScores, LocalData, LocalEval, lc2st_scores};
use crate::metrics::{MetricValues, check_metrics_for_eval, check_probabilities, compute_metrics};
use crate::stats::mean;

/// Null statistic sequences per metric, in completed-trial order.
pub type NullStatistics = BTreeMap<MetricKind, Vec<f64>>;

/// Per-metric outcome of a hypothesis test.
pub type HtestReport = BTreeMap<MetricKind, PValueReport>;

/// Caveats attached to a p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullWarning {
    /// Every null statistic is identical; the p-value carries almost no power.
    DegenerateNull,
    /// No null trial produced this statistic; no p-value.
    EmptyNull,
    /// The observed statistic is unavailable or not finite; no p-value.
    MissingObserved,
    /// Some null statistics were computed from a subset of their trial's
    /// folds; see [`NullDistribution::partial`].
    PartialNullTrials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PValueReport {
    pub metric: MetricKind,
    pub observed: Option<f64>,
    pub p_value: Option<f64>,
    pub reject: bool,
    pub n_null: usize,
    pub warnings: Vec<NullWarning>,
}

impl PValueReport {
    #[must_use]
    pub fn has_warning(&self, warning: NullWarning) -> bool {
        self.warnings.contains(&warning)
    }
}

/// `mean(observed < null_i)`.
pub fn compute_pvalue(observed: f64, nulls: &[f64]) -> Result<f64> {
    if nulls.is_empty() {
        return Err(Lc2stError::config("p-value needs at least one null statistic"));
    }
    if !observed.is_finite() {
        return Err(Lc2stError::config(format!(
            "observed statistic must be finite, got {observed}"
        )));
    }
    let exceed = nulls.iter().filter(|&&t| observed < t).count();
    Ok(exceed as f64 / nulls.len() as f64)
}

/// [`compute_pvalue`] after mapping both sides through `orientation`.
pub fn compute_oriented_pvalue(
    orientation: Orientation,
    observed: f64,
    nulls: &[f64],
) -> Result<f64> {
    let oriented: Vec<f64> = nulls.iter().map(|&t| orientation.orient(t)).collect();
    compute_pvalue(orientation.orient(observed), &oriented)
}

/// Whether all null statistics are numerically identical.
#[must_use]
pub fn is_degenerate(nulls: &[f64]) -> bool {
    let (min, max) = nulls
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
    nulls.len() > 1 && (max - min) <= 1e-12 * max.abs().max(1.0)
}

pub(crate) fn check_alpha(alpha: f64) -> Result<()> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(Lc2stError::config(format!("significance level {alpha} outside [0, 1]")))
    }
}

/// p-value and decision for one metric.
pub fn pvalue_report(
    metric: MetricKind,
    observed: Option<f64>,
    nulls: &[f64],
    alpha: f64,
) -> Result<PValueReport> {
    check_alpha(alpha)?;
    let mut report = PValueReport {
        metric,
        observed,
        p_value: None,
        reject: false,
        n_null: nulls.len(),
        warnings: Vec::new(),
    };
    let Some(observed) = observed.filter(|v| v.is_finite()) else {
        report.warnings.push(NullWarning::MissingObserved);
        return Ok(report);
    };
    if nulls.is_empty() {
        report.warnings.push(NullWarning::EmptyNull);
        return Ok(report);
    }
    let p = compute_oriented_pvalue(metric.orientation(), observed, nulls)?;
    report.p_value = Some(p);
    report.reject = p < alpha;
    if is_degenerate(nulls) {
        warn!(diag_id = DIAG_ID, %metric, n_null = nulls.len(), "degenerate null distribution");
        report.warnings.push(NullWarning::DegenerateNull);
    }
    Ok(report)
}

/// p-values and reject decisions for every metric at level `alpha`.
pub fn eval_htest(
    observed: &MetricValues,
    nulls: &NullStatistics,
    metrics: &[MetricKind],
    alpha: f64,
) -> Result<HtestReport> {
    check_alpha(alpha)?;
    metrics
        .iter()
        .map(|&metric| {
            let null = nulls.get(&metric).map_or(&[][..], Vec::as_slice);
            pvalue_report(metric, observed.get(&metric).copied(), null, alpha)
                .map(|report| (metric, report))
        })
        .collect()
}

/// Fraction of test runs rejecting H0, per metric. Runs without a p-value
/// for a metric are left out of that metric's denominator.
#[must_use]
pub fn empirical_rejection_rate(runs: &[HtestReport]) -> BTreeMap<MetricKind, f64> {
    let mut counts: BTreeMap<MetricKind, (usize, usize)> = BTreeMap::new();
    for run in runs {
        for (metric, report) in run {
            if report.p_value.is_some() {
                let entry = counts.entry(*metric).or_default();
                entry.0 += usize::from(report.reject);
                entry.1 += 1;
            }
        }
    }
    counts
        .into_iter()
        .map(|(metric, (rejects, total))| (metric, rejects as f64 / total as f64))
        .collect()
}

/// One null trial with its derived seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullTrialUnit {
    pub trial: usize,
    pub seed: u64,
}

impl NullTrialUnit {
    #[must_use]
    pub fn new(trial: usize, null_stream: u64) -> Self {
        Self {
            trial,
            seed: unit_seed(null_stream, trial as u64),
        }
    }

    #[must_use]
    pub const fn id(&self) -> UnitId {
        UnitId::new(UnitKind::NullTrial, self.trial)
    }
}

/// Run `n_trials` null trials in parallel, each with its own derived seed.
///
/// Trial errors come back as unit outcomes for [`finalize_null`].
pub fn run_null_trials<F>(
    n_trials: usize,
    null_stream: u64,
    trial: F,
) -> Vec<(UnitId, UnitOutcome<NullTrialRecord>)>
where
    F: Fn(NullTrialUnit) -> Result<NullTrialRecord> + Sync,
{
    (0..n_trials)
        .into_par_iter()
        .map(|t| {
            let unit = NullTrialUnit::new(t, null_stream);
            let _span = debug_span!("null_trial", diag_id = DIAG_ID, trial = t).entered();
            (unit.id(), trial(unit).into())
        })
        .collect()
}

/// Outcome of one completed null trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullTrialRecord {
    pub statistics: MetricValues,
    pub probabilities: Vec<f64>,
    /// Folds of this trial left out of its statistic.
    pub excluded: Vec<ExcludedUnit>,
}

impl NullTrialRecord {
    /// Fails as a unit when every fold or member of the trial was excluded.
    fn new(
        statistics: MetricValues,
        probabilities: Vec<f64>,
        excluded: &[ExcludedUnit],
    ) -> Result<Self> {
        if statistics.is_empty() {
            return Err(Lc2stError::fit_failure(format!(
                "null trial: all {} units excluded",
                excluded.len()
            )));
        }
        Ok(Self {
            statistics,
            probabilities,
            excluded: excluded.to_vec(),
        })
    }
}

/// A completed null trial whose statistic used only some of its units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialTrial {
    pub trial: usize,
    pub excluded: Vec<ExcludedUnit>,
}

/// Null statistics and probabilities from completed trials.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NullDistribution {
    pub statistics: NullStatistics,
    pub probabilities: Vec<Vec<f64>>,
    pub trials: Vec<usize>,
    /// Trials left out entirely.
    pub excluded: Vec<ExcludedUnit>,
    /// Completed trials that lost some of their folds.
    pub partial: Vec<PartialTrial>,
}

impl NullDistribution {
    /// Folds excluded inside completed trials, summed over trials.
    #[must_use]
    pub fn n_excluded_inner(&self) -> usize {
        self.partial.iter().map(|p| p.excluded.len()).sum()
    }
}

/// Fold null-trial outcomes into per-metric sequences.
pub fn finalize_null(
    metrics: &[MetricKind],
    outcomes: Vec<(UnitId, UnitOutcome<NullTrialRecord>)>,
) -> Result<NullDistribution> {
    let partitioned = partition_outcomes(outcomes)?;
    let mut dist = NullDistribution {
        statistics: metrics.iter().map(|&m| (m, Vec::new())).collect(),
        excluded: partitioned.excluded,
        ..NullDistribution::default()
    };
    for record in partitioned.completed {
        let trial = record.unit.index;
        let NullTrialRecord {
            statistics,
            probabilities,
            excluded,
        } = record.value;
        for (metric, values) in &mut dist.statistics {
            if let Some(v) = statistics.get(metric) {
                values.push(*v);
            }
        }
        if !excluded.is_empty() {
            warn!(
                diag_id = DIAG_ID,
                trial,
                excluded = excluded.len(),
                "null trial statistic uses a subset of its units"
            );
            dist.partial.push(PartialTrial { trial, excluded });
        }
        dist.probabilities.push(probabilities);
        dist.trials.push(trial);
    }
    info!(
        diag_id = DIAG_ID,
        completed = dist.trials.len(),
        excluded = dist.excluded.len(),
        partial = dist.partial.len(),
        "null distribution finalized"
    );
    Ok(dist)
}

/// [`eval_htest`], plus a [`NullWarning::PartialNullTrials`] on every p-value
/// drawn from a null with partial trials.
fn decide(
    observed: &MetricValues,
    null: &NullDistribution,
    metrics: &[MetricKind],
    alpha: f64,
) -> Result<HtestReport> {
    let mut reports = eval_htest(observed, &null.statistics, metrics, alpha)?;
    if !null.partial.is_empty() {
        for report in reports.values_mut().filter(|r| r.p_value.is_some()) {
            report.warnings.push(NullWarning::PartialNullTrials);
        }
    }
    Ok(reports)
}

/// Observed statistics, null distribution and decisions of a vanilla C2ST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct C2stTestResult {
    pub observed: FoldScores,
    pub observed_statistics: MetricValues,
    pub null: NullDistribution,
    pub reports: HtestReport,
}

/// Run a full C2ST: observed fold scores of `P` vs `Q`, then one null trial
/// per entry of `null_samples` (`P` vs a fresh sample from `P`'s
/// distribution), all with the same classifier configuration.
pub fn run_c2st_test(
    population_0: &SampleSet,
    population_1: &SampleSet,
    null_samples: &[SampleSet],
    config: &C2stConfig,
    alpha: f64,
) -> Result<C2stTestResult> {
    check_alpha(alpha)?;
    let observed = c2st_scores(population_0, population_1, config)?;
    let observed_statistics = observed.statistics();

    let outcomes = run_null_trials(null_samples.len(), config.seeds().null, |unit| {
        let trial_config = C2stConfig {
            seed: unit.seed,
            ..config.clone()
        };
        let scores = c2st_scores(population_0, &null_samples[unit.trial], &trial_config)?;
        NullTrialRecord::new(
            scores.statistics(),
            scores.probabilities.concat(),
            &scores.excluded,
        )
    });
    let null = finalize_null(&config.metrics, outcomes)?;
    let reports = decide(&observed_statistics, &null, &config.metrics, alpha)?;
    Ok(C2stTestResult {
        observed,
        observed_statistics,
        null,
        reports,
    })
}

/// Statistics of precomputed null probabilities, reduced like `observed`:
/// over the whole vector for an ensemble, per fold and then averaged under
/// cross-validation.
fn precomputed_statistics(
    metrics: &[MetricKind],
    observed: &Lc2stScores,
    probabilities: &[f64],
) -> Result<MetricValues> {
    let Lc2stScores::CrossValidated(cv) = observed else {
        return compute_metrics(metrics, probabilities, None);
    };
    let mut per_fold: BTreeMap<MetricKind, Vec<f64>> = BTreeMap::new();
    let mut offset = 0;
    for fold in &cv.probabilities {
        let end = offset + fold.len();
        let chunk = probabilities.get(offset..end).ok_or(Lc2stError::DimensionMismatch {
            context: "precomputed null fold",
            expected: end,
            actual: probabilities.len(),
        })?;
        for (metric, value) in compute_metrics(metrics, chunk, None)? {
            per_fold.entry(metric).or_default().push(value);
        }
        offset = end;
    }
    Ok(per_fold
        .into_iter()
        .filter_map(|(metric, values)| mean(&values).map(|s| (metric, s)))
        .collect())
}

/// Null-hypothesis inputs for the local test.
#[derive(Debug, Clone, Copy)]
pub enum LocalNull<'a> {
    /// Replacement `(Q, x_Q)` populations drawn under H0, one per trial.
    Trials {
        samples: &'a [SampleSet],
        conditioning: &'a [SampleSet],
        /// Samples of the null `Q | x_eval` for two-class evaluation.
        q_eval: Option<&'a SampleSet>,
    },
    /// Class-0 probabilities computed earlier, one vector per trial.
    Precomputed(&'a [Vec<f64>]),
}

/// Observed statistics, null distribution and decisions of an L-C2ST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lc2stTestResult {
    pub observed: Lc2stScores,
    pub observed_statistics: MetricValues,
    pub null: NullDistribution,
    pub reports: HtestReport,
}

/// Run a full L-C2ST at `eval.x_eval`.
///
/// The observed statistic uses `config.mode` as given (an ensemble of
/// `n_ensemble` classifiers, or cross-validation). Every null trial trains a
/// single classifier on `P` against the trial's replacement for `Q`, with the
/// same classifier configuration and the same `x_eval`.
pub fn run_lc2st_test(
    data: &LocalData<'_>,
    eval: &LocalEval<'_>,
    null: LocalNull<'_>,
    config: &Lc2stConfig,
    alpha: f64,
) -> Result<Lc2stTestResult> {
    check_alpha(alpha)?;
    let observed = lc2st_scores(data, eval, config)?;
    let observed_statistics = observed.statistics();

    let null_stream = config.seeds().null;
    let outcomes: Vec<(UnitId, UnitOutcome<NullTrialRecord>)> = match null {
        LocalNull::Precomputed(probabilities) => {
            check_metrics_for_eval(&config.metrics, true)?;
            let expected = observed.probabilities().len();
            probabilities
                .iter()
                .enumerate()
                .map(|(t, probas)| -> Result<(UnitId, UnitOutcome<NullTrialRecord>)> {
                    check_probabilities(expected, probas)?;
                    let record = NullTrialRecord {
                        statistics: precomputed_statistics(&config.metrics, &observed, probas)?,
                        probabilities: probas.clone(),
                        excluded: Vec::new(),
                    };
                    Ok((NullTrialUnit::new(t, null_stream).id(), UnitOutcome::Completed(record)))
                })
                .collect::<Result<_>>()?
        }
        LocalNull::Trials {
            samples,
            conditioning,
            q_eval,
        } => {
            ensure_dim("null conditioning populations", samples.len(), conditioning.len())?;
            run_null_trials(samples.len(), null_stream, |unit| {
                let trial_data = LocalData {
                    q: &samples[unit.trial],
                    x_q: &conditioning[unit.trial],
                    ..*data
                };
                let trial_eval = LocalEval { q_eval, ..*eval };
                let scores =
                    lc2st_scores(&trial_data, &trial_eval, &config.for_null_trial(unit.seed))?;
                NullTrialRecord::new(scores.statistics(), scores.probabilities(), scores.excluded())
            })
        }
    };
    let null = finalize_null(&config.metrics, outcomes)?;
    let reports = decide(&observed_statistics, &null, &config.metrics, alpha)?;
    Ok(Lc2stTestResult {
        observed,
        observed_statistics,
        null,
        reports,
    })
}
