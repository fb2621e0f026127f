//! Local classifier two-sample test (L-C2ST).
//!
//! A classifier is trained on joint features `[sample, x]` drawn from the two
//! joint distributions `(P, x_P)` and `(Q, x_Q)`, then evaluated at a single
//! conditioning value `x_eval` by appending it to every evaluation row. The
//! test compares the conditionals `P | x_eval` and `Q | x_eval` without
//! needing a fresh classifier per conditioning value.
//!
//! Two scoring modes exist:
//!
//! - **Ensemble**: `n_ensemble` independently seeded classifiers are trained
//!   on the full data; their probabilities (and accuracies) are averaged
//!   elementwise before metrics are computed.
//! - **Cross-validated**: one classifier per fold, each evaluated on its
//!   held-out indices; yields per-fold metric sequences.

use lc2st_classifier::{Classifier, ClassifierConfig, Evaluation, evaluate, train};
use lc2st_error::{Lc2stError, Result, ensure_dim};
use lc2st_types::{ConditioningValue, MetricKind, SampleSet, SeedTaxonomy, unit_seed};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info};

use crate::DIAG_ID;
use crate::aggregate::{
    ExcludedUnit, FoldRecord, FoldScores, Partitioned, UnitId, UnitKind, UnitOutcome,
    partition_outcomes,
};
use crate::folds::{FoldSplit, kfold_splits};
use crate::metrics::{MetricValues, check_metrics_for_eval, compute_metric, compute_metrics};

/// Seed-derivation scope for the local test.
pub const LC2ST_SCOPE: &str = "lc2st";

/// How the local statistic is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LocalMode {
    Ensemble {
        n_ensemble: usize,
        /// Evaluate on the training populations instead of `p_eval`/`q_eval`.
        in_sample: bool,
    },
    CrossValidated { n_folds: usize },
}

impl Default for LocalMode {
    fn default() -> Self {
        Self::Ensemble {
            n_ensemble: 1,
            in_sample: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lc2stConfig {
    pub mode: LocalMode,
    pub metrics: Vec<MetricKind>,
    /// Score only population 0 at `x_eval`. Forced on when no population-1
    /// evaluation sample is available.
    pub single_class_eval: bool,
    pub classifier: ClassifierConfig,
    pub seed: u64,
}

impl Default for Lc2stConfig {
    fn default() -> Self {
        Self {
            mode: LocalMode::default(),
            metrics: vec![MetricKind::ProbasMean],
            single_class_eval: true,
            classifier: ClassifierConfig::default(),
            seed: 0,
        }
    }
}

impl Lc2stConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            LocalMode::Ensemble { n_ensemble: 0, .. } => {
                return Err(Lc2stError::config("n_ensemble must be >= 1"));
            }
            LocalMode::CrossValidated { n_folds } if n_folds < 2 => {
                return Err(Lc2stError::config(format!("n_folds must be >= 2, got {n_folds}")));
            }
            _ => {}
        }
        if self.metrics.is_empty() {
            return Err(Lc2stError::config("at least one metric is required"));
        }
        self.classifier.validate()
    }

    #[must_use]
    pub fn seeds(&self) -> SeedTaxonomy {
        SeedTaxonomy::derive(self.seed, LC2ST_SCOPE)
    }

    /// Seed of ensemble member `member` (or of fold `member` in
    /// cross-validated mode).
    #[must_use]
    pub fn member_seed(&self, member: usize) -> u64 {
        unit_seed(self.seeds().classifier, member as u64)
    }

    /// Configuration of one null trial: a single classifier, its own seed.
    #[must_use]
    pub fn for_null_trial(&self, seed: u64) -> Self {
        let mode = match self.mode {
            LocalMode::Ensemble { in_sample, .. } => LocalMode::Ensemble {
                n_ensemble: 1,
                in_sample,
            },
            cv @ LocalMode::CrossValidated { .. } => cv,
        };
        Self {
            mode,
            seed,
            ..self.clone()
        }
    }
}

/// Training populations of the two joint distributions.
#[derive(Debug, Clone, Copy)]
pub struct LocalData<'a> {
    pub p: &'a SampleSet,
    pub q: &'a SampleSet,
    pub x_p: &'a SampleSet,
    pub x_q: &'a SampleSet,
}

impl LocalData<'_> {
    pub fn validate(&self) -> Result<()> {
        ensure_dim("lc2st sample dimension", self.p.dim(), self.q.dim())?;
        ensure_dim("lc2st conditioning dimension", self.x_p.dim(), self.x_q.dim())?;
        ensure_dim("x_p rows", self.p.n_samples(), self.x_p.n_samples())?;
        ensure_dim("x_q rows", self.q.n_samples(), self.x_q.n_samples())
    }
}

/// Where and on what the trained classifier is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct LocalEval<'a> {
    pub x_eval: &'a ConditioningValue,
    /// Samples of `P | x_eval`.
    pub p_eval: Option<&'a SampleSet>,
    /// Samples of `Q | x_eval`, when available.
    pub q_eval: Option<&'a SampleSet>,
}

/// A classifier trained on joint features, remembering the training-time
/// sample and conditioning dimensions.
#[derive(Debug)]
pub struct LocalClassifier {
    model: Box<dyn Classifier>,
    sample_dim: usize,
    conditioning_dim: usize,
}

impl LocalClassifier {
    #[must_use]
    pub const fn sample_dim(&self) -> usize {
        self.sample_dim
    }

    #[must_use]
    pub const fn conditioning_dim(&self) -> usize {
        self.conditioning_dim
    }

    /// Evaluate at `x_eval`: rows of `eval_0` (and `eval_1` unless
    /// single-class) are joined with `x_eval` before scoring.
    pub fn evaluate(
        &self,
        eval_0: &SampleSet,
        x_eval: &ConditioningValue,
        eval_1: Option<&SampleSet>,
        single_class_eval: bool,
    ) -> Result<Evaluation> {
        ensure_dim("x_eval dimension", self.conditioning_dim, x_eval.dim())?;
        ensure_dim("evaluation sample dimension", self.sample_dim, eval_0.dim())?;
        let joint_0 = eval_0.with_conditioning(x_eval);
        let joint_1 = match eval_1 {
            Some(eval_1) if !single_class_eval => {
                ensure_dim("evaluation sample dimension", self.sample_dim, eval_1.dim())?;
                Some(eval_1.with_conditioning(x_eval))
            }
            _ => None,
        };
        evaluate(self.model.as_ref(), &joint_0, joint_1.as_ref())
    }
}

/// Train one classifier on `[P, x_P]` (label 0) against `[Q, x_Q]` (label 1).
pub fn train_lc2st(
    data: &LocalData<'_>,
    classifier: &ClassifierConfig,
    seed: u64,
) -> Result<LocalClassifier> {
    data.validate()?;
    let joint_0 = data.p.concat_columns(data.x_p)?;
    let joint_1 = data.q.concat_columns(data.x_q)?;
    let model = train(&joint_0, &joint_1, classifier, seed)?;
    Ok(LocalClassifier {
        model,
        sample_dim: data.p.dim(),
        conditioning_dim: data.x_p.dim(),
    })
}

/// Evaluate a local classifier at `x_eval`; see [`LocalClassifier::evaluate`].
pub fn eval_lc2st(
    classifier: &LocalClassifier,
    eval_0: &SampleSet,
    x_eval: &ConditioningValue,
    eval_1: Option<&SampleSet>,
    single_class_eval: bool,
) -> Result<Evaluation> {
    classifier.evaluate(eval_0, x_eval, eval_1, single_class_eval)
}

/// Averaged output of an ensemble of local classifiers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnsembleScores {
    pub scores: MetricValues,
    pub accuracy: Option<f64>,
    /// Elementwise mean of the members' class-0 probabilities.
    pub probabilities: Vec<f64>,
    /// Indices of the members that completed.
    pub members: Vec<usize>,
    pub excluded: Vec<ExcludedUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Lc2stScores {
    Ensemble(EnsembleScores),
    CrossValidated(FoldScores),
}

impl Lc2stScores {
    /// Scalar statistic per metric: the ensemble value, or the fold mean.
    #[must_use]
    pub fn statistics(&self) -> MetricValues {
        match self {
            Self::Ensemble(e) => e.scores.clone(),
            Self::CrossValidated(cv) => cv.statistics(),
        }
    }

    /// All class-0 probabilities, folds concatenated in order.
    #[must_use]
    pub fn probabilities(&self) -> Vec<f64> {
        match self {
            Self::Ensemble(e) => e.probabilities.clone(),
            Self::CrossValidated(cv) => cv.probabilities.concat(),
        }
    }

    #[must_use]
    pub fn excluded(&self) -> &[ExcludedUnit] {
        match self {
            Self::Ensemble(e) => &e.excluded,
            Self::CrossValidated(cv) => &cv.excluded,
        }
    }
}

/// Compute L-C2ST scores in the configured mode.
pub fn lc2st_scores(
    data: &LocalData<'_>,
    eval: &LocalEval<'_>,
    config: &Lc2stConfig,
) -> Result<Lc2stScores> {
    config.validate()?;
    data.validate()?;
    match config.mode {
        LocalMode::Ensemble {
            n_ensemble,
            in_sample,
        } => ensemble_scores(data, eval, config, n_ensemble, in_sample).map(Lc2stScores::Ensemble),
        LocalMode::CrossValidated { n_folds } => {
            cross_validated_scores(data, eval, config, n_folds).map(Lc2stScores::CrossValidated)
        }
    }
}

fn ensemble_scores(
    data: &LocalData<'_>,
    eval: &LocalEval<'_>,
    config: &Lc2stConfig,
    n_ensemble: usize,
    in_sample: bool,
) -> Result<EnsembleScores> {
    let (eval_0, eval_1) = if in_sample {
        (data.p, Some(data.q))
    } else {
        let p_eval = eval
            .p_eval
            .ok_or_else(|| Lc2stError::config("p_eval is required unless in_sample is set"))?;
        (p_eval, eval.q_eval)
    };
    let single_class_eval = config.single_class_eval || eval_1.is_none();
    check_metrics_for_eval(&config.metrics, single_class_eval)?;

    let outcomes: Vec<(UnitId, UnitOutcome<Evaluation>)> = (0..n_ensemble)
        .into_par_iter()
        .map(|member| {
            let _span =
                debug_span!("lc2st_member", diag_id = DIAG_ID, member).entered();
            let outcome = train_lc2st(data, &config.classifier, config.member_seed(member))
                .and_then(|clf| clf.evaluate(eval_0, eval.x_eval, eval_1, single_class_eval));
            (UnitId::new(UnitKind::EnsembleMember, member), outcome.into())
        })
        .collect();
    let partitioned = partition_outcomes(outcomes)?;
    let scores = finalize_ensemble(&config.metrics, partitioned)?;
    info!(
        diag_id = DIAG_ID,
        members = scores.members.len(),
        excluded = scores.excluded.len(),
        "lc2st ensemble finalized"
    );
    Ok(scores)
}

/// Average completed member evaluations and compute metrics on the average.
pub fn finalize_ensemble(
    metrics: &[MetricKind],
    partitioned: Partitioned<Evaluation>,
) -> Result<EnsembleScores> {
    let Partitioned {
        completed,
        excluded,
    } = partitioned;
    let Some(first) = completed.first() else {
        return Ok(EnsembleScores {
            excluded,
            ..EnsembleScores::default()
        });
    };

    let n_rows = first.value.probabilities.len();
    let labels = first.value.labels.clone();
    let mut probabilities = vec![0.0; n_rows];
    let mut accuracy_sum = 0.0;
    let mut has_accuracy = true;
    for record in &completed {
        ensure_dim("ensemble probabilities", n_rows, record.value.probabilities.len())?;
        for (acc, p) in probabilities.iter_mut().zip(&record.value.probabilities) {
            *acc += p;
        }
        match record.value.accuracy {
            Some(a) => accuracy_sum += a,
            None => has_accuracy = false,
        }
    }
    let n_members = completed.len() as f64;
    for p in &mut probabilities {
        *p /= n_members;
    }
    let accuracy = has_accuracy.then(|| accuracy_sum / n_members);

    let mut scores = MetricValues::new();
    for &metric in metrics {
        let value = match (metric, accuracy) {
            (MetricKind::Accuracy, Some(acc)) => acc,
            _ => compute_metric(metric, &probabilities, labels.as_deref())?,
        };
        scores.insert(metric, value);
    }

    Ok(EnsembleScores {
        scores,
        accuracy,
        probabilities,
        members: completed.iter().map(|r| r.unit.index).collect(),
        excluded,
    })
}

fn cross_validated_scores(
    data: &LocalData<'_>,
    eval: &LocalEval<'_>,
    config: &Lc2stConfig,
    n_folds: usize,
) -> Result<FoldScores> {
    let n = data.p.n_samples();
    ensure_dim("cross-validated population sizes", n, data.q.n_samples())?;
    if let Some(p_eval) = eval.p_eval {
        ensure_dim("p_eval rows", n, p_eval.n_samples())?;
    }
    if let Some(q_eval) = eval.q_eval {
        ensure_dim("q_eval rows", n, q_eval.n_samples())?;
    }
    check_metrics_for_eval(&config.metrics, config.single_class_eval)?;
    let splits = kfold_splits(n, n_folds, unit_seed(config.seeds().shuffle, 0))?;

    let outcomes: Vec<(UnitId, UnitOutcome<FoldRecord>)> = splits
        .par_iter()
        .map(|split| {
            let _span =
                debug_span!("lc2st_fold", diag_id = DIAG_ID, fold = split.fold).entered();
            let outcome = run_local_fold(data, eval, config, split);
            (UnitId::new(UnitKind::Fold, split.fold), outcome.into())
        })
        .collect();
    let scores = FoldScores::finalize(&config.metrics, partition_outcomes(outcomes)?);
    info!(
        diag_id = DIAG_ID,
        completed = scores.folds.len(),
        excluded = scores.n_excluded(),
        "lc2st cross-validation finalized"
    );
    Ok(scores)
}

fn run_local_fold(
    data: &LocalData<'_>,
    eval: &LocalEval<'_>,
    config: &Lc2stConfig,
    split: &FoldSplit,
) -> Result<FoldRecord> {
    let p_train = data.p.select(&split.train);
    let q_train = data.q.select(&split.train);
    let x_p_train = data.x_p.select(&split.train);
    let x_q_train = data.x_q.select(&split.train);
    let fold_data = LocalData {
        p: &p_train,
        q: &q_train,
        x_p: &x_p_train,
        x_q: &x_q_train,
    };
    let clf = train_lc2st(&fold_data, &config.classifier, config.member_seed(split.fold))?;

    let eval_0 = eval.p_eval.unwrap_or(data.p).select(&split.held_out);
    let eval_1 = (!config.single_class_eval)
        .then(|| eval.q_eval.unwrap_or(data.q).select(&split.held_out));
    let evaluation = clf.evaluate(&eval_0, eval.x_eval, eval_1.as_ref(), config.single_class_eval)?;
    let scores = compute_metrics(
        &config.metrics,
        &evaluation.probabilities,
        evaluation.labels.as_deref(),
    )?;
    debug!(fold = split.fold, ?scores, "lc2st fold scored");
    Ok(FoldRecord {
        scores,
        probabilities: evaluation.probabilities,
        accuracy: evaluation.accuracy,
    })
}
