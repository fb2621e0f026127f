//! Classifier two-sample tests and calibration diagnostics.
//!
//! - [`c2st`]: vanilla C2ST with k-fold cross-validation.
//! - [`lc2st`]: local C2ST at a conditioning value, ensemble or
//!   cross-validated.
//! - [`null`]: empirical null distributions, p-values and reject decisions.
//! - [`calibration`]: PP curves, local PIT regression, SBC ranks and
//!   confidence bands.
//!
//! All work is split into independent units (folds, ensemble members, null
//! trials, alpha levels), each with its own derived seed, so results do not
//! depend on the order or parallelism of execution.

pub mod aggregate;
pub mod c2st;
pub mod calibration;
pub mod folds;
pub mod lc2st;
pub mod metrics;
pub mod null;
pub mod stats;

pub use aggregate::{
    ExcludedUnit, ExclusionReason, FoldRecord, FoldScores, UnitId, UnitKind, UnitOutcome,
    partition_outcomes,
};
pub use c2st::{C2stConfig, FoldUnit, c2st_scores, finalize_c2st, plan_c2st_folds};
pub use calibration::{
    ConfidenceBand, LocalFlowConfig, LocalFlowReport, LocalPitRegression, LocalPpReport, PpCurve,
    SbcCdf, binomial_band, local_flow_calibration, local_pit_regression, local_pp_report, pp_vals,
    sbc_cdf, sbc_ranks, simulated_uniform_band,
};
pub use folds::{FoldSplit, kfold_splits};
pub use lc2st::{
    EnsembleScores, Lc2stConfig, Lc2stScores, LocalClassifier, LocalData, LocalEval, LocalMode,
    eval_lc2st, lc2st_scores, train_lc2st,
};
pub use metrics::{MetricValues, compute_metric, compute_metrics};
pub use null::{
    C2stTestResult, HtestReport, Lc2stTestResult, LocalNull, NullDistribution, NullStatistics,
    NullTrialRecord, NullTrialUnit, NullWarning, PValueReport, PartialTrial, compute_pvalue,
    empirical_rejection_rate, eval_htest, finalize_null, run_c2st_test, run_lc2st_test,
    run_null_trials,
};

/// Correlates tracing events emitted by this crate.
pub const DIAG_ID: &str = "lc2st-core";
