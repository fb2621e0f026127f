//! Reference simulators, statistical scenarios and reporting for the
//! lc2st tests.

pub mod log;
pub mod report;
pub mod scenario;
pub mod simulator;

pub use scenario::{
    LocalNullStudy, PowerPoint, PowerSweepConfig, PowerSweepReport, dkw_epsilon,
    local_null_pvalues, null_accuracy_study, power_sweep, uniform_pit_deviation,
};
pub use simulator::{LinearGaussian, isotropic_gaussian};

/// Correlates tracing events emitted by the harness.
pub const DIAG_ID: &str = "lc2st-harness";
