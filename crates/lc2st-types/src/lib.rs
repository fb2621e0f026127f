//! Data model shared by the lc2st crates.
//!
//! - [`SampleSet`] / [`ConditioningValue`]: immutable numeric inputs supplied
//!   by the external simulator or estimator.
//! - [`MetricKind`]: closed set of test statistics with explicit orientation.
//! - [`AlphaGrid`]: strictly monotonic grid in `[0, 1]` for PP curves.
//! - [`SeedTaxonomy`]: deterministic per-unit seed derivation.

pub mod grid;
pub mod metric;
pub mod sample;
pub mod seed;

pub use grid::AlphaGrid;
pub use metric::{MetricKind, Orientation, parse_metrics};
pub use sample::{ConditioningValue, SampleSet};
pub use seed::{SeedTaxonomy, unit_seed};
