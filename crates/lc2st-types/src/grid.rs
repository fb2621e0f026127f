//! Alpha grids for PP curves and SBC histograms.

use lc2st_error::{Lc2stError, Result};
use serde::{Deserialize, Serialize};

/// Strictly increasing sequence of levels in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct AlphaGrid {
    values: Vec<f64>,
}

impl AlphaGrid {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(Lc2stError::config("alpha grid must not be empty"));
        }
        for (i, &alpha) in values.iter().enumerate() {
            if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
                return Err(Lc2stError::config(format!(
                    "alpha grid value {alpha} at index {i} is outside [0, 1]"
                )));
            }
        }
        if let Some(i) = values.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Lc2stError::config(format!(
                "alpha grid is not strictly increasing at index {}",
                i + 1
            )));
        }
        Ok(Self { values })
    }

    /// `n` evenly spaced points from `start` to `end` inclusive.
    pub fn linspace(start: f64, end: f64, n: usize) -> Result<Self> {
        match n {
            0 => Err(Lc2stError::config("alpha grid needs at least one point")),
            1 => Self::new(vec![start]),
            _ => {
                let step = (end - start) / (n - 1) as f64;
                let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
                // Pin the endpoint exactly; accumulated rounding can overshoot 1.0.
                values[n - 1] = end;
                Self::new(values)
            }
        }
    }

    /// `n` evenly spaced points covering `[0, 1)`: `i / n` for `i < n`.
    pub fn half_open_unit(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Lc2stError::config("alpha grid needs at least one point"));
        }
        Self::new((0..n).map(|i| i as f64 / n as f64).collect())
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<Vec<f64>> for AlphaGrid {
    type Error = Lc2stError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<AlphaGrid> for Vec<f64> {
    fn from(grid: AlphaGrid) -> Self {
        grid.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_non_monotonic() {
        assert!(AlphaGrid::new(vec![0.1, 0.1, 0.2]).is_err());
        assert!(AlphaGrid::new(vec![0.3, 0.2]).is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(AlphaGrid::new(vec![-0.1, 0.5]).is_err());
        assert!(AlphaGrid::new(vec![0.5, 1.5]).is_err());
        assert!(AlphaGrid::new(vec![f64::NAN]).is_err());
    }

    #[test]
    fn linspace_endpoints() {
        let grid = AlphaGrid::linspace(0.0, 0.999, 100).unwrap();
        assert_eq!(grid.len(), 100);
        assert_eq!(grid.values()[0], 0.0);
        assert_eq!(grid.values()[99], 0.999);
    }

    #[test]
    fn half_open_unit_excludes_one() {
        let grid = AlphaGrid::half_open_unit(100).unwrap();
        assert_eq!(grid.len(), 100);
        assert!(grid.values().iter().all(|&a| a < 1.0));
        assert!((grid.values()[1] - 0.01).abs() < 1e-15);
    }

    #[test]
    fn deserialize_validates() {
        let bad: std::result::Result<AlphaGrid, _> = serde_json::from_str("[0.5, 0.2]");
        assert!(bad.is_err());
        let good: AlphaGrid = serde_json::from_str("[0.0, 0.5, 1.0]").unwrap();
        assert_eq!(good.len(), 3);
    }

    proptest! {
        #[test]
        fn linspace_is_strictly_monotonic(n in 2usize..500, end in 0.01f64..=1.0) {
            let grid = AlphaGrid::linspace(0.0, end, n).unwrap();
            prop_assert_eq!(grid.len(), n);
            prop_assert!(grid.values().windows(2).all(|w| w[0] < w[1]));
        }
    }
}
