//! Sample sets and conditioning values.

use lc2st_error::{Lc2stError, Result, ensure_dim};
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate};
use serde::{Deserialize, Serialize};

/// An ordered collection of `n` real vectors of dimension `d` (rows are samples).
///
/// Row order carries no meaning for training; it is only used to index folds.
/// Serialized as a list of rows; deserialization applies the same checks as
/// [`SampleSet::from_rows`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct SampleSet {
    data: Array2<f64>,
}

impl SampleSet {
    /// Wrap an `n x d` matrix. Requires `d > 0` and finite entries.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.ncols() == 0 {
            return Err(Lc2stError::config("sample set must have at least one column"));
        }
        if let Some(bad) = data.iter().find(|v| !v.is_finite()) {
            return Err(Lc2stError::config(format!(
                "sample set contains non-finite value {bad}"
            )));
        }
        Ok(Self { data })
    }

    /// Build from row vectors; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Lc2stError::config("sample set must have at least one row"));
        };
        let dim = first.len();
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            ensure_dim("sample row", dim, row.len())?;
            flat.extend_from_slice(row);
        }
        let data = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|err| Lc2stError::config(format!("sample shape invalid: {err}")))?;
        Self::new(data)
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    #[must_use]
    pub fn into_inner(self) -> Array2<f64> {
        self.data
    }

    /// Rows at `indices`, in the given order.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), indices),
        }
    }

    /// Column-wise concatenation `[self, other]`; both sets need the same row count.
    pub fn concat_columns(&self, other: &Self) -> Result<Self> {
        ensure_dim("joint rows", self.n_samples(), other.n_samples())?;
        let data = concatenate(Axis(1), &[self.data.view(), other.data.view()])
            .map_err(|err| Lc2stError::config(format!("column concat failed: {err}")))?;
        Ok(Self { data })
    }

    /// Row-wise stacking `[self; other]`; both sets need the same dimension.
    pub fn stack_rows(&self, other: &Self) -> Result<Self> {
        ensure_dim("stacked columns", self.dim(), other.dim())?;
        let data = concatenate(Axis(0), &[self.data.view(), other.data.view()])
            .map_err(|err| Lc2stError::config(format!("row stack failed: {err}")))?;
        Ok(Self { data })
    }

    /// Append `value` to every row, producing `n x (d + d_x)` joint features.
    #[must_use]
    pub fn with_conditioning(&self, value: &ConditioningValue) -> Self {
        let n = self.n_samples();
        let d = self.dim();
        let x = value.as_array();
        let data = Array2::from_shape_fn((n, d + x.len()), |(i, j)| {
            if j < d { self.data[[i, j]] } else { x[j - d] }
        });
        Self { data }
    }
}

/// A single conditioning vector `x_eval` of dimension `d_x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ConditioningValue {
    values: Array1<f64>,
}

impl ConditioningValue {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(Lc2stError::config("conditioning value must not be empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Lc2stError::config("conditioning value must be finite"));
        }
        Ok(Self {
            values: Array1::from(values),
        })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array1<f64> {
        &self.values
    }
}

impl TryFrom<Vec<Vec<f64>>> for SampleSet {
    type Error = Lc2stError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_rows(&rows)
    }
}

impl From<SampleSet> for Vec<Vec<f64>> {
    fn from(samples: SampleSet) -> Self {
        samples.data.rows().into_iter().map(|row| row.to_vec()).collect()
    }
}

impl TryFrom<Vec<f64>> for ConditioningValue {
    type Error = Lc2stError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<ConditioningValue> for Vec<f64> {
    fn from(value: ConditioningValue) -> Self {
        value.values.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc2st_error::ErrorKind;
    use ndarray::array;

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = SampleSet::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn new_rejects_non_finite() {
        let err = SampleSet::new(array![[1.0, f64::NAN]]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn with_conditioning_repeats_x_on_every_row() {
        let samples = SampleSet::new(array![[1.0], [2.0], [3.0]]).unwrap();
        let x = ConditioningValue::new(vec![7.0, 8.0]).unwrap();
        let joint = samples.with_conditioning(&x);
        assert_eq!(joint.dim(), 3);
        assert_eq!(joint.n_samples(), 3);
        for i in 0..3 {
            assert_eq!(joint.view()[[i, 1]], 7.0);
            assert_eq!(joint.view()[[i, 2]], 8.0);
        }
        assert_eq!(joint.view()[[2, 0]], 3.0);
    }

    #[test]
    fn concat_columns_requires_equal_rows() {
        let a = SampleSet::new(array![[1.0], [2.0]]).unwrap();
        let b = SampleSet::new(array![[1.0]]).unwrap();
        assert_eq!(
            a.concat_columns(&b).unwrap_err().kind(),
            ErrorKind::DimensionMismatch
        );
    }

    #[test]
    fn deserialize_applies_constructor_checks() {
        let ragged: std::result::Result<SampleSet, _> =
            serde_json::from_str("[[1.0, 2.0], [3.0]]");
        assert!(ragged.is_err());
        let empty_rows: std::result::Result<SampleSet, _> = serde_json::from_str("[[], []]");
        assert!(empty_rows.is_err());
        let no_rows: std::result::Result<SampleSet, _> = serde_json::from_str("[]");
        assert!(no_rows.is_err());
        let empty_x: std::result::Result<ConditioningValue, _> = serde_json::from_str("[]");
        assert!(empty_x.is_err());

        let samples: SampleSet = serde_json::from_str("[[1.0, 2.0], [3.0, 4.0]]").unwrap();
        assert_eq!((samples.n_samples(), samples.dim()), (2, 2));
        assert_eq!(samples.view()[[1, 0]], 3.0);
        assert_eq!(serde_json::to_string(&samples).unwrap(), "[[1.0,2.0],[3.0,4.0]]");
        let x: ConditioningValue = serde_json::from_str("[0.5]").unwrap();
        assert_eq!(x.dim(), 1);
    }

    #[test]
    fn stack_rows_and_select() {
        let a = SampleSet::new(array![[1.0, 1.0], [2.0, 2.0]]).unwrap();
        let b = SampleSet::new(array![[3.0, 3.0]]).unwrap();
        let stacked = a.stack_rows(&b).unwrap();
        assert_eq!(stacked.n_samples(), 3);
        let picked = stacked.select(&[2, 0]);
        assert_eq!(picked.view()[[0, 0]], 3.0);
        assert_eq!(picked.view()[[1, 0]], 1.0);
    }
}
