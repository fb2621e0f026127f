//! Numerical helpers: summary statistics, interpolated quantiles and the
//! Binomial quantiles behind the SBC rank-histogram band.

use std::f64::consts::PI;

use lc2st_error::{Lc2stError, Result};

/// Arithmetic mean; `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation (divides by `n`).
#[must_use]
pub fn population_std(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Quantile of already sorted data with linear interpolation between order
/// statistics (position `q * (n - 1)`).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Result<f64> {
    if sorted.is_empty() {
        return Err(Lc2stError::config("quantile of an empty sample"));
    }
    if !(0.0..=1.0).contains(&q) {
        return Err(Lc2stError::config(format!("quantile level {q} outside [0, 1]")));
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `ln(k!)`. Exact below 32; Stirling series above.
fn ln_factorial(k: u64) -> f64 {
    if k < 32 {
        return (2..=k).map(|i| (i as f64).ln()).sum();
    }
    let x = k as f64;
    let inv = x.recip();
    let inv2 = inv * inv;
    let correction = inv * (1.0 / 12.0 - inv2 * (1.0 / 360.0 - inv2 / 1260.0));
    x.mul_add(x.ln(), -x) + 0.5 * (2.0 * PI * x).ln() + correction
}

/// `ln P(X = k)` for `X ~ Binomial(n, p)`, `0 < p < 1`, `k <= n`.
fn ln_binomial_pmf(k: u64, n: u64, p: f64) -> f64 {
    let ln_choose = ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k);
    ln_choose + (k as f64).mul_add(p.ln(), (n - k) as f64 * (-p).ln_1p())
}

/// `P(X <= k)` for `X ~ Binomial(n, p)`.
#[must_use]
pub fn binomial_cdf(k: u64, n: u64, p: f64) -> f64 {
    if k >= n || p <= 0.0 {
        return 1.0;
    }
    if p >= 1.0 {
        return 0.0;
    }
    (0..=k)
        .map(|j| ln_binomial_pmf(j, n, p).exp())
        .sum::<f64>()
        .min(1.0)
}

/// Smallest `k` with `P(X <= k) >= q` for `X ~ Binomial(n, p)`.
///
/// Walks the pmf upward from zero, so the cost is linear in the answer.
pub fn binomial_quantile(q: f64, n: u64, p: f64) -> Result<u64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(Lc2stError::config(format!("binomial quantile level {q} outside [0, 1]")));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(Lc2stError::config(format!("binomial probability {p} outside [0, 1]")));
    }
    if q <= 0.0 || p <= 0.0 {
        return Ok(0);
    }
    if q >= 1.0 || p >= 1.0 {
        return Ok(n);
    }
    let mut cdf = 0.0;
    for k in 0..n {
        cdf += ln_binomial_pmf(k, n, p).exp();
        if cdf >= q {
            return Ok(k);
        }
    }
    Ok(n)
}
