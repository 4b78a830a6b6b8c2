//! Shared statistics helpers.
//!
//! All helpers return `None` when the sample is too small for the statistic,
//! leaving the caller to decide which error to raise.

use serde::{Deserialize, Serialize};

/// Dispersion below this is treated as zero when it would be a denominator.
pub const NEGLIGIBLE: f64 = 1e-14;

/// True when `value` is too close to zero to divide by.
pub fn is_negligible(value: f64) -> bool {
    value.abs() < NEGLIGIBLE
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator), two-pass for stability.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}

/// Sample standard deviation.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Sample covariance of two equally long slices.
pub fn sample_covariance(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let sum: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    Some(sum / (x.len() - 1) as f64)
}

/// Ordinary least-squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    pub r_squared: f64,
}

/// Fit a simple linear regression. `None` when `x` has no variance.
///
/// A regressor whose standard deviation is negligible relative to its
/// magnitude counts as constant; two-pass rounding noise would otherwise
/// produce an arbitrary slope.
pub fn ols(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let var_x = sample_variance(x)?;
    let scale = x.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    if var_x.sqrt() < NEGLIGIBLE * scale {
        return None;
    }
    let cov = sample_covariance(x, y)?;
    let slope = cov / var_x;
    let intercept = mean(y)? - slope * mean(x)?;

    let var_y = sample_variance(y)?;
    // A constant y is fully explained by the fit.
    let r_squared = if var_y > 0.0 {
        (cov * cov) / (var_x * var_y)
    } else {
        1.0
    };

    Some(LinearFit {
        intercept,
        slope,
        r_squared,
    })
}

/// Linear-interpolated quantile of an unsorted sample, `q` in [0, 1].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
