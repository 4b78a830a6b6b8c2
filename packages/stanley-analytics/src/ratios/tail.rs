//! Tail risk: Value at Risk and Conditional VaR.
//!
//! All figures are one-period losses expressed as positive fractions of
//! portfolio value (0.02 = a 2% loss).

use crate::stats;
use crate::types::{EvaluationWindow, ReturnSeries};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// VaR and CVaR at one confidence level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TailRisk {
    /// Confidence level (e.g., 0.95 for 95%)
    pub confidence: f64,
    /// Empirical loss quantile
    pub historical_var: f64,
    /// Mean loss beyond the historical VaR
    pub historical_cvar: f64,
    /// Normal-distribution VaR from mean and sample volatility
    pub parametric_var: f64,
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(Error::InvalidConfig(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    Ok(())
}

/// Compute all tail measures over an evaluation window.
pub fn tail_risk(
    returns: &ReturnSeries,
    window: &EvaluationWindow,
    confidence: f64,
) -> Result<TailRisk> {
    let windowed = returns.window(window);
    let values = windowed.values();
    Ok(TailRisk {
        confidence,
        historical_var: historical_var(values, confidence)?,
        historical_cvar: historical_cvar(values, confidence)?,
        parametric_var: parametric_var(values, confidence)?,
    })
}

/// Historical VaR: the negated `(1 - confidence)` quantile of returns.
pub fn historical_var(returns: &[f64], confidence: f64) -> Result<f64> {
    validate_confidence(confidence)?;
    stats::quantile(returns, 1.0 - confidence)
        .map(|q| -q)
        .ok_or_else(|| Error::InsufficientData("VaR needs at least one return".to_string()))
}

/// Historical CVaR (expected shortfall): mean loss of returns at or below the VaR quantile.
pub fn historical_cvar(returns: &[f64], confidence: f64) -> Result<f64> {
    let var = historical_var(returns, confidence)?;
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= -var).collect();
    // The smallest return is always in the tail, so the mean exists.
    stats::mean(&tail)
        .map(|m| -m)
        .ok_or_else(|| Error::InsufficientData("empty VaR tail".to_string()))
}

/// Parametric VaR assuming normally distributed returns.
pub fn parametric_var(returns: &[f64], confidence: f64) -> Result<f64> {
    validate_confidence(confidence)?;
    let (Some(mean), Some(std)) = (stats::mean(returns), stats::sample_std(returns)) else {
        return Err(Error::InsufficientData(
            "parametric VaR needs at least 2 returns".to_string(),
        ));
    };
    let z = norm_ppf(1.0 - confidence);
    Ok(-(mean + z * std))
}

/// Inverse cumulative distribution function for standard normal distribution.
///
/// Uses Acklam's algorithm for high accuracy across the full range.
/// Source: https://web.archive.org/web/20151110174102/http://home.online.no/~pjacklam/notes/invnorm/
pub fn norm_ppf(p: f64) -> f64 {
    // Coefficients in rational approximations
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];

    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];

    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];

    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const RETURNS: [f64; 10] = [
        0.01, -0.01, 0.02, -0.02, 0.01, -0.01, 0.015, -0.015, 0.005, -0.005,
    ];

    #[test]
    fn test_norm_ppf() {
        assert!((norm_ppf(0.5)).abs() < 0.001);
        assert!((norm_ppf(0.95) - 1.645).abs() < 0.01);
        assert!((norm_ppf(0.975) - 1.96).abs() < 0.01);
        assert!((norm_ppf(0.99) - 2.326).abs() < 0.01);
        // Symmetry
        assert!((norm_ppf(0.05) + 1.645).abs() < 0.01);
    }

    #[test]
    fn test_historical_var_and_cvar() {
        let var = historical_var(&RETURNS, 0.9).unwrap();
        // 10% quantile of the sorted sample sits between -0.02 and -0.015
        assert!((var - 0.0155).abs() < 1e-12);

        let cvar = historical_cvar(&RETURNS, 0.9).unwrap();
        assert!((cvar - 0.02).abs() < 1e-12);
        assert!(cvar >= var);
    }

    #[test]
    fn test_parametric_var_positive_for_symmetric_returns() {
        let var = parametric_var(&RETURNS, 0.95).unwrap();
        assert!(var > 0.0);
        assert!(var < 0.05);
    }

    #[test]
    fn test_confidence_validation() {
        assert!(matches!(
            historical_var(&RETURNS, 1.0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(parametric_var(&[0.01], 0.95).is_err());
    }

    #[test]
    fn test_tail_risk_over_window() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        let rets = ReturnSeries::daily(
            RETURNS
                .iter()
                .enumerate()
                .map(|(i, r)| (d(i as u32 + 1), *r))
                .collect(),
        )
        .unwrap();
        let window = EvaluationWindow::new(d(1), d(10)).unwrap();

        let tail = tail_risk(&rets, &window, 0.95).unwrap();
        assert_eq!(tail.confidence, 0.95);
        assert!(tail.historical_cvar >= tail.historical_var);
    }
}
