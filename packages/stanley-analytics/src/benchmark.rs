//! Benchmark-relative performance.
//!
//! Portfolio and benchmark return series must share an identical date index;
//! callers align the underlying levels first.

use crate::ratios::{periodic_rate, RiskFreeRate};
use crate::returns::{annualized_series_return, cumulative_return};
use crate::stats;
use crate::types::{Outcome, ReturnSeries};
use crate::volatility::annualized_volatility;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// OLS fit of portfolio excess returns on benchmark excess returns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Regression {
    /// Per-period intercept
    pub alpha: f64,
    /// Intercept scaled by periods per year
    pub alpha_annualized: f64,
    pub beta: f64,
    pub r_squared: f64,
    pub observations: usize,
}

/// Portfolio versus benchmark over a shared date index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkComparison {
    pub active_returns: ReturnSeries,
    /// Annualized portfolio return minus annualized benchmark return
    pub annualized_active_return: Outcome<f64>,
    pub tracking_error: Outcome<f64>,
    pub information_ratio: Outcome<f64>,
    pub regression: Outcome<Regression>,
    /// Share of periods with positive active return
    pub hit_rate: Outcome<f64>,
    pub up_capture: Outcome<f64>,
    pub down_capture: Outcome<f64>,
}

fn ensure_same_index(portfolio: &ReturnSeries, benchmark: &ReturnSeries) -> Result<()> {
    if !portfolio.same_index(benchmark) {
        return Err(Error::MismatchedIndex(format!(
            "portfolio has {} {:?} returns, benchmark has {} {:?} returns on different dates",
            portfolio.len(),
            portfolio.frequency,
            benchmark.len(),
            benchmark.frequency
        )));
    }
    Ok(())
}

/// Portfolio minus benchmark return on each date.
pub fn active_returns(portfolio: &ReturnSeries, benchmark: &ReturnSeries) -> Result<ReturnSeries> {
    ensure_same_index(portfolio, benchmark)?;
    let values = portfolio
        .values()
        .iter()
        .zip(benchmark.values())
        .map(|(p, b)| p - b)
        .collect();
    ReturnSeries::new(
        portfolio.frequency,
        portfolio.base_date,
        portfolio.dates().to_vec(),
        values,
    )
}

/// Annualized standard deviation of active returns.
pub fn tracking_error(active: &ReturnSeries) -> Result<f64> {
    annualized_volatility(active)
}

fn annualized_active_return(portfolio: &ReturnSeries, benchmark: &ReturnSeries) -> Result<f64> {
    ensure_same_index(portfolio, benchmark)?;
    Ok(annualized_series_return(portfolio)? - annualized_series_return(benchmark)?)
}

/// Annualized active return divided by tracking error.
pub fn information_ratio(portfolio: &ReturnSeries, benchmark: &ReturnSeries) -> Result<f64> {
    let active = active_returns(portfolio, benchmark)?;
    let te = tracking_error(&active)?;
    if stats::is_negligible(te) {
        return Err(Error::UndefinedRatio(
            "information ratio undefined: tracking error is zero".to_string(),
        ));
    }
    Ok(annualized_active_return(portfolio, benchmark)? / te)
}

/// Regress portfolio excess returns on benchmark excess returns.
pub fn regress(
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    risk_free: &RiskFreeRate,
) -> Result<Regression> {
    ensure_same_index(portfolio, benchmark)?;
    let ppy = portfolio.periods_per_year();

    let mut x = Vec::with_capacity(portfolio.len());
    let mut y = Vec::with_capacity(portfolio.len());
    for ((date, p), b) in portfolio.iter().zip(benchmark.values()) {
        let rf = periodic_rate(risk_free.annual_rate_on(date)?, ppy);
        y.push(p - rf);
        x.push(b - rf);
    }

    if x.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "regression needs at least 2 observations, got {}",
            x.len()
        )));
    }
    let fit = stats::ols(&x, &y).ok_or_else(|| {
        Error::UndefinedRatio("regression undefined: benchmark returns have no variance".to_string())
    })?;

    Ok(Regression {
        alpha: fit.intercept,
        alpha_annualized: fit.intercept * ppy,
        beta: fit.slope,
        r_squared: fit.r_squared,
        observations: x.len(),
    })
}

fn hit_rate(active: &ReturnSeries) -> Result<f64> {
    if active.is_empty() {
        return Err(Error::InsufficientData(
            "hit rate needs at least one period".to_string(),
        ));
    }
    let hits = active.values().iter().filter(|r| **r > 0.0).count();
    Ok(hits as f64 / active.len() as f64)
}

/// Ratio of geometric mean returns over periods where the benchmark moved in
/// the selected direction.
fn capture_ratio(portfolio: &ReturnSeries, benchmark: &ReturnSeries, up: bool) -> Result<f64> {
    let (p, b): (Vec<f64>, Vec<f64>) = portfolio
        .values()
        .iter()
        .zip(benchmark.values())
        .filter(|(_, b)| if up { **b > 0.0 } else { **b < 0.0 })
        .map(|(p, b)| (*p, *b))
        .unzip();
    if b.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no {} benchmark periods",
            if up { "up" } else { "down" }
        )));
    }
    let n = b.len() as f64;
    let geo = |values: &[f64]| (1.0 + cumulative_return(values)).powf(1.0 / n) - 1.0;
    let bench = geo(&b);
    if stats::is_negligible(bench) {
        return Err(Error::UndefinedRatio(
            "capture ratio undefined: benchmark mean return is zero".to_string(),
        ));
    }
    Ok(geo(&p) / bench)
}

/// Full comparison. Only an index mismatch fails the whole comparison; every
/// other metric is reported individually.
pub fn compare(
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    risk_free: &RiskFreeRate,
) -> Result<BenchmarkComparison> {
    let active = active_returns(portfolio, benchmark)?;

    Ok(BenchmarkComparison {
        annualized_active_return: annualized_active_return(portfolio, benchmark).into(),
        tracking_error: tracking_error(&active).into(),
        information_ratio: information_ratio(portfolio, benchmark).into(),
        regression: regress(portfolio, benchmark, risk_free).into(),
        hit_rate: hit_rate(&active).into(),
        up_capture: capture_ratio(portfolio, benchmark, true).into(),
        down_capture: capture_ratio(portfolio, benchmark, false).into(),
        active_returns: active,
    })
}
