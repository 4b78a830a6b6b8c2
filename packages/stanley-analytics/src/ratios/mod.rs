//! Risk-adjusted performance ratios.
//!
//! Sharpe, Sortino and Calmar are always evaluated over a caller-supplied
//! [`EvaluationWindow`] and risk-free rate. An undefined ratio (zero
//! volatility, zero downside deviation, zero drawdown) is an
//! [`Error::UndefinedRatio`], never an infinite or zero value.

mod tail;

pub use tail::{historical_cvar, historical_var, norm_ppf, parametric_var, tail_risk, TailRisk};

use crate::drawdown::{analyze_returns, DurationBasis};
use crate::returns::{annualized_series_return, cumulative_return};
use crate::types::{EvaluationWindow, Outcome, ReturnSeries, TimeSeries};
use crate::volatility::annualized_volatility;
use crate::{stats, Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Annual risk-free rate used for excess returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RiskFreeRate {
    /// One annual rate for every date.
    Constant(f64),
    /// Dated annual rates.
    Series(TimeSeries),
}

impl RiskFreeRate {
    /// Representative annual rate over a window.
    ///
    /// A series is averaged over the observations inside the window; with none
    /// inside, the last rate published before the window applies.
    pub fn annual_rate(&self, window: &EvaluationWindow) -> Result<f64> {
        match self {
            RiskFreeRate::Constant(rate) => Ok(*rate),
            RiskFreeRate::Series(series) => {
                let inside = series.window(window).values();
                if inside.is_empty() {
                    series.value_as_of(window.start).ok_or_else(|| {
                        Error::InsufficientData(format!(
                            "no risk-free rate on or before {}",
                            window.start
                        ))
                    })
                } else {
                    Ok(inside.iter().sum::<f64>() / inside.len() as f64)
                }
            }
        }
    }

    /// Annual rate in force on a date.
    pub fn annual_rate_on(&self, date: NaiveDate) -> Result<f64> {
        match self {
            RiskFreeRate::Constant(rate) => Ok(*rate),
            RiskFreeRate::Series(series) => series.value_as_of(date).ok_or_else(|| {
                Error::InsufficientData(format!("no risk-free rate on or before {}", date))
            }),
        }
    }
}

/// Threshold below which returns count as downside for Sortino.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MinimumAcceptableReturn {
    Zero,
    RiskFree,
    /// Fixed annual rate.
    Annual(f64),
}

/// Geometric per-period equivalent of an annual rate.
pub fn periodic_rate(annual: f64, periods_per_year: f64) -> f64 {
    (1.0 + annual).powf(1.0 / periods_per_year) - 1.0
}

/// Risk-adjusted ratios for one window and risk-free rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAdjustedMetrics {
    pub window: EvaluationWindow,
    pub risk_free_rate: Outcome<f64>,
    pub periods: usize,
    pub cumulative_return: f64,
    pub annualized_return: Outcome<f64>,
    pub annualized_volatility: Outcome<f64>,
    pub max_drawdown: Outcome<f64>,
    pub sharpe: Outcome<f64>,
    pub sortino: Outcome<f64>,
    pub calmar: Outcome<f64>,
}

/// Compute every ratio; each one fails independently.
pub fn compute(
    returns: &ReturnSeries,
    window: &EvaluationWindow,
    risk_free: &RiskFreeRate,
    mar: MinimumAcceptableReturn,
) -> RiskAdjustedMetrics {
    let windowed = returns.window(window);
    RiskAdjustedMetrics {
        window: *window,
        risk_free_rate: risk_free.annual_rate(window).into(),
        periods: windowed.len(),
        cumulative_return: cumulative_return(windowed.values()),
        annualized_return: window_returns(returns, window)
            .and_then(|w| annualized_series_return(&w))
            .into(),
        annualized_volatility: window_returns(returns, window)
            .and_then(|w| annualized_volatility(&w))
            .into(),
        max_drawdown: window_max_drawdown(returns, window).into(),
        sharpe: sharpe_ratio(returns, window, risk_free).into(),
        sortino: sortino_ratio(returns, window, risk_free, mar).into(),
        calmar: calmar_ratio(returns, window).into(),
    }
}

fn window_returns(returns: &ReturnSeries, window: &EvaluationWindow) -> Result<ReturnSeries> {
    let windowed = returns.window(window);
    if windowed.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "{} returns between {} and {}, need at least 2",
            windowed.len(),
            window.start,
            window.end
        )));
    }
    Ok(windowed)
}

/// `(annualized_return - rf) / annualized_volatility`.
pub fn sharpe_ratio(
    returns: &ReturnSeries,
    window: &EvaluationWindow,
    risk_free: &RiskFreeRate,
) -> Result<f64> {
    let windowed = window_returns(returns, window)?;
    let excess = annualized_series_return(&windowed)? - risk_free.annual_rate(window)?;
    let vol = annualized_volatility(&windowed)?;
    if stats::is_negligible(vol) {
        return Err(Error::UndefinedRatio(
            "Sharpe ratio undefined: volatility is zero".to_string(),
        ));
    }
    Ok(excess / vol)
}

/// Annualized downside deviation below a per-period threshold.
///
/// Periods above the threshold contribute zero but still count in the
/// denominator.
pub fn downside_deviation(values: &[f64], threshold: f64, periods_per_year: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(Error::InsufficientData(
            "downside deviation needs at least one return".to_string(),
        ));
    }
    let sum_sq: f64 = values
        .iter()
        .map(|r| (r - threshold).min(0.0).powi(2))
        .sum();
    Ok((sum_sq / values.len() as f64).sqrt() * periods_per_year.sqrt())
}

/// `(annualized_return - rf) / downside_deviation`.
pub fn sortino_ratio(
    returns: &ReturnSeries,
    window: &EvaluationWindow,
    risk_free: &RiskFreeRate,
    mar: MinimumAcceptableReturn,
) -> Result<f64> {
    let windowed = window_returns(returns, window)?;
    let ppy = windowed.periods_per_year();
    let rf = risk_free.annual_rate(window)?;
    let threshold = match mar {
        MinimumAcceptableReturn::Zero => 0.0,
        MinimumAcceptableReturn::RiskFree => periodic_rate(rf, ppy),
        MinimumAcceptableReturn::Annual(rate) => periodic_rate(rate, ppy),
    };

    let downside = downside_deviation(windowed.values(), threshold, ppy)?;
    if stats::is_negligible(downside) {
        return Err(Error::UndefinedRatio(
            "Sortino ratio undefined: no returns below the minimum acceptable return".to_string(),
        ));
    }
    Ok((annualized_series_return(&windowed)? - rf) / downside)
}

fn window_max_drawdown(returns: &ReturnSeries, window: &EvaluationWindow) -> Result<f64> {
    let windowed = returns.window(window);
    if windowed.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no returns between {} and {}",
            window.start, window.end
        )));
    }
    Ok(analyze_returns(&windowed, DurationBasis::Trading)?.max_drawdown)
}

/// `annualized_return / |max_drawdown|` over the window.
pub fn calmar_ratio(returns: &ReturnSeries, window: &EvaluationWindow) -> Result<f64> {
    let windowed = window_returns(returns, window)?;
    let mdd = window_max_drawdown(returns, window)?;
    if mdd == 0.0 {
        return Err(Error::UndefinedRatio(
            "Calmar ratio undefined: maximum drawdown is zero".to_string(),
        ));
    }
    Ok(annualized_series_return(&windowed)? / mdd.abs())
}
