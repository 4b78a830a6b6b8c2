//! Volatility estimators: realized (rolling window) and EWMA.
//!
//! Both estimators are annualized with `sqrt(252 / period_length_in_days)`.
//! Dates before an estimator has enough history carry `None` rather than a
//! placeholder value.

use crate::stats;
use crate::types::{Frequency, ReturnSeries};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a volatility estimate was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolatilityMethod {
    /// Sample standard deviation over a trailing window.
    Realized { window: usize },
    /// Exponentially weighted variance with decay `lambda`, seeded from the
    /// sample variance of the first `warmup` returns.
    Ewma { lambda: f64, warmup: usize },
}

impl VolatilityMethod {
    /// Check the method parameters: window >= 2, lambda in (0, 1).
    pub fn validate(&self) -> Result<()> {
        match *self {
            VolatilityMethod::Realized { window } => validate_window(window, "volatility window"),
            VolatilityMethod::Ewma { lambda, warmup } => {
                validate_lambda(lambda)?;
                validate_window(warmup, "EWMA warm-up")
            }
        }
    }
}

fn validate_window(window: usize, what: &str) -> Result<()> {
    if window < 2 {
        return Err(Error::InvalidConfig(format!(
            "{} must cover at least 2 observations, got {}",
            what, window
        )));
    }
    Ok(())
}

fn validate_lambda(lambda: f64) -> Result<()> {
    if !(lambda > 0.0 && lambda < 1.0) {
        return Err(Error::InvalidConfig(format!(
            "EWMA decay factor must be in (0, 1), got {}",
            lambda
        )));
    }
    Ok(())
}

/// Annualized volatility on one date; `None` before warm-up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VolatilityPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// A dated sequence of annualized volatility values tagged with its method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilityEstimate {
    pub method: VolatilityMethod,
    pub frequency: Frequency,
    pub points: Vec<VolatilityPoint>,
}

impl VolatilityEstimate {
    /// Most recent available estimate.
    pub fn latest(&self) -> Option<(NaiveDate, f64)> {
        self.points
            .iter()
            .rev()
            .find_map(|p| p.value.map(|v| (p.date, v)))
    }

    /// Estimate on a specific date.
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .and_then(|idx| self.points[idx].value)
    }

    /// Number of dates with an estimate.
    pub fn available(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }
}

/// Multiplier turning a per-period standard deviation into an annual one.
pub fn annualization_factor(frequency: Frequency) -> f64 {
    frequency.periods_per_year().sqrt()
}

/// Annualized sample volatility of a whole return series.
pub fn annualized_volatility(returns: &ReturnSeries) -> Result<f64> {
    let std = stats::sample_std(returns.values()).ok_or_else(|| {
        Error::InsufficientData(format!(
            "need at least 2 returns for volatility, got {}",
            returns.len()
        ))
    })?;
    Ok(std * annualization_factor(returns.frequency))
}

/// Run the estimator described by `method`.
pub fn estimate(returns: &ReturnSeries, method: VolatilityMethod) -> Result<VolatilityEstimate> {
    match method {
        VolatilityMethod::Realized { window } => realized_volatility(returns, window),
        VolatilityMethod::Ewma { lambda, warmup } => ewma_volatility(returns, lambda, warmup),
    }
}

/// Rolling realized volatility over a trailing `window` of returns.
pub fn realized_volatility(returns: &ReturnSeries, window: usize) -> Result<VolatilityEstimate> {
    validate_window(window, "volatility window")?;
    ensure_history(returns, window)?;

    let factor = annualization_factor(returns.frequency);
    let values = returns.values();
    let points = returns
        .dates()
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let value = if i + 1 >= window {
                stats::sample_std(&values[i + 1 - window..=i]).map(|s| s * factor)
            } else {
                None
            };
            VolatilityPoint { date: *date, value }
        })
        .collect();

    Ok(VolatilityEstimate {
        method: VolatilityMethod::Realized { window },
        frequency: returns.frequency,
        points,
    })
}

/// EWMA conditional volatility.
///
/// The variance is seeded with the sample variance of the first `warmup`
/// returns (reported on the last warm-up date) and then updated with
/// `σ²_t = λ·σ²_{t-1} + (1-λ)·r_t²`.
pub fn ewma_volatility(
    returns: &ReturnSeries,
    lambda: f64,
    warmup: usize,
) -> Result<VolatilityEstimate> {
    validate_lambda(lambda)?;
    validate_window(warmup, "EWMA warm-up")?;
    ensure_history(returns, warmup)?;

    let factor = annualization_factor(returns.frequency);
    let values = returns.values();
    let seed = stats::sample_variance(&values[..warmup]).ok_or_else(|| {
        Error::InsufficientData("EWMA warm-up window too short".to_string())
    })?;
    let mut state = EwmaState::new(lambda, seed)?;

    let points = returns
        .dates()
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let value = if i + 1 < warmup {
                None
            } else {
                if i >= warmup {
                    state.update(values[i]);
                }
                Some(state.variance().sqrt() * factor)
            };
            VolatilityPoint { date: *date, value }
        })
        .collect();

    Ok(VolatilityEstimate {
        method: VolatilityMethod::Ewma { lambda, warmup },
        frequency: returns.frequency,
        points,
    })
}

fn ensure_history(returns: &ReturnSeries, required: usize) -> Result<()> {
    if returns.len() < required {
        return Err(Error::InsufficientData(format!(
            "need {} returns for the estimator, got {}",
            required,
            returns.len()
        )));
    }
    Ok(())
}

/// Per-period EWMA variance recursion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EwmaState {
    lambda: f64,
    variance: f64,
}

impl EwmaState {
    /// Start the recursion from a seed variance.
    pub fn new(lambda: f64, seed_variance: f64) -> Result<Self> {
        validate_lambda(lambda)?;
        if !(seed_variance >= 0.0 && seed_variance.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "EWMA seed variance must be finite and non-negative, got {}",
                seed_variance
            )));
        }
        Ok(Self {
            lambda,
            variance: seed_variance,
        })
    }

    /// Fold in the next return and return the new variance.
    pub fn update(&mut self, r: f64) -> f64 {
        self.variance = self.lambda * self.variance + (1.0 - self.lambda) * r * r;
        self.variance
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}
