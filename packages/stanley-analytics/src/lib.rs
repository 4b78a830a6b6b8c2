//! Stanley Analytics - Portfolio performance and risk analytics engine.
//!
//! This crate turns raw valuation history into the measures the Stanley persona
//! reports on:
//!
//! - **Alignment**: date-indexed series reindexed onto a common calendar
//! - **Returns**: periodic, cumulative, annualized and aggregated returns
//! - **Volatility**: realized (rolling window) and EWMA estimates
//! - **Drawdowns**: running-peak state machine and drawdown episodes
//! - **Risk-adjusted ratios**: Sharpe, Sortino, Calmar, VaR/CVaR
//! - **Benchmark comparison**: tracking error, information ratio, alpha/beta
//! - **Risk segmentation**: volatility tiers and risk contributions
//! - **Transaction analytics**: turnover, volume and cost impact
//!
//! Every computation is a pure function of its inputs and an explicit
//! [`EngineConfig`]; there is no process-wide state.
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use stanley_analytics::{drawdown, returns, TimeSeries};
//!
//! let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
//! let values = TimeSeries::from_pairs(vec![
//!     (d(1), 100.0),
//!     (d(2), 105.0),
//!     (d(3), 98.0),
//!     (d(4), 102.0),
//! ])
//! .unwrap();
//!
//! let rets = returns::simple_returns(&values).unwrap();
//! assert!((returns::cumulative_return(rets.values()) - 0.02).abs() < 1e-12);
//!
//! let dd = drawdown::analyze(&values, drawdown::DurationBasis::Calendar).unwrap();
//! assert!((dd.max_drawdown - (98.0 / 105.0 - 1.0)).abs() < 1e-12);
//! ```

pub mod align;
pub mod benchmark;
pub mod config;
pub mod drawdown;
pub mod export;
pub mod ingest;
pub mod ratios;
pub mod report;
pub mod returns;
pub mod segmentation;
pub mod stats;
pub mod transactions;
pub mod types;
pub mod volatility;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use config::EngineConfig;
pub use types::{
    ApiResponse, EvaluationWindow, Frequency, Outcome, ReturnSeries, TimePoint, TimeSeries,
    TradeSide,
};

// Re-export main functionality
pub use report::{AnalyticsReport, InputBundle};

/// Error types for stanley-analytics operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Undefined ratio: {0}")]
    UndefinedRatio(String),

    #[error("Mismatched index: {0}")]
    MismatchedIndex(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical invariant violated: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Classify the error for reporting in an [`Outcome`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedInput(_) => ErrorKind::MalformedInput,
            Error::Alignment(_) => ErrorKind::Alignment,
            Error::InsufficientData(_) => ErrorKind::InsufficientData,
            Error::UndefinedRatio(_) => ErrorKind::UndefinedRatio,
            Error::MismatchedIndex(_) => ErrorKind::MismatchedIndex,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Error::Io(_) | Error::Json(_) | Error::TomlDe(_) | Error::TomlSer(_) => {
                ErrorKind::Io
            }
        }
    }
}

/// Serializable error classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    Alignment,
    InsufficientData,
    UndefinedRatio,
    MismatchedIndex,
    InvalidConfig,
    InvariantViolation,
    Io,
}

/// Result type for stanley-analytics operations.
pub type Result<T> = std::result::Result<T, Error>;
