//! Core data types for the analytics engine.

use crate::{Error, ErrorKind, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A single dated observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimePoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl TimePoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// A validated date-indexed series: dates strictly increasing, values finite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(try_from = "Vec<TimePoint>", into = "Vec<TimePoint>")]
pub struct TimeSeries {
    points: Vec<TimePoint>,
}

impl TimeSeries {
    /// Build a series, rejecting duplicate or out-of-order dates and non-finite values.
    pub fn new(points: Vec<TimePoint>) -> Result<Self> {
        for (i, point) in points.iter().enumerate() {
            if !point.value.is_finite() {
                return Err(Error::MalformedInput(format!(
                    "non-finite value at {}",
                    point.date
                )));
            }
            if i > 0 && points[i - 1].date >= point.date {
                return Err(Error::MalformedInput(format!(
                    "dates must be strictly increasing: {} follows {}",
                    point.date,
                    points[i - 1].date
                )));
            }
        }
        Ok(Self { points })
    }

    /// Build a series from `(date, value)` pairs.
    pub fn from_pairs(pairs: Vec<(NaiveDate, f64)>) -> Result<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(date, value)| TimePoint::new(date, value))
                .collect(),
        )
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TimePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TimePoint> {
        self.points.last()
    }

    /// Value observed exactly on `date`.
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|idx| self.points[idx].value)
    }

    /// Most recent value on or before `date`.
    pub fn value_as_of(&self, date: NaiveDate) -> Option<f64> {
        match self.points.binary_search_by_key(&date, |p| p.date) {
            Ok(idx) => Some(self.points[idx].value),
            Err(0) => None,
            Err(idx) => Some(self.points[idx - 1].value),
        }
    }

    /// Points falling inside the window (inclusive on both ends).
    pub fn window(&self, window: &EvaluationWindow) -> TimeSeries {
        Self {
            points: self
                .points
                .iter()
                .filter(|p| window.contains(p.date))
                .copied()
                .collect(),
        }
    }

    /// Multiply every value by a constant factor.
    pub fn scaled(&self, factor: f64) -> TimeSeries {
        Self {
            points: self
                .points
                .iter()
                .map(|p| TimePoint::new(p.date, p.value * factor))
                .collect(),
        }
    }
}

impl TryFrom<Vec<TimePoint>> for TimeSeries {
    type Error = Error;

    fn try_from(points: Vec<TimePoint>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<TimeSeries> for Vec<TimePoint> {
    fn from(series: TimeSeries) -> Self {
        series.points
    }
}

/// Sampling frequency of a return series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Frequency {
    Daily,
    Monthly,
    Quarterly,
    Annual,
}

/// Trading days per year used for daily annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

impl Frequency {
    /// Number of periods in one year.
    pub fn periods_per_year(&self) -> f64 {
        TRADING_DAYS_PER_YEAR / self.period_length_days()
    }

    /// Length of one period in trading days.
    pub fn period_length_days(&self) -> f64 {
        match self {
            Frequency::Daily => 1.0,
            Frequency::Monthly => 21.0,
            Frequency::Quarterly => 63.0,
            Frequency::Annual => TRADING_DAYS_PER_YEAR,
        }
    }

    /// Calendar bucket a date falls in, as `(year, sub-period)`.
    pub fn period_key(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            Frequency::Daily => (date.year(), date.ordinal()),
            Frequency::Monthly => (date.year(), date.month()),
            Frequency::Quarterly => (date.year(), (date.month() - 1) / 3 + 1),
            Frequency::Annual => (date.year(), 0),
        }
    }

    /// First and last calendar day of the bucket containing `date`.
    pub fn period_bounds(&self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let (start_month, months) = match self {
            Frequency::Daily => return (date, date),
            Frequency::Monthly => (date.month(), 1),
            Frequency::Quarterly => ((date.month() - 1) / 3 * 3 + 1, 3),
            Frequency::Annual => (1, 12),
        };
        let start = NaiveDate::from_ymd_opt(date.year(), start_month, 1).unwrap_or(date);
        let end = start
            .checked_add_months(chrono::Months::new(months))
            .and_then(|next| next.pred_opt())
            .unwrap_or(date);
        (start, end)
    }
}

/// An ordered sequence of periodic returns, each dated at the end of its period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawReturnSeries")]
pub struct ReturnSeries {
    pub frequency: Frequency,
    /// Date of the valuation preceding the first return, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_date: Option<NaiveDate>,
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

/// Unchecked wire form of [`ReturnSeries`].
#[derive(Deserialize)]
struct RawReturnSeries {
    frequency: Frequency,
    #[serde(default)]
    base_date: Option<NaiveDate>,
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl TryFrom<RawReturnSeries> for ReturnSeries {
    type Error = Error;

    fn try_from(raw: RawReturnSeries) -> Result<Self> {
        Self::new(raw.frequency, raw.base_date, raw.dates, raw.values)
    }
}

impl ReturnSeries {
    /// Build a return series, validating ordering and finiteness.
    pub fn new(
        frequency: Frequency,
        base_date: Option<NaiveDate>,
        dates: Vec<NaiveDate>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(Error::MalformedInput(format!(
                "{} dates but {} returns",
                dates.len(),
                values.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::MalformedInput(
                "return dates must be strictly increasing".to_string(),
            ));
        }
        if let (Some(base), Some(first)) = (base_date, dates.first()) {
            if base >= *first {
                return Err(Error::MalformedInput(format!(
                    "base date {} must precede first return date {}",
                    base, first
                )));
            }
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::MalformedInput(format!(
                "invalid return {} at {}",
                values[idx], dates[idx]
            )));
        }
        Ok(Self {
            frequency,
            base_date,
            dates,
            values,
        })
    }

    /// Daily series from `(date, return)` pairs with no known base date.
    pub fn daily(pairs: Vec<(NaiveDate, f64)>) -> Result<Self> {
        let (dates, values) = pairs.into_iter().unzip();
        Self::new(Frequency::Daily, None, dates, values)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }

    pub fn periods_per_year(&self) -> f64 {
        self.frequency.periods_per_year()
    }

    /// Returns dated inside the window. The base date becomes the last date
    /// before the window, so compounding starts from the window's opening value.
    pub fn window(&self, window: &EvaluationWindow) -> ReturnSeries {
        let start = self.dates.partition_point(|d| *d < window.start);
        let end = self.dates.partition_point(|d| *d <= window.end);
        let base_date = if start > 0 {
            Some(self.dates[start - 1])
        } else {
            self.base_date
        };
        let end = end.max(start);
        Self {
            frequency: self.frequency,
            base_date,
            dates: self.dates[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    /// True when both series are dated identically.
    pub fn same_index(&self, other: &ReturnSeries) -> bool {
        self.frequency == other.frequency && self.dates == other.dates
    }
}

/// Inclusive date range a statistic is evaluated over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EvaluationWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidConfig(format!(
                "evaluation window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A metric that was either computed or explicitly not computed.
///
/// Undefined or under-sampled metrics are never reported as NaN or zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Computed { value: T },
    NotComputed { kind: ErrorKind, reason: String },
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Computed { value } => Some(value),
            Outcome::NotComputed { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Computed { value } => Some(value),
            Outcome::NotComputed { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Outcome::Computed { .. })
    }

    /// Error kind when not computed.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Computed { .. } => None,
            Outcome::NotComputed { kind, .. } => Some(*kind),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Computed { value },
            Err(e) => Outcome::NotComputed {
                kind: e.kind(),
                reason: e.to_string(),
            },
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            TradeSide::Buy => 1.0,
            TradeSide::Sell => -1.0,
        }
    }
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
