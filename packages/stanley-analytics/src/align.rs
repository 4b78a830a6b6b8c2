//! Time-series alignment onto a common calendar.
//!
//! Heterogeneous series (prices, positions, benchmark levels) are reindexed
//! onto a shared set of dates and gaps are resolved with a declared policy.

use crate::types::TimeSeries;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the common calendar is built from the input series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalendarMode {
    /// Every date present in any series.
    Union,
    /// Only dates present in all series.
    Intersection,
}

/// Policy for calendar dates a series has no observation for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    /// Carry the last valid observation forward.
    ForwardFill,
    /// Interpolate linearly in calendar days between neighbouring observations.
    Linear,
    /// Leave the date missing.
    LeaveMissing,
}

/// Alignment settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AlignmentConfig {
    pub calendar: CalendarMode,
    pub gap_fill: GapFill,
    /// Largest tolerated share of calendar dates still missing after fill.
    pub max_missing_fraction: f64,
}

/// One series reindexed onto the frame's calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignedSeries {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl AlignedSeries {
    /// Share of calendar dates with no value.
    pub fn missing_fraction(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().filter(|v| v.is_none()).count() as f64 / self.values.len() as f64
    }
}

/// A set of series sharing one calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignedFrame {
    dates: Vec<NaiveDate>,
    series: Vec<AlignedSeries>,
}

impl AlignedFrame {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn series(&self) -> &[AlignedSeries] {
        &self.series
    }

    pub fn get(&self, name: &str) -> Option<&AlignedSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    /// The named series as a [`TimeSeries`], dropping dates still missing.
    pub fn to_time_series(&self, name: &str) -> Option<TimeSeries> {
        let aligned = self.get(name)?;
        let pairs = self
            .dates
            .iter()
            .zip(&aligned.values)
            .filter_map(|(date, value)| value.map(|v| (*date, v)))
            .collect();
        TimeSeries::from_pairs(pairs).ok()
    }

    /// Dates where every series has a value, with the values in series order.
    pub fn complete_rows(&self) -> Vec<(NaiveDate, Vec<f64>)> {
        self.dates
            .iter()
            .enumerate()
            .filter_map(|(i, date)| {
                let row: Option<Vec<f64>> = self.series.iter().map(|s| s.values[i]).collect();
                row.map(|values| (*date, values))
            })
            .collect()
    }
}

/// Build the common calendar for a set of series.
pub fn build_calendar(series: &[&TimeSeries], mode: CalendarMode) -> Vec<NaiveDate> {
    let mut sets = series
        .iter()
        .map(|s| s.points().iter().map(|p| p.date).collect::<BTreeSet<_>>());

    let Some(first) = sets.next() else {
        return Vec::new();
    };

    let calendar = match mode {
        CalendarMode::Union => sets.fold(first, |acc, s| acc.union(&s).copied().collect()),
        CalendarMode::Intersection => {
            sets.fold(first, |acc, s| acc.intersection(&s).copied().collect())
        }
    };
    calendar.into_iter().collect()
}

/// Align named series onto a calendar built from the series themselves.
pub fn align(inputs: &[(&str, &TimeSeries)], config: &AlignmentConfig) -> Result<AlignedFrame> {
    if inputs.is_empty() {
        return Err(Error::Alignment("no series to align".to_string()));
    }
    let all: Vec<&TimeSeries> = inputs.iter().map(|(_, s)| *s).collect();
    let calendar = build_calendar(&all, config.calendar);
    align_to_calendar(inputs, &calendar, config)
}

/// Align named series onto an explicit reference calendar.
///
/// The calendar must be strictly increasing. Each series must share at least
/// one date with it, and after gap fill no more than
/// `config.max_missing_fraction` of its dates may remain missing.
pub fn align_to_calendar(
    inputs: &[(&str, &TimeSeries)],
    calendar: &[NaiveDate],
    config: &AlignmentConfig,
) -> Result<AlignedFrame> {
    if calendar.is_empty() {
        return Err(Error::Alignment("reference calendar is empty".to_string()));
    }
    if calendar.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Alignment(
            "reference calendar must be strictly increasing".to_string(),
        ));
    }

    let mut series = Vec::with_capacity(inputs.len());
    for (name, input) in inputs {
        if !calendar.iter().any(|date| input.get(*date).is_some()) {
            return Err(Error::Alignment(format!(
                "series '{}' has no dates in common with the calendar",
                name
            )));
        }

        let values: Vec<Option<f64>> = calendar
            .iter()
            .map(|date| fill_value(input, *date, config.gap_fill))
            .collect();

        let aligned = AlignedSeries {
            name: (*name).to_string(),
            values,
        };
        let missing = aligned.missing_fraction();
        if missing > config.max_missing_fraction {
            return Err(Error::Alignment(format!(
                "series '{}' is missing {:.1}% of calendar dates after fill (limit {:.1}%)",
                name,
                missing * 100.0,
                config.max_missing_fraction * 100.0
            )));
        }
        if missing > 0.0 {
            tracing::debug!(series = %name, missing, "aligned series has unfilled dates");
        }
        series.push(aligned);
    }

    Ok(AlignedFrame {
        dates: calendar.to_vec(),
        series,
    })
}

fn fill_value(series: &TimeSeries, date: NaiveDate, policy: GapFill) -> Option<f64> {
    let points = series.points();
    let idx = match points.binary_search_by_key(&date, |p| p.date) {
        Ok(idx) => return Some(points[idx].value),
        Err(idx) => idx,
    };

    match policy {
        GapFill::LeaveMissing => None,
        GapFill::ForwardFill => idx.checked_sub(1).map(|prev| points[prev].value),
        GapFill::Linear => {
            let prev = points.get(idx.checked_sub(1)?)?;
            let next = points.get(idx)?;
            let span = (next.date - prev.date).num_days() as f64;
            let offset = (date - prev.date).num_days() as f64;
            Some(prev.value + (next.value - prev.value) * offset / span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn config(calendar: CalendarMode, gap_fill: GapFill) -> AlignmentConfig {
        AlignmentConfig {
            calendar,
            gap_fill,
            max_missing_fraction: 0.5,
        }
    }

    fn series(pairs: &[(u32, f64)]) -> TimeSeries {
        TimeSeries::from_pairs(pairs.iter().map(|(day, v)| (d(*day), *v)).collect()).unwrap()
    }

    #[test]
    fn test_union_forward_fill() {
        let a = series(&[(1, 10.0), (2, 11.0), (4, 12.0)]);
        let b = series(&[(1, 100.0), (3, 101.0), (4, 102.0)]);

        let frame = align(
            &[("a", &a), ("b", &b)],
            &config(CalendarMode::Union, GapFill::ForwardFill),
        )
        .unwrap();

        assert_eq!(frame.dates(), &[d(1), d(2), d(3), d(4)]);
        assert_eq!(
            frame.get("a").unwrap().values,
            vec![Some(10.0), Some(11.0), Some(11.0), Some(12.0)]
        );
        assert_eq!(
            frame.get("b").unwrap().values,
            vec![Some(100.0), Some(100.0), Some(101.0), Some(102.0)]
        );
    }

    #[test]
    fn test_intersection_calendar() {
        let a = series(&[(1, 10.0), (2, 11.0), (4, 12.0)]);
        let b = series(&[(1, 100.0), (3, 101.0), (4, 102.0)]);

        let frame = align(
            &[("a", &a), ("b", &b)],
            &config(CalendarMode::Intersection, GapFill::LeaveMissing),
        )
        .unwrap();

        assert_eq!(frame.dates(), &[d(1), d(4)]);
        assert_eq!(frame.complete_rows().len(), 2);
    }

    #[test]
    fn test_linear_interpolation_by_calendar_days() {
        let a = series(&[(1, 10.0), (5, 14.0)]);
        let calendar = [d(1), d(2), d(4), d(5), d(6)];

        let frame = align_to_calendar(
            &[("a", &a)],
            &calendar,
            &config(CalendarMode::Union, GapFill::Linear),
        )
        .unwrap();

        let values = &frame.get("a").unwrap().values;
        assert_relative_eq!(values[1].unwrap(), 11.0);
        assert_relative_eq!(values[2].unwrap(), 13.0);
        // No extrapolation past the last observation
        assert_eq!(values[4], None);
    }

    #[test]
    fn test_leading_dates_never_backfilled() {
        let a = series(&[(1, 10.0), (2, 11.0), (3, 12.0)]);
        let b = series(&[(2, 100.0), (3, 101.0)]);

        let frame = align(
            &[("a", &a), ("b", &b)],
            &config(CalendarMode::Union, GapFill::ForwardFill),
        )
        .unwrap();

        assert_eq!(frame.get("b").unwrap().values[0], None);
        assert_eq!(frame.complete_rows().len(), 2);
    }

    #[test]
    fn test_no_overlap_fails() {
        let a = series(&[(1, 10.0), (2, 11.0)]);
        let calendar = [d(10), d(11)];

        let result = align_to_calendar(
            &[("a", &a)],
            &calendar,
            &config(CalendarMode::Union, GapFill::ForwardFill),
        );
        assert!(matches!(result, Err(Error::Alignment(_))));
    }

    #[test]
    fn test_missing_fraction_limit() {
        let a = series(&[(1, 10.0), (2, 11.0), (3, 12.0), (4, 13.0)]);
        let b = series(&[(4, 100.0)]);

        // b is missing 3 of 4 dates; forward fill cannot help leading gaps
        let result = align(
            &[("a", &a), ("b", &b)],
            &config(CalendarMode::Union, GapFill::ForwardFill),
        );
        assert!(matches!(result, Err(Error::Alignment(_))));
    }

    #[test]
    fn test_aligned_input_is_noop() {
        let a = series(&[(1, 10.0), (2, 11.0), (3, 12.0)]);
        let b = series(&[(1, 20.0), (2, 21.0), (3, 22.0)]);
        let cfg = config(CalendarMode::Union, GapFill::ForwardFill);

        let frame = align(&[("a", &a), ("b", &b)], &cfg).unwrap();
        assert_eq!(frame.to_time_series("a").unwrap(), a);
        assert_eq!(frame.to_time_series("b").unwrap(), b);
    }

    #[test]
    fn test_alignment_is_idempotent() {
        let a = series(&[(1, 10.0), (2, 11.0), (4, 12.0)]);
        let b = series(&[(1, 100.0), (3, 101.0), (4, 102.0)]);
        let cfg = config(CalendarMode::Union, GapFill::ForwardFill);

        let first = align(&[("a", &a), ("b", &b)], &cfg).unwrap();
        let a1 = first.to_time_series("a").unwrap();
        let b1 = first.to_time_series("b").unwrap();

        let second = align(&[("a", &a1), ("b", &b1)], &cfg).unwrap();
        assert_eq!(first, second);
    }
}
