//! Return engine: periodic, cumulative, annualized and aggregated returns.
//!
//! Valuations are expected to be total-return figures (distributions already
//! reinvested). Returns are always compounded across time, never summed or
//! averaged.

use crate::types::{Frequency, ReturnSeries, TimePoint, TimeSeries};
use crate::{Error, Result};
use chrono::NaiveDate;

/// Simple periodic returns `V_t / V_{t-1} - 1` from a daily valuation series.
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use stanley_analytics::{returns::simple_returns, TimeSeries};
///
/// let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
/// let values = TimeSeries::from_pairs(vec![(d(1), 100.0), (d(2), 105.0)]).unwrap();
/// let rets = simple_returns(&values).unwrap();
///
/// assert!((rets.values()[0] - 0.05).abs() < 1e-12);
/// ```
pub fn simple_returns(valuations: &TimeSeries) -> Result<ReturnSeries> {
    period_returns(valuations, |prev, curr| curr / prev - 1.0)
}

/// Continuously compounded returns `ln(V_t / V_{t-1})`.
pub fn log_returns(valuations: &TimeSeries) -> Result<ReturnSeries> {
    let simple = simple_returns(valuations)?;
    let logs = simple.values().iter().map(|r| (1.0 + r).ln()).collect();
    ReturnSeries::new(
        Frequency::Daily,
        simple.base_date,
        simple.dates().to_vec(),
        logs,
    )
}

fn period_returns(
    valuations: &TimeSeries,
    compute: impl Fn(f64, f64) -> f64,
) -> Result<ReturnSeries> {
    let points = valuations.points();
    if points.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "need at least 2 valuations for returns, got {}",
            points.len()
        )));
    }
    if let Some(bad) = points.iter().find(|p| p.value <= 0.0) {
        return Err(Error::MalformedInput(format!(
            "valuation must be positive, got {} at {}",
            bad.value, bad.date
        )));
    }

    let (dates, values) = points
        .windows(2)
        .map(|w| (w[1].date, compute(w[0].value, w[1].value)))
        .unzip();

    ReturnSeries::new(Frequency::Daily, Some(points[0].date), dates, values)
}

/// Compounded return over a window: `prod(1 + r) - 1`.
pub fn cumulative_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Annualize a cumulative return earned over `periods` periods.
///
/// Uses `(1 + cumulative)^(periods_per_year / periods) - 1`.
pub fn annualized_return(cumulative: f64, periods: usize, periods_per_year: f64) -> Result<f64> {
    if periods == 0 {
        return Err(Error::InsufficientData(
            "cannot annualize a return over zero periods".to_string(),
        ));
    }
    Ok((1.0 + cumulative).powf(periods_per_year / periods as f64) - 1.0)
}

/// Annualized compounded return of a return series.
pub fn annualized_series_return(returns: &ReturnSeries) -> Result<f64> {
    annualized_return(
        cumulative_return(returns.values()),
        returns.len(),
        returns.periods_per_year(),
    )
}

/// Compound daily returns into monthly, quarterly or annual returns.
///
/// Each bucket is dated at its last observation. Aggregating to the series'
/// own frequency returns it unchanged.
pub fn aggregate(returns: &ReturnSeries, frequency: Frequency) -> Result<ReturnSeries> {
    if frequency == returns.frequency {
        return Ok(returns.clone());
    }
    if returns.frequency.periods_per_year() < frequency.periods_per_year() {
        return Err(Error::InvalidConfig(format!(
            "cannot aggregate {:?} returns to finer {:?} periods",
            returns.frequency, frequency
        )));
    }

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    let mut current_key = None;

    for (date, r) in returns.iter() {
        let key = frequency.period_key(date);
        if current_key == Some(key) {
            if let (Some(last_date), Some(growth)) = (dates.last_mut(), values.last_mut()) {
                *last_date = date;
                *growth *= 1.0 + r;
            }
        } else {
            current_key = Some(key);
            dates.push(date);
            values.push(1.0 + r);
        }
    }

    let values = values.into_iter().map(|growth| growth - 1.0).collect();
    ReturnSeries::new(frequency, returns.base_date, dates, values)
}

/// Cumulative value path `base * prod(1 + r)`.
///
/// When the series knows its base date, the path starts with the base value on
/// that date so the first period's move is part of the path.
pub fn growth_index(returns: &ReturnSeries, base: f64) -> Result<TimeSeries> {
    let mut points = Vec::with_capacity(returns.len() + 1);
    if let Some(base_date) = returns.base_date {
        points.push(TimePoint::new(base_date, base));
    }
    let mut level = base;
    for (date, r) in returns.iter() {
        level *= 1.0 + r;
        points.push(TimePoint::new(date, level));
    }
    TimeSeries::new(points)
}

/// Trailing compounded return over `window` periods, absent until the window fills.
pub fn rolling_returns(
    returns: &ReturnSeries,
    window: usize,
) -> Result<Vec<(NaiveDate, Option<f64>)>> {
    if window == 0 {
        return Err(Error::InvalidConfig(
            "rolling window must be at least 1".to_string(),
        ));
    }
    let values = returns.values();
    Ok(returns
        .dates()
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let value =
                (i + 1 >= window).then(|| cumulative_return(&values[i + 1 - window..=i]));
            (*date, value)
        })
        .collect())
}

/// Time-weighted return across a valuation series, as a fraction.
pub fn time_weighted_return(valuations: &TimeSeries) -> Result<f64> {
    Ok(cumulative_return(simple_returns(valuations)?.values()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn example_values() -> TimeSeries {
        TimeSeries::from_pairs(vec![
            (d(2024, 1, 1), 100.0),
            (d(2024, 1, 2), 105.0),
            (d(2024, 1, 3), 98.0),
            (d(2024, 1, 4), 102.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_simple_returns_example() {
        let rets = simple_returns(&example_values()).unwrap();

        assert_eq!(rets.len(), 3);
        assert_eq!(rets.base_date, Some(d(2024, 1, 1)));
        assert_relative_eq!(rets.values()[0], 0.05, epsilon = 1e-12);
        assert_relative_eq!(rets.values()[1], 98.0 / 105.0 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(rets.values()[2], 102.0 / 98.0 - 1.0, epsilon = 1e-12);
        assert!((rets.values()[1] + 0.0667).abs() < 1e-4);
        assert!((rets.values()[2] - 0.0408).abs() < 1e-4);
    }

    #[test]
    fn test_cumulative_is_compounded_not_summed() {
        let rets = simple_returns(&example_values()).unwrap();
        let cumulative = cumulative_return(rets.values());

        assert_relative_eq!(cumulative, 0.02, epsilon = 1e-12);

        let arithmetic: f64 = rets.values().iter().sum();
        assert!((arithmetic - cumulative).abs() > 1e-4);
    }

    #[test]
    fn test_insufficient_valuations() {
        let values = TimeSeries::from_pairs(vec![(d(2024, 1, 1), 100.0)]).unwrap();
        assert!(matches!(
            simple_returns(&values),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_non_positive_valuation_rejected() {
        let values =
            TimeSeries::from_pairs(vec![(d(2024, 1, 1), 100.0), (d(2024, 1, 2), 0.0)]).unwrap();
        assert!(matches!(
            simple_returns(&values),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_annualized_return() {
        // 10% over half a year of trading days compounds to 21%
        let annualized = annualized_return(0.10, 126, 252.0).unwrap();
        assert_relative_eq!(annualized, 0.21, epsilon = 1e-12);

        assert!(annualized_return(0.10, 0, 252.0).is_err());
    }

    #[test]
    fn test_aggregate_monthly_compounds() {
        let rets = ReturnSeries::daily(vec![
            (d(2024, 1, 30), 0.01),
            (d(2024, 1, 31), 0.02),
            (d(2024, 2, 1), -0.01),
            (d(2024, 2, 2), 0.03),
        ])
        .unwrap();

        let monthly = aggregate(&rets, Frequency::Monthly).unwrap();

        assert_eq!(monthly.frequency, Frequency::Monthly);
        assert_eq!(monthly.dates(), &[d(2024, 1, 31), d(2024, 2, 2)]);
        assert_relative_eq!(monthly.values()[0], 1.01 * 1.02 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(monthly.values()[1], 0.99 * 1.03 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_aggregate_preserves_total_return() {
        let rets = ReturnSeries::daily(vec![
            (d(2024, 3, 29), 0.01),
            (d(2024, 4, 1), -0.02),
            (d(2024, 6, 28), 0.015),
            (d(2024, 7, 1), 0.005),
        ])
        .unwrap();

        let quarterly = aggregate(&rets, Frequency::Quarterly).unwrap();
        assert_eq!(quarterly.len(), 3);
        assert_relative_eq!(
            cumulative_return(quarterly.values()),
            cumulative_return(rets.values()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_aggregate_rejects_finer_frequency() {
        let rets = ReturnSeries::new(Frequency::Monthly, None, vec![d(2024, 1, 31)], vec![0.01])
            .unwrap();
        assert!(aggregate(&rets, Frequency::Daily).is_err());
    }

    #[test]
    fn test_growth_index_starts_at_base() {
        let rets = simple_returns(&example_values()).unwrap();
        let index = growth_index(&rets, 1.0).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.first().unwrap().value, 1.0);
        assert_relative_eq!(index.last().unwrap().value, 1.02, epsilon = 1e-12);
    }

    #[test]
    fn test_rolling_returns() {
        let rets = simple_returns(&example_values()).unwrap();
        let rolling = rolling_returns(&rets, 2).unwrap();

        assert_eq!(rolling[0].1, None);
        assert_relative_eq!(rolling[1].1.unwrap(), 98.0 / 100.0 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(rolling[2].1.unwrap(), 102.0 / 105.0 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_time_weighted_return() {
        let values = TimeSeries::from_pairs(vec![
            (d(2024, 1, 1), 10000.0),
            (d(2024, 1, 2), 10500.0),
            (d(2024, 1, 3), 10200.0),
            (d(2024, 1, 4), 11000.0),
        ])
        .unwrap();
        assert_relative_eq!(time_weighted_return(&values).unwrap(), 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_log_returns() {
        let rets = log_returns(&example_values()).unwrap();
        let total: f64 = rets.values().iter().sum();
        assert_relative_eq!(total, 1.02_f64.ln(), epsilon = 1e-12);
    }
}
