//! Raw record ingestion and validation.
//!
//! Records arrive with every field optional so that a missing field is
//! reported against the offending record instead of failing the whole
//! document. Dates are ISO `YYYY-MM-DD` strings.

use crate::align::{align, align_to_calendar, AlignmentConfig, CalendarMode, GapFill};
use crate::returns::simple_returns;
use crate::segmentation::Constituent;
use crate::transactions::{AverageDailyVolume, Trade};
use crate::types::{TimePoint, TimeSeries, TradeSide};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instrument price and held quantity on one date.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub date: Option<String>,
    pub instrument_id: Option<String>,
    pub price: Option<f64>,
    pub position_quantity: Option<f64>,
}

/// Benchmark index level on one date.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkRecord {
    pub date: Option<String>,
    pub benchmark_id: Option<String>,
    pub level: Option<f64>,
}

/// An executed trade. A missing `cost` means no explicit cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub trade_date: Option<String>,
    pub instrument_id: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub side: Option<String>,
    pub cost: Option<f64>,
}

/// Validated per-instrument price and position history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioHistory {
    pub prices: BTreeMap<String, TimeSeries>,
    pub positions: BTreeMap<String, TimeSeries>,
}

/// Context for a record-level error message.
struct Record<'a> {
    kind: &'a str,
    index: usize,
}

impl Record<'_> {
    fn error(&self, message: impl std::fmt::Display) -> Error {
        Error::MalformedInput(format!("{} record {}: {}", self.kind, self.index, message))
    }

    fn required<T: Clone>(&self, value: &Option<T>, field: &str) -> Result<T> {
        value
            .clone()
            .ok_or_else(|| self.error(format!("missing field '{}'", field)))
    }

    fn date(&self, value: &Option<String>, field: &str) -> Result<NaiveDate> {
        let raw = self.required(value, field)?;
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|e| self.error(format!("invalid date '{}' in '{}': {}", raw, field, e)))
    }

    fn id(&self, value: &Option<String>, field: &str) -> Result<String> {
        let id = self.required(value, field)?.trim().to_string();
        if id.is_empty() {
            return Err(self.error(format!("empty '{}'", field)));
        }
        Ok(id)
    }

    fn finite(&self, value: &Option<f64>, field: &str) -> Result<f64> {
        let v = self.required(value, field)?;
        if !v.is_finite() {
            return Err(self.error(format!("'{}' must be finite, got {}", field, v)));
        }
        Ok(v)
    }

    fn positive(&self, value: &Option<f64>, field: &str) -> Result<f64> {
        let v = self.finite(value, field)?;
        if v <= 0.0 {
            return Err(self.error(format!("'{}' must be positive, got {}", field, v)));
        }
        Ok(v)
    }
}

/// Append to a per-key group, rejecting duplicate or decreasing dates.
fn push_point(
    groups: &mut BTreeMap<String, Vec<TimePoint>>,
    key: &str,
    point: TimePoint,
    record: &Record<'_>,
) -> Result<()> {
    let group = groups.entry(key.to_string()).or_default();
    if let Some(last) = group.last() {
        if point.date <= last.date {
            return Err(record.error(format!(
                "date {} for '{}' does not follow {}",
                point.date, key, last.date
            )));
        }
    }
    group.push(point);
    Ok(())
}

fn into_series(groups: BTreeMap<String, Vec<TimePoint>>) -> Result<BTreeMap<String, TimeSeries>> {
    let mut series = BTreeMap::new();
    for (key, points) in groups {
        series.insert(key, TimeSeries::new(points)?);
    }
    Ok(series)
}

/// Validate price records and group them per instrument.
pub fn parse_prices(records: &[PriceRecord]) -> Result<PortfolioHistory> {
    let mut prices: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();
    let mut positions: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();

    for (index, raw) in records.iter().enumerate() {
        let record = Record {
            kind: "price",
            index,
        };
        let date = record.date(&raw.date, "date")?;
        let id = record.id(&raw.instrument_id, "instrument_id")?;
        let price = record.positive(&raw.price, "price")?;
        let quantity = record.finite(&raw.position_quantity, "position_quantity")?;

        push_point(&mut prices, &id, TimePoint::new(date, price), &record)?;
        push_point(&mut positions, &id, TimePoint::new(date, quantity), &record)?;
    }

    Ok(PortfolioHistory {
        prices: into_series(prices)?,
        positions: into_series(positions)?,
    })
}

/// Validate benchmark records and group them per benchmark.
pub fn parse_benchmarks(records: &[BenchmarkRecord]) -> Result<BTreeMap<String, TimeSeries>> {
    let mut levels: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();
    for (index, raw) in records.iter().enumerate() {
        let record = Record {
            kind: "benchmark",
            index,
        };
        let date = record.date(&raw.date, "date")?;
        let id = record.id(&raw.benchmark_id, "benchmark_id")?;
        let level = record.positive(&raw.level, "level")?;
        push_point(&mut levels, &id, TimePoint::new(date, level), &record)?;
    }
    into_series(levels)
}

/// Validate trade records.
pub fn parse_trades(records: &[TradeRecord]) -> Result<Vec<Trade>> {
    records
        .iter()
        .enumerate()
        .map(|(index, raw)| -> Result<Trade> {
            let record = Record {
                kind: "trade",
                index,
            };
            let trade_date = record.date(&raw.trade_date, "trade_date")?;
            let id = record.id(&raw.instrument_id, "instrument_id")?;
            let quantity = record.positive(&raw.quantity, "quantity")?;
            let price = record.positive(&raw.price, "price")?;
            let side = match record.required(&raw.side, "side")?.trim().to_lowercase().as_str() {
                "buy" => TradeSide::Buy,
                "sell" => TradeSide::Sell,
                other => return Err(record.error(format!("unknown side '{}'", other))),
            };
            let cost = match raw.cost {
                Some(_) => record.finite(&raw.cost, "cost")?,
                None => 0.0,
            };
            if cost < 0.0 {
                return Err(record.error(format!("'cost' must not be negative, got {}", cost)));
            }
            Ok(Trade::new(trade_date, &id, side, quantity, price, cost))
        })
        .collect()
}

/// Reject non-positive or non-finite average daily volumes.
pub fn validate_adv(adv: &AverageDailyVolume) -> Result<()> {
    for (id, volume) in adv {
        if !(volume.is_finite() && *volume > 0.0) {
            return Err(Error::MalformedInput(format!(
                "average daily volume for '{}' must be positive, got {}",
                id, volume
            )));
        }
    }
    Ok(())
}

impl PortfolioHistory {
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }

    /// Portfolio value per date: `sum(price * quantity)` over instruments
    /// valued on that date, with prices and positions carried forward on the
    /// union calendar. Dates before any instrument is valued are dropped.
    pub fn valuation(&self) -> Result<TimeSeries> {
        if self.prices.is_empty() {
            return Err(Error::InsufficientData(
                "no instrument prices to value".to_string(),
            ));
        }
        let carry = AlignmentConfig {
            calendar: CalendarMode::Union,
            gap_fill: GapFill::ForwardFill,
            max_missing_fraction: 1.0,
        };

        let price_inputs: Vec<(&str, &TimeSeries)> =
            self.prices.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let prices = align(&price_inputs, &carry)?;

        let position_inputs: Vec<(&str, &TimeSeries)> =
            self.positions.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let positions = align_to_calendar(&position_inputs, prices.dates(), &carry)?;

        let mut points = Vec::with_capacity(prices.dates().len());
        for (i, date) in prices.dates().iter().enumerate() {
            let mut total = None;
            for price in prices.series() {
                let quantity = positions
                    .get(&price.name)
                    .and_then(|q| q.values.get(i).copied().flatten());
                if let (Some(p), Some(q)) = (price.values[i], quantity) {
                    *total.get_or_insert(0.0) += p * q;
                }
            }
            if let Some(value) = total {
                points.push(TimePoint::new(*date, value));
            }
        }
        TimeSeries::new(points)
    }

    /// Per-instrument return series on a shared index, weighted by market
    /// value on the last date every instrument is priced.
    pub fn constituents(&self, alignment: &AlignmentConfig) -> Result<Vec<Constituent>> {
        let inputs: Vec<(&str, &TimeSeries)> =
            self.prices.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let frame = align(&inputs, alignment)?;
        let rows = frame.complete_rows();
        let Some((last_date, last_prices)) = rows.last() else {
            return Err(Error::Alignment(
                "no date on which every instrument is priced".to_string(),
            ));
        };

        let market_values: Vec<f64> = frame
            .series()
            .iter()
            .zip(last_prices)
            .map(|(s, price)| {
                let quantity = self
                    .positions
                    .get(&s.name)
                    .and_then(|q| q.value_as_of(*last_date))
                    .unwrap_or(0.0);
                price * quantity
            })
            .collect();
        let total: f64 = market_values.iter().sum();
        if total <= 0.0 {
            return Err(Error::UndefinedRatio(format!(
                "portfolio market value on {} is {}, weights are undefined",
                last_date, total
            )));
        }

        frame
            .series()
            .iter()
            .enumerate()
            .map(|(col, s)| -> Result<Constituent> {
                let series = TimeSeries::from_pairs(
                    rows.iter().map(|(date, values)| (*date, values[col])).collect(),
                )?;
                Ok(Constituent::new(
                    s.name.clone(),
                    market_values[col] / total,
                    simple_returns(&series)?,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn price(date: &str, id: &str, price: f64, qty: f64) -> PriceRecord {
        PriceRecord {
            date: Some(date.to_string()),
            instrument_id: Some(id.to_string()),
            price: Some(price),
            position_quantity: Some(qty),
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn test_missing_field_names_record_and_field() {
        let mut records = vec![price("2024-05-01", "AAPL", 100.0, 1.0)];
        records.push(PriceRecord {
            price: None,
            ..price("2024-05-02", "AAPL", 0.0, 1.0)
        });

        let err = parse_prices(&records).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(message.contains("record 1"));
        assert!(message.contains("'price'"));
    }

    #[test]
    fn test_non_monotonic_dates_rejected() {
        let records = vec![
            price("2024-05-02", "AAPL", 100.0, 1.0),
            price("2024-05-01", "MSFT", 50.0, 1.0),
            price("2024-05-01", "AAPL", 101.0, 1.0),
        ];
        let err = parse_prices(&records).unwrap_err();
        assert!(err.to_string().contains("record 2"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse_prices(&[price("2024-05-01", "AAPL", -1.0, 1.0)]).is_err());
        assert!(parse_prices(&[price("05/01/2024", "AAPL", 1.0, 1.0)]).is_err());
        assert!(parse_prices(&[price("2024-05-01", " ", 1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_valuation_forward_fills_across_instruments() {
        let history = parse_prices(&[
            price("2024-05-01", "AAPL", 100.0, 2.0),
            price("2024-05-02", "AAPL", 110.0, 2.0),
            price("2024-05-02", "MSFT", 50.0, 4.0),
            price("2024-05-03", "MSFT", 55.0, 4.0),
        ])
        .unwrap();

        let value = history.valuation().unwrap();
        assert_eq!(value.dates(), vec![d(1), d(2), d(3)]);
        assert_relative_eq!(value.get(d(1)).unwrap(), 200.0);
        assert_relative_eq!(value.get(d(2)).unwrap(), 420.0);
        // AAPL carried forward at 110
        assert_relative_eq!(value.get(d(3)).unwrap(), 440.0);
    }

    #[test]
    fn test_constituent_weights_from_last_complete_date() {
        let history = parse_prices(&[
            price("2024-05-01", "AAPL", 100.0, 3.0),
            price("2024-05-01", "MSFT", 50.0, 2.0),
            price("2024-05-02", "AAPL", 110.0, 3.0),
            price("2024-05-02", "MSFT", 60.0, 2.0),
            price("2024-05-03", "AAPL", 100.0, 3.0),
            price("2024-05-03", "MSFT", 60.0, 5.0),
        ])
        .unwrap();
        let config = AlignmentConfig {
            calendar: CalendarMode::Intersection,
            gap_fill: GapFill::ForwardFill,
            max_missing_fraction: 0.0,
        };

        let constituents = history.constituents(&config).unwrap();
        assert_eq!(constituents.len(), 2);
        assert_eq!(constituents[0].id, "AAPL");
        assert_relative_eq!(constituents[0].weight, 0.5);
        assert_relative_eq!(constituents[1].weight, 0.5);
        assert_relative_eq!(constituents[1].returns.values()[0], 0.2, epsilon = 1e-12);
        assert!(constituents[0].returns.same_index(&constituents[1].returns));
    }

    #[test]
    fn test_parse_trades() {
        let record = TradeRecord {
            trade_date: Some("2024-05-03".to_string()),
            instrument_id: Some("AAPL".to_string()),
            quantity: Some(10.0),
            price: Some(101.5),
            side: Some("Sell".to_string()),
            cost: None,
        };
        let trades = parse_trades(&[record.clone()]).unwrap();
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].cost, 0.0);

        let bad_side = TradeRecord {
            side: Some("short".to_string()),
            ..record.clone()
        };
        assert!(parse_trades(&[bad_side]).is_err());

        let negative_cost = TradeRecord {
            cost: Some(-1.0),
            ..record
        };
        assert!(parse_trades(&[negative_cost]).is_err());
    }

    #[test]
    fn test_benchmarks_grouped_per_id() {
        let records = vec![
            BenchmarkRecord {
                date: Some("2024-05-01".to_string()),
                benchmark_id: Some("SPX".to_string()),
                level: Some(5000.0),
            },
            BenchmarkRecord {
                date: Some("2024-05-02".to_string()),
                benchmark_id: Some("SPX".to_string()),
                level: Some(5050.0),
            },
        ];
        let benchmarks = parse_benchmarks(&records).unwrap();
        assert_eq!(benchmarks["SPX"].len(), 2);
    }

    #[test]
    fn test_validate_adv() {
        let mut adv = AverageDailyVolume::new();
        adv.insert("AAPL".to_string(), 1_000.0);
        assert!(validate_adv(&adv).is_ok());
        adv.insert("MSFT".to_string(), 0.0);
        assert!(validate_adv(&adv).is_err());
    }
}
