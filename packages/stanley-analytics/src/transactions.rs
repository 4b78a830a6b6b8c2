//! Transaction analytics: per-period volume, turnover and cost impact.

use crate::types::{Frequency, Outcome, TimeSeries, TradeSide};
use crate::{Error, Result};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position changes within this of the traded quantity are consistent.
pub const CONTINUITY_TOLERANCE: f64 = 1e-9;

/// Average daily traded volume per instrument, in units.
pub type AverageDailyVolume = BTreeMap<String, f64>;

/// A validated executed trade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub trade_date: NaiveDate,
    pub instrument_id: String,
    /// Units traded, always positive
    pub quantity: f64,
    /// Execution price per unit
    pub price: f64,
    pub side: TradeSide,
    /// Explicit cost (commissions, fees)
    pub cost: f64,
}

impl Trade {
    pub fn new(
        trade_date: NaiveDate,
        instrument_id: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
        cost: f64,
    ) -> Self {
        Self {
            trade_date,
            instrument_id: instrument_id.to_string(),
            quantity,
            price,
            side,
            cost,
        }
    }

    /// Traded value, `|quantity| * price`.
    pub fn notional(&self) -> f64 {
        self.quantity.abs() * self.price
    }

    /// Position change caused by the trade.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity.abs()
    }
}

/// Trading activity in one calendar period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionAggregate {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub trades: usize,
    pub buy_notional: f64,
    pub sell_notional: f64,
    /// Buys plus sells
    pub notional_volume: f64,
    /// `min(buys, sells)` over the average portfolio value in the period
    pub turnover_rate: Outcome<f64>,
    pub explicit_costs: f64,
    pub market_impact: f64,
    /// Explicit costs plus estimated market impact
    pub estimated_cost_impact: f64,
    /// Set when some trade had no average daily volume to size its impact
    pub cost_estimate_partial: bool,
}

/// Lifetime activity for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentSummary {
    pub instrument_id: String,
    pub trades: usize,
    pub first_trade: NaiveDate,
    pub last_trade: NaiveDate,
    pub bought_quantity: f64,
    pub sold_quantity: f64,
    pub net_quantity: f64,
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub explicit_costs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_buy_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_sell_price: Option<f64>,
}

/// An observed position change that trades do not explain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinuityBreak {
    pub instrument_id: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub observed_change: f64,
    pub traded_change: f64,
}

impl ContinuityBreak {
    pub fn discrepancy(&self) -> f64 {
        self.observed_change - self.traded_change
    }
}

/// Impact of one trade: `k * notional * |qty| / ADV`. `None` without a usable ADV.
fn market_impact(trade: &Trade, adv: &AverageDailyVolume, impact_coefficient: f64) -> Option<f64> {
    adv.get(&trade.instrument_id)
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| impact_coefficient * trade.notional() * trade.quantity.abs() / v)
}

/// Bucket trades by calendar period and measure volume, turnover and costs.
///
/// Turnover uses the portfolio valuations dated inside each period.
pub fn aggregate_trades(
    trades: &[Trade],
    portfolio_values: &TimeSeries,
    frequency: Frequency,
    adv: &AverageDailyVolume,
    impact_coefficient: f64,
) -> Result<Vec<TransactionAggregate>> {
    if !(impact_coefficient >= 0.0 && impact_coefficient.is_finite()) {
        return Err(Error::InvalidConfig(format!(
            "impact coefficient must be finite and non-negative, got {}",
            impact_coefficient
        )));
    }

    let mut periods: BTreeMap<(i32, u32), Vec<&Trade>> = BTreeMap::new();
    for trade in trades {
        periods
            .entry(frequency.period_key(trade.trade_date))
            .or_default()
            .push(trade);
    }

    let mut aggregates = Vec::with_capacity(periods.len());
    for bucket in periods.into_values() {
        let Some(first) = bucket.first() else {
            continue;
        };
        let (period_start, period_end) = frequency.period_bounds(first.trade_date);

        let mut agg = TransactionAggregate {
            period_start,
            period_end,
            trades: bucket.len(),
            buy_notional: 0.0,
            sell_notional: 0.0,
            notional_volume: 0.0,
            turnover_rate: Outcome::Computed { value: 0.0 },
            explicit_costs: 0.0,
            market_impact: 0.0,
            estimated_cost_impact: 0.0,
            cost_estimate_partial: false,
        };

        for trade in &bucket {
            match trade.side {
                TradeSide::Buy => agg.buy_notional += trade.notional(),
                TradeSide::Sell => agg.sell_notional += trade.notional(),
            }
            agg.explicit_costs += trade.cost;
            match market_impact(trade, adv, impact_coefficient) {
                Some(impact) => agg.market_impact += impact,
                None => agg.cost_estimate_partial = true,
            }
        }
        agg.notional_volume = agg.buy_notional + agg.sell_notional;
        agg.estimated_cost_impact = agg.explicit_costs + agg.market_impact;
        agg.turnover_rate = turnover_rate(
            agg.buy_notional.min(agg.sell_notional),
            portfolio_values,
            period_start,
            period_end,
        )
        .into();

        if agg.cost_estimate_partial {
            tracing::warn!(
                period_start = %period_start,
                period_end = %period_end,
                "Cost impact excludes market impact for trades without average daily volume"
            );
        }
        aggregates.push(agg);
    }

    Ok(aggregates)
}

fn turnover_rate(
    traded: f64,
    portfolio_values: &TimeSeries,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<f64> {
    let inside: Vec<f64> = portfolio_values
        .points()
        .iter()
        .filter(|p| p.date >= start && p.date <= end)
        .map(|p| p.value)
        .collect();
    if inside.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no portfolio valuation between {} and {}",
            start, end
        )));
    }
    let average = inside.iter().sum::<f64>() / inside.len() as f64;
    if average <= 0.0 {
        return Err(Error::UndefinedRatio(format!(
            "average portfolio value {} between {} and {} is not positive",
            average, start, end
        )));
    }
    Ok(traded / average)
}

/// Per-instrument trade summaries, computed in parallel, ordered by instrument.
pub fn instrument_summaries(trades: &[Trade]) -> Vec<InstrumentSummary> {
    let mut by_instrument: BTreeMap<&str, Vec<&Trade>> = BTreeMap::new();
    for trade in trades {
        by_instrument
            .entry(trade.instrument_id.as_str())
            .or_default()
            .push(trade);
    }

    let groups: Vec<(&str, Vec<&Trade>)> = by_instrument.into_iter().collect();
    groups
        .into_par_iter()
        .filter_map(|(id, group)| summarize(id, &group))
        .collect()
}

fn summarize(instrument_id: &str, trades: &[&Trade]) -> Option<InstrumentSummary> {
    let first_trade = trades.iter().map(|t| t.trade_date).min()?;
    let last_trade = trades.iter().map(|t| t.trade_date).max()?;

    let mut summary = InstrumentSummary {
        instrument_id: instrument_id.to_string(),
        trades: trades.len(),
        first_trade,
        last_trade,
        bought_quantity: 0.0,
        sold_quantity: 0.0,
        net_quantity: 0.0,
        buy_notional: 0.0,
        sell_notional: 0.0,
        explicit_costs: 0.0,
        average_buy_price: None,
        average_sell_price: None,
    };
    for trade in trades {
        match trade.side {
            TradeSide::Buy => {
                summary.bought_quantity += trade.quantity.abs();
                summary.buy_notional += trade.notional();
            }
            TradeSide::Sell => {
                summary.sold_quantity += trade.quantity.abs();
                summary.sell_notional += trade.notional();
            }
        }
        summary.net_quantity += trade.signed_quantity();
        summary.explicit_costs += trade.cost;
    }
    summary.average_buy_price =
        (summary.bought_quantity > 0.0).then(|| summary.buy_notional / summary.bought_quantity);
    summary.average_sell_price =
        (summary.sold_quantity > 0.0).then(|| summary.sell_notional / summary.sold_quantity);
    Some(summary)
}

/// Check that consecutive position observations are explained by trades.
///
/// Trades dated in `(previous, current]` must sum to the observed change.
/// Instruments without a position series are skipped.
pub fn check_position_continuity(
    positions: &BTreeMap<String, TimeSeries>,
    trades: &[Trade],
) -> Vec<ContinuityBreak> {
    positions
        .par_iter()
        .flat_map_iter(|(id, series)| {
            let mut traded: Vec<(NaiveDate, f64)> = trades
                .iter()
                .filter(|t| &t.instrument_id == id)
                .map(|t| (t.trade_date, t.signed_quantity()))
                .collect();
            traded.sort_by_key(|(date, _)| *date);

            series
                .points()
                .windows(2)
                .filter_map(|pair| {
                    let (prev, curr) = (pair[0], pair[1]);
                    let traded_change: f64 = traded
                        .iter()
                        .filter(|(date, _)| *date > prev.date && *date <= curr.date)
                        .map(|(_, q)| q)
                        .sum();
                    let observed_change = curr.value - prev.value;
                    ((observed_change - traded_change).abs() > CONTINUITY_TOLERANCE).then(|| {
                        ContinuityBreak {
                            instrument_id: id.clone(),
                            from_date: prev.date,
                            to_date: curr.date,
                            observed_change,
                            traded_change,
                        }
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
