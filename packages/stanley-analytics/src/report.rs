//! Full analytics report over an input bundle.
//!
//! Malformed input aborts the report. Past validation, each analysis chain
//! (returns, volatility, drawdown, ratios, tail risk, benchmarks,
//! segmentation, transactions) succeeds or fails on its own and a failure is
//! reported as not computed.

use crate::align::align;
use crate::benchmark::{compare, BenchmarkComparison};
use crate::config::EngineConfig;
use crate::drawdown::{analyze, DrawdownAnalysis};
use crate::ingest::{
    parse_benchmarks, parse_prices, parse_trades, validate_adv, BenchmarkRecord, PriceRecord,
    TradeRecord,
};
use crate::ratios::{self, tail_risk, RiskAdjustedMetrics, TailRisk};
use crate::returns::{aggregate, annualized_series_return, cumulative_return, simple_returns};
use crate::segmentation::{segment, RiskSegmentation};
use crate::transactions::{
    aggregate_trades, check_position_continuity, instrument_summaries, AverageDailyVolume,
    ContinuityBreak, InstrumentSummary, TransactionAggregate,
};
use crate::types::{EvaluationWindow, Frequency, Outcome, ReturnSeries, TimeSeries};
use crate::volatility::{annualized_volatility, estimate, VolatilityEstimate};
use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the engine reads: raw records plus optional liquidity data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputBundle {
    pub prices: Vec<PriceRecord>,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkRecord>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    #[serde(default)]
    pub average_daily_volume: AverageDailyVolume,
}

impl InputBundle {
    /// Parse a JSON bundle.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReturnSummary {
    pub daily: ReturnSeries,
    pub monthly: Outcome<ReturnSeries>,
    /// Compounded return over the full history
    pub cumulative_return: f64,
    pub annualized_return: Outcome<f64>,
    pub annualized_volatility: Outcome<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilitySummary {
    pub realized: Outcome<VolatilityEstimate>,
    pub ewma: Outcome<VolatilityEstimate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionSummary {
    pub periods: Vec<TransactionAggregate>,
    pub instruments: Vec<InstrumentSummary>,
    pub continuity_breaks: Vec<ContinuityBreak>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsReport {
    pub window: EvaluationWindow,
    pub instruments: Vec<String>,
    pub valuation: Outcome<TimeSeries>,
    pub returns: Outcome<ReturnSummary>,
    pub volatility: Outcome<VolatilitySummary>,
    pub drawdown: Outcome<DrawdownAnalysis>,
    pub ratios: Outcome<RiskAdjustedMetrics>,
    pub tail_risk: Outcome<TailRisk>,
    /// Comparison against each benchmark, keyed by benchmark id
    pub benchmarks: BTreeMap<String, Outcome<BenchmarkComparison>>,
    pub segmentation: Outcome<RiskSegmentation>,
    pub transactions: Outcome<TransactionSummary>,
}

/// Log a failed chain and convert to an [`Outcome`].
fn chain<T>(name: &str, result: Result<T>) -> Outcome<T> {
    match &result {
        Ok(_) => tracing::debug!(chain = name, "Chain computed"),
        Err(e) => tracing::warn!(chain = name, kind = ?e.kind(), error = %e, "Chain not computed"),
    }
    result.into()
}

/// Borrow an upstream result, re-raising its failure with the same kind.
fn upstream<'a, T>(result: &'a Result<T>, what: &str) -> Result<&'a T> {
    result.as_ref().map_err(|e| {
        let reason = format!("{} unavailable: {}", what, e);
        match e.kind() {
            ErrorKind::MalformedInput => Error::MalformedInput(reason),
            ErrorKind::Alignment => Error::Alignment(reason),
            ErrorKind::UndefinedRatio => Error::UndefinedRatio(reason),
            ErrorKind::MismatchedIndex => Error::MismatchedIndex(reason),
            ErrorKind::InvalidConfig => Error::InvalidConfig(reason),
            ErrorKind::InvariantViolation => Error::InvariantViolation(reason),
            ErrorKind::InsufficientData | ErrorKind::Io => Error::InsufficientData(reason),
        }
    })
}

impl AnalyticsReport {
    /// Validate the bundle and run every analysis chain.
    pub fn compute(bundle: &InputBundle, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let history = parse_prices(&bundle.prices)?;
        let benchmarks = parse_benchmarks(&bundle.benchmarks)?;
        let trades = parse_trades(&bundle.trades)?;
        validate_adv(&bundle.average_daily_volume)?;

        tracing::info!(
            instruments = history.prices.len(),
            benchmarks = benchmarks.len(),
            trades = trades.len(),
            window_start = %config.window.start,
            window_end = %config.window.end,
            "Computing analytics report"
        );

        let valuation = history.valuation();
        let returns = upstream(&valuation, "portfolio valuation").and_then(simple_returns);

        let return_summary = upstream(&returns, "returns").map(|daily| ReturnSummary {
            monthly: aggregate(daily, Frequency::Monthly).into(),
            cumulative_return: cumulative_return(daily.values()),
            annualized_return: annualized_series_return(daily).into(),
            annualized_volatility: annualized_volatility(daily).into(),
            daily: daily.clone(),
        });

        let volatility = upstream(&returns, "returns").map(|daily| VolatilitySummary {
            realized: chain(
                "volatility.realized",
                estimate(daily, config.volatility.realized()),
            ),
            ewma: chain("volatility.ewma", estimate(daily, config.volatility.ewma())),
        });

        let drawdown = upstream(&valuation, "portfolio valuation")
            .and_then(|values| analyze(values, config.drawdown_basis));

        let risk_ratios = upstream(&returns, "returns").map(|daily| {
            ratios::compute(daily, &config.window, &config.risk_free, config.sortino_mar)
        });

        let tail = upstream(&returns, "returns")
            .and_then(|daily| tail_risk(daily, &config.window, config.var_confidence));

        let benchmark_outcomes = benchmarks
            .iter()
            .map(|(id, levels)| {
                let result = upstream(&valuation, "portfolio valuation")
                    .and_then(|values| compare_to_benchmark(values, levels, config));
                (id.clone(), chain(&format!("benchmark.{}", id), result))
            })
            .collect();

        let segmentation = history.constituents(&config.alignment).and_then(|constituents| {
            segment(&constituents, config.volatility.window, &config.tiers)
        });

        // Notional and cost do not need a valuation; turnover does.
        let empty = TimeSeries::default();
        let transactions = aggregate_trades(
            &trades,
            valuation.as_ref().unwrap_or(&empty),
            config.transactions.frequency,
            &bundle.average_daily_volume,
            config.transactions.impact_coefficient,
        )
        .map(|mut periods| {
            if let Err(e) = upstream(&valuation, "portfolio valuation") {
                let reason = e.to_string();
                for period in &mut periods {
                    period.turnover_rate = Outcome::NotComputed {
                        kind: e.kind(),
                        reason: reason.clone(),
                    };
                }
            }
            TransactionSummary {
                periods,
                instruments: instrument_summaries(&trades),
                continuity_breaks: check_position_continuity(&history.positions, &trades),
            }
        });
        if let Ok(summary) = &transactions {
            if !summary.continuity_breaks.is_empty() {
                tracing::warn!(
                    breaks = summary.continuity_breaks.len(),
                    "Position changes not explained by trades"
                );
            }
        }

        let report = Self {
            window: config.window,
            instruments: history.instruments().map(str::to_string).collect(),
            returns: chain("returns", return_summary),
            volatility: chain("volatility", volatility),
            drawdown: chain("drawdown", drawdown),
            ratios: chain("ratios", risk_ratios),
            tail_risk: chain("tail_risk", tail),
            benchmarks: benchmark_outcomes,
            segmentation: chain("segmentation", segmentation),
            transactions: chain("transactions", transactions),
            valuation: chain("valuation", valuation),
        };
        tracing::info!("Analytics report complete");
        Ok(report)
    }
}

/// Align portfolio value with a benchmark level and compare returns inside
/// the evaluation window.
fn compare_to_benchmark(
    portfolio: &TimeSeries,
    levels: &TimeSeries,
    config: &EngineConfig,
) -> Result<BenchmarkComparison> {
    let frame = align(
        &[("portfolio", portfolio), ("benchmark", levels)],
        &config.alignment,
    )?;
    let rows = frame.complete_rows();
    let dropped = frame.dates().len() - rows.len();
    if dropped > 0 {
        tracing::debug!(dropped, "Dates without both portfolio and benchmark values dropped");
    }

    let column = |col: usize| {
        TimeSeries::from_pairs(rows.iter().map(|(date, values)| (*date, values[col])).collect())
    };
    let portfolio_returns = simple_returns(&column(0)?)?.window(&config.window);
    let benchmark_returns = simple_returns(&column(1)?)?.window(&config.window);
    compare(&portfolio_returns, &benchmark_returns, &config.risk_free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn price(date: &str, id: &str, price: f64, qty: f64) -> PriceRecord {
        PriceRecord {
            date: Some(date.to_string()),
            instrument_id: Some(id.to_string()),
            price: Some(price),
            position_quantity: Some(qty),
        }
    }

    fn level(date: &str, value: f64) -> BenchmarkRecord {
        BenchmarkRecord {
            date: Some(date.to_string()),
            benchmark_id: Some("SPX".to_string()),
            level: Some(value),
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::template(
            EvaluationWindow::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            )
            .unwrap(),
        );
        config.volatility.window = 3;
        config.volatility.ewma_warmup = 3;
        config
    }

    fn bundle() -> InputBundle {
        let aapl = [100.0, 102.0, 99.0, 103.0, 104.0, 101.0, 105.0];
        let msft = [50.0, 50.5, 51.0, 49.0, 50.0, 52.0, 51.5];
        let spx = [5000.0, 5030.0, 4990.0, 5050.0, 5070.0, 5040.0, 5100.0];

        let mut prices = Vec::new();
        let mut benchmarks = Vec::new();
        for day in 0..aapl.len() {
            let date = format!("2024-03-{:02}", day + 4);
            prices.push(price(&date, "AAPL", aapl[day], 10.0));
            prices.push(price(&date, "MSFT", msft[day], 20.0));
            benchmarks.push(level(&date, spx[day]));
        }

        InputBundle {
            prices,
            benchmarks,
            trades: vec![TradeRecord {
                trade_date: Some("2024-03-05".to_string()),
                instrument_id: Some("AAPL".to_string()),
                quantity: Some(10.0),
                price: Some(102.0),
                side: Some("buy".to_string()),
                cost: Some(1.0),
            }],
            average_daily_volume: AverageDailyVolume::new(),
        }
    }

    #[test]
    fn test_full_report() {
        let report = AnalyticsReport::compute(&bundle(), &config()).unwrap();

        assert_eq!(report.instruments, vec!["AAPL", "MSFT"]);
        let returns = report.returns.value().unwrap();
        assert_eq!(returns.daily.len(), 6);
        assert!(report.drawdown.value().unwrap().max_drawdown < 0.0);
        assert!(report.ratios.value().unwrap().sharpe.is_computed());
        assert!(report.tail_risk.is_computed());
        assert!(report.benchmarks["SPX"].is_computed());
        assert!(report.segmentation.is_computed());

        let volatility = report.volatility.value().unwrap();
        assert!(volatility.realized.is_computed());
        assert!(volatility.ewma.is_computed());

        let transactions = report.transactions.value().unwrap();
        assert_eq!(transactions.periods.len(), 1);
        assert!(transactions.periods[0].cost_estimate_partial);
        // Positions never change, so the recorded buy is a continuity break
        assert_eq!(transactions.continuity_breaks.len(), 1);
    }

    #[test]
    fn test_malformed_input_aborts() {
        let mut bundle = bundle();
        bundle.prices[3].price = None;

        let result = AnalyticsReport::compute(&bundle, &config());
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_failed_chain_does_not_hide_others() {
        let mut bundle = bundle();
        // A benchmark with no dates in common with the portfolio
        bundle.benchmarks = vec![
            level("2023-01-02", 4000.0),
            level("2023-01-03", 4010.0),
        ];
        let mut config = config();
        config.alignment.calendar = crate::align::CalendarMode::Intersection;

        let report = AnalyticsReport::compute(&bundle, &config).unwrap();
        assert_eq!(report.benchmarks["SPX"].kind(), Some(ErrorKind::Alignment));
        assert!(report.returns.is_computed());
        assert!(report.drawdown.is_computed());
    }

    #[test]
    fn test_short_history_marks_chains_not_computed() {
        let mut bundle = bundle();
        bundle.prices.truncate(2);
        bundle.benchmarks.clear();

        let report = AnalyticsReport::compute(&bundle, &config()).unwrap();
        assert_eq!(report.returns.kind(), Some(ErrorKind::InsufficientData));
        assert_eq!(report.volatility.kind(), Some(ErrorKind::InsufficientData));
        assert!(report.drawdown.is_computed());
        assert!(report.benchmarks.is_empty());
    }

    #[test]
    fn test_turnover_reports_valuation_failure() {
        let mut bundle = bundle();
        bundle.prices.clear();
        bundle.benchmarks.clear();

        let report = AnalyticsReport::compute(&bundle, &config()).unwrap();
        assert_eq!(report.valuation.kind(), Some(ErrorKind::InsufficientData));

        let transactions = report.transactions.value().unwrap();
        assert_eq!(transactions.periods.len(), 1);
        let period = &transactions.periods[0];
        assert!(period.notional_volume > 0.0);
        match &period.turnover_rate {
            Outcome::NotComputed { kind, reason } => {
                assert_eq!(*kind, ErrorKind::InsufficientData);
                assert!(reason.contains("portfolio valuation unavailable"));
                assert!(reason.contains("no instrument prices"));
            }
            other => panic!("expected turnover not computed, got {:?}", other),
        }
    }

    #[test]
    fn test_bundle_from_json() {
        let json = r#"{
            "prices": [
                {"date": "2024-01-02", "instrument_id": "AAPL", "price": 185.0, "position_quantity": 10}
            ]
        }"#;
        let bundle = InputBundle::from_json(json).unwrap();
        assert_eq!(bundle.prices.len(), 1);
        assert!(bundle.trades.is_empty());
    }
}
