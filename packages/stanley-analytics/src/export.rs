//! Flat row views of analytics results, keyed by date and/or instrument.

use crate::benchmark::BenchmarkComparison;
use crate::drawdown::{DrawdownAnalysis, DrawdownPoint};
use crate::ratios::{RiskAdjustedMetrics, TailRisk};
use crate::report::AnalyticsReport;
use crate::segmentation::{RiskSegmentation, RiskTier};
use crate::transactions::TransactionAggregate;
use crate::types::{Outcome, ReturnSeries};
use crate::volatility::{VolatilityEstimate, VolatilityMethod};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A result that can be flattened into rows.
pub trait ToRows {
    type Row: Serialize;

    fn to_rows(&self) -> Vec<Self::Row>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReturnRow {
    pub date: NaiveDate,
    #[serde(rename = "return")]
    pub period_return: f64,
    /// Growth of 1.0 through this date
    pub growth: f64,
}

impl ToRows for ReturnSeries {
    type Row = ReturnRow;

    fn to_rows(&self) -> Vec<ReturnRow> {
        let mut growth = 1.0;
        self.iter()
            .map(|(date, r)| {
                growth *= 1.0 + r;
                ReturnRow {
                    date,
                    period_return: r,
                    growth,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilityRow {
    pub date: NaiveDate,
    pub method: String,
    pub volatility: Option<f64>,
}

impl ToRows for VolatilityEstimate {
    type Row = VolatilityRow;

    fn to_rows(&self) -> Vec<VolatilityRow> {
        let method = match self.method {
            VolatilityMethod::Realized { window } => format!("realized_{}", window),
            VolatilityMethod::Ewma { lambda, .. } => format!("ewma_{}", lambda),
        };
        self.points
            .iter()
            .map(|p| VolatilityRow {
                date: p.date,
                method: method.clone(),
                volatility: p.value,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownEpisodeRow {
    pub peak_date: NaiveDate,
    pub trough_date: NaiveDate,
    pub recovery_date: Option<NaiveDate>,
    pub depth: f64,
    pub duration: i64,
    pub recovery: Option<i64>,
    pub ongoing: bool,
}

impl ToRows for DrawdownAnalysis {
    type Row = DrawdownEpisodeRow;

    fn to_rows(&self) -> Vec<DrawdownEpisodeRow> {
        self.episodes
            .iter()
            .map(|e| DrawdownEpisodeRow {
                peak_date: e.peak_date,
                trough_date: e.trough_date,
                recovery_date: e.recovery_date,
                depth: e.depth,
                duration: e.duration_days,
                recovery: e.recovery_days,
                ongoing: e.ongoing,
            })
            .collect()
    }
}

/// Underwater curve: one row per date.
impl ToRows for [DrawdownPoint] {
    type Row = DrawdownPoint;

    fn to_rows(&self) -> Vec<DrawdownPoint> {
        self.to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierRow {
    pub instrument_id: String,
    pub weight: f64,
    pub tier: Option<RiskTier>,
    pub trailing_volatility: Option<f64>,
    pub contribution: f64,
    pub contribution_share: f64,
}

impl ToRows for RiskSegmentation {
    type Row = TierRow;

    fn to_rows(&self) -> Vec<TierRow> {
        self.constituents
            .iter()
            .map(|c| TierRow {
                instrument_id: c.id.clone(),
                weight: c.weight,
                tier: c.tier.value().copied(),
                trailing_volatility: c.trailing_volatility.value().copied(),
                contribution: c.contribution,
                contribution_share: c.contribution_share,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRow {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub trades: usize,
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub notional_volume: f64,
    pub turnover_rate: Option<f64>,
    pub estimated_cost_impact: f64,
    pub cost_estimate_partial: bool,
}

impl ToRows for [TransactionAggregate] {
    type Row = TransactionRow;

    fn to_rows(&self) -> Vec<TransactionRow> {
        self.iter()
            .map(|a| TransactionRow {
                period_start: a.period_start,
                period_end: a.period_end,
                trades: a.trades,
                buy_notional: a.buy_notional,
                sell_notional: a.sell_notional,
                notional_volume: a.notional_volume,
                turnover_rate: a.turnover_rate.value().copied(),
                estimated_cost_impact: a.estimated_cost_impact,
                cost_estimate_partial: a.cost_estimate_partial,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveReturnRow {
    pub date: NaiveDate,
    pub active_return: f64,
    /// Compounded active return through this date
    pub cumulative_active: f64,
}

impl ToRows for BenchmarkComparison {
    type Row = ActiveReturnRow;

    fn to_rows(&self) -> Vec<ActiveReturnRow> {
        let mut growth = 1.0;
        self.active_returns
            .iter()
            .map(|(date, r)| {
                growth *= 1.0 + r;
                ActiveReturnRow {
                    date,
                    active_return: r,
                    cumulative_active: growth - 1.0,
                }
            })
            .collect()
    }
}

fn opt<T: Copy>(outcome: &Outcome<T>) -> Option<T> {
    outcome.value().copied()
}

/// Risk-adjusted metrics snapshot for one evaluation window, with tail risk
/// when it was computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioRow {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub periods: usize,
    pub risk_free_rate: Option<f64>,
    pub cumulative_return: f64,
    pub annualized_return: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub var_confidence: Option<f64>,
    pub historical_var: Option<f64>,
    pub historical_cvar: Option<f64>,
    pub parametric_var: Option<f64>,
}

impl RatioRow {
    pub fn new(metrics: &RiskAdjustedMetrics, tail: Option<&TailRisk>) -> Self {
        Self {
            window_start: metrics.window.start,
            window_end: metrics.window.end,
            periods: metrics.periods,
            risk_free_rate: opt(&metrics.risk_free_rate),
            cumulative_return: metrics.cumulative_return,
            annualized_return: opt(&metrics.annualized_return),
            annualized_volatility: opt(&metrics.annualized_volatility),
            max_drawdown: opt(&metrics.max_drawdown),
            sharpe: opt(&metrics.sharpe),
            sortino: opt(&metrics.sortino),
            calmar: opt(&metrics.calmar),
            var_confidence: tail.map(|t| t.confidence),
            historical_var: tail.map(|t| t.historical_var),
            historical_cvar: tail.map(|t| t.historical_cvar),
            parametric_var: tail.map(|t| t.parametric_var),
        }
    }
}

impl ToRows for RiskAdjustedMetrics {
    type Row = RatioRow;

    fn to_rows(&self) -> Vec<RatioRow> {
        vec![RatioRow::new(self, None)]
    }
}

/// Summary statistics of one benchmark comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkRow {
    pub benchmark_id: String,
    pub periods: usize,
    pub annualized_active_return: Option<f64>,
    pub tracking_error: Option<f64>,
    pub information_ratio: Option<f64>,
    pub alpha: Option<f64>,
    pub alpha_annualized: Option<f64>,
    pub beta: Option<f64>,
    pub r_squared: Option<f64>,
    pub hit_rate: Option<f64>,
    pub up_capture: Option<f64>,
    pub down_capture: Option<f64>,
    /// Why the comparison as a whole failed
    pub error: Option<String>,
}

impl ToRows for BTreeMap<String, Outcome<BenchmarkComparison>> {
    type Row = BenchmarkRow;

    fn to_rows(&self) -> Vec<BenchmarkRow> {
        self.iter()
            .map(|(id, outcome)| match outcome {
                Outcome::Computed { value: c } => {
                    let regression = c.regression.value();
                    BenchmarkRow {
                        benchmark_id: id.clone(),
                        periods: c.active_returns.len(),
                        annualized_active_return: opt(&c.annualized_active_return),
                        tracking_error: opt(&c.tracking_error),
                        information_ratio: opt(&c.information_ratio),
                        alpha: regression.map(|r| r.alpha),
                        alpha_annualized: regression.map(|r| r.alpha_annualized),
                        beta: regression.map(|r| r.beta),
                        r_squared: regression.map(|r| r.r_squared),
                        hit_rate: opt(&c.hit_rate),
                        up_capture: opt(&c.up_capture),
                        down_capture: opt(&c.down_capture),
                        error: None,
                    }
                }
                Outcome::NotComputed { reason, .. } => BenchmarkRow {
                    benchmark_id: id.clone(),
                    periods: 0,
                    annualized_active_return: None,
                    tracking_error: None,
                    information_ratio: None,
                    alpha: None,
                    alpha_annualized: None,
                    beta: None,
                    r_squared: None,
                    hit_rate: None,
                    up_capture: None,
                    down_capture: None,
                    error: Some(reason.clone()),
                },
            })
            .collect()
    }
}

/// Tables the CLI can export from a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Table {
    Returns,
    MonthlyReturns,
    RealizedVolatility,
    EwmaVolatility,
    Drawdowns,
    Underwater,
    Tiers,
    Transactions,
    ActiveReturns,
    Ratios,
    Benchmarks,
}

fn computed<'a, T>(outcome: &'a Outcome<T>, table: Table) -> Result<&'a T> {
    match outcome {
        Outcome::Computed { value } => Ok(value),
        Outcome::NotComputed { reason, .. } => Err(Error::InsufficientData(format!(
            "{:?} table unavailable: {}",
            table, reason
        ))),
    }
}

fn rows_json<R: ToRows + ?Sized>(source: &R) -> Result<Vec<serde_json::Value>> {
    source
        .to_rows()
        .iter()
        .map(|row| serde_json::to_value(row).map_err(Error::from))
        .collect()
}

/// Rows of one table from a report.
///
/// Active returns come from the named benchmark, or the first one when
/// `benchmark` is `None`.
pub fn export_table(
    report: &AnalyticsReport,
    table: Table,
    benchmark: Option<&str>,
) -> Result<Vec<serde_json::Value>> {
    match table {
        Table::Returns => rows_json(&computed(&report.returns, table)?.daily),
        Table::MonthlyReturns => {
            rows_json(computed(&computed(&report.returns, table)?.monthly, table)?)
        }
        Table::RealizedVolatility => {
            rows_json(computed(&computed(&report.volatility, table)?.realized, table)?)
        }
        Table::EwmaVolatility => {
            rows_json(computed(&computed(&report.volatility, table)?.ewma, table)?)
        }
        Table::Drawdowns => rows_json(computed(&report.drawdown, table)?),
        Table::Underwater => rows_json(computed(&report.drawdown, table)?.points.as_slice()),
        Table::Tiers => rows_json(computed(&report.segmentation, table)?),
        Table::Transactions => {
            rows_json(computed(&report.transactions, table)?.periods.as_slice())
        }
        Table::ActiveReturns => {
            let comparison = match benchmark {
                Some(id) => report.benchmarks.get(id).ok_or_else(|| {
                    Error::InvalidConfig(format!("no benchmark '{}' in the report", id))
                })?,
                None => report.benchmarks.values().next().ok_or_else(|| {
                    Error::InsufficientData("no benchmark in the report".to_string())
                })?,
            };
            rows_json(computed(comparison, table)?)
        }
        Table::Ratios => {
            let metrics = computed(&report.ratios, table)?;
            let row = RatioRow::new(metrics, report.tail_risk.value());
            Ok(vec![serde_json::to_value(row)?])
        }
        Table::Benchmarks => rows_json(&report.benchmarks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawdown::{analyze, DurationBasis};
    use crate::returns::simple_returns;
    use crate::types::TimeSeries;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn values() -> TimeSeries {
        TimeSeries::from_pairs(vec![
            (d(1), 100.0),
            (d(2), 105.0),
            (d(3), 98.0),
            (d(4), 102.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_return_rows_track_growth() {
        let rows = simple_returns(&values()).unwrap().to_rows();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].date, d(2));
        assert_relative_eq!(rows[2].growth, 1.02, epsilon = 1e-12);

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert!(json.get("return").is_some());
    }

    #[test]
    fn test_drawdown_rows() {
        let analysis = analyze(&values(), DurationBasis::Calendar).unwrap();
        let episodes = analysis.to_rows();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].peak_date, d(2));
        assert!(episodes[0].ongoing);

        let underwater = analysis.points.as_slice().to_rows();
        assert_eq!(underwater.len(), 4);
    }

    #[test]
    fn test_active_return_rows() {
        let p = ReturnSeries::daily(vec![(d(2), 0.02), (d(3), -0.01)]).unwrap();
        let b = ReturnSeries::daily(vec![(d(2), 0.01), (d(3), -0.01)]).unwrap();
        let comparison =
            crate::benchmark::compare(&p, &b, &crate::ratios::RiskFreeRate::Constant(0.0))
                .unwrap();

        let rows = comparison.to_rows();
        assert_eq!(rows.len(), 2);
        assert_relative_eq!(rows[0].active_return, 0.01, epsilon = 1e-15);
        assert_relative_eq!(rows[1].cumulative_active, 0.01, epsilon = 1e-15);
    }

    #[test]
    fn test_ratio_row_flattens_outcomes() {
        let rets = simple_returns(&values()).unwrap();
        let window = crate::types::EvaluationWindow::new(d(1), d(31)).unwrap();
        let metrics = crate::ratios::compute(
            &rets,
            &window,
            &crate::ratios::RiskFreeRate::Constant(0.0),
            crate::ratios::MinimumAcceptableReturn::Zero,
        );
        let tail = TailRisk {
            confidence: 0.95,
            historical_var: 0.06,
            historical_cvar: 0.065,
            parametric_var: 0.07,
        };

        let rows = metrics.to_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].periods, 3);
        assert_relative_eq!(rows[0].cumulative_return, 0.02, epsilon = 1e-12);
        assert!(rows[0].sharpe.is_some());
        assert_eq!(rows[0].historical_var, None);

        let row = RatioRow::new(&metrics, Some(&tail));
        assert_eq!(row.var_confidence, Some(0.95));
        assert_eq!(row.parametric_var, Some(0.07));
    }

    #[test]
    fn test_benchmark_rows() {
        let p = ReturnSeries::daily(vec![(d(2), 0.02), (d(3), -0.01), (d(4), 0.015)]).unwrap();
        let b = ReturnSeries::daily(vec![(d(2), 0.01), (d(3), -0.02), (d(4), 0.01)]).unwrap();
        let comparison =
            crate::benchmark::compare(&p, &b, &crate::ratios::RiskFreeRate::Constant(0.0))
                .unwrap();

        let mut benchmarks = BTreeMap::new();
        benchmarks.insert("SPX".to_string(), Outcome::Computed { value: comparison.clone() });
        benchmarks.insert(
            "AGG".to_string(),
            Outcome::from(Err::<BenchmarkComparison, _>(Error::Alignment(
                "no common dates".to_string(),
            ))),
        );

        let rows = benchmarks.to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].benchmark_id, "AGG");
        assert!(rows[0].error.as_deref().unwrap().contains("no common dates"));
        assert_eq!(rows[0].beta, None);

        assert_eq!(rows[1].benchmark_id, "SPX");
        assert_eq!(rows[1].periods, 3);
        assert_eq!(rows[1].error, None);
        assert_eq!(rows[1].tracking_error, comparison.tracking_error.value().copied());
        assert_eq!(rows[1].beta, comparison.regression.value().map(|r| r.beta));
        assert_eq!(rows[1].hit_rate, Some(1.0));
    }

    #[test]
    fn test_uncomputed_table_is_error() {
        let outcome: Outcome<ReturnSeries> =
            Err(Error::InsufficientData("too short".to_string())).into();
        let result = computed(&outcome, Table::Returns);
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }
}
