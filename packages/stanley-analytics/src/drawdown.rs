//! Drawdown analysis.
//!
//! A running-peak state machine over a cumulative value series: every point
//! records its drawdown from the highest value seen so far, and consecutive
//! points below that peak form a drawdown episode.

use crate::returns::growth_index;
use crate::types::{ReturnSeries, TimeSeries};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Unit used for episode durations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DurationBasis {
    /// Calendar days between dates.
    Calendar,
    /// Number of observations between dates.
    Trading,
}

/// Drawdown state on one date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DrawdownPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub peak: f64,
    /// `value / peak - 1`, always <= 0.
    pub drawdown: f64,
}

/// A peak-to-trough-to-recovery episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownEpisode {
    pub peak_date: NaiveDate,
    pub trough_date: NaiveDate,
    /// First date the value regained the peak; `None` while ongoing.
    pub recovery_date: Option<NaiveDate>,
    /// Deepest drawdown in the episode (negative fraction).
    pub depth: f64,
    /// Peak to trough.
    pub duration_days: i64,
    /// Trough to recovery.
    pub recovery_days: Option<i64>,
    pub ongoing: bool,
}

/// Full drawdown picture of a value series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownAnalysis {
    pub basis: DurationBasis,
    pub points: Vec<DrawdownPoint>,
    pub episodes: Vec<DrawdownEpisode>,
    /// Minimum drawdown over the series; 0 when the series never fell.
    pub max_drawdown: f64,
}

impl DrawdownAnalysis {
    /// Episode with the deepest trough.
    pub fn max_episode(&self) -> Option<&DrawdownEpisode> {
        self.episodes
            .iter()
            .min_by(|a, b| a.depth.total_cmp(&b.depth))
    }

    /// The `n` deepest episodes, deepest first.
    pub fn worst_episodes(&self, n: usize) -> Vec<&DrawdownEpisode> {
        let mut sorted: Vec<&DrawdownEpisode> = self.episodes.iter().collect();
        sorted.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        sorted.truncate(n);
        sorted
    }

    /// Drawdown on the last date.
    pub fn current_drawdown(&self) -> f64 {
        self.points.last().map(|p| p.drawdown).unwrap_or(0.0)
    }

    /// Longest span below a peak, from peak to recovery (or to the last date
    /// for an ongoing episode), in the analysis' duration basis.
    pub fn longest_underwater(&self) -> i64 {
        let Some(last) = self.points.last() else {
            return 0;
        };
        self.episodes
            .iter()
            .map(|e| {
                let end = e.recovery_date.unwrap_or(last.date);
                self.span(e.peak_date, end)
            })
            .max()
            .unwrap_or(0)
    }

    fn span(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        match self.basis {
            DurationBasis::Calendar => (to - from).num_days(),
            DurationBasis::Trading => {
                let idx = |d: NaiveDate| self.points.partition_point(|p| p.date < d) as i64;
                idx(to) - idx(from)
            }
        }
    }
}

struct OpenEpisode {
    peak_idx: usize,
    peak_value: f64,
    trough_idx: usize,
    depth: f64,
}

/// Run the drawdown state machine over a positive value series.
pub fn analyze(values: &TimeSeries, basis: DurationBasis) -> Result<DrawdownAnalysis> {
    let series = values.points();
    let first = series.first().ok_or_else(|| {
        Error::InsufficientData("drawdown analysis needs at least one value".to_string())
    })?;
    if let Some(bad) = series.iter().find(|p| p.value <= 0.0) {
        return Err(Error::MalformedInput(format!(
            "drawdown requires positive values, got {} at {}",
            bad.value, bad.date
        )));
    }

    let span = |from: usize, to: usize| -> i64 {
        match basis {
            DurationBasis::Calendar => (series[to].date - series[from].date).num_days(),
            DurationBasis::Trading => (to - from) as i64,
        }
    };

    let mut peak = first.value;
    let mut peak_idx = 0;
    let mut open: Option<OpenEpisode> = None;
    let mut episodes = Vec::new();
    let mut points = Vec::with_capacity(series.len());
    let mut max_drawdown: f64 = 0.0;

    for (i, point) in series.iter().enumerate() {
        if point.value >= peak {
            if let Some(ep) = open.take() {
                episodes.push(DrawdownEpisode {
                    peak_date: series[ep.peak_idx].date,
                    trough_date: series[ep.trough_idx].date,
                    recovery_date: Some(point.date),
                    depth: ep.depth,
                    duration_days: span(ep.peak_idx, ep.trough_idx),
                    recovery_days: Some(span(ep.trough_idx, i)),
                    ongoing: false,
                });
            }
            peak = point.value;
            peak_idx = i;
            points.push(DrawdownPoint {
                date: point.date,
                value: point.value,
                peak,
                drawdown: 0.0,
            });
            continue;
        }

        let drawdown = point.value / peak - 1.0;
        max_drawdown = max_drawdown.min(drawdown);
        match open.as_mut() {
            None => {
                open = Some(OpenEpisode {
                    peak_idx,
                    peak_value: peak,
                    trough_idx: i,
                    depth: drawdown,
                });
            }
            Some(ep) if drawdown < ep.depth => {
                ep.trough_idx = i;
                ep.depth = drawdown;
            }
            Some(_) => {}
        }
        points.push(DrawdownPoint {
            date: point.date,
            value: point.value,
            peak,
            drawdown,
        });
    }

    if let Some(ep) = open {
        tracing::debug!(
            peak = ep.peak_value,
            depth = ep.depth,
            "drawdown episode still open at end of series"
        );
        episodes.push(DrawdownEpisode {
            peak_date: series[ep.peak_idx].date,
            trough_date: series[ep.trough_idx].date,
            recovery_date: None,
            depth: ep.depth,
            duration_days: span(ep.peak_idx, ep.trough_idx),
            recovery_days: None,
            ongoing: true,
        });
    }

    Ok(DrawdownAnalysis {
        basis,
        points,
        episodes,
        max_drawdown,
    })
}

/// Drawdown analysis of the growth path implied by a return series.
pub fn analyze_returns(returns: &ReturnSeries, basis: DurationBasis) -> Result<DrawdownAnalysis> {
    analyze(&growth_index(returns, 1.0)?, basis)
}

/// Maximum drawdown of a raw value path, as a non-positive fraction.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    values.iter().fold(0.0, |worst: f64, &v| {
        peak = peak.max(v);
        if peak > 0.0 {
            worst.min(v / peak - 1.0)
        } else {
            worst
        }
    })
}
