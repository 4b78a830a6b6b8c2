//! Risk segmentation: volatility tiers and risk contributions.
//!
//! Each constituent is tiered on its trailing realized volatility. Risk
//! contributions decompose the portfolio's annualized volatility exactly:
//!
//! ```text
//! contribution_i = w_i * cov(r_i, r_p) * ppy / sigma_p
//! sum(contribution_i) = sigma_p
//! ```

use crate::stats;
use crate::types::{Outcome, ReturnSeries};
use crate::volatility::{annualized_volatility, realized_volatility};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative tolerance for the contribution-sum and diversification checks.
pub const CONTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Volatility tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn all() -> [RiskTier; 3] {
        [RiskTier::Low, RiskTier::Medium, RiskTier::High]
    }
}

/// Annualized volatility bounds separating the tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierThresholds {
    /// Volatility strictly below this is Low
    pub low_max: f64,
    /// Volatility strictly above this is High
    pub high_min: f64,
}

impl TierThresholds {
    pub fn validate(&self) -> Result<()> {
        if !(self.low_max > 0.0 && self.low_max <= self.high_min && self.high_min.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "tier thresholds need 0 < low_max <= high_min, got low_max={} high_min={}",
                self.low_max, self.high_min
            )));
        }
        Ok(())
    }

    /// Tier for an annualized volatility. Boundary values are Medium.
    pub fn classify(&self, volatility: f64) -> RiskTier {
        if volatility < self.low_max {
            RiskTier::Low
        } else if volatility > self.high_min {
            RiskTier::High
        } else {
            RiskTier::Medium
        }
    }
}

/// A weighted portfolio constituent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constituent {
    pub id: String,
    pub weight: f64,
    pub returns: ReturnSeries,
}

impl Constituent {
    pub fn new(id: impl Into<String>, weight: f64, returns: ReturnSeries) -> Self {
        Self {
            id: id.into(),
            weight,
            returns,
        }
    }
}

/// Constituent id to tier, for constituents that could be tiered.
pub type RiskTierAssignment = BTreeMap<String, RiskTier>;

/// Risk figures for one constituent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstituentRisk {
    pub id: String,
    pub weight: f64,
    /// Latest realized volatility over the trailing window
    pub trailing_volatility: Outcome<f64>,
    pub tier: Outcome<RiskTier>,
    /// Full-sample annualized volatility
    pub volatility: f64,
    /// Annualized volatility contributed to the portfolio
    pub contribution: f64,
    /// Contribution as a fraction of portfolio volatility
    pub contribution_share: f64,
}

/// Totals for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierSummary {
    pub tier: RiskTier,
    pub constituents: usize,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskSegmentation {
    /// Annualized volatility of the weighted portfolio return
    pub portfolio_volatility: f64,
    pub diversification_ratio: f64,
    pub constituents: Vec<ConstituentRisk>,
    pub tiers: Vec<TierSummary>,
    /// Constituents whose tier could not be computed
    pub unclassified: usize,
    pub assignment: RiskTierAssignment,
}

/// Weighted portfolio return per date, `sum(w_i * r_i)`.
pub fn portfolio_returns(constituents: &[Constituent]) -> Result<ReturnSeries> {
    let first = constituents
        .first()
        .ok_or_else(|| Error::InsufficientData("no constituents".to_string()))?;

    for c in constituents {
        if !c.weight.is_finite() {
            return Err(Error::MalformedInput(format!(
                "constituent {} has non-finite weight",
                c.id
            )));
        }
        if !c.returns.same_index(&first.returns) {
            return Err(Error::MismatchedIndex(format!(
                "constituent {} is not on the same date index as {}",
                c.id, first.id
            )));
        }
    }

    let values = (0..first.returns.len())
        .map(|t| {
            constituents
                .iter()
                .map(|c| c.weight * c.returns.values()[t])
                .sum()
        })
        .collect();

    ReturnSeries::new(
        first.returns.frequency,
        first.returns.base_date,
        first.returns.dates().to_vec(),
        values,
    )
}

/// Tier constituents and decompose portfolio volatility.
pub fn segment(
    constituents: &[Constituent],
    volatility_window: usize,
    thresholds: &TierThresholds,
) -> Result<RiskSegmentation> {
    thresholds.validate()?;
    let portfolio = portfolio_returns(constituents)?;
    let ppy = portfolio.periods_per_year();
    let sigma_p = annualized_volatility(&portfolio)?;
    if stats::is_negligible(sigma_p) {
        return Err(Error::UndefinedRatio(
            "portfolio volatility is zero; contributions and diversification are undefined"
                .to_string(),
        ));
    }

    let portfolio_values = portfolio.values();
    let constituent_risk: Vec<ConstituentRisk> = constituents
        .par_iter()
        .map(|c| -> Result<ConstituentRisk> {
            let trailing: Outcome<f64> = realized_volatility(&c.returns, volatility_window)
                .and_then(|estimate| {
                    estimate.latest().map(|(_, v)| v).ok_or_else(|| {
                        Error::InsufficientData(format!("no trailing volatility for {}", c.id))
                    })
                })
                .into();
            let tier = match &trailing {
                Outcome::Computed { value } => Outcome::Computed {
                    value: thresholds.classify(*value),
                },
                Outcome::NotComputed { kind, reason } => Outcome::NotComputed {
                    kind: *kind,
                    reason: reason.clone(),
                },
            };

            let cov = stats::sample_covariance(c.returns.values(), portfolio_values)
                .ok_or_else(|| {
                    Error::InsufficientData(format!("covariance needs 2 returns for {}", c.id))
                })?;
            let contribution = c.weight * cov * ppy / sigma_p;

            Ok(ConstituentRisk {
                id: c.id.clone(),
                weight: c.weight,
                trailing_volatility: trailing,
                tier,
                volatility: annualized_volatility(&c.returns)?,
                contribution,
                contribution_share: contribution / sigma_p,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total: f64 = constituent_risk.iter().map(|c| c.contribution).sum();
    if ((total - sigma_p) / sigma_p).abs() > CONTRIBUTION_TOLERANCE {
        return Err(Error::InvariantViolation(format!(
            "risk contributions sum to {} but portfolio volatility is {}",
            total, sigma_p
        )));
    }

    let weighted_vol: f64 = constituent_risk
        .iter()
        .map(|c| c.weight.abs() * c.volatility)
        .sum();
    let diversification_ratio = weighted_vol / sigma_p;
    if diversification_ratio < 1.0 - CONTRIBUTION_TOLERANCE {
        return Err(Error::InvariantViolation(format!(
            "diversification ratio {} is below 1",
            diversification_ratio
        )));
    }

    let mut assignment = RiskTierAssignment::new();
    let mut tiers: BTreeMap<RiskTier, TierSummary> = RiskTier::all()
        .into_iter()
        .map(|tier| {
            (
                tier,
                TierSummary {
                    tier,
                    constituents: 0,
                    weight: 0.0,
                    contribution: 0.0,
                },
            )
        })
        .collect();
    let mut unclassified = 0;
    for c in &constituent_risk {
        match c.tier.value() {
            Some(tier) => {
                assignment.insert(c.id.clone(), *tier);
                if let Some(summary) = tiers.get_mut(tier) {
                    summary.constituents += 1;
                    summary.weight += c.weight;
                    summary.contribution += c.contribution;
                }
            }
            None => unclassified += 1,
        }
    }
    if unclassified > 0 {
        tracing::warn!(
            unclassified,
            window = volatility_window,
            "Constituents left untiered for lack of history"
        );
    }

    Ok(RiskSegmentation {
        portfolio_volatility: sigma_p,
        diversification_ratio,
        constituents: constituent_risk,
        tiers: tiers.into_values().collect(),
        unclassified,
        assignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, day).unwrap()
    }

    fn returns(values: &[f64]) -> ReturnSeries {
        ReturnSeries::daily(
            values
                .iter()
                .enumerate()
                .map(|(i, r)| (d(i as u32 + 1), *r))
                .collect(),
        )
        .unwrap()
    }

    fn thresholds() -> TierThresholds {
        TierThresholds {
            low_max: 0.10,
            high_min: 0.30,
        }
    }

    fn book() -> Vec<Constituent> {
        vec![
            Constituent::new(
                "BOND",
                0.5,
                returns(&[0.001, -0.0005, 0.0008, 0.0002, -0.0003, 0.0006, 0.0001, -0.0002]),
            ),
            Constituent::new(
                "EQTY",
                0.3,
                returns(&[0.012, -0.009, 0.015, -0.004, 0.007, -0.011, 0.006, 0.002]),
            ),
            Constituent::new(
                "CRYPTO",
                0.2,
                returns(&[0.05, -0.04, 0.03, 0.06, -0.07, 0.02, -0.03, 0.045]),
            ),
        ]
    }

    #[test]
    fn test_contributions_sum_to_portfolio_volatility() {
        let seg = segment(&book(), 5, &thresholds()).unwrap();

        let total: f64 = seg.constituents.iter().map(|c| c.contribution).sum();
        assert_relative_eq!(total, seg.portfolio_volatility, max_relative = 1e-9);

        let shares: f64 = seg.constituents.iter().map(|c| c.contribution_share).sum();
        assert_relative_eq!(shares, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diversification_ratio_at_least_one() {
        let seg = segment(&book(), 5, &thresholds()).unwrap();
        assert!(seg.diversification_ratio >= 1.0);
    }

    #[test]
    fn test_tiers_and_totals() {
        let seg = segment(&book(), 5, &thresholds()).unwrap();

        assert_eq!(seg.assignment.get("BOND"), Some(&RiskTier::Low));
        assert_eq!(seg.assignment.get("CRYPTO"), Some(&RiskTier::High));
        assert_eq!(seg.unclassified, 0);

        let counted: usize = seg.tiers.iter().map(|t| t.constituents).sum();
        assert_eq!(counted, 3);
        let weight: f64 = seg.tiers.iter().map(|t| t.weight).sum();
        assert_relative_eq!(weight, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_short_history_leaves_tier_uncomputed() {
        let seg = segment(&book(), 20, &thresholds()).unwrap();

        assert_eq!(seg.unclassified, 3);
        assert!(seg.assignment.is_empty());
        for c in &seg.constituents {
            assert_eq!(c.tier.kind(), Some(ErrorKind::InsufficientData));
        }
        // Contributions do not depend on the trailing window
        let total: f64 = seg.constituents.iter().map(|c| c.contribution).sum();
        assert_relative_eq!(total, seg.portfolio_volatility, max_relative = 1e-9);
    }

    #[test]
    fn test_classify_boundaries() {
        let t = thresholds();
        assert_eq!(t.classify(0.05), RiskTier::Low);
        assert_eq!(t.classify(0.10), RiskTier::Medium);
        assert_eq!(t.classify(0.30), RiskTier::Medium);
        assert_eq!(t.classify(0.31), RiskTier::High);
    }

    #[test]
    fn test_invalid_thresholds() {
        let t = TierThresholds {
            low_max: 0.4,
            high_min: 0.2,
        };
        assert!(matches!(
            segment(&book(), 5, &t),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_mismatched_constituent_index() {
        let mut constituents = book();
        constituents.push(Constituent::new(
            "LATE",
            0.1,
            ReturnSeries::daily(vec![(d(2), 0.01), (d(3), 0.02)]).unwrap(),
        ));
        assert!(matches!(
            segment(&constituents, 5, &thresholds()),
            Err(Error::MismatchedIndex(_))
        ));
    }

    #[test]
    fn test_flat_portfolio_is_undefined() {
        let flat = vec![Constituent::new("CASH", 1.0, returns(&[0.0, 0.0, 0.0, 0.0]))];
        assert!(matches!(
            segment(&flat, 2, &thresholds()),
            Err(Error::UndefinedRatio(_))
        ));
    }
}
