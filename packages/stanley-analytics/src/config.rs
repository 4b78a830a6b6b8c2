//! Engine configuration.
//!
//! Every knob the engine uses is an explicit field; nothing is defaulted
//! during deserialization. `EngineConfig::template` gives the documented
//! starting point written by `stanley-analytics config init`.

use crate::align::{AlignmentConfig, CalendarMode, GapFill};
use crate::drawdown::DurationBasis;
use crate::ratios::{MinimumAcceptableReturn, RiskFreeRate};
use crate::segmentation::TierThresholds;
use crate::types::{EvaluationWindow, Frequency};
use crate::volatility::VolatilityMethod;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "STANLEY_ANALYTICS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Window for ratios, tail risk and benchmark comparison
    pub window: EvaluationWindow,
    pub risk_free: RiskFreeRate,
    pub sortino_mar: MinimumAcceptableReturn,
    pub var_confidence: f64,
    pub drawdown_basis: DurationBasis,
    pub alignment: AlignmentConfig,
    pub volatility: VolatilityConfig,
    pub tiers: TierThresholds,
    pub transactions: TransactionConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VolatilityConfig {
    /// Realized volatility window, in periods
    pub window: usize,
    pub ewma_lambda: f64,
    /// Returns used to seed the EWMA variance
    pub ewma_warmup: usize,
}

impl VolatilityConfig {
    pub fn realized(&self) -> VolatilityMethod {
        VolatilityMethod::Realized {
            window: self.window,
        }
    }

    pub fn ewma(&self) -> VolatilityMethod {
        VolatilityMethod::Ewma {
            lambda: self.ewma_lambda,
            warmup: self.ewma_warmup,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TransactionConfig {
    /// Bucket size for trade aggregation
    pub frequency: Frequency,
    /// Market impact coefficient `k`
    pub impact_coefficient: f64,
}

impl EngineConfig {
    /// Starting configuration for an evaluation window.
    pub fn template(window: EvaluationWindow) -> Self {
        Self {
            window,
            risk_free: RiskFreeRate::Constant(0.0),
            sortino_mar: MinimumAcceptableReturn::Zero,
            var_confidence: 0.95,
            drawdown_basis: DurationBasis::Calendar,
            alignment: AlignmentConfig {
                calendar: CalendarMode::Union,
                gap_fill: GapFill::ForwardFill,
                max_missing_fraction: 0.25,
            },
            volatility: VolatilityConfig {
                window: 21,
                ewma_lambda: 0.94,
                ewma_warmup: 20,
            },
            tiers: TierThresholds {
                low_max: 0.10,
                high_min: 0.25,
            },
            transactions: TransactionConfig {
                frequency: Frequency::Monthly,
                impact_coefficient: 0.1,
            },
        }
    }

    /// Check every field. Deserialization alone does not enforce ranges.
    pub fn validate(&self) -> Result<()> {
        EvaluationWindow::new(self.window.start, self.window.end)?;
        self.volatility.realized().validate()?;
        self.volatility.ewma().validate()?;
        self.tiers.validate()?;

        match &self.risk_free {
            RiskFreeRate::Constant(rate) if !rate.is_finite() => {
                return Err(Error::InvalidConfig(format!(
                    "risk-free rate must be finite, got {}",
                    rate
                )));
            }
            RiskFreeRate::Series(series) if series.is_empty() => {
                return Err(Error::InvalidConfig(
                    "risk-free rate series is empty".to_string(),
                ));
            }
            _ => {}
        }
        if let MinimumAcceptableReturn::Annual(rate) = self.sortino_mar {
            if !rate.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "minimum acceptable return must be finite, got {}",
                    rate
                )));
            }
        }
        if !(self.var_confidence > 0.0 && self.var_confidence < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "VaR confidence must be in (0, 1), got {}",
                self.var_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.alignment.max_missing_fraction) {
            return Err(Error::InvalidConfig(format!(
                "max missing fraction must be in [0, 1], got {}",
                self.alignment.max_missing_fraction
            )));
        }
        if !(self.transactions.impact_coefficient >= 0.0
            && self.transactions.impact_coefficient.is_finite())
        {
            return Err(Error::InvalidConfig(format!(
                "impact coefficient must be finite and non-negative, got {}",
                self.transactions.impact_coefficient
            )));
        }
        Ok(())
    }

    /// Get the default config file path.
    ///
    /// Default path: `~/.zee/stanley/analytics.toml`
    /// Can be overridden with `STANLEY_ANALYTICS_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".zee/stanley/analytics.toml"))
            .unwrap_or_else(|| PathBuf::from("analytics.toml"))
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Load from [`EngineConfig::default_path`].
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Err(Error::InvalidConfig(format!(
                "no config at {}; run `stanley-analytics config init`",
                path.display()
            )));
        }
        Self::load(&path)
    }

    /// Write the config as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeSeries;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn window() -> EvaluationWindow {
        EvaluationWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_template_is_valid() {
        assert!(EngineConfig::template(window()).validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/analytics.toml");

        let mut config = EngineConfig::template(window());
        config.sortino_mar = MinimumAcceptableReturn::Annual(0.02);
        config.risk_free = RiskFreeRate::Series(
            TimeSeries::from_pairs(vec![
                (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 0.05),
                (NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(), 0.045),
            ])
            .unwrap(),
        );
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_field_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("analytics.toml");
        let content = toml::to_string(&EngineConfig::template(window())).unwrap();
        let mut table: toml::Table = toml::from_str(&content).unwrap();
        assert!(table.remove("var_confidence").is_some());
        fs::write(&path, toml::to_string(&table).unwrap()).unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(Error::TomlDe(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::template(window());
        config.volatility.ewma_lambda = 1.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = EngineConfig::template(window());
        config.volatility.window = 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::template(window());
        config.alignment.max_missing_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::template(window());
        config.window = EvaluationWindow {
            start: window().end,
            end: window().start,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_volatility_methods() {
        let config = EngineConfig::template(window());
        assert_eq!(
            config.volatility.ewma(),
            VolatilityMethod::Ewma {
                lambda: 0.94,
                warmup: 20
            }
        );
    }
}
