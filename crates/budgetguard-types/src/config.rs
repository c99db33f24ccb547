//! Configuration for the reservation engine and its sweeper.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BudgetError, Result, constants};

/// Tunables for one engine instance.
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hold lifetime used when the caller does not pass one.
    pub default_timeout_ms: u64,
    /// Longest hold a caller may request.
    pub max_timeout_ms: u64,
    /// Largest amount accepted in a reservation or commit.
    pub max_amount_sats: u64,
    /// How often the expiry sweeper runs.
    pub sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: constants::DEFAULT_RESERVATION_TIMEOUT_MS,
            max_timeout_ms: constants::MAX_RESERVATION_TIMEOUT_MS,
            max_amount_sats: constants::MAX_AMOUNT_SATS,
            sweep_interval_ms: constants::DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BudgetError::Configuration(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_timeout_ms == 0
            || self.max_timeout_ms > constants::MAX_RESERVATION_TIMEOUT_MS
        {
            return Err(BudgetError::Configuration(format!(
                "max_timeout_ms must be in 1..={}, got {}",
                constants::MAX_RESERVATION_TIMEOUT_MS,
                self.max_timeout_ms
            )));
        }
        if self.default_timeout_ms == 0 || self.default_timeout_ms > self.max_timeout_ms {
            return Err(BudgetError::Configuration(format!(
                "default_timeout_ms must be in 1..={}, got {}",
                self.max_timeout_ms, self.default_timeout_ms
            )));
        }
        if self.sweep_interval_ms == 0 {
            return Err(BudgetError::Configuration(
                "sweep_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Guard an amount supplied by a caller.
    pub fn check_amount(&self, amount_sats: u64) -> Result<()> {
        if amount_sats > self.max_amount_sats {
            return Err(BudgetError::InvalidAmount {
                reason: format!(
                    "{amount_sats} sats exceeds the maximum of {} sats",
                    self.max_amount_sats
                ),
            });
        }
        Ok(())
    }

    /// Guard a hold timeout supplied by a caller.
    pub fn check_timeout(&self, timeout_ms: u64) -> Result<()> {
        if timeout_ms == 0 || timeout_ms > self.max_timeout_ms {
            return Err(BudgetError::InvalidTimeout {
                timeout_ms,
                max_ms: self.max_timeout_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_timeout_ms, 60_000);
        assert_eq!(cfg.sweep_interval_ms, 30_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{ "default_timeout_ms": 5000 }"#).unwrap();
        assert_eq!(cfg.default_timeout_ms, 5000);
        assert_eq!(cfg.max_timeout_ms, constants::MAX_RESERVATION_TIMEOUT_MS);
    }

    #[test]
    fn rejects_default_above_max() {
        let err = EngineConfig::from_json_str(
            r#"{ "default_timeout_ms": 10, "max_timeout_ms": 5 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, BudgetError::Configuration(_)));
    }

    #[test]
    fn rejects_max_timeout_above_ceiling() {
        let err = EngineConfig::from_json_str(r#"{ "max_timeout_ms": 18446744073709551615 }"#)
            .unwrap_err();
        assert!(matches!(err, BudgetError::Configuration(_)));

        let cfg = EngineConfig {
            max_timeout_ms: constants::MAX_RESERVATION_TIMEOUT_MS + 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, BudgetError::Configuration(_)));
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let cfg = EngineConfig {
            sweep_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/budgetguard.json").unwrap_err();
        assert!(matches!(err, BudgetError::Io(_)));
    }

    #[test]
    fn amount_and_timeout_guards() {
        let cfg = EngineConfig::default();
        assert!(cfg.check_amount(0).is_ok());
        assert!(cfg.check_amount(constants::MAX_AMOUNT_SATS).is_ok());
        assert!(matches!(
            cfg.check_amount(constants::MAX_AMOUNT_SATS + 1),
            Err(BudgetError::InvalidAmount { .. })
        ));

        assert!(cfg.check_timeout(1).is_ok());
        assert!(matches!(
            cfg.check_timeout(0),
            Err(BudgetError::InvalidTimeout { timeout_ms: 0, .. })
        ));
        assert!(cfg.check_timeout(cfg.max_timeout_ms + 1).is_err());
    }
}
