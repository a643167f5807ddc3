//! Engine configuration, loaded from YAML.

use crate::EngineError;
use serde::{Deserialize, Serialize};
use sim_econ::IncomeRates;
use std::path::Path;
use std::time::Duration;

/// Timers, thresholds, and balance rates for one engine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between simulation cycles.
    pub cycle_interval_secs: u64,
    /// Seconds between health checks.
    pub health_check_interval_secs: u64,
    /// Minimum seconds between two self-optimizer actions.
    pub optimizer_cooldown_secs: u64,
    /// The cache is cleared once it holds more entries than this.
    pub cache_entry_limit: usize,
    /// The queue is cleared once the success rate falls below this.
    pub success_rate_floor: u8,
    /// Seconds between session flushes of the action counter.
    pub session_flush_interval_secs: u64,
    /// Extra balance-write attempts after a version conflict.
    pub bridge_conflict_retries: u32,
    /// Buffered intents per subscriber before lagging receivers drop messages.
    pub intent_channel_capacity: usize,
    pub income: IncomeRates,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 180,
            health_check_interval_secs: 120,
            optimizer_cooldown_secs: 600,
            cache_entry_limit: 50,
            success_rate_floor: 95,
            session_flush_interval_secs: 5,
            bridge_conflict_retries: 3,
            intent_channel_capacity: 256,
            income: IncomeRates::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        let cfg: EngineConfig =
            serde_yaml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let timers = [
            ("cycle_interval_secs", self.cycle_interval_secs),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("session_flush_interval_secs", self.session_flush_interval_secs),
        ];
        for (name, secs) in timers {
            if secs == 0 {
                return Err(EngineError::Config(format!("{name} must be > 0")));
            }
        }
        if self.success_rate_floor > 100 {
            return Err(EngineError::Config(
                "success_rate_floor must be within [0, 100]".into(),
            ));
        }
        if self.intent_channel_capacity == 0 {
            return Err(EngineError::Config(
                "intent_channel_capacity must be > 0".into(),
            ));
        }
        self.income.validate()?;
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn optimizer_cooldown(&self) -> Duration {
        Duration::from_secs(self.optimizer_cooldown_secs)
    }

    pub fn session_flush_interval(&self) -> Duration {
        Duration::from_secs(self.session_flush_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cycle_interval(), Duration::from_secs(180));
        assert_eq!(cfg.optimizer_cooldown(), Duration::from_secs(600));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg = EngineConfig::from_yaml_str(
            "cycle_interval_secs: 2\nincome:\n  enterprise_multiplier: 12\n",
        )
        .unwrap();
        assert_eq!(cfg.cycle_interval_secs, 2);
        assert_eq!(cfg.health_check_interval_secs, 120);
        assert_eq!(cfg.income.enterprise_multiplier, Decimal::from(12));
        assert_eq!(cfg.income.cycles_per_day, Decimal::from(48));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = EngineConfig::from_yaml_str("cycle_interval_secs: 0\n").unwrap_err();
        assert!(err.to_string().contains("cycle_interval_secs"));
    }

    #[test]
    fn bad_rates_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml_str("income:\n  cycles_per_day: 0\n"),
            Err(EngineError::Econ(_))
        ));
    }

    #[test]
    fn bundled_config_parses() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../assets/engine.yaml");
        let cfg = EngineConfig::load(path).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
