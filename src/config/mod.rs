//! Configuration management for the portfolio commander.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker gateway connection settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Exposure scalars applied at intent publication time
    #[serde(default)]
    pub exposure: ExposureConfig,
    /// Allocation run behavior
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Document store settings
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the broker-gateway REST bridge
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Brokerage account id
    #[serde(default)]
    pub account: String,
    /// Per-call timeout for broker requests (one retry on reads)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Settle delay after an order batch before statuses are read back
    #[serde(default = "default_order_grace_ms")]
    pub order_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Fraction of net liquidation deployed overall (0.0-1.0); 0 aborts runs
    #[serde(default = "default_overall")]
    pub overall: Decimal,
    /// Per-strategy exposure weights (0.0-1.0); absent or 0 disables
    #[serde(default)]
    pub strategies: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Maximum age in minutes before an intent or snapshot is stale
    #[serde(default = "default_fresh_minutes")]
    pub fresh_minutes: i64,
    /// Global kill switch; false prevents any broker mutation
    #[serde(default = "default_trading_enabled")]
    pub trading_enabled: bool,
    /// Whether held-but-untargeted instruments are liquidated to zero
    #[serde(default = "default_liquidate_untargeted")]
    pub liquidate_untargeted: bool,
    /// Cancel resting orders whose action opposes the new plan before
    /// submitting; the plan is recomputed without their in-flight quantity
    #[serde(default)]
    pub cancel_conflicting_orders: bool,
    /// Account base currency used for sizing and FX conversion
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Namespace for snapshots and executions (e.g., "paper", "live")
    #[serde(default = "default_trading_mode")]
    pub trading_mode: String,
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_call_timeout_secs() -> u64 {
    20
}

fn default_order_grace_ms() -> u64 {
    500
}

fn default_overall() -> Decimal {
    Decimal::ONE
}

fn default_fresh_minutes() -> i64 {
    180
}

fn default_trading_enabled() -> bool {
    true
}

fn default_liquidate_untargeted() -> bool {
    true
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_db_path() -> String {
    "data/commander.db".to_string()
}

fn default_trading_mode() -> String {
    "paper".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PC"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.exposure.overall >= Decimal::ZERO && self.exposure.overall <= Decimal::ONE,
            "exposure.overall must be between 0 and 1"
        );

        for (id, weight) in &self.exposure.strategies {
            anyhow::ensure!(
                *weight >= Decimal::ZERO && *weight <= Decimal::ONE,
                "exposure weight for strategy '{id}' must be between 0 and 1"
            );
        }

        anyhow::ensure!(
            self.allocation.fresh_minutes > 0,
            "allocation.fresh_minutes must be positive"
        );

        anyhow::ensure!(
            self.broker.call_timeout_secs > 0,
            "broker.call_timeout_secs must be positive"
        );

        Ok(())
    }

    /// Freshness window as a duration.
    pub fn fresh_window(&self) -> Duration {
        Duration::minutes(self.allocation.fresh_minutes)
    }

    /// Exposure weight for one strategy; absent means disabled.
    pub fn strategy_exposure(&self, strategy_id: &str) -> Decimal {
        self.exposure
            .strategies
            .get(strategy_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            exposure: ExposureConfig::default(),
            allocation: AllocationConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            account: String::new(),
            call_timeout_secs: default_call_timeout_secs(),
            order_grace_ms: default_order_grace_ms(),
        }
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            overall: default_overall(),
            strategies: HashMap::new(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            fresh_minutes: default_fresh_minutes(),
            trading_enabled: default_trading_enabled(),
            liquidate_untargeted: default_liquidate_untargeted(),
            cancel_conflicting_orders: false,
            base_currency: default_base_currency(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            trading_mode: default_trading_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allocation.fresh_minutes, 180);
        assert!(config.allocation.liquidate_untargeted);
        assert!(!config.allocation.cancel_conflicting_orders);
    }

    #[test]
    fn test_exposure_bounds_rejected() {
        let mut config = Config::default();
        config.exposure.overall = dec!(1.5);
        assert!(config.validate().is_err());

        config.exposure.overall = dec!(0.8);
        config
            .exposure
            .strategies
            .insert("spymacdvixy".to_string(), dec!(-0.1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_exposure_defaults_to_zero() {
        let mut config = Config::default();
        config
            .exposure
            .strategies
            .insert("spymacdvixy".to_string(), dec!(0.6));

        assert_eq!(config.strategy_exposure("spymacdvixy"), dec!(0.6));
        assert_eq!(config.strategy_exposure("unknown"), Decimal::ZERO);
    }
}
