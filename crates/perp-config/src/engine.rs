//! Typed engine configuration.
//!
//! Numeric fields are decimal strings (or plain YAML numbers) parsed into
//! 18-decimal fixed point. This crate only depends on the value types, so
//! the harness maps these sections onto engine parameters itself.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use perp_types::{Account, Fixed18, Payoff, UFixed18};

fn default_update_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub protocol: ProtocolConfig,
    pub markets: MarketsConfig,
    pub vault: VaultConfig,
    pub oracle: OracleConfig,
}

impl EngineConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: EngineConfig = serde_json::from_value(config_json.clone())
            .context("config does not match the engine schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.protocol.owner.is_zero() {
            anyhow::bail!("protocol.owner must not be empty");
        }
        if self.markets.long.payoff != Payoff::Long {
            anyhow::bail!("markets.long must use the long payoff");
        }
        if self.markets.short.payoff != Payoff::Short {
            anyhow::bail!("markets.short must use the short payoff");
        }
        if self.oracle.initial_price.is_zero() || self.oracle.initial_price.is_negative() {
            anyhow::bail!("oracle.initial_price must be positive");
        }
        if self.oracle.update_interval_secs == 0 {
            anyhow::bail!("oracle.update_interval_secs must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub owner: Account,
    /// Defaults to the owner.
    #[serde(default)]
    pub treasury: Option<Account>,
    pub min_collateral: UFixed18,
    pub liquidation_fee: UFixed18,
    pub protocol_fee: UFixed18,
    pub min_funding_fee: UFixed18,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketsConfig {
    pub long: MarketConfig,
    pub short: MarketConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub payoff: Payoff,
    pub maintenance: UFixed18,
    pub funding_fee: UFixed18,
    pub maker_fee: UFixed18,
    pub taker_fee: UFixed18,
    pub maker_limit: UFixed18,
    pub utilization_curve: CurveConfig,
}

/// Annualized jump-rate curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub minimum_rate: Fixed18,
    pub maximum_rate: Fixed18,
    pub target_rate: Fixed18,
    pub target_utilization: UFixed18,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub target_leverage: UFixed18,
    pub max_collateral: UFixed18,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub initial_price: Fixed18,
    pub start_timestamp: u64,
    /// Seconds between simulated oracle updates.
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
}
