use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use perp_config::{CurveConfig, EngineConfig, MarketConfig};
use perp_product::{
    CollateralError, JumpRateCurve, ProductError, ProductParams, Protocol, ProtocolParams,
};
use perp_types::{Account, Fixed18, ManualOracle, OracleProvider, OracleVersion, Payoff, ProductId, UFixed18};
use perp_vault::{BalancedVault, Leg, VaultError, VaultParams};

pub fn units(n: u64) -> UFixed18 {
    UFixed18::from_int(n)
}

pub fn price(n: i64) -> Fixed18 {
    Fixed18::from_int(n)
}

/// `n / 1000`.
const fn milli(n: u64) -> UFixed18 {
    UFixed18::from_raw(n as u128 * 1_000_000_000_000_000)
}

const fn milli_signed(n: i64) -> Fixed18 {
    Fixed18::from_raw(n as i128 * 1_000_000_000_000_000)
}

#[derive(Clone, Debug, Serialize)]
pub struct HarnessConfig {
    pub protocol: ProtocolParams,
    pub long: ProductParams,
    pub short: ProductParams,
    pub vault: VaultParams,
    pub initial_price: Fixed18,
    pub start_timestamp: u64,
    pub update_interval_secs: u64,
}

fn default_market(name: &str, payoff: Payoff) -> ProductParams {
    ProductParams {
        name: name.to_string(),
        payoff,
        maintenance: milli(100),
        funding_fee: UFixed18::ZERO,
        maker_fee: UFixed18::ZERO,
        taker_fee: UFixed18::ZERO,
        maker_limit: units(1_000_000),
        utilization_curve: JumpRateCurve {
            minimum_rate: milli_signed(40),
            maximum_rate: milli_signed(1_200),
            target_rate: milli_signed(60),
            target_utilization: milli(800),
        },
    }
}

impl Default for HarnessConfig {
    /// Price 2000, minimum collateral 5000, leverage 4, vault cap 100000,
    /// maintenance 0.1, hourly oracle updates.
    fn default() -> Self {
        HarnessConfig {
            protocol: ProtocolParams {
                owner: Account::new("owner"),
                treasury: Account::new("treasury"),
                protocol_fee: UFixed18::ZERO,
                min_funding_fee: UFixed18::ZERO,
                liquidation_fee: milli(500),
                min_collateral: units(5_000),
            },
            long: default_market("ETH-LONG", Payoff::Long),
            short: default_market("ETH-SHORT", Payoff::Short),
            vault: VaultParams {
                target_leverage: units(4),
                max_collateral: units(100_000),
            },
            initial_price: price(2_000),
            start_timestamp: 1_700_000_000,
            update_interval_secs: 3600,
        }
    }
}

fn market_params(cfg: &MarketConfig, fallback_name: &str) -> ProductParams {
    let CurveConfig {
        minimum_rate,
        maximum_rate,
        target_rate,
        target_utilization,
    } = cfg.utilization_curve;
    ProductParams {
        name: cfg.name.clone().unwrap_or_else(|| fallback_name.to_string()),
        payoff: cfg.payoff,
        maintenance: cfg.maintenance,
        funding_fee: cfg.funding_fee,
        maker_fee: cfg.maker_fee,
        taker_fee: cfg.taker_fee,
        maker_limit: cfg.maker_limit,
        utilization_curve: JumpRateCurve {
            minimum_rate,
            maximum_rate,
            target_rate,
            target_utilization,
        },
    }
}

impl HarnessConfig {
    pub fn from_engine_config(cfg: &EngineConfig) -> Self {
        let p = &cfg.protocol;
        HarnessConfig {
            protocol: ProtocolParams {
                owner: p.owner.clone(),
                treasury: p.treasury.clone().unwrap_or_else(|| p.owner.clone()),
                protocol_fee: p.protocol_fee,
                min_funding_fee: p.min_funding_fee,
                liquidation_fee: p.liquidation_fee,
                min_collateral: p.min_collateral,
            },
            long: market_params(&cfg.markets.long, "LONG"),
            short: market_params(&cfg.markets.short, "SHORT"),
            vault: VaultParams {
                target_leverage: cfg.vault.target_leverage,
                max_collateral: cfg.vault.max_collateral,
            },
            initial_price: cfg.oracle.initial_price,
            start_timestamp: cfg.oracle.start_timestamp,
            update_interval_secs: cfg.oracle.update_interval_secs,
        }
    }

    /// Flat zero funding on both legs, for exact PnL arithmetic.
    pub fn without_funding(mut self) -> Self {
        self.long.utilization_curve = JumpRateCurve::default();
        self.short.utilization_curve = JumpRateCurve::default();
        self
    }

    pub fn with_maker_limit(mut self, leg: Leg, limit: UFixed18) -> Self {
        match leg {
            Leg::Long => self.long.maker_limit = limit,
            Leg::Short => self.short.maker_limit = limit,
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LegSnapshot {
    pub product: ProductId,
    /// Vault maker position once pending changes settle.
    pub position: UFixed18,
    pub collateral: UFixed18,
    pub liquidating: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VaultSnapshot {
    pub version: u64,
    pub price: Fixed18,
    pub total_supply: UFixed18,
    pub total_assets: UFixed18,
    pub total_unclaimed: UFixed18,
    pub idle: UFixed18,
    pub insolvent: bool,
    pub long: LegSnapshot,
    pub short: LegSnapshot,
}

/// A protocol, its two vault markets, the vault and the shared oracle.
pub struct Harness {
    pub protocol: Protocol,
    pub vault: BalancedVault,
    oracle: Arc<ManualOracle>,
    clock: u64,
    interval: u64,
}

impl Harness {
    /// Wire everything up and publish one oracle update so makers can open
    /// right away.
    pub fn new(cfg: HarnessConfig) -> Result<Self> {
        let owner = cfg.protocol.owner.clone();
        let mut protocol = Protocol::new(cfg.protocol);
        let oracle = Arc::new(ManualOracle::new(cfg.initial_price, cfg.start_timestamp));
        let long = protocol
            .create_product(&owner, cfg.long, None, oracle.clone())
            .context("create long market")?;
        let short = protocol
            .create_product(&owner, cfg.short, None, oracle.clone())
            .context("create short market")?;
        let vault = BalancedVault::new(Account::new("vault"), long, short, cfg.vault);

        let mut harness = Harness {
            protocol,
            vault,
            oracle,
            clock: cfg.start_timestamp,
            interval: cfg.update_interval_secs,
        };
        harness.advance(cfg.initial_price)?;
        Ok(harness)
    }

    pub fn product(&self, leg: Leg) -> ProductId {
        self.vault.product(leg)
    }

    pub fn vault_account(&self) -> &Account {
        self.vault.account()
    }

    pub fn current_version(&self) -> OracleVersion {
        self.oracle.current_version()
    }

    /// Publish a new oracle version one interval later.
    pub fn advance(&mut self, price: Fixed18) -> Result<OracleVersion> {
        self.clock += self.interval;
        let version = self
            .oracle
            .advance(price, self.clock)
            .context("oracle update")?;
        debug!(version = version.version, %price, "oracle advanced");
        Ok(version)
    }

    pub fn deposit(&mut self, account: &Account, assets: UFixed18) -> Result<(), VaultError> {
        self.vault.deposit(&mut self.protocol, assets, account)
    }

    pub fn redeem(&mut self, account: &Account, shares: UFixed18) -> Result<(), VaultError> {
        self.vault.redeem(&mut self.protocol, shares, account)
    }

    /// Redeem `account`'s whole settled balance.
    pub fn redeem_all(&mut self, account: &Account) -> Result<UFixed18, VaultError> {
        self.vault.sync_account(&mut self.protocol, account)?;
        let shares = self.vault.balance_of(&self.protocol, account)?;
        self.redeem(account, shares)?;
        Ok(shares)
    }

    pub fn claim(&mut self, account: &Account) -> Result<UFixed18, VaultError> {
        self.vault.claim(&mut self.protocol, account)
    }

    pub fn sync(&mut self) -> Result<(), VaultError> {
        self.vault.sync(&mut self.protocol)
    }

    /// Fund `account` in `leg`'s market and open a taker position.
    pub fn open_taker(
        &mut self,
        account: &Account,
        leg: Leg,
        collateral: UFixed18,
        size: UFixed18,
    ) -> Result<()> {
        let id = self.product(leg);
        self.protocol
            .deposit_to(account, id, collateral)
            .with_context(|| format!("fund taker {account}"))?;
        self.protocol
            .open_take(id, account, size)
            .with_context(|| format!("open taker {account}"))?;
        Ok(())
    }

    /// Fund `account` in `leg`'s market and open a maker position next to
    /// the vault's.
    pub fn open_maker(
        &mut self,
        account: &Account,
        leg: Leg,
        collateral: UFixed18,
        size: UFixed18,
    ) -> Result<()> {
        let id = self.product(leg);
        self.protocol
            .deposit_to(account, id, collateral)
            .with_context(|| format!("fund maker {account}"))?;
        self.protocol
            .open_make(id, account, size)
            .with_context(|| format!("open maker {account}"))?;
        Ok(())
    }

    /// Settle the vault's account in `leg` without touching the vault.
    pub fn settle_leg(&mut self, leg: Leg) -> Result<OracleVersion, ProductError> {
        let (id, account) = (self.product(leg), self.vault.account().clone());
        self.protocol.settle_account(id, &account)
    }

    /// Liquidate the vault's account in `leg`, returning the keeper's fee.
    pub fn liquidate_vault(&mut self, leg: Leg, keeper: &Account) -> Result<UFixed18, CollateralError> {
        let (id, account) = (self.product(leg), self.vault.account().clone());
        self.protocol.liquidate(keeper, &account, id)
    }

    pub fn leg(&self, leg: Leg) -> Result<LegSnapshot, VaultError> {
        let product = self.product(leg);
        Ok(LegSnapshot {
            product,
            position: self.vault.leg_position(&self.protocol, leg)?,
            collateral: self.vault.leg_collateral(&self.protocol, leg),
            liquidating: self
                .protocol
                .product(product)?
                .is_liquidating(self.vault.account()),
        })
    }

    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        let current = self.current_version();
        Ok(VaultSnapshot {
            version: current.version,
            price: current.price,
            total_supply: self.vault.total_supply(&self.protocol)?,
            total_assets: self.vault.total_assets(&self.protocol)?,
            total_unclaimed: self.vault.total_unclaimed(&self.protocol)?,
            idle: self.vault.idle(),
            insolvent: self.vault.is_insolvent(),
            long: self.leg(Leg::Long)?,
            short: self.leg(Leg::Short)?,
        })
    }
}
