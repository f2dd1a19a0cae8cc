//! Balanced two-leg maker vault.
//!
//! The vault pools depositor collateral and makes equal-size markets on a
//! long and a short product over the same feed, so price exposure nets out
//! and it earns funding and fees.
//!
//! # Versioned accounting
//!
//! - Deposits and redemptions are queued in the version they arrive and
//!   convert at that version's rate once the oracle moves on.
//! - The rate at version `v` is the checkpoint recorded when the vault was
//!   first touched in `v`, plus what each leg accrued between `v` and its
//!   next settled version.
//! - Accounts catch up lazily against the checkpoint of their own pending
//!   version.
//!
//! # Health
//!
//! The vault is unhealthy while either leg is liquidatable or liquidating,
//! while shares exist with no assets behind them, or once it has been found
//! insolvent. Unhealthy vaults accept neither deposits nor redemptions.
//! Insolvency is permanent; claims are then paid pro rata.
//!
//! A claim never draws a leg below its next-version maintenance; the
//! shortfall stays owed until that leg's makers can close.
//!
//! # Atomicity
//!
//! Every mutating entry point snapshots the vault and the protocol and
//! restores both if any step fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use perp_product::{CollateralError, Protocol, VersionMap};
use perp_types::{Account, Fixed18, ProductId, UFixed18};

use crate::checkpoint::{Checkpoint, VersionContext};
use crate::error::VaultError;
use crate::leg::{Leg, Legs};

/// Vault parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParams {
    /// Notional per leg is `assets * target_leverage / 2`.
    pub target_leverage: UFixed18,
    /// Cap on assets plus pending deposits.
    pub max_collateral: UFixed18,
}

/// Per-account deposits and redemptions queued at `version`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct PendingAccount {
    version: u64,
    deposit: UFixed18,
    redemption: UFixed18,
}

#[derive(Clone, Debug)]
pub struct BalancedVault {
    account: Account,
    products: Legs<ProductId>,
    params: VaultParams,
    /// Collateral held by the vault outside both legs.
    idle: UFixed18,
    total_supply: UFixed18,
    balances: BTreeMap<Account, UFixed18>,
    total_unclaimed: UFixed18,
    unclaimed: BTreeMap<Account, UFixed18>,
    pending_deposit: UFixed18,
    pending_redemption: UFixed18,
    pending: BTreeMap<Account, PendingAccount>,
    latest_version: u64,
    checkpoints: VersionMap<Checkpoint>,
    insolvent: bool,
}

impl BalancedVault {
    /// A vault trading as `account` on the `long` and `short` products.
    pub fn new(account: Account, long: ProductId, short: ProductId, params: VaultParams) -> Self {
        BalancedVault {
            account,
            products: Legs::new(long, short),
            params,
            idle: UFixed18::ZERO,
            total_supply: UFixed18::ZERO,
            balances: BTreeMap::new(),
            total_unclaimed: UFixed18::ZERO,
            unclaimed: BTreeMap::new(),
            pending_deposit: UFixed18::ZERO,
            pending_redemption: UFixed18::ZERO,
            pending: BTreeMap::new(),
            latest_version: 0,
            checkpoints: VersionMap::default(),
            insolvent: false,
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Deposit `assets` on behalf of `receiver`. Shares are minted once the
    /// oracle moves past the current version.
    pub fn deposit(
        &mut self,
        protocol: &mut Protocol,
        assets: UFixed18,
        receiver: &Account,
    ) -> Result<(), VaultError> {
        self.atomically(protocol, |vault, protocol| {
            vault.deposit_inner(protocol, assets, receiver)
        })
    }

    /// Burn `shares` of `account` and queue their assets for claiming.
    pub fn redeem(
        &mut self,
        protocol: &mut Protocol,
        shares: UFixed18,
        account: &Account,
    ) -> Result<(), VaultError> {
        self.atomically(protocol, |vault, protocol| {
            vault.redeem_inner(protocol, shares, account)
        })
    }

    /// Pay out `account`'s unclaimed assets, pro rata if the vault cannot
    /// cover every claim. Collateral a leg needs for maintenance is held
    /// back and stays owed. Returns the amount paid.
    pub fn claim(&mut self, protocol: &mut Protocol, account: &Account) -> Result<UFixed18, VaultError> {
        self.atomically(protocol, |vault, protocol| vault.claim_inner(protocol, account))
    }

    /// Settle and rebalance without touching any depositor.
    pub fn sync(&mut self, protocol: &mut Protocol) -> Result<(), VaultError> {
        self.atomically(protocol, |vault, protocol| {
            let context = vault.settle(protocol, None)?;
            vault.rebalance(protocol, &context, UFixed18::ZERO)
        })
    }

    /// Settle `account`'s pending deposits and redemptions, then rebalance.
    pub fn sync_account(&mut self, protocol: &mut Protocol, account: &Account) -> Result<(), VaultError> {
        self.atomically(protocol, |vault, protocol| {
            let context = vault.settle(protocol, Some(account))?;
            vault.rebalance(protocol, &context, UFixed18::ZERO)
        })
    }

    fn atomically<T>(
        &mut self,
        protocol: &mut Protocol,
        op: impl FnOnce(&mut Self, &mut Protocol) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let vault_snapshot = self.clone();
        let protocol_snapshot = protocol.clone();
        match op(self, protocol) {
            Ok(out) => Ok(out),
            Err(e) => {
                *self = vault_snapshot;
                *protocol = protocol_snapshot;
                debug!(vault = %self.account, error = %e, "vault operation reverted");
                Err(e)
            }
        }
    }

    fn deposit_inner(
        &mut self,
        protocol: &mut Protocol,
        assets: UFixed18,
        receiver: &Account,
    ) -> Result<(), VaultError> {
        if receiver.is_zero() {
            return Err(CollateralError::ZeroAddress.into());
        }
        let context = self.settle(protocol, Some(receiver))?;

        let max = self.max_deposit_at(protocol, &context)?;
        if assets > max {
            return Err(VaultError::DepositLimitExceeded { assets, max });
        }

        self.pending_deposit = self.pending_deposit.try_add(assets)?;
        let pending = self.pending.entry(receiver.clone()).or_default();
        pending.deposit = pending.deposit.try_add(assets)?;
        pending.version = context.version;
        self.idle = self.idle.try_add(assets)?;

        info!(vault = %self.account, %receiver, %assets, version = context.version, "vault deposit queued");
        self.rebalance(protocol, &context, UFixed18::ZERO)
    }

    fn redeem_inner(
        &mut self,
        protocol: &mut Protocol,
        shares: UFixed18,
        account: &Account,
    ) -> Result<(), VaultError> {
        let context = self.settle(protocol, Some(account))?;

        let max = self.max_redeem_at(protocol, &context, account)?;
        if shares > max {
            return Err(VaultError::RedemptionLimitExceeded { shares, max });
        }

        let balance = self.balances.entry(account.clone()).or_default();
        *balance = balance.try_sub(shares)?;
        self.total_supply = self.total_supply.try_sub(shares)?;
        self.pending_redemption = self.pending_redemption.try_add(shares)?;
        let pending = self.pending.entry(account.clone()).or_default();
        pending.redemption = pending.redemption.try_add(shares)?;
        pending.version = context.version;

        info!(vault = %self.account, %account, %shares, version = context.version, "vault redemption queued");
        self.rebalance(protocol, &context, UFixed18::ZERO)
    }

    fn claim_inner(&mut self, protocol: &mut Protocol, account: &Account) -> Result<UFixed18, VaultError> {
        let context = self.settle(protocol, Some(account))?;

        let owed = self.unclaimed.remove(account).unwrap_or_default();
        let total_owed = self.total_unclaimed;

        let total_collateral = self.total_collateral(protocol)?;
        let entitled = if total_collateral < total_owed {
            owed.try_muldiv(total_collateral, total_owed)?
        } else {
            owed
        };
        let amount = entitled.min(self.withdrawable(protocol)?);

        // Whatever the legs must keep for maintenance stays owed.
        let remaining = entitled.try_sub(amount)?;
        if !remaining.is_zero() {
            self.unclaimed.insert(account.clone(), remaining);
        }
        self.total_unclaimed = total_owed.try_sub(owed)?.try_add(remaining)?;

        self.rebalance(protocol, &context, amount)?;
        self.idle = self.idle.try_sub(amount)?;

        info!(vault = %self.account, %account, %owed, paid = %amount, %remaining, "vault claim paid");
        Ok(amount)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Settle both legs, roll the vault into the current version and catch
    /// `account` up. Returns the rate context at the new latest version.
    fn settle(
        &mut self,
        protocol: &mut Protocol,
        account: Option<&Account>,
    ) -> Result<VersionContext, VaultError> {
        for leg in Leg::BOTH {
            protocol.settle_account(self.products.get(leg), &self.account)?;
        }
        let version = protocol
            .product(self.products.long)?
            .latest_version_of(&self.account);

        if version > self.latest_version {
            let rate = self.context_at(protocol, self.latest_version)?;
            let minted = rate.convert_to_shares(self.pending_deposit)?;
            let redeemed = rate.convert_to_assets(self.pending_redemption)?;
            self.total_supply = self.total_supply.try_add(minted)?;
            self.total_unclaimed = self.total_unclaimed.try_add(redeemed)?;
            self.pending_deposit = UFixed18::ZERO;
            self.pending_redemption = UFixed18::ZERO;

            let checkpoint = self.checkpoint(protocol)?;
            self.checkpoints.record(version, checkpoint)?;
            self.latest_version = version;
            debug!(vault = %self.account, version, %minted, %redeemed, "vault checkpoint recorded");

            if !self.insolvent && self.total_collateral(protocol)? < self.total_unclaimed {
                self.insolvent = true;
                warn!(
                    vault = %self.account,
                    version,
                    unclaimed = %self.total_unclaimed,
                    "vault insolvent; claims will be paid pro rata"
                );
            }
        }

        if let Some(account) = account {
            let pending = self.pending.get(account).copied().unwrap_or_default();
            if version > pending.version {
                let rate = self.context_at(protocol, pending.version)?;
                let shares = rate.convert_to_shares(pending.deposit)?;
                let assets = rate.convert_to_assets(pending.redemption)?;
                let balance = self.balances.entry(account.clone()).or_default();
                *balance = balance.try_add(shares)?;
                let owed = self.unclaimed.entry(account.clone()).or_default();
                *owed = owed.try_add(assets)?;
                self.pending.insert(
                    account.clone(),
                    PendingAccount {
                        version,
                        ..PendingAccount::default()
                    },
                );
            }
        }

        self.context_at(protocol, self.latest_version)
    }

    fn checkpoint(&self, protocol: &Protocol) -> Result<Checkpoint, VaultError> {
        let long = protocol.product(self.products.long)?;
        let short = protocol.product(self.products.short)?;
        Ok(Checkpoint {
            long_position: long.position(&self.account).maker,
            short_position: short.position(&self.account).maker,
            total_shares: self.total_supply,
            long_assets: protocol.collateral(&self.account, self.products.long),
            short_assets: protocol.collateral(&self.account, self.products.short),
            total_assets: self.total_assets_at(protocol, self.total_unclaimed)?,
        })
    }

    /// Rate context at `version`.
    fn context_at(&self, protocol: &Protocol, version: u64) -> Result<VersionContext, VaultError> {
        let checkpoint = self.checkpoints.at(version);
        let long = self.accrued_after(
            protocol,
            self.products.long,
            version,
            checkpoint.long_position,
            checkpoint.long_assets,
        )?;
        let short = self.accrued_after(
            protocol,
            self.products.short,
            version,
            checkpoint.short_position,
            checkpoint.short_assets,
        )?;
        let assets = Fixed18::from_unsigned(checkpoint.total_assets)?
            .try_add(long)?
            .try_add(short)?;
        Ok(VersionContext {
            version,
            latest_assets: if assets.is_negative() {
                UFixed18::ZERO
            } else {
                assets.abs()
            },
            latest_shares: checkpoint.total_shares,
        })
    }

    /// Maker value accrued on `position` from `version` to the product's
    /// next settled version, floored at losing the whole leg.
    fn accrued_after(
        &self,
        protocol: &Protocol,
        product: ProductId,
        version: u64,
        position: UFixed18,
        assets: UFixed18,
    ) -> Result<Fixed18, VaultError> {
        let product = protocol.product(product)?;
        let Some((_, next)) = product.value_after(version) else {
            return Ok(Fixed18::ZERO);
        };
        let accrued = next
            .maker
            .try_sub(product.value_at_version(version).maker)?
            .try_mul(Fixed18::from_unsigned(position)?)?;
        Ok(accrued.max(Fixed18::from_unsigned(assets)?.try_neg()?))
    }

    // -----------------------------------------------------------------------
    // Rebalancing
    // -----------------------------------------------------------------------

    /// Split collateral evenly across the legs, then resize both maker
    /// positions. `claim` is held back for an imminent payout.
    fn rebalance(
        &mut self,
        protocol: &mut Protocol,
        context: &VersionContext,
        claim: UFixed18,
    ) -> Result<(), VaultError> {
        self.rebalance_collateral(protocol, claim)?;
        self.rebalance_position(protocol, context, claim)
    }

    fn rebalance_collateral(&mut self, protocol: &mut Protocol, claim: UFixed18) -> Result<(), VaultError> {
        let min_collateral = protocol.params().min_collateral;
        let available = self.total_collateral(protocol)?.try_sub(claim)?;
        let floors = Legs::new(
            self.leg_floor(protocol, Leg::Long)?,
            self.leg_floor(protocol, Leg::Short)?,
        );

        let gate = |target: UFixed18| {
            if target < min_collateral {
                UFixed18::ZERO
            } else {
                target
            }
        };
        // Even split, unless one leg's floor is above half; that leg keeps
        // its floor and the other takes the rest.
        let half = gate(UFixed18::from_raw(available.raw() / 2));
        let targets = if floors.long > half {
            Legs::new(
                floors.long,
                gate(available.sub_or_zero(floors.long)).max(floors.short),
            )
        } else if floors.short > half {
            Legs::new(
                gate(available.sub_or_zero(floors.short)).max(floors.long),
                floors.short,
            )
        } else {
            Legs::new(half, half)
        };

        // Withdraw before depositing so idle always covers the deposit.
        let order = if self.leg_collateral(protocol, Leg::Long) > targets.long {
            [Leg::Long, Leg::Short]
        } else {
            [Leg::Short, Leg::Long]
        };
        for leg in order {
            self.update_collateral(protocol, leg, targets.get(leg))?;
        }
        Ok(())
    }

    fn update_collateral(&mut self, protocol: &mut Protocol, leg: Leg, target: UFixed18) -> Result<(), VaultError> {
        let product = self.products.get(leg);
        let current = protocol.collateral(&self.account, product);
        if current > target {
            let amount = current.try_sub(target)?;
            protocol.withdraw_from(&self.account, product, amount)?;
            self.idle = self.idle.try_add(amount)?;
        } else if current < target {
            let amount = target.try_sub(current)?;
            self.idle = self.idle.try_sub(amount)?;
            protocol.deposit_to(&self.account, product, amount)?;
        }
        Ok(())
    }

    fn rebalance_position(
        &mut self,
        protocol: &mut Protocol,
        context: &VersionContext,
        claim: UFixed18,
    ) -> Result<(), VaultError> {
        let min_collateral = protocol.params().min_collateral;
        let assets = self
            .total_assets_at(protocol, self.total_unclaimed)?
            .sub_or_zero(claim);

        let shares = self.total_supply.try_add(self.pending_redemption)?;
        let mut utilized = if shares.is_zero() {
            self.pending_deposit.try_add(assets)?
        } else {
            self.pending_deposit
                .try_add(assets.try_muldiv(self.total_supply, shares)?)?
        };
        if assets < min_collateral.try_add(min_collateral)? {
            utilized = UFixed18::ZERO;
        }

        let price = protocol
            .product(self.products.long)?
            .at_version(context.version)?
            .price
            .abs();
        let target = if price.is_zero() {
            UFixed18::ZERO
        } else {
            let notional = utilized
                .try_mul(self.params.target_leverage)?
                .try_div(price)?;
            UFixed18::from_raw(notional.raw() / 2)
        };

        for leg in Leg::BOTH {
            self.update_maker_position(protocol, leg, target)?;
        }
        Ok(())
    }

    /// Move the leg's maker position toward `target` as far as takers and
    /// the maker limit allow.
    fn update_maker_position(&mut self, protocol: &mut Protocol, leg: Leg, target: UFixed18) -> Result<(), VaultError> {
        let id = self.products.get(leg);
        let product = protocol.product(id)?;
        if product.is_liquidating(&self.account) {
            return Ok(());
        }
        let current = product.account_position(&self.account).next()?.maker;
        let global = product.global_next()?;

        if target < current {
            let amount = current
                .try_sub(target)?
                .min(global.maker.sub_or_zero(global.taker));
            if !amount.is_zero() {
                protocol.close_make(id, &self.account, amount)?;
                debug!(vault = %self.account, ?leg, %amount, "vault maker closed");
            }
        } else if target > current {
            if product.closed() || product.latest_version() == 0 {
                return Ok(());
            }
            let amount = target
                .try_sub(current)?
                .min(product.maker_limit().sub_or_zero(global.maker));
            if !amount.is_zero() {
                protocol.open_make(id, &self.account, amount)?;
                debug!(vault = %self.account, ?leg, %amount, "vault maker opened");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal reads
    // -----------------------------------------------------------------------

    /// Collateral in both legs plus idle.
    fn total_collateral(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        Ok(protocol
            .collateral(&self.account, self.products.long)
            .try_add(protocol.collateral(&self.account, self.products.short))?
            .try_add(self.idle)?)
    }

    /// Collateral not owed to claimants or awaiting share minting.
    fn total_assets_at(&self, protocol: &Protocol, unclaimed: UFixed18) -> Result<UFixed18, VaultError> {
        Ok(self
            .total_collateral(protocol)?
            .sub_or_zero(unclaimed.try_add(self.pending_deposit)?))
    }

    /// Collateral `leg` must keep for its next-version maintenance, at least
    /// the minimum collateral, and never more than it holds.
    fn leg_floor(&self, protocol: &Protocol, leg: Leg) -> Result<UFixed18, VaultError> {
        let id = self.products.get(leg);
        let maintenance = protocol.product(id)?.maintenance_next(&self.account)?;
        let floor = if maintenance.is_zero() {
            UFixed18::ZERO
        } else {
            maintenance.max(protocol.params().min_collateral)
        };
        Ok(floor.min(protocol.collateral(&self.account, id)))
    }

    /// Collateral that can leave the vault without breaching either leg's
    /// floor.
    fn withdrawable(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        let floors = self
            .leg_floor(protocol, Leg::Long)?
            .try_add(self.leg_floor(protocol, Leg::Short)?)?;
        Ok(self.total_collateral(protocol)?.sub_or_zero(floors))
    }

    fn unhealthy_at(&self, protocol: &Protocol, context: &VersionContext) -> Result<bool, VaultError> {
        if self.insolvent || (!context.latest_shares.is_zero() && context.latest_assets.is_zero()) {
            return Ok(true);
        }
        for leg in Leg::BOTH {
            let id = self.products.get(leg);
            if protocol.liquidatable(&self.account, id)? || protocol.product(id)?.is_liquidating(&self.account) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn max_deposit_at(&self, protocol: &Protocol, context: &VersionContext) -> Result<UFixed18, VaultError> {
        if self.unhealthy_at(protocol, context)? {
            return Ok(UFixed18::ZERO);
        }
        let current = self
            .total_assets_at(protocol, self.total_unclaimed)?
            .try_add(self.pending_deposit)?;
        Ok(self.params.max_collateral.sub_or_zero(current))
    }

    fn max_redeem_at(
        &self,
        protocol: &Protocol,
        context: &VersionContext,
        account: &Account,
    ) -> Result<UFixed18, VaultError> {
        if self.unhealthy_at(protocol, context)? {
            return Ok(UFixed18::ZERO);
        }
        Ok(self.balances.get(account).copied().unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Views
    //
    // Views project pending conversions up to the long leg's latest settled
    // version without settling anything.
    // -----------------------------------------------------------------------

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn params(&self) -> &VaultParams {
        &self.params
    }

    pub fn product(&self, leg: Leg) -> ProductId {
        self.products.get(leg)
    }

    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    pub fn checkpoint_at(&self, version: u64) -> Option<Checkpoint> {
        self.checkpoints.get(version)
    }

    pub fn idle(&self) -> UFixed18 {
        self.idle
    }

    pub fn is_insolvent(&self) -> bool {
        self.insolvent
    }

    pub fn pending_deposit(&self) -> UFixed18 {
        self.pending_deposit
    }

    pub fn pending_redemption(&self) -> UFixed18 {
        self.pending_redemption
    }

    /// Vault collateral held in `leg`.
    pub fn leg_collateral(&self, protocol: &Protocol, leg: Leg) -> UFixed18 {
        protocol.collateral(&self.account, self.products.get(leg))
    }

    /// Vault maker position in `leg` once pending changes settle.
    pub fn leg_position(&self, protocol: &Protocol, leg: Leg) -> Result<UFixed18, VaultError> {
        Ok(protocol
            .product(self.products.get(leg))?
            .account_position(&self.account)
            .next()?
            .maker)
    }

    pub fn total_collateral_view(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        self.total_collateral(protocol)
    }

    fn read_version(&self, protocol: &Protocol) -> Result<u64, VaultError> {
        Ok(protocol.product(self.products.long)?.latest_version())
    }

    pub fn total_supply(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        if self.read_version(protocol)? == self.latest_version {
            return Ok(self.total_supply);
        }
        let rate = self.context_at(protocol, self.latest_version)?;
        Ok(self
            .total_supply
            .try_add(rate.convert_to_shares(self.pending_deposit)?)?)
    }

    pub fn balance_of(&self, protocol: &Protocol, account: &Account) -> Result<UFixed18, VaultError> {
        let balance = self.balances.get(account).copied().unwrap_or_default();
        let pending = self.pending.get(account).copied().unwrap_or_default();
        if self.read_version(protocol)? <= pending.version {
            return Ok(balance);
        }
        let rate = self.context_at(protocol, pending.version)?;
        Ok(balance.try_add(rate.convert_to_shares(pending.deposit)?)?)
    }

    pub fn total_unclaimed(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        if self.read_version(protocol)? == self.latest_version {
            return Ok(self.total_unclaimed);
        }
        let rate = self.context_at(protocol, self.latest_version)?;
        Ok(self
            .total_unclaimed
            .try_add(rate.convert_to_assets(self.pending_redemption)?)?)
    }

    pub fn unclaimed(&self, protocol: &Protocol, account: &Account) -> Result<UFixed18, VaultError> {
        let owed = self.unclaimed.get(account).copied().unwrap_or_default();
        let pending = self.pending.get(account).copied().unwrap_or_default();
        if self.read_version(protocol)? <= pending.version {
            return Ok(owed);
        }
        let rate = self.context_at(protocol, pending.version)?;
        Ok(owed.try_add(rate.convert_to_assets(pending.redemption)?)?)
    }

    /// Assets backing outstanding shares.
    pub fn total_assets(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        let unclaimed = self.total_unclaimed(protocol)?;
        if self.read_version(protocol)? == self.latest_version {
            return self.total_assets_at(protocol, unclaimed);
        }
        // Pending deposits have been minted by now.
        Ok(self.total_collateral(protocol)?.sub_or_zero(unclaimed))
    }

    fn read_context(&self, protocol: &Protocol) -> Result<VersionContext, VaultError> {
        Ok(VersionContext {
            version: self.read_version(protocol)?,
            latest_assets: self.total_assets(protocol)?,
            latest_shares: self.total_supply(protocol)?,
        })
    }

    pub fn convert_to_shares(&self, protocol: &Protocol, assets: UFixed18) -> Result<UFixed18, VaultError> {
        Ok(self.read_context(protocol)?.convert_to_shares(assets)?)
    }

    pub fn convert_to_assets(&self, protocol: &Protocol, shares: UFixed18) -> Result<UFixed18, VaultError> {
        Ok(self.read_context(protocol)?.convert_to_assets(shares)?)
    }

    pub fn is_unhealthy(&self, protocol: &Protocol) -> Result<bool, VaultError> {
        let context = self.context_at(protocol, self.latest_version)?;
        self.unhealthy_at(protocol, &context)
    }

    /// Largest deposit currently accepted.
    pub fn max_deposit(&self, protocol: &Protocol) -> Result<UFixed18, VaultError> {
        if self.is_unhealthy(protocol)? {
            return Ok(UFixed18::ZERO);
        }
        let current = self
            .total_collateral(protocol)?
            .sub_or_zero(self.total_unclaimed(protocol)?);
        Ok(self.params.max_collateral.sub_or_zero(current))
    }

    /// Largest redemption `account` can currently make.
    pub fn max_redeem(&self, protocol: &Protocol, account: &Account) -> Result<UFixed18, VaultError> {
        if self.is_unhealthy(protocol)? {
            return Ok(UFixed18::ZERO);
        }
        self.balance_of(protocol, account)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use perp_product::{JumpRateCurve, ProductParams, ProtocolParams};
    use perp_types::{ManualOracle, Payoff};

    use super::*;

    fn units(n: u64) -> UFixed18 {
        UFixed18::from_int(n)
    }

    fn market(payoff: Payoff) -> ProductParams {
        ProductParams {
            name: format!("ETH-{payoff:?}"),
            payoff,
            maintenance: "0.1".parse().unwrap(),
            funding_fee: UFixed18::ZERO,
            maker_fee: UFixed18::ZERO,
            taker_fee: UFixed18::ZERO,
            maker_limit: units(1_000_000),
            utilization_curve: JumpRateCurve::default(),
        }
    }

    fn setup() -> (Protocol, BalancedVault, Arc<ManualOracle>) {
        let owner = Account::new("owner");
        let mut protocol = Protocol::new(ProtocolParams {
            owner: owner.clone(),
            treasury: Account::new("treasury"),
            protocol_fee: UFixed18::ZERO,
            min_funding_fee: UFixed18::ZERO,
            liquidation_fee: "0.5".parse().unwrap(),
            min_collateral: units(500),
        });
        let oracle = Arc::new(ManualOracle::new(Fixed18::from_int(1_000), 0));
        let long = protocol
            .create_product(&owner, market(Payoff::Long), None, oracle.clone())
            .unwrap();
        let short = protocol
            .create_product(&owner, market(Payoff::Short), None, oracle.clone())
            .unwrap();
        oracle.advance(Fixed18::from_int(1_000), 3600).unwrap();
        let vault = BalancedVault::new(
            Account::new("vault"),
            long,
            short,
            VaultParams {
                target_leverage: units(2),
                max_collateral: units(10_000),
            },
        );
        (protocol, vault, oracle)
    }

    #[test]
    fn deposit_over_limit_reverts_everything() {
        let (mut protocol, mut vault, _oracle) = setup();
        let alice = Account::new("alice");
        vault.deposit(&mut protocol, units(4_000), &alice).unwrap();
        let before = vault.pending_deposit();

        let err = vault.deposit(&mut protocol, units(6_001), &alice).unwrap_err();
        assert_eq!(
            err,
            VaultError::DepositLimitExceeded {
                assets: units(6_001),
                max: units(6_000)
            }
        );
        assert_eq!(vault.pending_deposit(), before);
        assert_eq!(vault.leg_collateral(&protocol, Leg::Long), units(2_000));
        assert_eq!(vault.leg_collateral(&protocol, Leg::Short), units(2_000));
        assert!(vault.idle().is_zero());

        vault.deposit(&mut protocol, units(6_000), &alice).unwrap();
        assert!(vault.max_deposit(&protocol).unwrap().is_zero());
    }

    #[test]
    fn collateral_splits_evenly_and_dust_stays_idle() {
        let (mut protocol, mut vault, _oracle) = setup();
        let alice = Account::new("alice");
        let odd = UFixed18::from_raw(2_000 * 1_000_000_000_000_000_000 + 1);
        vault.deposit(&mut protocol, odd, &alice).unwrap();

        assert_eq!(vault.leg_collateral(&protocol, Leg::Long), units(1_000));
        assert_eq!(vault.leg_collateral(&protocol, Leg::Short), units(1_000));
        assert_eq!(vault.idle(), UFixed18::from_raw(1));
    }

    #[test]
    fn small_vault_stays_idle() {
        let (mut protocol, mut vault, _oracle) = setup();
        let alice = Account::new("alice");
        vault.deposit(&mut protocol, units(900), &alice).unwrap();
        // 450 per leg is under the 500 minimum.
        assert!(vault.leg_collateral(&protocol, Leg::Long).is_zero());
        assert_eq!(vault.idle(), units(900));
    }

    #[test]
    fn shares_mint_after_the_version_moves() {
        let (mut protocol, mut vault, oracle) = setup();
        let alice = Account::new("alice");
        vault.deposit(&mut protocol, units(2_000), &alice).unwrap();
        assert!(vault.balance_of(&protocol, &alice).unwrap().is_zero());
        assert_eq!(vault.max_redeem(&protocol, &alice).unwrap(), UFixed18::ZERO);

        oracle.advance(Fixed18::from_int(1_000), 7200).unwrap();
        vault.sync(&mut protocol).unwrap();
        assert_eq!(vault.total_supply(&protocol).unwrap(), units(2_000));
        assert_eq!(vault.balance_of(&protocol, &alice).unwrap(), units(2_000));
        assert_eq!(vault.total_assets(&protocol).unwrap(), units(2_000));
        // 2000 * 2 / 1000 / 2
        assert_eq!(vault.leg_position(&protocol, Leg::Long).unwrap(), units(2));
        assert_eq!(vault.leg_position(&protocol, Leg::Short).unwrap(), units(2));
    }

    #[test]
    fn redeeming_more_than_balance_is_rejected() {
        let (mut protocol, mut vault, oracle) = setup();
        let alice = Account::new("alice");
        vault.deposit(&mut protocol, units(2_000), &alice).unwrap();
        oracle.advance(Fixed18::from_int(1_000), 7200).unwrap();

        let err = vault.redeem(&mut protocol, units(2_001), &alice).unwrap_err();
        assert_eq!(
            err,
            VaultError::RedemptionLimitExceeded {
                shares: units(2_001),
                max: units(2_000)
            }
        );
        // The failed call settled nothing.
        assert_eq!(vault.latest_version(), 1);
    }

    #[test]
    fn claim_with_nothing_owed_pays_nothing() {
        let (mut protocol, mut vault, _oracle) = setup();
        let paid = vault.claim(&mut protocol, &Account::new("nobody")).unwrap();
        assert!(paid.is_zero());
    }

    #[test]
    fn zero_receiver_is_rejected() {
        let (mut protocol, mut vault, _oracle) = setup();
        let err = vault
            .deposit(&mut protocol, units(1), &Account::new(""))
            .unwrap_err();
        assert_eq!(err, VaultError::Protocol(CollateralError::ZeroAddress));
    }
}
