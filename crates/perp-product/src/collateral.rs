//! Collateral ledger and the protocol's collateral operations.
//!
//! - [`OptimisticLedger`]: per-product balances. Losses beyond an account's
//!   balance are absorbed into the product's shortfall rather than failing
//!   settlement.
//! - [`Collateral`]: all product ledgers plus accrued fees, implementing
//!   [`CollateralLedger`] for product settlement.
//! - `impl Protocol`: deposit, withdraw, liquidate and fee operations, which
//!   need the product and the ledger together.
//!
//! Invariant: after every deposit or withdrawal an account's balance in a
//! product is either zero or at least the protocol's minimum collateral.
//! A rejected operation also rolls back the settlement it forced.

use std::collections::BTreeMap;

use tracing::{info, warn};

use perp_types::{Account, ArithmeticError, Fixed18, ProductId, UFixed18};

use crate::error::{CollateralError, ProductError};
use crate::ledger::CollateralLedger;
use crate::protocol::Protocol;

// ---------------------------------------------------------------------------
// LiquidationToken
// ---------------------------------------------------------------------------

/// Capability required to force-close a position.
///
/// Only this module can mint one, so [`crate::Product::close_all`] is only
/// reachable through [`Protocol::liquidate`].
#[derive(Debug)]
pub struct LiquidationToken {
    _private: (),
}

impl LiquidationToken {
    fn issue() -> Self {
        LiquidationToken { _private: () }
    }
}

// ---------------------------------------------------------------------------
// OptimisticLedger
// ---------------------------------------------------------------------------

/// Balances for one product.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimisticLedger {
    balances: BTreeMap<Account, UFixed18>,
    total: UFixed18,
    shortfall: UFixed18,
}

impl OptimisticLedger {
    pub fn balance(&self, account: &Account) -> UFixed18 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Sum of all balances.
    pub fn total(&self) -> UFixed18 {
        self.total
    }

    pub fn shortfall(&self) -> UFixed18 {
        self.shortfall
    }

    fn credit(&mut self, account: &Account, amount: UFixed18) -> Result<(), ArithmeticError> {
        let balance = self.balance(account).try_add(amount)?;
        self.total = self.total.try_add(amount)?;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }

    fn debit(&mut self, account: &Account, amount: UFixed18) -> Result<(), CollateralError> {
        let available = self.balance(account);
        let balance = available
            .try_sub(amount)
            .map_err(|_| CollateralError::InsufficientBalance {
                requested: amount,
                available,
            })?;
        self.total = self.total.try_sub(amount)?;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }

    /// Apply a signed value change; returns any newly created shortfall.
    fn settle(&mut self, account: &Account, amount: Fixed18) -> Result<UFixed18, ArithmeticError> {
        let before = self.balance(account);
        let after = Fixed18::from_unsigned(before)?.try_add(amount)?;
        let (balance, shortfall) = if after.is_negative() {
            (UFixed18::ZERO, after.abs())
        } else {
            (after.abs(), UFixed18::ZERO)
        };
        self.total = self.total.try_sub(before)?.try_add(balance)?;
        self.shortfall = self.shortfall.try_add(shortfall)?;
        self.balances.insert(account.clone(), balance);
        Ok(shortfall)
    }
}

// ---------------------------------------------------------------------------
// Collateral
// ---------------------------------------------------------------------------

/// Collateral held across all products, plus claimable fees.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collateral {
    ledgers: BTreeMap<ProductId, OptimisticLedger>,
    treasuries: BTreeMap<ProductId, Account>,
    fees: BTreeMap<Account, UFixed18>,
    protocol_treasury: Account,
    protocol_fee: UFixed18,
}

impl Collateral {
    pub(crate) fn new(protocol_treasury: Account, protocol_fee: UFixed18) -> Self {
        Collateral {
            protocol_treasury,
            protocol_fee,
            ..Collateral::default()
        }
    }

    pub(crate) fn set_fee_split(&mut self, protocol_treasury: Account, protocol_fee: UFixed18) {
        self.protocol_treasury = protocol_treasury;
        self.protocol_fee = protocol_fee;
    }

    pub(crate) fn register(&mut self, product: ProductId, treasury: Account) {
        self.ledgers.entry(product).or_default();
        self.treasuries.insert(product, treasury);
    }

    pub fn ledger(&self, product: ProductId) -> Option<&OptimisticLedger> {
        self.ledgers.get(&product)
    }

    fn ledger_mut(&mut self, product: ProductId) -> &mut OptimisticLedger {
        self.ledgers.entry(product).or_default()
    }

    /// Fees claimable by `account`.
    pub fn fees(&self, account: &Account) -> UFixed18 {
        self.fees.get(account).copied().unwrap_or_default()
    }

    fn accrue_fee(&mut self, account: &Account, amount: UFixed18) -> Result<(), ArithmeticError> {
        if amount.is_zero() {
            return Ok(());
        }
        let fees = self.fees(account).try_add(amount)?;
        self.fees.insert(account.clone(), fees);
        Ok(())
    }
}

impl CollateralLedger for Collateral {
    fn settle_account(
        &mut self,
        product: ProductId,
        account: &Account,
        amount: Fixed18,
    ) -> Result<(), ArithmeticError> {
        let shortfall = self.ledger_mut(product).settle(account, amount)?;
        if !shortfall.is_zero() {
            warn!(%product, %account, %shortfall, "settlement loss exceeds collateral");
        }
        Ok(())
    }

    fn settle_product(&mut self, product: ProductId, fee: UFixed18) -> Result<(), ArithmeticError> {
        let protocol_amount = fee.try_mul(self.protocol_fee)?;
        let product_amount = fee.try_sub(protocol_amount)?;
        let protocol_treasury = self.protocol_treasury.clone();
        let product_treasury = self
            .treasuries
            .get(&product)
            .cloned()
            .unwrap_or_else(|| protocol_treasury.clone());
        self.accrue_fee(&protocol_treasury, protocol_amount)?;
        self.accrue_fee(&product_treasury, product_amount)
    }

    fn collateral(&self, account: &Account, product: ProductId) -> UFixed18 {
        self.ledgers
            .get(&product)
            .map(|l| l.balance(account))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Protocol collateral operations
// ---------------------------------------------------------------------------

impl Protocol {
    /// Deposit `amount` into `account`'s collateral for `product`.
    pub fn deposit_to(
        &mut self,
        account: &Account,
        product: ProductId,
        amount: UFixed18,
    ) -> Result<(), CollateralError> {
        if account.is_zero() {
            return Err(CollateralError::ZeroAddress);
        }
        self.transact(product, |p, collateral, params| -> Result<(), CollateralError> {
            p.settle_account(account, collateral, params.min_funding_fee)?;

            let balance = collateral.collateral(account, product).try_add(amount)?;
            check_min_collateral(balance, params.min_collateral)?;
            collateral.ledger_mut(product).credit(account, amount)?;

            info!(%product, %account, %amount, %balance, "collateral deposited");
            Ok(())
        })
    }

    /// Withdraw `amount` of `account`'s collateral from `product`.
    pub fn withdraw_from(
        &mut self,
        account: &Account,
        product: ProductId,
        amount: UFixed18,
    ) -> Result<(), CollateralError> {
        if account.is_zero() {
            return Err(CollateralError::ZeroAddress);
        }
        self.transact(product, |p, collateral, params| -> Result<(), CollateralError> {
            p.settle_account(account, collateral, params.min_funding_fee)?;

            let available = collateral.collateral(account, product);
            let balance = available
                .try_sub(amount)
                .map_err(|_| CollateralError::InsufficientBalance {
                    requested: amount,
                    available,
                })?;
            check_min_collateral(balance, params.min_collateral)?;
            if p.maintenance_next(account)? > balance {
                return Err(CollateralError::InsufficientCollateral);
            }
            collateral.ledger_mut(product).debit(account, amount)?;

            info!(%product, %account, %amount, %balance, "collateral withdrawn");
            Ok(())
        })
    }

    /// Liquidate an account below maintenance in `product`. Queues closes
    /// for its whole position and returns the fee paid to `liquidator`.
    pub fn liquidate(
        &mut self,
        liquidator: &Account,
        account: &Account,
        product: ProductId,
    ) -> Result<UFixed18, CollateralError> {
        if liquidator.is_zero() || account.is_zero() {
            return Err(CollateralError::ZeroAddress);
        }
        self.transact(product, |p, collateral, params| -> Result<UFixed18, CollateralError> {
            p.settle_account(account, collateral, params.min_funding_fee)?;

            if p.is_liquidating(account) {
                return Err(CollateralError::AccountLiquidating);
            }
            let maintenance = p.maintenance(account)?;
            let balance = collateral.collateral(account, product);
            if maintenance <= balance {
                return Err(CollateralError::CantLiquidate {
                    maintenance,
                    collateral: balance,
                });
            }

            p.close_all(&LiquidationToken::issue(), account, collateral, params.min_funding_fee)?;

            let fee = maintenance
                .max(params.min_collateral)
                .try_mul(params.liquidation_fee)?
                .min(balance);
            collateral.ledger_mut(product).debit(account, fee)?;

            warn!(%product, %account, %liquidator, %maintenance, collateral = %balance, %fee, "account liquidated");
            Ok(fee)
        })
    }

    /// Below maintenance at the latest settled state and not already being
    /// liquidated.
    pub fn liquidatable(&self, account: &Account, product: ProductId) -> Result<bool, ProductError> {
        let p = self.product(product)?;
        if p.is_liquidating(account) {
            return Ok(false);
        }
        Ok(p.maintenance(account)? > self.collateral(account, product))
    }

    /// Below maintenance once pending position changes settle.
    pub fn liquidatable_next(&self, account: &Account, product: ProductId) -> Result<bool, ProductError> {
        let p = self.product(product)?;
        Ok(p.maintenance_next(account)? > self.collateral(account, product))
    }

    pub fn collateral(&self, account: &Account, product: ProductId) -> UFixed18 {
        self.collateral_ledger().collateral(account, product)
    }

    /// Total collateral held in `product`.
    pub fn collateral_total(&self, product: ProductId) -> UFixed18 {
        self.collateral_ledger()
            .ledger(product)
            .map(OptimisticLedger::total)
            .unwrap_or_default()
    }

    pub fn shortfall(&self, product: ProductId) -> UFixed18 {
        self.collateral_ledger()
            .ledger(product)
            .map(OptimisticLedger::shortfall)
            .unwrap_or_default()
    }

    pub fn fees(&self, account: &Account) -> UFixed18 {
        self.collateral_ledger().fees(account)
    }

    /// Pay out and zero `account`'s accrued fees.
    pub fn claim_fee(&mut self, account: &Account) -> UFixed18 {
        let amount = self
            .collateral_mut()
            .fees
            .remove(account)
            .unwrap_or_default();
        info!(%account, %amount, "fees claimed");
        amount
    }

    /// Cover `amount` of `product`'s shortfall with outside funds.
    pub fn resolve_shortfall(
        &mut self,
        product: ProductId,
        amount: UFixed18,
    ) -> Result<(), CollateralError> {
        self.product(product)?;
        let ledger = self.collateral_mut().ledger_mut(product);
        let available = ledger.shortfall;
        ledger.shortfall = available
            .try_sub(amount)
            .map_err(|_| CollateralError::InsufficientBalance {
                requested: amount,
                available,
            })?;
        info!(%product, %amount, "shortfall resolved");
        Ok(())
    }
}

fn check_min_collateral(balance: UFixed18, min: UFixed18) -> Result<(), CollateralError> {
    if !balance.is_zero() && balance < min {
        return Err(CollateralError::UnderLimit { balance, min });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(id: &str) -> Account {
        Account::new(id)
    }

    #[test]
    fn settlement_loss_beyond_balance_becomes_shortfall() {
        let mut ledger = OptimisticLedger::default();
        ledger.credit(&acct("a"), UFixed18::from_int(100)).unwrap();
        let shortfall = ledger.settle(&acct("a"), Fixed18::from_int(-130)).unwrap();
        assert_eq!(shortfall, UFixed18::from_int(30));
        assert_eq!(ledger.balance(&acct("a")), UFixed18::ZERO);
        assert_eq!(ledger.total(), UFixed18::ZERO);
        assert_eq!(ledger.shortfall(), UFixed18::from_int(30));
    }

    #[test]
    fn total_tracks_balances() {
        let mut ledger = OptimisticLedger::default();
        ledger.credit(&acct("a"), UFixed18::from_int(100)).unwrap();
        ledger.credit(&acct("b"), UFixed18::from_int(50)).unwrap();
        ledger.settle(&acct("a"), Fixed18::from_int(-10)).unwrap();
        ledger.settle(&acct("b"), Fixed18::from_int(10)).unwrap();
        ledger.debit(&acct("b"), UFixed18::from_int(60)).unwrap();
        assert_eq!(ledger.total(), UFixed18::from_int(90));
        assert!(matches!(
            ledger.debit(&acct("b"), UFixed18::ONE),
            Err(CollateralError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn product_fees_split_between_treasuries() {
        let mut c = Collateral::new(acct("protocol"), "0.25".parse().unwrap());
        c.register(ProductId(1), acct("market"));
        c.settle_product(ProductId(1), UFixed18::from_int(100)).unwrap();
        assert_eq!(c.fees(&acct("protocol")), UFixed18::from_int(25));
        assert_eq!(c.fees(&acct("market")), UFixed18::from_int(75));
    }

    #[test]
    fn min_collateral_allows_zero() {
        let min = UFixed18::from_int(100);
        assert!(check_min_collateral(UFixed18::ZERO, min).is_ok());
        assert!(check_min_collateral(min, min).is_ok());
        assert!(matches!(
            check_min_collateral(UFixed18::from_int(99), min),
            Err(CollateralError::UnderLimit { .. })
        ));
    }
}
