//! A single perpetual market and its two-hop settlement flywheel.
//!
//! # Settlement
//!
//! Settling from the latest settled version `a` to the current oracle
//! version `c` takes at most two hops:
//!
//! 1. `a -> b`, where `b` is the version right after the pending position
//!    was queued (or `c` if nothing is pending). Value accrues on the
//!    position held at `a`; the pending position is then folded in at `b`
//!    and charged its position fee.
//! 2. `b -> c` (only if `b != c`), accruing on the position settled at `b`.
//!
//! Accounts follow the same two hops against the global accumulator, lazily,
//! the next time they are touched.
//!
//! # Atomicity
//!
//! Each settlement computes every stamp and the ledger update before
//! writing anything. A position change first settles (and commits that
//! settlement), then validates its projected state and only then commits
//! the new pending position.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use perp_types::{
    Accumulator, Account, Fixed18, OracleProvider, OracleVersion, Payoff, Position, PrePosition,
    ProductId, UFixed18,
};

use crate::account::{AccountPosition, AccountState};
use crate::collateral::LiquidationToken;
use crate::curve::JumpRateCurve;
use crate::error::ProductError;
use crate::invariant::{self, Operation, Projection};
use crate::ledger::CollateralLedger;
use crate::versioned::{accumulate_interval, settle_pre, AccrualParams, VersionedAccumulator, VersionedPosition};

/// Owner-controlled product parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductParams {
    pub name: String,
    pub payoff: Payoff,
    /// Fraction of notional required as collateral.
    pub maintenance: UFixed18,
    /// Fraction of funding kept by the protocol.
    pub funding_fee: UFixed18,
    /// Fraction of notional charged on maker volume.
    pub maker_fee: UFixed18,
    /// Fraction of notional charged on taker volume.
    pub taker_fee: UFixed18,
    /// Cap on the global maker position.
    pub maker_limit: UFixed18,
    pub utilization_curve: JumpRateCurve,
}

/// A perpetual market over one oracle feed.
#[derive(Clone, Debug)]
pub struct Product {
    id: ProductId,
    params: ProductParams,
    closed: bool,
    oracle: Arc<dyn OracleProvider>,
    position: VersionedPosition,
    accumulator: VersionedAccumulator,
    accounts: BTreeMap<Account, AccountState>,
}

impl Product {
    pub fn new(id: ProductId, params: ProductParams, oracle: Arc<dyn OracleProvider>) -> Self {
        Product {
            id,
            params,
            closed: false,
            oracle,
            position: VersionedPosition::default(),
            accumulator: VersionedAccumulator::default(),
            accounts: BTreeMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn params(&self) -> &ProductParams {
        &self.params
    }

    /// Whether the product is closed to new exposure.
    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn maker_limit(&self) -> UFixed18 {
        self.params.maker_limit
    }

    /// Current oracle version, payoff applied. Does not advance the oracle.
    pub fn current_version(&self) -> Result<OracleVersion, ProductError> {
        Ok(self.params.payoff.apply(self.oracle.current_version())?)
    }

    /// Published oracle version, payoff applied.
    pub fn at_version(&self, version: u64) -> Result<OracleVersion, ProductError> {
        let raw = self
            .oracle
            .at_version(version)
            .ok_or(ProductError::UnknownVersion(version))?;
        Ok(self.params.payoff.apply(raw)?)
    }

    /// Latest globally settled version.
    pub fn latest_version(&self) -> u64 {
        self.accumulator.latest_version()
    }

    /// Latest version `account` was settled to.
    pub fn latest_version_of(&self, account: &Account) -> u64 {
        self.account(account).accumulator.latest_version
    }

    pub fn account_position(&self, account: &Account) -> AccountPosition {
        self.account(account).position
    }

    pub fn position(&self, account: &Account) -> Position {
        self.account(account).position.position
    }

    pub fn pre(&self, account: &Account) -> PrePosition {
        self.account(account).position.pre
    }

    pub fn is_liquidating(&self, account: &Account) -> bool {
        self.account(account).position.liquidating
    }

    /// No settled or pending exposure.
    pub fn is_closed(&self, account: &Account) -> Result<bool, ProductError> {
        Ok(self.account(account).position.is_closed()?)
    }

    /// Global position at the latest settled version.
    pub fn global_position(&self) -> Position {
        self.position.position_at_version(self.latest_version())
    }

    pub fn global_pre(&self) -> PrePosition {
        *self.position.pre()
    }

    /// Global position with pending deltas applied.
    pub fn global_next(&self) -> Result<Position, ProductError> {
        Ok(self.position.next(self.latest_version())?)
    }

    pub fn position_at_version(&self, version: u64) -> Position {
        self.position.position_at_version(version)
    }

    pub fn value_at_version(&self, version: u64) -> Accumulator {
        self.accumulator.value_at_version(version)
    }

    pub fn share_at_version(&self, version: u64) -> Accumulator {
        self.accumulator.share_at_version(version)
    }

    /// First stamped value strictly after `version`, if any.
    pub fn value_after(&self, version: u64) -> Option<(u64, Accumulator)> {
        self.accumulator.value_after(version)
    }

    /// Per-second funding rate for `position`.
    pub fn rate(&self, position: &Position) -> Result<Fixed18, ProductError> {
        Ok(self.params.utilization_curve.per_second(position.utilization())?)
    }

    /// Maintenance of the account's settled position at the latest price.
    pub fn maintenance(&self, account: &Account) -> Result<UFixed18, ProductError> {
        self.maintenance_for(&self.position(account))
    }

    /// Maintenance of the account's pending-adjusted position.
    pub fn maintenance_next(&self, account: &Account) -> Result<UFixed18, ProductError> {
        let state = self.account(account);
        self.maintenance_for(&clamped_next(&state.position.position, &state.position.pre)?)
    }

    fn maintenance_for(&self, position: &Position) -> Result<UFixed18, ProductError> {
        let price = self.at_version(self.latest_version())?.price.abs();
        Ok(position
            .max()
            .try_mul(price)?
            .try_mul(self.params.maintenance)?)
    }

    fn account(&self, account: &Account) -> AccountState {
        self.accounts.get(account).copied().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Advance the oracle and settle global state up to the current version.
    pub fn settle(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<OracleVersion, ProductError> {
        let current = self.params.payoff.apply(self.oracle.sync())?;
        let latest_version = self.latest_version();
        if current.version <= latest_version {
            return Ok(current);
        }

        let latest = self.at_version(latest_version)?;
        let settle_version = self.position.pre().settle_version(current.version);
        let settle_oracle = if settle_version == current.version {
            current
        } else {
            self.at_version(settle_version)?
        };
        let accrual = AccrualParams {
            closed: self.closed,
            curve: self.params.utilization_curve,
            funding_fee: self.params.funding_fee.max(min_funding_fee),
        };

        // Hop 1: a -> b on the position held at a, then fold in the pre.
        let held = self.position.position_at_version(latest_version);
        let hop = accumulate_interval(&accrual, held, &latest, &settle_oracle)?;
        let mut value = self
            .accumulator
            .value_at_version(latest_version)
            .try_add(&hop.value)?;
        let mut share = self
            .accumulator
            .share_at_version(latest_version)
            .try_add(&hop.share)?;
        let (settled, position_fee, consumed) = settle_pre(
            held,
            self.position.pre(),
            &settle_oracle,
            self.params.maker_fee,
            self.params.taker_fee,
        )?;
        let mut fee = hop.fee.try_add(position_fee)?;
        let mut stamps = vec![(settle_oracle.version, value, share)];

        // Hop 2: b -> c on the position settled at b.
        if settle_oracle.version != current.version {
            let hop = accumulate_interval(&accrual, settled, &settle_oracle, &current)?;
            value = value.try_add(&hop.value)?;
            share = share.try_add(&hop.share)?;
            fee = fee.try_add(hop.fee)?;
            stamps.push((current.version, value, share));
        }

        ledger.settle_product(self.id, fee)?;

        for (version, value, share) in stamps {
            self.accumulator.record(version, value, share)?;
            self.position.record(version, settled)?;
        }
        if consumed {
            self.position.clear_pre();
        }

        debug!(
            product = %self.id,
            from = latest_version,
            via = settle_oracle.version,
            to = current.version,
            %fee,
            "product settled"
        );
        Ok(current)
    }

    /// Settle global state, then `account`, up to the current version.
    pub fn settle_account(
        &mut self,
        account: &Account,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<OracleVersion, ProductError> {
        let current = self.settle(ledger, min_funding_fee)?;
        self.settle_account_at(account, current, ledger)?;
        Ok(current)
    }

    fn settle_account_at(
        &mut self,
        account: &Account,
        current: OracleVersion,
        ledger: &mut dyn CollateralLedger,
    ) -> Result<(), ProductError> {
        let mut state = self.account(account);
        let from_version = state.accumulator.latest_version;
        if from_version >= current.version {
            return Ok(());
        }

        let settle_version = state.position.pre.settle_version(current.version);
        let settle_oracle = if settle_version == current.version {
            current
        } else {
            self.at_version(settle_version)?
        };

        let mut amount = state
            .accumulator
            .sync_to(&self.accumulator, &state.position.position, settle_oracle.version)?
            .sum()?;
        let fee = state
            .position
            .settle(&settle_oracle, self.params.maker_fee, self.params.taker_fee)?;
        amount = amount.try_sub(Fixed18::from_unsigned(fee)?)?;
        if settle_oracle.version != current.version {
            let tail = state
                .accumulator
                .sync_to(&self.accumulator, &state.position.position, current.version)?
                .sum()?;
            amount = amount.try_add(tail)?;
        }

        ledger.settle_account(self.id, account, amount)?;
        self.accounts.insert(account.clone(), state);

        debug!(
            product = %self.id,
            %account,
            from = from_version,
            to = current.version,
            %amount,
            "account settled"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Position changes
    // -----------------------------------------------------------------------

    pub fn open_take(
        &mut self,
        account: &Account,
        amount: UFixed18,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.update_position(Operation::OpenTake, account, amount, ledger, min_funding_fee)
    }

    pub fn close_take(
        &mut self,
        account: &Account,
        amount: UFixed18,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.update_position(Operation::CloseTake, account, amount, ledger, min_funding_fee)
    }

    pub fn open_make(
        &mut self,
        account: &Account,
        amount: UFixed18,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.update_position(Operation::OpenMake, account, amount, ledger, min_funding_fee)
    }

    pub fn close_make(
        &mut self,
        account: &Account,
        amount: UFixed18,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.update_position(Operation::CloseMake, account, amount, ledger, min_funding_fee)
    }

    fn update_position(
        &mut self,
        operation: Operation,
        account: &Account,
        amount: UFixed18,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        let current = self.settle_account(account, ledger, min_funding_fee)?;
        let version = current.version;

        let mut state = self.account(account);
        let mut global_pre = *self.position.pre();
        queue(operation, &mut state.position.pre, version, amount)?;
        queue(operation, &mut global_pre, version, amount)?;

        let global_next = clamped_next(&self.position.position_at_version(version), &global_pre)?;
        let account_next = clamped_next(&state.position.position, &state.position.pre)?;
        let projection = Projection {
            operation,
            latest_version: version,
            product_closed: self.closed,
            maker_limit: self.params.maker_limit,
            global_next,
            account: state.position,
            maintenance_next: self.maintenance_for(&account_next)?,
            collateral: ledger.collateral(account, self.id),
        };
        invariant::validate(&projection)?;

        self.accounts.insert(account.clone(), state);
        *self.position.pre_mut() = global_pre;

        info!(product = %self.id, %account, ?operation, %amount, version, "position updated");
        Ok(())
    }

    /// Queue closes for the account's entire pending-adjusted position and
    /// lock it until they settle. Invariants are not checked.
    pub fn close_all(
        &mut self,
        _token: &LiquidationToken,
        account: &Account,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        let current = self.settle_account(account, ledger, min_funding_fee)?;
        let version = current.version;

        let mut state = self.account(account);
        let mut global_pre = *self.position.pre();
        let next = state.position.next()?;
        if !next.maker.is_zero() {
            state.position.pre.close_make(version, next.maker)?;
            global_pre.close_make(version, next.maker)?;
        }
        if !next.taker.is_zero() {
            state.position.pre.close_take(version, next.taker)?;
            global_pre.close_take(version, next.taker)?;
        }
        state.position.liquidating = true;

        self.accounts.insert(account.clone(), state);
        *self.position.pre_mut() = global_pre;

        warn!(product = %self.id, %account, maker = %next.maker, taker = %next.taker, version, "position force-closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Owner updates (authorization is checked by the protocol)
    // -----------------------------------------------------------------------

    pub(crate) fn update_params(
        &mut self,
        params: ProductParams,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.settle(ledger, min_funding_fee)?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn update_closed(
        &mut self,
        closed: bool,
        ledger: &mut dyn CollateralLedger,
        min_funding_fee: UFixed18,
    ) -> Result<(), ProductError> {
        self.settle(ledger, min_funding_fee)?;
        self.closed = closed;
        Ok(())
    }
}

fn queue(
    operation: Operation,
    pre: &mut PrePosition,
    version: u64,
    amount: UFixed18,
) -> Result<(), ProductError> {
    match operation {
        Operation::OpenTake => pre.open_take(version, amount)?,
        Operation::CloseTake => pre.close_take(version, amount)?,
        Operation::OpenMake => pre.open_make(version, amount)?,
        Operation::CloseMake => pre.close_make(version, amount)?,
    }
    Ok(())
}

/// Pending deltas applied, with negative sides clamped to zero. The
/// over-close validator reports the negative case; this keeps the other
/// projections computable.
fn clamped_next(position: &Position, pre: &PrePosition) -> Result<Position, ProductError> {
    let (maker, taker) = position.next_signed(pre)?;
    let clamp = |v: Fixed18| {
        if v.is_negative() {
            UFixed18::ZERO
        } else {
            v.abs()
        }
    };
    Ok(Position::new(clamp(maker), clamp(taker)))
}
