//! Per-account position and accumulator state.

use serde::Serialize;

use perp_types::{Accumulator, ArithmeticError, OracleVersion, Position, PrePosition, UFixed18};

use crate::versioned::{settle_pre, VersionedAccumulator};

/// An account's settled position, pending position and liquidation flag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountPosition {
    pub position: Position,
    pub pre: PrePosition,
    /// Set by a liquidation; cleared when the closing pre-position settles.
    pub liquidating: bool,
}

impl AccountPosition {
    /// Settled position with the pending deltas applied.
    pub fn next(&self) -> Result<Position, ArithmeticError> {
        self.position.next(&self.pre)
    }

    /// Pending closes exceed the settled position plus pending opens.
    pub fn is_over_closed(&self) -> Result<bool, ArithmeticError> {
        let (maker, taker) = self.position.next_signed(&self.pre)?;
        Ok(maker.is_negative() || taker.is_negative())
    }

    pub fn is_double_sided(&self) -> Result<bool, ArithmeticError> {
        Ok(self.next()?.is_double_sided())
    }

    /// No settled exposure and none pending.
    pub fn is_closed(&self) -> Result<bool, ArithmeticError> {
        Ok(self.position.is_empty() && self.next()?.is_empty())
    }

    /// Consume the pending position if `to` is past its open version.
    /// Returns the position fee owed.
    pub(crate) fn settle(
        &mut self,
        to: &OracleVersion,
        maker_fee: UFixed18,
        taker_fee: UFixed18,
    ) -> Result<UFixed18, ArithmeticError> {
        let (position, fee, consumed) = settle_pre(self.position, &self.pre, to, maker_fee, taker_fee)?;
        if consumed {
            self.position = position;
            self.pre = PrePosition::default();
            self.liquidating = false;
        }
        Ok(fee)
    }
}

/// Last global version an account's value was synced to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountAccumulator {
    pub latest_version: u64,
}

impl AccountAccumulator {
    /// Value owed to `position` between the account's latest version and
    /// `to_version`; advances the account to `to_version`.
    pub(crate) fn sync_to(
        &mut self,
        global: &VersionedAccumulator,
        position: &Position,
        to_version: u64,
    ) -> Result<Accumulator, ArithmeticError> {
        let delta = global
            .value_at_version(to_version)
            .try_sub(&global.value_at_version(self.latest_version))?;
        let owed = position.mul_accumulator(&delta)?;
        self.latest_version = to_version;
        Ok(owed)
    }
}

/// Everything the product stores per account.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountState {
    pub position: AccountPosition,
    pub accumulator: AccountAccumulator,
}
