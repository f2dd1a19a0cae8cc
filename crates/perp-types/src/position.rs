//! Position and accumulator value types.
//!
//! - [`Position`]: settled maker/taker sizes.
//! - [`PrePosition`]: pending deltas queued at an oracle version and applied
//!   at the first settlement strictly after it.
//! - [`Accumulator`]: per-unit maker/taker values (PnL, funding, share).

use serde::{Deserialize, Serialize};

use crate::fixed::{ArithmeticError, Fixed18, UFixed18};
use crate::oracle::OracleVersion;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Settled maker and taker sizes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub maker: UFixed18,
    pub taker: UFixed18,
}

impl Position {
    pub const ZERO: Position = Position {
        maker: UFixed18::ZERO,
        taker: UFixed18::ZERO,
    };

    pub fn new(maker: UFixed18, taker: UFixed18) -> Self {
        Position { maker, taker }
    }

    pub fn is_empty(&self) -> bool {
        self.maker.is_zero() && self.taker.is_zero()
    }

    /// Larger of the two sides.
    pub fn max(&self) -> UFixed18 {
        self.maker.max(self.taker)
    }

    pub fn try_add(&self, other: &Position) -> Result<Position, ArithmeticError> {
        Ok(Position {
            maker: self.maker.try_add(other.maker)?,
            taker: self.taker.try_add(other.taker)?,
        })
    }

    /// Taker / maker, with `unsafe_div` semantics for an empty maker side.
    pub fn utilization(&self) -> UFixed18 {
        self.taker.unsafe_div(self.maker)
    }

    /// `min(1, maker / taker)`, or `1` when there are no takers.
    ///
    /// Below 1 the makers cannot cover the takers and taker exposure is
    /// scaled down by this factor.
    pub fn socialization_factor(&self) -> Result<UFixed18, ArithmeticError> {
        if self.taker.is_zero() {
            return Ok(UFixed18::ONE);
        }
        Ok(UFixed18::ONE.min(self.maker.try_div(self.taker)?))
    }

    /// Apply pending deltas. Fails with `Underflow` if a side would go
    /// negative.
    pub fn next(&self, pre: &PrePosition) -> Result<Position, ArithmeticError> {
        let (maker, taker) = self.next_signed(pre)?;
        if maker.is_negative() || taker.is_negative() {
            return Err(ArithmeticError::Underflow);
        }
        Ok(Position {
            maker: maker.abs(),
            taker: taker.abs(),
        })
    }

    /// Pending deltas applied without the non-negativity check.
    pub fn next_signed(&self, pre: &PrePosition) -> Result<(Fixed18, Fixed18), ArithmeticError> {
        Ok((
            Fixed18::from_unsigned(self.maker)?.try_add(pre.maker_delta)?,
            Fixed18::from_unsigned(self.taker)?.try_add(pre.taker_delta)?,
        ))
    }

    /// Both sides non-zero.
    pub fn is_double_sided(&self) -> bool {
        !self.maker.is_zero() && !self.taker.is_zero()
    }

    /// Per-side product with an accumulator: the value owed to a holder of
    /// this position over the accumulator's interval.
    pub fn mul_accumulator(&self, acc: &Accumulator) -> Result<Accumulator, ArithmeticError> {
        Ok(Accumulator {
            maker: Fixed18::from_unsigned(self.maker)?.try_mul(acc.maker)?,
            taker: Fixed18::from_unsigned(self.taker)?.try_mul(acc.taker)?,
        })
    }
}

// ---------------------------------------------------------------------------
// PrePosition
// ---------------------------------------------------------------------------

/// Pending position changes queued at `open_version`.
///
/// `*_delta` is the net signed change; `*_traded` is the gross volume used
/// to charge position fees. A pre-position is empty when nothing has been
/// traded since it was last consumed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePosition {
    pub open_version: u64,
    pub maker_delta: Fixed18,
    pub taker_delta: Fixed18,
    pub maker_traded: UFixed18,
    pub taker_traded: UFixed18,
}

impl PrePosition {
    pub fn is_empty(&self) -> bool {
        self.maker_traded.is_zero() && self.taker_traded.is_zero()
    }

    pub fn open_make(&mut self, version: u64, amount: UFixed18) -> Result<(), ArithmeticError> {
        self.maker_delta = self.maker_delta.try_add(Fixed18::from_unsigned(amount)?)?;
        self.maker_traded = self.maker_traded.try_add(amount)?;
        self.open_version = version;
        Ok(())
    }

    pub fn close_make(&mut self, version: u64, amount: UFixed18) -> Result<(), ArithmeticError> {
        self.maker_delta = self.maker_delta.try_sub(Fixed18::from_unsigned(amount)?)?;
        self.maker_traded = self.maker_traded.try_add(amount)?;
        self.open_version = version;
        Ok(())
    }

    pub fn open_take(&mut self, version: u64, amount: UFixed18) -> Result<(), ArithmeticError> {
        self.taker_delta = self.taker_delta.try_add(Fixed18::from_unsigned(amount)?)?;
        self.taker_traded = self.taker_traded.try_add(amount)?;
        self.open_version = version;
        Ok(())
    }

    pub fn close_take(&mut self, version: u64, amount: UFixed18) -> Result<(), ArithmeticError> {
        self.taker_delta = self.taker_delta.try_sub(Fixed18::from_unsigned(amount)?)?;
        self.taker_traded = self.taker_traded.try_add(amount)?;
        self.open_version = version;
        Ok(())
    }

    /// First hop target when settling up to `current`: the version right
    /// after this pre-position was queued, or `current` when nothing is
    /// pending or that version is not yet published.
    pub fn settle_version(&self, current: u64) -> u64 {
        if self.is_empty() {
            return current;
        }
        current.min(self.open_version.saturating_add(1))
    }

    /// Whether settling to `to` consumes this pre-position.
    pub fn can_settle(&self, to: &OracleVersion) -> bool {
        !self.is_empty() && to.version > self.open_version
    }

    /// Position fee charged when this pre-position settles at `to`:
    /// `(maker_traded * maker_fee + taker_traded * taker_fee) * |price|`.
    pub fn compute_fee(
        &self,
        to: &OracleVersion,
        maker_fee: UFixed18,
        taker_fee: UFixed18,
    ) -> Result<UFixed18, ArithmeticError> {
        let maker = self.maker_traded.try_mul(maker_fee)?;
        let taker = self.taker_traded.try_mul(taker_fee)?;
        maker.try_add(taker)?.try_mul(to.price.abs())
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Per-unit maker and taker values.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    pub maker: Fixed18,
    pub taker: Fixed18,
}

impl Accumulator {
    pub const ZERO: Accumulator = Accumulator {
        maker: Fixed18::ZERO,
        taker: Fixed18::ZERO,
    };

    pub fn try_add(&self, other: &Accumulator) -> Result<Accumulator, ArithmeticError> {
        Ok(Accumulator {
            maker: self.maker.try_add(other.maker)?,
            taker: self.taker.try_add(other.taker)?,
        })
    }

    pub fn try_sub(&self, other: &Accumulator) -> Result<Accumulator, ArithmeticError> {
        Ok(Accumulator {
            maker: self.maker.try_sub(other.maker)?,
            taker: self.taker.try_sub(other.taker)?,
        })
    }

    /// `maker + taker`.
    pub fn sum(&self) -> Result<Fixed18, ArithmeticError> {
        self.maker.try_add(self.taker)
    }
}
