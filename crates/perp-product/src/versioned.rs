//! Version-keyed global state.
//!
//! - [`VersionMap`]: append-only snapshots keyed by strictly increasing
//!   oracle version.
//! - [`VersionedPosition`]: global position snapshots plus the global
//!   pending position.
//! - [`VersionedAccumulator`]: cumulative per-unit value and share.
//! - [`accumulate_interval`]: funding, position PnL and share accrued over
//!   one settlement hop.

use std::collections::BTreeMap;
use std::ops::Bound;

use perp_types::{Accumulator, ArithmeticError, Fixed18, OracleVersion, Position, PrePosition, UFixed18};

use crate::curve::JumpRateCurve;
use crate::error::ProductError;

// ---------------------------------------------------------------------------
// VersionMap
// ---------------------------------------------------------------------------

/// Append-only map from oracle version to snapshot.
///
/// Reads at a version that was never stamped return `T::default()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionMap<T> {
    entries: BTreeMap<u64, T>,
}

impl<T: Copy + Default> VersionMap<T> {
    pub fn at(&self, version: u64) -> T {
        self.entries.get(&version).copied().unwrap_or_default()
    }

    pub fn get(&self, version: u64) -> Option<T> {
        self.entries.get(&version).copied()
    }

    /// First stamped snapshot strictly after `version`.
    pub fn first_after(&self, version: u64) -> Option<(u64, T)> {
        self.entries
            .range((Bound::Excluded(version), Bound::Unbounded))
            .next()
            .map(|(v, t)| (*v, *t))
    }

    pub fn latest(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamp `version`. Rejects anything at or before the latest stamp.
    pub fn record(&mut self, version: u64, value: T) -> Result<(), ProductError> {
        if let Some(latest) = self.latest() {
            if version <= latest {
                return Err(ProductError::StaleVersion { version, latest });
            }
        }
        self.entries.insert(version, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VersionedPosition
// ---------------------------------------------------------------------------

/// Global position history plus the global pending position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionedPosition {
    snapshots: VersionMap<Position>,
    pre: PrePosition,
}

impl VersionedPosition {
    pub fn position_at_version(&self, version: u64) -> Position {
        self.snapshots.at(version)
    }

    pub fn pre(&self) -> &PrePosition {
        &self.pre
    }

    /// Position at `latest_version` with the pending deltas applied.
    pub fn next(&self, latest_version: u64) -> Result<Position, ArithmeticError> {
        self.position_at_version(latest_version).next(&self.pre)
    }

    pub(crate) fn pre_mut(&mut self) -> &mut PrePosition {
        &mut self.pre
    }

    pub(crate) fn record(&mut self, version: u64, position: Position) -> Result<(), ProductError> {
        self.snapshots.record(version, position)
    }

    pub(crate) fn clear_pre(&mut self) {
        self.pre = PrePosition::default();
    }
}

// ---------------------------------------------------------------------------
// VersionedAccumulator
// ---------------------------------------------------------------------------

/// Cumulative per-unit value and share, stamped at each settled version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionedAccumulator {
    value: VersionMap<Accumulator>,
    share: VersionMap<Accumulator>,
    latest_version: u64,
}

impl VersionedAccumulator {
    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    pub fn value_at_version(&self, version: u64) -> Accumulator {
        self.value.at(version)
    }

    pub fn share_at_version(&self, version: u64) -> Accumulator {
        self.share.at(version)
    }

    /// First stamped value strictly after `version`.
    pub fn value_after(&self, version: u64) -> Option<(u64, Accumulator)> {
        self.value.first_after(version)
    }

    pub(crate) fn record(
        &mut self,
        version: u64,
        value: Accumulator,
        share: Accumulator,
    ) -> Result<(), ProductError> {
        self.value.record(version, value)?;
        self.share.record(version, share)?;
        self.latest_version = version;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Interval accrual
// ---------------------------------------------------------------------------

/// Product parameters that drive accrual over a hop.
#[derive(Copy, Clone, Debug)]
pub struct AccrualParams {
    pub closed: bool,
    pub curve: JumpRateCurve,
    /// Effective funding fee: `max(funding_fee, min_funding_fee)`.
    pub funding_fee: UFixed18,
}

/// Per-unit increments and protocol fee accrued over one hop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Interval {
    pub value: Accumulator,
    pub share: Accumulator,
    pub fee: UFixed18,
}

/// Accrue funding, position PnL and share from `from` to `to` for a global
/// `position` held over the whole hop.
pub fn accumulate_interval(
    params: &AccrualParams,
    position: Position,
    from: &OracleVersion,
    to: &OracleVersion,
) -> Result<Interval, ArithmeticError> {
    let elapsed = to
        .timestamp
        .checked_sub(from.timestamp)
        .ok_or(ArithmeticError::Underflow)?;

    let (funding, fee) = accumulate_funding(params, position, from, elapsed)?;
    let pnl = accumulate_position(params, position, from, to)?;
    let share = accumulate_share(position, elapsed)?;

    Ok(Interval {
        value: funding.try_add(&pnl)?,
        share,
        fee,
    })
}

/// Takers pay makers (or the reverse for a negative rate); the protocol
/// keeps `fee` out of the receiving side.
fn accumulate_funding(
    params: &AccrualParams,
    position: Position,
    from: &OracleVersion,
    elapsed: u64,
) -> Result<(Accumulator, UFixed18), ArithmeticError> {
    if params.closed || position.maker.is_zero() || position.taker.is_zero() {
        return Ok((Accumulator::ZERO, UFixed18::ZERO));
    }

    let taker_notional = Fixed18::from_unsigned(position.taker)?
        .try_mul(from.price)?
        .abs();
    let socialized_notional = taker_notional.try_mul(position.socialization_factor()?)?;
    let rate = params.curve.per_second(position.utilization())?;
    let funding = rate
        .try_mul(Fixed18::from_unsigned(UFixed18::from_int(elapsed))?)?
        .try_mul(Fixed18::from_unsigned(socialized_notional)?)?;

    let fee = funding.abs().try_mul(params.funding_fee)?;
    let net = Fixed18::from_sign(funding.signum(), funding.abs().try_sub(fee)?)?;
    let (maker_total, taker_total) = if funding.is_negative() {
        (funding, net)
    } else {
        (net, funding)
    };

    let maker = Fixed18::from_unsigned(position.maker)?;
    let taker = Fixed18::from_unsigned(position.taker)?;
    Ok((
        Accumulator {
            maker: maker_total.try_div_floor(maker)?,
            taker: taker_total.try_neg()?.try_div_floor(taker)?,
        },
        fee,
    ))
}

/// Price move applied to the (socialized) taker side; makers take the
/// opposite side.
fn accumulate_position(
    params: &AccrualParams,
    position: Position,
    from: &OracleVersion,
    to: &OracleVersion,
) -> Result<Accumulator, ArithmeticError> {
    if params.closed || position.maker.is_zero() || position.taker.is_zero() {
        return Ok(Accumulator::ZERO);
    }

    let price_delta = to.price.try_sub(from.price)?;
    let taker_delta = price_delta
        .try_mul(Fixed18::from_unsigned(position.taker)?)?
        .try_mul(Fixed18::from_unsigned(position.socialization_factor()?)?)?;

    Ok(Accumulator {
        maker: taker_delta
            .try_neg()?
            .try_div_floor(Fixed18::from_unsigned(position.maker)?)?,
        taker: taker_delta.try_div_floor(Fixed18::from_unsigned(position.taker)?)?,
    })
}

/// Time-weighted share of the hop per unit of position.
fn accumulate_share(position: Position, elapsed: u64) -> Result<Accumulator, ArithmeticError> {
    let elapsed = UFixed18::from_int(elapsed);
    let per_unit = |size: UFixed18| -> Result<Fixed18, ArithmeticError> {
        if size.is_zero() {
            return Ok(Fixed18::ZERO);
        }
        Fixed18::from_unsigned(elapsed.try_div(size)?)
    };
    Ok(Accumulator {
        maker: per_unit(position.maker)?,
        taker: per_unit(position.taker)?,
    })
}

/// Settle the global pending position at `to`, starting from `position`.
///
/// Returns the settled position, the position fee, and whether the pending
/// position was consumed.
pub(crate) fn settle_pre(
    position: Position,
    pre: &PrePosition,
    to: &OracleVersion,
    maker_fee: UFixed18,
    taker_fee: UFixed18,
) -> Result<(Position, UFixed18, bool), ArithmeticError> {
    if !pre.can_settle(to) {
        return Ok((position, UFixed18::ZERO, false));
    }
    let fee = pre.compute_fee(to, maker_fee, taker_fee)?;
    Ok((position.next(pre)?, fee, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(n: u64) -> UFixed18 {
        UFixed18::from_int(n)
    }

    fn at(version: u64, timestamp: u64, price: i64) -> OracleVersion {
        OracleVersion {
            version,
            timestamp,
            price: Fixed18::from_int(price),
        }
    }

    fn flat_curve(annual: &str) -> JumpRateCurve {
        let rate: Fixed18 = annual.parse().unwrap();
        JumpRateCurve {
            minimum_rate: rate,
            maximum_rate: rate,
            target_rate: rate,
            target_utilization: "0.5".parse().unwrap(),
        }
    }

    fn params(annual: &str, fee: &str) -> AccrualParams {
        AccrualParams {
            closed: false,
            curve: flat_curve(annual),
            funding_fee: fee.parse().unwrap(),
        }
    }

    #[test]
    fn version_map_is_append_only() {
        let mut map = VersionMap::default();
        map.record(2, 20u64).unwrap();
        map.record(5, 50u64).unwrap();
        assert_eq!(
            map.record(5, 0),
            Err(ProductError::StaleVersion { version: 5, latest: 5 })
        );
        assert_eq!(map.at(3), 0);
        assert_eq!(map.first_after(2), Some((5, 50)));
        assert_eq!(map.first_after(5), None);
    }

    #[test]
    fn price_move_flows_from_makers_to_takers() {
        let p = params("0", "0");
        let position = Position::new(u(10), u(5));
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 0, 110)).unwrap();
        // Takers gain 10 per unit; makers lose 50 / 10 = 5 per unit.
        assert_eq!(interval.value.taker, Fixed18::from_int(10));
        assert_eq!(interval.value.maker, Fixed18::from_int(-5));
    }

    #[test]
    fn under_covered_takers_are_socialized() {
        let p = params("0", "0");
        let position = Position::new(u(5), u(10));
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 0, 110)).unwrap();
        // Only half the takers' exposure is backed.
        assert_eq!(interval.value.taker, Fixed18::from_int(5));
        assert_eq!(interval.value.maker, Fixed18::from_int(-10));
    }

    #[test]
    fn per_unit_debits_round_against_the_payer() {
        let p = params("0", "0");
        let position = Position::new(u(3), u(1));
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 0, 101)).unwrap();
        assert_eq!(interval.value.taker, Fixed18::ONE);
        assert_eq!(interval.value.maker.raw(), -333_333_333_333_333_334);

        // Makers together pay at least what takers receive.
        let makers = interval.value.maker.try_mul(Fixed18::from_int(3)).unwrap();
        assert!(makers.try_add(interval.value.taker).unwrap() <= Fixed18::ZERO);
    }

    #[test]
    fn funding_is_zero_sum_net_of_fee() {
        let p = params("3.1536", "0.1");
        let position = Position::new(u(10), u(10));
        // One year at 3.1536 / SECONDS_PER_YEAR per second over 1000s gives
        // 1e-4 of notional: 10 * 100 * 1e-4 = 0.1 total funding.
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 1000, 100)).unwrap();
        assert_eq!(interval.fee, "0.01".parse::<UFixed18>().unwrap());

        let maker_total = interval.value.maker.try_mul(Fixed18::from_int(10)).unwrap();
        let taker_total = interval.value.taker.try_mul(Fixed18::from_int(10)).unwrap();
        assert_eq!(maker_total, "0.09".parse::<Fixed18>().unwrap());
        assert_eq!(taker_total, "-0.1".parse::<Fixed18>().unwrap());
    }

    #[test]
    fn one_sided_market_accrues_nothing_but_share() {
        let p = params("1", "0");
        let position = Position::new(u(4), u(0));
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 8, 200)).unwrap();
        assert_eq!(interval.value, Accumulator::ZERO);
        assert_eq!(interval.fee, UFixed18::ZERO);
        assert_eq!(interval.share.maker, Fixed18::from_int(2));
        assert_eq!(interval.share.taker, Fixed18::ZERO);
    }

    #[test]
    fn closed_product_freezes_value() {
        let p = AccrualParams {
            closed: true,
            ..params("1", "0")
        };
        let position = Position::new(u(10), u(10));
        let interval = accumulate_interval(&p, position, &at(1, 0, 100), &at(2, 100, 200)).unwrap();
        assert_eq!(interval.value, Accumulator::ZERO);
    }

    #[test]
    fn timestamp_regression_is_fatal() {
        let p = params("0", "0");
        let err = accumulate_interval(&p, Position::ZERO, &at(1, 10, 1), &at(2, 5, 1)).unwrap_err();
        assert_eq!(err, ArithmeticError::Underflow);
    }
}
