//! Position invariants as an explicit validator pipeline.
//!
//! Every position-changing operation builds a [`Projection`] of the state it
//! would produce and runs the validators registered for that operation, in
//! order. The first failing validator's error is returned and nothing is
//! committed.
//!
//! | Operation   | Validators                                                   |
//! |-------------|--------------------------------------------------------------|
//! | open_take   | lock, open, taker coverage, single-sided, maintenance         |
//! | close_take  | lock, over-close                                              |
//! | open_make   | lock, bootstrap, open, maker limit, single-sided, maintenance |
//! | close_make  | lock, over-close, taker coverage                              |

use perp_types::{Position, UFixed18};

use crate::account::AccountPosition;
use crate::error::ProductError;

/// Position-changing operations subject to validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    OpenTake,
    CloseTake,
    OpenMake,
    CloseMake,
}

/// State an operation would produce, as seen by the validators.
#[derive(Clone, Debug)]
pub struct Projection {
    pub operation: Operation,
    pub latest_version: u64,
    pub product_closed: bool,
    pub maker_limit: UFixed18,
    /// Global pending-adjusted position after the operation.
    pub global_next: Position,
    /// Account state with the operation applied to its pending position.
    pub account: AccountPosition,
    /// Maintenance required by the account's next position.
    pub maintenance_next: UFixed18,
    pub collateral: UFixed18,
}

pub type Validator = fn(&Projection) -> Result<(), ProductError>;

const OPEN_TAKE: &[Validator] = &[
    liquidation_lock,
    product_open,
    taker_covered,
    single_sided,
    maintained,
];
const CLOSE_TAKE: &[Validator] = &[liquidation_lock, not_over_closed];
const OPEN_MAKE: &[Validator] = &[
    liquidation_lock,
    oracle_bootstrapped,
    product_open,
    maker_within_limit,
    single_sided,
    maintained,
];
const CLOSE_MAKE: &[Validator] = &[liquidation_lock, not_over_closed, taker_covered];

pub fn pipeline(operation: Operation) -> &'static [Validator] {
    match operation {
        Operation::OpenTake => OPEN_TAKE,
        Operation::CloseTake => CLOSE_TAKE,
        Operation::OpenMake => OPEN_MAKE,
        Operation::CloseMake => CLOSE_MAKE,
    }
}

pub fn validate(projection: &Projection) -> Result<(), ProductError> {
    for validator in pipeline(projection.operation) {
        validator(projection)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

fn liquidation_lock(p: &Projection) -> Result<(), ProductError> {
    if p.account.liquidating {
        return Err(ProductError::InLiquidation);
    }
    Ok(())
}

fn oracle_bootstrapped(p: &Projection) -> Result<(), ProductError> {
    if p.latest_version == 0 {
        return Err(ProductError::OracleBootstrapping);
    }
    Ok(())
}

fn product_open(p: &Projection) -> Result<(), ProductError> {
    if p.product_closed {
        return Err(ProductError::Closed);
    }
    Ok(())
}

fn not_over_closed(p: &Projection) -> Result<(), ProductError> {
    if p.account.is_over_closed()? {
        return Err(ProductError::OverClosed);
    }
    Ok(())
}

fn maker_within_limit(p: &Projection) -> Result<(), ProductError> {
    if p.global_next.maker > p.maker_limit {
        return Err(ProductError::MakerOverLimit {
            next: p.global_next.maker,
            limit: p.maker_limit,
        });
    }
    Ok(())
}

/// Takers stay fully backed. Skipped on a closed product so that exposure
/// can always be wound down.
fn taker_covered(p: &Projection) -> Result<(), ProductError> {
    if p.product_closed {
        return Ok(());
    }
    let socialization_factor = p.global_next.socialization_factor()?;
    if socialization_factor < UFixed18::ONE {
        return Err(ProductError::InsufficientLiquidity {
            socialization_factor,
        });
    }
    Ok(())
}

fn single_sided(p: &Projection) -> Result<(), ProductError> {
    if p.account.is_double_sided()? {
        return Err(ProductError::DoubleSided);
    }
    Ok(())
}

fn maintained(p: &Projection) -> Result<(), ProductError> {
    if p.maintenance_next > p.collateral {
        return Err(ProductError::InsufficientCollateral {
            maintenance: p.maintenance_next,
            collateral: p.collateral,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_types::PrePosition;

    fn u(n: u64) -> UFixed18 {
        UFixed18::from_int(n)
    }

    fn projection(operation: Operation) -> Projection {
        Projection {
            operation,
            latest_version: 1,
            product_closed: false,
            maker_limit: u(100),
            global_next: Position::new(u(10), u(5)),
            account: AccountPosition::default(),
            maintenance_next: UFixed18::ZERO,
            collateral: u(1000),
        }
    }

    #[test]
    fn lock_runs_first() {
        let mut p = projection(Operation::OpenMake);
        p.account.liquidating = true;
        p.latest_version = 0;
        assert_eq!(validate(&p), Err(ProductError::InLiquidation));
    }

    #[test]
    fn bootstrap_blocks_only_makers() {
        let mut p = projection(Operation::OpenMake);
        p.latest_version = 0;
        assert_eq!(validate(&p), Err(ProductError::OracleBootstrapping));
        p.operation = Operation::OpenTake;
        assert_eq!(validate(&p), Ok(()));
    }

    #[test]
    fn maker_limit_is_inclusive() {
        let mut p = projection(Operation::OpenMake);
        p.global_next.maker = u(100);
        assert_eq!(validate(&p), Ok(()));
        p.global_next.maker = u(101);
        assert!(matches!(validate(&p), Err(ProductError::MakerOverLimit { .. })));
    }

    #[test]
    fn taker_coverage_applies_to_open_take_and_close_make() {
        for op in [Operation::OpenTake, Operation::CloseMake] {
            let mut p = projection(op);
            p.global_next = Position::new(u(4), u(5));
            assert!(matches!(
                validate(&p),
                Err(ProductError::InsufficientLiquidity { .. })
            ));
            p.product_closed = true;
            if op == Operation::CloseMake {
                assert_eq!(validate(&p), Ok(()));
            }
        }
    }

    #[test]
    fn over_close_detected_from_pending_deltas() {
        let mut p = projection(Operation::CloseTake);
        p.account.position = Position::new(u(0), u(1));
        let mut pre = PrePosition::default();
        pre.close_take(1, u(2)).unwrap();
        p.account.pre = pre;
        assert_eq!(validate(&p), Err(ProductError::OverClosed));
    }

    #[test]
    fn double_sided_rejected() {
        let mut p = projection(Operation::OpenTake);
        p.account.position = Position::new(u(1), u(0));
        let mut pre = PrePosition::default();
        pre.open_take(1, u(1)).unwrap();
        p.account.pre = pre;
        assert_eq!(validate(&p), Err(ProductError::DoubleSided));
    }

    #[test]
    fn maintenance_equal_to_collateral_passes() {
        let mut p = projection(Operation::OpenTake);
        p.maintenance_next = u(1000);
        assert_eq!(validate(&p), Ok(()));
        p.maintenance_next = u(1001);
        assert!(matches!(
            validate(&p),
            Err(ProductError::InsufficientCollateral { .. })
        ));
    }
}
