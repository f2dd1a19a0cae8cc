//! Scenario: a liquidated leg freezes the vault until the liquidation
//! settles, after which the vault rebalances and reopens.
//!
//! # Invariants under test
//!
//! 1. While a leg is liquidatable, deposits and redemptions are rejected and
//!    the rejected call leaves no trace.
//! 2. While a leg is being liquidated, deposits are still rejected.
//! 3. Once the forced close settles, the next sync moves collateral back
//!    into the liquidated leg and resizes both legs to the same target.
//! 4. Deposits are accepted again afterwards.

use perp_testkit::harness::{price, units};
use perp_testkit::{Harness, HarnessConfig};
use perp_types::{Account, UFixed18};
use perp_vault::{Leg, VaultError};

struct Setup {
    h: Harness,
    user: Account,
    keeper: Account,
}

/// Vault fully deposited at 2000 with a taker long 100 against its long
/// leg, then the price jumps to 2400.
fn stressed() -> Setup {
    let mut h = Harness::new(HarnessConfig::default().without_funding()).unwrap();
    let (user, taker) = (Account::new("user"), Account::new("taker"));

    h.deposit(&user, units(100_000)).unwrap();
    h.advance(price(2_000)).unwrap();
    h.sync().unwrap();
    assert_eq!(h.leg(Leg::Long).unwrap().position, units(100));
    assert_eq!(h.leg(Leg::Long).unwrap().collateral, units(50_000));

    h.open_taker(&taker, Leg::Long, units(50_000), units(100))
        .unwrap();
    h.advance(price(2_000)).unwrap();
    h.sync().unwrap();
    h.advance(price(2_400)).unwrap();

    Setup {
        h,
        user,
        keeper: Account::new("keeper"),
    }
}

#[test]
fn liquidatable_leg_blocks_deposits_and_redemptions() {
    let Setup { mut h, user, .. } = stressed();
    let before = h.snapshot().unwrap();

    assert_eq!(
        h.deposit(&user, units(1)).unwrap_err(),
        VaultError::DepositLimitExceeded {
            assets: units(1),
            max: UFixed18::ZERO
        }
    );
    assert_eq!(
        h.redeem(&user, units(1)).unwrap_err(),
        VaultError::RedemptionLimitExceeded {
            shares: units(1),
            max: UFixed18::ZERO
        }
    );
    assert_eq!(h.snapshot().unwrap(), before);
    assert_eq!(h.vault.latest_version(), 3);

    // Settling the leg exposes the loss: 50000 - 400 * 100.
    h.settle_leg(Leg::Long).unwrap();
    assert_eq!(h.leg(Leg::Long).unwrap().collateral, units(10_000));
    let vault = h.vault_account().clone();
    assert!(h.protocol.liquidatable(&vault, h.product(Leg::Long)).unwrap());
    assert!(h.vault.is_unhealthy(&h.protocol).unwrap());
    assert_eq!(h.vault.max_deposit(&h.protocol).unwrap(), UFixed18::ZERO);
    assert_eq!(h.vault.max_redeem(&h.protocol, &user).unwrap(), UFixed18::ZERO);
}

#[test]
fn vault_recovers_after_liquidation_settles() {
    let Setup {
        mut h,
        user,
        keeper,
    } = stressed();

    // min(10000, max(24000, 5000) * 0.5)
    let fee = h.liquidate_vault(Leg::Long, &keeper).unwrap();
    assert_eq!(fee, units(10_000));
    let long = h.leg(Leg::Long).unwrap();
    assert!(long.liquidating);
    assert_eq!(long.collateral, UFixed18::ZERO);
    assert_eq!(long.position, UFixed18::ZERO);

    assert!(matches!(
        h.deposit(&user, units(1)),
        Err(VaultError::DepositLimitExceeded { .. })
    ));

    h.advance(price(2_400)).unwrap();
    h.sync().unwrap();

    let long = h.leg(Leg::Long).unwrap();
    let short = h.leg(Leg::Short).unwrap();
    assert!(!long.liquidating);
    assert_eq!(long.collateral, units(25_000));
    assert_eq!(short.collateral, units(25_000));
    assert!(!long.position.is_zero());
    assert_eq!(long.position, short.position);
    assert_eq!(h.vault.total_assets(&h.protocol).unwrap(), units(50_000));
    assert!(!h.vault.is_insolvent());

    h.deposit(&user, units(1)).unwrap();
}
