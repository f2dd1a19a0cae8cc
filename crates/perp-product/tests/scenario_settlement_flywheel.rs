//! Scenario: two-hop settlement flywheel.
//!
//! # Invariants under test
//!
//! 1. Idempotence: settling again at the same oracle version changes nothing.
//! 2. Version monotonicity: stamps are only ever appended; earlier stamps
//!    never change once written.
//! 3. Two hops: a position queued at version v settles at exactly v+1, even
//!    when the oracle is several versions ahead, and its fee is priced at v+1.
//! 4. Conservation: account value changes plus protocol fees sum to zero, up
//!    to per-unit rounding dust.

use std::sync::Arc;

use perp_product::{JumpRateCurve, ProductParams, Protocol, ProtocolParams};
use perp_types::{Account, Fixed18, ManualOracle, Payoff, ProductId, UFixed18};

const HOUR: u64 = 3600;

fn dec(s: &str) -> UFixed18 {
    s.parse().unwrap()
}

fn px(n: i64) -> Fixed18 {
    Fixed18::from_int(n)
}

struct Fixture {
    protocol: Protocol,
    oracle: Arc<ManualOracle>,
    clock: u64,
    id: ProductId,
    maker: Account,
    taker: Account,
    treasury: Account,
}

impl Fixture {
    fn new(market: ProductParams, min_funding_fee: UFixed18) -> Self {
        let owner = Account::new("owner");
        let treasury = Account::new("treasury");
        let mut protocol = Protocol::new(ProtocolParams {
            owner: owner.clone(),
            treasury: treasury.clone(),
            protocol_fee: dec("0.5"),
            min_funding_fee,
            liquidation_fee: dec("0.5"),
            min_collateral: UFixed18::from_int(100),
        });
        let oracle = Arc::new(ManualOracle::new(px(100), 0));
        let id = protocol
            .create_product(&owner, market, None, oracle.clone())
            .unwrap();
        let mut f = Fixture {
            protocol,
            oracle,
            clock: 0,
            id,
            maker: Account::new("maker"),
            taker: Account::new("taker"),
            treasury,
        };
        f.advance(100);
        f.protocol.settle(id).unwrap();
        f
    }

    fn advance(&mut self, price: i64) {
        self.clock += HOUR;
        self.oracle.advance(px(price), self.clock).unwrap();
    }

    fn collateral(&self, account: &Account) -> UFixed18 {
        self.protocol.collateral(account, self.id)
    }

    fn open_book(&mut self, maker_size: u64, taker_size: u64) {
        let (id, maker, taker) = (self.id, self.maker.clone(), self.taker.clone());
        self.protocol
            .deposit_to(&maker, id, UFixed18::from_int(10_000))
            .unwrap();
        self.protocol
            .deposit_to(&taker, id, UFixed18::from_int(10_000))
            .unwrap();
        self.protocol
            .open_make(id, &maker, UFixed18::from_int(maker_size))
            .unwrap();
        self.protocol
            .open_take(id, &taker, UFixed18::from_int(taker_size))
            .unwrap();
    }

    fn settle_all(&mut self) {
        let (id, maker, taker) = (self.id, self.maker.clone(), self.taker.clone());
        self.protocol.settle_account(id, &maker).unwrap();
        self.protocol.settle_account(id, &taker).unwrap();
    }
}

fn market(curve: JumpRateCurve, maker_fee: &str, taker_fee: &str) -> ProductParams {
    ProductParams {
        name: "ETH".to_string(),
        payoff: Payoff::Long,
        maintenance: dec("0.3"),
        funding_fee: dec("0.1"),
        maker_fee: dec(maker_fee),
        taker_fee: dec(taker_fee),
        maker_limit: UFixed18::from_int(1_000),
        utilization_curve: curve,
    }
}

fn live_curve() -> JumpRateCurve {
    JumpRateCurve {
        minimum_rate: Fixed18::ZERO,
        maximum_rate: Fixed18::ONE,
        target_rate: "0.1".parse().unwrap(),
        target_utilization: dec("0.8"),
    }
}

#[test]
fn settling_twice_at_same_version_is_a_no_op() {
    let mut f = Fixture::new(market(live_curve(), "0.001", "0.002"), UFixed18::ZERO);
    f.open_book(10, 5);
    f.advance(100);
    f.advance(110);
    f.settle_all();

    let id = f.id;
    let before_maker = f.collateral(&f.maker);
    let before_taker = f.collateral(&f.taker);
    let before_fees = f.protocol.fees(&f.treasury);
    let product = f.protocol.product(id).unwrap();
    let before_value = product.value_at_version(product.latest_version());
    let before_version = product.latest_version();

    f.protocol.settle(id).unwrap();
    f.settle_all();

    let product = f.protocol.product(id).unwrap();
    assert_eq!(product.latest_version(), before_version);
    assert_eq!(product.value_at_version(before_version), before_value);
    assert_eq!(f.collateral(&f.maker), before_maker);
    assert_eq!(f.collateral(&f.taker), before_taker);
    assert_eq!(f.protocol.fees(&f.treasury), before_fees);
}

#[test]
fn stamps_are_append_only() {
    let mut f = Fixture::new(market(live_curve(), "0", "0"), UFixed18::ZERO);
    f.open_book(10, 5);
    f.advance(105);
    f.protocol.settle(f.id).unwrap();

    let product = f.protocol.product(f.id).unwrap();
    let v = product.latest_version();
    let value = product.value_at_version(v);
    let position = product.position_at_version(v);

    for price in [120, 90, 100] {
        f.advance(price);
        let before = f.protocol.product(f.id).unwrap().latest_version();
        f.protocol.settle(f.id).unwrap();
        let after = f.protocol.product(f.id).unwrap().latest_version();
        assert!(after > before, "latest version must advance");
    }

    let product = f.protocol.product(f.id).unwrap();
    assert_eq!(product.value_at_version(v), value);
    assert_eq!(product.position_at_version(v), position);
}

#[test]
fn pending_position_settles_at_the_next_version_not_the_current_one() {
    let mut f = Fixture::new(market(JumpRateCurve::default(), "0.001", "0.002"), UFixed18::ZERO);
    f.open_book(10, 5);
    let queued_at = f.protocol.product(f.id).unwrap().latest_version();

    f.advance(120);
    f.advance(130);
    f.advance(140);
    f.protocol.settle(f.id).unwrap();

    let product = f.protocol.product(f.id).unwrap();
    let current = queued_at + 3;
    assert_eq!(product.latest_version(), current);
    assert_eq!(product.value_after(queued_at).map(|(v, _)| v), Some(queued_at + 1));
    assert_eq!(product.value_after(queued_at + 1).map(|(v, _)| v), Some(current));

    let settled = product.position_at_version(queued_at + 1);
    assert_eq!(settled.maker, UFixed18::from_int(10));
    assert_eq!(settled.taker, UFixed18::from_int(5));
    assert!(product.global_pre().is_empty());

    // Position fees priced at v+1 (120): 10 * 0.001 * 120 + 5 * 0.002 * 120.
    assert_eq!(f.protocol.fees(&f.treasury), dec("2.4"));

    // Taker PnL runs from 120 to 140 only; the 100 -> 120 move predates the
    // position.
    f.settle_all();
    let taker_collateral = f.collateral(&f.taker);
    // 10_000 - fee 1.2 + 5 * 20
    assert_eq!(taker_collateral, dec("10098.8"));
}

#[test]
fn value_is_conserved_across_accounts_and_fees() {
    let mut f = Fixture::new(market(live_curve(), "0.001", "0.002"), dec("0.05"));
    f.open_book(10, 5);
    let start = f.collateral(&f.maker).try_add(f.collateral(&f.taker)).unwrap();

    f.advance(100);
    f.advance(137);
    f.advance(91);
    f.settle_all();

    let end = f
        .collateral(&f.maker)
        .try_add(f.collateral(&f.taker))
        .unwrap()
        .try_add(f.protocol.fees(&f.treasury))
        .unwrap();

    let dust = start.raw().abs_diff(end.raw());
    assert!(dust <= 1_000, "conservation violated by {dust} raw units");
    assert!(
        !f.protocol.fees(&f.treasury).is_zero(),
        "funding and position fees must accrue"
    );
}

#[test]
fn new_account_joining_late_owes_nothing_for_the_past() {
    let mut f = Fixture::new(market(live_curve(), "0", "0"), UFixed18::ZERO);
    f.open_book(10, 5);
    f.advance(150);
    f.advance(80);
    f.protocol.settle(f.id).unwrap();

    let late = Account::new("late");
    f.protocol
        .deposit_to(&late, f.id, UFixed18::from_int(1_000))
        .unwrap();
    f.advance(80);
    f.protocol.settle_account(f.id, &late).unwrap();
    assert_eq!(f.collateral(&late), UFixed18::from_int(1_000));
    assert_eq!(
        f.protocol.product(f.id).unwrap().latest_version_of(&late),
        f.protocol.product(f.id).unwrap().latest_version()
    );
}
