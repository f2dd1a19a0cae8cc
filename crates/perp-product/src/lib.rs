//! perp-product
//!
//! Perpetual markets and their collateral:
//! - versioned global positions and accumulators (append-only by version)
//! - the two-hop settlement flywheel, global and per account
//! - funding from a jump-rate utilization curve, position PnL, share
//! - position invariants as an ordered validator pipeline
//! - collateral ledger with shortfall, fees and liquidation
//! - the protocol controller that owns products and collateral
//!
//! Deterministic and in-memory. The only external input is each product's
//! oracle provider.

mod account;
mod collateral;
mod curve;
mod error;
pub mod invariant;
mod ledger;
mod product;
mod protocol;
mod versioned;

pub use account::{AccountAccumulator, AccountPosition, AccountState};
pub use collateral::{Collateral, LiquidationToken, OptimisticLedger};
pub use curve::{JumpRateCurve, SECONDS_PER_YEAR};
pub use error::{CollateralError, ProductError};
pub use ledger::CollateralLedger;
pub use product::{Product, ProductParams};
pub use protocol::{Protocol, ProtocolParams};
pub use versioned::{accumulate_interval, AccrualParams, Interval, VersionMap, VersionedAccumulator, VersionedPosition};
