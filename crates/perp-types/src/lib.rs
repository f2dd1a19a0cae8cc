//! perp-types
//!
//! Shared value types for the settlement engine:
//! - 18-decimal fixed-point numerics (`UFixed18`, `Fixed18`)
//! - identities (`Account`, `ProductId`)
//! - oracle versions, the provider trait, and a manual provider
//! - position, pending position and accumulator values
//!
//! Pure data and arithmetic. No IO, no logging.

mod account;
mod fixed;
mod oracle;
mod position;

pub use account::{Account, ProductId};
pub use fixed::{mul_div, mul_div_up, ArithmeticError, Fixed18, ParseFixedError, UFixed18, DECIMALS};
pub use oracle::{ManualOracle, OracleError, OracleProvider, OracleVersion, Payoff};
pub use position::{Accumulator, Position, PrePosition};
