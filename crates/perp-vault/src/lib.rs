//! Balanced two-leg maker vault over the perpetual engine.
//!
//! Depositors receive shares in a pool that makes equal maker markets on a
//! long and a short product. See [`vault`] for the accounting model.

mod checkpoint;
mod error;
mod leg;
pub mod vault;

pub use checkpoint::{Checkpoint, VersionContext};
pub use error::VaultError;
pub use leg::{Leg, Legs};
pub use vault::{BalancedVault, VaultParams};
