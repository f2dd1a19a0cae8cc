//! Per-version vault checkpoints and share/asset conversion.
//!
//! A checkpoint is recorded the first time the vault is touched in a new
//! oracle version. Deposits and redemptions queued in version `v` convert at
//! the rate implied by checkpoint `v` plus whatever the legs accrued between
//! `v` and their next settled version.

use serde::Serialize;

use perp_types::{ArithmeticError, UFixed18};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Vault maker position in the long leg, settled at this version.
    pub long_position: UFixed18,
    pub short_position: UFixed18,
    pub total_shares: UFixed18,
    /// Vault collateral in the long leg.
    pub long_assets: UFixed18,
    pub short_assets: UFixed18,
    /// Assets backing shares: collateral less unclaimed and pending deposits.
    pub total_assets: UFixed18,
}

/// A conversion rate pinned to a version.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionContext {
    pub version: u64,
    pub latest_assets: UFixed18,
    pub latest_shares: UFixed18,
}

impl VersionContext {
    /// Shares minted for `assets`; 1:1 while either side of the rate is
    /// empty.
    pub fn convert_to_shares(&self, assets: UFixed18) -> Result<UFixed18, ArithmeticError> {
        if self.latest_assets.is_zero() || self.latest_shares.is_zero() {
            return Ok(assets);
        }
        assets.try_muldiv(self.latest_shares, self.latest_assets)
    }

    /// Assets owed for `shares`; 1:1 while no shares exist.
    pub fn convert_to_assets(&self, shares: UFixed18) -> Result<UFixed18, ArithmeticError> {
        if self.latest_shares.is_zero() {
            return Ok(shares);
        }
        shares.try_muldiv(self.latest_assets, self.latest_shares)
    }
}
