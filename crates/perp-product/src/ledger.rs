//! The seam between product settlement and the collateral ledger.

use perp_types::{Account, ArithmeticError, Fixed18, ProductId, UFixed18};

/// What a product needs from the collateral ledger while settling.
///
/// Products never move collateral themselves: they report per-account value
/// changes and accrued protocol fees, and read balances for maintenance
/// checks.
pub trait CollateralLedger {
    /// Apply a signed value change to an account's collateral in `product`.
    /// Losses beyond the balance become product shortfall.
    fn settle_account(
        &mut self,
        product: ProductId,
        account: &Account,
        amount: Fixed18,
    ) -> Result<(), ArithmeticError>;

    /// Credit fees accrued by `product` during a global settlement.
    fn settle_product(&mut self, product: ProductId, fee: UFixed18) -> Result<(), ArithmeticError>;

    /// Collateral `account` holds in `product`.
    fn collateral(&self, account: &Account, product: ProductId) -> UFixed18;
}
