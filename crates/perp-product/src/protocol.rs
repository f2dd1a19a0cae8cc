//! Protocol controller: owns every product and the collateral ledger.
//!
//! Product operations borrow a product and the ledger as disjoint fields of
//! the controller, so a settlement can never re-enter another operation on
//! the same state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use perp_types::{Account, OracleProvider, OracleVersion, ProductId, UFixed18};

use crate::collateral::Collateral;
use crate::error::ProductError;
use crate::product::{Product, ProductParams};

/// Protocol-wide parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub owner: Account,
    /// Receives the protocol's share of fees.
    pub treasury: Account,
    /// Fraction of product fees kept by the protocol treasury.
    pub protocol_fee: UFixed18,
    /// Floor on every product's funding fee.
    pub min_funding_fee: UFixed18,
    /// Fraction of `max(maintenance, min_collateral)` paid to liquidators.
    pub liquidation_fee: UFixed18,
    /// Smallest non-zero collateral balance per account and product.
    pub min_collateral: UFixed18,
}

#[derive(Clone, Debug)]
pub struct Protocol {
    params: ProtocolParams,
    collateral: Collateral,
    products: BTreeMap<ProductId, Product>,
    next_id: u32,
}

impl Protocol {
    pub fn new(params: ProtocolParams) -> Self {
        let collateral = Collateral::new(params.treasury.clone(), params.protocol_fee);
        Protocol {
            params,
            collateral,
            products: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn collateral_ledger(&self) -> &Collateral {
        &self.collateral
    }

    pub(crate) fn collateral_mut(&mut self) -> &mut Collateral {
        &mut self.collateral
    }

    pub fn product(&self, id: ProductId) -> Result<&Product, ProductError> {
        self.products.get(&id).ok_or(ProductError::UnknownProduct(id))
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// A product and the ledger, borrowed together.
    pub(crate) fn split(
        &mut self,
        id: ProductId,
    ) -> Result<(&mut Product, &mut Collateral, UFixed18), ProductError> {
        let product = self
            .products
            .get_mut(&id)
            .ok_or(ProductError::UnknownProduct(id))?;
        Ok((product, &mut self.collateral, self.params.min_funding_fee))
    }

    /// Run `op` against product `id` and the ledger. On error both are put
    /// back as they were, including any settlement `op` forced.
    pub(crate) fn transact<T, E>(
        &mut self,
        id: ProductId,
        op: impl FnOnce(&mut Product, &mut Collateral, &ProtocolParams) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProductError> + fmt::Display,
    {
        let product = self
            .products
            .get_mut(&id)
            .ok_or(ProductError::UnknownProduct(id))?;
        let snapshot = (product.clone(), self.collateral.clone());
        match op(&mut *product, &mut self.collateral, &self.params) {
            Ok(out) => Ok(out),
            Err(e) => {
                (*product, self.collateral) = snapshot;
                debug!(product = %id, error = %e, "operation reverted");
                Err(e)
            }
        }
    }

    fn authorize(&self, caller: &Account) -> Result<(), ProductError> {
        if *caller != self.params.owner {
            return Err(ProductError::Unauthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Owner operations
    // -----------------------------------------------------------------------

    pub fn update_params(&mut self, caller: &Account, params: ProtocolParams) -> Result<(), ProductError> {
        self.authorize(caller)?;
        self.collateral
            .set_fee_split(params.treasury.clone(), params.protocol_fee);
        self.params = params;
        info!("protocol parameters updated");
        Ok(())
    }

    /// Register a product. Its fees go to `treasury`, or to the protocol
    /// treasury when `None`.
    pub fn create_product(
        &mut self,
        caller: &Account,
        params: ProductParams,
        treasury: Option<Account>,
        oracle: Arc<dyn OracleProvider>,
    ) -> Result<ProductId, ProductError> {
        self.authorize(caller)?;
        let id = ProductId(self.next_id);
        self.next_id += 1;

        let treasury = treasury.unwrap_or_else(|| self.params.treasury.clone());
        self.collateral.register(id, treasury);
        info!(product = %id, name = %params.name, payoff = ?params.payoff, "product created");
        self.products.insert(id, Product::new(id, params, oracle));
        Ok(id)
    }

    pub fn update_product_params(
        &mut self,
        caller: &Account,
        id: ProductId,
        params: ProductParams,
    ) -> Result<(), ProductError> {
        self.authorize(caller)?;
        let (product, collateral, min_funding_fee) = self.split(id)?;
        product.update_params(params, collateral, min_funding_fee)?;
        info!(product = %id, "product parameters updated");
        Ok(())
    }

    pub fn update_product_closed(
        &mut self,
        caller: &Account,
        id: ProductId,
        closed: bool,
    ) -> Result<(), ProductError> {
        self.authorize(caller)?;
        let (product, collateral, min_funding_fee) = self.split(id)?;
        product.update_closed(closed, collateral, min_funding_fee)?;
        info!(product = %id, closed, "product closed flag updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Product operations
    // -----------------------------------------------------------------------

    pub fn settle(&mut self, id: ProductId) -> Result<OracleVersion, ProductError> {
        let (product, collateral, min_funding_fee) = self.split(id)?;
        product.settle(collateral, min_funding_fee)
    }

    pub fn settle_account(&mut self, id: ProductId, account: &Account) -> Result<OracleVersion, ProductError> {
        let (product, collateral, min_funding_fee) = self.split(id)?;
        product.settle_account(account, collateral, min_funding_fee)
    }

    pub fn open_take(&mut self, id: ProductId, account: &Account, amount: UFixed18) -> Result<(), ProductError> {
        self.transact(id, |product, collateral, params| {
            product.open_take(account, amount, collateral, params.min_funding_fee)
        })
    }

    pub fn close_take(&mut self, id: ProductId, account: &Account, amount: UFixed18) -> Result<(), ProductError> {
        self.transact(id, |product, collateral, params| {
            product.close_take(account, amount, collateral, params.min_funding_fee)
        })
    }

    pub fn open_make(&mut self, id: ProductId, account: &Account, amount: UFixed18) -> Result<(), ProductError> {
        self.transact(id, |product, collateral, params| {
            product.open_make(account, amount, collateral, params.min_funding_fee)
        })
    }

    pub fn close_make(&mut self, id: ProductId, account: &Account, amount: UFixed18) -> Result<(), ProductError> {
        self.transact(id, |product, collateral, params| {
            product.close_make(account, amount, collateral, params.min_funding_fee)
        })
    }
}
