use std::fmt;

use perp_product::{CollateralError, ProductError};
use perp_types::{ArithmeticError, UFixed18};

/// Rejections raised by vault operations. A rejected operation leaves the
/// vault and the protocol exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    DepositLimitExceeded { assets: UFixed18, max: UFixed18 },
    RedemptionLimitExceeded { shares: UFixed18, max: UFixed18 },
    Protocol(CollateralError),
    Arithmetic(ArithmeticError),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepositLimitExceeded { assets, max } => {
                write!(f, "deposit of {assets} exceeds limit {max}")
            }
            Self::RedemptionLimitExceeded { shares, max } => {
                write!(f, "redemption of {shares} shares exceeds limit {max}")
            }
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Arithmetic(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<CollateralError> for VaultError {
    fn from(e: CollateralError) -> Self {
        VaultError::Protocol(e)
    }
}

impl From<ProductError> for VaultError {
    fn from(e: ProductError) -> Self {
        VaultError::Protocol(CollateralError::Product(e))
    }
}

impl From<ArithmeticError> for VaultError {
    fn from(e: ArithmeticError) -> Self {
        VaultError::Arithmetic(e)
    }
}
