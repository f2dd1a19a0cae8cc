//! Error taxonomy for product and collateral operations.

use std::fmt;

use perp_types::{Account, ArithmeticError, ProductId, UFixed18};

// ---------------------------------------------------------------------------
// ProductError
// ---------------------------------------------------------------------------

/// Rejections raised by product operations. A rejected operation leaves the
/// product's pending and settled state unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError {
    /// Next global maker size would exceed the product's maker limit.
    MakerOverLimit { next: UFixed18, limit: UFixed18 },
    /// Makers would no longer cover takers.
    InsufficientLiquidity { socialization_factor: UFixed18 },
    /// Account would hold maker and taker exposure at once.
    DoubleSided,
    /// Close larger than the account's pending-adjusted position.
    OverClosed,
    /// Next-version maintenance would exceed the account's collateral.
    InsufficientCollateral { maintenance: UFixed18, collateral: UFixed18 },
    /// Account is being liquidated; its position is locked until the
    /// liquidation settles.
    InLiquidation,
    /// The oracle has not advanced past its genesis version.
    OracleBootstrapping,
    /// Product is closed to new exposure.
    Closed,
    /// Caller is not the protocol owner.
    Unauthorized { caller: Account },
    UnknownProduct(ProductId),
    /// Oracle has not published the requested version.
    UnknownVersion(u64),
    /// Attempt to write a version snapshot at or before the latest one.
    StaleVersion { version: u64, latest: u64 },
    Arithmetic(ArithmeticError),
}

impl fmt::Display for ProductError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MakerOverLimit { next, limit } => {
                write!(f, "maker position {next} exceeds limit {limit}")
            }
            Self::InsufficientLiquidity {
                socialization_factor,
            } => write!(
                f,
                "insufficient maker liquidity (socialization factor {socialization_factor})"
            ),
            Self::DoubleSided => write!(f, "account cannot be both maker and taker"),
            Self::OverClosed => write!(f, "close exceeds open position"),
            Self::InsufficientCollateral {
                maintenance,
                collateral,
            } => write!(
                f,
                "maintenance {maintenance} exceeds collateral {collateral}"
            ),
            Self::InLiquidation => write!(f, "account is in liquidation"),
            Self::OracleBootstrapping => write!(f, "oracle is still at its genesis version"),
            Self::Closed => write!(f, "product is closed"),
            Self::Unauthorized { caller } => write!(f, "{caller} is not the protocol owner"),
            Self::UnknownProduct(id) => write!(f, "unknown product {id}"),
            Self::UnknownVersion(v) => write!(f, "oracle version {v} is not published"),
            Self::StaleVersion { version, latest } => {
                write!(f, "version {version} is not after latest {latest}")
            }
            Self::Arithmetic(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ProductError {}

impl From<ArithmeticError> for ProductError {
    fn from(e: ArithmeticError) -> Self {
        ProductError::Arithmetic(e)
    }
}

// ---------------------------------------------------------------------------
// CollateralError
// ---------------------------------------------------------------------------

/// Rejections raised by collateral operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollateralError {
    /// Balance would land strictly between zero and the minimum collateral.
    UnderLimit { balance: UFixed18, min: UFixed18 },
    /// Withdrawal would leave the account liquidatable at the next version.
    InsufficientCollateral,
    /// Withdrawal or fee claim larger than the available balance.
    InsufficientBalance { requested: UFixed18, available: UFixed18 },
    /// Account is not below maintenance.
    CantLiquidate { maintenance: UFixed18, collateral: UFixed18 },
    AccountLiquidating,
    ZeroAddress,
    Product(ProductError),
}

impl fmt::Display for CollateralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnderLimit { balance, min } => {
                write!(f, "collateral {balance} is below minimum {min}")
            }
            Self::InsufficientCollateral => {
                write!(f, "withdrawal would leave the account liquidatable")
            }
            Self::InsufficientBalance {
                requested,
                available,
            } => write!(f, "requested {requested} but only {available} available"),
            Self::CantLiquidate {
                maintenance,
                collateral,
            } => write!(
                f,
                "cannot liquidate: collateral {collateral} covers maintenance {maintenance}"
            ),
            Self::AccountLiquidating => write!(f, "account is already being liquidated"),
            Self::ZeroAddress => write!(f, "zero address"),
            Self::Product(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CollateralError {}

impl From<ProductError> for CollateralError {
    fn from(e: ProductError) -> Self {
        CollateralError::Product(e)
    }
}

impl From<ArithmeticError> for CollateralError {
    fn from(e: ArithmeticError) -> Self {
        CollateralError::Product(ProductError::Arithmetic(e))
    }
}
