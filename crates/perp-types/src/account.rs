//! Identities: accounts and product handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An account identity (trader, vault, treasury, liquidator).
///
/// The empty string is the zero address and is rejected wherever an
/// operation credits or debits collateral.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Account(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the zero address.
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Account {
    fn from(id: &str) -> Self {
        Account::new(id)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a product registered with the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub u32);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "product#{}", self.0)
    }
}
