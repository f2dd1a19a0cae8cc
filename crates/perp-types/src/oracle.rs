//! Oracle versions, the provider seam, and a manually driven provider.
//!
//! An oracle publishes a strictly increasing sequence of versions. Each
//! version carries a timestamp and a price; prices are only ever read
//! through a version number so that every settlement hop is priced by a
//! value that was fixed before the hop began.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::fixed::{ArithmeticError, Fixed18};

/// One published oracle observation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleVersion {
    pub version: u64,
    pub timestamp: u64,
    pub price: Fixed18,
}

/// Source of oracle versions for one product.
pub trait OracleProvider: Send + Sync + fmt::Debug {
    /// Advance to the newest available round (if any) and return the
    /// current version.
    fn sync(&self) -> OracleVersion;

    /// Current version without advancing.
    fn current_version(&self) -> OracleVersion;

    /// A past or current version; `None` for versions not yet published.
    fn at_version(&self, version: u64) -> Option<OracleVersion>;
}

// ---------------------------------------------------------------------------
// Payoff
// ---------------------------------------------------------------------------

/// Price transform applied by a product to its raw oracle feed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payoff {
    /// Takers are long the feed.
    #[default]
    Long,
    /// Takers are short the feed; the price is negated.
    Short,
}

impl Payoff {
    pub fn apply(self, version: OracleVersion) -> Result<OracleVersion, ArithmeticError> {
        let price = match self {
            Payoff::Long => version.price,
            Payoff::Short => version.price.try_neg()?,
        };
        Ok(OracleVersion { price, ..version })
    }
}

// ---------------------------------------------------------------------------
// ManualOracle
// ---------------------------------------------------------------------------

/// Rejected oracle round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OracleError {
    /// Round timestamp is earlier than the last accepted one.
    TimestampRegression { last: u64, got: u64 },
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::TimestampRegression { last, got } => {
                write!(f, "oracle round timestamp {got} precedes last round {last}")
            }
        }
    }
}

impl std::error::Error for OracleError {}

#[derive(Debug)]
struct ManualState {
    history: Vec<OracleVersion>,
    staged: Option<(Fixed18, u64)>,
}

/// In-process oracle driven by explicit price rounds.
///
/// Rounds are staged with [`ManualOracle::push_round`]; the next
/// [`OracleProvider::sync`] publishes the most recent staged round as a new
/// version. Several rounds staged between syncs collapse into one version.
#[derive(Debug)]
pub struct ManualOracle {
    state: RwLock<ManualState>,
}

impl ManualOracle {
    /// Oracle whose genesis version 0 carries `price` at `timestamp`.
    pub fn new(price: Fixed18, timestamp: u64) -> Self {
        ManualOracle {
            state: RwLock::new(ManualState {
                history: vec![OracleVersion {
                    version: 0,
                    timestamp,
                    price,
                }],
                staged: None,
            }),
        }
    }

    /// Stage a price round for the next sync.
    pub fn push_round(&self, price: Fixed18, timestamp: u64) -> Result<(), OracleError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let last = match state.staged {
            Some((_, ts)) => ts,
            None => latest(&state.history).timestamp,
        };
        if timestamp < last {
            return Err(OracleError::TimestampRegression {
                last,
                got: timestamp,
            });
        }
        state.staged = Some((price, timestamp));
        Ok(())
    }

    /// Stage a round and publish it immediately.
    pub fn advance(&self, price: Fixed18, timestamp: u64) -> Result<OracleVersion, OracleError> {
        self.push_round(price, timestamp)?;
        Ok(self.sync())
    }
}

fn latest(history: &[OracleVersion]) -> OracleVersion {
    // History always holds the genesis version.
    history[history.len() - 1]
}

impl OracleProvider for ManualOracle {
    fn sync(&self) -> OracleVersion {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((price, timestamp)) = state.staged.take() {
            let next = OracleVersion {
                version: state.history.len() as u64,
                timestamp,
                price,
            };
            state.history.push(next);
        }
        latest(&state.history)
    }

    fn current_version(&self) -> OracleVersion {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        latest(&state.history)
    }

    fn at_version(&self, version: u64) -> Option<OracleVersion> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        usize::try_from(version)
            .ok()
            .and_then(|idx| state.history.get(idx).copied())
    }
}
