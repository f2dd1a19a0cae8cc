//! Replayable step scripts.
//!
//! ```yaml
//! steps:
//!   - action: deposit
//!     account: alice
//!     assets: "10000"
//!   - action: price
//!     price: "2000"
//!   - action: sync
//! ```
//!
//! A rejected step is recorded in its report and the run continues; only
//! harness failures (bad oracle timestamps and the like) abort the run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use perp_types::{Account, Fixed18, UFixed18};
use perp_vault::Leg;

use crate::harness::{Harness, VaultSnapshot};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("invalid script yaml")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Publish a new oracle version at `price`.
    Price { price: Fixed18 },
    Deposit { account: Account, assets: UFixed18 },
    /// Redeem `shares`, or the whole settled balance when omitted.
    Redeem {
        account: Account,
        #[serde(default)]
        shares: Option<UFixed18>,
    },
    Claim { account: Account },
    Sync,
    OpenTake {
        account: Account,
        leg: Leg,
        collateral: UFixed18,
        size: UFixed18,
    },
    /// Liquidate the vault's account in `leg`.
    Liquidate { leg: Leg, keeper: Account },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Price { .. } => "price",
            Step::Deposit { .. } => "deposit",
            Step::Redeem { .. } => "redeem",
            Step::Claim { .. } => "claim",
            Step::Sync => "sync",
            Step::OpenTake { .. } => "open_take",
            Step::Liquidate { .. } => "liquidate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: &'static str,
    pub ok: bool,
    /// Rejection reason when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Amount paid out by a claim or liquidation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<UFixed18>,
    pub state: VaultSnapshot,
}

/// Apply every step in order and snapshot the vault after each one.
pub fn run_script(harness: &mut Harness, script: &Script) -> Result<Vec<StepReport>> {
    let mut reports = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let outcome = apply(harness, step).with_context(|| format!("step {index} ({})", step.name()))?;
        let (ok, error, amount) = match outcome {
            Ok(amount) => (true, None, amount),
            Err(reason) => {
                warn!(index, action = step.name(), %reason, "step rejected");
                (false, Some(reason), None)
            }
        };
        let state = harness
            .snapshot()
            .with_context(|| format!("snapshot after step {index}"))?;
        info!(index, action = step.name(), ok, version = state.version, "step applied");
        reports.push(StepReport {
            index,
            action: step.name(),
            ok,
            error,
            amount,
            state,
        });
    }
    Ok(reports)
}

/// Outer error aborts the run; inner error is a rejected step.
fn apply(harness: &mut Harness, step: &Step) -> Result<std::result::Result<Option<UFixed18>, String>> {
    let outcome = match step {
        Step::Price { price } => {
            harness.advance(*price)?;
            Ok(None)
        }
        Step::Deposit { account, assets } => harness
            .deposit(account, *assets)
            .map(|()| None)
            .map_err(|e| e.to_string()),
        Step::Redeem { account, shares } => match shares {
            Some(shares) => harness.redeem(account, *shares).map(|()| None),
            None => harness.redeem_all(account).map(|_| None),
        }
        .map_err(|e| e.to_string()),
        Step::Claim { account } => harness
            .claim(account)
            .map(Some)
            .map_err(|e| e.to_string()),
        Step::Sync => harness.sync().map(|()| None).map_err(|e| e.to_string()),
        Step::OpenTake {
            account,
            leg,
            collateral,
            size,
        } => harness
            .open_taker(account, *leg, *collateral, *size)
            .map(|()| None)
            .map_err(|e| format!("{e:#}")),
        Step::Liquidate { leg, keeper } => harness
            .liquidate_vault(*leg, keeper)
            .map(Some)
            .map_err(|e| e.to_string()),
    };
    Ok(outcome)
}
