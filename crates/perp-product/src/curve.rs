//! Jump-rate utilization curve.
//!
//! Piecewise-linear annualized funding rate as a function of utilization
//! (`taker / maker`):
//! - `[0, target_utilization)`: `minimum_rate` -> `target_rate`
//! - `[target_utilization, 1)`: `target_rate` -> `maximum_rate`
//! - `>= 1`: `maximum_rate`

use serde::{Deserialize, Serialize};

use perp_types::{ArithmeticError, Fixed18, UFixed18};

/// Seconds per (365-day) year; annualized rates are divided by this.
pub const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpRateCurve {
    pub minimum_rate: Fixed18,
    pub maximum_rate: Fixed18,
    pub target_rate: Fixed18,
    pub target_utilization: UFixed18,
}

impl JumpRateCurve {
    /// Annualized rate at `utilization`.
    pub fn compute(&self, utilization: UFixed18) -> Result<Fixed18, ArithmeticError> {
        if utilization < self.target_utilization {
            return interpolate(
                UFixed18::ZERO,
                self.minimum_rate,
                self.target_utilization,
                self.target_rate,
                utilization,
            );
        }
        if utilization < UFixed18::ONE {
            return interpolate(
                self.target_utilization,
                self.target_rate,
                UFixed18::ONE,
                self.maximum_rate,
                utilization,
            );
        }
        Ok(self.maximum_rate)
    }

    /// Per-second rate at `utilization`.
    pub fn per_second(&self, utilization: UFixed18) -> Result<Fixed18, ArithmeticError> {
        self.compute(utilization)?.try_div_int(SECONDS_PER_YEAR)
    }
}

/// Caller guarantees `start_x <= x < end_x`.
fn interpolate(
    start_x: UFixed18,
    start_y: Fixed18,
    end_x: UFixed18,
    end_y: Fixed18,
    x: UFixed18,
) -> Result<Fixed18, ArithmeticError> {
    let x_range = end_x.try_sub(start_x)?;
    let y_range = end_y.try_sub(start_y)?;
    let x_ratio = x.try_sub(start_x)?.try_div(x_range)?;
    y_range
        .try_mul(Fixed18::from_unsigned(x_ratio)?)?
        .try_add(start_y)
}
