//! perp-testkit
//!
//! Deterministic wiring for end-to-end runs:
//! - [`Harness`]: a protocol with a long and a short market over one
//!   manual oracle, plus a balanced vault making both markets
//! - [`Script`]: a YAML list of steps replayed through a harness, producing
//!   one report per step

pub mod harness;
pub mod script;

pub use harness::{Harness, HarnessConfig, LegSnapshot, VaultSnapshot};
pub use script::{run_script, Script, Step, StepReport};
