//! Pipeline definitions and execution.
//!
//! This module provides:
//! - The two concrete stage sequences
//! - Failure cascading and the bounded retry decision
//! - The deterministic script stages
//! - The background runner that drives model stages through their gates

mod cascade;
pub mod definition;
mod retry;
mod runner;
mod scripts;

#[cfg(test)]
mod integration_tests;

pub use cascade::cascade_failure;
pub use definition::{PipelineDefinition, StageKind, StageSlot};
pub use retry::{decide_retry, RetryDecision};
pub use runner::{GenerativeModel, PipelineRunner, RunReport, StageOutcome, StageReport};
pub use scripts::run_script;
