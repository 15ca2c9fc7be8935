//! Testing utilities for gateflow pipelines.
//!
//! This module provides:
//! - A scripted generative model that records its calls
//! - A small sales dataset and valid outputs for every model stage

pub mod fixtures;
mod mocks;

pub use mocks::{RecordedCall, ScriptedModel, ScriptedReply};
