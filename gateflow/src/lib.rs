//! # Gateflow
//!
//! Validation gates, retry bookkeeping and generated-code execution for
//! staged data analysis pipelines.
//!
//! A pipeline is a fixed sequence of stages. Script stages are plain code;
//! model stages produce text through a [`pipeline::GenerativeModel`] and are
//! guarded by a validation gate that:
//!
//! - **Parses and validates** the output against a schema contract, reporting
//!   every violation with its path
//! - **Persists** the accepted structure as an artifact
//! - **Executes** the analysis and plotting code the output carries, checking
//!   that each snippet binds its result
//! - **Decides** between another attempt with formatted feedback and a
//!   terminal failure that cascades to every later stage
//!
//! Progress lives in a persisted status map that a UI can poll.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gateflow::prelude::*;
//!
//! let config = GateflowConfig::new().with_root("runs/42");
//! let store = Arc::new(StageStatusStore::new(Arc::new(
//!     JsonFileStatusRepository::new(config.layout().status_file()),
//! )));
//! let runner = PipelineRunner::new(model, store, PipelineDefinition::Sequential, &config);
//!
//! let report = runner.spawn().await??;
//! assert!(report.success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod analyzer;
pub mod config;
pub mod contracts;
pub mod core;
pub mod errors;
pub mod events;
pub mod exec;
pub mod guardrail;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod status;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::config::{ChartConfig, GateflowConfig, LogConfig, RunLayout};
    pub use crate::contracts::{ContractViolation, SchemaValidator, StageSchema};
    pub use crate::core::{ArtifactStore, StageRecord, StageState, MAX_ATTEMPTS};
    pub use crate::errors::{EnvironmentError, GateflowError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::exec::{CodeRunner, ExecutionNamespace, NamespaceIsolation, RunOutcome};
    pub use crate::guardrail::{gate_for, GateContext, GateVerdict, SideEffect, StageGate, ValidationGate};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        GenerativeModel, PipelineDefinition, PipelineRunner, RetryDecision, RunReport,
        StageOutcome,
    };
    pub use crate::status::{
        InMemoryStatusRepository, JsonFileStatusRepository, StageStatusStore, StatusRepository,
        StatusWatcher,
    };
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
