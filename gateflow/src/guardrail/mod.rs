//! Validation gates and their execution side effects.
//!
//! A gate sits between a model stage and the rest of the pipeline: it parses
//! and validates the raw output, persists it, runs the code it carries and
//! decides whether the model gets another attempt.

mod gate;
mod report;
mod side_effect;
mod snapshot;

pub use gate::{gate_for, GateContext, GateVerdict, StageGate, ValidationGate};
pub use report::{
    format_json_error, format_query_errors, format_validation_error, format_violation,
    format_visualization_errors, FailureKind, FailureRecord, FailureStep,
};
pub use side_effect::{execute_plan, ExecutionReport, ExecutionSettings, SideEffect};
pub use snapshot::{
    chart_file_name, AnalysisResult, ExecutionSnapshot, SnapshotStore, SnapshotSummary,
    SubAnalysisResult, Tally, VisualizationResult,
};
