//! Stage output contracts.
//!
//! This module provides:
//! - The typed output of every model stage
//! - JSON schema validation with per-field issues
//! - The code plan extracted from code-bearing outputs

mod errors;
pub mod models;
mod schema;

pub use errors::{ContractViolation, IssueCategory, SchemaIssue};
pub use models::{
    BusinessAnalysis, ConfidentialityTest, EnrichedMetadata, Queries, RawSchemaMetadata,
    Visualizations,
};
pub use schema::{AnalysisPlan, SchemaValidator, StageSchema, SubAnalysisPlan, VisualizationPlan};
