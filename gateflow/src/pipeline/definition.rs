//! The two fixed pipeline definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::StageRecord;
use crate::status::StatusMap;

/// Deterministic schema extraction over the dataset.
pub const RAW_SCHEMA: &str = "raw_schema";
/// Model stage enriching the raw schema.
pub const SCHEMA_INTERPRETER: &str = "schema_interpreter";
/// Model stage proposing analyses.
pub const BUSINESS_ANALYST: &str = "business_analyst";
/// Model stage writing query code.
pub const QUERY_BUILDER: &str = "query_builder";
/// Deterministic summary of executed queries.
pub const QUERY_ANALYSIS: &str = "query_analysis";
/// Model stage writing visualization code.
pub const VISUALIZATION_DESIGNER: &str = "visualization_designer";
/// Model stage probing the report for data exposure.
pub const CONFIDENTIALITY_TESTER: &str = "confidentiality_tester";
/// Model stage doing everything in one pass.
pub const MONO_AGENT: &str = "mono_agent";

/// How a stage produces its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Deterministic code run by the pipeline itself.
    Script,
    /// Generative model output checked by a validation gate.
    Model,
}

/// One entry of a pipeline definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSlot {
    /// Stage name, unique within the definition.
    pub name: &'static str,
    /// How the stage runs.
    pub kind: StageKind,
}

const fn script(name: &'static str) -> StageSlot {
    StageSlot {
        name,
        kind: StageKind::Script,
    }
}

const fn model(name: &'static str) -> StageSlot {
    StageSlot {
        name,
        kind: StageKind::Model,
    }
}

const SEQUENTIAL: &[StageSlot] = &[
    script(RAW_SCHEMA),
    model(SCHEMA_INTERPRETER),
    model(BUSINESS_ANALYST),
    model(QUERY_BUILDER),
    script(QUERY_ANALYSIS),
    model(VISUALIZATION_DESIGNER),
    model(CONFIDENTIALITY_TESTER),
];

const MONO: &[StageSlot] = &[script(RAW_SCHEMA), model(MONO_AGENT)];

/// An ordered, immutable sequence of stages chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineDefinition {
    /// The long multi-agent pipeline.
    #[default]
    Sequential,
    /// A single model stage after schema extraction.
    Mono,
}

impl fmt::Display for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Mono => write!(f, "mono"),
        }
    }
}

impl PipelineDefinition {
    /// Returns the stages in order.
    #[must_use]
    pub fn stages(&self) -> &'static [StageSlot] {
        match self {
            Self::Sequential => SEQUENTIAL,
            Self::Mono => MONO,
        }
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages().iter().map(|s| s.name).collect()
    }

    /// Returns the index of `stage`, if it belongs to this definition.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.stages().iter().position(|s| s.name == stage)
    }

    /// Returns true if `stage` belongs to this definition.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.position(stage).is_some()
    }

    /// Returns the kind of `stage`.
    #[must_use]
    pub fn kind_of(&self, stage: &str) -> Option<StageKind> {
        self.stages().iter().find(|s| s.name == stage).map(|s| s.kind)
    }

    /// Returns true when the definition has more than one model stage.
    #[must_use]
    pub fn is_multi_stage(&self) -> bool {
        self.stages()
            .iter()
            .filter(|s| s.kind == StageKind::Model)
            .count()
            > 1
    }

    /// Returns every stage strictly after `stage`.
    ///
    /// A stage outside the definition yields the whole definition.
    #[must_use]
    pub fn downstream_of(&self, stage: &str) -> &'static [StageSlot] {
        let stages = self.stages();
        match self.position(stage) {
            Some(idx) => &stages[idx + 1..],
            None => stages,
        }
    }

    /// Returns the script stages that directly follow `stage`, up to the next
    /// model stage.
    #[must_use]
    pub fn trailing_scripts(&self, stage: &str) -> Vec<StageSlot> {
        if !self.contains(stage) {
            return Vec::new();
        }
        self.downstream_of(stage)
            .iter()
            .take_while(|s| s.kind == StageKind::Script)
            .copied()
            .collect()
    }

    /// Returns the first model stage after `stage`.
    #[must_use]
    pub fn next_model_stage(&self, stage: &str) -> Option<StageSlot> {
        if !self.contains(stage) {
            return None;
        }
        self.downstream_of(stage)
            .iter()
            .find(|s| s.kind == StageKind::Model)
            .copied()
    }

    /// Returns the status map a run starts with: every stage waiting.
    #[must_use]
    pub fn initial_status(&self) -> StatusMap {
        self.stages()
            .iter()
            .map(|s| (s.name.to_string(), StageRecord::waiting()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_order() {
        assert_eq!(
            PipelineDefinition::Sequential.stage_names(),
            vec![
                RAW_SCHEMA,
                SCHEMA_INTERPRETER,
                BUSINESS_ANALYST,
                QUERY_BUILDER,
                QUERY_ANALYSIS,
                VISUALIZATION_DESIGNER,
                CONFIDENTIALITY_TESTER,
            ]
        );
        assert!(PipelineDefinition::Sequential.is_multi_stage());
        assert!(!PipelineDefinition::Mono.is_multi_stage());
    }

    #[test]
    fn test_downstream_of_unknown_is_everything() {
        let def = PipelineDefinition::Mono;
        assert_eq!(def.downstream_of("nonexistent").len(), 2);
        assert_eq!(def.downstream_of(RAW_SCHEMA).len(), 1);
        assert!(def.downstream_of(MONO_AGENT).is_empty());
    }

    #[test]
    fn test_trailing_scripts_and_next_model() {
        let def = PipelineDefinition::Sequential;
        let scripts = def.trailing_scripts(QUERY_BUILDER);
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, QUERY_ANALYSIS);
        assert_eq!(
            def.next_model_stage(QUERY_BUILDER).map(|s| s.name),
            Some(VISUALIZATION_DESIGNER)
        );
        assert!(def.trailing_scripts(BUSINESS_ANALYST).is_empty());
        assert!(def.next_model_stage(CONFIDENTIALITY_TESTER).is_none());
        assert!(def.next_model_stage("nope").is_none());
    }

    #[test]
    fn test_initial_status_in_order() {
        let status = PipelineDefinition::Sequential.initial_status();
        let keys: Vec<&str> = status.keys().map(String::as_str).collect();
        assert_eq!(keys, PipelineDefinition::Sequential.stage_names());
        assert!(status.values().all(|r| r.attempts == 0));
    }

    #[test]
    fn test_kind_of() {
        let def = PipelineDefinition::Sequential;
        assert_eq!(def.kind_of(RAW_SCHEMA), Some(StageKind::Script));
        assert_eq!(def.kind_of(QUERY_BUILDER), Some(StageKind::Model));
        assert_eq!(def.kind_of(MONO_AGENT), None);
    }
}
