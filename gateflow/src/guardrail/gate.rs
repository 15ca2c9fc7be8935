//! The validation gate bound to one model stage.
//!
//! A gate turns the raw text of a model into either an accepted, persisted
//! artifact or a formatted error plus a retry decision. It never lets a
//! per-item failure escape: only infrastructure errors (disk, status store)
//! surface as `Err`.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, info_span, warn};

use crate::config::{ChartConfig, GateflowConfig, RunLayout};
use crate::contracts::{
    BusinessAnalysis, ConfidentialityTest, EnrichedMetadata, Queries, SchemaValidator,
    StageSchema, Visualizations,
};
use crate::core::{ArtifactStore, StageState, MAX_ATTEMPTS};
use crate::errors::{GateflowError, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::exec::{ExecutionNamespace, NamespaceIsolation};
use crate::guardrail::report::format_violation;
use crate::guardrail::side_effect::{execute_plan, ExecutionSettings, SideEffect};
use crate::guardrail::snapshot::{SnapshotStore, SnapshotSummary};
use crate::pipeline::definition::{
    BUSINESS_ANALYST, CONFIDENTIALITY_TESTER, MONO_AGENT, QUERY_BUILDER, SCHEMA_INTERPRETER,
    VISUALIZATION_DESIGNER,
};
use crate::pipeline::{decide_retry, run_script, PipelineDefinition, RetryDecision};
use crate::status::StageStatusStore;

/// The outcome of one gate invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// The output was validated, persisted and its code ran cleanly.
    Accepted {
        /// The validated structure.
        payload: Value,
        /// Execution counts, for code-bearing stages.
        summary: Option<SnapshotSummary>,
    },
    /// The output was rejected.
    Rejected {
        /// Formatted error for the model.
        message: String,
        /// Whether the model gets another attempt.
        decision: RetryDecision,
    },
}

impl GateVerdict {
    /// True for an accepted output.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// True when the stage failed for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { decision, .. } if decision.is_exhausted())
    }

    /// The error message of a rejection.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { message, .. } => Some(message),
        }
    }

    /// Converts to the `(success, payload)` pair; a rejection carries its
    /// message as a JSON string.
    #[must_use]
    pub fn into_pair(self) -> (bool, Value) {
        match self {
            Self::Accepted { payload, .. } => (true, payload),
            Self::Rejected { message, .. } => (false, Value::String(message)),
        }
    }
}

/// Shared collaborators of every gate of a run.
#[derive(Clone)]
pub struct GateContext {
    /// The status store.
    pub store: Arc<StageStatusStore>,
    /// The active pipeline definition.
    pub definition: PipelineDefinition,
    /// Run paths.
    pub layout: RunLayout,
    /// Namespace treatment between sub-analyses.
    pub isolation: NamespaceIsolation,
    /// Chart raster size.
    pub chart: ChartConfig,
    /// Receives the lifecycle events of hand-over scripts.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for GateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateContext")
            .field("definition", &self.definition)
            .field("layout", &self.layout)
            .field("isolation", &self.isolation)
            .field("chart", &self.chart)
            .finish_non_exhaustive()
    }
}

impl GateContext {
    /// Builds a context from the run configuration.
    #[must_use]
    pub fn new(
        store: Arc<StageStatusStore>,
        definition: PipelineDefinition,
        config: &GateflowConfig,
    ) -> Self {
        Self {
            store,
            definition,
            layout: config.layout(),
            isolation: config.isolation,
            chart: config.chart,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sends hand-over script events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Where validated artifacts are written.
    #[must_use]
    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.layout.artifacts_dir())
    }
}

/// A gate, erased over its schema.
pub trait StageGate: Send + Sync {
    /// The guarded stage.
    fn stage(&self) -> &str;

    /// Checks raw model output.
    fn check(&self, raw: &str) -> Result<GateVerdict>;

    /// Rejects the current attempt without any output to check, e.g. when
    /// the model could not be reached.
    fn reject(&self, message: String) -> Result<GateVerdict>;
}

/// Validation gate for the stage contract `S`.
pub struct ValidationGate<S: StageSchema> {
    stage: String,
    side_effect: SideEffect,
    validator: SchemaValidator<S>,
    context: GateContext,
}

impl<S: StageSchema> std::fmt::Debug for ValidationGate<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("stage", &self.stage)
            .field("contract", &S::CONTRACT)
            .field("side_effect", &self.side_effect)
            .finish_non_exhaustive()
    }
}

impl<S: StageSchema> ValidationGate<S> {
    /// Creates a gate for `stage`.
    pub fn new(stage: impl Into<String>, side_effect: SideEffect, context: GateContext) -> Result<Self> {
        Ok(Self {
            stage: stage.into(),
            side_effect,
            validator: SchemaValidator::new()?,
            context,
        })
    }

    /// The side effect run after validation.
    #[must_use]
    pub fn side_effect(&self) -> SideEffect {
        self.side_effect
    }

    /// Reads back the artifact of the last accepted output.
    pub fn load_artifact(&self) -> Result<S> {
        self.context.artifacts().read(S::CONTRACT)
    }

    fn run_side_effect(&self, validated: &S) -> Result<Option<(SnapshotSummary, Option<String>)>> {
        if !self.side_effect.runs_code() {
            return Ok(None);
        }

        let layout = &self.context.layout;
        let mut ns = match ExecutionNamespace::load(&layout.data_dir()) {
            Ok(ns) => ns,
            Err(err) => {
                warn!(stage = %self.stage, error = %err, "Execution environment unavailable");
                self.context
                    .store
                    .fail_and_cascade(&self.stage, &self.context.definition)?;
                return Err(err.into());
            }
        };
        let settings = ExecutionSettings {
            isolation: self.context.isolation,
            charts_dir: layout.charts_dir(),
            chart: self.context.chart,
        };
        let report = execute_plan(
            &self.stage,
            &validated.code_plan(),
            self.side_effect,
            &mut ns,
            &settings,
        );
        SnapshotStore::new(layout.snapshots_dir()).write(&report.snapshot)?;

        let error = (!report.is_clean()).then(|| self.side_effect.format_failures(&report.failures));
        Ok(Some((report.snapshot.summary, error)))
    }

    /// Marks the stage done, runs the scripts that follow it and hands over
    /// to the next model stage.
    fn advance(&self) -> Result<()> {
        let store = &self.context.store;
        let definition = &self.context.definition;
        store.update(&self.stage, StageState::Done)?;
        info!(stage = %self.stage, "Stage accepted");

        let events = &self.context.events;
        for script in definition.trailing_scripts(&self.stage) {
            store.update(script.name, StageState::InProgress)?;
            events.try_emit("stage.started", Some(json!({"stage": script.name})));
            if let Err(err) = run_script(script.name, &self.context.layout) {
                warn!(stage = script.name, error = %err, "Script stage failed");
                store.fail_and_cascade(script.name, definition)?;
                events.try_emit(
                    "stage.failed",
                    Some(json!({
                        "stage": script.name,
                        "attempts": store.get_attempts(script.name)?,
                        "error": err.to_string(),
                    })),
                );
                return Err(err);
            }
            store.update(script.name, StageState::Done)?;
            events.try_emit("stage.completed", Some(json!({"stage": script.name})));
            info!(stage = script.name, "Script stage done");
        }

        if definition.is_multi_stage() {
            if let Some(next) = definition.next_model_stage(&self.stage) {
                store.update(next.name, StageState::InProgress)?;
            }
        }
        Ok(())
    }
}

impl<S: StageSchema> StageGate for ValidationGate<S> {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn check(&self, raw: &str) -> Result<GateVerdict> {
        let span = info_span!("gate", stage = %self.stage, contract = S::CONTRACT);
        let _enter = span.enter();

        let validated = match self.validator.parse(raw) {
            Ok(validated) => validated,
            Err(violation) => return self.reject(format_violation(&violation)),
        };

        let payload = serde_json::to_value(&validated)?;
        self.context.artifacts().write(S::CONTRACT, &payload)?;

        let summary = match self.run_side_effect(&validated)? {
            Some((_, Some(message))) => return self.reject(message),
            Some((summary, None)) => Some(summary),
            None => None,
        };

        self.advance()?;
        Ok(GateVerdict::Accepted { payload, summary })
    }

    fn reject(&self, message: String) -> Result<GateVerdict> {
        let decision = decide_retry(&self.context.store, &self.stage, &self.context.definition)?;
        match &decision {
            RetryDecision::Retry { attempt } => {
                warn!(stage = %self.stage, attempt, max = MAX_ATTEMPTS, "Output rejected, retrying");
            }
            RetryDecision::Exhausted { attempts, cascaded } => {
                warn!(
                    stage = %self.stage,
                    attempt = attempts,
                    cascaded = cascaded.len(),
                    "Output rejected, no attempts left"
                );
            }
        }
        Ok(GateVerdict::Rejected { message, decision })
    }
}

/// Builds the gate guarding `stage`.
pub fn gate_for(stage: &str, context: GateContext) -> Result<Arc<dyn StageGate>> {
    Ok(match stage {
        SCHEMA_INTERPRETER => Arc::new(ValidationGate::<EnrichedMetadata>::new(
            stage,
            SideEffect::None,
            context,
        )?),
        BUSINESS_ANALYST => Arc::new(ValidationGate::<BusinessAnalysis>::new(
            stage,
            SideEffect::None,
            context,
        )?),
        QUERY_BUILDER => Arc::new(ValidationGate::<Queries>::new(
            stage,
            SideEffect::ExecuteQueries,
            context,
        )?),
        VISUALIZATION_DESIGNER | MONO_AGENT => Arc::new(ValidationGate::<Visualizations>::new(
            stage,
            SideEffect::ExecuteQueriesAndVisualizations,
            context,
        )?),
        CONFIDENTIALITY_TESTER => Arc::new(ValidationGate::<ConfidentialityTest>::new(
            stage,
            SideEffect::None,
            context,
        )?),
        other => return Err(GateflowError::UnknownStage(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::*;
    use crate::status::{InMemoryStatusRepository, StatusRepository};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(dir: &std::path::Path, definition: PipelineDefinition) -> GateContext {
        let store = Arc::new(StageStatusStore::new(Arc::new(InMemoryStatusRepository::new())));
        store.reset(&definition).unwrap();
        GateContext::new(store, definition, &GateflowConfig::new().with_root(dir))
    }

    fn business_json() -> String {
        json!({
            "analyses": [{
                "id": "1",
                "title": "Revenue",
                "context": "c",
                "tables": ["orders"],
                "sub_analyses": [{
                    "id": "1.1",
                    "title": "By month",
                    "why": "w",
                    "answers": ["a"],
                    "tables_columns": ["orders.amount"]
                }]
            }]
        })
        .to_string()
    }

    #[test]
    fn test_accepts_and_hands_over() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Sequential);
        ctx.store.update(BUSINESS_ANALYST, StageState::InProgress).unwrap();
        let gate = ValidationGate::<BusinessAnalysis>::new(BUSINESS_ANALYST, SideEffect::None, ctx.clone()).unwrap();

        let verdict = gate.check(&business_json()).unwrap();
        assert!(verdict.success());

        let map = ctx.store.snapshot().unwrap();
        assert_eq!(map[BUSINESS_ANALYST].state, StageState::Done);
        assert!(map[BUSINESS_ANALYST].end_time.is_some());
        assert_eq!(map[QUERY_BUILDER].state, StageState::InProgress);
        assert_eq!(map[QUERY_BUILDER].attempts, 1);
    }

    #[test]
    fn test_hand_over_scripts_emit_events() {
        let dir = tempfile::tempdir().unwrap();
        crate::testing::fixtures::prepare_run(dir.path()).unwrap();
        let events = Arc::new(crate::events::CollectingEventSink::new());
        let ctx = context(dir.path(), PipelineDefinition::Sequential).with_event_sink(events.clone());
        ctx.store.update(QUERY_BUILDER, StageState::InProgress).unwrap();
        let gate = gate_for(QUERY_BUILDER, ctx.clone()).unwrap();

        let verdict = gate.check(&crate::testing::fixtures::queries().to_string()).unwrap();
        assert!(verdict.success());

        let seen: Vec<_> = events
            .events()
            .into_iter()
            .map(|(kind, data)| (kind, data.unwrap()["stage"].clone()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("stage.started".to_string(), json!(QUERY_ANALYSIS)),
                ("stage.completed".to_string(), json!(QUERY_ANALYSIS)),
            ]
        );
        assert_eq!(ctx.store.get(QUERY_ANALYSIS).unwrap().state, StageState::Done);
    }

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Sequential);
        let gate = ValidationGate::<BusinessAnalysis>::new(BUSINESS_ANALYST, SideEffect::None, ctx).unwrap();

        let (success, payload) = gate.check(&business_json()).unwrap().into_pair();
        assert!(success);
        let stored = gate.load_artifact().unwrap();
        assert_eq!(serde_json::to_value(&stored).unwrap(), payload);
    }

    #[test]
    fn test_malformed_output_retries_then_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Sequential);
        ctx.store.update(SCHEMA_INTERPRETER, StageState::InProgress).unwrap();
        ctx.store.increment_attempts(SCHEMA_INTERPRETER).unwrap();
        ctx.store.increment_attempts(SCHEMA_INTERPRETER).unwrap();
        let gate = gate_for(SCHEMA_INTERPRETER, ctx.clone()).unwrap();

        let verdict = gate.check("{invalid").unwrap();
        assert!(!verdict.success());
        assert!(verdict.message().unwrap().starts_with("JSON ERROR"));
        let record = ctx.store.get(SCHEMA_INTERPRETER).unwrap();
        assert_eq!(record.attempts, 4);
        assert_eq!(record.state, StageState::InProgress);

        let verdict = gate.check("{invalid").unwrap();
        assert!(verdict.is_terminal());
        let map = ctx.store.snapshot().unwrap();
        assert_eq!(map[SCHEMA_INTERPRETER].state, StageState::Error);
        assert_eq!(map[SCHEMA_INTERPRETER].attempts, 4);
        for stage in [BUSINESS_ANALYST, QUERY_BUILDER, QUERY_ANALYSIS, CONFIDENTIALITY_TESTER] {
            assert_eq!(map[stage].state, StageState::Error);
        }
        assert_eq!(map[RAW_SCHEMA].state, StageState::Waiting);
    }

    #[test]
    fn test_schema_violation_message() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Sequential);
        let gate = gate_for(CONFIDENTIALITY_TESTER, ctx).unwrap();
        let verdict = gate.check(r#"{"verdict": "PASS"}"#).unwrap();
        let message = verdict.message().unwrap();
        assert!(message.starts_with("VALIDATION ERROR (4 issues)"));
        assert!(message.contains("summary: missing field"));
    }

    #[test]
    fn test_rejected_output_leaves_artifact_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Sequential);
        let gate = ValidationGate::<BusinessAnalysis>::new(BUSINESS_ANALYST, SideEffect::None, ctx.clone()).unwrap();
        gate.check(&business_json()).unwrap();
        let before = std::fs::read(ctx.artifacts().path_for(BusinessAnalysis::CONTRACT)).unwrap();

        gate.check("[]").unwrap();
        let after = std::fs::read(ctx.artifacts().path_for(BusinessAnalysis::CONTRACT)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_data_dir_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PipelineDefinition::Mono);
        let gate = gate_for(MONO_AGENT, ctx.clone()).unwrap();
        let raw = json!({"analyses": []}).to_string();

        let err = gate.check(&raw).unwrap_err();
        assert!(matches!(err, GateflowError::Environment(_)));
        assert_eq!(ctx.store.get(MONO_AGENT).unwrap().state, StageState::Error);
    }

    #[test]
    fn test_unknown_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = gate_for(RAW_SCHEMA, context(dir.path(), PipelineDefinition::Sequential)).err();
        assert!(matches!(err, Some(GateflowError::UnknownStage(_))));
    }

    #[test]
    fn test_status_write_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = crate::status::MockStatusRepository::new();
        repo.expect_get().returning(|| Ok(PipelineDefinition::Sequential.initial_status()));
        repo.expect_set()
            .returning(|_| Err(GateflowError::Status("disk full".into())));
        let repo: Arc<dyn StatusRepository> = Arc::new(repo);
        let ctx = GateContext::new(
            Arc::new(StageStatusStore::new(repo)),
            PipelineDefinition::Sequential,
            &GateflowConfig::new().with_root(dir.path()),
        );
        let gate = gate_for(BUSINESS_ANALYST, ctx).unwrap();
        assert!(matches!(gate.check("{"), Err(GateflowError::Status(_))));
    }
}
