//! End-to-end runs of both pipeline definitions against the sales dataset.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{GateflowConfig, RunLayout};
    use crate::core::{ArtifactStore, StageState, MAX_ATTEMPTS};
    use crate::events::CollectingEventSink;
    use crate::guardrail::{chart_file_name, SnapshotStore};
    use crate::pipeline::definition::*;
    use crate::pipeline::{PipelineDefinition, PipelineRunner, RunReport, StageOutcome};
    use crate::status::{
        InMemoryStatusRepository, JsonFileStatusRepository, StageStatusStore, StatusRepository,
        StatusWatcher,
    };
    use crate::testing::{fixtures, ScriptedModel};

    fn happy_model() -> ScriptedModel {
        ScriptedModel::new()
            .always(SCHEMA_INTERPRETER, fixtures::enriched_metadata().to_string())
            .always(BUSINESS_ANALYST, fixtures::business_analysis().to_string())
            .always(QUERY_BUILDER, fixtures::queries().to_string())
            .always(VISUALIZATION_DESIGNER, fixtures::visualizations().to_string())
            .always(CONFIDENTIALITY_TESTER, fixtures::confidentiality_test().to_string())
            .always(MONO_AGENT, fixtures::visualizations().to_string())
    }

    struct Harness {
        _dir: tempfile::TempDir,
        layout: RunLayout,
        store: Arc<StageStatusStore>,
        runner: PipelineRunner,
    }

    fn harness(model: Arc<ScriptedModel>, definition: PipelineDefinition) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let layout = fixtures::prepare_run(dir.path()).unwrap();
        let store = Arc::new(StageStatusStore::new(Arc::new(InMemoryStatusRepository::new())));
        let config = GateflowConfig::new().with_root(dir.path());
        let runner = PipelineRunner::new(model, Arc::clone(&store), definition, &config);
        Harness {
            _dir: dir,
            layout,
            store,
            runner,
        }
    }

    fn state(report: &RunReport, stage: &str) -> StageState {
        report.status[stage].state
    }

    #[tokio::test]
    async fn test_sequential_run_completes() {
        let model = Arc::new(happy_model());
        let events = Arc::new(CollectingEventSink::new());
        let h = harness(Arc::clone(&model), PipelineDefinition::Sequential);
        let runner = h.runner.with_event_sink(events.clone());

        let report = runner.run().await.unwrap();

        assert!(report.success());
        for stage in PipelineDefinition::Sequential.stage_names() {
            assert_eq!(state(&report, stage), StageState::Done, "{stage}");
            assert!(report.status[stage].end_time.is_some());
        }
        assert_eq!(report.status[QUERY_BUILDER].attempts, 1);
        assert_eq!(model.calls().len(), 5);

        let artifacts = ArtifactStore::new(h.layout.artifacts_dir());
        for contract in ["enriched_metadata", "business_analysis", "queries", "visualizations", "confidentiality_test"] {
            assert!(artifacts.exists(contract), "{contract}");
        }
        let scripts = ArtifactStore::new(h.layout.scripts_dir());
        assert!(scripts.exists("raw_schema_metadata"));
        assert!(scripts.exists("query_analysis"));

        let snapshot = SnapshotStore::new(h.layout.snapshots_dir())
            .read(VISUALIZATION_DESIGNER)
            .unwrap();
        let charts = snapshot.summary.visualizations.unwrap();
        assert_eq!((charts.total, charts.succeeded, charts.failed), (2, 2, 0));
        assert!(h.layout.charts_dir().join(chart_file_name("1", "1.1")).is_file());

        assert_eq!(events.events_of_type("pipeline.").len(), 2);
        assert!(events.events_of_type("stage.rejected").is_empty());
    }

    #[tokio::test]
    async fn test_query_analysis_summarises_results() {
        let h = harness(Arc::new(happy_model()), PipelineDefinition::Sequential);
        h.runner.run().await.unwrap();

        let analysis = ArtifactStore::new(h.layout.scripts_dir())
            .read_value("query_analysis")
            .unwrap();
        let first = &analysis["analyses"][0]["queries"][0]["analysis"];
        assert_eq!(first["row_count"], json!(2));
        assert_eq!(first["columns"]["amount"]["max"], json!(37.0));
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried_with_feedback() {
        let model = Arc::new(happy_model().reply(SCHEMA_INTERPRETER, "{invalid"));
        let h = harness(Arc::clone(&model), PipelineDefinition::Sequential);

        let report = h.runner.run().await.unwrap();

        assert!(report.success());
        let calls = model.calls_for(SCHEMA_INTERPRETER);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].attempt, 1);
        assert_eq!(calls[0].feedback, None);
        assert_eq!(calls[1].attempt, 2);
        assert!(calls[1].feedback.as_deref().unwrap().starts_with("JSON ERROR"));
        assert_eq!(
            report.outcome(SCHEMA_INTERPRETER),
            Some(&StageOutcome::Accepted { attempts: 2, summary: None })
        );
    }

    #[tokio::test]
    async fn test_exhausted_stage_cascades() {
        let model = Arc::new(happy_model().always(BUSINESS_ANALYST, "[]"));
        let h = harness(Arc::clone(&model), PipelineDefinition::Sequential);

        let report = h.runner.run().await.unwrap();

        assert!(!report.success());
        assert_eq!(model.calls_for(BUSINESS_ANALYST).len(), MAX_ATTEMPTS as usize);
        assert_eq!(report.status[BUSINESS_ANALYST].attempts, MAX_ATTEMPTS);
        assert_eq!(state(&report, RAW_SCHEMA), StageState::Done);
        assert_eq!(state(&report, SCHEMA_INTERPRETER), StageState::Done);
        for stage in [BUSINESS_ANALYST, QUERY_BUILDER, QUERY_ANALYSIS, VISUALIZATION_DESIGNER, CONFIDENTIALITY_TESTER] {
            assert_eq!(state(&report, stage), StageState::Error, "{stage}");
        }
        assert!(matches!(
            report.outcome(BUSINESS_ANALYST),
            Some(StageOutcome::Failed { attempts: 4, .. })
        ));
        assert_eq!(report.outcome(QUERY_BUILDER), Some(&StageOutcome::Skipped));
        assert!(model.calls_for(QUERY_BUILDER).is_empty());
        assert_eq!(h.store.snapshot().unwrap(), report.status);
    }

    #[tokio::test]
    async fn test_transport_error_uses_retry_budget() {
        let model = Arc::new(happy_model().fail(QUERY_BUILDER, "connection reset"));
        let h = harness(Arc::clone(&model), PipelineDefinition::Sequential);

        let report = h.runner.run().await.unwrap();

        assert!(report.success());
        assert_eq!(report.status[QUERY_BUILDER].attempts, 2);
        let calls = model.calls_for(QUERY_BUILDER);
        assert!(calls[1].feedback.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_failed_hand_over_script_is_reported_against_script_stage() {
        let model = Arc::new(happy_model());
        let events = Arc::new(CollectingEventSink::new());
        let h = harness(Arc::clone(&model), PipelineDefinition::Sequential);
        let blocker = h.layout.scripts_dir().join("query_analysis.json");
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();
        let runner = h.runner.with_event_sink(events.clone());

        let report = runner.run().await.unwrap();

        assert!(!report.success());
        assert_eq!(state(&report, QUERY_BUILDER), StageState::Done);
        let Some(StageOutcome::Accepted { attempts: 1, summary: Some(summary) }) =
            report.outcome(QUERY_BUILDER)
        else {
            panic!("query builder output was accepted");
        };
        assert_eq!(summary.queries.succeeded, 2);

        assert_eq!(state(&report, QUERY_ANALYSIS), StageState::Error);
        let Some(StageOutcome::Failed { attempts: 1, message }) = report.outcome(QUERY_ANALYSIS) else {
            panic!("query analysis ran and failed");
        };
        assert!(message.starts_with("Script stage 'query_analysis' failed"));

        for stage in [VISUALIZATION_DESIGNER, CONFIDENTIALITY_TESTER] {
            assert_eq!(report.outcome(stage), Some(&StageOutcome::Skipped), "{stage}");
        }
        assert!(model.calls_for(VISUALIZATION_DESIGNER).is_empty());
        assert_eq!(events.events_of_type("stage.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_mono_run_retries_failing_code() {
        let mut broken = fixtures::visualizations();
        broken["analyses"][0]["sub_analyses"][1]["code_lines"] =
            json!(["result = orders[orders['missing_col'] > 1]"]);
        let model = Arc::new(happy_model().reply(MONO_AGENT, broken.to_string()));
        let h = harness(Arc::clone(&model), PipelineDefinition::Mono);

        let report = h.runner.run().await.unwrap();

        assert!(report.success());
        assert_eq!(report.status.len(), 2);
        let feedback = model.calls_for(MONO_AGENT)[1].feedback.clone().unwrap();
        assert!(feedback.starts_with("VISUALIZATION ERROR (1 failure)"));
        assert!(feedback.contains("missing_col"));

        let Some(StageOutcome::Accepted { summary: Some(summary), .. }) = report.outcome(MONO_AGENT) else {
            panic!("mono agent should be accepted with a summary");
        };
        assert_eq!(summary.queries.succeeded, 2);
    }

    #[tokio::test]
    async fn test_missing_dataset_fails_raw_schema() {
        let model = Arc::new(happy_model());
        let h = harness(Arc::clone(&model), PipelineDefinition::Mono);
        std::fs::remove_dir_all(h.layout.data_dir()).unwrap();

        let report = h.runner.run().await.unwrap();

        assert!(matches!(report.outcome(RAW_SCHEMA), Some(StageOutcome::Failed { .. })));
        assert_eq!(report.outcome(MONO_AGENT), Some(&StageOutcome::Skipped));
        assert_eq!(state(&report, MONO_AGENT), StageState::Error);
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_run_is_visible_through_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fixtures::prepare_run(dir.path()).unwrap();
        let repository: Arc<dyn StatusRepository> =
            Arc::new(JsonFileStatusRepository::new(layout.status_file()));
        let store = Arc::new(StageStatusStore::new(Arc::clone(&repository)));
        let config = GateflowConfig::new().with_root(dir.path());
        let runner = PipelineRunner::new(Arc::new(happy_model()), store, PipelineDefinition::Mono, &config);

        let watcher = StatusWatcher::new(Arc::clone(&repository), Duration::from_millis(10));
        let report = runner.spawn().await.unwrap().unwrap();
        assert!(watcher.poll_once().unwrap());

        let seen = watcher.subscribe().borrow().clone();
        assert_eq!(seen, report.status);
        assert_eq!(seen[MONO_AGENT].state, StageState::Done);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(layout.status_file()).unwrap()).unwrap();
        assert_eq!(on_disk[MONO_AGENT]["state"], json!("done"));
    }
}
