//! The background pipeline driver.
//!
//! The runner owns no state of its own: every transition goes through the
//! status store, so a UI polling the store sees the same progress the runner
//! reports at the end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GateflowConfig;
use crate::core::StageState;
use crate::errors::{GateflowError, Result};
use crate::events::EventSink;
use crate::guardrail::{
    gate_for, GateContext, GateVerdict, SnapshotStore, SnapshotSummary, StageGate,
};
use crate::pipeline::{run_script, PipelineDefinition, StageKind, StageSlot};
use crate::status::{StageStatusStore, StatusMap};
use crate::utils::generate_run_id;

/// The language model behind every model stage.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Produces the raw output of `stage`.
    ///
    /// `attempt` starts at 1. `feedback` carries the formatted error of the
    /// previous attempt, if any.
    async fn generate(
        &self,
        stage: &str,
        attempt: u32,
        feedback: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// A script stage finished.
    Completed,
    /// A model stage was accepted by its gate.
    Accepted {
        /// Attempts spent.
        attempts: u32,
        /// Execution counts of code-bearing stages.
        summary: Option<SnapshotSummary>,
    },
    /// The stage failed for good.
    Failed {
        /// Attempts spent.
        attempts: u32,
        /// The last error.
        message: String,
    },
    /// The stage never ran because an earlier stage failed.
    Skipped,
}

/// Outcome of one stage, in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// How it ended.
    pub outcome: StageOutcome,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Per stage outcomes.
    pub stages: Vec<StageReport>,
    /// The status map once the run stopped.
    pub status: StatusMap,
}

impl RunReport {
    /// True when no stage failed or was skipped.
    #[must_use]
    pub fn success(&self) -> bool {
        self.stages.iter().all(|s| {
            matches!(
                s.outcome,
                StageOutcome::Completed | StageOutcome::Accepted { .. }
            )
        })
    }

    /// Outcome of `stage`.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.outcome)
    }
}

/// Drives one pipeline run from the raw schema script to the last stage.
pub struct PipelineRunner {
    context: GateContext,
    model: Arc<dyn GenerativeModel>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("definition", &self.context.definition)
            .field("root", &self.context.layout.root())
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner for `definition`.
    #[must_use]
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        store: Arc<StageStatusStore>,
        definition: PipelineDefinition,
        config: &GateflowConfig,
    ) -> Self {
        Self {
            context: GateContext::new(store, definition, config),
            model,
        }
    }

    /// Sends lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.context = self.context.with_event_sink(sink);
        self
    }

    /// The status store the runner writes to.
    #[must_use]
    pub fn store(&self) -> Arc<StageStatusStore> {
        Arc::clone(&self.context.store)
    }

    /// Runs the pipeline on a background task.
    pub fn spawn(self) -> JoinHandle<Result<RunReport>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Runs the whole pipeline.
    ///
    /// Stage failures end up in the report. Only infrastructure errors
    /// (status store, disk) abort the run.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = generate_run_id();
        let definition = self.context.definition;
        let span = info_span!("pipeline", %run_id, definition = %definition);

        async {
            self.context.layout.ensure()?;
            self.context.store.reset(&definition)?;
            self.context.events
                .emit(
                    "pipeline.started",
                    Some(json!({"run_id": run_id, "stages": definition.stage_names()})),
                )
                .await;

            let mut stages = Vec::with_capacity(definition.stages().len());
            let mut settled = HashMap::new();
            for slot in definition.stages() {
                let outcome = match settled.remove(slot.name) {
                    Some(outcome) => outcome,
                    None => self.run_stage(*slot, &mut settled).await?,
                };
                stages.push(StageReport {
                    stage: slot.name.to_string(),
                    outcome,
                });
            }

            let report = RunReport {
                run_id,
                stages,
                status: self.context.store.snapshot()?,
            };
            info!(success = report.success(), "Pipeline finished");
            self.context.events
                .emit(
                    "pipeline.completed",
                    Some(json!({"run_id": run_id, "success": report.success()})),
                )
                .await;
            Ok::<_, GateflowError>(report)
        }
        .instrument(span)
        .await
    }

    /// Runs one stage. Outcomes of script stages that ran inside a gate's
    /// hand-over are recorded in `settled`.
    async fn run_stage(
        &self,
        slot: StageSlot,
        settled: &mut HashMap<String, StageOutcome>,
    ) -> Result<StageOutcome> {
        let record = self.context.store.get(slot.name)?;
        match record.state {
            StageState::Error => {
                self.context.events
                    .emit("stage.skipped", Some(json!({"stage": slot.name})))
                    .await;
                return Ok(StageOutcome::Skipped);
            }
            StageState::Done => return self.completed(slot),
            StageState::Waiting | StageState::InProgress => {}
        }

        self.context.events
            .emit("stage.started", Some(json!({"stage": slot.name})))
            .await;
        let outcome = match slot.kind {
            StageKind::Script => self.run_script_stage(slot.name)?,
            StageKind::Model => self.drive_model_stage(slot.name, settled).await?,
        };

        let (event, data) = match &outcome {
            StageOutcome::Failed { message, attempts } => (
                "stage.failed",
                json!({"stage": slot.name, "attempts": attempts, "error": message}),
            ),
            _ => ("stage.completed", json!({"stage": slot.name})),
        };
        self.context.events.emit(event, Some(data)).await;
        Ok(outcome)
    }

    fn completed(&self, slot: StageSlot) -> Result<StageOutcome> {
        Ok(match slot.kind {
            StageKind::Script => StageOutcome::Completed,
            StageKind::Model => StageOutcome::Accepted {
                attempts: self.context.store.get_attempts(slot.name)?,
                summary: None,
            },
        })
    }

    fn stored_summary(&self, stage: &str) -> Result<Option<SnapshotSummary>> {
        let snapshots = SnapshotStore::new(self.context.layout.snapshots_dir());
        if !snapshots.path_for(stage).is_file() {
            return Ok(None);
        }
        Ok(Some(snapshots.read(stage)?.summary))
    }

    fn run_script_stage(&self, stage: &str) -> Result<StageOutcome> {
        let store = &self.context.store;
        store.update(stage, StageState::InProgress)?;
        match run_script(stage, &self.context.layout) {
            Ok(path) => {
                store.update(stage, StageState::Done)?;
                info!(stage = %stage, path = %path.display(), "Script stage done");
                Ok(StageOutcome::Completed)
            }
            Err(err) => {
                warn!(stage = %stage, error = %err, "Script stage failed");
                store.fail_and_cascade(stage, &self.context.definition)?;
                Ok(StageOutcome::Failed {
                    attempts: store.get_attempts(stage)?,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn drive_model_stage(
        &self,
        stage: &str,
        settled: &mut HashMap<String, StageOutcome>,
    ) -> Result<StageOutcome> {
        let store = &self.context.store;
        let gate = gate_for(stage, self.context.clone())?;
        if store.get(stage)?.state != StageState::InProgress {
            store.update(stage, StageState::InProgress)?;
        }

        let mut feedback: Option<String> = None;
        loop {
            let attempt = store.get_attempts(stage)?;
            self.context.events
                .emit("stage.attempt", Some(json!({"stage": stage, "attempt": attempt})))
                .await;

            let verdict = match self.model.generate(stage, attempt, feedback.as_deref()).await {
                Ok(raw) => check_blocking(&gate, raw).await,
                Err(err) => {
                    warn!(stage = %stage, attempt, error = %err, "Model call failed");
                    gate.reject(format!("MODEL ERROR\n\nProblem: {err}"))
                }
            };

            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(GateflowError::Script { stage: script, reason }) if script != stage => {
                    // The output was accepted; a script of the hand-over failed.
                    let message = GateflowError::script(script.as_str(), reason).to_string();
                    let attempts = store.get_attempts(&script)?;
                    settled.insert(script, StageOutcome::Failed { attempts, message });
                    return Ok(StageOutcome::Accepted {
                        attempts: store.get_attempts(stage)?,
                        summary: self.stored_summary(stage)?,
                    });
                }
                Err(err @ (GateflowError::Environment(_) | GateflowError::Script { .. })) => {
                    return Ok(StageOutcome::Failed {
                        attempts: store.get_attempts(stage)?,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            };

            match verdict {
                GateVerdict::Accepted { summary, .. } => {
                    return Ok(StageOutcome::Accepted {
                        attempts: store.get_attempts(stage)?,
                        summary,
                    });
                }
                GateVerdict::Rejected { message, decision } if decision.is_exhausted() => {
                    return Ok(StageOutcome::Failed {
                        attempts: store.get_attempts(stage)?,
                        message,
                    });
                }
                GateVerdict::Rejected { message, .. } => {
                    self.context.events
                        .emit("stage.rejected", Some(json!({"stage": stage, "attempt": attempt})))
                        .await;
                    feedback = Some(message);
                }
            }
        }
    }
}

async fn check_blocking(gate: &Arc<dyn StageGate>, raw: String) -> Result<GateVerdict> {
    let gate = Arc::clone(gate);
    tokio::task::spawn_blocking(move || gate.check(&raw))
        .await
        .map_err(|e| GateflowError::Worker(e.to_string()))?
}
