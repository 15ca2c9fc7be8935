//! Code execution triggered by a validated stage output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::ChartConfig;
use crate::contracts::{AnalysisPlan, SubAnalysisPlan};
use crate::exec::{CodeRunner, ErrorKind, ExecutionNamespace, NamespaceIsolation};
use crate::guardrail::report::{
    format_query_errors, format_visualization_errors, FailureKind, FailureRecord, FailureStep,
};
use crate::guardrail::snapshot::{
    chart_file_name, AnalysisResult, ExecutionSnapshot, SubAnalysisResult, VisualizationResult,
};

/// What a gate does with a validated output besides persisting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Nothing.
    #[default]
    None,
    /// Run the query code of every sub-analysis.
    ExecuteQueries,
    /// Run query code, then plotting code, and save each chart.
    ExecuteQueriesAndVisualizations,
}

impl SideEffect {
    /// True when the output carries code to run.
    #[must_use]
    pub fn runs_code(self) -> bool {
        self != Self::None
    }

    /// True when charts are rendered.
    #[must_use]
    pub fn renders_charts(self) -> bool {
        self == Self::ExecuteQueriesAndVisualizations
    }

    /// Formats the failures the way this side effect reports them.
    #[must_use]
    pub fn format_failures(self, failures: &[FailureRecord]) -> String {
        if self.renders_charts() {
            format_visualization_errors(failures)
        } else {
            format_query_errors(failures)
        }
    }
}

/// Settings for one plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Namespace treatment between sub-analyses.
    pub isolation: NamespaceIsolation,
    /// Where chart images go.
    pub charts_dir: PathBuf,
    /// Chart raster size.
    pub chart: ChartConfig,
}

/// The snapshot and the failures of one plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per sub-analysis results and counts.
    pub snapshot: ExecutionSnapshot,
    /// Failed sub-analyses, in document order.
    pub failures: Vec<FailureRecord>,
}

impl ExecutionReport {
    /// True when every sub-analysis succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every sub-analysis of `plan` in document order against `ns`.
///
/// A failing sub-analysis is recorded and skipped; it never stops the others.
pub fn execute_plan(
    stage: &str,
    plan: &[AnalysisPlan],
    effect: SideEffect,
    ns: &mut ExecutionNamespace,
    settings: &ExecutionSettings,
) -> ExecutionReport {
    let mut exec = PlanExecution {
        runner: CodeRunner::new(),
        effect,
        settings,
        snapshot: ExecutionSnapshot::new(stage, effect.renders_charts()),
        failures: Vec::new(),
    };

    for analysis in plan {
        let mut result = AnalysisResult {
            id: analysis.id.clone(),
            title: analysis.title.clone(),
            context: analysis.context.clone(),
            tables: analysis.tables.clone(),
            sub_analyses: Vec::with_capacity(analysis.items.len()),
        };
        for item in &analysis.items {
            ns.prepare(settings.isolation);
            result.sub_analyses.push(exec.run_item(&analysis.id, item, ns));
        }
        exec.snapshot.analyses.push(result);
    }

    let summary = exec.snapshot.summary;
    info!(
        stage = %stage,
        queries = summary.queries.total,
        failed_queries = summary.queries.failed,
        failed_visualizations = summary.visualizations.map_or(0, |v| v.failed),
        "Plan executed"
    );
    ExecutionReport {
        snapshot: exec.snapshot,
        failures: exec.failures,
    }
}

struct PlanExecution<'a> {
    runner: CodeRunner,
    effect: SideEffect,
    settings: &'a ExecutionSettings,
    snapshot: ExecutionSnapshot,
    failures: Vec<FailureRecord>,
}

impl PlanExecution<'_> {
    fn run_item(
        &mut self,
        analysis_id: &str,
        item: &SubAnalysisPlan,
        ns: &mut ExecutionNamespace,
    ) -> SubAnalysisResult {
        let mut result = SubAnalysisResult {
            id: item.id.clone(),
            title: item.title.clone(),
            why: item.why.clone(),
            answers: item.answers.clone(),
            tables_columns: item.tables_columns.clone(),
            analysis_type: item.analysis_type.clone(),
            code_lines: item.code_lines.clone(),
            query_success: false,
            query_error: None,
            result: None,
            result_shape: None,
            result_columns: None,
            result_dtypes: None,
            visualization: self.effect.renders_charts().then(|| {
                let plan = item.visualization.clone().unwrap_or_default();
                VisualizationResult {
                    code: plan.code,
                    visualization_type: plan.visualization_type,
                    justification: plan.justification,
                    success: false,
                    error: None,
                    image_path: None,
                }
            }),
        };

        if let Err((kind, message)) = self.run_query(item, ns, &mut result) {
            result.query_error = Some(message.clone());
            self.snapshot.summary.queries.failure();
            if let Some(viz) = self.snapshot.summary.visualizations.as_mut() {
                viz.failure();
            }
            self.record(analysis_id, item, FailureStep::Query, kind, message);
            return result;
        }
        self.snapshot.summary.queries.success();

        if let Some(viz) = result.visualization.as_mut() {
            let tally = match self.run_visualization(analysis_id, item, ns, viz) {
                Ok(path) => {
                    viz.success = true;
                    viz.image_path = Some(path);
                    true
                }
                Err((kind, message)) => {
                    viz.error = Some(message.clone());
                    self.record(analysis_id, item, FailureStep::Visualization, kind, message);
                    false
                }
            };
            if let Some(counts) = self.snapshot.summary.visualizations.as_mut() {
                if tally {
                    counts.success();
                } else {
                    counts.failure();
                }
            }
        }
        result
    }

    fn run_query(
        &self,
        item: &SubAnalysisPlan,
        ns: &mut ExecutionNamespace,
        result: &mut SubAnalysisResult,
    ) -> Result<(), (FailureKind, String)> {
        if item.code_lines.iter().all(|l| l.trim().is_empty()) {
            return Err((
                FailureKind::MissingCode,
                "Missing or empty 'code_lines' field".to_string(),
            ));
        }

        let outcome = self.runner.run_lines(&item.code_lines, ns);
        if !outcome.success {
            let kind = FailureKind::Execution(outcome.kind.unwrap_or(ErrorKind::Runtime));
            return Err((kind, outcome.error.unwrap_or_else(|| "Unknown error".to_string())));
        }

        match ns.result_table() {
            Some(table) => {
                result.set_result(table);
                Ok(())
            }
            None => Err((
                FailureKind::NotTable,
                "Result is not a DataFrame (variable 'result' missing or invalid)".to_string(),
            )),
        }
    }

    fn run_visualization(
        &self,
        analysis_id: &str,
        item: &SubAnalysisPlan,
        ns: &mut ExecutionNamespace,
        viz: &VisualizationResult,
    ) -> Result<PathBuf, (FailureKind, String)> {
        if viz.code.iter().all(|l| l.trim().is_empty()) {
            return Err((
                FailureKind::MissingVisualizationCode,
                "Missing or empty 'visualization_code' field".to_string(),
            ));
        }

        ns.new_figure();
        let outcome = self.runner.run_lines(&viz.code, ns);
        if !outcome.success {
            let kind = FailureKind::Execution(outcome.kind.unwrap_or(ErrorKind::Runtime));
            return Err((kind, outcome.error.unwrap_or_else(|| "Unknown error".to_string())));
        }

        let Some(chart) = ns.result_plot() else {
            return Err((
                FailureKind::MissingChart,
                "Variable 'result_plot' not found after visualization code execution".to_string(),
            ));
        };

        let path = self
            .settings
            .charts_dir
            .join(chart_file_name(analysis_id, &item.id));
        let saved = std::fs::create_dir_all(&self.settings.charts_dir)
            .map_err(|e| e.to_string())
            .and_then(|()| chart.save_png(&path, self.settings.chart.width, self.settings.chart.height));
        match saved {
            Ok(()) => {
                debug!(
                    analysis_id = %analysis_id,
                    sub_analysis_id = %item.id,
                    path = %path.display(),
                    "Chart saved"
                );
                Ok(path)
            }
            Err(e) => Err((
                FailureKind::ChartSave,
                format!("Error saving visualization image: {e}"),
            )),
        }
    }

    fn record(
        &mut self,
        analysis_id: &str,
        item: &SubAnalysisPlan,
        step: FailureStep,
        kind: FailureKind,
        message: String,
    ) {
        warn!(
            analysis_id = %analysis_id,
            sub_analysis_id = %item.id,
            step = ?step,
            kind = kind.label(),
            "Sub-analysis failed"
        );
        self.failures.push(FailureRecord {
            analysis_id: analysis_id.to_string(),
            sub_analysis_id: item.id.clone(),
            title: item.title.clone(),
            step,
            kind,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::VisualizationPlan;
    use crate::exec::{Cell, Table};
    use pretty_assertions::assert_eq;

    fn ns() -> ExecutionNamespace {
        let orders = Table::from_pairs(vec![
            (
                "region".into(),
                vec![Cell::Str("north".into()), Cell::Str("south".into()), Cell::Str("north".into())],
            ),
            ("amount".into(), vec![Cell::Float(10.0), Cell::Float(5.0), Cell::Float(7.5)]),
        ])
        .unwrap();
        ExecutionNamespace::from_tables(vec![("orders".into(), orders)])
    }

    fn item(id: &str, code: &[&str], viz: Option<&[&str]>) -> SubAnalysisPlan {
        SubAnalysisPlan {
            id: id.into(),
            title: format!("Item {id}"),
            why: "w".into(),
            answers: vec![],
            tables_columns: vec![],
            analysis_type: "aggregation".into(),
            code_lines: code.iter().map(ToString::to_string).collect(),
            visualization: viz.map(|lines| VisualizationPlan {
                code: lines.iter().map(ToString::to_string).collect(),
                visualization_type: "bar".into(),
                justification: "j".into(),
            }),
        }
    }

    fn plan(items: Vec<SubAnalysisPlan>) -> Vec<AnalysisPlan> {
        vec![AnalysisPlan {
            id: "1".into(),
            title: "Sales".into(),
            context: "c".into(),
            tables: vec!["orders".into()],
            items,
        }]
    }

    fn settings(dir: &std::path::Path, isolation: NamespaceIsolation) -> ExecutionSettings {
        ExecutionSettings {
            isolation,
            charts_dir: dir.join("charts"),
            chart: ChartConfig { width: 200, height: 150 },
        }
    }

    #[test]
    fn test_counts_with_one_query_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bar = ["totals.plot(kind='bar')", "result_plot = plt.gcf()"];
        let items = vec![
            item("1.1", &["totals = orders.groupby('region')['amount'].sum()", "result = totals.reset_index()"], Some(&bar)),
            item("1.2", &["result = orders[orders['missing_col'] > 1]"], Some(&bar)),
            item("1.3", &["totals = orders.groupby('region')['amount'].mean()", "result = totals.reset_index()"], Some(&bar)),
        ];
        let mut ns = ns();
        let report = execute_plan(
            "mono_agent",
            &plan(items),
            SideEffect::ExecuteQueriesAndVisualizations,
            &mut ns,
            &settings(dir.path(), NamespaceIsolation::Shared),
        );

        let summary = report.snapshot.summary;
        assert_eq!((summary.queries.total, summary.queries.succeeded, summary.queries.failed), (3, 2, 1));
        let viz = summary.visualizations.unwrap();
        assert_eq!((viz.total, viz.succeeded, viz.failed), (3, 2, 1));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, FailureStep::Query);
        assert_eq!(report.failures[0].kind, FailureKind::Execution(ErrorKind::MissingColumn));
        assert!(dir.path().join("charts/1_1.1_viz.png").is_file());
        assert!(dir.path().join("charts/1_1.3_viz.png").is_file());

        let subs = &report.snapshot.analyses[0].sub_analyses;
        assert_eq!(subs.len(), 3);
        assert!(subs[1].query_error.as_deref().unwrap().contains("missing_col"));
        assert_eq!(subs[0].result_shape, Some((2, 2)));
    }

    #[test]
    fn test_query_contract_failures() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            item("1.1", &[], None),
            item("1.2", &["x = 1"], None),
            item("1.3", &["result = orders.head(1)"], None),
        ];
        let mut ns = ns();
        let report = execute_plan(
            "query_builder",
            &plan(items),
            SideEffect::ExecuteQueries,
            &mut ns,
            &settings(dir.path(), NamespaceIsolation::Shared),
        );

        let kinds: Vec<_> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::MissingCode, FailureKind::NotTable]);
        assert_eq!(report.snapshot.summary.visualizations, None);
        assert_eq!(report.snapshot.summary.queries.succeeded, 1);
        assert!(report.snapshot.analyses[0].sub_analyses[2].visualization.is_none());
    }

    #[test]
    fn test_stale_result_does_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            item("1.1", &["result = orders"], None),
            item("1.2", &["y = 2"], None),
        ];
        let mut ns = ns();
        let report = execute_plan(
            "query_builder",
            &plan(items),
            SideEffect::ExecuteQueries,
            &mut ns,
            &settings(dir.path(), NamespaceIsolation::Shared),
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].sub_analysis_id, "1.2");
    }

    #[test]
    fn test_isolation_modes() {
        let dir = tempfile::tempdir().unwrap();
        let items = || {
            vec![
                item("1.1", &["big = orders[orders['amount'] > 6]", "result = big"], None),
                item("1.2", &["result = big.head(1)"], None),
            ]
        };

        let mut shared = ns();
        let report = execute_plan(
            "query_builder",
            &plan(items()),
            SideEffect::ExecuteQueries,
            &mut shared,
            &settings(dir.path(), NamespaceIsolation::Shared),
        );
        assert!(report.is_clean());

        let mut isolated = ns();
        let report = execute_plan(
            "query_builder",
            &plan(items()),
            SideEffect::ExecuteQueries,
            &mut isolated,
            &settings(dir.path(), NamespaceIsolation::RestoreBase),
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].kind,
            FailureKind::Execution(ErrorKind::UndefinedName)
        );
    }

    #[test]
    fn test_visualization_contract_failures() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            item("1.1", &["result = orders"], Some(&[])),
            item("1.2", &["result = orders"], Some(&["plt.bar(result['region'], result['amount'])"])),
        ];
        let mut ns = ns();
        let report = execute_plan(
            "visualization_designer",
            &plan(items),
            SideEffect::ExecuteQueriesAndVisualizations,
            &mut ns,
            &settings(dir.path(), NamespaceIsolation::Shared),
        );

        let kinds: Vec<_> = report.failures.iter().map(|f| (f.step, f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (FailureStep::Visualization, FailureKind::MissingVisualizationCode),
                (FailureStep::Visualization, FailureKind::MissingChart),
            ]
        );
        let message = SideEffect::ExecuteQueriesAndVisualizations.format_failures(&report.failures);
        assert!(message.starts_with("VISUALIZATION ERROR (2 failures)"));
        assert_eq!(report.snapshot.summary.queries.succeeded, 2);
    }
}
