//! Execution snapshots: per sub-analysis results of a code-bearing gate.
//!
//! Snapshots are binary encoded with `bincode` and read back by the query
//! analysis script and by whatever renders a run.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

use crate::errors::{GateflowError, Result};
use crate::exec::Table;

static UNSAFE_KEY_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").ok());

/// File name of the chart rendered for one sub-analysis.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced so that ids can never
/// escape the chart directory.
#[must_use]
pub fn chart_file_name(analysis_id: &str, sub_analysis_id: &str) -> String {
    let clean = |id: &str| match UNSAFE_KEY_CHARS.as_ref() {
        Some(re) => re.replace_all(id, "_").into_owned(),
        None => id.to_string(),
    };
    format!("{}_{}_viz.png", clean(analysis_id), clean(sub_analysis_id))
}

/// Totals for one kind of step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Steps attempted.
    pub total: u32,
    /// Steps that succeeded.
    pub succeeded: u32,
    /// Steps that failed.
    pub failed: u32,
}

impl Tally {
    /// Counts a success.
    pub fn success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    /// Counts a failure.
    pub fn failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }
}

/// Aggregate counts of a gate invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Query steps.
    pub queries: Tally,
    /// Chart steps, for gates that render charts.
    pub visualizations: Option<Tally>,
}

/// Outcome of the plotting half of a sub-analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationResult {
    /// The plotting code.
    pub code: Vec<String>,
    /// Chart type chosen by the model.
    pub visualization_type: String,
    /// Why it chose it.
    pub justification: String,
    /// Whether a chart image was written.
    pub success: bool,
    /// Why it was not.
    pub error: Option<String>,
    /// Where the image was written.
    pub image_path: Option<PathBuf>,
}

/// Outcome of one sub-analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAnalysisResult {
    /// Sub-analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Why it is valuable.
    pub why: String,
    /// Questions it answers.
    pub answers: Vec<String>,
    /// Required tables and columns.
    pub tables_columns: Vec<String>,
    /// Analysis type.
    pub analysis_type: String,
    /// The query code.
    pub code_lines: Vec<String>,
    /// Whether the query produced a table.
    pub query_success: bool,
    /// Why it did not.
    pub query_error: Option<String>,
    /// The table bound to `result`.
    pub result: Option<Table>,
    /// Rows and columns of the result.
    pub result_shape: Option<(usize, usize)>,
    /// Result column names.
    pub result_columns: Option<Vec<String>>,
    /// Result column types.
    pub result_dtypes: Option<IndexMap<String, String>>,
    /// The chart half, when the gate renders charts.
    pub visualization: Option<VisualizationResult>,
}

impl SubAnalysisResult {
    /// Records the result table and its shape.
    pub fn set_result(&mut self, table: &Table) {
        self.query_success = true;
        self.result_shape = Some((table.row_count(), table.column_count()));
        self.result_columns = Some(table.column_names());
        self.result_dtypes = Some(
            table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.dtype().to_string()))
                .collect(),
        );
        self.result = Some(table.clone());
    }
}

/// Outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Business context.
    pub context: String,
    /// Tables involved.
    pub tables: Vec<String>,
    /// Every sub-analysis, failed ones included.
    pub sub_analyses: Vec<SubAnalysisResult>,
}

/// Everything a code-bearing gate executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// The stage that produced it.
    pub stage: String,
    /// Per analysis results, in document order.
    pub analyses: Vec<AnalysisResult>,
    /// Aggregate counts.
    pub summary: SnapshotSummary,
}

impl ExecutionSnapshot {
    /// Creates an empty snapshot for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>, with_charts: bool) -> Self {
        Self {
            stage: stage.into(),
            analyses: Vec::new(),
            summary: SnapshotSummary {
                queries: Tally::default(),
                visualizations: with_charts.then(Tally::default),
            },
        }
    }

    /// Iterates every sub-analysis result.
    pub fn sub_analyses(&self) -> impl Iterator<Item = (&AnalysisResult, &SubAnalysisResult)> {
        self.analyses
            .iter()
            .flat_map(|a| a.sub_analyses.iter().map(move |s| (a, s)))
    }

    /// Encodes the snapshot.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| GateflowError::Snapshot(e.to_string()))
    }

    /// Decodes a snapshot.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (snapshot, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| GateflowError::Snapshot(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Directory of execution snapshots, one file per stage.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the snapshot of `stage`.
    #[must_use]
    pub fn path_for(&self, stage: &str) -> PathBuf {
        self.root.join(format!("{stage}_results.bin"))
    }

    /// Writes a snapshot, replacing the previous one.
    pub fn write(&self, snapshot: &ExecutionSnapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let bytes = snapshot.encode()?;
        let path = self.path_for(&snapshot.stage);
        fs::write(&path, &bytes)?;
        debug!(stage = %snapshot.stage, bytes = bytes.len(), "Execution snapshot written");
        Ok(path)
    }

    /// Reads the snapshot of `stage`.
    pub fn read(&self, stage: &str) -> Result<ExecutionSnapshot> {
        let path = self.path_for(stage);
        let bytes = fs::read(&path)
            .map_err(|e| GateflowError::Snapshot(format!("{}: {e}", path.display())))?;
        ExecutionSnapshot::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Cell;
    use pretty_assertions::assert_eq;

    fn sub(id: &str) -> SubAnalysisResult {
        SubAnalysisResult {
            id: id.into(),
            title: "t".into(),
            why: "w".into(),
            answers: vec![],
            tables_columns: vec![],
            analysis_type: "aggregation".into(),
            code_lines: vec!["result = orders".into()],
            query_success: false,
            query_error: None,
            result: None,
            result_shape: None,
            result_columns: None,
            result_dtypes: None,
            visualization: None,
        }
    }

    #[test]
    fn test_chart_file_name() {
        assert_eq!(chart_file_name("1", "1.2"), "1_1.2_viz.png");
        assert_eq!(chart_file_name("../a", "b c"), ".._a_b_c_viz.png");
    }

    #[test]
    fn test_set_result_records_shape() {
        let table = Table::from_pairs(vec![
            ("region".into(), vec![Cell::Str("n".into()), Cell::Str("s".into())]),
            ("total".into(), vec![Cell::Float(1.5), Cell::Float(2.0)]),
        ])
        .unwrap();
        let mut result = sub("1.1");
        result.set_result(&table);

        assert!(result.query_success);
        assert_eq!(result.result_shape, Some((2, 2)));
        assert_eq!(result.result_columns, Some(vec!["region".to_string(), "total".to_string()]));
        assert_eq!(result.result_dtypes.unwrap()["total"], "float64");
    }

    #[test]
    fn test_store_writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let mut snapshot = ExecutionSnapshot::new("query_builder", false);
        let mut ok = sub("1.1");
        ok.set_result(&Table::from_pairs(vec![("n".into(), vec![Cell::Int(3)])]).unwrap());
        let mut failed = sub("1.2");
        failed.query_error = Some("boom".into());
        snapshot.analyses.push(AnalysisResult {
            id: "1".into(),
            title: "Sales".into(),
            context: "c".into(),
            tables: vec!["orders".into()],
            sub_analyses: vec![ok, failed],
        });
        snapshot.summary.queries.success();
        snapshot.summary.queries.failure();

        let path = store.write(&snapshot).unwrap();
        assert!(path.ends_with("query_builder_results.bin"));
        let back = store.read("query_builder").unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.sub_analyses().count(), 2);
        assert_eq!(back.summary.visualizations, None);
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SnapshotStore::new(dir.path()).read("mono_agent").unwrap_err();
        assert!(matches!(err, GateflowError::Snapshot(_)));
    }
}
