//! Statistical summaries of executed query results.
//!
//! The next model stage only ever sees these summaries, never the rows.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use crate::config::RunLayout;
use crate::core::ArtifactStore;
use crate::errors::{GateflowError, Result};
use crate::exec::table::{sample_variance, Column};
use crate::exec::{Cell, Table};
use crate::guardrail::{ExecutionSnapshot, SnapshotStore};
use crate::pipeline::definition::{QUERY_ANALYSIS, QUERY_BUILDER};

/// Name of the artifact written by [`analyze_and_save`].
pub const QUERY_ANALYSIS_ARTIFACT: &str = "query_analysis";

/// Summary statistics of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Storage type.
    #[serde(rename = "type")]
    pub dtype: String,
    /// Whether any value is missing.
    pub nullable: bool,
    /// Missing values.
    pub null_count: usize,
    /// Distinct present values; `None` when values cannot be compared.
    pub unique_count: Option<usize>,
    /// Smallest value, numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Largest value, numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Mean, numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    /// Sample standard deviation, numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    /// Mean length in characters, text columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_length: Option<f64>,
    /// Longest length in characters, text columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Summary of one result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Rows.
    pub row_count: usize,
    /// Columns.
    pub column_count: usize,
    /// Per column statistics, in column order.
    pub columns: IndexMap<String, ColumnSummary>,
}

/// Distinct present values, or `None` if some value has no identity.
pub(crate) fn distinct_count(column: &Column) -> Option<usize> {
    let mut seen = HashSet::new();
    for cell in column.values.iter().filter(|c| !c.is_null()) {
        seen.insert(cell.key()?);
    }
    Some(seen.len())
}

/// Present values of a numeric column.
pub(crate) fn present_numbers(column: &Column) -> Vec<f64> {
    column.values.iter().filter_map(Cell::as_f64).filter(|v| !v.is_nan()).collect()
}

/// Summarises one column.
#[must_use]
pub fn summarize_column(column: &Column) -> ColumnSummary {
    let null_count = column.null_count();
    let mut summary = ColumnSummary {
        dtype: column.dtype().to_string(),
        nullable: null_count > 0,
        null_count,
        unique_count: distinct_count(column),
        min: None,
        max: None,
        mean: None,
        std: None,
        avg_length: None,
        max_length: None,
    };

    if column.is_numeric() {
        let values = present_numbers(column);
        if !values.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let n = values.len() as f64;
            summary.min = values.iter().copied().reduce(f64::min);
            summary.max = values.iter().copied().reduce(f64::max);
            summary.mean = Some(values.iter().sum::<f64>() / n);
            summary.std = sample_variance(&values).map(f64::sqrt);
        }
    } else {
        let lengths: Option<Vec<usize>> = column
            .values
            .iter()
            .filter(|c| !c.is_null())
            .map(|c| c.as_str().map(|s| s.chars().count()))
            .collect();
        if let Some(lengths) = lengths.filter(|l| !l.is_empty()) {
            #[allow(clippy::cast_precision_loss)]
            let avg = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
            summary.avg_length = Some(avg);
            summary.max_length = lengths.iter().copied().max();
        }
    }
    summary
}

/// Summarises a result table.
#[must_use]
pub fn summarize(table: &Table) -> TableSummary {
    TableSummary {
        row_count: table.row_count(),
        column_count: table.column_count(),
        columns: table
            .columns
            .iter()
            .map(|c| (c.name.clone(), summarize_column(c)))
            .collect(),
    }
}

/// Summary or error of one executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// Sub-analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Analysis type.
    #[serde(rename = "type")]
    pub analysis_type: String,
    /// Result statistics, for successful queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<TableSummary>,
    /// Why there is no result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summaries of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// One entry per sub-analysis.
    pub queries: Vec<QuerySummary>,
}

/// The `query_analysis` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Per analysis summaries.
    pub analyses: Vec<AnalysisSummary>,
}

/// Summarises every result of an execution snapshot.
#[must_use]
pub fn analyze_snapshot(snapshot: &ExecutionSnapshot) -> QueryAnalysis {
    let analyses = snapshot
        .analyses
        .iter()
        .map(|analysis| AnalysisSummary {
            id: analysis.id.clone(),
            title: analysis.title.clone(),
            queries: analysis
                .sub_analyses
                .iter()
                .map(|sub| {
                    let (summary, error) = match (&sub.result, &sub.query_error) {
                        (Some(table), _) => (Some(summarize(table)), None),
                        (None, Some(err)) => (None, Some(err.clone())),
                        (None, None) => (None, Some("No result DataFrame found".to_string())),
                    };
                    QuerySummary {
                        id: sub.id.clone(),
                        title: sub.title.clone(),
                        analysis_type: sub.analysis_type.clone(),
                        analysis: summary,
                        error,
                    }
                })
                .collect(),
        })
        .collect();
    QueryAnalysis { analyses }
}

/// Reads the query snapshot, summarises it and writes `query_analysis.json`.
pub fn analyze_and_save(layout: &RunLayout) -> Result<PathBuf> {
    let snapshot = SnapshotStore::new(layout.snapshots_dir())
        .read(QUERY_BUILDER)
        .map_err(|e| GateflowError::script(QUERY_ANALYSIS, e.to_string()))?;
    let analysis = analyze_snapshot(&snapshot);
    let receipt = ArtifactStore::new(layout.scripts_dir()).write(QUERY_ANALYSIS_ARTIFACT, &analysis)?;
    info!(
        stage = QUERY_ANALYSIS,
        analyses = analysis.analyses.len(),
        path = %receipt.path.display(),
        "Query results analysed"
    );
    Ok(receipt.path)
}
