//! Structured outputs expected from each model stage.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Raw statistics of one column, extracted before any interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMetadata {
    /// Data type of the column.
    #[serde(rename = "type")]
    pub dtype: String,
    /// Whether the column contains null values.
    pub nullable: bool,
    /// Whether all values are unique.
    pub unique: bool,
    /// Number of null values.
    pub null_count: u64,
    /// Number of distinct values.
    pub unique_count: u64,
    /// Minimum value, numeric columns only.
    #[serde(default)]
    pub min: Option<f64>,
    /// Maximum value, numeric columns only.
    #[serde(default)]
    pub max: Option<f64>,
    /// Mean value, numeric columns only.
    #[serde(default)]
    pub mean: Option<f64>,
    /// Sample standard deviation, numeric columns only.
    #[serde(default)]
    pub std: Option<f64>,
}

/// Raw metadata of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableMetadata {
    /// Number of rows.
    pub row_count: u64,
    /// Column metadata by column name.
    pub columns: IndexMap<String, ColumnMetadata>,
    /// Primary key column.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Foreign key columns.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
}

/// A reference from a foreign key column to another table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    /// Source table name.
    pub from_table: String,
    /// Source column.
    pub from_column: String,
    /// Target table name.
    pub to_table: String,
    /// Target column.
    pub to_column: String,
}

/// Raw schema metadata of the whole dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawSchemaMetadata {
    /// Data source type.
    pub source_type: String,
    /// Number of tables.
    pub number_of_tables: u64,
    /// Table metadata by table name.
    pub tables: IndexMap<String, TableMetadata>,
    /// Detected relationships.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// A column with its business meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSchema {
    /// The raw statistics.
    #[serde(flatten)]
    pub metadata: ColumnMetadata,
    /// Business meaning of the column.
    pub semantic_description: String,
}

/// A table with its role in the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableSchema {
    /// Number of rows.
    pub row_count: u64,
    /// Column schemas by column name.
    pub columns: IndexMap<String, ColumnSchema>,
    /// Primary key column.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Foreign key columns.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    /// Purpose of the table.
    pub role: String,
    /// What the table contains.
    pub description: String,
}

/// Output of `schema_interpreter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedMetadata {
    /// Data source type.
    pub source_type: String,
    /// Number of tables.
    pub number_of_tables: u64,
    /// Table schemas by table name.
    pub tables: IndexMap<String, TableSchema>,
    /// Table relationships.
    pub relationships: Vec<Relationship>,
    /// Business domain.
    pub database_domain: String,
    /// What the dataset is for.
    pub database_description: String,
}

/// One planned sub-analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BusinessSubAnalysis {
    /// Sub-analysis id, e.g. `1.2`.
    pub id: String,
    /// Title.
    pub title: String,
    /// Why it is valuable.
    pub why: String,
    /// Questions it answers.
    pub answers: Vec<String>,
    /// Required tables and columns.
    pub tables_columns: Vec<String>,
}

/// One planned analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BusinessAnalysisItem {
    /// Analysis id, e.g. `1`.
    pub id: String,
    /// Title.
    pub title: String,
    /// Business context.
    pub context: String,
    /// Tables involved.
    pub tables: Vec<String>,
    /// Its sub-analyses.
    pub sub_analyses: Vec<BusinessSubAnalysis>,
}

/// Output of `business_analyst`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BusinessAnalysis {
    /// All planned analyses.
    pub analyses: Vec<BusinessAnalysisItem>,
}

/// A sub-analysis with its query code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuerySubAnalysis {
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
    /// Analysis type (aggregation, segmentation, ...).
    #[serde(rename = "type")]
    pub analysis_type: String,
    /// Query code, one line per entry.
    pub code_lines: Vec<String>,
}

/// An analysis whose sub-analyses carry query code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryAnalysis {
    /// Analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Business context.
    pub context: String,
    /// Tables involved.
    pub tables: Vec<String>,
    /// Sub-analyses with code.
    pub sub_analyses: Vec<QuerySubAnalysis>,
}

/// Output of `query_builder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Queries {
    /// All analyses with query code.
    pub analyses: Vec<QueryAnalysis>,
}

/// A sub-analysis with query and visualization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VisualizationSubAnalysis {
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
    #[serde(rename = "type")]
    pub analysis_type: String,
    /// Query code, one line per entry.
    pub code_lines: Vec<String>,
    /// Plotting code, one line per entry.
    pub visualization_code: Vec<String>,
    /// Chart type (bar, line, pie, ...).
    pub visualization_type: String,
    /// Why this chart type was chosen.
    pub justification: String,
}

/// An analysis whose sub-analyses carry plotting code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VisualizationAnalysis {
    /// Analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Business context.
    pub context: String,
    /// Tables involved.
    pub tables: Vec<String>,
    /// Sub-analyses with code.
    pub sub_analyses: Vec<VisualizationSubAnalysis>,
}

/// Output of `visualization_designer` and `mono_agent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Visualizations {
    /// All analyses with plotting code.
    pub analyses: Vec<VisualizationAnalysis>,
}

/// Outcome of the confidentiality probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Verdict {
    /// No real data exposed.
    #[serde(rename = "PASS")]
    Pass,
    /// Real data revealed.
    #[serde(rename = "FAIL")]
    Fail,
}

/// One probing question and its assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidentialityQuestion {
    /// Question id, e.g. `Q1`.
    pub id: String,
    /// The probing question.
    pub question: String,
    /// The agent's answer.
    pub answer: String,
    /// Whether the answer reveals actual data values.
    pub reveals_data: bool,
    /// Why the answer passes or fails.
    pub explanation: String,
}

/// Output of `confidentiality_tester`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidentialityTest {
    /// Overall verdict.
    pub verdict: Verdict,
    /// Summary of the results.
    pub summary: String,
    /// Questions that exposed real data.
    pub data_exposure_count: u64,
    /// Questions asked.
    pub total_questions: u64,
    /// Every question with its assessment.
    pub questions: Vec<ConfidentialityQuestion>,
}
