//! Failure records and the messages returned to the model on retry.
//!
//! Every message lists at most [`MAX_LISTED`] problems and says how many were
//! left out, then closes with advice derived from what went wrong.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::contracts::{ContractViolation, SchemaIssue};
use crate::exec::ErrorKind;

/// Problems listed in full before the rest is summarised.
pub const MAX_LISTED: usize = 5;

/// Error messages longer than this are cut in execution reports.
pub const MAX_MESSAGE_CHARS: usize = 150;

/// Which half of a sub-analysis failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStep {
    /// The query code or its `result`.
    Query,
    /// The plotting code, its `result_plot` or the saved image.
    Visualization,
}

/// What went wrong with a sub-analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No query code.
    MissingCode,
    /// Query or plotting code raised.
    Execution(ErrorKind),
    /// `result` is absent or not a table.
    NotTable,
    /// No plotting code.
    MissingVisualizationCode,
    /// `result_plot` is absent or not a figure.
    MissingChart,
    /// The chart image could not be written.
    ChartSave,
}

impl FailureKind {
    /// Label shown in query execution reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MissingCode => "missing_code",
            Self::Execution(_) => "execution_error",
            Self::NotTable => "not_dataframe",
            Self::MissingVisualizationCode => "missing_visualization_code",
            Self::MissingChart => "missing_result_plot",
            Self::ChartSave => "chart_save_error",
        }
    }
}

/// One failed sub-analysis of a gate invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Parent analysis id.
    pub analysis_id: String,
    /// Sub-analysis id.
    pub sub_analysis_id: String,
    /// Sub-analysis title.
    pub title: String,
    /// The failing step.
    pub step: FailureStep,
    /// The failure classification.
    pub kind: FailureKind,
    /// The message reported to the model.
    pub message: String,
}

impl FailureRecord {
    fn location(&self) -> String {
        format!(
            "Analysis {} → Sub-analysis {}",
            self.analysis_id, self.sub_analysis_id
        )
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_CHARS {
        let cut: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

/// Formats a parse or schema violation.
#[must_use]
pub fn format_violation(violation: &ContractViolation) -> String {
    match violation {
        ContractViolation::Malformed {
            line,
            column,
            detail,
        } => format_json_error(*line, *column, detail),
        ContractViolation::Schema(issues) => format_validation_error(issues),
    }
}

/// Formats a JSON syntax error.
#[must_use]
pub fn format_json_error(line: usize, column: usize, detail: &str) -> String {
    format!(
        "JSON ERROR\n\nProblem: Malformed JSON at line {line}, column {column}.\nDetail: {detail}\n\nFix: Check JSON syntax (commas, quotes, braces)."
    )
}

/// Formats schema issues.
#[must_use]
pub fn format_validation_error(issues: &[SchemaIssue]) -> String {
    if issues.is_empty() {
        return "Unknown validation error".to_string();
    }

    let total = issues.len();
    let mut out = format!(
        "VALIDATION ERROR ({total} issue{})\n\nIncorrect fields:",
        if total > 1 { "s" } else { "" }
    );
    for issue in issues.iter().take(MAX_LISTED) {
        let category = issue.category.to_string();
        let _ = write!(out, "\n  • {}: {category}", issue.location());
        if !issue.message.is_empty() && issue.message != category {
            let _ = write!(out, "\n    → {}", issue.message);
        }
    }
    if total > MAX_LISTED {
        let _ = write!(out, "\n  ... and {} more errors", total - MAX_LISTED);
    }
    out.push_str("\n\nFix: Check that all required fields are present with correct types.");
    out
}

/// Formats the failures of a query-only gate.
#[must_use]
pub fn format_query_errors(failures: &[FailureRecord]) -> String {
    if failures.is_empty() {
        return "All queries executed successfully.".to_string();
    }

    let total = failures.len();
    let mut out = format!(
        "EXECUTION ERROR ({total} quer{} failed)\n",
        if total > 1 { "ies" } else { "y" }
    );
    for failure in failures.iter().take(MAX_LISTED) {
        let _ = write!(
            out,
            "\n  [{}] \"{}\"\n    Type: {}\n    Error: {}",
            failure.location(),
            failure.title,
            failure.kind.label(),
            truncate(&failure.message)
        );
    }
    if total > MAX_LISTED {
        let _ = write!(out, "\n\n  ... and {} more failed queries", total - MAX_LISTED);
    }
    let _ = write!(out, "\n\nTo fix:\n{}", query_advice(failures));
    out
}

/// Formats the failures of a query-and-chart gate.
#[must_use]
pub fn format_visualization_errors(failures: &[FailureRecord]) -> String {
    if failures.is_empty() {
        return "All visualizations executed successfully.".to_string();
    }

    let total = failures.len();
    let mut out = format!(
        "VISUALIZATION ERROR ({total} failure{})\n",
        if total > 1 { "s" } else { "" }
    );
    for failure in failures.iter().take(MAX_LISTED) {
        let step = match failure.step {
            FailureStep::Query => "Query",
            FailureStep::Visualization => "Visualization",
        };
        let _ = write!(
            out,
            "\n  [{}] \"{}\"\n    Step: {step}\n    Error: {}",
            failure.location(),
            failure.title,
            truncate(&failure.message)
        );
    }
    if total > MAX_LISTED {
        let _ = write!(out, "\n\n  ... and {} more errors", total - MAX_LISTED);
    }
    let _ = write!(out, "\n\nTo fix:\n{}", visualization_advice(failures));
    out
}

fn query_advice(failures: &[FailureRecord]) -> String {
    let has = |kind: FailureKind| failures.iter().any(|f| f.kind == kind);
    let mut advice = Vec::new();
    if has(FailureKind::MissingCode) {
        advice.push("- Add 'code_lines' field with analysis code for each sub-analysis");
    }
    if has(FailureKind::Execution(ErrorKind::Syntax)) {
        advice.push("- Check code syntax (parentheses, brackets, quotes)");
    }
    if has(FailureKind::Execution(ErrorKind::UndefinedName)) {
        advice.push("- Check variable and table names (exact spelling)");
    }
    if has(FailureKind::Execution(ErrorKind::MissingColumn)) {
        advice.push("- Check column names (must exist in tables)");
    }
    if has(FailureKind::NotTable) {
        advice.push("- Ensure 'result' variable contains a DataFrame");
    }
    if advice.is_empty() {
        advice.push("- Review the code of each failed sub-analysis");
    }
    advice.join("\n")
}

fn visualization_advice(failures: &[FailureRecord]) -> String {
    let mut advice = Vec::new();
    if failures.iter().any(|f| f.step == FailureStep::Query) {
        advice.push("- Fix query errors first (visualizations depend on data)");
    }

    let chart_kinds: Vec<FailureKind> = failures
        .iter()
        .filter(|f| f.step == FailureStep::Visualization)
        .map(|f| f.kind)
        .collect();
    if !chart_kinds.is_empty() {
        let missing_code = chart_kinds.contains(&FailureKind::MissingVisualizationCode);
        let missing_chart = chart_kinds.contains(&FailureKind::MissingChart);
        if missing_code {
            advice.push("- Add 'visualization_code' field with matplotlib code");
        }
        if missing_chart {
            advice.push("- Ensure code creates a 'result_plot' variable with the figure");
        }
        if !missing_code && !missing_chart {
            advice.push("- Check matplotlib visualization code (syntax, parameters)");
        }
    }

    if advice.is_empty() {
        advice.push("- Review the code for each failed sub-analysis");
    }
    advice.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IssueCategory;
    use pretty_assertions::assert_eq;

    fn failure(sub: &str, step: FailureStep, kind: FailureKind, message: &str) -> FailureRecord {
        FailureRecord {
            analysis_id: "1".into(),
            sub_analysis_id: sub.into(),
            title: format!("Sub {sub}"),
            step,
            kind,
            message: message.into(),
        }
    }

    #[test]
    fn test_json_error_layout() {
        let message = format_json_error(1, 2, "key must be a string");
        assert_eq!(
            message,
            "JSON ERROR\n\nProblem: Malformed JSON at line 1, column 2.\nDetail: key must be a string\n\nFix: Check JSON syntax (commas, quotes, braces)."
        );
    }

    #[test]
    fn test_validation_error_caps_listed_issues() {
        let issues: Vec<SchemaIssue> = (0..7)
            .map(|i| {
                SchemaIssue::new(
                    vec!["analyses".into(), i.to_string(), "title".into()],
                    IssueCategory::Missing,
                    "\"title\" is a required property",
                )
            })
            .collect();
        let message = format_validation_error(&issues);

        assert!(message.starts_with("VALIDATION ERROR (7 issues)\n\nIncorrect fields:"));
        assert_eq!(message.matches("  • ").count(), 5);
        assert!(message.contains("  • analyses → 0 → title: missing field\n    → \"title\" is a required property"));
        assert!(message.contains("... and 2 more errors"));
        assert!(message.ends_with("Fix: Check that all required fields are present with correct types."));
    }

    #[test]
    fn test_single_issue_is_singular() {
        let issues = vec![SchemaIssue::new(vec![], IssueCategory::DictType, "must be an object")];
        let message = format_validation_error(&issues);
        assert!(message.starts_with("VALIDATION ERROR (1 issue)"));
        assert!(!message.contains("    →"));
    }

    #[test]
    fn test_query_errors_truncate_and_advise() {
        let long = "x".repeat(200);
        let failures = vec![
            failure("1.1", FailureStep::Query, FailureKind::MissingCode, "Missing or empty 'code_lines' field"),
            failure("1.2", FailureStep::Query, FailureKind::Execution(ErrorKind::MissingColumn), &long),
        ];
        let message = format_query_errors(&failures);

        assert!(message.starts_with("EXECUTION ERROR (2 queries failed)"));
        assert!(message.contains("[Analysis 1 → Sub-analysis 1.1] \"Sub 1.1\"\n    Type: missing_code"));
        assert!(message.contains(&format!("Error: {}...", "x".repeat(150))));
        assert!(message.contains("- Add 'code_lines' field"));
        assert!(message.contains("- Check column names (must exist in tables)"));
        assert!(!message.contains("more failed queries"));
    }

    #[test]
    fn test_query_errors_list_at_most_five() {
        let failures: Vec<_> = (1..=7)
            .map(|i| {
                failure(
                    &format!("1.{i}"),
                    FailureStep::Query,
                    FailureKind::Execution(ErrorKind::Runtime),
                    "boom",
                )
            })
            .collect();
        let message = format_query_errors(&failures);

        assert!(message.starts_with("EXECUTION ERROR (7 queries failed)"));
        assert_eq!(message.matches("    Type: ").count(), 5);
        assert!(message.contains("Sub-analysis 1.5]"));
        assert!(!message.contains("Sub-analysis 1.6]"));
        assert!(message.contains("\n\n  ... and 2 more failed queries\n\nTo fix:"));
    }

    #[test]
    fn test_query_errors_generic_advice() {
        let failures = vec![failure(
            "2.1",
            FailureStep::Query,
            FailureKind::Execution(ErrorKind::Runtime),
            "division by zero",
        )];
        let message = format_query_errors(&failures);
        assert!(message.starts_with("EXECUTION ERROR (1 query failed)"));
        assert!(message.ends_with("To fix:\n- Review the code of each failed sub-analysis"));
    }

    #[test]
    fn test_visualization_errors_list_steps() {
        let mut failures = vec![
            failure("1.1", FailureStep::Query, FailureKind::NotTable, "Result is not a DataFrame"),
            failure("1.2", FailureStep::Visualization, FailureKind::MissingChart, "Variable 'result_plot' not found"),
        ];
        for i in 3..8 {
            failures.push(failure(
                &format!("1.{i}"),
                FailureStep::Visualization,
                FailureKind::Execution(ErrorKind::Runtime),
                "boom",
            ));
        }
        let message = format_visualization_errors(&failures);

        assert!(message.starts_with("VISUALIZATION ERROR (7 failures)"));
        assert!(message.contains("Step: Query"));
        assert!(message.contains("Step: Visualization"));
        assert!(message.contains("... and 2 more errors"));
        assert!(message.contains("- Fix query errors first"));
        assert!(message.contains("- Ensure code creates a 'result_plot' variable"));
        assert!(!message.contains("- Check matplotlib visualization code"));
    }

    #[test]
    fn test_visualization_generic_advice() {
        let failures = vec![failure(
            "1.1",
            FailureStep::Visualization,
            FailureKind::Execution(ErrorKind::Type),
            "bad",
        )];
        let message = format_visualization_errors(&failures);
        assert!(message.ends_with("To fix:\n- Check matplotlib visualization code (syntax, parameters)"));
    }
}
