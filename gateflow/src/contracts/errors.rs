//! Contract violation types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-readable class of a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// A required field is absent.
    Missing,
    /// Expected a string.
    StringType,
    /// Expected an integer.
    IntType,
    /// Expected a number.
    NumberType,
    /// Expected a boolean.
    BoolType,
    /// Expected an array.
    ListType,
    /// Expected an object.
    DictType,
    /// Right type, unusable value.
    InvalidValue,
    /// Matches none of several allowed types.
    InvalidType,
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "missing field",
            Self::StringType => "must be a string",
            Self::IntType => "must be an integer",
            Self::NumberType => "must be a number",
            Self::BoolType => "must be a boolean",
            Self::ListType => "must be a list",
            Self::DictType => "must be an object",
            Self::InvalidValue => "invalid value",
            Self::InvalidType => "invalid type",
        };
        write!(f, "{text}")
    }
}

/// One schema violation found in a model's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// Path segments from the document root to the offending field.
    pub path: Vec<String>,
    /// What kind of violation it is.
    pub category: IssueCategory,
    /// The validator's own description.
    pub message: String,
}

impl SchemaIssue {
    /// Creates an issue.
    #[must_use]
    pub fn new(path: Vec<String>, category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            path,
            category,
            message: message.into(),
        }
    }

    /// The path joined for display, `(root)` for the document itself.
    #[must_use]
    pub fn location(&self) -> String {
        if self.path.is_empty() {
            "(root)".to_string()
        } else {
            self.path.join(" → ")
        }
    }
}

/// Why a model's output was rejected before any side effect ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractViolation {
    /// The text is not valid JSON.
    Malformed {
        /// 1-based line of the syntax error.
        line: usize,
        /// 1-based column of the syntax error.
        column: usize,
        /// The parser's description.
        detail: String,
    },
    /// The JSON does not match the stage schema.
    Schema(Vec<SchemaIssue>),
}

impl ContractViolation {
    /// Builds a malformed-input violation from a parser error.
    #[must_use]
    pub fn malformed(err: &serde_json::Error) -> Self {
        let full = err.to_string();
        let detail = full
            .rsplit_once(" at line ")
            .map_or(full.as_str(), |(head, _)| head)
            .to_string();
        Self::Malformed {
            line: err.line(),
            column: err.column(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_joins_path() {
        let issue = SchemaIssue::new(
            vec!["analyses".into(), "0".into(), "title".into()],
            IssueCategory::Missing,
            "\"title\" is a required property",
        );
        assert_eq!(issue.location(), "analyses → 0 → title");
        assert_eq!(SchemaIssue::new(vec![], IssueCategory::DictType, "x").location(), "(root)");
    }

    #[test]
    fn test_malformed_strips_position_suffix() {
        let err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let ContractViolation::Malformed { line, column, detail } = ContractViolation::malformed(&err) else {
            panic!("expected a malformed violation");
        };
        assert_eq!(line, 1);
        assert_eq!(column, 2);
        assert_eq!(detail, "key must be a string");
    }
}
