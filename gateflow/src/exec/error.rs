//! Errors raised while parsing or evaluating generated code.

use thiserror::Error;

/// An error raised by the code interpreter.
///
/// Messages read like the ones an analyst would see from the equivalent
/// dataframe library, since they are fed back to the model verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The code could not be tokenized or parsed.
    #[error("{message} (line {line})")]
    Syntax {
        /// 1-based source line.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// A column or key lookup failed.
    #[error("'{0}'")]
    MissingColumn(String),

    /// A name was referenced before being bound.
    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    /// An operation was applied to a value of the wrong type.
    #[error("{0}")]
    Type(String),

    /// A value had the right type but an unusable content.
    #[error("{0}")]
    Value(String),

    /// Any other failure.
    #[error("{0}")]
    Runtime(String),
}

/// Classification of an [`ExecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unparseable code.
    Syntax,
    /// Missing column or key.
    MissingColumn,
    /// Undefined variable or table.
    UndefinedName,
    /// Wrong operand type.
    Type,
    /// Bad value.
    Value,
    /// Anything else.
    Runtime,
}

impl ExecError {
    /// Creates a syntax error.
    #[must_use]
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Creates a type error.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Creates a value error.
    #[must_use]
    pub fn value(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }

    /// Creates a runtime error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Creates an attribute error for `attr` on a value of type `owner`.
    #[must_use]
    pub fn no_attribute(owner: &str, attr: &str) -> Self {
        Self::Runtime(format!("'{owner}' object has no attribute '{attr}'"))
    }

    /// Fills in the line of a syntax error raised during evaluation.
    #[must_use]
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Self::Syntax { line: 0, message } => Self::Syntax { line, message },
            other => other,
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax { .. } => ErrorKind::Syntax,
            Self::MissingColumn(_) => ErrorKind::MissingColumn,
            Self::UndefinedName(_) => ErrorKind::UndefinedName,
            Self::Type(_) => ErrorKind::Type,
            Self::Value(_) => ErrorKind::Value,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }
}

/// Result alias for interpreter operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;
