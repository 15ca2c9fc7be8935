//! The code runner: executes one code block and classifies the outcome.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::exec::error::{ErrorKind, ExecError};
use crate::exec::interpreter::execute;
use crate::exec::namespace::ExecutionNamespace;

/// Result of running one code block.
///
/// Failures never escape the runner; they land here with a message meant
/// for the model that wrote the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Whether the code ran to completion.
    pub success: bool,
    /// The classified failure message.
    pub error: Option<String>,
    /// The failure classification.
    pub kind: Option<ErrorKind>,
    /// Lines printed by the code.
    pub output: Vec<String>,
}

impl RunOutcome {
    fn ok(output: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            kind: None,
            output,
        }
    }

    fn failed(err: &ExecError) -> Self {
        Self {
            success: false,
            error: Some(classify(err)),
            kind: Some(err.kind()),
            output: Vec::new(),
        }
    }
}

/// Turns an interpreter error into the message reported to the model.
#[must_use]
pub fn classify(err: &ExecError) -> String {
    match err {
        ExecError::MissingColumn(column) => format!(
            "Column '{column}' not found. Check column name spelling and ensure it exists in the DataFrame."
        ),
        ExecError::UndefinedName(name) => format!(
            "Variable or table name not found: name '{name}' is not defined. Check spelling and ensure tables are loaded."
        ),
        other => other.to_string(),
    }
}

/// Runs code blocks against an [`ExecutionNamespace`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeRunner;

impl CodeRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs `code` against `ns`, mutating it in place.
    ///
    /// Bindings made before a failing line stay in the namespace.
    pub fn run(&self, code: &str, ns: &mut ExecutionNamespace) -> RunOutcome {
        match execute(code, ns) {
            Ok(output) => {
                debug!(lines = code.lines().count(), "Code block executed");
                RunOutcome::ok(output)
            }
            Err(err) => {
                let outcome = RunOutcome::failed(&err);
                warn!(
                    kind = ?err.kind(),
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "Code block failed"
                );
                outcome
            }
        }
    }

    /// Runs code given as separate lines.
    pub fn run_lines<S: AsRef<str>>(&self, lines: &[S], ns: &mut ExecutionNamespace) -> RunOutcome {
        let code = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
        self.run(&code, ns)
    }
}
