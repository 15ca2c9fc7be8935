//! Execution of generated analysis code.
//!
//! Generated code is a small dataframe-flavoured language. It is tokenized,
//! parsed into statements and evaluated against an [`ExecutionNamespace`]
//! holding the loaded tables, the library handles and every binding made by
//! earlier code. [`CodeRunner`] is the boundary the gate uses: it never
//! returns an error, only a classified [`RunOutcome`].

mod builtins;
pub mod chart;
pub mod error;
mod interpreter;
mod lexer;
mod methods;
mod modules;
pub mod namespace;
mod ops;
mod parser;
mod plotting;
pub mod runner;
pub mod table;
pub mod value;

pub use chart::{Chart, ChartKind, ChartSeries};
pub use error::{ErrorKind, ExecError, ExecResult};
pub use interpreter::execute;
pub use namespace::{csv_files, load_tables, ExecutionNamespace, NamespaceIsolation, RESULT_PLOT_VAR, RESULT_VAR};
pub use runner::{classify, CodeRunner, RunOutcome};
pub use table::{Column, Table};
pub use value::{Cell, Value};
