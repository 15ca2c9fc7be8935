//! The execution namespace shared by code items of one gate invocation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::errors::EnvironmentError;
use crate::exec::chart::Chart;
use crate::exec::table::Table;
use crate::exec::value::{Module, Value};

/// Variable that query code must bind to a table.
pub const RESULT_VAR: &str = "result";

/// Variable that visualization code must bind to a figure.
pub const RESULT_PLOT_VAR: &str = "result_plot";

/// Whether bindings leak from one sub-analysis to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceIsolation {
    /// Later code sees every variable bound by earlier code.
    #[default]
    Shared,
    /// Every sub-analysis starts from the freshly loaded tables.
    RestoreBase,
}

impl fmt::Display for NamespaceIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::RestoreBase => write!(f, "restore_base"),
        }
    }
}

impl FromStr for NamespaceIsolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "restore_base" | "restore-base" | "restore" => Ok(Self::RestoreBase),
            other => Err(format!(
                "unknown namespace isolation '{other}' (expected 'shared' or 'restore_base')"
            )),
        }
    }
}

/// Mutable bindings against which generated code runs.
///
/// Holds the loaded tables, the library handles and every variable bound
/// by executed code, plus the figure that plotting calls draw into.
#[derive(Debug, Clone)]
pub struct ExecutionNamespace {
    vars: IndexMap<String, Value>,
    base: IndexMap<String, Value>,
    tables: Vec<String>,
    figure: Chart,
}

impl Default for ExecutionNamespace {
    fn default() -> Self {
        Self::from_tables(Vec::new())
    }
}

fn library_bindings() -> IndexMap<String, Value> {
    [
        ("pd", Module::Pandas),
        ("np", Module::Numpy),
        ("plt", Module::Pyplot),
        ("sns", Module::Seaborn),
        ("matplotlib", Module::Matplotlib),
        ("seaborn", Module::Seaborn),
    ]
    .into_iter()
    .map(|(name, module)| (name.to_string(), Value::Module(module)))
    .collect()
}

/// The singular alias of a plural table name.
fn singular(name: &str) -> Option<&str> {
    (name.len() > 1).then(|| name.strip_suffix('s')).flatten()
}

/// Lists the `*.csv` files of `data_dir`, sorted, each with its table name.
pub fn csv_files(data_dir: &Path) -> Result<Vec<(String, PathBuf)>, EnvironmentError> {
    let dir_error = |source: std::io::Error| EnvironmentError::DataDir {
        path: data_dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(data_dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        if path.extension().is_some_and(|e| e == "csv") {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, path)
        })
        .collect())
}

/// Reads every `*.csv` file of `data_dir` as a table named by its file stem.
pub fn load_tables(data_dir: &Path) -> Result<Vec<(String, Table)>, EnvironmentError> {
    let files = csv_files(data_dir)?;
    let mut tables = Vec::with_capacity(files.len());
    for (name, path) in files {
        let table = Table::from_csv(&path)
            .map_err(|reason| EnvironmentError::table(name.clone(), &path, reason))?;
        debug!(
            table = %name,
            rows = table.row_count(),
            columns = table.column_count(),
            "Loaded table"
        );
        tables.push((name, table));
    }
    Ok(tables)
}

impl ExecutionNamespace {
    /// Creates a namespace with library handles only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a namespace from already loaded tables.
    ///
    /// Each plural table name also gets a singular alias, unless another
    /// table already owns that name.
    #[must_use]
    pub fn from_tables(tables: Vec<(String, Table)>) -> Self {
        let mut vars = library_bindings();
        let names: Vec<String> = tables.iter().map(|(n, _)| n.clone()).collect();
        for (name, table) in tables {
            if let Some(alias) = singular(&name) {
                if !names.iter().any(|n| n == alias) {
                    vars.insert(alias.to_string(), Value::Table(table.clone()));
                }
            }
            vars.insert(name, Value::Table(table));
        }
        Self {
            base: vars.clone(),
            vars,
            tables: names,
            figure: Chart::new(),
        }
    }

    /// Loads every `*.csv` file of `data_dir`, in file name order.
    ///
    /// An unreadable directory or table fails the whole load.
    pub fn load(data_dir: &Path) -> Result<Self, EnvironmentError> {
        let tables = load_tables(data_dir)?;
        info!(data_dir = %data_dir.display(), tables = tables.len(), "Execution environment ready");
        Ok(Self::from_tables(tables))
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Binds `name`, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Removes a binding.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    /// True if `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Names of the loaded tables, aliases excluded.
    #[must_use]
    pub fn table_names(&self) -> &[String] {
        &self.tables
    }

    /// The current value of a binding, if it is a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        match self.vars.get(name) {
            Some(Value::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// All bound names, in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Drops every binding made by code, restoring the loaded tables.
    pub fn restore_base(&mut self) {
        self.vars = self.base.clone();
        self.figure = Chart::new();
    }

    /// Unbinds the contract variables so a stale value cannot satisfy a
    /// later check.
    pub fn clear_contract_variables(&mut self) {
        self.vars.shift_remove(RESULT_VAR);
        self.vars.shift_remove(RESULT_PLOT_VAR);
    }

    /// Readies the namespace for the next sub-analysis.
    pub fn prepare(&mut self, isolation: NamespaceIsolation) {
        if isolation == NamespaceIsolation::RestoreBase {
            self.restore_base();
        }
        self.clear_contract_variables();
    }

    /// The figure plotting calls draw into.
    #[must_use]
    pub fn figure(&self) -> &Chart {
        &self.figure
    }

    /// Mutable access to the current figure.
    pub fn figure_mut(&mut self) -> &mut Chart {
        &mut self.figure
    }

    /// Starts a new, empty figure.
    pub fn new_figure(&mut self) {
        self.figure = Chart::new();
    }

    /// The `result` binding, if it is a table.
    #[must_use]
    pub fn result_table(&self) -> Option<&Table> {
        self.table(RESULT_VAR)
    }

    /// The figure referenced by `result_plot`, if bound to a figure or axes.
    #[must_use]
    pub fn result_plot(&self) -> Option<&Chart> {
        match self.vars.get(RESULT_PLOT_VAR) {
            Some(Value::Figure | Value::Axes) => Some(&self.figure),
            _ => None,
        }
    }
}
