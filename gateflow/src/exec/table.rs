//! Columns, tables and grouping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::value::{Cell, CellKey};

/// Strings read as missing values when loading a file.
const NA_VALUES: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A", "<NA>",
];

/// Row labels carried by a column produced by grouping or counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// One name per level.
    pub names: Vec<String>,
    /// One label tuple per row.
    pub labels: Vec<Vec<Cell>>,
}

impl Index {
    fn take(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            labels: rows.iter().map(|&r| self.labels[r].clone()).collect(),
        }
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// The cells.
    pub values: Vec<Cell>,
    /// Row labels, present on grouped results.
    pub index: Option<Index>,
}

/// Aggregation functions shared by columns and group-bys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Sum of values.
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Median.
    Median,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Non-missing count.
    Count,
    /// Sample standard deviation.
    Std,
    /// Sample variance.
    Var,
    /// Distinct non-missing values.
    Nunique,
    /// First non-missing value.
    First,
    /// Last non-missing value.
    Last,
    /// Row count including missing values.
    Size,
}

impl AggFunc {
    /// Parses an aggregation name.
    pub fn parse(name: &str) -> ExecResult<Self> {
        Ok(match name {
            "sum" => Self::Sum,
            "mean" | "average" => Self::Mean,
            "median" => Self::Median,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "std" => Self::Std,
            "var" => Self::Var,
            "nunique" => Self::Nunique,
            "first" => Self::First,
            "last" => Self::Last,
            "size" => Self::Size,
            other => {
                return Err(ExecError::value(format!(
                    "'{other}' is not a valid function for aggregation"
                )))
            }
        })
    }

    /// The canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Std => "std",
            Self::Var => "var",
            Self::Nunique => "nunique",
            Self::First => "first",
            Self::Last => "last",
            Self::Size => "size",
        }
    }

    /// True for functions that need numeric input.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Sum | Self::Mean | Self::Median | Self::Std | Self::Var
        )
    }
}

/// Non-missing numeric values of `cells`, failing on text.
pub fn numeric_values(cells: &[Cell], op: &str) -> ExecResult<Vec<f64>> {
    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        if cell.is_null() {
            continue;
        }
        match cell.as_f64() {
            Some(v) => out.push(v),
            None => {
                return Err(ExecError::type_error(format!(
                    "Could not apply '{op}' to a value of type '{}'",
                    cell.type_name()
                )))
            }
        }
    }
    Ok(out)
}

/// Sample variance with one degree of freedom; `None` below two values.
#[must_use]
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn float_or_null(v: Option<f64>) -> Cell {
    v.map_or(Cell::Null, Cell::Float)
}

/// Reduces `cells` with `func`.
pub fn aggregate(cells: &[Cell], func: AggFunc) -> ExecResult<Cell> {
    let present = || cells.iter().filter(|c| !c.is_null());
    Ok(match func {
        AggFunc::Sum => {
            let all_int = present().all(|c| matches!(c, Cell::Int(_) | Cell::Bool(_)));
            if all_int {
                let mut total: i64 = 0;
                for c in present() {
                    total = total.saturating_add(c.as_i64().unwrap_or(0));
                }
                Cell::Int(total)
            } else {
                Cell::Float(numeric_values(cells, "sum")?.iter().sum())
            }
        }
        AggFunc::Mean => {
            let values = numeric_values(cells, "mean")?;
            #[allow(clippy::cast_precision_loss)]
            let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
            float_or_null(mean)
        }
        AggFunc::Median => float_or_null(median(&mut numeric_values(cells, "median")?)),
        AggFunc::Std => float_or_null(sample_variance(&numeric_values(cells, "std")?).map(f64::sqrt)),
        AggFunc::Var => float_or_null(sample_variance(&numeric_values(cells, "var")?)),
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<&Cell> = None;
            for c in present() {
                best = match best {
                    None => Some(c),
                    Some(b) => {
                        let ord = c.partial_compare(b)?;
                        let better = match func {
                            AggFunc::Min => ord == Some(Ordering::Less),
                            _ => ord == Some(Ordering::Greater),
                        };
                        Some(if better { c } else { b })
                    }
                };
            }
            best.cloned().unwrap_or(Cell::Null)
        }
        AggFunc::Count => Cell::Int(i64::try_from(present().count()).unwrap_or(i64::MAX)),
        AggFunc::Size => Cell::Int(i64::try_from(cells.len()).unwrap_or(i64::MAX)),
        AggFunc::Nunique => {
            let mut seen = indexmap::IndexSet::new();
            for c in present() {
                seen.insert(c.require_key()?);
            }
            Cell::Int(i64::try_from(seen.len()).unwrap_or(i64::MAX))
        }
        AggFunc::First => present().next().cloned().unwrap_or(Cell::Null),
        AggFunc::Last => present().last().cloned().unwrap_or(Cell::Null),
    })
}

impl Column {
    /// Creates a column without row labels.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
            index: None,
        }
    }

    /// Attaches row labels.
    #[must_use]
    pub fn with_index(mut self, index: Index) -> Self {
        self.index = Some(index);
        self
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a column with the same labels and new values.
    #[must_use]
    pub fn map_values(&self, values: Vec<Cell>) -> Self {
        Self {
            name: self.name.clone(),
            values,
            index: self.index.clone(),
        }
    }

    /// Returns the rows at `rows`, in that order.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            values: rows.iter().map(|&r| self.values[r].clone()).collect(),
            index: self.index.as_ref().map(|i| i.take(rows)),
        }
    }

    /// The storage type name of the column.
    #[must_use]
    pub fn dtype(&self) -> &'static str {
        let mut int = false;
        let mut float = false;
        let mut boolean = false;
        let mut date = false;
        let mut other = false;
        let mut null = false;
        for cell in &self.values {
            match cell {
                c if c.is_null() => null = true,
                Cell::Int(_) => int = true,
                Cell::Float(_) => float = true,
                Cell::Bool(_) => boolean = true,
                Cell::Date(_) => date = true,
                _ => other = true,
            }
        }
        if other || (boolean && (int || float || date)) || (date && (int || float)) {
            "object"
        } else if float || (int && null) {
            "float64"
        } else if int {
            "int64"
        } else if boolean {
            if null {
                "object"
            } else {
                "bool"
            }
        } else if date {
            "datetime64[ns]"
        } else {
            "float64"
        }
    }

    /// True when every present cell is numeric.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self.dtype(), "int64" | "float64")
            && self.values.iter().all(|c| c.is_null() || c.is_numeric())
    }

    /// Number of missing cells.
    #[must_use]
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|c| c.is_null()).count()
    }

    /// Reduces the column with `func`.
    pub fn reduce(&self, func: AggFunc) -> ExecResult<Cell> {
        aggregate(&self.values, func)
    }

    /// Distinct values in order of first appearance, missing included once.
    pub fn unique(&self) -> ExecResult<Vec<Cell>> {
        let mut seen: IndexMap<CellKey, Cell> = IndexMap::new();
        for c in &self.values {
            seen.entry(c.require_key()?).or_insert_with(|| c.clone());
        }
        Ok(seen.into_values().collect())
    }

    /// Counts each distinct present value, most frequent first.
    pub fn value_counts(&self, normalize: bool, ascending: bool) -> ExecResult<Self> {
        let mut counts: IndexMap<CellKey, (Cell, usize)> = IndexMap::new();
        for c in self.values.iter().filter(|c| !c.is_null()) {
            counts.entry(c.require_key()?).or_insert_with(|| (c.clone(), 0)).1 += 1;
        }
        let mut entries: Vec<(Cell, usize)> = counts.into_values().collect();
        if ascending {
            entries.sort_by(|a, b| a.1.cmp(&b.1));
        } else {
            entries.sort_by(|a, b| b.1.cmp(&a.1));
        }
        let total: usize = entries.iter().map(|e| e.1).sum();
        let (name, values): (&str, Vec<Cell>) = if normalize {
            #[allow(clippy::cast_precision_loss)]
            let values = entries
                .iter()
                .map(|e| Cell::Float(e.1 as f64 / total.max(1) as f64))
                .collect();
            ("proportion", values)
        } else {
            let values = entries
                .iter()
                .map(|e| Cell::Int(i64::try_from(e.1).unwrap_or(i64::MAX)))
                .collect();
            ("count", values)
        };
        let index = Index {
            names: vec![self.name.clone()],
            labels: entries.into_iter().map(|e| vec![e.0]).collect(),
        };
        Ok(Self::new(name, values).with_index(index))
    }

    /// A printable label for row `row`.
    #[must_use]
    pub fn label(&self, row: usize) -> String {
        match &self.index {
            Some(index) => index.labels[row]
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            None => row.to_string(),
        }
    }

    /// The label cell of row `row`: the first index level or the position.
    #[must_use]
    pub fn label_cell(&self, row: usize) -> Cell {
        match &self.index {
            Some(index) if index.labels[row].len() == 1 => index.labels[row][0].clone(),
            Some(_) => Cell::Str(self.label(row)),
            None => Cell::Int(i64::try_from(row).unwrap_or(i64::MAX)),
        }
    }

    /// Moves row labels into leading columns.
    #[must_use]
    pub fn reset_index(&self, name: Option<&str>) -> Table {
        let mut columns = Vec::new();
        match &self.index {
            Some(index) => {
                for (level, level_name) in index.names.iter().enumerate() {
                    let values = index.labels.iter().map(|l| l[level].clone()).collect();
                    columns.push(Self::new(level_name.clone(), values));
                }
            }
            None => {
                let values = (0..self.len())
                    .map(|r| Cell::Int(i64::try_from(r).unwrap_or(i64::MAX)))
                    .collect();
                columns.push(Self::new("index", values));
            }
        }
        let value_name = name.unwrap_or(&self.name).to_string();
        columns.push(Self::new(value_name, self.values.clone()));
        Table { columns }
    }

    /// Sorts rows by value, missing values last.
    #[must_use]
    pub fn sort_values(&self, ascending: bool) -> Self {
        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.sort_by(|&a, &b| ordered(&self.values[a], &self.values[b], ascending));
        self.take(&rows)
    }
}

fn ordered(a: &Cell, b: &Cell, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (false, false) => {
            let ord = a.total_cmp(b);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
        _ => a.total_cmp(b),
    }
}

/// How [`Table::merge`] matches rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinHow {
    /// Only matching rows.
    Inner,
    /// Every left row.
    Left,
    /// Every right row.
    Right,
    /// Every row of both sides.
    Outer,
}

impl JoinHow {
    /// Parses a join type name.
    pub fn parse(name: &str) -> ExecResult<Self> {
        match name {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "outer" => Ok(Self::Outer),
            other => Err(ExecError::value(format!(
                "do not recognize join method {other}"
            ))),
        }
    }
}

/// A table of equally long columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    /// The columns, in display order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Builds a table, checking that every column has the same length.
    pub fn new(columns: Vec<Column>) -> ExecResult<Self> {
        if let Some(first) = columns.first() {
            if let Some(bad) = columns.iter().find(|c| c.len() != first.len()) {
                return Err(ExecError::value(format!(
                    "All arrays must be of the same length (column '{}' has {} rows, expected {})",
                    bad.name,
                    bad.len(),
                    first.len()
                )));
            }
        }
        let columns = columns
            .into_iter()
            .map(|mut c| {
                c.index = None;
                c
            })
            .collect();
        Ok(Self { columns })
    }

    /// Builds a table from name/value pairs.
    pub fn from_pairs(pairs: Vec<(String, Vec<Cell>)>) -> ExecResult<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, values)| Column::new(name, values))
                .collect(),
        )
    }

    /// Reads a comma-separated file with a header row.
    pub fn from_csv(path: &Path) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| e.to_string())?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            for (i, field) in record.iter().enumerate() {
                raw[i].push(field.to_string());
            }
        }
        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, fields)| Column::new(name, infer_cells(&fields)))
            .collect();
        Ok(Self { columns })
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// True if a column named `name` exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Returns the column named `name`.
    pub fn column(&self, name: &str) -> ExecResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ExecError::MissingColumn(name.to_string()))
    }

    /// Adds or replaces a column.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> ExecResult<()> {
        if !self.columns.is_empty() && values.len() != self.row_count() {
            return Err(ExecError::value(format!(
                "Length of values ({}) does not match length of index ({})",
                values.len(),
                self.row_count()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.values = values,
            None => self.columns.push(Column::new(name, values)),
        }
        Ok(())
    }

    /// Returns the rows at `rows`, in that order.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
        }
    }

    /// Keeps the rows where `mask` is true.
    pub fn filter(&self, mask: &[Cell]) -> ExecResult<Self> {
        if mask.len() != self.row_count() {
            return Err(ExecError::value(format!(
                "Item wrong length {} instead of {}.",
                mask.len(),
                self.row_count()
            )));
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, m)| m.truthy())
            .map(|(i, _)| i)
            .collect();
        Ok(self.take(&rows))
    }

    /// First `n` rows.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        let rows: Vec<usize> = (0..self.row_count().min(n)).collect();
        self.take(&rows)
    }

    /// Last `n` rows.
    #[must_use]
    pub fn tail(&self, n: usize) -> Self {
        let total = self.row_count();
        let rows: Vec<usize> = (total.saturating_sub(n)..total).collect();
        self.take(&rows)
    }

    /// Returns only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> ExecResult<Self> {
        let columns = names
            .iter()
            .map(|n| self.column(n).cloned())
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(Self { columns })
    }

    /// Stable sort by one or more columns.
    pub fn sort_values(&self, by: &[String], ascending: &[bool]) -> ExecResult<Self> {
        let keys = by
            .iter()
            .map(|n| self.column(n))
            .collect::<ExecResult<Vec<_>>>()?;
        let mut rows: Vec<usize> = (0..self.row_count()).collect();
        rows.sort_by(|&a, &b| {
            for (i, col) in keys.iter().enumerate() {
                let asc = ascending.get(i).or_else(|| ascending.first()).copied().unwrap_or(true);
                let ord = ordered(&col.values[a], &col.values[b], asc);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(self.take(&rows))
    }

    /// The `n` rows with the largest (or smallest) values of `column`.
    pub fn nlargest(&self, n: usize, column: &str, largest: bool) -> ExecResult<Self> {
        let col = self.column(column)?;
        let mut rows: Vec<usize> = (0..self.row_count())
            .filter(|&r| !col.values[r].is_null())
            .collect();
        rows.sort_by(|&a, &b| ordered(&col.values[a], &col.values[b], !largest));
        rows.truncate(n);
        Ok(self.take(&rows))
    }

    /// Removes the named columns.
    pub fn drop_columns(&self, names: &[String]) -> ExecResult<Self> {
        for name in names {
            if !self.has_column(name) {
                return Err(ExecError::MissingColumn(name.clone()));
            }
        }
        Ok(Self {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name))
                .cloned()
                .collect(),
        })
    }

    /// Renames columns; unknown source names are ignored.
    #[must_use]
    pub fn rename(&self, mapping: &[(String, String)]) -> Self {
        let mut out = self.clone();
        for col in &mut out.columns {
            if let Some((_, to)) = mapping.iter().find(|(from, _)| *from == col.name) {
                col.name.clone_from(to);
            }
        }
        out
    }

    /// Drops rows with a missing value in any of `subset` (all columns if
    /// empty).
    pub fn dropna(&self, subset: &[String]) -> ExecResult<Self> {
        let cols: Vec<&Column> = if subset.is_empty() {
            self.columns.iter().collect()
        } else {
            subset
                .iter()
                .map(|n| self.column(n))
                .collect::<ExecResult<_>>()?
        };
        let rows: Vec<usize> = (0..self.row_count())
            .filter(|&r| cols.iter().all(|c| !c.values[r].is_null()))
            .collect();
        Ok(self.take(&rows))
    }

    /// Replaces missing values with `value`.
    #[must_use]
    pub fn fillna(&self, value: &Cell) -> Self {
        let mut out = self.clone();
        for col in &mut out.columns {
            for cell in &mut col.values {
                if cell.is_null() {
                    *cell = value.clone();
                }
            }
        }
        out
    }

    /// Keeps the first row of every distinct combination of `subset`
    /// (all columns if empty).
    pub fn drop_duplicates(&self, subset: &[String]) -> ExecResult<Self> {
        let cols: Vec<&Column> = if subset.is_empty() {
            self.columns.iter().collect()
        } else {
            subset
                .iter()
                .map(|n| self.column(n))
                .collect::<ExecResult<_>>()?
        };
        let mut seen = indexmap::IndexSet::new();
        let mut rows = Vec::new();
        for r in 0..self.row_count() {
            let key = cols
                .iter()
                .map(|c| c.values[r].require_key())
                .collect::<ExecResult<Vec<_>>>()?;
            if seen.insert(key) {
                rows.push(r);
            }
        }
        Ok(self.take(&rows))
    }

    fn row_keys(&self, names: &[String]) -> ExecResult<Vec<Vec<CellKey>>> {
        let cols = names
            .iter()
            .map(|n| self.column(n))
            .collect::<ExecResult<Vec<_>>>()?;
        (0..self.row_count())
            .map(|r| cols.iter().map(|c| c.values[r].require_key()).collect())
            .collect()
    }

    /// Joins two tables on key columns.
    pub fn merge(
        &self,
        right: &Self,
        left_on: &[String],
        right_on: &[String],
        how: JoinHow,
    ) -> ExecResult<Self> {
        if left_on.len() != right_on.len() || left_on.is_empty() {
            return Err(ExecError::value(
                "len(right_on) must equal len(left_on) and both must be non-empty",
            ));
        }
        let left_keys = self.row_keys(left_on)?;
        let right_keys = right.row_keys(right_on)?;

        let mut right_index: IndexMap<&Vec<CellKey>, Vec<usize>> = IndexMap::new();
        for (j, key) in right_keys.iter().enumerate() {
            right_index.entry(key).or_default().push(j);
        }

        let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        match how {
            JoinHow::Right => {
                let mut left_index: IndexMap<&Vec<CellKey>, Vec<usize>> = IndexMap::new();
                for (i, key) in left_keys.iter().enumerate() {
                    left_index.entry(key).or_default().push(i);
                }
                for (j, key) in right_keys.iter().enumerate() {
                    match left_index.get(key) {
                        Some(matches) => pairs.extend(matches.iter().map(|&i| (Some(i), Some(j)))),
                        None => pairs.push((None, Some(j))),
                    }
                }
            }
            _ => {
                let mut matched_right = vec![false; right.row_count()];
                for (i, key) in left_keys.iter().enumerate() {
                    match right_index.get(key) {
                        Some(matches) => {
                            for &j in matches {
                                matched_right[j] = true;
                                pairs.push((Some(i), Some(j)));
                            }
                        }
                        None if how != JoinHow::Inner => pairs.push((Some(i), None)),
                        None => {}
                    }
                }
                if how == JoinHow::Outer {
                    for (j, matched) in matched_right.iter().enumerate() {
                        if !matched {
                            pairs.push((None, Some(j)));
                        }
                    }
                }
            }
        }

        // Keys with the same name on both sides collapse into one column.
        let shared: Vec<&String> = left_on
            .iter()
            .zip(right_on)
            .filter(|(l, r)| l == r)
            .map(|(l, _)| l)
            .collect();
        let right_value_names: Vec<&String> = right
            .columns
            .iter()
            .map(|c| &c.name)
            .filter(|n| !shared.contains(n))
            .collect();
        let left_value_names: Vec<&String> = self
            .columns
            .iter()
            .map(|c| &c.name)
            .filter(|n| !shared.contains(n))
            .collect();

        let pick = |col: &Column, row: Option<usize>| row.map_or(Cell::Null, |r| col.values[r].clone());
        let mut columns = Vec::new();
        for col in &self.columns {
            let values: Vec<Cell> = if shared.contains(&&col.name) {
                let right_col = right.column(&col.name)?;
                pairs
                    .iter()
                    .map(|&(l, r)| match l {
                        Some(_) => pick(col, l),
                        None => pick(right_col, r),
                    })
                    .collect()
            } else {
                pairs.iter().map(|&(l, _)| pick(col, l)).collect()
            };
            let name = if !shared.contains(&&col.name) && right_value_names.contains(&&col.name) {
                format!("{}_x", col.name)
            } else {
                col.name.clone()
            };
            columns.push(Column::new(name, values));
        }
        for col in &right.columns {
            if shared.contains(&&col.name) {
                continue;
            }
            let values = pairs.iter().map(|&(_, r)| pick(col, r)).collect();
            let name = if left_value_names.contains(&&col.name) {
                format!("{}_y", col.name)
            } else {
                col.name.clone()
            };
            columns.push(Column::new(name, values));
        }
        Ok(Self { columns })
    }

    /// Stacks tables vertically; columns missing from a table become
    /// missing values.
    #[must_use]
    pub fn concat(tables: &[Self]) -> Self {
        let mut names: Vec<String> = Vec::new();
        for t in tables {
            for c in &t.columns {
                if !names.contains(&c.name) {
                    names.push(c.name.clone());
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let mut values = Vec::new();
                for t in tables {
                    match t.columns.iter().find(|c| c.name == name) {
                        Some(c) => values.extend(c.values.iter().cloned()),
                        None => values.extend(std::iter::repeat(Cell::Null).take(t.row_count())),
                    }
                }
                Column::new(name, values)
            })
            .collect();
        Self { columns }
    }

    /// Places tables side by side.
    pub fn concat_columns(tables: &[Self]) -> ExecResult<Self> {
        Self::new(tables.iter().flat_map(|t| t.columns.iter().cloned()).collect())
    }

    /// Reduces every column with `func`, skipping non-numeric columns for
    /// numeric functions. The result is indexed by column name.
    pub fn reduce(&self, func: AggFunc) -> ExecResult<Column> {
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for col in &self.columns {
            if func.is_numeric() && !col.is_numeric() {
                continue;
            }
            labels.push(vec![Cell::Str(col.name.clone())]);
            values.push(col.reduce(func)?);
        }
        Ok(Column::new(func.name(), values).with_index(Index {
            names: vec![String::new()],
            labels,
        }))
    }
}

/// Infers one column's cells from raw text fields.
fn infer_cells(fields: &[String]) -> Vec<Cell> {
    let is_na = |s: &str| NA_VALUES.contains(&s.trim());
    let present: Vec<&str> = fields.iter().map(|s| s.trim()).filter(|s| !is_na(s)).collect();

    let all_bool = !present.is_empty()
        && present
            .iter()
            .all(|s| matches!(*s, "True" | "False" | "true" | "false" | "TRUE" | "FALSE"));
    let all_int = present.iter().all(|s| s.parse::<i64>().is_ok());
    let all_float = present.iter().all(|s| s.parse::<f64>().is_ok());

    fields
        .iter()
        .map(|raw| {
            let s = raw.trim();
            if is_na(s) {
                return Cell::Null;
            }
            if all_bool {
                Cell::Bool(s.eq_ignore_ascii_case("true"))
            } else if all_int {
                s.parse().map_or(Cell::Null, Cell::Int)
            } else if all_float {
                s.parse().map_or(Cell::Null, Cell::Float)
            } else {
                Cell::Str(raw.clone())
            }
        })
        .collect()
}

/// A pending group-by over a table.
#[derive(Debug, Clone)]
pub struct GroupBy {
    /// The grouped table.
    pub table: Table,
    /// Key column names.
    pub keys: Vec<String>,
    /// Selected value columns, if any.
    pub selection: Option<Selection>,
    /// Whether single-column results keep the keys as row labels.
    pub as_index: bool,
}

/// Columns selected from a group-by.
#[derive(Debug, Clone)]
pub enum Selection {
    /// `gb["col"]`: aggregations yield a column.
    One(String),
    /// `gb[["a", "b"]]`: aggregations yield a table.
    Many(Vec<String>),
}

/// One named aggregation: output name, source column, function.
pub type NamedAgg = (String, String, AggFunc);

impl GroupBy {
    /// Starts a group-by, checking the key columns exist.
    pub fn new(table: Table, keys: Vec<String>) -> ExecResult<Self> {
        for key in &keys {
            table.column(key)?;
        }
        Ok(Self {
            table,
            keys,
            selection: None,
            as_index: true,
        })
    }

    /// Sets whether keys become row labels or leading columns.
    #[must_use]
    pub fn with_as_index(mut self, as_index: bool) -> Self {
        self.as_index = as_index;
        self
    }

    /// Selects value columns.
    pub fn select(&self, selection: Selection) -> ExecResult<Self> {
        match &selection {
            Selection::One(name) => {
                self.table.column(name)?;
            }
            Selection::Many(names) => {
                for name in names {
                    self.table.column(name)?;
                }
            }
        }
        Ok(Self {
            table: self.table.clone(),
            keys: self.keys.clone(),
            selection: Some(selection),
            as_index: self.as_index,
        })
    }

    /// Groups sorted by key; rows with a missing key are dropped.
    pub fn groups(&self) -> ExecResult<Vec<(Vec<Cell>, Vec<usize>)>> {
        let key_cols = self
            .keys
            .iter()
            .map(|k| self.table.column(k))
            .collect::<ExecResult<Vec<_>>>()?;
        let mut groups: IndexMap<Vec<CellKey>, (Vec<Cell>, Vec<usize>)> = IndexMap::new();
        for r in 0..self.table.row_count() {
            if key_cols.iter().any(|c| c.values[r].is_null()) {
                continue;
            }
            let key = key_cols
                .iter()
                .map(|c| c.values[r].require_key())
                .collect::<ExecResult<Vec<_>>>()?;
            let cells: Vec<Cell> = key_cols.iter().map(|c| c.values[r].clone()).collect();
            groups.entry(key).or_insert_with(|| (cells, Vec::new())).1.push(r);
        }
        let mut out: Vec<(Vec<Cell>, Vec<usize>)> = groups.into_values().collect();
        out.sort_by(|a, b| {
            for (x, y) in a.0.iter().zip(&b.0) {
                let ord = x.total_cmp(y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(out)
    }

    fn value_columns(&self, func: AggFunc) -> Vec<&Column> {
        match &self.selection {
            Some(Selection::One(name)) => self.table.columns.iter().filter(|c| &c.name == name).collect(),
            Some(Selection::Many(names)) => names
                .iter()
                .filter_map(|n| self.table.columns.iter().find(|c| &c.name == n))
                .collect(),
            None => self
                .table
                .columns
                .iter()
                .filter(|c| !self.keys.contains(&c.name))
                .filter(|c| !func.is_numeric() || c.is_numeric())
                .collect(),
        }
    }

    fn key_columns(&self, groups: &[(Vec<Cell>, Vec<usize>)]) -> Vec<Column> {
        self.keys
            .iter()
            .enumerate()
            .map(|(level, name)| {
                Column::new(name.clone(), groups.iter().map(|g| g.0[level].clone()).collect())
            })
            .collect()
    }

    fn index(&self, groups: &[(Vec<Cell>, Vec<usize>)]) -> Index {
        Index {
            names: self.keys.clone(),
            labels: groups.iter().map(|g| g.0.clone()).collect(),
        }
    }

    /// Applies `func` to every group.
    ///
    /// A single selected column yields a column indexed by group key;
    /// otherwise the result is a table with the keys as leading columns.
    pub fn aggregate(&self, func: AggFunc) -> ExecResult<Aggregated> {
        let groups = self.groups()?;
        if let Some(Selection::One(name)) = &self.selection {
            let col = self.table.column(name)?;
            let values = groups
                .iter()
                .map(|(_, rows)| aggregate(&col.take(rows).values, func))
                .collect::<ExecResult<Vec<_>>>()?;
            return Ok(Aggregated::Column(
                Column::new(name.clone(), values).with_index(self.index(&groups)),
            ));
        }
        let mut columns = self.key_columns(&groups);
        for col in self.value_columns(func) {
            let values = groups
                .iter()
                .map(|(_, rows)| aggregate(&col.take(rows).values, func))
                .collect::<ExecResult<Vec<_>>>()?;
            columns.push(Column::new(col.name.clone(), values));
        }
        Ok(Aggregated::Table(Table { columns }))
    }

    /// Counts rows per group.
    pub fn size(&self) -> ExecResult<Column> {
        let groups = self.groups()?;
        let values = groups
            .iter()
            .map(|(_, rows)| Cell::Int(i64::try_from(rows.len()).unwrap_or(i64::MAX)))
            .collect();
        Ok(Column::new("size", values).with_index(self.index(&groups)))
    }

    /// Applies named aggregations; keys lead the resulting table.
    pub fn aggregate_named(&self, specs: &[NamedAgg]) -> ExecResult<Table> {
        let groups = self.groups()?;
        let mut columns = self.key_columns(&groups);
        for (out, source, func) in specs {
            let col = self.table.column(source)?;
            let values = groups
                .iter()
                .map(|(_, rows)| aggregate(&col.take(rows).values, *func))
                .collect::<ExecResult<Vec<_>>>()?;
            columns.push(Column::new(out.clone(), values));
        }
        Ok(Table { columns })
    }
}

/// Result of a group-by aggregation.
#[derive(Debug, Clone)]
pub enum Aggregated {
    /// Single selected column.
    Column(Column),
    /// Several value columns.
    Table(Table),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sales() -> Table {
        Table::from_pairs(vec![
            (
                "region".to_string(),
                vec![
                    Cell::Str("north".into()),
                    Cell::Str("south".into()),
                    Cell::Str("north".into()),
                    Cell::Null,
                ],
            ),
            (
                "amount".to_string(),
                vec![Cell::Int(10), Cell::Int(5), Cell::Int(7), Cell::Int(1)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_csv_type_inference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "id,price,paid,note\n1,2.5,true,a\n2,,false,\n3,4,True,c\n").unwrap();

        let table = Table::from_csv(&path).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column("id").unwrap().dtype(), "int64");
        assert_eq!(table.column("price").unwrap().dtype(), "float64");
        assert_eq!(table.column("paid").unwrap().dtype(), "bool");
        assert_eq!(table.column("note").unwrap().dtype(), "object");
        assert_eq!(table.column("note").unwrap().values[1], Cell::Null);
    }

    #[test]
    fn test_ragged_csv_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "a,b\n1,2\n3\n").unwrap();
        assert!(Table::from_csv(&path).is_err());
    }

    #[test]
    fn test_missing_column_error() {
        let err = sales().column("missing_col").unwrap_err();
        assert_eq!(err, ExecError::MissingColumn("missing_col".to_string()));
    }

    #[test]
    fn test_groupby_sum_drops_null_keys_and_sorts() {
        let gb = GroupBy::new(sales(), vec!["region".to_string()])
            .unwrap()
            .select(Selection::One("amount".to_string()))
            .unwrap();
        let Aggregated::Column(col) = gb.aggregate(AggFunc::Sum).unwrap() else {
            panic!("expected a column");
        };
        assert_eq!(col.values, vec![Cell::Int(17), Cell::Int(5)]);
        let reset = col.reset_index(None);
        assert_eq!(reset.column_names(), vec!["region", "amount"]);
        assert_eq!(reset.columns[0].values[0], Cell::Str("north".into()));
    }

    #[test]
    fn test_named_aggregation() {
        let gb = GroupBy::new(sales(), vec!["region".to_string()]).unwrap();
        let table = gb
            .aggregate_named(&[
                ("total".to_string(), "amount".to_string(), AggFunc::Sum),
                ("orders".to_string(), "amount".to_string(), AggFunc::Count),
            ])
            .unwrap();
        assert_eq!(table.column_names(), vec!["region", "total", "orders"]);
        assert_eq!(table.column("orders").unwrap().values, vec![Cell::Int(2), Cell::Int(1)]);
    }

    #[test]
    fn test_sort_values_descending_nulls_last() {
        let mut t = sales();
        t.set_column("amount", vec![Cell::Int(3), Cell::Null, Cell::Int(9), Cell::Int(1)])
            .unwrap();
        let sorted = t.sort_values(&["amount".to_string()], &[false]).unwrap();
        assert_eq!(
            sorted.column("amount").unwrap().values,
            vec![Cell::Int(9), Cell::Int(3), Cell::Int(1), Cell::Null]
        );
    }

    #[test]
    fn test_merge_inner_with_suffixes() {
        let left = Table::from_pairs(vec![
            ("id".to_string(), vec![Cell::Int(1), Cell::Int(2)]),
            ("name".to_string(), vec![Cell::Str("a".into()), Cell::Str("b".into())]),
        ])
        .unwrap();
        let right = Table::from_pairs(vec![
            ("id".to_string(), vec![Cell::Int(2), Cell::Int(2), Cell::Int(3)]),
            ("name".to_string(), vec![Cell::Str("x".into()), Cell::Str("y".into()), Cell::Str("z".into())]),
        ])
        .unwrap();
        let on = vec!["id".to_string()];
        let merged = left.merge(&right, &on, &on, JoinHow::Inner).unwrap();
        assert_eq!(merged.column_names(), vec!["id", "name_x", "name_y"]);
        assert_eq!(merged.row_count(), 2);

        let outer = left.merge(&right, &on, &on, JoinHow::Outer).unwrap();
        assert_eq!(outer.row_count(), 4);
        assert_eq!(outer.column("id").unwrap().values[3], Cell::Int(3));
    }

    #[test]
    fn test_value_counts() {
        let col = Column::new(
            "c",
            vec![
                Cell::Str("a".into()),
                Cell::Str("b".into()),
                Cell::Str("b".into()),
                Cell::Null,
            ],
        );
        let counts = col.value_counts(false, false).unwrap();
        assert_eq!(counts.values, vec![Cell::Int(2), Cell::Int(1)]);
        assert_eq!(counts.label(0), "b");
    }

    #[test]
    fn test_aggregate_std_is_sample() {
        let cells = vec![Cell::Int(1), Cell::Int(2), Cell::Int(3), Cell::Null];
        assert_eq!(aggregate(&cells, AggFunc::Std).unwrap(), Cell::Float(1.0));
        assert_eq!(aggregate(&cells, AggFunc::Mean).unwrap(), Cell::Float(2.0));
        assert_eq!(aggregate(&cells, AggFunc::Sum).unwrap(), Cell::Int(6));
        assert_eq!(aggregate(&cells, AggFunc::Count).unwrap(), Cell::Int(3));
    }

    #[test]
    fn test_concat_fills_missing() {
        let a = Table::from_pairs(vec![("x".to_string(), vec![Cell::Int(1)])]).unwrap();
        let b = Table::from_pairs(vec![("y".to_string(), vec![Cell::Int(2)])]).unwrap();
        let c = Table::concat(&[a, b]);
        assert_eq!(c.column("x").unwrap().values, vec![Cell::Int(1), Cell::Null]);
        assert_eq!(c.column("y").unwrap().values, vec![Cell::Null, Cell::Int(2)]);
    }
}
