//! Runtime values of the code interpreter.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parser::Expr;
use crate::exec::table::{Column, GroupBy, Table};

/// One scalar cell of a table, or a scalar value in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float. `NaN` counts as missing.
    Float(f64),
    /// Text.
    Str(String),
    /// Timestamp without zone.
    Date(NaiveDateTime),
    /// A list stored in a single cell, e.g. after `str.split()`.
    List(Vec<Cell>),
}

/// A hashable projection of a [`Cell`], used for grouping and uniqueness.
///
/// Integral floats hash like the matching integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKey {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer, or integral float.
    Int(i64),
    /// Non-integral float, by bit pattern.
    Float(u64),
    /// Text.
    Str(String),
    /// Timestamp.
    Date(NaiveDateTime),
}

impl Cell {
    /// Returns true for `Null` and `NaN`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Returns the numeric value, if any.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Returns the integer value, if the cell is integral.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Returns the text, if the cell is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for numeric cells (bools excluded).
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Truthiness as in the host language.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Date(_) => true,
            Self::List(l) => !l.is_empty(),
        }
    }

    /// The user-facing type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Date(_) => "Timestamp",
            Self::List(_) => "list",
        }
    }

    /// Returns the hashable key of this cell, or `None` for lists.
    #[must_use]
    pub fn key(&self) -> Option<CellKey> {
        Some(match self {
            Self::Null => CellKey::Null,
            Self::Bool(b) => CellKey::Bool(*b),
            Self::Int(i) => CellKey::Int(*i),
            Self::Float(f) if f.is_nan() => CellKey::Null,
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellKey::Int(*f as i64),
            Self::Float(f) => CellKey::Float(f.to_bits()),
            Self::Str(s) => CellKey::Str(s.clone()),
            Self::Date(d) => CellKey::Date(*d),
            Self::List(_) => return None,
        })
    }

    /// Returns the hashable key or a type error naming the unhashable value.
    pub fn require_key(&self) -> ExecResult<CellKey> {
        self.key()
            .ok_or_else(|| ExecError::type_error(format!("unhashable type: '{}'", self.type_name())))
    }

    /// Total order used by sorting: numbers, then text, then timestamps,
    /// with missing values last.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.total_cmp(&b);
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => 0,
            Self::Str(_) => 1,
            Self::Date(_) => 2,
            Self::List(_) => 3,
            Self::Null => 4,
        }
    }

    /// Compares two cells for ordering operators, failing on incomparable
    /// types. Missing values make every comparison false.
    pub fn partial_compare(&self, other: &Self) -> ExecResult<Option<Ordering>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return Ok(a.partial_cmp(&b));
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(Some(a.cmp(b))),
            (Self::Date(a), Self::Date(b)) => Ok(Some(a.cmp(b))),
            _ => Err(ExecError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Equality as seen by `==`: numbers compare by value, missing values
    /// never compare equal.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        self == other
    }
}

impl From<CellKey> for Cell {
    fn from(key: CellKey) -> Self {
        match key {
            CellKey::Null => Self::Null,
            CellKey::Bool(b) => Self::Bool(b),
            CellKey::Int(i) => Self::Int(i),
            CellKey::Float(bits) => Self::Float(f64::from_bits(bits)),
            CellKey::Str(s) => Self::Str(s),
            CellKey::Date(d) => Self::Date(d),
        }
    }
}

/// Formats a float the way the host language prints it.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", format_float(*x)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Self::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// A library handle bound in the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    /// Dataframe library (`pd`).
    Pandas,
    /// Plotting state machine (`plt`).
    Pyplot,
    /// Top-level plotting package.
    Matplotlib,
    /// Statistical plotting (`sns`).
    Seaborn,
    /// Numeric helpers (`np`).
    Numpy,
}

impl Module {
    /// Resolves a dotted import path to a module.
    #[must_use]
    pub fn from_import(path: &str) -> Option<Self> {
        match path {
            "pandas" => Some(Self::Pandas),
            "matplotlib.pyplot" => Some(Self::Pyplot),
            "matplotlib" => Some(Self::Matplotlib),
            "seaborn" => Some(Self::Seaborn),
            "numpy" => Some(Self::Numpy),
            _ => None,
        }
    }

    /// The module's import path.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Pandas => "pandas",
            Self::Pyplot => "matplotlib.pyplot",
            Self::Matplotlib => "matplotlib",
            Self::Seaborn => "seaborn",
            Self::Numpy => "numpy",
        }
    }
}

/// Built-in functions callable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `len`
    Len,
    /// `sum`
    Sum,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `round`
    Round,
    /// `abs`
    Abs,
    /// `list`
    List,
    /// `sorted`
    Sorted,
    /// `str`
    Str,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `bool`
    Bool,
    /// `range`
    Range,
    /// `print`
    Print,
}

impl Builtin {
    /// Looks up a builtin by name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "round" => Self::Round,
            "abs" => Self::Abs,
            "list" => Self::List,
            "sorted" => Self::Sorted,
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "range" => Self::Range,
            "print" => Self::Print,
            _ => return None,
        })
    }
}

/// An anonymous function.
#[derive(Debug, Clone)]
pub struct Lambda {
    /// Parameter names.
    pub params: Vec<String>,
    /// Body expression.
    pub body: Arc<Expr>,
}

/// A pending `Series.rolling(window)`.
#[derive(Debug, Clone)]
pub struct Rolling {
    /// The column the window slides over.
    pub column: Column,
    /// Window length in rows.
    pub window: usize,
    /// Fewest present values that still produce a result.
    pub min_periods: usize,
}

/// Any value a name can be bound to.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar.
    Scalar(Cell),
    /// A list or tuple.
    List(Vec<Value>),
    /// A dict literal, in insertion order.
    Dict(Vec<(Cell, Value)>),
    /// A single column.
    Column(Column),
    /// A table.
    Table(Table),
    /// A pending group-by.
    GroupBy(GroupBy),
    /// The `.str` accessor of a column.
    StrAccessor(Column),
    /// The `.dt` accessor of a column.
    DtAccessor(Column),
    /// The `.loc` indexer of a table.
    Loc(Table),
    /// A rolling window over a column.
    Rolling(Rolling),
    /// A library handle.
    Module(Module),
    /// The current figure.
    Figure,
    /// The axes of the current figure.
    Axes,
    /// An anonymous function.
    Lambda(Lambda),
    /// A built-in function.
    Builtin(Builtin),
}

impl Value {
    /// The `None` value.
    pub const NONE: Self = Self::Scalar(Cell::Null);

    /// Wraps a string.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Scalar(Cell::Str(s.into()))
    }

    /// The user-facing type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(c) => c.type_name(),
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Column(_) => "Series",
            Self::Table(_) => "DataFrame",
            Self::GroupBy(_) => "DataFrameGroupBy",
            Self::StrAccessor(_) => "StringMethods",
            Self::DtAccessor(_) => "DatetimeProperties",
            Self::Loc(_) => "_LocIndexer",
            Self::Rolling(_) => "Rolling",
            Self::Module(_) => "module",
            Self::Figure => "Figure",
            Self::Axes => "Axes",
            Self::Lambda(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
        }
    }

    /// Truthiness; ambiguous for columns and tables.
    pub fn truthy(&self) -> ExecResult<bool> {
        match self {
            Self::Scalar(c) => Ok(c.truthy()),
            Self::List(l) => Ok(!l.is_empty()),
            Self::Dict(d) => Ok(!d.is_empty()),
            Self::Column(_) | Self::Table(_) => Err(ExecError::value(format!(
                "The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                self.type_name()
            ))),
            _ => Ok(true),
        }
    }

    /// Returns the scalar cell, if this is a scalar.
    #[must_use]
    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Self::Scalar(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the text, if this is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_cell().and_then(Cell::as_str)
    }

    /// Converts a scalar or list of scalars to cells.
    pub fn to_cells(&self) -> ExecResult<Vec<Cell>> {
        match self {
            Self::Scalar(c) => Ok(vec![c.clone()]),
            Self::List(items) => items
                .iter()
                .map(|v| match v {
                    Self::Scalar(c) => Ok(c.clone()),
                    Self::List(_) => Ok(Cell::List(v.to_cells()?)),
                    other => Err(ExecError::type_error(format!(
                        "expected a scalar, got '{}'",
                        other.type_name()
                    ))),
                })
                .collect(),
            Self::Column(c) => Ok(c.values.clone()),
            other => Err(ExecError::type_error(format!(
                "expected a list, got '{}'",
                other.type_name()
            ))),
        }
    }

    /// Converts a string or list of strings to names.
    pub fn to_names(&self) -> ExecResult<Vec<String>> {
        match self {
            Self::Scalar(Cell::Str(s)) => Ok(vec![s.clone()]),
            Self::List(items) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        ExecError::type_error(format!(
                            "expected a column name, got '{}'",
                            v.type_name()
                        ))
                    })
                })
                .collect(),
            other => Err(ExecError::type_error(format!(
                "expected a column name or list of names, got '{}'",
                other.type_name()
            ))),
        }
    }

    /// Renders the value the way `str()` would.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Scalar(c) => c.to_string(),
            Self::List(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Self::Scalar(Cell::Str(s)) => format!("'{s}'"),
                        other => other.display(),
                    })
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Dict(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", v.display()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Column(c) => format!("Series(name={}, len={})", c.name, c.len()),
            Self::Table(t) => format!("DataFrame({} rows x {} columns)", t.row_count(), t.column_count()),
            Self::Module(m) => format!("<module '{}'>", m.path()),
            other => format!("<{}>", other.type_name()),
        }
    }
}

impl From<Cell> for Value {
    fn from(c: Cell) -> Self {
        Self::Scalar(c)
    }
}

impl From<Column> for Value {
    fn from(c: Column) -> Self {
        Self::Column(c)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_nan() {
        assert!(Cell::Null.is_null());
        assert!(Cell::Float(f64::NAN).is_null());
        assert!(!Cell::Int(0).is_null());
    }

    #[test]
    fn test_integral_float_keys_like_int() {
        assert_eq!(Cell::Float(3.0).key(), Cell::Int(3).key());
        assert_ne!(Cell::Float(3.5).key(), Cell::Int(3).key());
        assert!(Cell::List(vec![]).key().is_none());
        assert!(Cell::List(vec![]).require_key().is_err());
    }

    #[test]
    fn test_sort_order_puts_nulls_last() {
        let mut cells = vec![Cell::Null, Cell::Int(3), Cell::Float(1.5), Cell::Int(2)];
        cells.sort_by(Cell::total_cmp);
        assert_eq!(cells, vec![Cell::Float(1.5), Cell::Int(2), Cell::Int(3), Cell::Null]);
    }

    #[test]
    fn test_compare_mixed_types_fails() {
        assert!(Cell::Int(1).partial_compare(&Cell::Str("a".into())).is_err());
        assert_eq!(Cell::Null.partial_compare(&Cell::Int(1)).unwrap(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Cell::Float(2.0).to_string(), "2.0");
        assert_eq!(Cell::Float(0.25).to_string(), "0.25");
        assert_eq!(Cell::Bool(true).to_string(), "True");
        assert_eq!(
            Cell::List(vec![Cell::Str("a".into()), Cell::Int(1)]).to_string(),
            "['a', 1]"
        );
        assert_eq!(Value::List(vec![Value::str("x")]).display(), "['x']");
    }

    #[test]
    fn test_column_truthiness_is_ambiguous() {
        let col = Column::new("a", vec![Cell::Int(1)]);
        assert!(Value::Column(col).truthy().is_err());
        assert!(Value::Scalar(Cell::Int(1)).truthy().unwrap());
    }
}
