//! Attributes and methods of runtime values.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::RegexBuilder;
use std::cmp::Ordering;

use crate::exec::builtins::{self, round_cell};
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::interpreter::{Args, Interpreter};
use crate::exec::modules::{self, parse_datetime};
use crate::exec::plotting;
use crate::exec::table::{
    aggregate, AggFunc, Aggregated, Column, GroupBy, Index, JoinHow, NamedAgg, Selection, Table,
};
use crate::exec::value::{Builtin, Cell, CellKey, Rolling, Value};

fn int_cell(n: usize) -> Cell {
    Cell::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn scalars(cells: Vec<Cell>) -> Value {
    Value::List(cells.into_iter().map(Value::Scalar).collect())
}

/// Reads `obj.name`.
pub fn attribute(recv: Value, name: &str) -> ExecResult<Value> {
    match recv {
        Value::Table(t) => table_attr(t, name),
        Value::Column(c) => column_attr(c, name),
        Value::GroupBy(g) => match name {
            "ngroups" => Ok(Value::Scalar(int_cell(g.groups()?.len()))),
            col if g.table.has_column(col) => Ok(Value::GroupBy(
                g.select(Selection::One(col.to_string()))?,
            )),
            other => Err(ExecError::no_attribute("DataFrameGroupBy", other)),
        },
        Value::DtAccessor(c) => dt_attr(&c, name),
        Value::Module(m) => modules::attribute(m, name),
        Value::Figure if name == "axes" => Ok(Value::List(vec![Value::Axes])),
        Value::Axes if name == "figure" => Ok(Value::Figure),
        Value::Scalar(Cell::Date(d)) => date_part(&d, name)
            .map(Value::Scalar)
            .ok_or_else(|| ExecError::no_attribute("Timestamp", name)),
        other => Err(ExecError::no_attribute(other.type_name(), name)),
    }
}

fn table_attr(t: Table, name: &str) -> ExecResult<Value> {
    match name {
        "shape" => Ok(Value::List(vec![
            Value::Scalar(int_cell(t.row_count())),
            Value::Scalar(int_cell(t.column_count())),
        ])),
        "columns" => Ok(Value::List(t.column_names().into_iter().map(Value::str).collect())),
        "empty" => Ok(Value::Scalar(Cell::Bool(t.row_count() == 0))),
        "loc" | "iloc" => Ok(Value::Loc(t)),
        "index" => Ok(scalars((0..t.row_count()).map(int_cell).collect())),
        "size" => Ok(Value::Scalar(int_cell(t.row_count() * t.column_count()))),
        "dtypes" => {
            let labels = t.columns.iter().map(|c| vec![Cell::Str(c.name.clone())]).collect();
            let values = t.columns.iter().map(|c| Cell::Str(c.dtype().to_string())).collect();
            Ok(Value::Column(Column::new("dtypes", values).with_index(Index {
                names: vec![String::new()],
                labels,
            })))
        }
        col => match t.column(col) {
            Ok(c) => Ok(Value::Column(c.clone())),
            Err(_) => Err(ExecError::no_attribute("DataFrame", col)),
        },
    }
}

fn column_attr(c: Column, name: &str) -> ExecResult<Value> {
    match name {
        "str" => {
            if c.values.iter().any(|v| !v.is_null() && !matches!(v, Cell::Str(_) | Cell::List(_))) {
                return Err(ExecError::runtime("Can only use .str accessor with string values!"));
            }
            Ok(Value::StrAccessor(c))
        }
        "dt" => {
            if c.values.iter().any(|v| !v.is_null() && !matches!(v, Cell::Date(_))) {
                return Err(ExecError::runtime(
                    "Can only use .dt accessor with datetimelike values",
                ));
            }
            Ok(Value::DtAccessor(c))
        }
        "name" => Ok(Value::str(c.name)),
        "shape" => Ok(Value::List(vec![Value::Scalar(int_cell(c.len()))])),
        "size" => Ok(Value::Scalar(int_cell(c.len()))),
        "empty" => Ok(Value::Scalar(Cell::Bool(c.is_empty()))),
        "values" => Ok(scalars(c.values)),
        "index" => Ok(scalars((0..c.len()).map(|r| c.label_cell(r)).collect())),
        "dtype" => Ok(Value::str(c.dtype())),
        "iloc" | "loc" => Ok(Value::Column(c)),
        "is_unique" => {
            let unique = c.unique()?.len() == c.len();
            Ok(Value::Scalar(Cell::Bool(unique)))
        }
        "hasnans" => Ok(Value::Scalar(Cell::Bool(c.null_count() > 0))),
        other => Err(ExecError::no_attribute("Series", other)),
    }
}

/// Calls `recv.name(args)`.
pub fn call_method(
    interp: &mut Interpreter<'_>,
    recv: Value,
    name: &str,
    args: &Args,
) -> ExecResult<Value> {
    match recv {
        Value::Table(t) => table_method(interp, t, name, args),
        Value::Column(c) => column_method(interp, c, name, args),
        Value::GroupBy(g) => groupby_method(&g, name, args),
        Value::Rolling(r) => rolling_method(&r, name, args),
        Value::StrAccessor(c) => str_method(&c, name, args),
        Value::DtAccessor(c) => dt_method(&c, name, args),
        Value::Module(m) => modules::call(interp, m, name, args),
        Value::Figure => plotting::figure_method(interp, name, args),
        Value::Axes => plotting::axes_method(interp, name, args),
        Value::Scalar(Cell::Str(s)) => string_method(&s, name, args),
        Value::Scalar(Cell::Date(d)) => match name {
            "strftime" => Ok(Value::str(d.format(&args.string(0, "format", "strftime")?).to_string())),
            "date" | "normalize" => Ok(Value::Scalar(Cell::Date(d.date().and_time(NaiveTime::MIN)))),
            "day_name" => Ok(Value::str(d.format("%A").to_string())),
            "month_name" => Ok(Value::str(d.format("%B").to_string())),
            other => Err(ExecError::no_attribute("Timestamp", other)),
        },
        Value::Scalar(Cell::Float(f)) if name == "is_integer" => {
            Ok(Value::Scalar(Cell::Bool(f.fract() == 0.0)))
        }
        Value::List(items) => list_method(items, name, args),
        Value::Dict(items) => dict_method(items, name, args),
        other => Err(ExecError::no_attribute(other.type_name(), name)),
    }
}

fn list_method(items: Vec<Value>, name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "tolist" | "to_list" | "copy" => Ok(Value::List(items)),
        "count" => {
            let needle = args.require(0, "value", "count")?;
            let n = items
                .iter()
                .filter(|v| match (v.as_cell(), needle.as_cell()) {
                    (Some(a), Some(b)) => a.loose_eq(b),
                    _ => false,
                })
                .count();
            Ok(Value::Scalar(int_cell(n)))
        }
        "index" => {
            let needle = args.require(0, "value", "index")?;
            items
                .iter()
                .position(|v| match (v.as_cell(), needle.as_cell()) {
                    (Some(a), Some(b)) => a.loose_eq(b),
                    _ => false,
                })
                .map(|i| Value::Scalar(int_cell(i)))
                .ok_or_else(|| ExecError::value(format!("{} is not in list", needle.display())))
        }
        other => Err(ExecError::no_attribute("list", other)),
    }
}

fn dict_method(items: Vec<(Cell, Value)>, name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "keys" => Ok(scalars(items.into_iter().map(|(k, _)| k).collect())),
        "values" => Ok(Value::List(items.into_iter().map(|(_, v)| v).collect())),
        "items" => Ok(Value::List(
            items
                .into_iter()
                .map(|(k, v)| Value::List(vec![Value::Scalar(k), v]))
                .collect(),
        )),
        "get" => {
            let key = args.require(0, "key", "get")?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::NONE);
            Ok(key
                .as_cell()
                .and_then(|k| items.iter().find(|(e, _)| e.loose_eq(k)))
                .map_or(default, |(_, v)| v.clone()))
        }
        "copy" => Ok(Value::Dict(items)),
        other => Err(ExecError::no_attribute("dict", other)),
    }
}

fn reduction(name: &str) -> Option<AggFunc> {
    match name {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" | "nunique" => {
            AggFunc::parse(name).ok()
        }
        _ => None,
    }
}

fn ascending_flags(args: &Args, index: usize) -> ExecResult<Vec<bool>> {
    match args.opt(index, "ascending") {
        None => Ok(vec![true]),
        Some(Value::List(items)) => items.iter().map(Value::truthy).collect(),
        Some(v) => Ok(vec![v.truthy()?]),
    }
}

fn rename_mapping(v: &Value) -> ExecResult<Vec<(String, String)>> {
    match v {
        Value::Dict(items) => Ok(items
            .iter()
            .map(|(k, v)| (k.to_string(), v.display()))
            .collect()),
        other => Err(ExecError::type_error(format!(
            "rename expects a dict of column names, got '{}'",
            other.type_name()
        ))),
    }
}

fn table_method(
    interp: &mut Interpreter<'_>,
    t: Table,
    name: &str,
    args: &Args,
) -> ExecResult<Value> {
    if let Some(func) = reduction(name) {
        return Ok(Value::Column(t.reduce(func)?));
    }
    let table = match name {
        "head" => t.head(args.count(0, "n", 5)?),
        "tail" => t.tail(args.count(0, "n", 5)?),
        "copy" | "reset_index" => t,
        "sort_values" => {
            let by = args.require(0, "by", "sort_values")?.to_names()?;
            t.sort_values(&by, &ascending_flags(args, 1)?)?
        }
        "groupby" => {
            let keys = args.require(0, "by", "groupby")?.to_names()?;
            let as_index = args.flag(usize::MAX, "as_index", true)?;
            return Ok(Value::GroupBy(GroupBy::new(t, keys)?.with_as_index(as_index)));
        }
        "merge" => {
            let Value::Table(right) = args.require(0, "right", "merge")? else {
                return Err(ExecError::type_error("merge expects a DataFrame"));
            };
            merge(&t, right, args, 1)?
        }
        "rename" => match args.get(0, "columns").or_else(|| args.kw("mapper")) {
            Some(v) => t.rename(&rename_mapping(v)?),
            None => t,
        },
        "drop" => drop(&t, args)?,
        "dropna" => {
            let subset = match args.opt(usize::MAX, "subset") {
                Some(v) => v.to_names()?,
                None => Vec::new(),
            };
            t.dropna(&subset)?
        }
        "fillna" => match args.require(0, "value", "fillna")? {
            Value::Scalar(c) => t.fillna(c),
            Value::Dict(items) => {
                let mut out = t;
                for (k, v) in items {
                    let name = k.to_string();
                    let fill = v.as_cell().cloned().unwrap_or(Cell::Null);
                    let values = out
                        .column(&name)?
                        .values
                        .iter()
                        .map(|c| if c.is_null() { fill.clone() } else { c.clone() })
                        .collect();
                    out.set_column(&name, values)?;
                }
                out
            }
            other => {
                return Err(ExecError::type_error(format!(
                    "fillna value must be a scalar or dict, got '{}'",
                    other.type_name()
                )))
            }
        },
        "drop_duplicates" => {
            let subset = match args.opt(0, "subset") {
                Some(v) => v.to_names()?,
                None => Vec::new(),
            };
            t.drop_duplicates(&subset)?
        }
        "nlargest" | "nsmallest" => {
            let n = args.count(0, "n", 5)?;
            let columns = args.require(1, "columns", name)?.to_names()?;
            let first = columns
                .first()
                .ok_or_else(|| ExecError::value("nlargest needs a column"))?;
            t.nlargest(n, first, name == "nlargest")?
        }
        "assign" => {
            let mut out = t;
            for (col, v) in &args.keywords {
                let v = match v {
                    Value::Lambda(_) => interp.call_value(v, &Args::positional(vec![Value::Table(out.clone())]))?,
                    other => other.clone(),
                };
                let values = match v {
                    Value::Scalar(c) => vec![c; out.row_count()],
                    other => other.to_cells()?,
                };
                out.set_column(col, values)?;
            }
            out
        }
        "astype" => match args.require(0, "dtype", "astype")? {
            Value::Dict(items) => {
                let mut out = t;
                for (k, target) in items {
                    let name = k.to_string();
                    let converted = astype(out.column(&name)?, target)?;
                    out.set_column(&name, converted.values)?;
                }
                out
            }
            target => {
                let columns = t
                    .columns
                    .iter()
                    .map(|c| astype(c, target))
                    .collect::<ExecResult<Vec<_>>>()?;
                Table::new(columns)?
            }
        },
        "round" => {
            let digits = args.int(0, "decimals", 0)?;
            let columns = t
                .columns
                .iter()
                .map(|c| {
                    if c.is_numeric() {
                        let values = c
                            .values
                            .iter()
                            .map(|v| round_cell(v, Some(digits)))
                            .collect::<ExecResult<Vec<_>>>()?;
                        Ok(c.map_values(values))
                    } else {
                        Ok(c.clone())
                    }
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Table::new(columns)?
        }
        "select_dtypes" => {
            let include = args.opt_string(0, "include").unwrap_or_else(|| "number".to_string());
            let columns = t
                .columns
                .iter()
                .filter(|c| match include.as_str() {
                    "number" | "float" | "int" | "float64" | "int64" => c.is_numeric(),
                    "object" | "str" | "string" => c.dtype() == "object",
                    "bool" => c.dtype() == "bool",
                    "datetime" | "datetime64" => c.dtype() == "datetime64[ns]",
                    _ => false,
                })
                .cloned()
                .collect();
            Table::new(columns)?
        }
        "get" => {
            let key = args.string(0, "key", "get")?;
            return Ok(match t.column(&key) {
                Ok(c) => Value::Column(c.clone()),
                Err(_) => args.get(1, "default").cloned().unwrap_or(Value::NONE),
            });
        }
        "agg" | "aggregate" => {
            let func = AggFunc::parse(&args.string(0, "func", name)?)?;
            return Ok(Value::Column(t.reduce(func)?));
        }
        "describe" => describe(&t)?,
        "pivot_table" => pivot_table(&t, args)?,
        "query" => {
            let src = args.string(0, "expr", "query")?;
            match interp.eval_query(&t, &src)? {
                Value::Column(mask) => t.filter(&mask.values)?,
                other => {
                    return Err(ExecError::type_error(format!(
                        "query must evaluate to a boolean Series, got '{}'",
                        other.type_name()
                    )))
                }
            }
        }
        "apply" => return apply_table(interp, &t, args),
        "sample" => {
            let rows = sample_rows(t.row_count(), args)?;
            t.take(&rows)
        }
        "plot" => return plotting::table_plot(interp, &t, args),
        other => return Err(ExecError::no_attribute("DataFrame", other)),
    };
    Ok(Value::Table(table))
}

/// Shared by `DataFrame.merge` and `pd.merge`; keyword arguments only
/// after the right table.
pub fn merge(left: &Table, right: &Table, args: &Args, next: usize) -> ExecResult<Table> {
    let how = match args.opt(next, "how") {
        Some(v) => JoinHow::parse(v.as_str().unwrap_or("inner"))?,
        None => JoinHow::Inner,
    };
    let (left_on, right_on) = match args.opt(next + 1, "on") {
        Some(on) => {
            let on = on.to_names()?;
            (on.clone(), on)
        }
        None => match (args.opt(usize::MAX, "left_on"), args.opt(usize::MAX, "right_on")) {
            (Some(l), Some(r)) => (l.to_names()?, r.to_names()?),
            _ => {
                let shared: Vec<String> = left
                    .column_names()
                    .into_iter()
                    .filter(|n| right.has_column(n))
                    .collect();
                if shared.is_empty() {
                    return Err(ExecError::runtime(
                        "No common columns to perform merge on. Merge options: left_on=None, right_on=None",
                    ));
                }
                (shared.clone(), shared)
            }
        },
    };
    left.merge(right, &left_on, &right_on, how)
}

fn drop(t: &Table, args: &Args) -> ExecResult<Table> {
    if let Some(cols) = args.opt(usize::MAX, "columns") {
        return t.drop_columns(&cols.to_names()?);
    }
    let labels = args.require(0, "labels", "drop")?;
    let axis = match args.kw("axis") {
        Some(Value::Scalar(Cell::Str(s))) if s == "columns" => 1,
        Some(v) => v.as_cell().and_then(Cell::as_i64).unwrap_or(0),
        None => 0,
    };
    if axis == 1 {
        return t.drop_columns(&labels.to_names()?);
    }
    let rows = labels.to_cells()?;
    let mut keep = Vec::with_capacity(t.row_count());
    for r in 0..t.row_count() {
        keep.push(Cell::Bool(!rows.iter().any(|c| c.as_i64() == i64::try_from(r).ok())));
    }
    for c in &rows {
        let in_range = c
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .is_some_and(|i| i < t.row_count());
        if !in_range {
            return Err(ExecError::MissingColumn(format!("[{c}] not found in axis")));
        }
    }
    t.filter(&keep)
}

enum Cast {
    Int,
    Float,
    Str,
    Bool,
    Date,
    Keep,
}

fn cast_target(v: &Value) -> ExecResult<Cast> {
    match v {
        Value::Builtin(Builtin::Int) => Ok(Cast::Int),
        Value::Builtin(Builtin::Float) => Ok(Cast::Float),
        Value::Builtin(Builtin::Str) => Ok(Cast::Str),
        Value::Builtin(Builtin::Bool) => Ok(Cast::Bool),
        Value::Scalar(Cell::Str(s)) => match s.as_str() {
            "int" | "int64" | "int32" | "Int64" | "Int32" => Ok(Cast::Int),
            "float" | "float64" | "float32" | "Float64" => Ok(Cast::Float),
            "str" | "string" | "object" => Ok(Cast::Str),
            "bool" | "boolean" => Ok(Cast::Bool),
            "datetime64" | "datetime64[ns]" => Ok(Cast::Date),
            "category" => Ok(Cast::Keep),
            other => Err(ExecError::type_error(format!(
                "data type '{other}' not understood"
            ))),
        },
        other => Err(ExecError::type_error(format!(
            "data type '{}' not understood",
            other.display()
        ))),
    }
}

fn astype(c: &Column, target: &Value) -> ExecResult<Column> {
    let cast = cast_target(target)?;
    let values = c
        .values
        .iter()
        .map(|cell| match cast {
            Cast::Keep => Ok(cell.clone()),
            Cast::Str if cell.is_null() => Ok(Cell::Str("nan".into())),
            Cast::Str => Ok(Cell::Str(cell.to_string())),
            Cast::Int if cell.is_null() => Err(ExecError::value(
                "Cannot convert non-finite values (NA or inf) to integer",
            )),
            Cast::Int => builtins::convert(Builtin::Int, &Value::Scalar(cell.clone())),
            Cast::Float if cell.is_null() => Ok(Cell::Float(f64::NAN)),
            Cast::Float => builtins::convert(Builtin::Float, &Value::Scalar(cell.clone())),
            Cast::Bool => Ok(Cell::Bool(cell.truthy())),
            Cast::Date => match cell {
                Cell::Date(_) => Ok(cell.clone()),
                c if c.is_null() => Ok(Cell::Null),
                Cell::Str(s) => parse_datetime(s).map(Cell::Date).ok_or_else(|| {
                    ExecError::value(format!("Unknown datetime string format, unable to parse: {s}"))
                }),
                other => Err(ExecError::type_error(format!(
                    "cannot convert {} to datetime",
                    other.type_name()
                ))),
            },
        })
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(c.map_values(values))
}

fn mask_column(c: &Column, f: impl Fn(&Cell) -> bool) -> Value {
    Value::Column(c.map_values(c.values.iter().map(|v| Cell::Bool(f(v))).collect()))
}

fn quantile(c: &Column, q: f64) -> ExecResult<Cell> {
    let mut values = crate::exec::table::numeric_values(&c.values, "quantile")?;
    if values.is_empty() {
        return Ok(Cell::Float(f64::NAN));
    }
    values.sort_by(f64::total_cmp);
    #[allow(clippy::cast_precision_loss)]
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(values.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let frac = pos - lo as f64;
    Ok(Cell::Float(values[lo] + (values[hi] - values[lo]) * frac))
}

fn single_level(labels: Vec<Cell>) -> Index {
    Index {
        names: vec![String::new()],
        labels: labels.into_iter().map(|l| vec![l]).collect(),
    }
}

/// `DataFrame.describe()`: summary statistics of the numeric columns, or
/// counts of the other columns when none is numeric.
fn describe(t: &Table) -> ExecResult<Table> {
    let numeric: Vec<&Column> = t.columns.iter().filter(|c| c.is_numeric()).collect();
    if numeric.is_empty() {
        let labels = ["count", "unique", "top", "freq"].map(|l| Cell::Str(l.to_string()));
        let columns = t
            .columns
            .iter()
            .map(|c| {
                let counts = c.value_counts(false, false)?;
                let (top, freq) = match counts.values.first() {
                    Some(freq) => (counts.label_cell(0), freq.clone()),
                    None => (Cell::Null, Cell::Null),
                };
                let unique = c.values.iter().filter(|v| !v.is_null()).filter_map(Cell::key);
                let unique = unique.collect::<indexmap::IndexSet<_>>().len();
                let values = vec![c.reduce(AggFunc::Count)?, int_cell(unique), top, freq];
                Ok(Column::new(c.name.clone(), values).with_index(single_level(labels.to_vec())))
            })
            .collect::<ExecResult<Vec<_>>>()?;
        return Table::new(columns);
    }

    let labels = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"]
        .map(|l| Cell::Str(l.to_string()));
    let columns = numeric
        .into_iter()
        .map(|c| {
            let values = vec![
                c.reduce(AggFunc::Count)?,
                c.reduce(AggFunc::Mean)?,
                c.reduce(AggFunc::Std)?,
                c.reduce(AggFunc::Min)?,
                quantile(c, 0.25)?,
                quantile(c, 0.5)?,
                quantile(c, 0.75)?,
                c.reduce(AggFunc::Max)?,
            ];
            Ok(Column::new(c.name.clone(), values).with_index(single_level(labels.to_vec())))
        })
        .collect::<ExecResult<Vec<_>>>()?;
    Table::new(columns)
}

fn compare_keys(a: &[Cell], b: &[Cell]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// `DataFrame.pivot_table(values, index, columns, aggfunc)`. The index
/// levels come back as leading columns, sorted; rows with a missing key are
/// dropped.
fn pivot_table(t: &Table, args: &Args) -> ExecResult<Table> {
    let index = args.require(1, "index", "pivot_table")?.to_names()?;
    let pivot = args.opt_string(2, "columns");
    let func = match args.opt(3, "aggfunc") {
        None => AggFunc::Mean,
        Some(v) => AggFunc::parse(v.as_str().ok_or_else(|| {
            ExecError::type_error("aggfunc must be the name of an aggregation")
        })?)?,
    };
    let fill = args.opt(4, "fill_value").and_then(Value::as_cell).cloned();
    let values = match args.opt(0, "values") {
        Some(v) => v.to_names()?,
        None => t
            .columns
            .iter()
            .filter(|c| {
                c.is_numeric() && !index.contains(&c.name) && pivot.as_deref() != Some(c.name.as_str())
            })
            .map(|c| c.name.clone())
            .collect(),
    };

    let keys = index
        .iter()
        .map(|name| t.column(name))
        .collect::<ExecResult<Vec<_>>>()?;
    let mut grouped: IndexMap<Vec<CellKey>, (Vec<Cell>, Vec<usize>)> = IndexMap::new();
    for row in 0..t.row_count() {
        let cells: Vec<Cell> = keys.iter().map(|c| c.values[row].clone()).collect();
        if cells.iter().any(Cell::is_null) {
            continue;
        }
        let key = cells.iter().map(Cell::require_key).collect::<ExecResult<Vec<_>>>()?;
        grouped.entry(key).or_insert_with(|| (cells, Vec::new())).1.push(row);
    }
    let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = grouped.into_values().collect();
    groups.sort_by(|a, b| compare_keys(&a.0, &b.0));

    let mut columns: Vec<Column> = index
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name.clone(), groups.iter().map(|g| g.0[i].clone()).collect()))
        .collect();

    let finish = |cell: Cell| match (&fill, cell.is_null()) {
        (Some(f), true) => f.clone(),
        _ => cell,
    };
    let reduce = |col: &Column, rows: &[usize]| -> ExecResult<Cell> {
        if rows.is_empty() {
            return Ok(finish(Cell::Null));
        }
        let cells: Vec<Cell> = rows.iter().map(|&r| col.values[r].clone()).collect();
        Ok(finish(aggregate(&cells, func)?))
    };

    let Some(pivot) = pivot else {
        for name in &values {
            let col = t.column(name)?;
            let cells = groups
                .iter()
                .map(|g| reduce(col, &g.1))
                .collect::<ExecResult<Vec<_>>>()?;
            columns.push(Column::new(name.clone(), cells));
        }
        return Table::new(columns);
    };

    let pivot_col = t.column(&pivot)?;
    let mut levels: Vec<Cell> = pivot_col.unique()?.into_iter().filter(|c| !c.is_null()).collect();
    levels.sort_by(Cell::total_cmp);
    for name in &values {
        let col = t.column(name)?;
        for level in &levels {
            let out_name = if values.len() == 1 {
                level.to_string()
            } else {
                format!("{name}_{level}")
            };
            let cells = groups
                .iter()
                .map(|g| {
                    let rows: Vec<usize> = g
                        .1
                        .iter()
                        .copied()
                        .filter(|&r| pivot_col.values[r].loose_eq(level))
                        .collect();
                    reduce(col, &rows)
                })
                .collect::<ExecResult<Vec<_>>>()?;
            columns.push(Column::new(out_name, cells));
        }
    }
    Table::new(columns)
}

/// `DataFrame.apply(func, axis)`. With `axis=1` each row is passed as a
/// Series labelled by column name; otherwise each column is passed. `func`
/// must return a scalar.
fn apply_table(interp: &mut Interpreter<'_>, t: &Table, args: &Args) -> ExecResult<Value> {
    let func = args.require(0, "func", "apply")?;
    let by_row = match args.opt(1, "axis") {
        None => false,
        Some(Value::Scalar(Cell::Str(s))) => s == "columns",
        Some(v) => v.as_cell().and_then(Cell::as_i64) == Some(1),
    };
    let names: Vec<Cell> = t.columns.iter().map(|c| Cell::Str(c.name.clone())).collect();
    let scalar = |v: Value| match v {
        Value::Scalar(c) => Ok(c),
        other => Err(ExecError::type_error(format!(
            "apply function returned a {}, expected a scalar",
            other.type_name()
        ))),
    };

    if by_row {
        let mut out = Vec::with_capacity(t.row_count());
        for row in 0..t.row_count() {
            let cells = t.columns.iter().map(|c| c.values[row].clone()).collect();
            let series = Column::new(row.to_string(), cells).with_index(single_level(names.clone()));
            out.push(scalar(interp.call_value(func, &Args::positional(vec![Value::Column(series)]))?)?);
        }
        return Ok(Value::Column(Column::new(String::new(), out)));
    }

    let out = t
        .columns
        .iter()
        .map(|c| scalar(interp.call_value(func, &Args::positional(vec![Value::Column(c.clone())]))?))
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(Value::Column(Column::new(String::new(), out).with_index(single_level(names))))
}

/// Rows picked by `sample(n, frac, replace, random_state)`. Sampling is
/// seeded, with seed 0 when no `random_state` is given.
fn sample_rows(len: usize, args: &Args) -> ExecResult<Vec<usize>> {
    let n = match (args.opt(0, "n"), args.opt(usize::MAX, "frac")) {
        (Some(_), _) => args.count(0, "n", 1)?,
        (None, Some(frac)) => {
            let frac = frac
                .as_cell()
                .and_then(Cell::as_f64)
                .filter(|f| *f >= 0.0)
                .ok_or_else(|| ExecError::value("frac must be a non-negative number"))?;
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = (frac * len as f64).round() as usize;
            n
        }
        (None, None) => 1,
    };
    let replace = args.flag(usize::MAX, "replace", false)?;
    if !replace && n > len {
        return Err(ExecError::value(
            "Cannot take a larger sample than population when 'replace=False'",
        ));
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    let seed = args
        .opt(usize::MAX, "random_state")
        .and_then(Value::as_cell)
        .and_then(Cell::as_i64)
        .unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed.unsigned_abs());
    Ok(if replace {
        (0..n).map(|_| rng.gen_range(0..len)).collect()
    } else {
        rand::seq::index::sample(&mut rng, len, n).into_vec()
    })
}

/// Aggregates over a sliding window; positions with fewer than
/// `min_periods` present values are NaN.
fn rolling_method(r: &Rolling, name: &str, args: &Args) -> ExecResult<Value> {
    let func = match name {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" => AggFunc::parse(name)?,
        "agg" | "aggregate" => AggFunc::parse(&args.string(0, "func", name)?)?,
        other => return Err(ExecError::no_attribute("Rolling", other)),
    };
    let c = &r.column;
    let values = (0..c.len())
        .map(|row| {
            let window = &c.values[(row + 1).saturating_sub(r.window)..=row];
            let present = window.iter().filter(|v| !v.is_null()).count();
            if present < r.min_periods {
                Ok(Cell::Float(f64::NAN))
            } else {
                aggregate(window, func)
            }
        })
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(Value::Column(c.map_values(values)))
}

fn pearson(a: &Column, b: &Column) -> ExecResult<Cell> {
    let pairs: Vec<(f64, f64)> = a
        .values
        .iter()
        .zip(&b.values)
        .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return Ok(Cell::Float(f64::NAN));
    }
    #[allow(clippy::cast_precision_loss)]
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = pairs.iter().map(|(x, y)| (x - mx) * (y - my)).sum();
    let vx: f64 = pairs.iter().map(|(x, _)| (x - mx).powi(2)).sum();
    let vy: f64 = pairs.iter().map(|(_, y)| (y - my).powi(2)).sum();
    Ok(Cell::Float(cov / (vx * vy).sqrt()))
}

#[allow(clippy::too_many_lines)]
fn column_method(
    interp: &mut Interpreter<'_>,
    c: Column,
    name: &str,
    args: &Args,
) -> ExecResult<Value> {
    if let Some(func) = reduction(name) {
        return Ok(Value::Scalar(c.reduce(func)?));
    }
    let column = match name {
        "unique" => return Ok(scalars(c.unique()?)),
        "tolist" | "to_list" => return Ok(scalars(c.values)),
        "value_counts" => c.value_counts(
            args.flag(usize::MAX, "normalize", false)?,
            args.flag(usize::MAX, "ascending", false)?,
        )?,
        "isin" => {
            let wanted = args.require(0, "values", "isin")?.to_cells()?;
            let keys: Vec<CellKey> = wanted.iter().filter_map(Cell::key).collect();
            return Ok(mask_column(&c, |v| {
                !v.is_null() && v.key().is_some_and(|k| keys.contains(&k))
            }));
        }
        "isna" | "isnull" => return Ok(mask_column(&c, Cell::is_null)),
        "notna" | "notnull" => return Ok(mask_column(&c, |v| !v.is_null())),
        "round" => {
            let digits = args.int(0, "decimals", 0)?;
            let values = c
                .values
                .iter()
                .map(|v| round_cell(v, Some(digits)))
                .collect::<ExecResult<Vec<_>>>()?;
            c.map_values(values)
        }
        "abs" => {
            return builtins::call(interp, Builtin::Abs, &Args::positional(vec![Value::Column(c)]))
        }
        "astype" => astype(&c, args.require(0, "dtype", "astype")?)?,
        "fillna" => {
            let fill = args
                .require(0, "value", "fillna")?
                .as_cell()
                .cloned()
                .ok_or_else(|| ExecError::type_error("fillna value must be a scalar"))?;
            let values = c
                .values
                .iter()
                .map(|v| if v.is_null() { fill.clone() } else { v.clone() })
                .collect();
            c.map_values(values)
        }
        "dropna" => {
            let rows: Vec<usize> = (0..c.len()).filter(|&r| !c.values[r].is_null()).collect();
            c.take(&rows)
        }
        "apply" | "map" => {
            let func = args.require(0, "func", name)?;
            let values = match func {
                Value::Dict(items) => c
                    .values
                    .iter()
                    .map(|v| {
                        items
                            .iter()
                            .find(|(k, _)| k.loose_eq(v))
                            .and_then(|(_, out)| out.as_cell().cloned())
                            .unwrap_or(Cell::Null)
                    })
                    .collect(),
                f => c
                    .values
                    .iter()
                    .map(|v| interp.apply_cell(f, v))
                    .collect::<ExecResult<Vec<_>>>()?,
            };
            c.map_values(values)
        }
        "head" => c.take(&(0..args.count(0, "n", 5)?.min(c.len())).collect::<Vec<_>>()),
        "tail" => {
            let n = args.count(0, "n", 5)?.min(c.len());
            c.take(&(c.len() - n..c.len()).collect::<Vec<_>>())
        }
        "sort_values" => c.sort_values(args.flag(usize::MAX, "ascending", true)?),
        "sort_index" => {
            let ascending = args.flag(usize::MAX, "ascending", true)?;
            let mut rows: Vec<usize> = (0..c.len()).collect();
            rows.sort_by(|&a, &b| {
                let ord = c.label_cell(a).total_cmp(&c.label_cell(b));
                if ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
            c.take(&rows)
        }
        "cumsum" => {
            let mut running = Cell::Int(0);
            let mut values = Vec::with_capacity(c.len());
            for v in &c.values {
                if v.is_null() {
                    values.push(Cell::Float(f64::NAN));
                    continue;
                }
                running = crate::exec::ops::binary_cells(
                    crate::exec::parser::BinOp::Add,
                    &running,
                    v,
                    true,
                )?;
                values.push(running.clone());
            }
            c.map_values(values)
        }
        "diff" | "shift" => {
            let periods = usize::try_from(args.int(0, "periods", 1)?.max(0)).unwrap_or(0);
            let values = (0..c.len())
                .map(|r| {
                    if r < periods {
                        return Ok(Cell::Float(f64::NAN));
                    }
                    let prev = &c.values[r - periods];
                    if name == "shift" {
                        Ok(prev.clone())
                    } else {
                        crate::exec::ops::binary_cells(
                            crate::exec::parser::BinOp::Sub,
                            &c.values[r],
                            prev,
                            true,
                        )
                    }
                })
                .collect::<ExecResult<Vec<_>>>()?;
            c.map_values(values)
        }
        "between" => {
            let lo = args.require(0, "left", "between")?.as_cell().cloned().unwrap_or(Cell::Null);
            let hi = args.require(1, "right", "between")?.as_cell().cloned().unwrap_or(Cell::Null);
            let values = c
                .values
                .iter()
                .map(|v| {
                    let above = v.partial_compare(&lo)?.is_some_and(|o| o.is_ge());
                    let below = v.partial_compare(&hi)?.is_some_and(|o| o.is_le());
                    Ok(Cell::Bool(above && below))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            c.map_values(values)
        }
        "clip" => {
            let lo = args.opt(0, "lower").and_then(Value::as_cell).and_then(Cell::as_f64);
            let hi = args.opt(1, "upper").and_then(Value::as_cell).and_then(Cell::as_f64);
            let values = c
                .values
                .iter()
                .map(|v| match v.as_f64() {
                    Some(x) if lo.is_some_and(|l| x < l) => Cell::Float(lo.unwrap_or(x)),
                    Some(x) if hi.is_some_and(|h| x > h) => Cell::Float(hi.unwrap_or(x)),
                    _ => v.clone(),
                })
                .collect();
            c.map_values(values)
        }
        "idxmax" | "idxmin" => {
            let func = if name == "idxmax" { AggFunc::Max } else { AggFunc::Min };
            let best = c.reduce(func)?;
            let row = c
                .values
                .iter()
                .position(|v| v.loose_eq(&best))
                .ok_or_else(|| ExecError::value(format!("attempt to get {name} of an empty sequence")))?;
            return Ok(Value::Scalar(c.label_cell(row)));
        }
        "nlargest" | "nsmallest" => {
            let n = args.count(0, "n", 5)?;
            let sorted = c.sort_values(name == "nsmallest");
            let present: Vec<usize> = (0..sorted.len())
                .filter(|&r| !sorted.values[r].is_null())
                .take(n)
                .collect();
            sorted.take(&present)
        }
        "to_frame" => {
            let out_name = args.opt_string(0, "name");
            return Ok(Value::Table(if c.index.is_some() {
                c.reset_index(out_name.as_deref())
            } else {
                let name = out_name.unwrap_or_else(|| c.name.clone());
                Table::new(vec![Column::new(name, c.values)])?
            }));
        }
        "reset_index" => {
            if args.flag(usize::MAX, "drop", false)? {
                Column::new(c.name.clone(), c.values)
            } else {
                let out_name = args.opt_string(usize::MAX, "name");
                return Ok(Value::Table(c.reset_index(out_name.as_deref())));
            }
        }
        "any" => return Ok(Value::Scalar(Cell::Bool(c.values.iter().any(Cell::truthy)))),
        "all" => {
            return Ok(Value::Scalar(Cell::Bool(
                c.values.iter().filter(|v| !v.is_null()).all(Cell::truthy),
            )))
        }
        "quantile" => {
            let q = args
                .opt(0, "q")
                .and_then(Value::as_cell)
                .and_then(Cell::as_f64)
                .unwrap_or(0.5);
            return Ok(Value::Scalar(quantile(&c, q)?));
        }
        "corr" => {
            let Value::Column(other) = args.require(0, "other", "corr")? else {
                return Err(ExecError::type_error("corr expects a Series"));
            };
            return Ok(Value::Scalar(pearson(&c, other)?));
        }
        "replace" => {
            let from = args.require(0, "to_replace", "replace")?;
            let to = args.get(1, "value").and_then(Value::as_cell).cloned().unwrap_or(Cell::Null);
            let values = match from {
                Value::Dict(items) => c
                    .values
                    .iter()
                    .map(|v| {
                        items
                            .iter()
                            .find(|(k, _)| k.loose_eq(v))
                            .and_then(|(_, out)| out.as_cell().cloned())
                            .unwrap_or_else(|| v.clone())
                    })
                    .collect(),
                other => {
                    let targets = other.to_cells()?;
                    c.values
                        .iter()
                        .map(|v| {
                            if targets.iter().any(|t| t.loose_eq(v)) {
                                to.clone()
                            } else {
                                v.clone()
                            }
                        })
                        .collect()
                }
            };
            c.map_values(values)
        }
        "to_dict" => {
            return Ok(Value::Dict(
                (0..c.len())
                    .map(|r| (c.label_cell(r), Value::Scalar(c.values[r].clone())))
                    .collect(),
            ))
        }
        "agg" | "aggregate" => {
            let func = AggFunc::parse(&args.string(0, "func", name)?)?;
            return Ok(Value::Scalar(c.reduce(func)?));
        }
        "rolling" => {
            let window = args.count(0, "window", 0)?;
            if window == 0 {
                return Err(ExecError::value("window must be a positive integer"));
            }
            let min_periods = args.count(usize::MAX, "min_periods", window)?;
            return Ok(Value::Rolling(Rolling {
                column: c,
                window,
                min_periods,
            }));
        }
        "sample" => {
            let rows = sample_rows(c.len(), args)?;
            c.take(&rows)
        }
        "copy" => c,
        "plot" => return plotting::column_plot(interp, &c, args),
        other => return Err(ExecError::no_attribute("Series", other)),
    };
    Ok(Value::Column(column))
}

fn aggregated(g: &GroupBy, result: Aggregated) -> Value {
    match result {
        Aggregated::Column(c) if !g.as_index => Value::Table(c.reset_index(None)),
        Aggregated::Column(c) => Value::Column(c),
        Aggregated::Table(t) => Value::Table(t),
    }
}

fn named_spec(out: &str, spec: &Value) -> ExecResult<NamedAgg> {
    match spec {
        Value::List(parts) if parts.len() == 2 => {
            let source = parts[0]
                .as_str()
                .ok_or_else(|| ExecError::type_error("named aggregation column must be a string"))?;
            let func = parts[1]
                .as_str()
                .ok_or_else(|| ExecError::type_error("named aggregation function must be a string"))?;
            Ok((out.to_string(), source.to_string(), AggFunc::parse(func)?))
        }
        other => Err(ExecError::type_error(format!(
            "Must provide 'func' or tuples of '(column, aggfunc)', got '{}'",
            other.type_name()
        ))),
    }
}

fn groupby_method(g: &GroupBy, name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" | "nunique"
        | "first" | "last" => Ok(aggregated(g, g.aggregate(AggFunc::parse(name)?)?)),
        "size" => {
            let sizes = g.size()?;
            if g.as_index {
                Ok(Value::Column(sizes))
            } else {
                Ok(Value::Table(sizes.reset_index(Some("size"))))
            }
        }
        "agg" | "aggregate" => {
            if !args.keywords.is_empty() && args.positional.is_empty() {
                let specs = args
                    .keywords
                    .iter()
                    .map(|(out, spec)| named_spec(out, spec))
                    .collect::<ExecResult<Vec<_>>>()?;
                return Ok(Value::Table(g.aggregate_named(&specs)?));
            }
            match args.require(0, "func", name)? {
                Value::Scalar(Cell::Str(func)) => Ok(aggregated(g, g.aggregate(AggFunc::parse(func)?)?)),
                Value::Dict(items) => {
                    let mut specs = Vec::new();
                    for (col, funcs) in items {
                        let col = col.to_string();
                        match funcs {
                            Value::Scalar(Cell::Str(f)) => {
                                specs.push((col.clone(), col.clone(), AggFunc::parse(f)?));
                            }
                            Value::List(fs) => {
                                for f in fs {
                                    let f = f.as_str().ok_or_else(|| {
                                        ExecError::type_error("aggregation names must be strings")
                                    })?;
                                    specs.push((format!("{col}_{f}"), col.clone(), AggFunc::parse(f)?));
                                }
                            }
                            other => {
                                return Err(ExecError::type_error(format!(
                                    "unsupported aggregation '{}'",
                                    other.display()
                                )))
                            }
                        }
                    }
                    Ok(Value::Table(g.aggregate_named(&specs)?))
                }
                Value::List(funcs) => {
                    let Some(Selection::One(col)) = &g.selection else {
                        return Err(ExecError::runtime(
                            "a list of functions needs a single selected column",
                        ));
                    };
                    let specs = funcs
                        .iter()
                        .map(|f| {
                            let f = f.as_str().ok_or_else(|| {
                                ExecError::type_error("aggregation names must be strings")
                            })?;
                            Ok((f.to_string(), col.clone(), AggFunc::parse(f)?))
                        })
                        .collect::<ExecResult<Vec<_>>>()?;
                    Ok(Value::Table(g.aggregate_named(&specs)?))
                }
                other => Err(ExecError::type_error(format!(
                    "unsupported aggregation '{}'",
                    other.type_name()
                ))),
            }
        }
        other => Err(ExecError::no_attribute("DataFrameGroupBy", other)),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            start = false;
        } else {
            out.push(ch);
            start = true;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

fn split_cell(s: &str, sep: Option<&str>, limit: Option<usize>) -> Cell {
    let parts: Vec<Cell> = match (sep, limit) {
        (Some(sep), Some(n)) => s.splitn(n + 1, sep).map(|p| Cell::Str(p.to_string())).collect(),
        (Some(sep), None) => s.split(sep).map(|p| Cell::Str(p.to_string())).collect(),
        (None, _) => s.split_whitespace().map(|p| Cell::Str(p.to_string())).collect(),
    };
    Cell::List(parts)
}

fn string_method(s: &str, name: &str, args: &Args) -> ExecResult<Value> {
    let out = match name {
        "lower" => s.to_lowercase(),
        "upper" => s.to_uppercase(),
        "strip" => s.trim().to_string(),
        "lstrip" => s.trim_start().to_string(),
        "rstrip" => s.trim_end().to_string(),
        "title" => title_case(s),
        "capitalize" => capitalize(s),
        "replace" => s.replace(
            &args.string(0, "old", "replace")?,
            &args.string(1, "new", "replace")?,
        ),
        "startswith" => {
            return Ok(Value::Scalar(Cell::Bool(s.starts_with(&args.string(0, "prefix", name)?))))
        }
        "endswith" => {
            return Ok(Value::Scalar(Cell::Bool(s.ends_with(&args.string(0, "suffix", name)?))))
        }
        "split" => {
            let sep = args.opt_string(0, "sep");
            let parts = match sep.as_deref() {
                Some(sep) => s.split(sep).map(Value::str).collect(),
                None => s.split_whitespace().map(Value::str).collect(),
            };
            return Ok(Value::List(parts));
        }
        "join" => {
            let items = builtins::iterate(args.require(0, "iterable", "join")?)?;
            items.iter().map(Value::display).collect::<Vec<_>>().join(s)
        }
        "format" => {
            let mut out = s.to_string();
            for v in &args.positional {
                if let Some(pos) = out.find("{}") {
                    out.replace_range(pos..pos + 2, &v.display());
                }
            }
            for (k, v) in &args.keywords {
                out = out.replace(&format!("{{{k}}}"), &v.display());
            }
            out
        }
        "zfill" => {
            let width = args.count(0, "width", 0)?;
            format!("{s:0>width$}")
        }
        "isdigit" => return Ok(Value::Scalar(Cell::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))),
        other => return Err(ExecError::no_attribute("str", other)),
    };
    Ok(Value::str(out))
}

fn str_method(c: &Column, name: &str, args: &Args) -> ExecResult<Value> {
    let map_str = |f: &dyn Fn(&str) -> Cell| -> Value {
        let values = c
            .values
            .iter()
            .map(|v| match v {
                Cell::Str(s) => f(s),
                _ => Cell::Null,
            })
            .collect();
        Value::Column(c.map_values(values))
    };
    match name {
        "lower" => Ok(map_str(&|s| Cell::Str(s.to_lowercase()))),
        "upper" => Ok(map_str(&|s| Cell::Str(s.to_uppercase()))),
        "strip" => Ok(map_str(&|s| Cell::Str(s.trim().to_string()))),
        "lstrip" => Ok(map_str(&|s| Cell::Str(s.trim_start().to_string()))),
        "rstrip" => Ok(map_str(&|s| Cell::Str(s.trim_end().to_string()))),
        "title" => Ok(map_str(&|s| Cell::Str(title_case(s)))),
        "capitalize" => Ok(map_str(&|s| Cell::Str(capitalize(s)))),
        "len" => {
            let values = c
                .values
                .iter()
                .map(|v| match v {
                    Cell::Str(s) => int_cell(s.chars().count()),
                    Cell::List(l) => int_cell(l.len()),
                    _ => Cell::Float(f64::NAN),
                })
                .collect();
            Ok(Value::Column(c.map_values(values)))
        }
        "contains" => {
            let pat = args.string(0, "pat", "contains")?;
            let case = args.flag(1, "case", true)?;
            let use_regex = args.flag(usize::MAX, "regex", true)?;
            let na = args.kw("na").and_then(Value::as_cell).cloned().unwrap_or(Cell::Null);
            let re = if use_regex {
                Some(
                    RegexBuilder::new(&pat)
                        .case_insensitive(!case)
                        .build()
                        .map_err(|e| ExecError::value(format!("invalid pattern '{pat}': {e}")))?,
                )
            } else {
                None
            };
            let lowered = pat.to_lowercase();
            let values = c
                .values
                .iter()
                .map(|v| match v {
                    Cell::Str(s) => Cell::Bool(match &re {
                        Some(re) => re.is_match(s),
                        None if case => s.contains(&pat),
                        None => s.to_lowercase().contains(&lowered),
                    }),
                    _ => na.clone(),
                })
                .collect();
            Ok(Value::Column(c.map_values(values)))
        }
        "startswith" => {
            let pat = args.string(0, "pat", name)?;
            Ok(map_str(&|s| Cell::Bool(s.starts_with(&pat))))
        }
        "endswith" => {
            let pat = args.string(0, "pat", name)?;
            Ok(map_str(&|s| Cell::Bool(s.ends_with(&pat))))
        }
        "replace" => {
            let pat = args.string(0, "pat", name)?;
            let repl = args.string(1, "repl", name)?;
            if args.flag(usize::MAX, "regex", false)? {
                let re = RegexBuilder::new(&pat)
                    .build()
                    .map_err(|e| ExecError::value(format!("invalid pattern '{pat}': {e}")))?;
                Ok(map_str(&|s| Cell::Str(re.replace_all(s, repl.as_str()).into_owned())))
            } else {
                Ok(map_str(&|s| Cell::Str(s.replace(&pat, &repl))))
            }
        }
        "split" => {
            let sep = args.opt_string(0, "pat");
            let limit = args
                .opt(1, "n")
                .and_then(Value::as_cell)
                .and_then(Cell::as_i64)
                .filter(|n| *n >= 0)
                .and_then(|n| usize::try_from(n).ok());
            Ok(map_str(&|s| split_cell(s, sep.as_deref(), limit)))
        }
        "get" => {
            let i = args.int(0, "i", 0)?;
            let values = c
                .values
                .iter()
                .map(|v| {
                    let items: Vec<Cell> = match v {
                        Cell::List(items) => items.clone(),
                        Cell::Str(s) => s.chars().map(|ch| Cell::Str(ch.to_string())).collect(),
                        _ => return Cell::Null,
                    };
                    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                    let idx = if i < 0 { len + i } else { i };
                    usize::try_from(idx)
                        .ok()
                        .and_then(|x| items.get(x).cloned())
                        .unwrap_or(Cell::Null)
                })
                .collect();
            Ok(Value::Column(c.map_values(values)))
        }
        "slice" => {
            let start = usize::try_from(args.int(0, "start", 0)?.max(0)).unwrap_or(0);
            let stop = args.opt(1, "stop").and_then(Value::as_cell).and_then(Cell::as_i64);
            Ok(map_str(&|s| {
                let chars: Vec<char> = s.chars().collect();
                let end = stop
                    .and_then(|e| usize::try_from(e.max(0)).ok())
                    .unwrap_or(chars.len())
                    .min(chars.len());
                Cell::Str(chars[start.min(end)..end].iter().collect())
            }))
        }
        "count" => {
            let pat = args.string(0, "pat", name)?;
            Ok(map_str(&|s| int_cell(s.matches(pat.as_str()).count())))
        }
        "zfill" => {
            let width = args.count(0, "width", 0)?;
            Ok(map_str(&|s| Cell::Str(format!("{s:0>width$}"))))
        }
        other => Err(ExecError::no_attribute("StringMethods", other)),
    }
}

const DATE_PARTS: &[&str] = &[
    "year", "month", "day", "hour", "minute", "second", "dayofweek", "weekday", "day_of_week",
    "dayofyear", "day_of_year", "quarter", "week", "weekofyear", "date",
];

fn date_part(d: &NaiveDateTime, name: &str) -> Option<Cell> {
    let n = |v: u32| Cell::Int(i64::from(v));
    Some(match name {
        "year" => Cell::Int(i64::from(d.year())),
        "month" => n(d.month()),
        "day" => n(d.day()),
        "hour" => n(d.hour()),
        "minute" => n(d.minute()),
        "second" => n(d.second()),
        "dayofweek" | "weekday" | "day_of_week" => n(d.weekday().num_days_from_monday()),
        "dayofyear" | "day_of_year" => n(d.ordinal()),
        "quarter" => n((d.month() - 1) / 3 + 1),
        "week" | "weekofyear" => n(d.iso_week().week()),
        "date" => Cell::Date(d.date().and_time(NaiveTime::MIN)),
        _ => return None,
    })
}

fn map_dates(c: &Column, f: impl Fn(&NaiveDateTime) -> Cell) -> Value {
    let values = c
        .values
        .iter()
        .map(|v| match v {
            Cell::Date(d) => f(d),
            _ => Cell::Null,
        })
        .collect();
    Value::Column(c.map_values(values))
}

fn dt_attr(c: &Column, name: &str) -> ExecResult<Value> {
    if !DATE_PARTS.contains(&name) {
        return Err(ExecError::no_attribute("DatetimeProperties", name));
    }
    Ok(map_dates(c, |d| date_part(d, name).unwrap_or(Cell::Null)))
}

fn dt_method(c: &Column, name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "strftime" => {
            let fmt = args.string(0, "date_format", name)?;
            Ok(map_dates(c, |d| Cell::Str(d.format(&fmt).to_string())))
        }
        "day_name" => Ok(map_dates(c, |d| Cell::Str(d.format("%A").to_string()))),
        "month_name" => Ok(map_dates(c, |d| Cell::Str(d.format("%B").to_string()))),
        "normalize" => Ok(map_dates(c, |d| Cell::Date(d.date().and_time(NaiveTime::MIN)))),
        "to_period" => {
            let freq = args.string(0, "freq", name)?;
            let fmt: fn(&NaiveDateTime) -> String = match freq.as_str() {
                "M" | "ME" => |d| d.format("%Y-%m").to_string(),
                "Y" | "A" | "YE" => |d| d.format("%Y").to_string(),
                "D" => |d| d.format("%Y-%m-%d").to_string(),
                "Q" | "QE" => |d| format!("{}Q{}", d.year(), (d.month() - 1) / 3 + 1),
                other => {
                    return Err(ExecError::value(format!("Invalid frequency: {other}")));
                }
            };
            Ok(map_dates(c, |d| Cell::Str(fmt(d))))
        }
        other => Err(ExecError::no_attribute("DatetimeProperties", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::interpreter::execute;
    use crate::exec::namespace::ExecutionNamespace;
    use pretty_assertions::assert_eq;

    fn ns() -> ExecutionNamespace {
        let orders = Table::from_pairs(vec![
            ("order_id".to_string(), vec![Cell::Int(1), Cell::Int(2), Cell::Int(3), Cell::Int(4)]),
            (
                "customer".to_string(),
                vec![
                    Cell::Str("Ann".into()),
                    Cell::Str("Bo".into()),
                    Cell::Str("Ann".into()),
                    Cell::Null,
                ],
            ),
            (
                "amount".to_string(),
                vec![Cell::Float(10.0), Cell::Float(5.5), Cell::Float(4.5), Cell::Float(8.0)],
            ),
            (
                "placed".to_string(),
                vec![
                    Cell::Str("2024-01-15".into()),
                    Cell::Str("2024-02-01".into()),
                    Cell::Str("2024-02-20".into()),
                    Cell::Str("2024-05-03".into()),
                ],
            ),
        ])
        .unwrap();
        ExecutionNamespace::from_tables(vec![("orders".to_string(), orders)])
    }

    fn run(code: &str) -> ExecutionNamespace {
        let mut ns = ns();
        execute(code, &mut ns).unwrap();
        ns
    }

    #[test]
    fn test_groupby_sum_reset_index() {
        let ns = run("result = orders.groupby('customer')['amount'].sum().reset_index()");
        let t = ns.result_table().unwrap();
        assert_eq!(t.column_names(), vec!["customer", "amount"]);
        assert_eq!(t.column("customer").unwrap().values, vec![Cell::Str("Ann".into()), Cell::Str("Bo".into())]);
        assert_eq!(t.column("amount").unwrap().values, vec![Cell::Float(14.5), Cell::Float(5.5)]);
    }

    #[test]
    fn test_groupby_as_index_false_and_named_agg() {
        let ns = run(
            "a = orders.groupby('customer', as_index=False)['amount'].mean()\n\
             result = orders.groupby('customer').agg(total=('amount', 'sum'), n=('order_id', 'count'))",
        );
        assert_eq!(ns.table("a").unwrap().column_names(), vec!["customer", "amount"]);
        let t = ns.result_table().unwrap();
        assert_eq!(t.column_names(), vec!["customer", "total", "n"]);
        assert_eq!(t.column("n").unwrap().values, vec![Cell::Int(2), Cell::Int(1)]);
    }

    #[test]
    fn test_value_counts_to_frame() {
        let ns = run("result = orders['customer'].value_counts().reset_index()");
        let t = ns.result_table().unwrap();
        assert_eq!(t.column_names(), vec!["customer", "count"]);
        assert_eq!(t.column("count").unwrap().values, vec![Cell::Int(2), Cell::Int(1)]);
    }

    #[test]
    fn test_sort_head_and_shape() {
        let ns = run(
            "top = orders.sort_values('amount', ascending=False).head(2)\nrows = top.shape[0]\nfirst = top['order_id'].iloc[0]",
        );
        let rows = ns.get("rows").and_then(Value::as_cell).cloned();
        assert_eq!(rows, Some(Cell::Int(2)));
        let first = ns.get("first").and_then(Value::as_cell).cloned();
        assert_eq!(first, Some(Cell::Int(1)));
    }

    #[test]
    fn test_str_and_dt_accessors() {
        let ns = run(
            "orders['placed'] = pd.to_datetime(orders['placed'])\n\
             orders['month'] = orders['placed'].dt.month\n\
             orders['label'] = orders['placed'].dt.strftime('%Y-%m')\n\
             orders['upper'] = orders['customer'].str.upper()\n\
             result = orders[orders['customer'].str.contains('an', case=False, na=False)]",
        );
        let orders = ns.table("orders").unwrap();
        assert_eq!(
            orders.column("month").unwrap().values,
            vec![Cell::Int(1), Cell::Int(2), Cell::Int(2), Cell::Int(5)]
        );
        assert_eq!(orders.column("label").unwrap().values[0], Cell::Str("2024-01".into()));
        assert_eq!(orders.column("upper").unwrap().values[3], Cell::Null);
        assert_eq!(ns.result_table().unwrap().row_count(), 2);
    }

    #[test]
    fn test_dt_on_text_fails() {
        let mut ns = ns();
        let err = execute("m = orders['placed'].dt.month", &mut ns).unwrap_err();
        assert!(err.to_string().contains(".dt accessor"));
    }

    #[test]
    fn test_column_helpers() {
        let ns = run(
            "m = orders['amount'].isin([10.0, 8.0]).sum()\n\
             r = orders['amount'].round(0).tolist()\n\
             big = orders['amount'].between(5, 9).sum()\n\
             best = orders['amount'].idxmax()\n\
             q = orders['amount'].quantile(0.5)",
        );
        let get = |n: &str| ns.get(n).and_then(Value::as_cell).cloned().unwrap();
        assert_eq!(get("m"), Cell::Int(2));
        assert_eq!(ns.get("r").unwrap().display(), "[10.0, 6.0, 4.0, 8.0]");
        assert_eq!(get("big"), Cell::Int(2));
        assert_eq!(get("best"), Cell::Int(0));
        assert_eq!(get("q"), Cell::Float(6.75));
    }

    #[test]
    fn test_merge_rename_drop() {
        let mut ns = ns();
        let customers = Table::from_pairs(vec![
            ("customer".to_string(), vec![Cell::Str("Ann".into()), Cell::Str("Bo".into())]),
            ("city".to_string(), vec![Cell::Str("Oslo".into()), Cell::Str("Rome".into())]),
        ])
        .unwrap();
        ns.set("customers", Value::Table(customers));
        execute(
            "m = orders.merge(customers, on='customer', how='left')\n\
             m = m.rename(columns={'city': 'town'}).drop(columns=['placed'])\n\
             result = m.dropna(subset=['town'])",
            &mut ns,
        )
        .unwrap();
        let t = ns.result_table().unwrap();
        assert!(t.has_column("town"));
        assert!(!t.has_column("placed"));
        assert_eq!(t.row_count(), 3);
    }

    #[test]
    fn test_apply_lambda_and_map_dict() {
        let ns = run(
            "orders['tier'] = orders['amount'].apply(lambda a: 'high' if a > 6 else 'low')\n\
             orders['code'] = orders['customer'].map({'Ann': 1, 'Bo': 2})",
        );
        let orders = ns.table("orders").unwrap();
        assert_eq!(orders.column("tier").unwrap().values[0], Cell::Str("high".into()));
        assert_eq!(orders.column("code").unwrap().values[3], Cell::Null);
    }

    #[test]
    fn test_unknown_method() {
        let mut ns = ns();
        let err = execute("x = orders.pivot_everything()", &mut ns).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'DataFrame' object has no attribute 'pivot_everything'"
        );
    }

    fn column(ns: &ExecutionNamespace, name: &str) -> Column {
        match ns.get(name) {
            Some(Value::Column(c)) => c.clone(),
            other => panic!("{name} is not a column: {other:?}"),
        }
    }

    fn cell(ns: &ExecutionNamespace, name: &str) -> Cell {
        ns.get(name).and_then(Value::as_cell).cloned().unwrap()
    }

    #[test]
    fn test_describe_numeric_columns() {
        let ns = run("d = orders.describe()\nm = d['amount']['mean']\nq = d['order_id']['50%']");
        assert_eq!(ns.table("d").unwrap().column_names(), vec!["order_id", "amount"]);
        assert_eq!(cell(&ns, "m"), Cell::Float(7.0));
        assert_eq!(cell(&ns, "q"), Cell::Float(2.5));
    }

    #[test]
    fn test_pivot_table_with_and_without_columns() {
        let ns = run(
            "flat = orders.pivot_table(values='amount', index='customer', aggfunc='sum')\n\
             orders['size'] = orders['amount'].apply(lambda a: 'big' if a > 6 else 'small')\n\
             wide = orders.pivot_table(values='amount', index='customer', columns='size', aggfunc='count', fill_value=0)",
        );
        let flat = ns.table("flat").unwrap();
        assert_eq!(flat.column("customer").unwrap().values, vec![Cell::Str("Ann".into()), Cell::Str("Bo".into())]);
        assert_eq!(flat.column("amount").unwrap().values, vec![Cell::Float(14.5), Cell::Float(5.5)]);

        let wide = ns.table("wide").unwrap();
        assert_eq!(wide.column_names(), vec!["customer", "big", "small"]);
        assert_eq!(wide.column("big").unwrap().values, vec![Cell::Int(1), Cell::Int(0)]);
        assert_eq!(wide.column("small").unwrap().values, vec![Cell::Int(1), Cell::Int(1)]);
    }

    #[test]
    fn test_query_combines_masks() {
        let ns = run(
            "both = orders.query('amount > 5 and customer == \"Ann\"')\n\
             limit = 6\n\
             above = orders.query('amount > @limit')",
        );
        assert_eq!(ns.table("both").unwrap().column("order_id").unwrap().values, vec![Cell::Int(1)]);
        assert_eq!(
            ns.table("above").unwrap().column("order_id").unwrap().values,
            vec![Cell::Int(1), Cell::Int(4)]
        );
    }

    #[test]
    fn test_apply_by_row_and_by_column() {
        let ns = run(
            "orders['double'] = orders.apply(lambda row: row['amount'] * 2, axis=1)\n\
             peaks = orders[['order_id', 'amount']].apply(lambda col: col.max())\n\
             top = peaks['amount']",
        );
        assert_eq!(
            ns.table("orders").unwrap().column("double").unwrap().values,
            vec![Cell::Float(20.0), Cell::Float(11.0), Cell::Float(9.0), Cell::Float(16.0)]
        );
        assert_eq!(cell(&ns, "top"), Cell::Float(10.0));
    }

    #[test]
    fn test_sample_is_seeded() {
        let ns = run(
            "a = orders.sample(n=2, random_state=7)\n\
             b = orders.sample(n=2, random_state=7)\n\
             half = orders.sample(frac=0.5)",
        );
        let a = ns.table("a").unwrap();
        assert_eq!(a.row_count(), 2);
        assert_eq!(a, ns.table("b").unwrap());
        let ids = &a.column("order_id").unwrap().values;
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ns.table("half").unwrap().row_count(), 2);

        let mut ns = ns;
        let err = execute("x = orders.sample(n=10)", &mut ns).unwrap_err();
        assert!(err.to_string().contains("larger sample than population"));
    }

    #[test]
    fn test_rolling_windows() {
        let ns = run(
            "avg = orders['amount'].rolling(2).mean()\n\
             total = orders['amount'].rolling(2, min_periods=1).sum()",
        );
        let avg = column(&ns, "avg");
        assert!(avg.values[0].is_null());
        assert_eq!(avg.values[1..].to_vec(), vec![Cell::Float(7.75), Cell::Float(5.0), Cell::Float(6.25)]);
        assert_eq!(
            column(&ns, "total").values,
            vec![Cell::Float(10.0), Cell::Float(15.5), Cell::Float(10.0), Cell::Float(12.5)]
        );
    }
}
