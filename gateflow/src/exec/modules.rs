//! Library handles: the dataframe, numeric and plotting packages.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::exec::builtins::{self, round_cell};
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::interpreter::{Args, Interpreter};
use crate::exec::methods;
use crate::exec::plotting;
use crate::exec::table::{aggregate, AggFunc, Column, Table};
use crate::exec::value::{Builtin, Cell, Module, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y"];

/// Parses the common textual timestamp layouts.
#[must_use]
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_with_format(s: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(s.trim(), fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    })
}

/// Reads `module.name`.
pub fn attribute(module: Module, name: &str) -> ExecResult<Value> {
    match (module, name) {
        (Module::Pandas, "NA" | "NaT") => Ok(Value::NONE),
        (Module::Numpy, "nan" | "NaN") => Ok(Value::Scalar(Cell::Float(f64::NAN))),
        (Module::Numpy, "inf") => Ok(Value::Scalar(Cell::Float(f64::INFINITY))),
        (Module::Numpy, "pi") => Ok(Value::Scalar(Cell::Float(std::f64::consts::PI))),
        (Module::Matplotlib, "pyplot") => Ok(Value::Module(Module::Pyplot)),
        (Module::Pyplot, "style") => Ok(Value::Module(Module::Matplotlib)),
        (m, other) => Err(ExecError::runtime(format!(
            "module '{}' has no attribute '{other}'",
            m.path()
        ))),
    }
}

/// Calls `module.name(args)`.
pub fn call(
    interp: &mut Interpreter<'_>,
    module: Module,
    name: &str,
    args: &Args,
) -> ExecResult<Value> {
    match module {
        Module::Pandas => pandas(name, args),
        Module::Numpy => numpy(interp, name, args),
        Module::Pyplot => plotting::pyplot(interp, name, args),
        Module::Seaborn => plotting::seaborn(interp, name, args),
        Module::Matplotlib => match name {
            "use" => Ok(Value::NONE),
            other => Err(ExecError::runtime(format!(
                "module 'matplotlib' has no attribute '{other}'"
            ))),
        },
    }
}

fn cells_of(v: &Value) -> ExecResult<Vec<Cell>> {
    match v {
        Value::Column(c) => Ok(c.values.clone()),
        other => other.to_cells(),
    }
}

fn data_frame(args: &Args) -> ExecResult<Table> {
    let Some(data) = args.get(0, "data") else {
        return Table::new(Vec::new());
    };
    let table = match data {
        Value::Dict(items) => {
            let len = items
                .iter()
                .filter_map(|(_, v)| match v {
                    Value::Scalar(_) => None,
                    other => cells_of(other).ok().map(|c| c.len()),
                })
                .max()
                .unwrap_or(1);
            let pairs = items
                .iter()
                .map(|(k, v)| {
                    let values = match v {
                        Value::Scalar(c) => vec![c.clone(); len],
                        other => cells_of(other)?,
                    };
                    Ok((k.to_string(), values))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Table::from_pairs(pairs)?
        }
        Value::List(rows) => {
            let mut names: Vec<String> = Vec::new();
            for row in rows {
                let Value::Dict(items) = row else {
                    return Err(ExecError::type_error(
                        "DataFrame rows must be dicts of column values",
                    ));
                };
                for (k, _) in items {
                    let k = k.to_string();
                    if !names.contains(&k) {
                        names.push(k);
                    }
                }
            }
            let pairs = names
                .into_iter()
                .map(|name| {
                    let values = rows
                        .iter()
                        .map(|row| match row {
                            Value::Dict(items) => items
                                .iter()
                                .find(|(k, _)| k.to_string() == name)
                                .and_then(|(_, v)| v.as_cell().cloned())
                                .unwrap_or(Cell::Null),
                            _ => Cell::Null,
                        })
                        .collect();
                    (name, values)
                })
                .collect();
            Table::from_pairs(pairs)?
        }
        Value::Table(t) => t.clone(),
        Value::Column(c) => Table::new(vec![c.clone()])?,
        other => {
            return Err(ExecError::type_error(format!(
                "DataFrame constructor not properly called with '{}'",
                other.type_name()
            )))
        }
    };
    match args.kw("columns") {
        Some(cols) => table.select(&cols.to_names()?),
        None => Ok(table),
    }
}

fn map_cells(v: &Value, f: impl Fn(&Cell) -> ExecResult<Cell>) -> ExecResult<Value> {
    match v {
        Value::Column(c) => {
            let values = c.values.iter().map(&f).collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Column(c.map_values(values)))
        }
        Value::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|i| {
                    i.as_cell()
                        .ok_or_else(|| ExecError::type_error("expected scalar values"))
                        .and_then(&f)
                        .map(Value::Scalar)
                })
                .collect::<ExecResult<Vec<_>>>()?,
        )),
        Value::Scalar(c) => f(c).map(Value::Scalar),
        other => Err(ExecError::type_error(format!(
            "unsupported argument of type '{}'",
            other.type_name()
        ))),
    }
}

fn to_datetime(args: &Args) -> ExecResult<Value> {
    let arg = args.require(0, "arg", "to_datetime")?;
    let format = args.opt_string(usize::MAX, "format");
    let coerce = args.opt_string(usize::MAX, "errors").as_deref() == Some("coerce");
    map_cells(arg, |cell| match cell {
        Cell::Date(_) => Ok(cell.clone()),
        c if c.is_null() => Ok(Cell::Null),
        Cell::Str(s) => {
            let parsed = match &format {
                Some(fmt) => parse_with_format(s, fmt),
                None => parse_datetime(s),
            };
            match parsed {
                Some(dt) => Ok(Cell::Date(dt)),
                None if coerce => Ok(Cell::Null),
                None => Err(ExecError::value(match &format {
                    Some(fmt) => format!("time data \"{s}\" doesn't match format \"{fmt}\""),
                    None => format!("Unknown datetime string format, unable to parse: {s}"),
                })),
            }
        }
        _ if coerce => Ok(Cell::Null),
        other => Err(ExecError::type_error(format!(
            "cannot convert {} to datetime",
            other.type_name()
        ))),
    })
}

fn to_numeric(args: &Args) -> ExecResult<Value> {
    let arg = args.require(0, "arg", "to_numeric")?;
    let coerce = args.opt_string(usize::MAX, "errors").as_deref() == Some("coerce");
    map_cells(arg, |cell| match cell {
        Cell::Int(_) | Cell::Float(_) | Cell::Null => Ok(cell.clone()),
        Cell::Bool(b) => Ok(Cell::Int(i64::from(*b))),
        Cell::Str(s) => {
            let t = s.trim().replace(',', "");
            if let Ok(i) = t.parse::<i64>() {
                Ok(Cell::Int(i))
            } else if let Ok(f) = t.parse::<f64>() {
                Ok(Cell::Float(f))
            } else if coerce {
                Ok(Cell::Float(f64::NAN))
            } else {
                Err(ExecError::value(format!("Unable to parse string \"{s}\"")))
            }
        }
        _ if coerce => Ok(Cell::Float(f64::NAN)),
        other => Err(ExecError::type_error(format!(
            "Invalid object type {}",
            other.type_name()
        ))),
    })
}

fn concat(args: &Args) -> ExecResult<Value> {
    let objs = args.require(0, "objs", "concat")?;
    let Value::List(items) = objs else {
        return Err(ExecError::type_error(
            "first argument must be an iterable of pandas objects",
        ));
    };
    let axis = match args.kw("axis") {
        Some(Value::Scalar(Cell::Str(s))) if s == "columns" => 1,
        Some(v) => v.as_cell().and_then(Cell::as_i64).unwrap_or(0),
        None => 0,
    };
    let tables = items
        .iter()
        .map(|v| match v {
            Value::Table(t) => Ok(t.clone()),
            Value::Column(c) => Ok(Table::new(vec![Column::new(c.name.clone(), c.values.clone())])?),
            other => Err(ExecError::type_error(format!(
                "cannot concatenate object of type '{}'",
                other.type_name()
            ))),
        })
        .collect::<ExecResult<Vec<_>>>()?;
    if axis == 1 {
        Ok(Value::Table(Table::concat_columns(&tables)?))
    } else {
        Ok(Value::Table(Table::concat(&tables)))
    }
}

fn pandas(name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "DataFrame" => Ok(Value::Table(data_frame(args)?)),
        "Series" => {
            let values = match args.get(0, "data") {
                Some(v) => cells_of(v)?,
                None => Vec::new(),
            };
            let name = args.opt_string(usize::MAX, "name").unwrap_or_default();
            Ok(Value::Column(Column::new(name, values)))
        }
        "merge" => {
            let (Value::Table(left), Value::Table(right)) = (
                args.require(0, "left", "merge")?,
                args.require(1, "right", "merge")?,
            ) else {
                return Err(ExecError::type_error("merge expects two DataFrames"));
            };
            Ok(Value::Table(methods::merge(left, right, args, 2)?))
        }
        "concat" => concat(args),
        "to_datetime" => to_datetime(args),
        "to_numeric" => to_numeric(args),
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_null = name.starts_with("isn");
            map_cells(args.require(0, "obj", name)?, |c| {
                Ok(Cell::Bool(c.is_null() == want_null))
            })
        }
        "NamedAgg" => {
            let column = args.string(0, "column", name)?;
            let func = args.string(1, "aggfunc", name)?;
            Ok(Value::List(vec![Value::str(column), Value::str(func)]))
        }
        other => Err(ExecError::runtime(format!(
            "module 'pandas' has no attribute '{other}'"
        ))),
    }
}

fn float_map(v: &Value, op: &str, f: fn(f64) -> f64) -> ExecResult<Value> {
    map_cells(v, |c| {
        if c.is_null() {
            return Ok(Cell::Float(f64::NAN));
        }
        c.as_f64().map(|x| Cell::Float(f(x))).ok_or_else(|| {
            ExecError::type_error(format!(
                "ufunc '{op}' not supported for the input types ({})",
                c.type_name()
            ))
        })
    })
}

fn numpy(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Value> {
    if let Ok(func) = AggFunc::parse(name) {
        if matches!(
            func,
            AggFunc::Sum | AggFunc::Mean | AggFunc::Median | AggFunc::Min | AggFunc::Max | AggFunc::Std | AggFunc::Var
        ) {
            let cells = cells_of(args.require(0, "a", name)?)?;
            return aggregate(&cells, func).map(Value::Scalar);
        }
    }
    match name {
        "array" => Ok(Value::List(
            cells_of(args.require(0, "object", name)?)?
                .into_iter()
                .map(Value::Scalar)
                .collect(),
        )),
        "where" => {
            let cond = args.require(0, "condition", name)?;
            let then = args.require(1, "x", name)?;
            let otherwise = args.require(2, "y", name)?;
            let Value::Column(mask) = cond else {
                return Ok(if cond.truthy()? { then.clone() } else { otherwise.clone() });
            };
            let pick = |v: &Value, row: usize| -> Cell {
                match v {
                    Value::Column(c) => c.values.get(row).cloned().unwrap_or(Cell::Null),
                    other => other.as_cell().cloned().unwrap_or(Cell::Null),
                }
            };
            let values = mask
                .values
                .iter()
                .enumerate()
                .map(|(row, m)| if m.truthy() { pick(then, row) } else { pick(otherwise, row) })
                .collect();
            Ok(Value::Column(Column::new(String::new(), values)))
        }
        "round" => {
            let digits = args.int(1, "decimals", 0)?;
            map_cells(args.require(0, "a", name)?, |c| round_cell(c, Some(digits)))
        }
        "abs" => {
            let x = args.require(0, "x", name)?.clone();
            builtins::call(interp, Builtin::Abs, &Args::positional(vec![x]))
        }
        "sqrt" => float_map(args.require(0, "x", name)?, name, f64::sqrt),
        "log" => float_map(args.require(0, "x", name)?, name, f64::ln),
        "log10" => float_map(args.require(0, "x", name)?, name, f64::log10),
        "exp" => float_map(args.require(0, "x", name)?, name, f64::exp),
        "floor" => float_map(args.require(0, "x", name)?, name, f64::floor),
        "ceil" => float_map(args.require(0, "x", name)?, name, f64::ceil),
        "isnan" => map_cells(args.require(0, "x", name)?, |c| Ok(Cell::Bool(c.is_null()))),
        other => Err(ExecError::runtime(format!(
            "module 'numpy' has no attribute '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::interpreter::execute;
    use crate::exec::namespace::ExecutionNamespace;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_datetime_layouts() {
        let d = parse_datetime("2024-03-05").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 3, 5));
        let dt = parse_datetime("2024-03-05 14:30:00").unwrap();
        assert_eq!(dt.hour(), 14);
        assert_eq!(parse_datetime("2024-03").unwrap().day(), 1);
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_dataframe_from_dict_and_records() {
        let mut ns = ExecutionNamespace::new();
        execute(
            "a = pd.DataFrame({'x': [1, 2, 3], 'y': 'k'})\nb = pd.DataFrame([{'x': 1}, {'x': 2, 'z': 5}])",
            &mut ns,
        )
        .unwrap();
        let a = ns.table("a").unwrap();
        assert_eq!(a.row_count(), 3);
        assert_eq!(a.column("y").unwrap().values[2], Cell::Str("k".into()));
        let b = ns.table("b").unwrap();
        assert_eq!(b.column_names(), vec!["x", "z"]);
        assert_eq!(b.column("z").unwrap().values[0], Cell::Null);
    }

    #[test]
    fn test_to_numeric_coerce() {
        let mut ns = ExecutionNamespace::new();
        execute("s = pd.to_numeric(pd.Series(['1', '2.5', 'x']), errors='coerce')", &mut ns).unwrap();
        let Some(Value::Column(s)) = ns.get("s") else { panic!("expected a column") };
        assert_eq!(s.values[0], Cell::Int(1));
        assert_eq!(s.values[1], Cell::Float(2.5));
        assert!(s.values[2].is_null());
    }

    #[test]
    fn test_to_datetime_strict_fails() {
        let mut ns = ExecutionNamespace::new();
        let err = execute("d = pd.to_datetime('yesterday-ish')", &mut ns).unwrap_err();
        assert!(err.to_string().contains("unable to parse"));
    }

    #[test]
    fn test_numpy_helpers() {
        let mut ns = ExecutionNamespace::new();
        execute(
            "import numpy as np\ns = pd.Series([1, -4, 9])\nw = np.where(s > 0, 'pos', 'neg')\nm = np.mean([1, 2, 3])\nr = np.sqrt(9)",
            &mut ns,
        )
        .unwrap();
        let Some(Value::Column(w)) = ns.get("w") else { panic!("expected a column") };
        assert_eq!(w.values[1], Cell::Str("neg".into()));
        assert_eq!(ns.get("m").and_then(Value::as_cell), Some(&Cell::Float(2.0)));
        assert_eq!(ns.get("r").and_then(Value::as_cell), Some(&Cell::Float(3.0)));
    }

    #[test]
    fn test_concat_rows() {
        let mut ns = ExecutionNamespace::new();
        execute(
            "a = pd.DataFrame({'x': [1]})\nb = pd.DataFrame({'x': [2, 3]})\nc = pd.concat([a, b])",
            &mut ns,
        )
        .unwrap();
        assert_eq!(ns.table("c").unwrap().row_count(), 3);
    }

    #[test]
    fn test_unknown_module_attribute() {
        let err = attribute(Module::Pandas, "read_parquet").unwrap_err();
        assert_eq!(err.to_string(), "module 'pandas' has no attribute 'read_parquet'");
    }
}
