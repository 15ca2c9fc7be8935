//! Built-in functions.

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::interpreter::{Args, Interpreter};
use crate::exec::table::{aggregate, AggFunc};
use crate::exec::value::{Builtin, Cell, Value};

/// Expands an iterable value into its items.
pub fn iterate(value: &Value) -> ExecResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Column(c) => Ok(c.values.iter().cloned().map(Value::Scalar).collect()),
        Value::Table(t) => Ok(t.column_names().into_iter().map(Value::str).collect()),
        Value::Dict(items) => Ok(items.iter().map(|(k, _)| Value::Scalar(k.clone())).collect()),
        Value::Scalar(Cell::Str(s)) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Scalar(Cell::List(items)) => Ok(items.iter().cloned().map(Value::Scalar).collect()),
        other => Err(ExecError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn cells_of(value: &Value) -> ExecResult<Vec<Cell>> {
    iterate(value)?
        .into_iter()
        .map(|v| match v {
            Value::Scalar(c) => Ok(c),
            other => Err(ExecError::type_error(format!(
                "expected scalars, got '{}'",
                other.type_name()
            ))),
        })
        .collect()
}

/// Rounds half to even, as the host language does.
#[must_use]
pub fn round_half_even(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = x * factor;
    let rounded = scaled.round();
    let result = if (scaled - scaled.trunc()).abs() == 0.5 {
        2.0 * (scaled / 2.0).round()
    } else {
        rounded
    };
    result / factor
}

/// Rounds a cell; integers stay integers.
pub fn round_cell(cell: &Cell, digits: Option<i64>) -> ExecResult<Cell> {
    let digits_i32 = i32::try_from(digits.unwrap_or(0)).unwrap_or(0);
    match cell {
        c if c.is_null() => Ok(Cell::Float(f64::NAN)),
        Cell::Int(i) => Ok(Cell::Int(*i)),
        Cell::Bool(b) => Ok(Cell::Int(i64::from(*b))),
        Cell::Float(f) => {
            let r = round_half_even(*f, digits_i32);
            match digits {
                #[allow(clippy::cast_possible_truncation)]
                None if r.abs() < 9.0e18 => Ok(Cell::Int(r as i64)),
                _ => Ok(Cell::Float(r)),
            }
        }
        other => Err(ExecError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn extreme(args: &Args, func: AggFunc, name: &str) -> ExecResult<Value> {
    let cells = if args.positional.len() > 1 {
        Value::List(args.positional.clone()).to_cells()?
    } else {
        cells_of(args.require(0, "iterable", name)?)?
    };
    if cells.is_empty() {
        return Err(ExecError::value(format!("{name}() arg is an empty sequence")));
    }
    Ok(Value::Scalar(aggregate(&cells, func)?))
}

fn to_int(v: &Value) -> ExecResult<Cell> {
    match v.as_cell() {
        Some(Cell::Int(i)) => Ok(Cell::Int(*i)),
        Some(Cell::Bool(b)) => Ok(Cell::Int(i64::from(*b))),
        #[allow(clippy::cast_possible_truncation)]
        Some(Cell::Float(f)) if f.is_finite() => Ok(Cell::Int(f.trunc() as i64)),
        Some(Cell::Float(_)) => Err(ExecError::value("cannot convert float NaN to integer")),
        Some(Cell::Str(s)) => s.trim().parse().map(Cell::Int).map_err(|_| {
            ExecError::value(format!("invalid literal for int() with base 10: '{s}'"))
        }),
        _ => Err(ExecError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            v.type_name()
        ))),
    }
}

fn to_float(v: &Value) -> ExecResult<Cell> {
    match v.as_cell() {
        Some(Cell::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "nan" => Ok(Cell::Float(f64::NAN)),
            "inf" | "infinity" => Ok(Cell::Float(f64::INFINITY)),
            "-inf" | "-infinity" => Ok(Cell::Float(f64::NEG_INFINITY)),
            t => t.parse().map(Cell::Float).map_err(|_| {
                ExecError::value(format!("could not convert string to float: '{s}'"))
            }),
        },
        Some(Cell::Null) => Err(ExecError::type_error(
            "float() argument must be a string or a real number, not 'NoneType'",
        )),
        Some(c) => c.as_f64().map(Cell::Float).ok_or_else(|| {
            ExecError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                c.type_name()
            ))
        }),
        None => Err(ExecError::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            v.type_name()
        ))),
    }
}

/// Converts a value with a type conversion builtin, used by `astype`.
pub fn convert(b: Builtin, v: &Value) -> ExecResult<Cell> {
    match b {
        Builtin::Int => to_int(v),
        Builtin::Float => to_float(v),
        Builtin::Str => Ok(Cell::Str(v.display())),
        Builtin::Bool => Ok(Cell::Bool(v.truthy()?)),
        other => Err(ExecError::type_error(format!(
            "{other:?} is not a type conversion"
        ))),
    }
}

/// Calls a builtin.
pub fn call(interp: &mut Interpreter<'_>, builtin: Builtin, args: &Args) -> ExecResult<Value> {
    match builtin {
        Builtin::Len => {
            let v = args.require(0, "obj", "len")?;
            let n = match v {
                Value::Scalar(Cell::Str(s)) => s.chars().count(),
                Value::Scalar(Cell::List(l)) => l.len(),
                Value::List(l) => l.len(),
                Value::Dict(d) => d.len(),
                Value::Column(c) => c.len(),
                Value::Table(t) => t.row_count(),
                Value::GroupBy(g) => g.groups()?.len(),
                other => {
                    return Err(ExecError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Scalar(Cell::Int(i64::try_from(n).unwrap_or(i64::MAX))))
        }
        Builtin::Sum => {
            let cells = cells_of(args.require(0, "iterable", "sum")?)?;
            if let Some(bad) = cells.iter().find(|c| c.as_f64().is_none() && !c.is_null()) {
                return Err(ExecError::type_error(format!(
                    "unsupported operand type(s) for +: 'int' and '{}'",
                    bad.type_name()
                )));
            }
            Ok(Value::Scalar(aggregate(&cells, AggFunc::Sum)?))
        }
        Builtin::Min => extreme(args, AggFunc::Min, "min"),
        Builtin::Max => extreme(args, AggFunc::Max, "max"),
        Builtin::Round => {
            let digits = args.opt(1, "ndigits").map(|_| args.int(1, "ndigits", 0)).transpose()?;
            match args.require(0, "number", "round")? {
                Value::Scalar(c) => Ok(Value::Scalar(round_cell(c, digits)?)),
                Value::Column(col) => {
                    let values = col
                        .values
                        .iter()
                        .map(|c| round_cell(c, Some(digits.unwrap_or(0))))
                        .collect::<ExecResult<Vec<_>>>()?;
                    Ok(Value::Column(col.map_values(values)))
                }
                other => Err(ExecError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))),
            }
        }
        Builtin::Abs => match args.require(0, "x", "abs")? {
            Value::Scalar(Cell::Int(i)) => Ok(Value::Scalar(Cell::Int(i.saturating_abs()))),
            Value::Scalar(Cell::Float(f)) => Ok(Value::Scalar(Cell::Float(f.abs()))),
            Value::Column(col) => {
                let values = col
                    .values
                    .iter()
                    .map(|c| match c {
                        Cell::Int(i) => Cell::Int(i.saturating_abs()),
                        Cell::Float(f) => Cell::Float(f.abs()),
                        other => other.clone(),
                    })
                    .collect();
                Ok(Value::Column(col.map_values(values)))
            }
            other => Err(ExecError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        Builtin::List => match args.get(0, "iterable") {
            None => Ok(Value::List(Vec::new())),
            Some(v) => Ok(Value::List(iterate(v)?)),
        },
        Builtin::Sorted => {
            let mut cells = cells_of(args.require(0, "iterable", "sorted")?)?;
            for pair in cells.windows(2) {
                pair[0].partial_compare(&pair[1])?;
            }
            cells.sort_by(Cell::total_cmp);
            if args.flag(usize::MAX, "reverse", false)? {
                cells.reverse();
            }
            Ok(Value::List(cells.into_iter().map(Value::Scalar).collect()))
        }
        Builtin::Str => Ok(Value::str(
            args.get(0, "object").map(Value::display).unwrap_or_default(),
        )),
        Builtin::Int => match args.get(0, "x") {
            None => Ok(Value::Scalar(Cell::Int(0))),
            Some(v) => Ok(Value::Scalar(to_int(v)?)),
        },
        Builtin::Float => match args.get(0, "x") {
            None => Ok(Value::Scalar(Cell::Float(0.0))),
            Some(v) => Ok(Value::Scalar(to_float(v)?)),
        },
        Builtin::Bool => match args.get(0, "x") {
            None => Ok(Value::Scalar(Cell::Bool(false))),
            Some(v) => Ok(Value::Scalar(Cell::Bool(v.truthy()?))),
        },
        Builtin::Range => {
            let ints = args
                .positional
                .iter()
                .map(|v| {
                    v.as_cell().and_then(Cell::as_i64).ok_or_else(|| {
                        ExecError::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            v.type_name()
                        ))
                    })
                })
                .collect::<ExecResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(ExecError::type_error("range expected 1 to 3 arguments")),
            };
            if step == 0 {
                return Err(ExecError::value("range() arg 3 must not be zero"));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                out.push(Value::Scalar(Cell::Int(i)));
                i += step;
            }
            Ok(Value::List(out))
        }
        Builtin::Print => {
            let sep = args.kw("sep").and_then(Value::as_str).unwrap_or(" ").to_string();
            let line = args
                .positional
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(&sep);
            interp.print(line);
            Ok(Value::NONE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::interpreter::execute;
    use crate::exec::namespace::ExecutionNamespace;

    fn eval(code: &str) -> Value {
        let mut ns = ExecutionNamespace::new();
        execute(&format!("out = {code}"), &mut ns).unwrap();
        ns.get("out").cloned().unwrap()
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(eval("round(2.5)").as_cell(), Some(&Cell::Int(2)));
        assert_eq!(eval("round(3.5)").as_cell(), Some(&Cell::Int(4)));
        assert_eq!(eval("round(1.2345, 2)").as_cell(), Some(&Cell::Float(1.23)));
    }

    #[test]
    fn test_min_max_sum() {
        assert_eq!(eval("max([3, 9, 2])").as_cell(), Some(&Cell::Int(9)));
        assert_eq!(eval("min(4, 1.5)").as_cell(), Some(&Cell::Float(1.5)));
        assert_eq!(eval("sum([1, 2, 3])").as_cell(), Some(&Cell::Int(6)));
        assert_eq!(eval("max(['b', 'a'])").as_str(), Some("b"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval("int('42')").as_cell(), Some(&Cell::Int(42)));
        assert_eq!(eval("int(3.9)").as_cell(), Some(&Cell::Int(3)));
        assert_eq!(eval("float('2.5')").as_cell(), Some(&Cell::Float(2.5)));
        assert_eq!(eval("str(1.0)").as_str(), Some("1.0"));
        assert_eq!(eval("bool('')").as_cell(), Some(&Cell::Bool(false)));
    }

    #[test]
    fn test_range_sorted_len() {
        assert_eq!(eval("range(0, 6, 2)").display(), "[0, 2, 4]");
        assert_eq!(eval("sorted([3, 1, 2], reverse=True)").display(), "[3, 2, 1]");
        assert_eq!(eval("len('hello')").as_cell(), Some(&Cell::Int(5)));
    }

    #[test]
    fn test_print_collects_output() {
        let mut ns = ExecutionNamespace::new();
        let out = execute("print('a', 1)\nprint('b')", &mut ns).unwrap();
        assert_eq!(out, vec!["a 1".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_int_of_bad_string() {
        let mut ns = ExecutionNamespace::new();
        let err = execute("x = int('abc')", &mut ns).unwrap_err();
        assert!(err.to_string().contains("invalid literal"));
    }
}
