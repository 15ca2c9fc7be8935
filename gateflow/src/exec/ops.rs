//! Operators over cells, columns and scalars.

use std::cmp::Ordering;

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::parser::{BinOp, UnaryOp};
use crate::exec::table::Column;
use crate::exec::value::{Cell, Value};

fn unsupported(op: BinOp, a: &str, b: &str) -> ExecError {
    ExecError::type_error(format!(
        "unsupported operand type(s) for {}: '{a}' and '{b}'",
        op.symbol()
    ))
}

fn compare(op: BinOp, a: &Cell, b: &Cell) -> ExecResult<Cell> {
    let result = match op {
        BinOp::Eq => a.loose_eq(b),
        BinOp::Ne => !a.loose_eq(b),
        _ => match a.partial_compare(b)? {
            None => false,
            Some(ord) => match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                BinOp::Ge => ord != Ordering::Less,
                _ => false,
            },
        },
    };
    Ok(Cell::Bool(result))
}

fn float_op(op: BinOp, x: f64, y: f64, elementwise: bool) -> ExecResult<Cell> {
    let zero_div = || {
        if elementwise {
            Ok(Cell::Float(if x == 0.0 || x.is_nan() {
                f64::NAN
            } else {
                f64::INFINITY.copysign(x)
            }))
        } else {
            Err(ExecError::runtime("division by zero"))
        }
    };
    Ok(Cell::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div if y == 0.0 => return zero_div(),
        BinOp::Div => x / y,
        BinOp::FloorDiv if y == 0.0 => return zero_div(),
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod if y == 0.0 => return zero_div(),
        BinOp::Mod => x - y * (x / y).floor(),
        BinOp::Pow => x.powf(y),
        _ => return Err(unsupported(op, "float", "float")),
    }))
}

fn int_op(op: BinOp, x: i64, y: i64, elementwise: bool) -> ExecResult<Cell> {
    #[allow(clippy::cast_precision_loss)]
    let as_float = || float_op(op, x as f64, y as f64, elementwise);
    let checked = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => return as_float(),
        BinOp::FloorDiv if y == 0 => return as_float(),
        BinOp::FloorDiv => x.checked_div_euclid(y).map(|q| {
            if y < 0 && x.rem_euclid(y) != 0 {
                q - 1
            } else {
                q
            }
        }),
        BinOp::Mod if y == 0 => return as_float(),
        BinOp::Mod => Some(((x % y) + y) % y),
        BinOp::Pow if y >= 0 => u32::try_from(y).ok().and_then(|e| x.checked_pow(e)),
        BinOp::Pow => return as_float(),
        BinOp::BitAnd => Some(x & y),
        BinOp::BitOr => Some(x | y),
        _ => return Err(unsupported(op, "int", "int")),
    };
    match checked {
        Some(v) => Ok(Cell::Int(v)),
        None => as_float(),
    }
}

/// Applies a binary operator to two cells.
///
/// With `elementwise`, division by zero yields infinities and missing values
/// propagate instead of raising.
pub fn binary_cells(op: BinOp, a: &Cell, b: &Cell, elementwise: bool) -> ExecResult<Cell> {
    if matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
    ) {
        return compare(op, a, b);
    }
    if let (BinOp::BitAnd | BinOp::BitOr, Cell::Bool(x), Cell::Bool(y)) = (op, a, b) {
        return Ok(Cell::Bool(if op == BinOp::BitAnd { *x && *y } else { *x || *y }));
    }
    if matches!(op, BinOp::BitAnd | BinOp::BitOr) && (a.is_null() || b.is_null()) {
        return Ok(Cell::Bool(op == BinOp::BitOr && (a.truthy() || b.truthy())));
    }
    if a.is_null() || b.is_null() {
        let nan_operand = matches!(a, Cell::Float(_)) || matches!(b, Cell::Float(_));
        if elementwise || nan_operand {
            return Ok(Cell::Float(f64::NAN));
        }
        return Err(unsupported(op, a.type_name(), b.type_name()));
    }
    match (a, b) {
        (Cell::Str(x), Cell::Str(y)) if op == BinOp::Add => Ok(Cell::Str(format!("{x}{y}"))),
        (Cell::Str(s), Cell::Int(n)) | (Cell::Int(n), Cell::Str(s)) if op == BinOp::Mul => {
            Ok(Cell::Str(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Cell::List(x), Cell::List(y)) if op == BinOp::Add => {
            Ok(Cell::List(x.iter().chain(y).cloned().collect()))
        }
        (Cell::Date(x), Cell::Date(y)) if op == BinOp::Sub => {
            #[allow(clippy::cast_precision_loss)]
            let days = (*x - *y).num_seconds() as f64 / 86_400.0;
            Ok(Cell::Float(days))
        }
        (Cell::Int(_) | Cell::Bool(_), Cell::Int(_) | Cell::Bool(_)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => int_op(op, x, y, elementwise),
            _ => Err(unsupported(op, a.type_name(), b.type_name())),
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => float_op(op, x, y, elementwise),
            _ => Err(unsupported(op, a.type_name(), b.type_name())),
        },
    }
}

fn membership(needle: &Value, haystack: &Value) -> ExecResult<bool> {
    match haystack {
        Value::Scalar(Cell::Str(h)) => match needle.as_str() {
            Some(n) => Ok(h.contains(n)),
            None => Err(ExecError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                needle.type_name()
            ))),
        },
        Value::List(items) => {
            let Some(n) = needle.as_cell() else {
                return Ok(false);
            };
            Ok(items
                .iter()
                .any(|v| v.as_cell().is_some_and(|c| c.loose_eq(n) || (c.is_null() && n.is_null()))))
        }
        Value::Dict(items) => {
            let Some(n) = needle.as_cell() else {
                return Ok(false);
            };
            Ok(items.iter().any(|(k, _)| k.loose_eq(n)))
        }
        Value::Table(t) => Ok(needle.as_str().is_some_and(|n| t.has_column(n))),
        Value::Column(c) => {
            // Membership tests the labels, as for a dict.
            let Some(n) = needle.as_cell() else {
                return Ok(false);
            };
            Ok((0..c.len()).any(|r| c.label_cell(r).loose_eq(n)))
        }
        other => Err(ExecError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn zip_columns(op: BinOp, a: &Column, b: &Column) -> ExecResult<Column> {
    if a.len() != b.len() {
        return Err(ExecError::value(format!(
            "Lengths must match to compare ({} != {})",
            a.len(),
            b.len()
        )));
    }
    let values = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| binary_cells(op, x, y, true))
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(a.map_values(values))
}

fn broadcast(op: BinOp, col: &Column, scalar: &Cell, scalar_left: bool) -> ExecResult<Column> {
    let values = col
        .values
        .iter()
        .map(|c| {
            if scalar_left {
                binary_cells(op, scalar, c, true)
            } else {
                binary_cells(op, c, scalar, true)
            }
        })
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(col.map_values(values))
}

/// Applies a binary operator to two values, broadcasting scalars over
/// columns.
pub fn binary(op: BinOp, left: &Value, right: &Value) -> ExecResult<Value> {
    match op {
        BinOp::In => return Ok(Value::Scalar(Cell::Bool(membership(left, right)?))),
        BinOp::NotIn => return Ok(Value::Scalar(Cell::Bool(!membership(left, right)?))),
        BinOp::Is | BinOp::IsNot => {
            let same = match (left, right) {
                (Value::Scalar(a), Value::Scalar(b)) => {
                    matches!((a, b), (Cell::Null, Cell::Null)) || (!a.is_null() && a == b)
                }
                (Value::Module(a), Value::Module(b)) => a == b,
                (Value::Figure, Value::Figure) | (Value::Axes, Value::Axes) => true,
                _ => false,
            };
            return Ok(Value::Scalar(Cell::Bool(same == (op == BinOp::Is))));
        }
        _ => {}
    }
    match (left, right) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(binary_cells(op, a, b, false)?)),
        (Value::Column(a), Value::Column(b)) => Ok(Value::Column(zip_columns(op, a, b)?)),
        (Value::Column(c), Value::Scalar(s)) => Ok(Value::Column(broadcast(op, c, s, false)?)),
        (Value::Scalar(s), Value::Column(c)) => Ok(Value::Column(broadcast(op, c, s, true)?)),
        (Value::List(a), Value::List(b)) => match op {
            BinOp::Add => Ok(Value::List(a.iter().chain(b).cloned().collect())),
            BinOp::Eq | BinOp::Ne => {
                let equal = a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| match (x.as_cell(), y.as_cell()) {
                        (Some(x), Some(y)) => x.loose_eq(y),
                        _ => false,
                    });
                Ok(Value::Scalar(Cell::Bool(equal == (op == BinOp::Eq))))
            }
            _ => Err(unsupported(op, "list", "list")),
        },
        (Value::Column(c), Value::List(items)) if items.len() == c.len() => {
            let other = c.map_values(right_cells(items)?);
            Ok(Value::Column(zip_columns(op, c, &other)?))
        }
        (Value::List(items), Value::Column(c)) if items.len() == c.len() => {
            let other = c.map_values(right_cells(items)?);
            Ok(Value::Column(zip_columns(op, &other, c)?))
        }
        (Value::List(items), Value::Scalar(Cell::Int(n))) if op == BinOp::Mul => {
            let n = usize::try_from(*n).unwrap_or(0);
            Ok(Value::List(
                std::iter::repeat(items.iter().cloned()).take(n).flatten().collect(),
            ))
        }
        (Value::Scalar(Cell::Null), _) | (_, Value::Scalar(Cell::Null)) if op == BinOp::Eq => {
            Ok(Value::Scalar(Cell::Bool(false)))
        }
        (Value::Scalar(Cell::Null), _) | (_, Value::Scalar(Cell::Null)) if op == BinOp::Ne => {
            Ok(Value::Scalar(Cell::Bool(true)))
        }
        _ => Err(unsupported(op, left.type_name(), right.type_name())),
    }
}

fn right_cells(items: &[Value]) -> ExecResult<Vec<Cell>> {
    Value::List(items.to_vec()).to_cells()
}

fn unary_cell(op: UnaryOp, c: &Cell) -> ExecResult<Cell> {
    match (op, c) {
        (UnaryOp::Not, c) => Ok(Cell::Bool(!c.truthy())),
        (_, c) if c.is_null() => Ok(Cell::Float(f64::NAN)),
        (UnaryOp::Pos, Cell::Int(_) | Cell::Float(_)) => Ok(c.clone()),
        (UnaryOp::Pos, Cell::Bool(b)) => Ok(Cell::Int(i64::from(*b))),
        (UnaryOp::Neg, Cell::Int(i)) => Ok(i.checked_neg().map_or_else(
            #[allow(clippy::cast_precision_loss)]
            || Cell::Float(-(*i as f64)),
            Cell::Int,
        )),
        (UnaryOp::Neg, Cell::Float(f)) => Ok(Cell::Float(-f)),
        (UnaryOp::Neg, Cell::Bool(b)) => Ok(Cell::Int(-i64::from(*b))),
        (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
        (UnaryOp::Invert, Cell::Int(i)) => Ok(Cell::Int(!i)),
        (op, c) => {
            let sym = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            };
            Err(ExecError::type_error(format!(
                "bad operand type for unary {sym}: '{}'",
                c.type_name()
            )))
        }
    }
}

/// Applies a unary operator.
pub fn unary(op: UnaryOp, value: &Value) -> ExecResult<Value> {
    match value {
        Value::Scalar(c) => Ok(Value::Scalar(unary_cell(op, c)?)),
        Value::Column(col) if op != UnaryOp::Not => {
            let values = col
                .values
                .iter()
                .map(|c| unary_cell(op, c))
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Column(col.map_values(values)))
        }
        other if op == UnaryOp::Not => Ok(Value::Scalar(Cell::Bool(!other.truthy()?))),
        other => Err(ExecError::type_error(format!(
            "bad operand type for unary operator: '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: Vec<Cell>) -> Value {
        Value::Column(Column::new("c", values))
    }

    fn cells(v: Value) -> Vec<Cell> {
        match v {
            Value::Column(c) => c.values,
            other => panic!("expected column, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(binary_cells(BinOp::Add, &Cell::Int(2), &Cell::Int(3), false).unwrap(), Cell::Int(5));
        assert_eq!(binary_cells(BinOp::Div, &Cell::Int(7), &Cell::Int(2), false).unwrap(), Cell::Float(3.5));
        assert_eq!(binary_cells(BinOp::FloorDiv, &Cell::Int(-7), &Cell::Int(2), false).unwrap(), Cell::Int(-4));
        assert_eq!(binary_cells(BinOp::Mod, &Cell::Int(-7), &Cell::Int(3), false).unwrap(), Cell::Int(2));
        assert_eq!(binary_cells(BinOp::Pow, &Cell::Int(2), &Cell::Int(10), false).unwrap(), Cell::Int(1024));
    }

    #[test]
    fn test_scalar_division_by_zero_raises() {
        let err = binary_cells(BinOp::Div, &Cell::Int(1), &Cell::Int(0), false).unwrap_err();
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_column_division_by_zero_is_inf() {
        let out = cells(binary(BinOp::Div, &col(vec![Cell::Int(1), Cell::Int(0)]), &Value::Scalar(Cell::Int(0))).unwrap());
        assert_eq!(out[0], Cell::Float(f64::INFINITY));
        assert!(out[1].is_null());
    }

    #[test]
    fn test_broadcast_comparison_with_nulls() {
        let c = col(vec![Cell::Int(1), Cell::Null, Cell::Int(5)]);
        let gt = cells(binary(BinOp::Gt, &c, &Value::Scalar(Cell::Int(2))).unwrap());
        assert_eq!(gt, vec![Cell::Bool(false), Cell::Bool(false), Cell::Bool(true)]);
        let ne = cells(binary(BinOp::Ne, &c, &Value::Scalar(Cell::Int(1))).unwrap());
        assert_eq!(ne, vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)]);
    }

    #[test]
    fn test_mask_combination() {
        let a = col(vec![Cell::Bool(true), Cell::Bool(false)]);
        let b = col(vec![Cell::Bool(true), Cell::Bool(true)]);
        assert_eq!(cells(binary(BinOp::BitAnd, &a, &b).unwrap()), vec![Cell::Bool(true), Cell::Bool(false)]);
        assert_eq!(cells(unary(UnaryOp::Invert, &a).unwrap()), vec![Cell::Bool(false), Cell::Bool(true)]);
    }

    #[test]
    fn test_string_ops() {
        let out = binary(BinOp::Add, &Value::str("a"), &Value::str("b")).unwrap();
        assert_eq!(out.as_str(), Some("ab"));
        let out = binary(BinOp::In, &Value::str("b"), &Value::str("abc")).unwrap();
        assert_eq!(out.as_cell(), Some(&Cell::Bool(true)));
        assert!(binary(BinOp::Sub, &Value::str("a"), &Value::Scalar(Cell::Int(1))).is_err());
    }

    #[test]
    fn test_is_none() {
        let out = binary(BinOp::Is, &Value::NONE, &Value::NONE).unwrap();
        assert_eq!(out.as_cell(), Some(&Cell::Bool(true)));
        let out = binary(BinOp::IsNot, &Value::Scalar(Cell::Int(1)), &Value::NONE).unwrap();
        assert_eq!(out.as_cell(), Some(&Cell::Bool(true)));
    }

    #[test]
    fn test_not_on_column_is_ambiguous() {
        assert!(unary(UnaryOp::Not, &col(vec![Cell::Int(1)])).is_err());
    }
}
