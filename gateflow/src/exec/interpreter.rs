//! Tree-walking evaluator for parsed code.

use crate::exec::builtins;
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::methods;
use crate::exec::namespace::ExecutionNamespace;
use crate::exec::ops;
use crate::exec::parser::{
    parse_program, BinOp, Expr, FPart, Literal, Stmt, StmtKind, Target, UnaryOp,
};
use crate::exec::table::{Column, Selection, Table};
use crate::exec::value::{Cell, Lambda, Module, Value};

/// Call arguments after evaluation.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Positional arguments.
    pub positional: Vec<Value>,
    /// Keyword arguments, in call order.
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    /// Arguments from positional values only.
    #[must_use]
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    /// A keyword argument.
    #[must_use]
    pub fn kw(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// The argument at `index`, or passed by `name`.
    #[must_use]
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.kw(name))
    }

    /// Like [`Args::get`], treating an explicit `None` as absent.
    #[must_use]
    pub fn opt(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index, name)
            .filter(|v| !matches!(v, Value::Scalar(Cell::Null)))
    }

    /// A required argument.
    pub fn require(&self, index: usize, name: &str, func: &str) -> ExecResult<&Value> {
        self.get(index, name).ok_or_else(|| {
            ExecError::type_error(format!(
                "{func}() missing 1 required positional argument: '{name}'"
            ))
        })
    }

    /// A string argument.
    pub fn string(&self, index: usize, name: &str, func: &str) -> ExecResult<String> {
        let v = self.require(index, name, func)?;
        v.as_str().map(str::to_string).ok_or_else(|| {
            ExecError::type_error(format!(
                "{func}() argument '{name}' must be str, not {}",
                v.type_name()
            ))
        })
    }

    /// An optional string argument.
    #[must_use]
    pub fn opt_string(&self, index: usize, name: &str) -> Option<String> {
        self.opt(index, name).and_then(Value::as_str).map(str::to_string)
    }

    /// A boolean argument with a default.
    pub fn flag(&self, index: usize, name: &str, default: bool) -> ExecResult<bool> {
        self.opt(index, name).map_or(Ok(default), Value::truthy)
    }

    /// A non-negative integer argument with a default.
    pub fn count(&self, index: usize, name: &str, default: usize) -> ExecResult<usize> {
        match self.opt(index, name) {
            None => Ok(default),
            Some(v) => v
                .as_cell()
                .and_then(Cell::as_i64)
                .map(|n| usize::try_from(n).unwrap_or(0))
                .ok_or_else(|| {
                    ExecError::type_error(format!(
                        "'{name}' must be an integer, not {}",
                        v.type_name()
                    ))
                }),
        }
    }

    /// An integer argument with a default.
    pub fn int(&self, index: usize, name: &str, default: i64) -> ExecResult<i64> {
        match self.opt(index, name) {
            None => Ok(default),
            Some(v) => v.as_cell().and_then(Cell::as_i64).ok_or_else(|| {
                ExecError::type_error(format!(
                    "'{name}' must be an integer, not {}",
                    v.type_name()
                ))
            }),
        }
    }
}

/// Evaluates statements against a namespace.
pub struct Interpreter<'a> {
    ns: &'a mut ExecutionNamespace,
    scopes: Vec<Vec<(String, Value)>>,
    output: Vec<String>,
}

/// Parses and runs `code`, returning the lines it printed.
pub fn execute(code: &str, ns: &mut ExecutionNamespace) -> ExecResult<Vec<String>> {
    let program = parse_program(code)?;
    let mut interp = Interpreter::new(ns);
    for stmt in &program {
        interp
            .statement(&stmt.kind)
            .map_err(|e| e.at_line(stmt.line))?;
    }
    Ok(interp.output)
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter over `ns`.
    pub fn new(ns: &'a mut ExecutionNamespace) -> Self {
        Self {
            ns,
            scopes: Vec::new(),
            output: Vec::new(),
        }
    }

    /// The namespace.
    pub fn namespace(&mut self) -> &mut ExecutionNamespace {
        self.ns
    }

    /// Records one printed line.
    pub fn print(&mut self, line: String) {
        self.output.push(line);
    }

    fn statement(&mut self, kind: &StmtKind) -> ExecResult<()> {
        match kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(&target_expr(target)?)?;
                let rhs = self.eval(value)?;
                let updated = ops::binary(*op, &current, &rhs)?;
                self.assign(target, updated)
            }
            StmtKind::Expr(expr) => self.eval(expr).map(|_| ()),
            StmtKind::Import { module, alias } => {
                let Some(m) = Module::from_import(module) else {
                    return Err(ExecError::runtime(format!("No module named '{module}'")));
                };
                self.ns.set(alias.clone(), Value::Module(m));
                Ok(())
            }
            StmtKind::Pass => Ok(()),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ExecResult<()> {
        match target {
            Target::Name(name) => {
                self.ns.set(name.clone(), value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = match value {
                    Value::List(items) => items,
                    other => {
                        return Err(ExecError::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            other.type_name()
                        )))
                    }
                };
                if items.len() != targets.len() {
                    return Err(ExecError::value(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
            Target::Subscript { obj, index } => {
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                let updated = set_item(container, &key, value)?;
                self.store(obj, updated)
            }
            Target::Attr { obj, name } => {
                let container = self.eval(obj)?;
                let updated = set_attr(container, name, value)?;
                self.store(obj, updated)
            }
        }
    }

    /// Writes `value` back to the location `expr` denotes.
    fn store(&mut self, expr: &Expr, value: Value) -> ExecResult<()> {
        match expr {
            Expr::Name(name) => {
                self.ns.set(name.clone(), value);
                Ok(())
            }
            Expr::Subscript { obj, index } => {
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                let updated = set_item(container, &key, value)?;
                self.store(obj, updated)
            }
            Expr::Attr { obj, name } if name == "loc" || name == "iloc" => match value {
                Value::Loc(t) => self.store(obj, Value::Table(t)),
                other => self.store(obj, other),
            },
            _ => Err(ExecError::syntax(0, "cannot assign to expression")),
        }
    }

    fn lookup(&self, name: &str) -> ExecResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, v)) = scope.iter().find(|(n, _)| n == name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.ns.get(name) {
            return Ok(v.clone());
        }
        if let Some(b) = crate::exec::value::Builtin::lookup(name) {
            return Ok(Value::Builtin(b));
        }
        Err(ExecError::UndefinedName(name.to_string()))
    }

    /// Evaluates an expression.
    pub fn eval(&mut self, expr: &Expr) -> ExecResult<Value> {
        match expr {
            Expr::Name(name) => self.lookup(name),
            Expr::Literal(lit) => Ok(Value::Scalar(match lit {
                Literal::None => Cell::Null,
                Literal::Bool(b) => Cell::Bool(*b),
                Literal::Int(i) => Cell::Int(*i),
                Literal::Float(f) => Cell::Float(*f),
                Literal::Str(s) => Cell::Str(s.clone()),
            })),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Text(t) => out.push_str(t),
                        FPart::Expr(e, spec) => {
                            let v = self.eval(e)?;
                            out.push_str(&format_value(&v, spec.as_deref())?);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::List(items) | Expr::Tuple(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<ExecResult<_>>()?,
            )),
            Expr::Dict(pairs) => {
                let mut out: Vec<(Cell, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match self.eval(k)? {
                        Value::Scalar(c) => c,
                        other => {
                            return Err(ExecError::type_error(format!(
                                "unhashable type: '{}'",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(v)?;
                    match out.iter_mut().find(|(existing, _)| *existing == key) {
                        Some(slot) => slot.1 = value,
                        None => out.push((key, value)),
                    }
                }
                Ok(Value::Dict(out))
            }
            Expr::Attr { obj, name } => {
                let recv = self.eval(obj)?;
                methods::attribute(recv, name)
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs),
            Expr::Subscript { obj, index } => {
                let recv = self.eval(obj)?;
                if let Expr::Slice { start, stop } = index.as_ref() {
                    let start = self.eval_bound(start.as_deref())?;
                    let stop = self.eval_bound(stop.as_deref())?;
                    return slice(recv, start, stop);
                }
                if let (Value::Loc(t), Expr::Tuple(parts)) = (&recv, index.as_ref()) {
                    if let [rows, cols] = parts.as_slice() {
                        let rows = self.loc_axis(rows)?;
                        let cols = self.loc_axis(cols)?;
                        return loc_axes(t, rows, cols);
                    }
                }
                let key = self.eval(index)?;
                subscript(recv, &key)
            }
            Expr::Slice { .. } => Err(ExecError::syntax(0, "slice outside of a subscript")),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                ops::unary(*op, &v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::binary(*op, &l, &r)
            }
            Expr::And(a, b) => {
                let l = self.eval(a)?;
                if l.truthy()? {
                    self.eval(b)
                } else {
                    Ok(l)
                }
            }
            Expr::Or(a, b) => {
                let l = self.eval(a)?;
                if l.truthy()? {
                    Ok(l)
                } else {
                    self.eval(b)
                }
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy()? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Lambda { params, body } => Ok(Value::Lambda(Lambda {
                params: params.clone(),
                body: body.clone(),
            })),
        }
    }

    fn loc_axis(&mut self, expr: &Expr) -> ExecResult<Axis> {
        match expr {
            Expr::Slice { start: None, stop: None } => Ok(Axis::All),
            Expr::Slice { start, stop } => Ok(Axis::Range(
                self.eval_bound(start.as_deref())?,
                self.eval_bound(stop.as_deref())?,
            )),
            other => Ok(Axis::Key(self.eval(other)?)),
        }
    }

    fn eval_bound(&mut self, bound: Option<&Expr>) -> ExecResult<Option<i64>> {
        let Some(e) = bound else {
            return Ok(None);
        };
        match self.eval(e)? {
            Value::Scalar(Cell::Null) => Ok(None),
            Value::Scalar(c) => c
                .as_i64()
                .map(Some)
                .ok_or_else(|| ExecError::type_error("slice indices must be integers or None")),
            _ => Err(ExecError::type_error("slice indices must be integers or None")),
        }
    }

    fn call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> ExecResult<Value> {
        let evaluated = Args {
            positional: args.iter().map(|a| self.eval(a)).collect::<ExecResult<_>>()?,
            keywords: kwargs
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.eval(v)?)))
                .collect::<ExecResult<_>>()?,
        };
        if let Expr::Attr { obj, name } = func {
            let recv = self.eval(obj)?;
            if let Some(updated) = mutate_in_place(&recv, name, &evaluated)? {
                self.store(obj, updated)?;
                return Ok(Value::NONE);
            }
            return methods::call_method(self, recv, name, &evaluated);
        }
        let callee = self.eval(func)?;
        self.call_value(&callee, &evaluated)
    }

    /// Calls a function value.
    pub fn call_value(&mut self, callee: &Value, args: &Args) -> ExecResult<Value> {
        match callee {
            Value::Lambda(lambda) => {
                if lambda.params.len() != args.positional.len() {
                    return Err(ExecError::type_error(format!(
                        "<lambda>() takes {} positional arguments but {} were given",
                        lambda.params.len(),
                        args.positional.len()
                    )));
                }
                let scope = lambda
                    .params
                    .iter()
                    .cloned()
                    .zip(args.positional.iter().cloned())
                    .collect();
                self.scopes.push(scope);
                let result = self.eval(&lambda.body);
                self.scopes.pop();
                result
            }
            Value::Builtin(b) => builtins::call(self, *b, args),
            other => Err(ExecError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Evaluates a `DataFrame.query` expression with the columns of `t` in
    /// scope. `and`, `or` and `not` combine masks element-wise; `@name`
    /// refers to a variable.
    pub fn eval_query(&mut self, t: &Table, src: &str) -> ExecResult<Value> {
        let program = parse_program(&src.replace('@', ""))?;
        let [Stmt { kind: StmtKind::Expr(expr), .. }] = program.as_slice() else {
            return Err(ExecError::value(format!("invalid query expression: {src}")));
        };
        let scope = t
            .columns
            .iter()
            .map(|c| (c.name.clone(), Value::Column(c.clone())))
            .collect();
        self.scopes.push(scope);
        let result = self.eval_mask(expr);
        self.scopes.pop();
        result
    }

    fn eval_mask(&mut self, expr: &Expr) -> ExecResult<Value> {
        match expr {
            Expr::And(a, b) | Expr::Or(a, b) => {
                let op = if matches!(expr, Expr::And(..)) { BinOp::BitAnd } else { BinOp::BitOr };
                let l = self.eval_mask(a)?;
                let r = self.eval_mask(b)?;
                ops::binary(op, &l, &r)
            }
            Expr::Unary { op: UnaryOp::Not, operand } => {
                let v = self.eval_mask(operand)?;
                ops::unary(UnaryOp::Invert, &v)
            }
            other => self.eval(other),
        }
    }

    /// Applies a one-argument function to a cell.
    pub fn apply_cell(&mut self, func: &Value, cell: &Cell) -> ExecResult<Cell> {
        match self.call_value(func, &Args::positional(vec![Value::Scalar(cell.clone())]))? {
            Value::Scalar(c) => Ok(c),
            Value::List(items) => Value::List(items).to_cells().map(Cell::List),
            other => Err(ExecError::type_error(format!(
                "function returned a {}, expected a scalar",
                other.type_name()
            ))),
        }
    }
}

fn target_expr(target: &Target) -> ExecResult<Expr> {
    match target {
        Target::Name(n) => Ok(Expr::Name(n.clone())),
        Target::Subscript { obj, index } => Ok(Expr::Subscript {
            obj: Box::new(obj.clone()),
            index: Box::new(index.clone()),
        }),
        Target::Attr { obj, name } => Ok(Expr::Attr {
            obj: Box::new(obj.clone()),
            name: name.clone(),
        }),
        Target::Tuple(_) => Err(ExecError::syntax(
            0,
            "'tuple' is an illegal expression for augmented assignment",
        )),
    }
}

/// Handles list and dict methods that mutate their receiver.
fn mutate_in_place(recv: &Value, name: &str, args: &Args) -> ExecResult<Option<Value>> {
    match (recv, name) {
        (Value::List(items), "append") => {
            let mut items = items.clone();
            items.push(args.require(0, "object", "append")?.clone());
            Ok(Some(Value::List(items)))
        }
        (Value::List(items), "extend") => {
            let mut items = items.clone();
            items.extend(builtins::iterate(args.require(0, "iterable", "extend")?)?);
            Ok(Some(Value::List(items)))
        }
        (Value::Dict(items), "update") => {
            let mut items = items.clone();
            if let Some(Value::Dict(other)) = args.positional.first() {
                for (k, v) in other {
                    match items.iter_mut().find(|(e, _)| e == k) {
                        Some(slot) => slot.1 = v.clone(),
                        None => items.push((k.clone(), v.clone())),
                    }
                }
            }
            Ok(Some(Value::Dict(items)))
        }
        _ => Ok(None),
    }
}

fn index_of(len: usize, i: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if i < 0 { len + i } else { i };
    (0..len).contains(&idx).then(|| usize::try_from(idx).ok()).flatten()
}

fn slice_range(len: usize, start: Option<i64>, stop: Option<i64>) -> std::ops::Range<usize> {
    let clamp = |i: i64| -> usize {
        let n = i64::try_from(len).unwrap_or(i64::MAX);
        let idx = if i < 0 { (n + i).max(0) } else { i.min(n) };
        usize::try_from(idx).unwrap_or(0)
    };
    let a = start.map_or(0, clamp);
    let b = stop.map_or(len, clamp);
    a..b.max(a)
}

fn slice(recv: Value, start: Option<i64>, stop: Option<i64>) -> ExecResult<Value> {
    match recv {
        Value::List(items) => {
            let r = slice_range(items.len(), start, stop);
            Ok(Value::List(items[r].to_vec()))
        }
        Value::Scalar(Cell::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let r = slice_range(chars.len(), start, stop);
            Ok(Value::str(chars[r].iter().collect::<String>()))
        }
        Value::Table(t) | Value::Loc(t) => {
            let rows: Vec<usize> = slice_range(t.row_count(), start, stop).collect();
            Ok(Value::Table(t.take(&rows)))
        }
        Value::Column(c) => {
            let rows: Vec<usize> = slice_range(c.len(), start, stop).collect();
            Ok(Value::Column(c.take(&rows)))
        }
        Value::StrAccessor(c) => {
            let values = c
                .values
                .iter()
                .map(|cell| match cell {
                    Cell::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let r = slice_range(chars.len(), start, stop);
                        Cell::Str(chars[r].iter().collect())
                    }
                    Cell::List(items) => {
                        let r = slice_range(items.len(), start, stop);
                        Cell::List(items[r].to_vec())
                    }
                    _ => Cell::Null,
                })
                .collect();
            Ok(Value::Column(c.map_values(values)))
        }
        other => Err(ExecError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn bool_mask(col: &Column) -> bool {
    col.values.iter().all(|c| matches!(c, Cell::Bool(_)) || c.is_null())
        && col.values.iter().any(|c| matches!(c, Cell::Bool(_)))
}

/// Evaluates `recv[key]`.
pub fn subscript(recv: Value, key: &Value) -> ExecResult<Value> {
    match recv {
        Value::Table(t) => match key {
            Value::Scalar(Cell::Str(name)) => Ok(Value::Column(t.column(name)?.clone())),
            Value::List(_) => {
                let cells = key.to_cells()?;
                if !cells.is_empty() && cells.iter().all(|c| matches!(c, Cell::Bool(_))) {
                    return Ok(Value::Table(t.filter(&cells)?));
                }
                Ok(Value::Table(t.select(&key.to_names()?)?))
            }
            Value::Column(mask) => Ok(Value::Table(t.filter(&mask.values)?)),
            other => Err(ExecError::MissingColumn(other.display())),
        },
        Value::Loc(t) => loc(&t, key),
        Value::Column(c) => match key {
            Value::Column(mask) if bool_mask(mask) => {
                if mask.len() != c.len() {
                    return Err(ExecError::value(format!(
                        "Item wrong length {} instead of {}.",
                        mask.len(),
                        c.len()
                    )));
                }
                let rows: Vec<usize> = mask
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.truthy())
                    .map(|(i, _)| i)
                    .collect();
                Ok(Value::Column(c.take(&rows)))
            }
            Value::Scalar(cell) => column_item(&c, cell),
            other => Err(ExecError::MissingColumn(other.display())),
        },
        Value::GroupBy(g) => match key {
            Value::Scalar(Cell::Str(name)) => {
                Ok(Value::GroupBy(g.select(Selection::One(name.clone()))?))
            }
            Value::List(_) => Ok(Value::GroupBy(g.select(Selection::Many(key.to_names()?))?)),
            other => Err(ExecError::MissingColumn(other.display())),
        },
        Value::List(items) => {
            let i = key
                .as_cell()
                .and_then(Cell::as_i64)
                .ok_or_else(|| ExecError::type_error("list indices must be integers or slices"))?;
            index_of(items.len(), i)
                .map(|idx| items[idx].clone())
                .ok_or_else(|| ExecError::runtime("list index out of range"))
        }
        Value::Dict(items) => {
            let k = key
                .as_cell()
                .ok_or_else(|| ExecError::type_error("unhashable type"))?;
            items
                .into_iter()
                .find(|(existing, _)| existing.loose_eq(k))
                .map(|(_, v)| v)
                .ok_or_else(|| ExecError::MissingColumn(k.to_string()))
        }
        Value::Scalar(Cell::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let i = key
                .as_cell()
                .and_then(Cell::as_i64)
                .ok_or_else(|| ExecError::type_error("string indices must be integers"))?;
            index_of(chars.len(), i)
                .map(|idx| Value::str(chars[idx].to_string()))
                .ok_or_else(|| ExecError::runtime("string index out of range"))
        }
        Value::Scalar(Cell::List(items)) => {
            let i = key
                .as_cell()
                .and_then(Cell::as_i64)
                .ok_or_else(|| ExecError::type_error("list indices must be integers or slices"))?;
            index_of(items.len(), i)
                .map(|idx| Value::Scalar(items[idx].clone()))
                .ok_or_else(|| ExecError::runtime("list index out of range"))
        }
        Value::StrAccessor(c) => {
            let i = key
                .as_cell()
                .and_then(Cell::as_i64)
                .ok_or_else(|| ExecError::type_error("string indices must be integers"))?;
            let values = c
                .values
                .iter()
                .map(|cell| match cell {
                    Cell::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        index_of(chars.len(), i).map_or(Cell::Null, |x| Cell::Str(chars[x].to_string()))
                    }
                    Cell::List(items) => index_of(items.len(), i).map_or(Cell::Null, |x| items[x].clone()),
                    _ => Cell::Null,
                })
                .collect();
            Ok(Value::Column(c.map_values(values)))
        }
        other => Err(ExecError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `col[key]`: a label lookup when the column is indexed, else a position.
fn column_item(c: &Column, key: &Cell) -> ExecResult<Value> {
    if c.index.is_some() {
        if let Some(row) = (0..c.len()).find(|&r| c.label_cell(r).loose_eq(key)) {
            return Ok(Value::Scalar(c.values[row].clone()));
        }
    }
    match key.as_i64() {
        Some(i) if !matches!(key, Cell::Bool(_)) => index_of(c.len(), i)
            .map(|idx| Value::Scalar(c.values[idx].clone()))
            .ok_or_else(|| out_of_bounds(i, c.len())),
        _ => Err(ExecError::MissingColumn(key.to_string())),
    }
}

/// One axis of a `loc`/`iloc` selection.
enum Axis {
    /// `:`
    All,
    /// `start:stop`, by position.
    Range(Option<i64>, Option<i64>),
    /// Anything else.
    Key(Value),
}

fn out_of_bounds(i: i64, len: usize) -> ExecError {
    ExecError::runtime(format!(
        "single positional indexer is out-of-bounds: {i} with size {len}"
    ))
}

fn position(cell: &Cell, len: usize) -> ExecResult<usize> {
    let i = match cell {
        Cell::Bool(_) => None,
        other => other.as_i64(),
    }
    .ok_or_else(|| ExecError::MissingColumn(cell.to_string()))?;
    index_of(len, i).ok_or_else(|| out_of_bounds(i, len))
}

/// `t.loc[rows]`, or `t.loc[rows, cols]` when `key` came from a computed tuple.
fn loc(t: &Table, key: &Value) -> ExecResult<Value> {
    match key {
        Value::List(parts) if parts.len() == 2 && !matches!(parts[0], Value::Scalar(Cell::Str(_))) => {
            loc_axes(t, Axis::Key(parts[0].clone()), Axis::Key(parts[1].clone()))
        }
        other => Ok(Value::Table(loc_rows(t, other)?)),
    }
}

fn loc_rows(t: &Table, rows: &Value) -> ExecResult<Table> {
    match rows {
        Value::Column(mask) => t.filter(&mask.values),
        Value::Scalar(Cell::Null) => Ok(t.clone()),
        Value::Scalar(c) => Ok(t.take(&[position(c, t.row_count())?])),
        Value::List(_) => {
            let cells = rows.to_cells()?;
            if !cells.is_empty() && cells.iter().all(|c| matches!(c, Cell::Bool(_))) {
                return t.filter(&cells);
            }
            let idx = cells
                .iter()
                .map(|c| position(c, t.row_count()))
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(t.take(&idx))
        }
        other => Err(ExecError::type_error(format!(
            "cannot index rows with '{}'",
            other.type_name()
        ))),
    }
}

/// Resolves a column selector to names: labels stay labels, integers are positions.
fn column_names_for(t: &Table, cells: &[Cell]) -> ExecResult<Vec<String>> {
    let names = t.column_names();
    cells
        .iter()
        .map(|c| match c {
            Cell::Str(name) => Ok(name.clone()),
            other => position(other, names.len()).map(|i| names[i].clone()),
        })
        .collect()
}

/// `t.loc[rows, cols]` and `t.iloc[rows, cols]`.
fn loc_axes(t: &Table, rows: Axis, cols: Axis) -> ExecResult<Value> {
    let single_row = matches!(&rows, Axis::Key(Value::Scalar(c)) if !c.is_null());
    let selected = match rows {
        Axis::All => t.clone(),
        Axis::Range(start, stop) => {
            let idx: Vec<usize> = slice_range(t.row_count(), start, stop).collect();
            t.take(&idx)
        }
        Axis::Key(key) => loc_rows(t, &key)?,
    };
    match cols {
        Axis::All => Ok(Value::Table(selected)),
        Axis::Range(start, stop) => {
            let names = selected.column_names();
            let r = slice_range(names.len(), start, stop);
            Ok(Value::Table(selected.select(&names[r])?))
        }
        Axis::Key(Value::Scalar(c)) => {
            let name = column_names_for(&selected, std::slice::from_ref(&c))?.remove(0);
            let column = selected.column(&name)?;
            match (single_row, column.values.first()) {
                (true, Some(cell)) => Ok(Value::Scalar(cell.clone())),
                _ => Ok(Value::Column(column.clone())),
            }
        }
        Axis::Key(key) => {
            let names = column_names_for(&selected, &key.to_cells()?)?;
            Ok(Value::Table(selected.select(&names)?))
        }
    }
}

fn broadcast_cells(value: &Value, len: usize) -> ExecResult<Vec<Cell>> {
    match value {
        Value::Scalar(c) => Ok(vec![c.clone(); len]),
        Value::Column(c) => Ok(c.values.clone()),
        Value::List(_) => value.to_cells(),
        other => Err(ExecError::type_error(format!(
            "cannot set a column from a {}",
            other.type_name()
        ))),
    }
}

/// Returns `container` with `container[key] = value` applied.
fn set_item(container: Value, key: &Value, value: Value) -> ExecResult<Value> {
    match container {
        Value::Table(mut t) => {
            let name = key
                .as_str()
                .ok_or_else(|| ExecError::type_error("column names must be strings"))?;
            let cells = broadcast_cells(&value, t.row_count())?;
            t.set_column(name, cells)?;
            Ok(Value::Table(t))
        }
        Value::Loc(mut t) => {
            let Value::List(parts) = key else {
                return Err(ExecError::type_error("loc assignment needs rows and a column"));
            };
            if parts.len() != 2 {
                return Err(ExecError::type_error("loc assignment needs rows and a column"));
            }
            let mask = match &parts[0] {
                Value::Column(m) => m.values.clone(),
                other => other.to_cells()?,
            };
            if mask.len() != t.row_count() {
                return Err(ExecError::value("loc mask length does not match the table"));
            }
            let name = parts[1]
                .as_str()
                .ok_or_else(|| ExecError::type_error("column names must be strings"))?;
            let new_values = broadcast_cells(&value, t.row_count())?;
            let mut current = match t.column(name) {
                Ok(c) => c.values.clone(),
                Err(_) => vec![Cell::Null; t.row_count()],
            };
            for (row, m) in mask.iter().enumerate() {
                if m.truthy() {
                    current[row] = new_values
                        .get(row)
                        .or_else(|| new_values.first())
                        .cloned()
                        .unwrap_or(Cell::Null);
                }
            }
            t.set_column(name, current)?;
            Ok(Value::Loc(t))
        }
        Value::Dict(mut items) => {
            let k = key
                .as_cell()
                .cloned()
                .ok_or_else(|| ExecError::type_error("unhashable type"))?;
            match items.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = value,
                None => items.push((k, value)),
            }
            Ok(Value::Dict(items))
        }
        Value::List(mut items) => {
            let i = key
                .as_cell()
                .and_then(Cell::as_i64)
                .ok_or_else(|| ExecError::type_error("list indices must be integers or slices"))?;
            let idx = index_of(items.len(), i)
                .ok_or_else(|| ExecError::runtime("list assignment index out of range"))?;
            items[idx] = value;
            Ok(Value::List(items))
        }
        other => Err(ExecError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn set_attr(container: Value, name: &str, value: Value) -> ExecResult<Value> {
    match (container, name) {
        (Value::Table(t), "columns") => {
            let names = value.to_names()?;
            if names.len() != t.column_count() {
                return Err(ExecError::value(format!(
                    "Length mismatch: Expected axis has {} elements, new values have {} elements",
                    t.column_count(),
                    names.len()
                )));
            }
            let mapping: Vec<(String, String)> = t.column_names().into_iter().zip(names).collect();
            let columns = t
                .columns
                .iter()
                .zip(&mapping)
                .map(|(c, (_, new))| Column::new(new.clone(), c.values.clone()))
                .collect();
            Ok(Value::Table(Table::new(columns)?))
        }
        (Value::Column(mut c), "name") => {
            c.name = value.display();
            Ok(Value::Column(c))
        }
        (other, attr) => Err(ExecError::no_attribute(other.type_name(), attr)),
    }
}

fn group_thousands(digits: &str, sep: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}

/// Formats a number with an optional grouping separator.
fn format_number(x: f64, precision: usize, grouping: Option<char>) -> String {
    let raw = format!("{:.*}", precision, x.abs());
    let (int_part, frac) = raw.split_once('.').map_or((raw.as_str(), None), |(i, f)| (i, Some(f)));
    let int_part = match grouping {
        Some(sep) => group_thousands(int_part, sep),
        None => int_part.to_string(),
    };
    let sign = if x < 0.0 && raw.chars().any(|c| c != '0' && c != '.') { "-" } else { "" };
    match frac {
        Some(f) => format!("{sign}{int_part}.{f}"),
        None => format!("{sign}{int_part}"),
    }
}

fn exponent(x: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, x);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = exp.strip_prefix('-').map_or(("+", exp), |d| ("-", d));
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}

/// Applies a format spec such as `,.2f`, `.1%`, `>10` or `%Y-%m`.
pub fn format_value(value: &Value, spec: Option<&str>) -> ExecResult<String> {
    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return Ok(value.display());
    };
    let cell = match value {
        Value::Scalar(c) => c,
        other => return Ok(other.display()),
    };
    if let Cell::Date(d) = cell {
        return Ok(d.format(spec).to_string());
    }

    let mut chars: Vec<char> = spec.chars().collect();
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        chars.drain(..2);
    } else if chars.first().is_some_and(|c| matches!(c, '<' | '>' | '^')) {
        align = Some(chars[0]);
        chars.remove(0);
    }
    let plus = chars.first() == Some(&'+');
    if plus {
        chars.remove(0);
    }
    if chars.first() == Some(&'0') && align.is_none() {
        fill = '0';
        align = Some('=');
    }
    let width_digits: String = chars.iter().take_while(|c| c.is_ascii_digit()).collect();
    chars.drain(..width_digits.len());
    let width: usize = width_digits.parse().unwrap_or(0);
    let grouping = match chars.first() {
        Some(',') => Some(','),
        Some('_') => Some('_'),
        _ => None,
    };
    if grouping.is_some() {
        chars.remove(0);
    }
    let mut precision = None;
    if chars.first() == Some(&'.') {
        chars.remove(0);
        let digits: String = chars.iter().take_while(|c| c.is_ascii_digit()).collect();
        chars.drain(..digits.len());
        precision = digits.parse::<usize>().ok();
    }
    let kind: String = chars.into_iter().collect();

    let numeric = cell.as_f64().filter(|_| !matches!(cell, Cell::Str(_)));
    let body = match (kind.as_str(), numeric) {
        ("f" | "F", Some(x)) => format_number(x, precision.unwrap_or(6), grouping),
        ("%", Some(x)) => format!("{}%", format_number(x * 100.0, precision.unwrap_or(6), grouping)),
        ("d", Some(x)) => {
            if x.fract() != 0.0 {
                return Err(ExecError::value(
                    "Unknown format code 'd' for object of type 'float'",
                ));
            }
            format_number(x, 0, grouping)
        }
        ("e" | "E", Some(x)) => exponent(x, precision.unwrap_or(6)),
        ("" | "g" | "G", Some(x)) => match (precision, cell) {
            (Some(p), _) => {
                let rounded = format_number(x, p, grouping);
                if kind.is_empty() || !rounded.contains('.') {
                    rounded
                } else {
                    rounded.trim_end_matches('0').trim_end_matches('.').to_string()
                }
            }
            (None, Cell::Int(_) | Cell::Bool(_)) if grouping.is_some() => format_number(x, 0, grouping),
            (None, _) if grouping.is_some() => {
                let s = cell.to_string();
                let decimals = s.split_once('.').map_or(0, |(_, f)| f.len());
                format_number(x, decimals, grouping)
            }
            _ => cell.to_string(),
        },
        ("" | "s", None) => cell.to_string(),
        (k, None) if !k.is_empty() => {
            return Err(ExecError::value(format!(
                "Unknown format code '{k}' for object of type '{}'",
                cell.type_name()
            )))
        }
        (k, _) => {
            return Err(ExecError::value(format!("Invalid format specifier '{k}'")));
        }
    };
    let body = if plus && numeric.is_some_and(|x| x >= 0.0) {
        format!("+{body}")
    } else {
        body
    };

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    let align = align.unwrap_or(if numeric.is_some() { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{body}{}", fill_str(pad)),
        '^' => format!("{}{body}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        '=' => match body.strip_prefix('-') {
            Some(rest) => format!("-{}{rest}", fill_str(pad)),
            None => format!("{}{body}", fill_str(pad)),
        },
        _ => format!("{}{body}", fill_str(pad)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ns() -> ExecutionNamespace {
        let sales = Table::from_pairs(vec![
            (
                "region".to_string(),
                vec![
                    Cell::Str("north".into()),
                    Cell::Str("south".into()),
                    Cell::Str("north".into()),
                ],
            ),
            ("amount".to_string(), vec![Cell::Int(10), Cell::Int(20), Cell::Int(30)]),
        ])
        .unwrap();
        ExecutionNamespace::from_tables(vec![("sales".to_string(), sales)])
    }

    fn run(code: &str) -> ExecutionNamespace {
        let mut ns = ns();
        execute(code, &mut ns).unwrap();
        ns
    }

    fn scalar(ns: &ExecutionNamespace, name: &str) -> Cell {
        ns.get(name).and_then(Value::as_cell).cloned().unwrap()
    }

    #[test]
    fn test_assign_and_arithmetic() {
        let ns = run("x = 2 + 3 * 4\ny = x ** 2 // 10\nz = -x if x > 10 else x");
        assert_eq!(scalar(&ns, "x"), Cell::Int(14));
        assert_eq!(scalar(&ns, "y"), Cell::Int(19));
        assert_eq!(scalar(&ns, "z"), Cell::Int(-14));
    }

    #[test]
    fn test_column_assignment_and_filter() {
        let ns = run(
            "sales['double'] = sales['amount'] * 2\nresult = sales[sales['double'] > 25]",
        );
        let result = ns.result_table().unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(
            result.column("double").unwrap().values,
            vec![Cell::Int(40), Cell::Int(60)]
        );
    }

    #[test]
    fn test_loc_assignment() {
        let ns = run("sales.loc[sales['amount'] > 15, 'big'] = True");
        let t = ns.table("sales").unwrap();
        assert_eq!(
            t.column("big").unwrap().values,
            vec![Cell::Null, Cell::Bool(true), Cell::Bool(true)]
        );
    }

    #[test]
    fn test_undefined_name() {
        let mut ns = ns();
        let err = execute("x = undefined_name", &mut ns).unwrap_err();
        assert_eq!(err, ExecError::UndefinedName("undefined_name".into()));
    }

    #[test]
    fn test_missing_column() {
        let mut ns = ns();
        let err = execute("result = sales[sales['missing_col'] > 1]", &mut ns).unwrap_err();
        assert_eq!(err, ExecError::MissingColumn("missing_col".into()));
    }

    #[test]
    fn test_tuple_unpacking_and_lists() {
        let ns = run("a, b = [1, 2]\nitems = [1, 2, 3]\nitems.append(4)\nn = len(items)\nlast = items[-1]");
        assert_eq!(scalar(&ns, "a"), Cell::Int(1));
        assert_eq!(scalar(&ns, "b"), Cell::Int(2));
        assert_eq!(scalar(&ns, "n"), Cell::Int(4));
        assert_eq!(scalar(&ns, "last"), Cell::Int(4));
    }

    #[test]
    fn test_lambda_and_aug_assign() {
        let ns = run("f = lambda v: v * 10\nx = f(3)\nx += 1");
        assert_eq!(scalar(&ns, "x"), Cell::Int(31));
    }

    #[test]
    fn test_unknown_import() {
        let mut ns = ns();
        let err = execute("import requests", &mut ns).unwrap_err();
        assert_eq!(err.to_string(), "No module named 'requests'");
        execute("import pandas as pandas_lib", &mut ns).unwrap();
        assert!(matches!(ns.get("pandas_lib"), Some(Value::Module(Module::Pandas))));
    }

    #[test]
    fn test_fstring_formats() {
        let ns = run(
            "total = 1234567.891\nrate = 0.256\nlabel = f'{total:,.2f} | {rate:.1%} | {7:>3} | {3:03d}'",
        );
        assert_eq!(
            scalar(&ns, "label"),
            Cell::Str("1,234,567.89 | 25.6% |   7 | 003".into())
        );
    }

    #[test]
    fn test_format_value_errors() {
        assert!(format_value(&Value::str("x"), Some(".2f")).is_err());
        assert_eq!(format_value(&Value::str("ab"), Some("^6")).unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::Scalar(Cell::Float(-1.5)), Some("+.1f")).unwrap(), "-1.5");
        assert_eq!(format_value(&Value::Scalar(Cell::Float(12345.0)), Some(".2e")).unwrap(), "1.23e+04");
    }

    #[test]
    fn test_slices() {
        let ns = run("s = 'abcdef'[1:3]\nl = [1, 2, 3, 4][-2:]\nt = sales[:2]");
        assert_eq!(scalar(&ns, "s"), Cell::Str("bc".into()));
        assert_eq!(ns.get("l").unwrap().display(), "[3, 4]");
        assert_eq!(ns.table("t").unwrap().row_count(), 2);
    }

    #[test]
    fn test_and_or_short_circuit() {
        let ns = run("a = 0 or 'x'\nc = 0 and undefined_name");
        assert_eq!(scalar(&ns, "a"), Cell::Str("x".into()));
        assert_eq!(scalar(&ns, "c"), Cell::Int(0));
    }

    #[test]
    fn test_rename_columns_by_attribute() {
        let ns = run("sales.columns = ['r', 'a']");
        assert_eq!(ns.table("sales").unwrap().column_names(), vec!["r", "a"]);
    }
}
