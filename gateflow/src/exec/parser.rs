//! Parser producing statements from tokens.

use std::sync::Arc;

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::lexer::{tokenize, Tok, Token};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `is`
    Is,
    /// `is not`
    IsNot,
}

impl BinOp {
    /// The operator's source text.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }

    fn comparison(tok: &Tok) -> Option<Self> {
        match tok {
            Tok::Op("==") => Some(Self::Eq),
            Tok::Op("!=") => Some(Self::Ne),
            Tok::Op("<") => Some(Self::Lt),
            Tok::Op("<=") => Some(Self::Le),
            Tok::Op(">") => Some(Self::Gt),
            Tok::Op(">=") => Some(Self::Ge),
            _ => None,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
    /// `~x`
    Invert,
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(String),
}

/// One piece of an f-string.
#[derive(Debug, Clone)]
pub enum FPart {
    /// Literal text.
    Text(String),
    /// An interpolated expression and its optional format spec.
    Expr(Box<Expr>, Option<String>),
}

/// An expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Variable reference.
    Name(String),
    /// Constant.
    Literal(Literal),
    /// Formatted string.
    FString(Vec<FPart>),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `(a, b)`
    Tuple(Vec<Expr>),
    /// `{k: v}`
    Dict(Vec<(Expr, Expr)>),
    /// `obj.name`
    Attr {
        /// Receiver.
        obj: Box<Expr>,
        /// Attribute name.
        name: String,
    },
    /// `func(args, key=value)`
    Call {
        /// Callee.
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments.
        kwargs: Vec<(String, Expr)>,
    },
    /// `obj[index]`
    Subscript {
        /// Receiver.
        obj: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `start:stop` inside a subscript.
    Slice {
        /// Lower bound.
        start: Option<Box<Expr>>,
        /// Upper bound.
        stop: Option<Box<Expr>>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `a and b`
    And(Box<Expr>, Box<Expr>),
    /// `a or b`
    Or(Box<Expr>, Box<Expr>),
    /// `a if cond else b`
    IfElse {
        /// Condition.
        cond: Box<Expr>,
        /// Value when true.
        then: Box<Expr>,
        /// Value when false.
        otherwise: Box<Expr>,
    },
    /// `lambda x: body`
    Lambda {
        /// Parameter names.
        params: Vec<String>,
        /// Body.
        body: Arc<Expr>,
    },
}

/// An assignment target.
#[derive(Debug, Clone)]
pub enum Target {
    /// `name = ...`
    Name(String),
    /// `obj[index] = ...`
    Subscript {
        /// Receiver.
        obj: Expr,
        /// Index.
        index: Expr,
    },
    /// `obj.attr = ...`
    Attr {
        /// Receiver.
        obj: Expr,
        /// Attribute.
        name: String,
    },
    /// `a, b = ...`
    Tuple(Vec<Target>),
}

/// A statement kind.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `target = value`
    Assign {
        /// Where to bind.
        target: Target,
        /// What to bind.
        value: Expr,
    },
    /// `target op= value`
    AugAssign {
        /// Where to bind.
        target: Target,
        /// Operator.
        op: BinOp,
        /// Right operand.
        value: Expr,
    },
    /// A bare expression.
    Expr(Expr),
    /// `import module [as alias]`
    Import {
        /// Dotted module path.
        module: String,
        /// Bound name.
        alias: String,
    },
    /// `pass`
    Pass,
}

/// A statement and its source line.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// 1-based source line.
    pub line: usize,
    /// The statement.
    pub kind: StmtKind,
}

/// Parses a whole code block.
pub fn parse_program(src: &str) -> ExecResult<Vec<Stmt>> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        stmts.extend(parser.statement()?);
    }
    Ok(stmts)
}

/// Parses a single expression, as found inside f-string braces.
pub fn parse_expression(src: &str, line: usize) -> ExecResult<Expr> {
    let tokens: Vec<Token> = tokenize(src)
        .map_err(|_| ExecError::syntax(line, "f-string: invalid expression"))?
        .into_iter()
        .map(|mut t| {
            t.line = line;
            t
        })
        .collect();
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("f-string: expecting '}'"));
    }
    Ok(expr)
}

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "if", "for", "while", "def", "class", "with", "try", "return", "del", "global", "raise",
    "assert", "yield", "async", "await",
];

static EOF: Tok = Tok::Eof;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map_or(&EOF, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == name)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.at_name(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ExecError {
        ExecError::syntax(self.line(), message)
    }

    fn expect_op(&mut self, op: &'static str) -> ExecResult<()> {
        if self.eat(&Tok::Op(op)) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn identifier(&mut self) -> ExecResult<String> {
        match self.advance() {
            Tok::Name(n) => Ok(n),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn end_of_statement(&mut self) -> ExecResult<()> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) {
            Ok(())
        } else {
            Err(self.error("invalid syntax"))
        }
    }

    fn statement(&mut self) -> ExecResult<Vec<Stmt>> {
        let line = self.line();
        if let Tok::Name(word) = self.peek() {
            if UNSUPPORTED_KEYWORDS.contains(&word.as_str()) {
                return Err(self.error(format!("'{word}' statements are not supported")));
            }
        }
        if self.eat_name("import") {
            let mut stmts = Vec::new();
            loop {
                let module = self.dotted_name()?;
                let alias = if self.eat_name("as") {
                    self.identifier()?
                } else {
                    module.split('.').next().unwrap_or_default().to_string()
                };
                stmts.push(Stmt {
                    line,
                    kind: StmtKind::Import { module, alias },
                });
                if !self.eat(&Tok::Op(",")) {
                    break;
                }
            }
            self.end_of_statement()?;
            return Ok(stmts);
        }
        if self.eat_name("from") {
            let package = self.dotted_name()?;
            if !self.eat_name("import") {
                return Err(self.error("invalid syntax"));
            }
            let mut stmts = Vec::new();
            loop {
                let name = self.identifier()?;
                let alias = if self.eat_name("as") {
                    self.identifier()?
                } else {
                    name.clone()
                };
                stmts.push(Stmt {
                    line,
                    kind: StmtKind::Import {
                        module: format!("{package}.{name}"),
                        alias,
                    },
                });
                if !self.eat(&Tok::Op(",")) {
                    break;
                }
            }
            self.end_of_statement()?;
            return Ok(stmts);
        }
        if self.eat_name("pass") {
            self.end_of_statement()?;
            return Ok(vec![Stmt {
                line,
                kind: StmtKind::Pass,
            }]);
        }

        let first = self.expr_list()?;
        let kind = if self.eat(&Tok::Op("=")) {
            let mut targets = vec![first];
            let mut value = self.expr_list()?;
            while self.eat(&Tok::Op("=")) {
                targets.push(value);
                value = self.expr_list()?;
            }
            if targets.len() > 1 {
                return Err(self.error("chained assignment is not supported"));
            }
            let target = self.to_target(targets.remove(0))?;
            StmtKind::Assign { target, value }
        } else if let Some(op) = self.aug_op() {
            let target = self.to_target(first)?;
            let value = self.expr_list()?;
            StmtKind::AugAssign { target, op, value }
        } else {
            StmtKind::Expr(first)
        };
        self.end_of_statement()?;
        Ok(vec![Stmt { line, kind }])
    }

    fn aug_op(&mut self) -> Option<BinOp> {
        let op = match self.peek() {
            Tok::Op("+=") => BinOp::Add,
            Tok::Op("-=") => BinOp::Sub,
            Tok::Op("*=") => BinOp::Mul,
            Tok::Op("/=") => BinOp::Div,
            Tok::Op("//=") => BinOp::FloorDiv,
            Tok::Op("**=") => BinOp::Pow,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn dotted_name(&mut self) -> ExecResult<String> {
        let mut name = self.identifier()?;
        while self.eat(&Tok::Op(".")) {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn to_target(&self, expr: Expr) -> ExecResult<Target> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Subscript { obj, index } => Ok(Target::Subscript {
                obj: *obj,
                index: *index,
            }),
            Expr::Attr { obj, name } => Ok(Target::Attr { obj: *obj, name }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<ExecResult<_>>()?,
            )),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// Comma-separated expressions; more than one forms a tuple.
    fn expr_list(&mut self) -> ExecResult<Expr> {
        let first = self.expr()?;
        if !self.at(&Tok::Op(",")) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Op(",")) {
            if matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op("=")) {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expr(&mut self) -> ExecResult<Expr> {
        if self.eat_name("lambda") {
            let mut params = Vec::new();
            if !self.at(&Tok::Op(":")) {
                loop {
                    params.push(self.identifier()?);
                    if !self.eat(&Tok::Op(",")) {
                        break;
                    }
                }
            }
            self.expect_op(":")?;
            let body = self.expr()?;
            return Ok(Expr::Lambda {
                params,
                body: Arc::new(body),
            });
        }
        let value = self.or_expr()?;
        if self.eat_name("if") {
            let cond = self.or_expr()?;
            if !self.eat_name("else") {
                return Err(self.error("expected 'else' after 'if' expression"));
            }
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> ExecResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_name("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ExecResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_name("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ExecResult<Expr> {
        if self.eat_name("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<BinOp> {
        if let Some(op) = BinOp::comparison(self.peek()) {
            self.pos += 1;
            return Some(op);
        }
        if self.at_name("in") {
            self.pos += 1;
            return Some(BinOp::In);
        }
        if self.at_name("not") && matches!(self.peek_at(1), Tok::Name(n) if n == "in") {
            self.pos += 2;
            return Some(BinOp::NotIn);
        }
        if self.at_name("is") {
            self.pos += 1;
            if self.eat_name("not") {
                return Some(BinOp::IsNot);
            }
            return Some(BinOp::Is);
        }
        None
    }

    fn comparison(&mut self) -> ExecResult<Expr> {
        let left = self.bit_or()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        let right = self.bit_or()?;
        let mut result = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right.clone()),
        };
        // Chained comparisons: a < b < c means (a < b) and (b < c).
        let mut prev = right;
        while let Some(op) = self.comparison_op() {
            let next = self.bit_or()?;
            let link = Expr::Binary {
                op,
                left: Box::new(prev),
                right: Box::new(next.clone()),
            };
            result = Expr::And(Box::new(result), Box::new(link));
            prev = next;
        }
        Ok(result)
    }

    fn binary_level(
        &mut self,
        ops: &[(&'static str, BinOp)],
        next: fn(&mut Self) -> ExecResult<Expr>,
    ) -> ExecResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.eat(&Tok::Op(*sym)) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bit_or(&mut self) -> ExecResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bit_and)
    }

    fn bit_and(&mut self) -> ExecResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::arith)
    }

    fn arith(&mut self) -> ExecResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> ExecResult<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> ExecResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ExecResult<Expr> {
        let base = self.postfix()?;
        if self.eat(&Tok::Op("**")) {
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ExecResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Tok::Op(".")) {
                let name = self.identifier()?;
                expr = Expr::Attr {
                    obj: Box::new(expr),
                    name,
                };
            } else if self.eat(&Tok::Op("(")) {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat(&Tok::Op("[")) {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    obj: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> ExecResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.eat(&Tok::Op(")")) {
            if let (Tok::Name(name), Tok::Op("=")) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.pos += 2;
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expr()?);
            }
            if !self.eat(&Tok::Op(",")) {
                self.expect_op(")")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn slice_part(&mut self) -> ExecResult<Option<Box<Expr>>> {
        if matches!(self.peek(), Tok::Op(":" | "]" | ",")) {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.expr()?)))
        }
    }

    fn subscript_item(&mut self) -> ExecResult<Expr> {
        let start = self.slice_part()?;
        if !self.eat(&Tok::Op(":")) {
            return start.map(|e| *e).ok_or_else(|| self.error("invalid syntax"));
        }
        let stop = self.slice_part()?;
        Ok(Expr::Slice { start, stop })
    }

    fn subscript(&mut self) -> ExecResult<Expr> {
        let first = self.subscript_item()?;
        if !self.at(&Tok::Op(",")) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Op(",")) {
            if self.at(&Tok::Op("]")) {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn atom(&mut self) -> ExecResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Name(name) => Ok(match name.as_str() {
                "None" => Expr::Literal(Literal::None),
                "True" => Expr::Literal(Literal::Bool(true)),
                "False" => Expr::Literal(Literal::Bool(false)),
                _ => Expr::Name(name),
            }),
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Str(s) => {
                let mut text = s;
                let mut parts: Option<Vec<FPart>> = None;
                self.adjacent_strings(&mut text, &mut parts, line)?;
                Ok(match parts {
                    Some(mut parts) => {
                        if !text.is_empty() {
                            parts.push(FPart::Text(text));
                        }
                        Expr::FString(parts)
                    }
                    None => Expr::Literal(Literal::Str(text)),
                })
            }
            Tok::FStr(body) => {
                let mut parts = parse_fstring(&body, line)?;
                let mut text = String::new();
                let mut more = Some(Vec::new());
                self.adjacent_strings(&mut text, &mut more, line)?;
                if let Some(rest) = more {
                    parts.extend(rest);
                }
                if !text.is_empty() {
                    parts.push(FPart::Text(text));
                }
                Ok(Expr::FString(parts))
            }
            Tok::Op("(") => {
                if self.eat(&Tok::Op(")")) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                if self.eat(&Tok::Op(")")) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Tok::Op(",")) {
                    if self.at(&Tok::Op(")")) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                let mut items = Vec::new();
                while !self.eat(&Tok::Op("]")) {
                    items.push(self.expr()?);
                    if self.at_name("for") {
                        return Err(self.error("comprehensions are not supported"));
                    }
                    if !self.eat(&Tok::Op(",")) {
                        self.expect_op("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                let mut items = Vec::new();
                while !self.eat(&Tok::Op("}")) {
                    let key = self.expr()?;
                    self.expect_op(":")?;
                    let value = self.expr()?;
                    items.push((key, value));
                    if !self.eat(&Tok::Op(",")) {
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(items))
            }
            Tok::Newline | Tok::Eof => Err(ExecError::syntax(line, "unexpected end of statement")),
            other => Err(ExecError::syntax(line, format!("invalid syntax near {other:?}"))),
        }
    }

    /// Folds string literals that directly follow the current one.
    fn adjacent_strings(
        &mut self,
        text: &mut String,
        parts: &mut Option<Vec<FPart>>,
        line: usize,
    ) -> ExecResult<()> {
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    text.push_str(&s);
                }
                Tok::FStr(body) => {
                    self.pos += 1;
                    let list = parts.get_or_insert_with(Vec::new);
                    if !text.is_empty() {
                        list.push(FPart::Text(std::mem::take(text)));
                    }
                    list.extend(parse_fstring(&body, line)?);
                }
                _ => return Ok(()),
            }
        }
    }
}

/// Splits an f-string body into text and expression parts.
fn parse_fstring(body: &str, line: usize) -> ExecResult<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            text.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            text.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ExecError::syntax(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            text.push(c);
            i += 1;
            continue;
        }

        // Scan to the matching close brace, noting a top-level ':' spec.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut spec_at: Option<usize> = None;
        let mut j = start;
        loop {
            let Some(&d) = chars.get(j) else {
                return Err(ExecError::syntax(line, "f-string: expecting '}'"));
            };
            match (quote, d) {
                (Some(q), d) if d == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(d),
                (None, '(' | '[' | '{') => depth += 1,
                (None, ')' | ']') => depth = depth.saturating_sub(1),
                (None, '}') if depth == 0 => break,
                (None, '}') => depth -= 1,
                (None, ':') if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                (None, '!') if depth == 0 && chars.get(j + 1) != Some(&'=') && spec_at.is_none() => {
                    spec_at = Some(j);
                }
                _ => {}
            }
            j += 1;
        }
        let expr_end = spec_at.unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        if source.trim().is_empty() {
            return Err(ExecError::syntax(line, "f-string: empty expression not allowed"));
        }
        let spec = spec_at.map(|s| {
            let raw: String = chars[s + 1..j].iter().collect();
            // Conversion flags like !r are dropped, the format part is kept.
            if chars[s] == '!' {
                raw.split_once(':')
                    .map(|(_, spec)| spec.to_string())
                    .unwrap_or_default()
            } else {
                raw
            }
        });
        if !text.is_empty() {
            parts.push(FPart::Text(std::mem::take(&mut text)));
        }
        let expr = parse_expression(source.trim(), line)?;
        parts.push(FPart::Expr(Box::new(expr), spec.filter(|s| !s.is_empty())));
        i = j + 1;
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> StmtKind {
        let mut stmts = parse_program(src).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.remove(0).kind
    }

    #[test]
    fn test_assignment_with_mask() {
        let StmtKind::Assign { target, value } =
            single("result = orders[orders['amount'] > 100]")
        else {
            panic!("expected assignment");
        };
        assert!(matches!(target, Target::Name(ref n) if n == "result"));
        assert!(matches!(value, Expr::Subscript { .. }));
    }

    #[test]
    fn test_precedence() {
        let StmtKind::Expr(Expr::Binary { op, right, .. }) = single("1 + 2 * 3") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));

        let StmtKind::Expr(Expr::Binary { op, .. }) = single("(a > 1) & (b < 2)") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::BitAnd);
    }

    #[test]
    fn test_method_chain_with_kwargs() {
        let stmt = single("df.groupby('a')['b'].sum().sort_values(ascending=False)");
        let StmtKind::Expr(Expr::Call { kwargs, .. }) = stmt else {
            panic!("expected call");
        };
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs[0].0, "ascending");
    }

    #[test]
    fn test_imports() {
        let stmts = parse_program("import pandas as pd\nfrom matplotlib import pyplot as plt").unwrap();
        assert!(matches!(
            &stmts[1].kind,
            StmtKind::Import { module, alias } if module == "matplotlib.pyplot" && alias == "plt"
        ));
    }

    #[test]
    fn test_column_assignment_target() {
        let stmt = single("df['total'] = df['price'] * df['qty']");
        assert!(matches!(
            stmt,
            StmtKind::Assign {
                target: Target::Subscript { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_fstring_parts() {
        let StmtKind::Expr(Expr::FString(parts)) = single("f'Top {n} by {col!r}: {x:.1f}'") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 6);
        assert!(matches!(&parts[5], FPart::Expr(_, Some(spec)) if spec == ".1f"));
    }

    #[test]
    fn test_unsupported_statement() {
        let err = parse_program("x = 1\nfor i in x:\n  pass").unwrap_err();
        assert!(matches!(err, ExecError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_slice_and_tuple_subscript() {
        let stmt = single("df.loc[mask, ['a', 'b']]");
        let StmtKind::Expr(Expr::Subscript { index, .. }) = stmt else {
            panic!("expected subscript");
        };
        assert!(matches!(*index, Expr::Tuple(ref items) if items.len() == 2));

        let StmtKind::Expr(Expr::Subscript { index, .. }) = single("x[:3]") else {
            panic!("expected subscript");
        };
        assert!(matches!(*index, Expr::Slice { start: None, stop: Some(_) }));
    }

    #[test]
    fn test_invalid_syntax_reports_line() {
        let err = parse_program("a = 1\nb = = 2").unwrap_err();
        assert!(matches!(err, ExecError::Syntax { line: 2, .. }));
    }
}
