//! Tokenizer for generated analysis code.

use crate::exec::error::{ExecError, ExecResult};

/// A token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword.
    Name(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal, escapes resolved.
    Str(String),
    /// Formatted string literal, raw body.
    FStr(String),
    /// Operator or punctuation.
    Op(&'static str),
    /// End of a logical line.
    Newline,
    /// End of input.
    Eof,
}

/// A token with its 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token.
    pub tok: Tok,
    /// Source line.
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "->", "+", "-", "*",
    "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", "&", "|", "~", "^", "@",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    tokens: Vec<Token>,
}

/// Splits `src` into tokens.
///
/// Line breaks inside brackets, and after a trailing backslash, do not end
/// a logical line. Blank lines and comments produce no tokens.
pub fn tokenize(src: &str) -> ExecResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn newline(&mut self) {
        let needs = matches!(self.tokens.last(), Some(t) if t.tok != Tok::Newline);
        if needs {
            self.push(Tok::Newline);
        }
    }

    fn run(&mut self) -> ExecResult<()> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.newline();
                    }
                    self.line += 1;
                    self.pos += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                ';' => {
                    if self.depth == 0 {
                        self.newline();
                    }
                    self.pos += 1;
                }
                '"' | '\'' => {
                    let s = self.string(c, false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) => {
                    self.number()?;
                }
                c if c.is_alphabetic() || c == '_' => self.name()?,
                _ => self.operator()?,
            }
        }
        self.newline();
        self.push(Tok::Eof);
        Ok(())
    }

    fn name(&mut self) -> ExecResult<()> {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if let Some(quote @ ('"' | '\'')) = self.peek(0) {
            match word.to_ascii_lowercase().as_str() {
                "f" | "rf" | "fr" => {
                    let raw = word.to_ascii_lowercase().contains('r');
                    let body = self.string(quote, true)?;
                    let body = if raw { body } else { unescape_fstring(&body) };
                    self.push(Tok::FStr(body));
                    return Ok(());
                }
                "r" => {
                    let body = self.string(quote, true)?;
                    self.push(Tok::Str(body));
                    return Ok(());
                }
                "b" | "u" => {
                    let body = self.string(quote, false)?;
                    self.push(Tok::Str(body));
                    return Ok(());
                }
                _ => {}
            }
        }
        self.push(Tok::Name(word));
        Ok(())
    }

    /// Reads a quoted string starting at the opening quote. With `raw`,
    /// escapes are kept verbatim.
    fn string(&mut self, quote: char, raw: bool) -> ExecResult<String> {
        let line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ExecError::syntax(line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ExecError::syntax(line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' {
                let next = self.peek(1);
                if raw {
                    out.push('\\');
                    if let Some(n) = next {
                        out.push(n);
                    }
                } else {
                    match next {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('\\') => out.push('\\'),
                        Some('\'') => out.push('\''),
                        Some('"') => out.push('"'),
                        Some('\n') => self.line += 1,
                        Some(other) => {
                            out.push('\\');
                            out.push(other);
                        }
                        None => {}
                    }
                }
                self.pos += 2;
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn number(&mut self) -> ExecResult<()> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self
                    .peek(1)
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let tok = if is_float {
            text.parse()
                .map(Tok::Float)
                .map_err(|_| ExecError::syntax(self.line, format!("invalid number '{text}'")))?
        } else {
            text.parse()
                .map(Tok::Int)
                .map_err(|_| ExecError::syntax(self.line, format!("invalid number '{text}'")))?
        };
        self.push(tok);
        Ok(())
    }

    fn operator(&mut self) -> ExecResult<()> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, oc)| self.peek(i) == Some(oc));
            if matches {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => {
                        if self.depth == 0 {
                            return Err(ExecError::syntax(
                                self.line,
                                format!("unmatched '{op}'"),
                            ));
                        }
                        self.depth -= 1;
                    }
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        Err(ExecError::syntax(
            self.line,
            format!("invalid character '{c}'"),
        ))
    }
}

/// Resolves escapes in an f-string body, leaving braces alone.
fn unescape_fstring(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
