//! Compiled expression tree and parser.
//!
//! The grammar is a small JS-flavored subset: literals, dotted identifier
//! paths, unary `-`/`!`, arithmetic, comparisons, `&&`/`||`, ternary `?:`,
//! method calls on values, and `String`/`Number`/`Boolean` conversions.

use crate::error::ExprError;

/// Compiled expression optimized for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledExpr {
    Null,
    Bool(bool),
    Number(String), // stored as source text to preserve precision
    Str(String),
    /// Dotted identifier path resolved through the binding callback.
    Ident(String),
    Unary(UnaryOp, Box<CompiledExpr>),
    Binary(BinaryOp, Box<CompiledExpr>, Box<CompiledExpr>),
    Ternary(Box<CompiledExpr>, Box<CompiledExpr>, Box<CompiledExpr>),
    /// `target.method(args...)`
    Method(Box<CompiledExpr>, String, Vec<CompiledExpr>),
    /// `String(x)` / `Number(x)` / `Boolean(x)`
    Convert(ConvertFn, Box<CompiledExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertFn {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

struct Tokenizer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ExprError {
        ExprError::Parse {
            source_text: self.source.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ExprError> {
        let mut tokens = Vec::new();
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            if c.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            let start = self.pos;
            match c {
                b'0'..=b'9' => {
                    while self.pos < self.bytes.len()
                        && (self.bytes[self.pos].is_ascii_digit() || self.bytes[self.pos] == b'.')
                    {
                        // A dot followed by a non-digit is member access, not a decimal point.
                        if self.bytes[self.pos] == b'.'
                            && !self
                                .bytes
                                .get(self.pos + 1)
                                .is_some_and(u8::is_ascii_digit)
                        {
                            break;
                        }
                        self.pos += 1;
                    }
                    tokens.push((start, Token::Number(self.source[start..self.pos].to_string())));
                }
                b'"' | b'\'' => {
                    let quote = c;
                    self.pos += 1;
                    let mut text = String::new();
                    loop {
                        if self.pos >= self.bytes.len() {
                            return Err(self.error("unterminated string"));
                        }
                        let b = self.bytes[self.pos];
                        if b == quote {
                            self.pos += 1;
                            break;
                        }
                        if b == b'\\' {
                            self.pos += 1;
                            let escaped = *self
                                .bytes
                                .get(self.pos)
                                .ok_or_else(|| self.error("unterminated escape"))?;
                            text.push(match escaped {
                                b'n' => '\n',
                                b't' => '\t',
                                b'r' => '\r',
                                other => other as char,
                            });
                            self.pos += 1;
                        } else {
                            let ch = self.source[self.pos..].chars().next().unwrap();
                            text.push(ch);
                            self.pos += ch.len_utf8();
                        }
                    }
                    tokens.push((start, Token::Str(text)));
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => {
                    while self.pos < self.bytes.len()
                        && (self.bytes[self.pos].is_ascii_alphanumeric()
                            || self.bytes[self.pos] == b'_'
                            || self.bytes[self.pos] == b'$')
                    {
                        self.pos += 1;
                    }
                    tokens.push((start, Token::Ident(self.source[start..self.pos].to_string())));
                }
                _ => {
                    let two = self.source.get(self.pos..self.pos + 2);
                    let punct = match two {
                        Some("==") => Some("=="),
                        Some("!=") => Some("!="),
                        Some("<=") => Some("<="),
                        Some(">=") => Some(">="),
                        Some("&&") => Some("&&"),
                        Some("||") => Some("||"),
                        _ => None,
                    };
                    if let Some(p) = punct {
                        self.pos += 2;
                        tokens.push((start, Token::Punct(p)));
                        continue;
                    }
                    let one = match c {
                        b'+' => "+",
                        b'-' => "-",
                        b'*' => "*",
                        b'/' => "/",
                        b'%' => "%",
                        b'<' => "<",
                        b'>' => ">",
                        b'!' => "!",
                        b'(' => "(",
                        b')' => ")",
                        b',' => ",",
                        b'.' => ".",
                        b'?' => "?",
                        b':' => ":",
                        other => {
                            return Err(self.error(format!("unexpected character {:?}", other as char)))
                        }
                    };
                    self.pos += 1;
                    tokens.push((start, Token::Punct(one)));
                }
            }
        }
        Ok(tokens)
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

/// Parse an expression source into a compiled tree.
pub fn parse(source: &str) -> Result<CompiledExpr, ExprError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.ternary()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(expr)
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> ExprError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|(at, _)| *at)
            .unwrap_or(self.source.len());
        ExprError::Parse {
            source_text: self.source.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if let Some(Token::Punct(p)) = self.peek() {
            if *p == punct {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {punct:?}")))
        }
    }

    fn ternary(&mut self) -> Result<CompiledExpr, ExprError> {
        let cond = self.or()?;
        if self.eat_punct("?") {
            let then = self.ternary()?;
            self.expect_punct(":")?;
            let otherwise = self.ternary()?;
            return Ok(CompiledExpr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<CompiledExpr, ExprError> {
        let mut left = self.and()?;
        while self.eat_punct("||") {
            let right = self.and()?;
            left = CompiledExpr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<CompiledExpr, ExprError> {
        let mut left = self.comparison()?;
        while self.eat_punct("&&") {
            let right = self.comparison()?;
            left = CompiledExpr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<CompiledExpr, ExprError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Punct("==")) => Some(BinaryOp::Equal),
            Some(Token::Punct("!=")) => Some(BinaryOp::NotEqual),
            Some(Token::Punct("<")) => Some(BinaryOp::LessThan),
            Some(Token::Punct("<=")) => Some(BinaryOp::LessThanOrEqual),
            Some(Token::Punct(">")) => Some(BinaryOp::GreaterThan),
            Some(Token::Punct(">=")) => Some(BinaryOp::GreaterThanOrEqual),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.additive()?;
            return Ok(CompiledExpr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<CompiledExpr, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("+")) => BinaryOp::Add,
                Some(Token::Punct("-")) => BinaryOp::Subtract,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = CompiledExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<CompiledExpr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("*")) => BinaryOp::Multiply,
                Some(Token::Punct("/")) => BinaryOp::Divide,
                Some(Token::Punct("%")) => BinaryOp::Modulo,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = CompiledExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<CompiledExpr, ExprError> {
        if self.eat_punct("-") {
            let inner = self.unary()?;
            return Ok(CompiledExpr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.eat_punct("!") {
            let inner = self.unary()?;
            return Ok(CompiledExpr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.postfix()
    }

    /// Primary expression followed by `.segment`, `.method(...)` chains.
    fn postfix(&mut self) -> Result<CompiledExpr, ExprError> {
        let mut expr = self.primary()?;
        while self.eat_punct(".") {
            let name = match self.peek() {
                Some(Token::Ident(name)) => name.clone(),
                _ => return Err(self.error("expected member name after '.'")),
            };
            self.pos += 1;

            if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.ternary()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = CompiledExpr::Method(Box::new(expr), name, args);
            } else if let CompiledExpr::Ident(path) = &expr {
                // Extend the dotted path; property semantics resolve later.
                expr = CompiledExpr::Ident(format!("{path}.{name}"));
            } else {
                expr = CompiledExpr::Method(Box::new(expr), name, Vec::new());
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<CompiledExpr, ExprError> {
        match self.peek().cloned() {
            Some(Token::Number(text)) => {
                self.pos += 1;
                Ok(CompiledExpr::Number(text))
            }
            Some(Token::Str(text)) => {
                self.pos += 1;
                Ok(CompiledExpr::Str(text))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "null" | "undefined" => Ok(CompiledExpr::Null),
                    "true" => Ok(CompiledExpr::Bool(true)),
                    "false" => Ok(CompiledExpr::Bool(false)),
                    "String" | "Number" | "Boolean" if self.eat_punct("(") => {
                        let inner = self.ternary()?;
                        self.expect_punct(")")?;
                        let conv = match name.as_str() {
                            "String" => ConvertFn::String,
                            "Number" => ConvertFn::Number,
                            _ => ConvertFn::Boolean,
                        };
                        Ok(CompiledExpr::Convert(conv, Box::new(inner)))
                    }
                    _ => Ok(CompiledExpr::Ident(name)),
                }
            }
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let inner = self.ternary()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            _ => Err(self.error("expected expression")),
        }
    }
}

pub use self::ConvertFn as Conversion;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("10").unwrap(), CompiledExpr::Number("10".into()));
        assert_eq!(parse("'hi'").unwrap(), CompiledExpr::Str("hi".into()));
        assert_eq!(parse("true").unwrap(), CompiledExpr::Bool(true));
        assert_eq!(parse("null").unwrap(), CompiledExpr::Null);
        assert_eq!(parse("(10)").unwrap(), CompiledExpr::Number("10".into()));
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(parse("map.$key").unwrap(), CompiledExpr::Ident("map.$key".into()));
        assert_eq!(parse("a.b.c").unwrap(), CompiledExpr::Ident("a.b.c".into()));
    }

    #[test]
    fn test_parse_method_chain() {
        let expr = parse("globe.toUpperCase()").unwrap();
        assert_eq!(
            expr,
            CompiledExpr::Method(
                Box::new(CompiledExpr::Ident("globe".into())),
                "toUpperCase".into(),
                vec![]
            )
        );
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            CompiledExpr::Binary(BinaryOp::Add, _, right) => match *right {
                CompiledExpr::Binary(BinaryOp::Multiply, _, _) => {}
                other => panic!("expected multiply on right, got {other:?}"),
            },
            other => panic!("expected add at root, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ternary() {
        assert!(matches!(
            parse("a ? 'x' : 'y'").unwrap(),
            CompiledExpr::Ternary(..)
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("1 +").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("a ..b").is_err());
    }
}
