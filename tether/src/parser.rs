//! Reader for the expression subset the reference machine evaluates.
//!
//! Literals, names (dotted and with a trailing `!`), calls, type application
//! with `{}`, indexing, vector and tuple literals, `a:b` ranges, the infix
//! operators `+ - * / ==`, assignment and `[mutable] struct ... end`.
use std::num::IntErrorKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer(i64),
    Float(f64),
    String(String),
    Char(char),
    Symbol(String),
    Name(String),
    /// `a.b`
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    /// `T{P...}`
    Curly(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Vec<Expr>),
    Vector(Vec<Expr>),
    Tuple(Vec<Expr>),
    Assign(String, Box<Expr>),
    Struct(StructDefinition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDefinition {
    pub name: String,
    pub mutable: bool,
    /// field name and its declared type, `None` means `Any`
    pub fields: Vec<(String, Option<Expr>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Integer(i64),
    Float(f64),
    String(String),
    Char(char),
    Identifier(String),
    Symbol(String),
    Punct(&'static str),
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

const PUNCTUATION: &[&str] = &[
    "==", "::", "(", ")", "[", "]", "{", "}", ",", ";", ".", "=", ":", "+", "-", "*", "/",
];

struct Lexer<'code> {
    code: &'code [u8],
    offset: usize,
    end: usize,
    depth: usize,
}

impl<'code> Lexer<'code> {
    fn new(code: &'code str) -> Self {
        Self {
            code: code.as_bytes(),
            offset: 0,
            end: code.len(),
            depth: 0,
        }
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.offset >= self.end
    }

    #[inline]
    fn peek_byte(&self) -> Option<u8> {
        self.code.get(self.offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset,
        }
    }

    fn skip_blank(&mut self) {
        while let Some(byte) = self.peek_byte() {
            match byte {
                b'\n' if self.depth == 0 => return,
                b'#' => {
                    while self.peek_byte().is_some_and(|b| b != b'\n') {
                        self.offset += 1;
                    }
                }
                byte if byte.is_ascii_whitespace() => self.offset += 1,
                _ => return,
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            self.skip_blank();
            if self.is_done() {
                return Ok(tokens);
            }
            let offset = self.offset;
            let after_operand = tokens.last().is_some_and(|token| token.ends_operand());
            let kind = self.next_kind(after_operand)?;
            tokens.push(Token { kind, offset });
        }
    }

    fn next_kind(&mut self, after_operand: bool) -> Result<TokenKind, ParseError> {
        let byte = self.code[self.offset];
        match byte {
            b'\n' => {
                self.offset += 1;
                Ok(TokenKind::Newline)
            }
            b'"' => self.string(),
            b'\'' => self.char(),
            b'0'..=b'9' => self.number(),
            b':' if !after_operand
                && self.code.get(self.offset + 1).is_some_and(|&b| is_identifier_start(b)) =>
            {
                self.offset += 1;
                Ok(TokenKind::Symbol(self.identifier()))
            }
            byte if is_identifier_start(byte) => Ok(TokenKind::Identifier(self.identifier())),
            _ => {
                let rest = &self.code[self.offset..];
                let Some(punct) = PUNCTUATION.iter().find(|p| rest.starts_with(p.as_bytes())) else {
                    return Err(self.error(format!("unexpected character {:?}", byte as char)));
                };
                match *punct {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => (),
                }
                self.offset += punct.len();
                Ok(TokenKind::Punct(*punct))
            }
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.offset;
        while self
            .peek_byte()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'!')
        {
            self.offset += 1;
        }
        String::from_utf8_lossy(&self.code[start..self.offset]).into_owned()
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.offset;
        let digits = |lexer: &mut Self| {
            while lexer.peek_byte().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                lexer.offset += 1;
            }
        };
        digits(self);
        let mut float = false;
        if self.peek_byte() == Some(b'.')
            && self.code.get(self.offset + 1).is_some_and(u8::is_ascii_digit)
        {
            float = true;
            self.offset += 1;
            digits(self);
        }
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            let mut exponent = self.offset + 1;
            if matches!(self.code.get(exponent), Some(b'+' | b'-')) {
                exponent += 1;
            }
            if self.code.get(exponent).is_some_and(u8::is_ascii_digit) {
                float = true;
                self.offset = exponent;
                digits(self);
            }
        }

        let text: String = String::from_utf8_lossy(&self.code[start..self.offset])
            .chars()
            .filter(|&c| c != '_')
            .collect();
        if float {
            return text
                .parse()
                .map(TokenKind::Float)
                .map_err(|_| self.error(format!("invalid number {text}")));
        }
        text.parse().map(TokenKind::Integer).map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow => {
                self.error(format!("integer literal {text} overflows Int64"))
            }
            _ => self.error(format!("invalid number {text}")),
        })
    }

    fn escaped(&mut self) -> Result<char, ParseError> {
        let rest = std::str::from_utf8(&self.code[self.offset..])
            .map_err(|_| self.error("invalid utf-8"))?;
        let mut chars = rest.chars();
        let c = chars.next().ok_or_else(|| self.error("unterminated literal"))?;
        self.offset += c.len_utf8();
        if c != '\\' {
            return Ok(c);
        }
        let escape = chars.next().ok_or_else(|| self.error("unterminated escape"))?;
        self.offset += escape.len_utf8();
        Ok(match escape {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        })
    }

    fn string(&mut self) -> Result<TokenKind, ParseError> {
        self.offset += 1;
        let mut out = String::new();
        loop {
            match self.peek_byte() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    self.offset += 1;
                    return Ok(TokenKind::String(out));
                }
                Some(_) => out.push(self.escaped()?),
            }
        }
    }

    fn char(&mut self) -> Result<TokenKind, ParseError> {
        self.offset += 1;
        let c = self.escaped()?;
        if self.peek_byte() != Some(b'\'') {
            return Err(self.error("character literal must contain one character"));
        }
        self.offset += 1;
        Ok(TokenKind::Char(c))
    }
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

impl Token {
    fn ends_operand(&self) -> bool {
        match &self.kind {
            TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::String(_)
            | TokenKind::Char(_)
            | TokenKind::Identifier(_)
            | TokenKind::Symbol(_) => true,
            TokenKind::Punct(p) => matches!(*p, ")" | "]" | "}"),
            TokenKind::Newline => false,
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    end_offset: usize,
}

impl Parser {
    pub fn new(code: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: Lexer::new(code).tokenize()?,
            position: 0,
            end_offset: code.len(),
        })
    }

    /// Parses a whole program into its statements.
    pub fn parse_program(code: &str) -> Result<Vec<Expr>, ParseError> {
        let mut parser = Self::new(code)?;
        let mut statements = Vec::new();
        loop {
            parser.skip_separators();
            if parser.is_done() {
                return Ok(statements);
            }
            statements.push(parser.statement()?);
            if !parser.is_done() && !parser.at_separator() {
                return Err(parser.error("extra token after end of expression"));
            }
        }
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.position).map(|token| &token.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map_or(self.end_offset, |token| token.offset)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.position)?.kind.clone();
        self.position += 1;
        Some(token)
    }

    fn at_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Punct(p)) if *p == punct)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Identifier(name)) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            return Ok(());
        }
        Err(self.error(format!("expected `{punct}`")))
    }

    /// An operator standing alone as an operand, as in `+` or `map(*, xs)`.
    fn operator_name(&self) -> Option<&'static str> {
        let Some(TokenKind::Punct(op @ ("+" | "-" | "*" | "/" | "=="))) = self.peek() else {
            return None;
        };
        let closes = match self.tokens.get(self.position + 1).map(|token| &token.kind) {
            None | Some(TokenKind::Newline) => true,
            Some(TokenKind::Punct(next)) => matches!(*next, ")" | "]" | "}" | "," | ";"),
            Some(_) => false,
        };
        closes.then_some(*op)
    }

    fn at_separator(&self) -> bool {
        matches!(self.peek(), Some(TokenKind::Newline)) || self.at_punct(";")
    }

    fn skip_separators(&mut self) {
        while self.at_separator() {
            self.position += 1;
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(TokenKind::Identifier(name)) => Ok(name),
            _ => {
                self.position = self.position.saturating_sub(1);
                Err(self.error("expected identifier"))
            }
        }
    }

    fn statement(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("struct") || self.at_keyword("mutable") {
            return self.struct_definition();
        }
        let target = self.expression()?;
        if !self.eat_punct("=") {
            return Ok(target);
        }
        let value = self.expression()?;
        match target {
            Expr::Name(name) => Ok(Expr::Assign(name, Box::new(value))),
            Expr::Index(collection, mut indices) => {
                indices.insert(0, value);
                indices.insert(0, *collection);
                Ok(call("setindex!", indices))
            }
            Expr::Field(object, field) => Ok(call(
                "setfield!",
                vec![*object, Expr::Symbol(field), value],
            )),
            _ => Err(self.error("invalid assignment target")),
        }
    }

    fn struct_definition(&mut self) -> Result<Expr, ParseError> {
        let mutable = self.at_keyword("mutable");
        if mutable {
            self.position += 1;
        }
        if !self.at_keyword("struct") {
            return Err(self.error("expected `struct`"));
        }
        self.position += 1;
        let name = self.identifier()?;

        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            if self.at_keyword("end") {
                self.position += 1;
                break;
            }
            if self.is_done() {
                return Err(self.error("unterminated struct definition"));
            }
            let field = self.identifier()?;
            let ty = if self.eat_punct("::") {
                Some(self.postfix()?)
            } else {
                None
            };
            fields.push((field, ty));
        }

        Ok(Expr::Struct(StructDefinition {
            name,
            mutable,
            fields,
        }))
    }

    pub fn expression(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.range()?;
        if self.eat_punct("==") {
            let rhs = self.range()?;
            return Ok(call("==", vec![lhs, rhs]));
        }
        Ok(lhs)
    }

    fn range(&mut self) -> Result<Expr, ParseError> {
        let start = self.additive()?;
        if self.eat_punct(":") {
            let stop = self.additive()?;
            return Ok(call("UnitRange", vec![start, stop]));
        }
        Ok(start)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Punct(op @ ("+" | "-"))) => *op,
                _ => return Ok(lhs),
            };
            self.position += 1;
            let rhs = self.multiplicative()?;
            lhs = call(op, vec![lhs, rhs]);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Punct(op @ ("*" | "/"))) => *op,
                _ => return Ok(lhs),
            };
            self.position += 1;
            let rhs = self.unary()?;
            lhs = call(op, vec![lhs, rhs]);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op) = self.operator_name() {
            self.position += 1;
            return Ok(Expr::Name(op.to_string()));
        }
        if !self.eat_punct("-") {
            return self.postfix();
        }
        match self.unary()? {
            Expr::Integer(n) => Ok(Expr::Integer(-n)),
            Expr::Float(f) => Ok(Expr::Float(-f)),
            operand => Ok(call("-", vec![operand])),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct("(") {
                let args = self.list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_punct("{") {
                let params = self.list("}")?;
                expr = Expr::Curly(Box::new(expr), params);
            } else if self.eat_punct("[") {
                let indices = self.list("]")?;
                expr = Expr::Index(Box::new(expr), indices);
            } else if self.eat_punct(".") {
                let field = self.identifier()?;
                expr = Expr::Field(Box::new(expr), field);
            } else {
                return Ok(expr);
            }
        }
    }

    /// comma separated expressions up to `close`
    fn list(&mut self, close: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct(close) {
                return Ok(items);
            }
            items.push(self.expression()?);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                return Ok(items);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of input"));
        };
        match token {
            TokenKind::Integer(n) => Ok(Expr::Integer(n)),
            TokenKind::Float(f) => Ok(Expr::Float(f)),
            TokenKind::String(s) => Ok(Expr::String(s)),
            TokenKind::Char(c) => Ok(Expr::Char(c)),
            TokenKind::Symbol(s) => Ok(Expr::Symbol(s)),
            TokenKind::Identifier(name) => Ok(Expr::Name(name)),
            TokenKind::Punct("[") => Ok(Expr::Vector(self.list("]")?)),
            TokenKind::Punct("(") => self.parenthesized(),
            _ => Err(ParseError {
                message: "unexpected token".to_string(),
                offset,
            }),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expression()?;
        if self.eat_punct(")") {
            return Ok(first);
        }
        self.expect_punct(",")?;
        let mut items = vec![first];
        items.extend(self.list(")")?);
        Ok(Expr::Tuple(items))
    }
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(Box::new(Expr::Name(name.to_string())), args)
}
