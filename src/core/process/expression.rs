//! Assignment expressions.
//!
//! Variable references are substituted into the expression text first. The
//! result is only evaluated when it is made of numbers, arithmetic operators
//! and parentheses; anything else is returned verbatim as a string. Evaluation
//! goes through a small recursive-descent parser, never through a script engine.

use crate::core::process::variables::{get_path, Variables};
use regex::{Captures, Regex};
use serde_json::{Number, Value};
use std::sync::OnceLock;

/// Errors raised while evaluating conditions or arithmetic expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' in arithmetic expression")]
    UnexpectedCharacter(char),
    #[error("unexpected end of arithmetic expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}' in arithmetic expression")]
    UnexpectedToken(String),
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("arithmetic result is not a finite number")]
    NonFinite,
    #[error("expression '{0}' does not evaluate to an integer")]
    NotAnInteger(String),
    #[error("empty condition term in '{0}'")]
    EmptyTerm(String),
    #[error("arithmetic expression nests deeper than {0} levels")]
    TooDeep(usize),
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*").expect("reference regex is valid")
    })
}

fn arithmetic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\d\s+\-*/%().]+$").expect("arithmetic regex is valid"))
}

/// Evaluate an assignment expression against the variable bag.
pub fn evaluate_expression(expression: &str, variables: &Variables) -> Result<Value, ExpressionError> {
    let substituted = substitute_references(expression, variables);
    if is_arithmetic(&substituted) {
        let number = evaluate_arithmetic(&substituted)?;
        return number_to_value(number);
    }
    Ok(Value::String(substituted))
}

/// Replace every resolvable variable reference with its textual value.
/// Unresolvable references are left untouched.
pub fn substitute_references(expression: &str, variables: &Variables) -> String {
    reference_pattern()
        .replace_all(expression, |caps: &Captures| {
            let token = &caps[0];
            match get_path(variables, token) {
                Some(value) => value_to_text(value),
                None => token.to_string(),
            }
        })
        .into_owned()
}

fn is_arithmetic(text: &str) -> bool {
    arithmetic_pattern().is_match(text) && text.chars().any(|c| c.is_ascii_digit())
}

/// Render a value the way it is spliced into expression text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Convert an arithmetic result into JSON, keeping integral results integral.
pub fn number_to_value(number: f64) -> Result<Value, ExpressionError> {
    if !number.is_finite() {
        return Err(ExpressionError::NonFinite);
    }
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number(Number::from(number as i64)));
    }
    Number::from_f64(number)
        .map(Value::Number)
        .ok_or(ExpressionError::NonFinite)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            d if d.is_ascii_digit() || d == '.' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let literal: String = chars[start..pos].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(value));
                continue;
            }
            other => return Err(ExpressionError::UnexpectedCharacter(other)),
        };
        tokens.push(token);
        pos += 1;
    }
    Ok(tokens)
}

/// Nesting limit for parentheses and unary signs.
pub const MAX_NESTING_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expression(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.term()?;
        while let Some(token @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if token == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.unary()?;
        while let Some(token @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match token {
                Token::Star => value * rhs,
                Token::Slash => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ExpressionError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, ExpressionError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(ExpressionError::UnexpectedToken(other.describe())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ExpressionError::UnexpectedToken(other.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// Evaluate text restricted to `+ - * / % ( )` and numeric literals.
pub fn evaluate_arithmetic(text: &str) -> Result<f64, ExpressionError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken(extra.describe()));
    }
    Ok(value)
}
