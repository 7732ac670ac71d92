//! Boolean conditions used by `if`, `while` and `repeatUntil`.
//!
//! Precedence, lowest first: `||`, `&&`, comparison, operand truthiness.
//! Splitting only happens at parenthesis depth zero and outside quotes.
//! `==` and `!=` compare loosely (string/number/boolean coercion); `===` and
//! `!==` compare without coercion.

use crate::core::process::expression::{ExpressionError, MAX_NESTING_DEPTH};
use crate::core::process::variables::{get_path, Variables};
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Checked in this order so that `>=` is never split as `>`.
const COMPARISON_OPERATORS: [&str; 8] = ["===", "!==", ">=", "<=", "!=", "==", ">", "<"];

fn numeric_literal() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric regex is valid"))
}

/// Evaluate a condition against the variable bag.
///
/// Every `||`/`&&` term is checked for emptiness before any term is
/// evaluated, so a dangling operator is an error even when short-circuiting
/// would never reach it.
pub fn evaluate_condition(condition: &str, variables: &Variables) -> Result<bool, ExpressionError> {
    evaluate_nested(condition, variables, 0)
}

fn evaluate_nested(
    condition: &str,
    variables: &Variables,
    depth: usize,
) -> Result<bool, ExpressionError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(ExpressionError::TooDeep(MAX_NESTING_DEPTH));
    }
    let disjuncts: Vec<Vec<&str>> = split_top_level(condition, "||")
        .into_iter()
        .map(|part| split_top_level(part, "&&"))
        .collect();
    if disjuncts.iter().flatten().any(|term| term.trim().is_empty()) {
        return Err(ExpressionError::EmptyTerm(condition.to_string()));
    }

    for conjuncts in &disjuncts {
        let mut holds = true;
        for term in conjuncts {
            if !evaluate_comparison(term, variables, condition, depth)? {
                holds = false;
                break;
            }
        }
        if holds {
            return Ok(true);
        }
    }
    Ok(false)
}

fn evaluate_comparison(
    text: &str,
    variables: &Variables,
    whole: &str,
    depth: usize,
) -> Result<bool, ExpressionError> {
    let term = text.trim();
    if term.is_empty() {
        return Err(ExpressionError::EmptyTerm(whole.to_string()));
    }
    for op in COMPARISON_OPERATORS {
        if let Some(index) = find_top_level(term, op) {
            let left = resolve_term(&term[..index], variables, depth)?;
            let right = resolve_term(&term[index + op.len()..], variables, depth)?;
            return Ok(compare(op, left.as_ref(), right.as_ref()));
        }
    }
    if let Some(rest) = term.strip_prefix('!') {
        return Ok(!evaluate_comparison(rest, variables, whole, depth + 1)?);
    }
    if let Some(inner) = strip_enclosing_parens(term) {
        return evaluate_nested(inner, variables, depth + 1);
    }
    let operand = resolve_term(term, variables, depth)?;
    Ok(operand.as_ref().map(is_truthy).unwrap_or(false))
}

/// Resolve a single operand token. `None` is `undefined`: an unknown
/// variable or the `undefined` literal, kept apart from `null`.
fn resolve_term(
    token: &str,
    variables: &Variables,
    depth: usize,
) -> Result<Option<Value>, ExpressionError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ExpressionError::EmptyTerm(token.to_string()));
    }
    if let Some(inner) = strip_enclosing_parens(token) {
        return evaluate_nested(inner, variables, depth + 1).map(|b| Some(Value::Bool(b)));
    }
    match token {
        "true" => return Ok(Some(Value::Bool(true))),
        "false" => return Ok(Some(Value::Bool(false))),
        "null" => return Ok(Some(Value::Null)),
        "undefined" => return Ok(None),
        _ => {}
    }
    if numeric_literal().is_match(token) {
        let parsed = token
            .parse::<f64>()
            .map_err(|_| ExpressionError::InvalidNumber(token.to_string()))?;
        let number = token
            .parse::<i64>()
            .map(|i| Value::Number(Number::from(i)))
            .unwrap_or_else(|_| {
                Number::from_f64(parsed)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            });
        return Ok(Some(number));
    }
    if let Some(literal) = strip_quotes(token) {
        return Ok(Some(Value::String(literal.to_string())));
    }
    Ok(get_path(variables, token).cloned())
}

fn strip_quotes(token: &str) -> Option<&str> {
    if token.len() < 2 {
        return None;
    }
    let first = token.chars().next()?;
    let last = token.chars().last()?;
    if (first == '"' || first == '\'') && first == last {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}

fn strip_enclosing_parens(term: &str) -> Option<&str> {
    if !term.starts_with('(') || !term.ends_with(')') {
        return None;
    }
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (index, c) in term.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 && index != term.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(&term[1..term.len() - 1])
}

/// Byte offset of the first occurrence of `pattern` at depth zero outside quotes.
fn find_top_level(text: &str, pattern: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (index, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, _) if depth == 0 && text[index..].starts_with(pattern) => {
                return Some(index);
            }
            _ => {}
        }
    }
    None
}

fn split_top_level<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(index) = find_top_level(rest, separator) {
        parts.push(&rest[..index]);
        rest = &rest[index + separator.len()..];
    }
    parts.push(rest);
    parts
}

/// Truthiness with the usual dynamic-language rules: `null`, `false`, `0`,
/// `NaN` and the empty string are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn compare(op: &str, left: Option<&Value>, right: Option<&Value>) -> bool {
    match op {
        "===" => strict_equals_defined(left, right),
        "!==" => !strict_equals_defined(left, right),
        "==" => loose_equals_defined(left, right),
        "!=" => !loose_equals_defined(left, right),
        _ => {
            // `undefined` is NaN under ordering, so every ordering comparison fails.
            let (Some(left), Some(right)) = (left, right) else {
                return false;
            };
            let ordered = ordering(left, right);
            match op {
                ">=" => matches!(ordered, Some(Ordering::Greater | Ordering::Equal)),
                "<=" => matches!(ordered, Some(Ordering::Less | Ordering::Equal)),
                ">" => ordered == Some(Ordering::Greater),
                "<" => ordered == Some(Ordering::Less),
                _ => false,
            }
        }
    }
}

fn strict_equals_defined(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => strict_equals(left, right),
        (None, None) => true,
        _ => false,
    }
}

/// `undefined` loosely equals only `null` and itself.
fn loose_equals_defined(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => loose_equals(left, right),
        (None, None) | (None, Some(Value::Null)) | (Some(Value::Null), None) => true,
        _ => false,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Equality without coercion; numbers compare by value regardless of representation.
pub fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Coercive equality: `"5" == 5`, `true == 1`.
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(_), Value::Number(_) | Value::String(_))
        | (Value::Number(_) | Value::String(_), Value::Bool(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => to_number(left) == to_number(right),
        _ => strict_equals(left, right),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    to_number(left).partial_cmp(&to_number(right))
}
