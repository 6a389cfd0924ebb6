//! Condition expressions on sequence flows.
//!
//! Conditions are boolean expressions over document items. The expression
//! language supports:
//!
//! - `field` - item access (truthy check on the first value)
//! - `field.nested` - nested access into a map value
//! - `field == value` - equality (strings, numbers, booleans, null)
//! - `field != value` - inequality
//! - `field > value`, `>=`, `<`, `<=` - numeric comparison
//! - `!expr` - logical NOT
//! - `expr && expr` - logical AND (higher precedence than OR)
//! - `expr || expr` - logical OR
//! - `(expr)` - grouping
//! - `true` / `false` - constants
//!
//! Item names are case-insensitive and may contain `$` and dots, so
//! `$workflowgroup == "Invoice"` and `adapter.error_code == "TIMEOUT"` both work.
//! A dotted name that is not an item is resolved as a path into a map item.

use crate::document::Document;
use crate::error::CoreError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Evaluates a textual boolean expression against a document.
///
/// Malformed input must fail with [`CoreError::InvalidExpression`], never
/// silently evaluate to false.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate_boolean(&self, expression: &str, doc: &Document) -> Result<bool, CoreError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &Document) -> Result<bool, CoreError> + Send + Sync,
{
    fn evaluate_boolean(&self, expression: &str, doc: &Document) -> Result<bool, CoreError> {
        self(expression, doc)
    }
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Const(bool),
    Truthy(String),
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, f64),
    Ge(String, f64),
    Lt(String, f64),
    Le(String, f64),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Parses a condition from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty expression"));
        }

        let mut parser = Parser::new(trimmed);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(invalid(
                s,
                format!("unexpected input at offset {}", parser.pos),
            ));
        }
        Ok(expr)
    }

    /// Evaluates the condition against a document.
    pub fn evaluate(&self, doc: &Document) -> bool {
        match self {
            Condition::Const(b) => *b,
            Condition::Truthy(field) => is_truthy(&get_field(doc, field)),
            Condition::Eq(field, expected) => values_equal(&get_field(doc, field), expected),
            Condition::Ne(field, expected) => !values_equal(&get_field(doc, field), expected),
            Condition::Gt(field, n) => compare(doc, field, |v| v > *n),
            Condition::Ge(field, n) => compare(doc, field, |v| v >= *n),
            Condition::Lt(field, n) => compare(doc, field, |v| v < *n),
            Condition::Le(field, n) => compare(doc, field, |v| v <= *n),
            Condition::And(left, right) => left.evaluate(doc) && right.evaluate(doc),
            Condition::Or(left, right) => left.evaluate(doc) || right.evaluate(doc),
            Condition::Not(inner) => !inner.evaluate(doc),
        }
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn compare(doc: &Document, field: &str, op: impl Fn(f64) -> bool) -> bool {
    as_f64(&get_field(doc, field)).map(op).unwrap_or(false)
}

fn get_field(doc: &Document, field: &str) -> Value {
    if let Some(value) = doc.get_first(field) {
        return value.to_json();
    }

    // Longest item-name prefix first, then walk the remaining path.
    let parts: Vec<&str> = field.split('.').collect();
    for split in (1..parts.len()).rev() {
        let item = parts[..split].join(".");
        if let Some(value) = doc.get_first(&item) {
            let mut current = value.to_json();
            for part in &parts[split..] {
                current = match current {
                    Value::Object(mut map) => map.remove(*part).unwrap_or(Value::Null),
                    _ => return Value::Null,
                };
            }
            return current;
        }
    }

    Value::Null
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::String(a), Value::String(b)) => a == b,
        // Numeric text items compare equal to numbers.
        (Value::String(s), Value::Number(n)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Recursive descent parser for conditions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> CoreError {
        invalid(self.input, reason)
    }

    fn parse_expr(&mut self) -> Result<Condition, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Condition, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            self.skip_whitespace();
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('(') {
            self.pos += 1;
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(self.error("expected ')'"));
            }
            self.pos += 1;
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Condition, CoreError> {
        self.skip_whitespace();
        let field = self.parse_field()?;
        self.skip_whitespace();

        if self.peek_str("==") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(Condition::Eq(field, value));
        }
        if self.peek_str("!=") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(Condition::Ne(field, value));
        }
        if self.peek_str(">=") {
            self.pos += 2;
            return Ok(Condition::Ge(field, self.parse_number()?));
        }
        if self.peek_str("<=") {
            self.pos += 2;
            return Ok(Condition::Le(field, self.parse_number()?));
        }
        if self.peek_char() == Some('>') {
            self.pos += 1;
            return Ok(Condition::Gt(field, self.parse_number()?));
        }
        if self.peek_char() == Some('<') {
            self.pos += 1;
            return Ok(Condition::Lt(field, self.parse_number()?));
        }

        match field.as_str() {
            "true" => Ok(Condition::Const(true)),
            "false" => Ok(Condition::Const(false)),
            _ => Ok(Condition::Truthy(field)),
        }
    }

    fn parse_field(&mut self) -> Result<String, CoreError> {
        let start = self.pos;

        match self.peek_char() {
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => self.pos += c.len_utf8(),
            _ => return Err(self.error(format!("expected item name at offset {}", start))),
        }

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' || c == '-' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let field = self.input[start..self.pos].trim_end_matches('.');
        if field.is_empty() {
            return Err(self.error("empty item name"));
        }
        Ok(field.to_string())
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];

        if rest.starts_with("true") {
            self.pos += 4;
            return Ok(Value::Bool(true));
        }
        if rest.starts_with("false") {
            self.pos += 5;
            return Ok(Value::Bool(false));
        }
        if rest.starts_with("null") {
            self.pos += 4;
            return Ok(Value::Null);
        }
        if rest.starts_with('"') || rest.starts_with('\'') {
            return self.parse_string_value();
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| self.error(format!("invalid number: {}", num)))
    }

    fn parse_string_value(&mut self) -> Result<Value, CoreError> {
        let Some(quote) = self.peek_char() else {
            return Err(self.error("expected string"));
        };
        self.pos += 1;

        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            if c == quote {
                self.pos += offset + 1;
                return Ok(Value::String(out));
            }
            if c == '\\' {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            } else {
                out.push(c);
            }
        }

        Err(self.error("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek_char() == Some('.') {
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

/// Default evaluator. Parsed conditions are cached by expression text.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    cache: DashMap<String, Arc<Condition>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct expressions parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn condition(&self, expression: &str) -> Result<Arc<Condition>, CoreError> {
        if let Some(cond) = self.cache.get(expression) {
            return Ok(Arc::clone(cond.value()));
        }
        let cond = Arc::new(Condition::parse(expression)?);
        self.cache
            .insert(expression.to_string(), Arc::clone(&cond));
        Ok(cond)
    }
}

impl ExpressionEvaluator for ConditionEvaluator {
    fn evaluate_boolean(&self, expression: &str, doc: &Document) -> Result<bool, CoreError> {
        Ok(self.condition(expression)?.evaluate(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ItemValue;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn eval(expr: &str, doc: &Document) -> bool {
        Condition::parse(expr).unwrap().evaluate(doc)
    }

    #[test]
    fn test_truthy_check() {
        assert!(eval("approved", &Document::new().with("approved", true)));
        assert!(!eval("approved", &Document::new().with("approved", false)));
        assert!(!eval("approved", &Document::new().with("approved", "false")));
        assert!(!eval("approved", &Document::new()));
    }

    #[test]
    fn test_constants() {
        assert!(eval("true", &Document::new()));
        assert!(!eval("false", &Document::new()));
        assert!(eval("!false", &Document::new()));
    }

    #[test]
    fn test_numeric_comparison() {
        let doc = Document::new().with("amount", 150);
        assert!(eval("amount > 100", &doc));
        assert!(!eval("amount < 100", &doc));
        assert!(eval("amount >= 150", &doc));
        assert!(eval("amount <= 150.0", &doc));
        assert!(!eval("amount > 100", &Document::new().with("amount", 50)));
        assert!(!eval("amount > 100", &Document::new().with("amount", 100)));
    }

    #[test]
    fn test_numeric_text_item() {
        let doc = Document::new().with("amount", "250");
        assert!(eval("amount > 100", &doc));
        assert!(eval("amount == 250", &doc));
    }

    #[test]
    fn test_item_names_are_case_insensitive() {
        let doc = Document::new().with("Amount", 10);
        assert!(eval("AMOUNT == 10", &doc));
    }

    #[test]
    fn test_reserved_and_dotted_item_names() {
        let doc = Document::new()
            .with("$workflowgroup", "Invoice")
            .with("adapter.error_code", "TIMEOUT");
        assert!(eval("$workflowgroup == \"Invoice\"", &doc));
        assert!(eval("adapter.error_code == 'TIMEOUT'", &doc));
    }

    #[test]
    fn test_nested_map_access() {
        let mut order = BTreeMap::new();
        order.insert("paid".to_string(), ItemValue::Bool(true));
        let doc = Document::new().with("order", ItemValue::Map(order));
        assert!(eval("order.paid", &doc));
        assert!(!eval("order.shipped", &doc));
        assert!(!eval("order.paid.deep", &doc));
    }

    #[test]
    fn test_logical_operators() {
        let doc = Document::new().with("a", true).with("b", false).with("c", true);
        assert!(eval("a && c", &doc));
        assert!(!eval("a && b", &doc));
        assert!(eval("b || c", &doc));
        assert!(eval("!(a && b)", &doc));
        assert!(eval("a && b || c", &doc));
        assert!(!eval("(a || b) && !c", &doc));
    }

    #[test]
    fn test_equality_and_inequality() {
        let doc = Document::new().with("status", "active");
        assert!(eval("status == \"active\"", &doc));
        assert!(eval("status != \"closed\"", &doc));
        assert!(eval("missing == null", &doc));
    }

    #[test]
    fn test_escaped_string() {
        let doc = Document::new().with("title", "say \"hi\"");
        assert!(eval(r#"title == "say \"hi\"""#, &doc));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "   ", "(a && b", "a == \"open", "a > abc", "a b", "&& a", "1 > 0"] {
            let err = Condition::parse(bad).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_EXPRESSION", "{}", bad);
        }
    }

    #[test]
    fn test_evaluator_caches_parsed_conditions() {
        let evaluator = ConditionEvaluator::new();
        let doc = Document::new().with("amount", 150);
        assert!(evaluator.evaluate_boolean("amount > 100", &doc).unwrap());
        assert!(evaluator.evaluate_boolean("amount > 100", &doc).unwrap());
        assert_eq!(evaluator.cached(), 1);
        assert!(evaluator.evaluate_boolean("amount >", &doc).is_err());
        assert_eq!(evaluator.cached(), 1);
    }

    #[test]
    fn test_closure_evaluator() {
        let always = |_: &str, _: &Document| -> Result<bool, CoreError> { Ok(true) };
        assert!(always.evaluate_boolean("anything", &Document::new()).unwrap());
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(amount in -1000i64..1000, limit in -1000i64..1000) {
            let evaluator = ConditionEvaluator::new();
            let doc = Document::new().with("amount", amount);
            let expr = format!("amount > {}", limit);
            let first = evaluator.evaluate_boolean(&expr, &doc).unwrap();
            let second = evaluator.evaluate_boolean(&expr, &doc).unwrap();
            prop_assert_eq!(first, second);
            prop_assert_eq!(first, amount > limit);
        }
    }
}
