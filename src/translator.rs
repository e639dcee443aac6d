//! Translation of framework-level filters into [`Filter`] trees.
//!
//! The framework speaks in attribute names and comparisons; the statement
//! builder wants native column names and operators that already carry their
//! own polarity. [`FilterTranslator`] resolves the names through an
//! [`ObjectClass`] and pushes every NOT down to the leaves, where it is
//! folded into the operator.
//!
//! Criteria can be built directly or parsed from text:
//!
//! ```
//! use dbs_connector::translator::parse;
//!
//! let criteria = parse(r#"__NAME__ sw "al" and not (mail pr)"#).unwrap();
//! assert_eq!(criteria.to_string(), r#"(__NAME__ sw "al" and not mail pr)"#);
//! ```

use crate::entity::Attribute;
use crate::error::DbsError;
use crate::filter::{Filter, Operand, Operator};
use crate::parameter::Value;
use crate::schema::ObjectClass;
use std::fmt;

/// Framework identifier attribute
pub const UID: &str = "__UID__";
/// Framework descriptive name attribute
pub const NAME: &str = "__NAME__";
pub const ENABLE: &str = "__ENABLE__";
pub const PASSWORD: &str = "__PASSWORD__";

/// Leaf comparisons the framework can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
}

impl Comparison {
    /// The operator for this comparison, negated when `negate` is set.
    pub fn operator(&self, negate: bool) -> Operator {
        let operator = match self {
            Comparison::Equal => Operator::Equal,
            Comparison::GreaterThan => Operator::GreaterThan,
            Comparison::GreaterEqual => Operator::GreaterEqual,
            Comparison::LessThan => Operator::LessThan,
            Comparison::LessEqual => Operator::LessEqual,
            Comparison::Contains => Operator::Contains,
            Comparison::StartsWith => Operator::StartsWith,
            Comparison::EndsWith => Operator::EndsWith,
        };
        if negate {
            operator.negate()
        } else {
            operator
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Comparison::Equal => "eq",
            Comparison::GreaterThan => "gt",
            Comparison::GreaterEqual => "ge",
            Comparison::LessThan => "lt",
            Comparison::LessEqual => "le",
            Comparison::Contains => "co",
            Comparison::StartsWith => "sw",
            Comparison::EndsWith => "ew",
        }
    }
}

/// A framework-level filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    And(Box<Criteria>, Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
    Not(Box<Criteria>),
    Compare {
        attribute: String,
        comparison: Comparison,
        value: Value,
    },
    /// The attribute has a value
    Presence { attribute: String },
    /// The attribute holds one of `values`
    ContainsAll { attribute: String, values: Vec<Value> },
}

impl Criteria {
    pub fn compare(attribute: impl Into<String>, comparison: Comparison, value: impl Into<Value>) -> Self {
        Criteria::Compare {
            attribute: attribute.into(),
            comparison,
            value: value.into(),
        }
    }

    pub fn presence(attribute: impl Into<String>) -> Self {
        Criteria::Presence {
            attribute: attribute.into(),
        }
    }

    pub fn contains_all<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Criteria::ContainsAll {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(lhs: Criteria, rhs: Criteria) -> Self {
        Criteria::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Criteria, rhs: Criteria) -> Self {
        Criteria::Or(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(criteria: Criteria) -> Self {
        Criteria::Not(Box::new(criteria))
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Null => f.write_str("null"),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::And(lhs, rhs) => write!(f, "({lhs} and {rhs})"),
            Criteria::Or(lhs, rhs) => write!(f, "({lhs} or {rhs})"),
            Criteria::Not(inner) => write!(f, "not {inner}"),
            Criteria::Compare {
                attribute,
                comparison,
                value,
            } => {
                write!(f, "{attribute} {} ", comparison.keyword())?;
                write_literal(f, value)
            }
            Criteria::Presence { attribute } => write!(f, "{attribute} pr"),
            Criteria::ContainsAll { attribute, values } => {
                write!(f, "{attribute} in [")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_literal(f, value)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Resolves framework names against one object class and builds filters.
#[derive(Debug, Clone, Copy)]
pub struct FilterTranslator<'s> {
    class: &'s ObjectClass,
}

impl<'s> FilterTranslator<'s> {
    pub fn new(class: &'s ObjectClass) -> Self {
        Self { class }
    }

    /// Translate `criteria` into a filter over native column names.
    ///
    /// # Errors
    ///
    /// An attribute-not-found error when a name does not resolve, or a
    /// translation error when a special name has no binding in the class.
    pub fn translate(&self, criteria: &Criteria) -> Result<Filter, DbsError> {
        let filter = self.translate_with(criteria, false)?;
        log::trace!("translated {criteria} into {filter}");
        Ok(filter)
    }

    /// Parse and translate in one step.
    pub fn translate_text(&self, text: &str) -> Result<Filter, DbsError> {
        self.translate(&parse(text)?)
    }

    fn translate_with(&self, criteria: &Criteria, negate: bool) -> Result<Filter, DbsError> {
        match criteria {
            Criteria::And(lhs, rhs) | Criteria::Or(lhs, rhs) => {
                let lhs = self.translate_with(lhs, negate)?;
                let rhs = self.translate_with(rhs, negate)?;
                // NOT (a AND b) == NOT a OR NOT b, and the other way round
                let conjunction = matches!(criteria, Criteria::And(..)) != negate;
                Ok(if conjunction {
                    Filter::and(lhs, rhs)
                } else {
                    Filter::or(lhs, rhs)
                })
            }
            Criteria::Not(inner) => self.translate_with(inner, !negate),
            Criteria::Compare {
                attribute,
                comparison,
                value,
            } => {
                let column = self.resolve(attribute)?.name().to_string();
                Ok(Filter::compare(column, comparison.operator(negate), value.clone()))
            }
            Criteria::Presence { attribute } => {
                let column = self.resolve(attribute)?.name().to_string();
                Ok(if negate {
                    Filter::is_null(column)
                } else {
                    Filter::is_not_null(column)
                })
            }
            Criteria::ContainsAll { attribute, values } => {
                let column = self.resolve(attribute)?.name().to_string();
                let operator = if negate { Operator::NotIn } else { Operator::In };
                Ok(Filter::build(
                    Operand::Column(column),
                    Operand::List(values.clone()),
                    operator,
                ))
            }
        }
    }

    /// The attribute a framework name stands for.
    pub fn resolve(&self, name: &str) -> Result<&'s Attribute, DbsError> {
        let class = self.class;
        let special = |binding: Option<&'s Attribute>| {
            binding.ok_or_else(|| {
                DbsError::Translation(format!("{name} has no binding in class {}", class.name()))
            })
        };
        match name {
            UID => Ok(class.primary()),
            NAME => special(class.secondary()),
            ENABLE => special(class.status()),
            PASSWORD => special(class.password()),
            alias => class.entity().attribute(alias),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(Value),
    Open,
    Close,
    OpenList,
    CloseList,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Literal(v) => write_literal(f, v),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::OpenList => f.write_str("["),
            Token::CloseList => f.write_str("]"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn malformed(text: &str, reason: impl fmt::Display) -> DbsError {
    DbsError::Translation(format!("{reason} in `{text}`"))
}

fn tokenize(text: &str) -> Result<Vec<Token>, DbsError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '[' => Token::OpenList,
                    ']' => Token::CloseList,
                    _ => Token::Comma,
                });
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => literal.push(escaped),
                            None => break,
                        },
                        c => literal.push(c),
                    }
                }
                if !closed {
                    return Err(malformed(text, format!("unterminated string at {start}")));
                }
                tokens.push(Token::Literal(Value::String(literal)));
            }
            c if c == '-' || c.is_ascii_digit() => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || (i == start && c == '-') {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Literal(number(text, &text[start..end])?));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(text[start..end].to_string()));
            }
            other => return Err(malformed(text, format!("unexpected `{other}` at {start}"))),
        }
    }
    Ok(tokens)
}

fn number(text: &str, raw: &str) -> Result<Value, DbsError> {
    let parsed = if raw.contains('.') {
        raw.parse::<f64>().ok().map(Value::Double)
    } else {
        raw.parse::<i64>().ok().map(Value::Long)
    };
    parsed.ok_or_else(|| malformed(text, format!("`{raw}` is not a number")))
}

/// Deepest accepted nesting of parentheses and `not`
const MAX_NESTING: usize = 64;

struct Parser<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.position), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), DbsError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(malformed(self.text, format!("expected `{expected}` but found `{token}`"))),
            None => Err(malformed(self.text, format!("expected `{expected}` at end"))),
        }
    }

    fn or(&mut self) -> Result<Criteria, DbsError> {
        let mut lhs = self.and()?;
        while self.peek_keyword("or") {
            self.position += 1;
            lhs = Criteria::or(lhs, self.and()?);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Criteria, DbsError> {
        let mut lhs = self.unary()?;
        while self.peek_keyword("and") {
            self.position += 1;
            lhs = Criteria::and(lhs, self.unary()?);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Criteria, DbsError> {
        if self.depth == MAX_NESTING {
            return Err(DbsError::SearchCondition(format!(
                "filter nested deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let criteria = self.operand();
        self.depth -= 1;
        criteria
    }

    fn operand(&mut self) -> Result<Criteria, DbsError> {
        if self.peek_keyword("not") {
            self.position += 1;
            return Ok(Criteria::not(self.unary()?));
        }
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or()?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Some(Token::Word(attribute)) => self.leaf(attribute),
            Some(token) => Err(malformed(self.text, format!("unexpected `{token}`"))),
            None => Err(malformed(self.text, "unexpected end")),
        }
    }

    fn leaf(&mut self, attribute: String) -> Result<Criteria, DbsError> {
        let keyword = match self.next() {
            Some(Token::Word(w)) => w.to_ascii_lowercase(),
            Some(token) => return Err(malformed(self.text, format!("expected an operator after {attribute}, found `{token}`"))),
            None => return Err(malformed(self.text, format!("expected an operator after {attribute}"))),
        };
        let comparison = match keyword.as_str() {
            "pr" => return Ok(Criteria::presence(attribute)),
            "in" => return Ok(Criteria::contains_all(attribute, self.list()?)),
            "ne" => return Ok(Criteria::not(Criteria::compare(attribute, Comparison::Equal, self.literal()?))),
            "eq" => Comparison::Equal,
            "gt" => Comparison::GreaterThan,
            "ge" => Comparison::GreaterEqual,
            "lt" => Comparison::LessThan,
            "le" => Comparison::LessEqual,
            "co" => Comparison::Contains,
            "sw" => Comparison::StartsWith,
            "ew" => Comparison::EndsWith,
            other => return Err(malformed(self.text, format!("unknown operator `{other}`"))),
        };
        Ok(Criteria::compare(attribute, comparison, self.literal()?))
    }

    fn literal(&mut self) -> Result<Value, DbsError> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(value),
            Some(Token::Word(w)) => match w.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                "null" => Ok(Value::Null),
                _ => Err(malformed(self.text, format!("`{w}` is not a literal"))),
            },
            Some(token) => Err(malformed(self.text, format!("`{token}` is not a literal"))),
            None => Err(malformed(self.text, "missing literal at end")),
        }
    }

    fn list(&mut self) -> Result<Vec<Value>, DbsError> {
        self.expect(Token::OpenList)?;
        let mut values = Vec::new();
        if self.tokens.get(self.position) == Some(&Token::CloseList) {
            self.position += 1;
            return Ok(values);
        }
        loop {
            values.push(self.literal()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::CloseList) => return Ok(values),
                _ => return Err(malformed(self.text, "unterminated list")),
            }
        }
    }
}

/// Parse a textual filter such as `uid eq "alice" and not (name sw "al")`.
///
/// Operators are `eq ne co sw ew gt ge lt le pr` and `in [..]`, combined
/// with `and`, `or`, `not` and parentheses. Literals are double-quoted
/// strings, numbers, `true`, `false` and `null`.
pub fn parse(text: &str) -> Result<Criteria, DbsError> {
    let mut parser = Parser {
        text,
        tokens: tokenize(text)?,
        position: 0,
        depth: 0,
    };
    if parser.tokens.is_empty() {
        return Err(malformed(text, "empty filter"));
    }
    let criteria = parser.or()?;
    match parser.next() {
        None => Ok(criteria),
        Some(token) => Err(malformed(text, format!("trailing `{token}`"))),
    }
}
