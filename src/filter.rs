//! Search predicates as immutable binary expression trees.
//!
//! A [`Filter`] is `(first, operator, second)`. Leaves compare a column with
//! a value; AND/OR nodes combine two nested filters. Every operator carries
//! its own polarity, so there is no NOT node: negation is resolved when the
//! tree is built (see [`Operator::negate`]).

use crate::entity::Entity;
use crate::parameter::Value;
use std::fmt;
use std::sync::Arc;

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    In,
    NotIn,
    /// Rendered exactly like [`Operator::In`].
    Hierarchy,
}

impl Operator {
    /// SQL token placed between the operands.
    pub fn token(&self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessEqual => "<=",
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => "LIKE",
            Operator::NotContains | Operator::NotStartsWith | Operator::NotEndsWith => "NOT LIKE",
            Operator::In | Operator::Hierarchy => "IN",
            Operator::NotIn => "NOT IN",
        }
    }

    /// The converse operator, i.e. `NOT (a op b)` == `a op.negate() b`.
    ///
    /// AND and OR have no converse at leaf level; De Morgan is applied by the
    /// translator before leaves are negated, so they map to each other here.
    pub fn negate(&self) -> Operator {
        match self {
            Operator::And => Operator::Or,
            Operator::Or => Operator::And,
            Operator::Equal => Operator::NotEqual,
            Operator::NotEqual => Operator::Equal,
            Operator::GreaterThan => Operator::LessEqual,
            Operator::LessEqual => Operator::GreaterThan,
            Operator::GreaterEqual => Operator::LessThan,
            Operator::LessThan => Operator::GreaterEqual,
            Operator::Contains => Operator::NotContains,
            Operator::NotContains => Operator::Contains,
            Operator::StartsWith => Operator::NotStartsWith,
            Operator::NotStartsWith => Operator::StartsWith,
            Operator::EndsWith => Operator::NotEndsWith,
            Operator::NotEndsWith => Operator::EndsWith,
            Operator::In | Operator::Hierarchy => Operator::NotIn,
            Operator::NotIn => Operator::In,
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    pub fn is_like(&self) -> bool {
        matches!(
            self,
            Operator::Contains
                | Operator::NotContains
                | Operator::StartsWith
                | Operator::NotStartsWith
                | Operator::EndsWith
                | Operator::NotEndsWith
        )
    }

    /// IN, NOT IN and HIERARCHY.
    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn | Operator::Hierarchy)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Equal => "EQUAL",
            Operator::NotEqual => "NOT_EQUAL",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::GreaterEqual => "GREATER_EQUAL",
            Operator::LessThan => "LESS_THAN",
            Operator::LessEqual => "LESS_EQUAL",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT_CONTAINS",
            Operator::StartsWith => "STARTS_WITH",
            Operator::NotStartsWith => "NOT_STARTS_WITH",
            Operator::EndsWith => "ENDS_WITH",
            Operator::NotEndsWith => "NOT_ENDS_WITH",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::Hierarchy => "HIERARCHY",
        };
        f.write_str(name)
    }
}

/// A sub-query used as the right side of IN / NOT IN.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSelect {
    pub entity: Arc<Entity>,
    pub filter: Option<Filter>,
}

impl SubSelect {
    pub fn new(entity: Arc<Entity>, filter: Option<Filter>) -> Self {
        Self { entity, filter }
    }
}

/// One side of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Trusted identifier rendered verbatim, never bound
    Column(String),
    /// Literal scalar; [`Value::Null`] is the null operand
    Value(Value),
    /// Literal collection for IN / NOT IN
    List(Vec<Value>),
    Filter(Box<Filter>),
    Entity(Arc<Entity>),
    Select(Box<SubSelect>),
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Operand::Column(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Operand::Value(value.into())
    }

    pub fn null() -> Self {
        Operand::Value(Value::Null)
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Operand::List(values.into_iter().map(Into::into).collect())
    }

    pub fn is_filter(&self) -> bool {
        matches!(self, Operand::Filter(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Operand::Value(Value::Null))
    }
}

impl From<Filter> for Operand {
    fn from(filter: Filter) -> Self {
        Operand::Filter(Box::new(filter))
    }
}

impl From<Arc<Entity>> for Operand {
    fn from(entity: Arc<Entity>) -> Self {
        Operand::Entity(entity)
    }
}

impl From<SubSelect> for Operand {
    fn from(select: SubSelect) -> Self {
        Operand::Select(Box::new(select))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(name) => f.write_str(name),
            Operand::Value(Value::Null) => f.write_str("null"),
            Operand::Value(Value::String(s)) => write!(f, "\"{s}\""),
            Operand::Value(value) => write!(f, "{value}"),
            Operand::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Operand::Filter(filter) => write!(f, "{filter}"),
            Operand::Entity(entity) => write!(f, "{}", entity.id()),
            Operand::Select(select) => match &select.filter {
                Some(filter) => write!(f, "select({} where {filter})", select.entity.id()),
                None => write!(f, "select({})", select.entity.id()),
            },
        }
    }
}

/// An immutable predicate node.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    first: Operand,
    second: Operand,
    operator: Operator,
}

impl Filter {
    /// Build a node without validating operand kinds; validation happens at
    /// render time so hand-built trees fail with a search-condition error.
    pub fn build(first: impl Into<Operand>, second: impl Into<Operand>, operator: Operator) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            operator,
        }
    }

    /// Leaf comparing `column` with a literal.
    pub fn compare(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::build(Operand::Column(column.into()), Operand::Value(value.into()), operator)
    }

    pub fn equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Equal, value)
    }

    pub fn not_equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::NotEqual, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::compare(column, Operator::Equal, Value::Null)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::compare(column, Operator::NotEqual, Value::Null)
    }

    pub fn contains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Contains, value)
    }

    pub fn starts_with(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::StartsWith, value)
    }

    pub fn ends_with(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::EndsWith, value)
    }

    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::build(Operand::Column(column.into()), Operand::list(values), Operator::In)
    }

    pub fn not_in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::build(Operand::Column(column.into()), Operand::list(values), Operator::NotIn)
    }

    pub fn and(lhs: Filter, rhs: Filter) -> Self {
        Self::build(lhs, rhs, Operator::And)
    }

    pub fn or(lhs: Filter, rhs: Filter) -> Self {
        Self::build(lhs, rhs, Operator::Or)
    }

    /// Fold filters into a left-deep AND chain; `None` when empty.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Option<Filter> {
        filters.into_iter().reduce(Filter::and)
    }

    /// Fold filters into a left-deep OR chain; `None` when empty.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Option<Filter> {
        filters.into_iter().reduce(Filter::or)
    }

    pub fn first(&self) -> &Operand {
        &self.first
    }

    pub fn second(&self) -> &Operand {
        &self.second
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.first, self.operator, self.second)
    }
}

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn token(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    keys: Vec<(String, Option<Direction>)>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(column: impl Into<String>, direction: Direction) -> Self {
        Self::new().then(column, direction)
    }

    pub fn then(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.keys.push((column.into(), Some(direction)));
        self
    }

    /// Key without an explicit direction (database default).
    pub fn then_default(mut self, column: impl Into<String>) -> Self {
        self.keys.push((column.into(), None));
        self
    }

    pub fn keys(&self) -> &[(String, Option<Direction>)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF_OPERATORS: [Operator; 14] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterThan,
        Operator::GreaterEqual,
        Operator::LessThan,
        Operator::LessEqual,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::NotStartsWith,
        Operator::EndsWith,
        Operator::NotEndsWith,
        Operator::In,
        Operator::NotIn,
    ];

    #[test]
    fn test_negate_is_an_involution_for_leaves() {
        for op in LEAF_OPERATORS {
            assert_eq!(op.negate().negate(), op, "{op}");
        }
    }

    #[test]
    fn test_negate_table() {
        assert_eq!(Operator::Equal.negate(), Operator::NotEqual);
        assert_eq!(Operator::LessThan.negate(), Operator::GreaterEqual);
        assert_eq!(Operator::GreaterThan.negate(), Operator::LessEqual);
        assert_eq!(Operator::Contains.negate(), Operator::NotContains);
        assert_eq!(Operator::StartsWith.negate(), Operator::NotStartsWith);
        assert_eq!(Operator::Hierarchy.negate(), Operator::NotIn);
    }

    #[test]
    fn test_tokens() {
        assert_eq!(Operator::NotEqual.token(), "!=");
        assert_eq!(Operator::EndsWith.token(), "LIKE");
        assert_eq!(Operator::NotStartsWith.token(), "NOT LIKE");
        assert_eq!(Operator::Hierarchy.token(), Operator::In.token());
        assert_eq!(Operator::NotIn.token(), "NOT IN");
    }

    #[test]
    fn test_all_folds_left_deep() {
        let f = Filter::all(vec![
            Filter::equal("a", 1),
            Filter::equal("b", 2),
            Filter::equal("c", 3),
        ])
        .unwrap();
        assert_eq!(f.operator(), Operator::And);
        assert!(f.first().is_filter());
        assert_eq!(f.to_string(), "(((a EQUAL 1) AND (b EQUAL 2)) AND (c EQUAL 3))");
        assert!(Filter::any(Vec::new()).is_none());
    }

    #[test]
    fn test_display_quotes_strings() {
        let f = Filter::equal("uid", "alice");
        assert_eq!(f.to_string(), "(uid EQUAL \"alice\")");
        assert_eq!(Filter::is_null("mail").to_string(), "(mail EQUAL null)");
    }
}
