//! SQL text rendering.
//!
//! Pure functions of entity, filter and attribute selection. Each `prepare_*`
//! function returns the statement text and appends the bind parameters to
//! `parameter` in exactly the order their placeholders appear in the text:
//! left to right, depth first.

use crate::entity::{Attribute, Entity};
use crate::error::DbsError;
use crate::filter::{Filter, Operand, Operator, Sort, SubSelect};
use crate::parameter::{Parameter, SqlType, Value};
use crate::statement::dialect::{Dialect, ReturningStyle};
use std::fmt;

const WILDCARD: char = '*';

/// A column written by INSERT or UPDATE together with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    column: String,
    parameter: Parameter,
    hidden: bool,
}

impl Binding {
    /// Bind `value` to `attribute`, using the attribute's SQL type.
    pub fn new(attribute: &Attribute, value: Value) -> Self {
        let parameter = if value.is_null() {
            Parameter::null(attribute.sql_type())
        } else {
            Parameter::new(value, attribute.sql_type())
        };
        Self {
            column: attribute.name().to_string(),
            parameter,
            hidden: attribute.is_hidden(),
        }
    }

    /// Bind a raw column name; the SQL type follows the value.
    pub fn column(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            parameter: Parameter::from_value(value),
            hidden: false,
        }
    }

    pub fn column_name(&self) -> &str {
        &self.column
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hidden {
            write!(f, "{}=********", self.column)
        } else {
            write!(f, "{}={}", self.column, self.parameter.value())
        }
    }
}

/// `SELECT <returning>,<row number> FROM <entity> [WHERE …] [ORDER BY …]`
pub fn prepare_select(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    sort: Option<&Sort>,
    returning: &[&Attribute],
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let order = sort.filter(|s| !s.is_empty()).map(prepare_order);

    let mut builder = String::from("SELECT ");
    for (i, attribute) in returning.iter().enumerate() {
        if i > 0 {
            builder.push(',');
        }
        builder.push_str(&format!("{} AS {}", attribute.name(), attribute.alias()));
    }
    if !returning.is_empty() {
        builder.push(',');
    }
    builder.push_str(&dialect.row_number(order.as_deref()));
    builder.push_str(" FROM ");
    builder.push_str(entity.id());
    if let Some(filter) = filter {
        builder.push_str(" WHERE ");
        builder.push_str(&prepare_filter(dialect, filter, parameter)?);
    }
    if let Some(order) = order {
        builder.push_str(" ORDER BY ");
        builder.push_str(&order);
    }
    Ok(builder)
}

/// SELECT over several entities, combining the join condition and the filter
/// with AND.
pub fn prepare_join(
    dialect: Dialect,
    sources: &[(&Entity, &[&Attribute])],
    join: Option<&Filter>,
    filter: Option<&Filter>,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    if sources.is_empty() {
        return Err(DbsError::invalid_argument("join requires at least one entity"));
    }

    let mut builder = String::from("SELECT ");
    let mut projected = 0usize;
    for (_, returning) in sources {
        for attribute in returning.iter() {
            if projected > 0 {
                builder.push(',');
            }
            builder.push_str(&format!("{} AS {}", attribute.name(), attribute.alias()));
            projected += 1;
        }
    }
    if projected > 0 {
        builder.push(',');
    }
    builder.push_str(&dialect.row_number(None));
    builder.push_str(" FROM ");
    let tables: Vec<&str> = sources.iter().map(|(entity, _)| entity.id()).collect();
    builder.push_str(&tables.join(","));

    let criteria = match (join, filter) {
        (Some(join), Some(filter)) => Some(Filter::and(join.clone(), filter.clone())),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    };
    if let Some(criteria) = criteria {
        builder.push_str(" WHERE ");
        builder.push_str(&prepare_filter(dialect, &criteria, parameter)?);
    }
    Ok(builder)
}

/// Wrap a projection-less SELECT in an EXISTS check.
pub fn prepare_exists(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let select = prepare_select(dialect, entity, filter, None, &[], parameter)?;
    Ok(dialect.exists(&select))
}

/// `SELECT COUNT(<key>) AS rs FROM <entity> [WHERE …]`
pub fn prepare_count(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let mut builder = format!("SELECT COUNT({}) AS rs FROM {}", entity.primary().name(), entity.id());
    if let Some(filter) = filter {
        builder.push_str(" WHERE ");
        builder.push_str(&prepare_filter(dialect, filter, parameter)?);
    }
    Ok(builder)
}

/// Paginated SELECT. The two row-range parameters are not appended here;
/// they are supplied when the page is fetched and bind after the filter's.
pub fn prepare_search(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    sort: Option<&Sort>,
    returning: &[&Attribute],
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let select = prepare_select(dialect, entity, filter, sort, returning, parameter)?;
    Ok(dialect.paginate(&select))
}

/// `INSERT INTO <entity> (<columns>) VALUES (<placeholders>) [RETURNING …]`
pub fn prepare_insert(
    dialect: Dialect,
    entity: &Entity,
    binding: &[Binding],
    returning: &[&Attribute],
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    if binding.is_empty() {
        return Err(DbsError::invalid_argument(format!(
            "insert into {} binds no attributes",
            entity.id()
        )));
    }

    let columns: Vec<&str> = binding.iter().map(|b| b.column.as_str()).collect();
    let placeholders = vec!["?"; binding.len()].join(",");
    let mut builder = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity.id(),
        columns.join(","),
        placeholders
    );
    parameter.extend(binding.iter().map(|b| b.parameter.clone()));
    if !returning.is_empty() {
        builder.push_str(&prepare_returning(dialect, returning));
    }
    Ok(builder)
}

/// `UPDATE <entity> SET a=?,b=? [WHERE …] [RETURNING …]`
///
/// Binding parameters precede the filter's parameters.
pub fn prepare_update(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    binding: &[Binding],
    returning: &[&Attribute],
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    if binding.is_empty() {
        return Err(DbsError::invalid_argument(format!(
            "update of {} binds no attributes",
            entity.id()
        )));
    }

    let mut builder = format!("UPDATE {} SET ", entity.id());
    for (i, b) in binding.iter().enumerate() {
        if i > 0 {
            builder.push(',');
        }
        builder.push_str(&b.column);
        builder.push_str("=?");
    }
    parameter.extend(binding.iter().map(|b| b.parameter.clone()));
    if let Some(filter) = filter {
        builder.push_str(" WHERE ");
        builder.push_str(&prepare_filter(dialect, filter, parameter)?);
    }
    if !returning.is_empty() {
        builder.push_str(&prepare_returning(dialect, returning));
    }
    Ok(builder)
}

/// `DELETE FROM <entity> [WHERE …]`
pub fn prepare_delete(
    dialect: Dialect,
    entity: &Entity,
    filter: Option<&Filter>,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let mut builder = format!("DELETE FROM {}", entity.id());
    if let Some(filter) = filter {
        builder.push_str(" WHERE ");
        builder.push_str(&prepare_filter(dialect, filter, parameter)?);
    }
    Ok(builder)
}

pub fn prepare_order(sort: &Sort) -> String {
    let keys: Vec<String> = sort
        .keys()
        .iter()
        .map(|(column, direction)| match direction {
            Some(direction) => format!("{column} {}", direction.token()),
            None => column.clone(),
        })
        .collect();
    keys.join(", ")
}

pub fn prepare_returning(dialect: Dialect, returning: &[&Attribute]) -> String {
    // Returned rows are read back by alias; out parameters by position
    let columns: Vec<String> = returning
        .iter()
        .map(|a| match dialect.returning_style() {
            ReturningStyle::ResultRows if a.name() != a.alias() => {
                format!("{} AS {}", a.name(), a.alias())
            }
            _ => a.name().to_string(),
        })
        .collect();
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    dialect.returning(&columns)
}

/// Render a filter tree as a parenthesized WHERE expression.
///
/// # Errors
///
/// Returns a search-condition error when an operand kind does not fit its
/// operator: AND/OR over non-filters, IN over anything but a string, entity,
/// sub-select or non-empty list, a null compared with anything but
/// `=`/`!=`, or a list/sub-select outside IN.
pub fn prepare_filter(
    dialect: Dialect,
    criteria: &Filter,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let op = criteria.operator();
    let failed = || DbsError::SearchCondition(criteria.to_string());

    if op.is_logical() && !(criteria.first().is_filter() && criteria.second().is_filter()) {
        return Err(failed());
    }
    if op.is_membership() {
        let acceptable = match criteria.second() {
            Operand::Value(Value::String(_)) | Operand::Entity(_) | Operand::Select(_) => true,
            Operand::List(values) => !values.is_empty(),
            _ => false,
        };
        if !acceptable {
            return Err(failed());
        }
    }

    let first = match criteria.first() {
        Operand::Filter(nested) => prepare_filter(dialect, nested, parameter)?,
        Operand::Entity(entity) => entity.primary().name().to_string(),
        Operand::Column(name) => name.clone(),
        Operand::Value(value) => value.to_string(),
        Operand::List(_) | Operand::Select(_) => return Err(failed()),
    };

    let second = match criteria.second() {
        Operand::Value(Value::Null) => {
            return match op {
                Operator::NotEqual => Ok(format!("({first} IS NOT NULL)")),
                Operator::Equal => Ok(format!("({first} IS NULL)")),
                _ => Err(failed()),
            };
        }
        Operand::Filter(nested) => prepare_filter(dialect, nested, parameter)?,
        Operand::Column(name) => name.clone(),
        Operand::Entity(entity) => {
            if op.is_membership() {
                sub_query(entity.primary().name(), entity.id(), None)
            } else {
                entity.primary().name().to_string()
            }
        }
        Operand::Select(select) => {
            if !op.is_membership() {
                return Err(failed());
            }
            render_sub_select(dialect, select, parameter)?
        }
        Operand::List(values) => {
            if !op.is_membership() {
                return Err(failed());
            }
            let mut placeholders = Vec::with_capacity(values.len());
            for value in values {
                placeholders.push("?");
                parameter.push(list_element(dialect, value));
            }
            format!("({})", placeholders.join(","))
        }
        Operand::Value(value) if op.is_membership() => {
            parameter.push(list_element(dialect, value));
            "(?)".to_string()
        }
        Operand::Value(value) => {
            parameter.push(scalar(dialect, op, value));
            "?".to_string()
        }
    };

    Ok(format!("({first} {} {second})", op.token()))
}

fn render_sub_select(
    dialect: Dialect,
    select: &SubSelect,
    parameter: &mut Vec<Parameter>,
) -> Result<String, DbsError> {
    let condition = match &select.filter {
        Some(filter) => Some(prepare_filter(dialect, filter, parameter)?),
        None => None,
    };
    Ok(sub_query(
        select.entity.primary().name(),
        select.entity.id(),
        condition.as_deref(),
    ))
}

fn sub_query(column: &str, source: &str, condition: Option<&str>) -> String {
    match condition {
        Some(condition) => format!("(SELECT {column} FROM {source} WHERE {condition})"),
        None => format!("(SELECT {column} FROM {source})"),
    }
}

/// Membership elements bind as text where the server converts them to the
/// column type (Oracle) and keep their own type where it does not.
fn list_element(dialect: Dialect, value: &Value) -> Parameter {
    match value {
        Value::Null => Parameter::null(SqlType::Varchar),
        Value::Boolean(b) if dialect.boolean_as_char() => {
            Parameter::text(if *b { "1" } else { "0" })
        }
        other if dialect.boolean_as_char() => Parameter::text(other.to_string()),
        other => Parameter::from_value(other.clone()),
    }
}

/// Parameter for a scalar right operand.
fn scalar(dialect: Dialect, op: Operator, value: &Value) -> Parameter {
    match value {
        Value::Date(_) | Value::Timestamp(_) => match value.to_timestamp() {
            Some(ts) => Parameter::new(Value::Timestamp(ts), SqlType::Timestamp),
            None => Parameter::from_value(value.clone()),
        },
        Value::Time(t) => Parameter::new(Value::Time(*t), SqlType::Time),
        Value::Boolean(b) if dialect.boolean_as_char() => {
            Parameter::text(if *b { "1" } else { "0" })
        }
        other => match like_pattern(op, &other.to_string()) {
            Some(pattern) => Parameter::text(pattern),
            None => Parameter::from_value(other.clone()),
        },
    }
}

/// LIKE pattern for `raw` under `op`, with `*` markers stripped first.
///
/// Returns `None` for operators outside the LIKE family; their literal is
/// bound unchanged.
pub fn like_pattern(op: Operator, raw: &str) -> Option<String> {
    let core: String = raw.chars().filter(|c| *c != WILDCARD).collect();
    match op {
        Operator::Contains | Operator::NotContains => Some(format!("%{core}%")),
        Operator::StartsWith | Operator::NotStartsWith => Some(format!("{core}%")),
        Operator::EndsWith | Operator::NotEndsWith => Some(format!("%{core}")),
        _ => None,
    }
}
