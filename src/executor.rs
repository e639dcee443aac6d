//! Driver boundary and statement execution helpers.
//!
//! The crate never talks to a database directly. A driver implements
//! [`Connection`], [`PreparedStatement`] and [`ResultSet`]; the helpers in this
//! module bind [`Parameter`]s by SQL type, run the statement with timing and
//! tracing around the call, and turn result rows into alias-keyed
//! [`Record`]s.
//!
//! # Examples
//!
//! ```
//! use dbs_connector::executor::{bind, Connection};
//! use dbs_connector::parameter::Parameter;
//! use dbs_connector::test_helpers::{Bind, MockConnection};
//!
//! let connection = MockConnection::new();
//! let mut handle = connection.prepare_statement("DELETE FROM t WHERE (a = ?)").unwrap();
//! bind(handle.as_mut(), &[Parameter::text("x")]).unwrap();
//! drop(handle);
//! assert_eq!(connection.binds(0), vec![Bind::String(1, "x".to_string())]);
//! ```

use crate::entity::Attribute;
use crate::error::DbsError;
use crate::normalizer::ErrorCatalog;
use crate::parameter::{Parameter, SqlType, Value};
use crate::statement::dialect::Dialect;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Broad class of a driver failure, decided by the driver itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Statement text rejected
    Syntax,
    /// Statement deadline exceeded
    Timeout,
    /// Connection could not be established or was lost
    Connection,
    Other,
}

/// Error reported by a driver.
#[derive(Debug)]
pub struct DriverError {
    driver: String,
    kind: DriverErrorKind,
    vendor_code: Option<String>,
    sql_state: Option<String>,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    pub fn new(driver: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            kind,
            vendor_code: None,
            sql_state: None,
            message: message.into(),
            source: None,
        }
    }

    /// Vendor error number, the key of the driver's error table.
    pub fn with_vendor_code(mut self, code: impl Into<String>) -> Self {
        self.vendor_code = Some(code.into());
        self
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Driver identity (for example `oracle.jdbc` or `may_postgres`)
    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn vendor_code(&self) -> Option<&str> {
        self.vendor_code.as_deref()
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.vendor_code {
            Some(code) => write!(f, "{} error {}: {}", self.driver, code, self.message),
            None => write!(f, "{} error: {}", self.driver, self.message),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A live database connection.
pub trait Connection {
    /// Identity used to pick the vendor error table.
    fn driver(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Create a prepared statement for `sql`. Placeholders are already in the
    /// dialect's native form.
    fn prepare_statement(&self, sql: &str) -> Result<Box<dyn PreparedStatement + '_>, DriverError>;

    fn commit(&self) -> Result<(), DriverError>;

    fn rollback(&self) -> Result<(), DriverError>;
}

/// A prepared statement handle. Positions start at 1.
///
/// Only [`set_null`](PreparedStatement::set_null) and
/// [`set_object`](PreparedStatement::set_object) are required; the typed
/// setters fall back to `set_object`.
pub trait PreparedStatement {
    fn set_null(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError>;

    /// Generic bind used when no typed setter applies.
    fn set_object(&mut self, position: usize, value: &Value) -> Result<(), DriverError>;

    fn set_boolean(&mut self, position: usize, value: bool) -> Result<(), DriverError> {
        self.set_object(position, &Value::Boolean(value))
    }

    fn set_int(&mut self, position: usize, value: i32) -> Result<(), DriverError> {
        self.set_object(position, &Value::Integer(value))
    }

    fn set_long(&mut self, position: usize, value: i64) -> Result<(), DriverError> {
        self.set_object(position, &Value::Long(value))
    }

    fn set_double(&mut self, position: usize, value: f64) -> Result<(), DriverError> {
        self.set_object(position, &Value::Double(value))
    }

    fn set_float(&mut self, position: usize, value: f32) -> Result<(), DriverError> {
        self.set_object(position, &Value::Float(value))
    }

    fn set_decimal(&mut self, position: usize, value: Decimal) -> Result<(), DriverError> {
        self.set_object(position, &Value::Decimal(value))
    }

    fn set_date(&mut self, position: usize, value: NaiveDate) -> Result<(), DriverError> {
        self.set_object(position, &Value::Date(value))
    }

    fn set_time(&mut self, position: usize, value: NaiveTime) -> Result<(), DriverError> {
        self.set_object(position, &Value::Time(value))
    }

    fn set_timestamp(&mut self, position: usize, value: NaiveDateTime) -> Result<(), DriverError> {
        self.set_object(position, &Value::Timestamp(value))
    }

    fn set_string(&mut self, position: usize, value: &str) -> Result<(), DriverError> {
        self.set_object(position, &Value::String(value.to_string()))
    }

    /// `None` disables the deadline.
    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DriverError>;

    /// Register an out parameter filled by `RETURNING … INTO`.
    fn register_return(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError>;

    fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError>;

    /// Run a mutating statement and report the affected row count.
    fn execute_update(&mut self) -> Result<u64, DriverError>;

    /// Values produced by registered out parameters, if any.
    fn returned(&mut self) -> Result<Option<Box<dyn ResultSet>>, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// A forward-only cursor over materialized rows.
pub trait ResultSet {
    /// Advance to the next row; `false` once exhausted.
    fn next(&mut self) -> Result<bool, DriverError>;

    /// Value of column `label` in the current row; SQL NULL is [`Value::Null`].
    fn get(&self, label: &str) -> Result<Value, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// One result row keyed by attribute alias, in projection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `alias`, replacing an earlier value under the same alias.
    pub fn insert(&mut self, alias: impl Into<String>, value: Value) {
        let alias = alias.into();
        match self.fields.iter_mut().find(|(a, _)| *a == alias) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((alias, value)),
        }
    }

    /// `None` when the alias was not fetched; `Some(Value::Null)` for SQL NULL.
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.fields.iter().find(|(a, _)| a == alias).map(|(_, v)| v)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(a, v)| (a.as_str(), v))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (alias, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{alias}={value}")?;
        }
        f.write_str("}")
    }
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    affected: u64,
    returned: Vec<Record>,
}

impl Outcome {
    pub fn new(affected: u64, returned: Vec<Record>) -> Self {
        Self { affected, returned }
    }

    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Rows produced by a RETURNING clause.
    pub fn returned(&self) -> &[Record] {
        &self.returned
    }

    pub fn into_returned(self) -> Vec<Record> {
        self.returned
    }
}

/// Statement deadline from a configured number of seconds; 0 means none.
pub fn timeout_from_seconds(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Bind `parameters` in order, starting at position 1.
pub fn bind(statement: &mut dyn PreparedStatement, parameters: &[Parameter]) -> Result<(), DriverError> {
    for (i, parameter) in parameters.iter().enumerate() {
        bind_at(statement, i + 1, parameter)?;
    }
    Ok(())
}

/// Bind one parameter with the setter matching its SQL type.
///
/// A value that cannot be converted to the declared type goes through
/// `set_object` unchanged and the driver decides.
pub fn bind_at(
    statement: &mut dyn PreparedStatement,
    position: usize,
    parameter: &Parameter,
) -> Result<(), DriverError> {
    let value = parameter.value();
    if value.is_null() {
        return statement.set_null(position, parameter.sql_type());
    }

    match parameter.sql_type() {
        SqlType::Boolean => match value.to_bool() {
            Some(b) => statement.set_boolean(position, b),
            None => statement.set_object(position, value),
        },
        SqlType::Integer => match value.to_i32() {
            Some(i) => statement.set_int(position, i),
            None => statement.set_object(position, value),
        },
        SqlType::Numeric => match value.to_i64() {
            Some(i) => statement.set_long(position, i),
            None => statement.set_object(position, value),
        },
        SqlType::Double => match value.to_f64() {
            Some(v) => statement.set_double(position, v),
            None => statement.set_object(position, value),
        },
        SqlType::Float => match value.to_f32() {
            Some(v) => statement.set_float(position, v),
            None => statement.set_object(position, value),
        },
        SqlType::Decimal => match value.to_decimal() {
            Some(d) => statement.set_decimal(position, d),
            None => statement.set_object(position, value),
        },
        SqlType::Date => match value.to_date() {
            Some(d) => statement.set_date(position, d),
            None => statement.set_object(position, value),
        },
        SqlType::Time => match value.to_time() {
            Some(t) => statement.set_time(position, t),
            None => statement.set_object(position, value),
        },
        SqlType::Timestamp => match value.to_timestamp() {
            Some(ts) => statement.set_timestamp(position, ts),
            None => statement.set_object(position, value),
        },
        SqlType::Varchar | SqlType::Char => match value {
            Value::String(s) => statement.set_string(position, s),
            other => statement.set_string(position, &other.to_string()),
        },
        SqlType::Binary | SqlType::Other => statement.set_object(position, value),
    }
}

/// Bind, apply the deadline and run a query, with timing around the call.
pub(crate) fn run_query(
    statement: &mut dyn PreparedStatement,
    sql: &str,
    parameters: &[Parameter],
    timeout: Option<Duration>,
) -> Result<Box<dyn ResultSet>, DriverError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_statement_span(sql).entered();

    bind(statement, parameters)?;
    statement.set_query_timeout(timeout)?;
    log::debug!("query [{sql}] with {} parameters", parameters.len());

    let start = Instant::now();
    let result = statement.execute_query();
    observe(start, result.is_err());
    result
}

/// Bind, apply the deadline and run a mutating statement.
pub(crate) fn run_update(
    statement: &mut dyn PreparedStatement,
    sql: &str,
    parameters: &[Parameter],
    timeout: Option<Duration>,
) -> Result<u64, DriverError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_statement_span(sql).entered();

    bind(statement, parameters)?;
    statement.set_query_timeout(timeout)?;
    log::debug!("update [{sql}] with {} parameters", parameters.len());

    let start = Instant::now();
    let result = statement.execute_update();
    observe(start, result.is_err());
    result
}

#[allow(unused_variables)]
fn observe(start: Instant, failed: bool) {
    let elapsed = start.elapsed();
    #[cfg(feature = "metrics")]
    {
        METRICS.record_statement(elapsed);
        if failed {
            METRICS.record_statement_error();
        }
    }
}

/// Drain `rows` into records holding every attribute in `returning`.
///
/// The cursor is closed on every exit path; a close failure after a
/// successful read is reported, one after a failed read is only logged.
pub fn read_records(
    mut rows: Box<dyn ResultSet>,
    returning: &[Attribute],
) -> Result<Vec<Record>, DriverError> {
    let result = (|| {
        let mut records = Vec::new();
        while rows.next()? {
            let mut record = Record::new();
            for attribute in returning {
                record.insert(attribute.alias(), rows.get(attribute.alias())?);
            }
            records.push(record);
        }
        Ok(records)
    })();

    match (result, rows.close()) {
        (Ok(records), Ok(())) => Ok(records),
        (Ok(_), Err(close)) => Err(close),
        (Err(err), close) => {
            if let Err(close) = close {
                log::warn!("failed to close result set: {close}");
            }
            Err(err)
        }
    }
}

/// First-row value of `label`, or `None` for an empty result.
pub fn read_scalar(mut rows: Box<dyn ResultSet>, label: &str) -> Result<Option<Value>, DriverError> {
    let result = (|| {
        if rows.next()? {
            rows.get(label).map(Some)
        } else {
            Ok(None)
        }
    })();

    if let Err(close) = rows.close() {
        log::warn!("failed to close result set: {close}");
    }
    result
}

/// Classify an execution failure of `statement`.
///
/// Syntax and timeout failures keep their own kinds; everything else goes
/// through the vendor error table with the statement text as context.
pub fn translate(err: DriverError, statement: &str, catalog: &ErrorCatalog) -> DbsError {
    match err.kind() {
        DriverErrorKind::Syntax => DbsError::Syntax {
            statement: statement.to_string(),
            source: err,
        },
        DriverErrorKind::Timeout => DbsError::Timeout {
            statement: statement.to_string(),
            source: err,
        },
        DriverErrorKind::Connection | DriverErrorKind::Other => {
            catalog.normalize(err, &[statement.to_string()])
        }
    }
}
