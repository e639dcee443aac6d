//! In-memory scripted driver for tests.
//!
//! [`MockConnection`] records every prepared statement (SQL text, typed
//! binds, timeout, registered returns, close) and answers executions from a
//! queue of scripted [`Response`]s. With an empty queue a query yields no rows
//! and an update affects none.
//!
//! ```
//! use dbs_connector::executor::Connection;
//! use dbs_connector::parameter::Value;
//! use dbs_connector::test_helpers::{MockConnection, Response};
//!
//! let connection = MockConnection::new();
//! connection.respond(Response::rows(vec![vec![("uid", Value::from("alice"))]]));
//! let mut handle = connection.prepare_statement("SELECT uid AS uid FROM t").unwrap();
//! let mut rows = handle.execute_query().unwrap();
//! assert!(rows.next().unwrap());
//! assert_eq!(rows.get("uid").unwrap(), Value::from("alice"));
//! ```

use crate::executor::{Connection, DriverError, DriverErrorKind, PreparedStatement, ResultSet};
use crate::parameter::{SqlType, Value};
use crate::statement::dialect::Dialect;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

type Row = Vec<(String, Value)>;

/// One recorded bind call: setter, position and value.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Null(usize, SqlType),
    Object(usize, Value),
    Boolean(usize, bool),
    Int(usize, i32),
    Long(usize, i64),
    Double(usize, f64),
    Float(usize, f32),
    Decimal(usize, Decimal),
    Date(usize, NaiveDate),
    Time(usize, NaiveTime),
    Timestamp(usize, NaiveDateTime),
    String(usize, String),
}

/// Scripted answer to the next execution.
#[derive(Debug, Clone)]
pub enum Response {
    /// Result rows for a query
    Rows(Vec<Row>),
    /// Affected row count for an update
    Affected(u64),
    /// Affected row count plus the values of registered out parameters
    Returning(u64, Vec<Row>),
    /// Driver failure
    Fail {
        kind: DriverErrorKind,
        vendor_code: Option<String>,
        message: String,
    },
}

impl Response {
    pub fn rows<K: Into<String>>(rows: Vec<Vec<(K, Value)>>) -> Self {
        Response::Rows(into_rows(rows))
    }

    pub fn returning<K: Into<String>>(affected: u64, rows: Vec<Vec<(K, Value)>>) -> Self {
        Response::Returning(affected, into_rows(rows))
    }

    pub fn fail(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Response::Fail {
            kind,
            vendor_code: None,
            message: message.into(),
        }
    }

    /// Failure carrying a vendor error code.
    pub fn vendor(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Fail {
            kind: DriverErrorKind::Other,
            vendor_code: Some(code.into()),
            message: message.into(),
        }
    }
}

fn into_rows<K: Into<String>>(rows: Vec<Vec<(K, Value)>>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| row.into_iter().map(|(k, v)| (k.into(), v)).collect())
        .collect()
}

/// What happened to one prepared statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedLog {
    pub sql: String,
    pub binds: Vec<Bind>,
    /// `None` until the timeout was set
    pub timeout: Option<Option<Duration>>,
    pub returns: Vec<(usize, SqlType)>,
    pub executions: usize,
    pub closed: bool,
}

/// Scripted in-memory [`Connection`].
#[derive(Debug)]
pub struct MockConnection {
    driver: String,
    dialect: Dialect,
    responses: RefCell<VecDeque<Response>>,
    prepare_failure: RefCell<Option<Response>>,
    statements: RefCell<Vec<PreparedLog>>,
    result_sets_closed: Rc<Cell<usize>>,
    commits: Cell<usize>,
    rollbacks: Cell<usize>,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// A connection speaking the canonical dialect as driver `oracle.jdbc`.
    pub fn new() -> Self {
        Self {
            driver: "oracle.jdbc".to_string(),
            dialect: Dialect::Oracle,
            responses: RefCell::new(VecDeque::new()),
            prepare_failure: RefCell::new(None),
            statements: RefCell::new(Vec::new()),
            result_sets_closed: Rc::new(Cell::new(0)),
            commits: Cell::new(0),
            rollbacks: Cell::new(0),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Queue the answer for the next execution.
    pub fn respond(&self, response: Response) -> &Self {
        self.responses.borrow_mut().push_back(response);
        self
    }

    /// Make the next `prepare_statement` fail with `response` (a `Fail`).
    pub fn fail_next_prepare(&self, response: Response) {
        *self.prepare_failure.borrow_mut() = Some(response);
    }

    pub fn statements(&self) -> Vec<PreparedLog> {
        self.statements.borrow().clone()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.borrow().len()
    }

    /// SQL text of the `index`th prepared statement.
    pub fn sql(&self, index: usize) -> String {
        self.statements.borrow()[index].sql.clone()
    }

    pub fn binds(&self, index: usize) -> Vec<Bind> {
        self.statements.borrow()[index].binds.clone()
    }

    pub fn closed(&self, index: usize) -> bool {
        self.statements.borrow()[index].closed
    }

    pub fn result_sets_closed(&self) -> usize {
        self.result_sets_closed.get()
    }

    pub fn commits(&self) -> usize {
        self.commits.get()
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.get()
    }

    fn next_response(&self) -> Option<Response> {
        self.responses.borrow_mut().pop_front()
    }

    fn error(&self, kind: DriverErrorKind, vendor_code: Option<String>, message: String) -> DriverError {
        let err = DriverError::new(self.driver.clone(), kind, message);
        match vendor_code {
            Some(code) => err.with_vendor_code(code),
            None => err,
        }
    }
}

impl Connection for MockConnection {
    fn driver(&self) -> &str {
        &self.driver
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn prepare_statement(&self, sql: &str) -> Result<Box<dyn PreparedStatement + '_>, DriverError> {
        if let Some(Response::Fail {
            kind,
            vendor_code,
            message,
        }) = self.prepare_failure.borrow_mut().take()
        {
            return Err(self.error(kind, vendor_code, message));
        }

        let mut statements = self.statements.borrow_mut();
        statements.push(PreparedLog {
            sql: sql.to_string(),
            ..PreparedLog::default()
        });
        Ok(Box::new(MockStatement {
            connection: self,
            index: statements.len() - 1,
            pending: None,
        }))
    }

    fn commit(&self) -> Result<(), DriverError> {
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }

    fn rollback(&self) -> Result<(), DriverError> {
        self.rollbacks.set(self.rollbacks.get() + 1);
        Ok(())
    }
}

struct MockStatement<'a> {
    connection: &'a MockConnection,
    index: usize,
    pending: Option<Vec<Row>>,
}

impl MockStatement<'_> {
    fn record(&mut self, bind: Bind) -> Result<(), DriverError> {
        self.connection.statements.borrow_mut()[self.index].binds.push(bind);
        Ok(())
    }

    fn executed(&self) {
        self.connection.statements.borrow_mut()[self.index].executions += 1;
    }

    fn rows(&self, rows: Vec<Row>) -> Box<dyn ResultSet> {
        Box::new(MockRows {
            rows: rows.into(),
            current: None,
            closed: Some(Rc::clone(&self.connection.result_sets_closed)),
        })
    }
}

impl PreparedStatement for MockStatement<'_> {
    fn set_null(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError> {
        self.record(Bind::Null(position, sql_type))
    }

    fn set_object(&mut self, position: usize, value: &Value) -> Result<(), DriverError> {
        self.record(Bind::Object(position, value.clone()))
    }

    fn set_boolean(&mut self, position: usize, value: bool) -> Result<(), DriverError> {
        self.record(Bind::Boolean(position, value))
    }

    fn set_int(&mut self, position: usize, value: i32) -> Result<(), DriverError> {
        self.record(Bind::Int(position, value))
    }

    fn set_long(&mut self, position: usize, value: i64) -> Result<(), DriverError> {
        self.record(Bind::Long(position, value))
    }

    fn set_double(&mut self, position: usize, value: f64) -> Result<(), DriverError> {
        self.record(Bind::Double(position, value))
    }

    fn set_float(&mut self, position: usize, value: f32) -> Result<(), DriverError> {
        self.record(Bind::Float(position, value))
    }

    fn set_decimal(&mut self, position: usize, value: Decimal) -> Result<(), DriverError> {
        self.record(Bind::Decimal(position, value))
    }

    fn set_date(&mut self, position: usize, value: NaiveDate) -> Result<(), DriverError> {
        self.record(Bind::Date(position, value))
    }

    fn set_time(&mut self, position: usize, value: NaiveTime) -> Result<(), DriverError> {
        self.record(Bind::Time(position, value))
    }

    fn set_timestamp(&mut self, position: usize, value: NaiveDateTime) -> Result<(), DriverError> {
        self.record(Bind::Timestamp(position, value))
    }

    fn set_string(&mut self, position: usize, value: &str) -> Result<(), DriverError> {
        self.record(Bind::String(position, value.to_string()))
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DriverError> {
        self.connection.statements.borrow_mut()[self.index].timeout = Some(timeout);
        Ok(())
    }

    fn register_return(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError> {
        self.connection.statements.borrow_mut()[self.index]
            .returns
            .push((position, sql_type));
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError> {
        self.executed();
        match self.connection.next_response() {
            Some(Response::Rows(rows)) | Some(Response::Returning(_, rows)) => Ok(self.rows(rows)),
            Some(Response::Affected(_)) | None => Ok(self.rows(Vec::new())),
            Some(Response::Fail {
                kind,
                vendor_code,
                message,
            }) => Err(self.connection.error(kind, vendor_code, message)),
        }
    }

    fn execute_update(&mut self) -> Result<u64, DriverError> {
        self.executed();
        match self.connection.next_response() {
            Some(Response::Affected(n)) => Ok(n),
            Some(Response::Returning(n, rows)) => {
                self.pending = Some(rows);
                Ok(n)
            }
            Some(Response::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
            Some(Response::Fail {
                kind,
                vendor_code,
                message,
            }) => Err(self.connection.error(kind, vendor_code, message)),
        }
    }

    fn returned(&mut self) -> Result<Option<Box<dyn ResultSet>>, DriverError> {
        Ok(self.pending.take().map(|rows| self.rows(rows)))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.connection.statements.borrow_mut()[self.index].closed = true;
        Ok(())
    }
}

/// Materialized rows with case-insensitive column lookup.
pub struct MockRows {
    rows: VecDeque<Row>,
    current: Option<Row>,
    closed: Option<Rc<Cell<usize>>>,
}

impl MockRows {
    pub fn new<K: Into<String>>(rows: Vec<Vec<(K, Value)>>) -> Self {
        Self {
            rows: into_rows(rows).into(),
            current: None,
            closed: None,
        }
    }
}

impl ResultSet for MockRows {
    fn next(&mut self) -> Result<bool, DriverError> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn get(&self, label: &str) -> Result<Value, DriverError> {
        let row = self.current.as_ref().ok_or_else(|| {
            DriverError::new("mock", DriverErrorKind::Other, "no current row")
        })?;
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(label))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                DriverError::new("mock", DriverErrorKind::Other, format!("column {label} not found"))
            })
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if let Some(closed) = &self.closed {
            closed.set(closed.get() + 1);
        }
        Ok(())
    }
}
