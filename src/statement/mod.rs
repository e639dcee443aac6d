//! One logical database operation: render, prepare, execute, close.
//!
//! A [`Statement`] moves through `Unprepared → Prepared → Executed → Closed`.
//! A failed execution goes straight from `Prepared` to `Closed` and releases
//! the driver handle before the error is returned. Calls made in the wrong
//! state, or the wrong execution call for the operation, are illegal-state
//! errors.
//!
//! ```
//! use dbs_connector::entity::{Attribute, AttributeType, Entity};
//! use dbs_connector::filter::Filter;
//! use dbs_connector::parameter::Value;
//! use dbs_connector::statement::{Operation, Statement};
//! use dbs_connector::test_helpers::{MockConnection, Response};
//! use std::sync::Arc;
//!
//! let users = Arc::new(Entity::build(None, Some("app"), "users", &[0], vec![
//!     Attribute::new("uid", "uid", AttributeType::String),
//! ]).unwrap());
//! let connection = MockConnection::new();
//! connection.respond(Response::rows(vec![vec![("uid", Value::from("alice"))]]));
//!
//! let mut statement = Statement::new(Operation::Select, users.clone())
//!     .with_filter(Filter::equal("uid", "alice"))
//!     .with_returning(users.returning().into_iter().cloned().collect());
//! statement.prepare(&connection).unwrap();
//! let records = statement.fetch().unwrap();
//! statement.close();
//! assert_eq!(records[0].get("uid"), Some(&Value::from("alice")));
//! ```

pub mod builder;
pub mod dialect;

use crate::entity::{Attribute, Entity};
use crate::error::{DbsError, OperationFailure};
use crate::executor::{self, Connection, Outcome, PreparedStatement, Record};
use crate::filter::{Filter, Sort};
use crate::normalizer::ErrorCatalog;
use crate::parameter::{Parameter, SqlType, Value};
use builder::Binding;
use dialect::{Dialect, ReturningStyle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Kind of statement rendered and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    /// Paginated SELECT
    Search,
    Exists,
    Count,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Update | Operation::Delete)
    }

    fn failure(&self) -> Option<OperationFailure> {
        match self {
            Operation::Insert => Some(OperationFailure::NotCreated),
            Operation::Update => Some(OperationFailure::NotModified),
            Operation::Delete => Some(OperationFailure::NotDeleted),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Select => "select",
            Operation::Search => "search",
            Operation::Exists => "exists",
            Operation::Count => "count",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unprepared,
    Prepared,
    Executed,
    Closed,
}

/// A single prepare → execute → close cycle against one connection.
pub struct Statement<'c> {
    operation: Operation,
    entity: Arc<Entity>,
    filter: Option<Filter>,
    sort: Option<Sort>,
    returning: Vec<Attribute>,
    binding: Vec<Binding>,
    strict: bool,
    timeout: Option<Duration>,
    catalog: Arc<ErrorCatalog>,
    state: State,
    dialect: Dialect,
    sql: String,
    parameters: Vec<Parameter>,
    handle: Option<Box<dyn PreparedStatement + 'c>>,
}

impl<'c> Statement<'c> {
    pub fn new(operation: Operation, entity: Arc<Entity>) -> Self {
        Self {
            operation,
            entity,
            filter: None,
            sort: None,
            returning: Vec::new(),
            binding: Vec::new(),
            strict: false,
            timeout: None,
            catalog: ErrorCatalog::global(),
            state: State::Unprepared,
            dialect: Dialect::default(),
            sql: String::new(),
            parameters: Vec::new(),
            handle: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Optional filter; `None` leaves the statement unfiltered.
    pub fn with_optional_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Attributes projected by SELECT/SEARCH, or produced by RETURNING for
    /// INSERT/UPDATE.
    pub fn with_returning(mut self, returning: Vec<Attribute>) -> Self {
        self.returning = returning;
        self
    }

    /// Columns written by INSERT/UPDATE, in bind order.
    pub fn with_binding(mut self, binding: Vec<Binding>) -> Self {
        self.binding = binding;
        self
    }

    /// Require at least one affected row from INSERT/UPDATE/DELETE.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Statement deadline; `None` disables it.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<ErrorCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Rendered SQL with `?` placeholders; empty until prepared.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Render the statement for the connection's dialect and create the
    /// driver handle.
    ///
    /// Returns the bind parameters in placeholder order. For SEARCH the two
    /// row-range parameters are not included; they follow at execution.
    ///
    /// # Errors
    ///
    /// Illegal state if the statement was prepared before; search-condition
    /// or argument errors from rendering; normalized driver errors from the
    /// prepare call.
    pub fn prepare(&mut self, connection: &'c dyn Connection) -> Result<Vec<Parameter>, DbsError> {
        if self.state != State::Unprepared {
            return Err(DbsError::IllegalState(format!(
                "{} statement on {} is already {}",
                self.operation,
                self.entity.id(),
                state_name(self.state)
            )));
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::prepare_statement_span(&self.operation.to_string()).entered();

        let dialect = connection.dialect();
        let mut parameters = Vec::new();
        let sql = self.render(dialect, &mut parameters)?;
        let native = dialect.placeholders(sql.clone());
        log::debug!(
            "prepare {} on {}: {native} ({} parameters)",
            self.operation,
            self.entity.id(),
            parameters.len()
        );

        let mut handle = connection
            .prepare_statement(&native)
            .map_err(|err| executor::translate(err, &sql, &self.catalog))?;

        if self.returns_through_out_parameters(dialect) {
            let offset = parameters.len();
            let registered = self
                .returning
                .iter()
                .enumerate()
                .try_for_each(|(i, attribute)| handle.register_return(offset + i + 1, attribute.sql_type()));
            if let Err(err) = registered {
                release(handle);
                self.state = State::Closed;
                return Err(executor::translate(err, &sql, &self.catalog));
            }
        }

        self.dialect = dialect;
        self.sql = sql;
        self.parameters = parameters.clone();
        self.handle = Some(handle);
        self.state = State::Prepared;
        Ok(parameters)
    }

    fn render(&self, dialect: Dialect, parameters: &mut Vec<Parameter>) -> Result<String, DbsError> {
        let entity = self.entity.as_ref();
        let filter = self.filter.as_ref();
        let returning: Vec<&Attribute> = self.returning.iter().collect();
        match self.operation {
            Operation::Select => {
                builder::prepare_select(dialect, entity, filter, self.sort.as_ref(), &returning, parameters)
            }
            Operation::Search => {
                builder::prepare_search(dialect, entity, filter, self.sort.as_ref(), &returning, parameters)
            }
            Operation::Exists => builder::prepare_exists(dialect, entity, filter, parameters),
            Operation::Count => builder::prepare_count(dialect, entity, filter, parameters),
            Operation::Insert => {
                builder::prepare_insert(dialect, entity, &self.binding, &returning, parameters)
            }
            Operation::Update => {
                builder::prepare_update(dialect, entity, filter, &self.binding, &returning, parameters)
            }
            Operation::Delete => builder::prepare_delete(dialect, entity, filter, parameters),
        }
    }

    fn returns_through_out_parameters(&self, dialect: Dialect) -> bool {
        matches!(self.operation, Operation::Insert | Operation::Update)
            && !self.returning.is_empty()
            && dialect.returning_style() == ReturningStyle::OutParameters
    }

    /// Run a SELECT and materialize every row.
    pub fn fetch(&mut self) -> Result<Vec<Record>, DbsError> {
        let mut handle = self.checkout(&[Operation::Select])?;
        let result = executor::run_query(handle.as_mut(), &self.sql, &self.parameters, self.timeout)
            .and_then(|rows| executor::read_records(rows, &self.returning));
        self.checkin(handle, result)
    }

    /// Run a SEARCH for rows `start..=end` (row numbers start at 1).
    pub fn fetch_page(&mut self, start: i64, end: i64) -> Result<Vec<Record>, DbsError> {
        let mut handle = self.checkout(&[Operation::Search])?;
        let mut parameters = self.parameters.clone();
        parameters.push(Parameter::new(Value::Long(start), SqlType::Numeric));
        parameters.push(Parameter::new(Value::Long(end), SqlType::Numeric));
        let result = executor::run_query(handle.as_mut(), &self.sql, &parameters, self.timeout)
            .and_then(|rows| executor::read_records(rows, &self.returning));
        self.checkin(handle, result)
    }

    /// Run an EXISTS check.
    pub fn exists(&mut self) -> Result<bool, DbsError> {
        let mut handle = self.checkout(&[Operation::Exists])?;
        let result = executor::run_query(handle.as_mut(), &self.sql, &self.parameters, self.timeout)
            .and_then(|rows| executor::read_scalar(rows, "x"))
            .map(|value| value.is_some());
        self.checkin(handle, result)
    }

    /// Run a COUNT.
    pub fn count(&mut self) -> Result<u64, DbsError> {
        let mut handle = self.checkout(&[Operation::Count])?;
        let result = executor::run_query(handle.as_mut(), &self.sql, &self.parameters, self.timeout)
            .and_then(|rows| executor::read_scalar(rows, "rs"));
        let value = self.checkin(handle, result)?;
        match value {
            None => Ok(0),
            Some(value) => value
                .to_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DbsError::unhandled(format!("count returned {value}"))),
        }
    }

    /// Run INSERT/UPDATE/DELETE.
    ///
    /// In strict mode zero affected rows fails with not-created,
    /// not-modified or not-deleted carrying the entity id and the attempted
    /// data; the statement is closed before the error is returned.
    pub fn execute(&mut self) -> Result<Outcome, DbsError> {
        let mut handle = self.checkout(&[Operation::Insert, Operation::Update, Operation::Delete])?;
        let result = self.run_mutation(handle.as_mut());
        let outcome = self.checkin(handle, result)?;

        if self.strict && outcome.affected() == 0 {
            if let Some(failure) = self.operation.failure() {
                let err = DbsError::Operation {
                    failure,
                    entity: self.entity.id().to_string(),
                    data: self.attempted(),
                };
                self.close();
                return Err(err);
            }
        }
        Ok(outcome)
    }

    fn run_mutation(&self, handle: &mut dyn PreparedStatement) -> Result<Outcome, executor::DriverError> {
        let returning = !self.returning.is_empty() && self.operation != Operation::Delete;
        if !returning {
            let affected = executor::run_update(handle, &self.sql, &self.parameters, self.timeout)?;
            return Ok(Outcome::new(affected, Vec::new()));
        }

        match self.dialect.returning_style() {
            ReturningStyle::OutParameters => {
                let affected = executor::run_update(handle, &self.sql, &self.parameters, self.timeout)?;
                let returned = match handle.returned()? {
                    Some(rows) => executor::read_records(rows, &self.returning)?,
                    None => Vec::new(),
                };
                Ok(Outcome::new(affected, returned))
            }
            ReturningStyle::ResultRows => {
                let rows = executor::run_query(handle, &self.sql, &self.parameters, self.timeout)?;
                let returned = executor::read_records(rows, &self.returning)?;
                Ok(Outcome::new(returned.len() as u64, returned))
            }
        }
    }

    /// Diagnostic form of what the statement tried to write or match.
    /// Hidden attribute values are masked.
    fn attempted(&self) -> String {
        if !self.binding.is_empty() {
            let values: Vec<String> = self.binding.iter().map(Binding::to_string).collect();
            format!("[{}]", values.join(", "))
        } else {
            self.filter
                .as_ref()
                .map(Filter::to_string)
                .unwrap_or_default()
        }
    }

    fn checkout(&mut self, expected: &[Operation]) -> Result<Box<dyn PreparedStatement + 'c>, DbsError> {
        if !expected.contains(&self.operation) {
            return Err(DbsError::IllegalState(format!(
                "cannot run a {} statement this way",
                self.operation
            )));
        }
        if self.state != State::Prepared {
            return Err(DbsError::IllegalState(format!(
                "{} statement on {} is {}",
                self.operation,
                self.entity.id(),
                state_name(self.state)
            )));
        }
        self.handle
            .take()
            .ok_or_else(|| DbsError::IllegalState("prepared statement handle is missing".to_string()))
    }

    fn checkin<T>(
        &mut self,
        handle: Box<dyn PreparedStatement + 'c>,
        result: Result<T, executor::DriverError>,
    ) -> Result<T, DbsError> {
        match result {
            Ok(value) => {
                self.handle = Some(handle);
                self.state = State::Executed;
                Ok(value)
            }
            Err(err) => {
                release(handle);
                self.state = State::Closed;
                Err(executor::translate(err, &self.sql, &self.catalog))
            }
        }
    }

    /// Release the driver handle. Idempotent; close failures are logged.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            release(handle);
        }
        self.state = State::Closed;
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            release(handle);
        }
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("operation", &self.operation)
            .field("entity", &self.entity.id())
            .field("state", &self.state)
            .field("sql", &self.sql)
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

fn release(mut handle: Box<dyn PreparedStatement + '_>) {
    if let Err(err) = handle.close() {
        log::warn!("failed to close prepared statement: {err}");
    }
}

fn state_name(state: State) -> &'static str {
    match state {
        State::Unprepared => "unprepared",
        State::Prepared => "prepared",
        State::Executed => "executed",
        State::Closed => "closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AttributeType;
    use crate::error::ErrorCode;
    use crate::executor::DriverErrorKind;
    use crate::test_helpers::{Bind, MockConnection, Response};

    fn users() -> Arc<Entity> {
        Arc::new(
            Entity::build(
                None,
                Some("app"),
                "users",
                &[0],
                vec![
                    Attribute::new("uid", "uid", AttributeType::String),
                    Attribute::new("name", "name", AttributeType::String),
                    Attribute::new("pwd", "password", AttributeType::String).hidden(true),
                    Attribute::new("user_id", "id", AttributeType::Long),
                ],
            )
            .unwrap(),
        )
    }

    fn attribute(entity: &Entity, alias: &str) -> Attribute {
        entity.lookup(alias).unwrap().clone()
    }

    #[test]
    fn test_select_lifecycle() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::rows(vec![
            vec![("uid", Value::from("alice")), ("name", Value::Null)],
        ]));

        let mut statement = Statement::new(Operation::Select, entity.clone())
            .with_filter(Filter::equal("uid", "alice"))
            .with_returning(vec![attribute(&entity, "uid"), attribute(&entity, "name")])
            .with_timeout(Some(Duration::from_secs(20)));
        assert_eq!(statement.state(), State::Unprepared);

        let parameters = statement.prepare(&connection).unwrap();
        assert_eq!(parameters, vec![Parameter::text("alice")]);
        assert_eq!(statement.state(), State::Prepared);

        let records = statement.fetch().unwrap();
        assert_eq!(statement.state(), State::Executed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some(&Value::Null));

        statement.close();
        assert_eq!(statement.state(), State::Closed);
        statement.close();

        let log = &connection.statements()[0];
        assert_eq!(
            log.sql,
            "SELECT uid AS uid,name AS name,rownum AS rownumber FROM app.users WHERE (uid = ?)"
        );
        assert_eq!(log.binds, vec![Bind::String(1, "alice".to_string())]);
        assert_eq!(log.timeout, Some(Some(Duration::from_secs(20))));
        assert!(log.closed);
        assert_eq!(connection.result_sets_closed(), 1);
    }

    #[test]
    fn test_prepare_twice_is_illegal() {
        let connection = MockConnection::new();
        let mut statement = Statement::new(Operation::Count, users());
        statement.prepare(&connection).unwrap();
        let err = statement.prepare(&connection).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IllegalState);
    }

    #[test]
    fn test_execute_before_prepare_is_illegal() {
        let mut statement = Statement::new(Operation::Delete, users());
        assert!(matches!(statement.execute(), Err(DbsError::IllegalState(_))));
    }

    #[test]
    fn test_wrong_call_for_operation_is_illegal() {
        let connection = MockConnection::new();
        let mut statement = Statement::new(Operation::Delete, users());
        statement.prepare(&connection).unwrap();
        assert!(matches!(statement.fetch(), Err(DbsError::IllegalState(_))));
        assert_eq!(statement.state(), State::Prepared);
    }

    #[test]
    fn test_execute_after_close_is_illegal() {
        let connection = MockConnection::new();
        let mut statement = Statement::new(Operation::Exists, users());
        statement.prepare(&connection).unwrap();
        statement.close();
        assert!(matches!(statement.exists(), Err(DbsError::IllegalState(_))));
    }

    #[test]
    fn test_search_appends_row_range_after_filter() {
        let entity = users();
        let connection = MockConnection::new();
        let mut statement = Statement::new(Operation::Search, entity.clone())
            .with_filter(Filter::starts_with("name", "al"))
            .with_returning(vec![attribute(&entity, "uid")]);
        let parameters = statement.prepare(&connection).unwrap();
        assert_eq!(parameters.len(), 1);
        statement.fetch_page(1, 25).unwrap();

        assert_eq!(
            connection.binds(0),
            vec![
                Bind::String(1, "al%".to_string()),
                Bind::Long(2, 1),
                Bind::Long(3, 25),
            ]
        );
    }

    #[test]
    fn test_exists_and_count() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::rows(vec![vec![("x", Value::from("x"))]]));
        connection.respond(Response::rows(vec![vec![("rs", Value::Long(3))]]));

        let mut exists = Statement::new(Operation::Exists, entity.clone())
            .with_filter(Filter::equal("uid", "alice"));
        exists.prepare(&connection).unwrap();
        assert!(exists.exists().unwrap());

        let mut count = Statement::new(Operation::Count, entity);
        count.prepare(&connection).unwrap();
        assert_eq!(count.count().unwrap(), 3);
        assert_eq!(connection.sql(1), "SELECT COUNT(uid) AS rs FROM app.users");
    }

    #[test]
    fn test_strict_update_with_no_rows_fails() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::Affected(0));

        let mut statement = Statement::new(Operation::Update, entity.clone())
            .with_filter(Filter::equal("uid", "ghost"))
            .with_binding(vec![
                Binding::new(&attribute(&entity, "name"), Value::from("Ghost")),
                Binding::new(&attribute(&entity, "password"), Value::from("secret")),
            ])
            .with_strict(true);
        statement.prepare(&connection).unwrap();
        let err = statement.execute().unwrap_err();

        assert_eq!(err.code(), ErrorCode::ObjectNotModified);
        let text = err.to_string();
        assert!(text.contains("app.users"));
        assert!(text.contains("name=Ghost"));
        assert!(!text.contains("secret"));
        assert_eq!(statement.state(), State::Closed);
        assert!(connection.closed(0));
    }

    #[test]
    fn test_lenient_delete_with_no_rows_succeeds() {
        let connection = MockConnection::new();
        connection.respond(Response::Affected(0));
        let mut statement = Statement::new(Operation::Delete, users())
            .with_filter(Filter::equal("uid", "ghost"));
        statement.prepare(&connection).unwrap();
        assert_eq!(statement.execute().unwrap().affected(), 0);
    }

    #[test]
    fn test_strict_delete_reports_filter() {
        let connection = MockConnection::new();
        connection.respond(Response::Affected(0));
        let mut statement = Statement::new(Operation::Delete, users())
            .with_filter(Filter::equal("uid", "ghost"))
            .with_strict(true);
        statement.prepare(&connection).unwrap();
        let err = statement.execute().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectNotDeleted);
        assert!(err.to_string().contains("(uid EQUAL \"ghost\")"));
    }

    #[test]
    fn test_failure_closes_handle_and_classifies() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::fail(DriverErrorKind::Syntax, "ORA-00933"));

        let mut statement = Statement::new(Operation::Select, entity.clone())
            .with_returning(vec![attribute(&entity, "uid")]);
        statement.prepare(&connection).unwrap();
        let err = statement.fetch().unwrap_err();

        assert_eq!(err.code(), ErrorCode::SyntaxError);
        assert_eq!(statement.state(), State::Closed);
        assert!(connection.closed(0));
    }

    #[test]
    fn test_vendor_failure_is_normalized() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::vendor("1", "unique constraint violated"));

        let mut statement = Statement::new(Operation::Insert, entity.clone())
            .with_binding(vec![Binding::new(&attribute(&entity, "uid"), Value::from("alice"))]);
        statement.prepare(&connection).unwrap();
        let err = statement.execute().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectAlreadyExists);
    }

    #[test]
    fn test_prepare_failure_leaves_statement_unprepared() {
        let connection = MockConnection::new();
        connection.fail_next_prepare(Response::fail(DriverErrorKind::Other, "closed connection"));
        let mut statement = Statement::new(Operation::Count, users());
        let err = statement.prepare(&connection).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unhandled);
        assert_eq!(statement.state(), State::Unprepared);
    }

    #[test]
    fn test_render_failure_reports_search_condition() {
        let connection = MockConnection::new();
        let mut statement = Statement::new(Operation::Count, users())
            .with_filter(Filter::compare("uid", crate::filter::Operator::LessThan, Value::Null));
        let err = statement.prepare(&connection).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SearchConditionFailed);
        assert_eq!(connection.statement_count(), 0);
    }

    #[test]
    fn test_insert_returning_through_out_parameters() {
        let entity = users();
        let connection = MockConnection::new();
        connection.respond(Response::returning(1, vec![vec![("id", Value::Long(42))]]));

        let mut statement = Statement::new(Operation::Insert, entity.clone())
            .with_binding(vec![Binding::new(&attribute(&entity, "uid"), Value::from("alice"))])
            .with_returning(vec![attribute(&entity, "id")]);
        statement.prepare(&connection).unwrap();
        let outcome = statement.execute().unwrap();

        assert_eq!(outcome.affected(), 1);
        assert_eq!(outcome.returned()[0].get("id"), Some(&Value::Long(42)));
        let log = &connection.statements()[0];
        assert_eq!(log.sql, "INSERT INTO app.users (uid) VALUES (?) RETURNING user_id INTO ?");
        assert_eq!(log.returns, vec![(2, SqlType::Numeric)]);
    }

    #[test]
    fn test_postgres_returning_rows_and_placeholders() {
        let entity = users();
        let connection = MockConnection::new()
            .with_dialect(Dialect::PostgreSql)
            .with_driver("may_postgres");
        connection.respond(Response::rows(vec![vec![("id", Value::Long(7))]]));

        let mut statement = Statement::new(Operation::Update, entity.clone())
            .with_filter(Filter::equal("uid", "alice"))
            .with_binding(vec![Binding::new(&attribute(&entity, "name"), Value::from("Alice"))])
            .with_returning(vec![attribute(&entity, "id")]);
        statement.prepare(&connection).unwrap();
        let outcome = statement.execute().unwrap();

        assert_eq!(outcome.affected(), 1);
        assert_eq!(
            connection.sql(0),
            "UPDATE app.users SET name=$1 WHERE (uid = $2) RETURNING user_id AS id"
        );
        assert_eq!(statement.sql(), "UPDATE app.users SET name=? WHERE (uid = ?) RETURNING user_id AS id");
        assert!(connection.statements()[0].returns.is_empty());
    }

    #[test]
    fn test_drop_closes_live_handle() {
        let connection = MockConnection::new();
        {
            let mut statement = Statement::new(Operation::Count, users());
            statement.prepare(&connection).unwrap();
        }
        assert!(connection.closed(0));
    }
}
