//! PostgreSQL driver on `may_postgres`.
//!
//! The client is blocking from the caller's point of view and cooperative
//! under the `may` runtime, so statements run inline in the calling coroutine.
//! Transactions open lazily on the first statement and end with
//! [`Connection::commit`] or [`Connection::rollback`].

use crate::config::DatabaseConfig;
use crate::connection::{redact_target, validate_connection_string, ConnectionProvider};
use crate::error::DbsError;
use crate::executor::{Connection, DriverError, DriverErrorKind, PreparedStatement, ResultSet};
use crate::parameter::{SqlType, Value};
use crate::statement::dialect::Dialect;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use may_postgres::types::{IsNull, ToSql, Type};
use may_postgres::{Client, Row};
use postgres_types::to_sql_checked;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::error::Error;
use std::time::Duration;

pub const DRIVER: &str = "may_postgres";

const SYNTAX_ERROR: &str = "42601";
const QUERY_CANCELED: &str = "57014";
/// SQLSTATE class of connection exceptions
const CONNECTION_CLASS: &str = "08";

/// Driver error kind for a SQLSTATE.
pub fn sqlstate_kind(state: &str) -> DriverErrorKind {
    match state {
        SYNTAX_ERROR => DriverErrorKind::Syntax,
        QUERY_CANCELED => DriverErrorKind::Timeout,
        s if s.starts_with(CONNECTION_CLASS) => DriverErrorKind::Connection,
        _ => DriverErrorKind::Other,
    }
}

fn driver_error(err: may_postgres::Error) -> DriverError {
    if let Some(db) = err.as_db_error() {
        let state = db.code().code().to_string();
        let message = db.message().to_string();
        return DriverError::new(DRIVER, sqlstate_kind(&state), message)
            .with_vendor_code(state.clone())
            .with_sql_state(state)
            .with_source(err);
    }
    let kind = if err.is_closed() {
        DriverErrorKind::Connection
    } else {
        DriverErrorKind::Other
    };
    DriverError::new(DRIVER, kind, err.to_string()).with_source(err)
}

/// An owned bind value.
///
/// Numeric values adapt to the parameter type the server inferred, so a
/// `Long` compared against an `int4` column is sent as `int4`.
#[derive(Debug, Clone, PartialEq)]
enum PgValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl From<&Value> for PgValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Boolean(b) => PgValue::Bool(*b),
            Value::Integer(i) => PgValue::Int(*i),
            Value::Long(i) => PgValue::Long(*i),
            Value::Float(f) => PgValue::Float(*f),
            Value::Double(d) => PgValue::Double(*d),
            Value::Decimal(d) => PgValue::Decimal(*d),
            Value::String(s) => PgValue::Text(s.clone()),
            Value::Date(d) => PgValue::Date(*d),
            Value::Time(t) => PgValue::Time(*t),
            Value::Timestamp(ts) => PgValue::Timestamp(*ts),
            Value::Binary(b) => PgValue::Bytes(b.clone()),
        }
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql_checked(ty, out),
            PgValue::Int(v) => integral(i64::from(*v), ty, out),
            PgValue::Long(v) => integral(*v, ty, out),
            PgValue::Float(v) if *ty == Type::FLOAT8 => f64::from(*v).to_sql(ty, out),
            PgValue::Float(v) => v.to_sql_checked(ty, out),
            PgValue::Double(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            PgValue::Double(v) if *ty == Type::NUMERIC => match Decimal::try_from(*v) {
                Ok(d) => d.to_sql(ty, out),
                Err(err) => Err(Box::new(err)),
            },
            PgValue::Double(v) => v.to_sql_checked(ty, out),
            PgValue::Decimal(v) => v.to_sql_checked(ty, out),
            PgValue::Text(v) => v.to_sql_checked(ty, out),
            PgValue::Date(v) => v.to_sql_checked(ty, out),
            PgValue::Time(v) => v.to_sql_checked(ty, out),
            PgValue::Timestamp(v) if *ty == Type::TIMESTAMPTZ => {
                DateTime::<Utc>::from_naive_utc_and_offset(*v, Utc).to_sql(ty, out)
            }
            PgValue::Timestamp(v) if *ty == Type::DATE => v.date().to_sql(ty, out),
            PgValue::Timestamp(v) => v.to_sql_checked(ty, out),
            PgValue::Bytes(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn integral(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from(value).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        _ => value.to_sql_checked(ty, out),
    }
}

fn column_value(row: &Row, index: usize) -> Result<Value, may_postgres::Error> {
    let ty = row.columns()[index].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.map(Value::Boolean),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)?
            .map(|v| Value::Integer(i32::from(v))),
        Type::INT4 => row.try_get::<_, Option<i32>>(index)?.map(Value::Integer),
        Type::INT8 => row.try_get::<_, Option<i64>>(index)?.map(Value::Long),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(index)?.map(Value::Float),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index)?.map(Value::Double),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(index)?.map(Value::Decimal),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(index)?.map(Value::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(index)?.map(Value::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map(Value::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(index)?.map(Value::Binary),
        _ => row.try_get::<_, Option<String>>(index)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Session command issued ahead of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    SetTimeout(Option<Duration>),
    Begin,
}

impl SessionCommand {
    fn sql(&self) -> String {
        match self {
            SessionCommand::SetTimeout(timeout) => {
                let millis = timeout.map(|t| t.as_millis().max(1)).unwrap_or(0);
                format!("SET statement_timeout = {millis}")
            }
            SessionCommand::Begin => "BEGIN".to_string(),
        }
    }
}

/// What the server session is known to hold.
///
/// A `SET` issued outside a transaction block lasts for the session; one
/// issued inside lasts only if the block commits, so ending such a block
/// forgets the applied timeout.
#[derive(Debug, Default)]
struct Session {
    in_transaction: bool,
    /// `None` until a timeout is known to be in effect
    timeout: Option<Option<Duration>>,
    timeout_in_transaction: bool,
}

impl Session {
    /// Commands to run before a statement with `timeout`, in order.
    fn prelude(&self, timeout: Option<Duration>) -> Vec<SessionCommand> {
        let mut commands = Vec::with_capacity(2);
        if self.timeout != Some(timeout) {
            commands.push(SessionCommand::SetTimeout(timeout));
        }
        if !self.in_transaction {
            commands.push(SessionCommand::Begin);
        }
        commands
    }

    fn applied(&mut self, command: &SessionCommand) {
        match command {
            SessionCommand::SetTimeout(timeout) => {
                self.timeout = Some(*timeout);
                self.timeout_in_transaction = self.in_transaction;
            }
            SessionCommand::Begin => self.in_transaction = true,
        }
    }

    /// Close the transaction; `true` when one was open.
    fn end(&mut self) -> bool {
        if self.timeout_in_transaction {
            self.timeout = None;
            self.timeout_in_transaction = false;
        }
        std::mem::replace(&mut self.in_transaction, false)
    }
}

/// A live session on one PostgreSQL server.
pub struct MayPostgresConnection {
    client: Client,
    session: RefCell<Session>,
}

impl MayPostgresConnection {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            session: RefCell::new(Session::default()),
        }
    }

    fn prepare_session(&self, timeout: Option<Duration>) -> Result<(), DriverError> {
        let commands = self.session.borrow().prelude(timeout);
        for command in commands {
            self.client
                .execute(command.sql().as_str(), &[])
                .map_err(driver_error)?;
            self.session.borrow_mut().applied(&command);
        }
        Ok(())
    }

    fn end(&self, command: &str) -> Result<(), DriverError> {
        let open = self.session.borrow_mut().end();
        if open {
            self.client.execute(command, &[]).map_err(driver_error)?;
        }
        Ok(())
    }
}

impl Connection for MayPostgresConnection {
    fn driver(&self) -> &str {
        DRIVER
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    fn prepare_statement(&self, sql: &str) -> Result<Box<dyn PreparedStatement + '_>, DriverError> {
        Ok(Box::new(PgStatement {
            connection: self,
            sql: sql.to_string(),
            values: Vec::new(),
            timeout: None,
            closed: false,
        }))
    }

    fn commit(&self) -> Result<(), DriverError> {
        self.end("COMMIT")
    }

    fn rollback(&self) -> Result<(), DriverError> {
        self.end("ROLLBACK")
    }
}

struct PgStatement<'c> {
    connection: &'c MayPostgresConnection,
    sql: String,
    values: Vec<PgValue>,
    timeout: Option<Duration>,
    closed: bool,
}

impl PgStatement<'_> {
    fn set(&mut self, position: usize, value: PgValue) -> Result<(), DriverError> {
        if position == 0 {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::Other,
                "parameter positions start at 1",
            ));
        }
        if self.values.len() < position {
            self.values.resize(position, PgValue::Null);
        }
        self.values[position - 1] = value;
        Ok(())
    }

    fn ready(&self) -> Result<Vec<&dyn ToSql>, DriverError> {
        if self.closed {
            return Err(DriverError::new(DRIVER, DriverErrorKind::Other, "statement is closed"));
        }
        self.connection.prepare_session(self.timeout)?;
        Ok(self.values.iter().map(|v| v as &dyn ToSql).collect())
    }
}

impl PreparedStatement for PgStatement<'_> {
    fn set_null(&mut self, position: usize, _sql_type: SqlType) -> Result<(), DriverError> {
        self.set(position, PgValue::Null)
    }

    fn set_object(&mut self, position: usize, value: &Value) -> Result<(), DriverError> {
        self.set(position, PgValue::from(value))
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DriverError> {
        self.timeout = timeout;
        Ok(())
    }

    fn register_return(&mut self, position: usize, _sql_type: SqlType) -> Result<(), DriverError> {
        log::debug!("ignoring out parameter {position}, returned values arrive as rows");
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError> {
        let params = self.ready()?;
        let rows = self
            .connection
            .client
            .query(self.sql.as_str(), &params)
            .map_err(driver_error)?;
        Ok(Box::new(PgRows::new(rows)))
    }

    fn execute_update(&mut self) -> Result<u64, DriverError> {
        let params = self.ready()?;
        self.connection
            .client
            .execute(self.sql.as_str(), &params)
            .map_err(driver_error)
    }

    fn returned(&mut self) -> Result<Option<Box<dyn ResultSet>>, DriverError> {
        Ok(None)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.values.clear();
        Ok(())
    }
}

/// Fetched rows with a forward cursor; labels match case-insensitively
/// since PostgreSQL folds unquoted aliases to lower case.
struct PgRows {
    rows: Vec<Row>,
    /// Index of the current row, 1-based; 0 before the first `next`
    position: usize,
}

impl PgRows {
    fn new(rows: Vec<Row>) -> Self {
        Self { rows, position: 0 }
    }

    fn current(&self) -> Result<&Row, DriverError> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .ok_or_else(|| DriverError::new(DRIVER, DriverErrorKind::Other, "no current row"))
    }
}

impl ResultSet for PgRows {
    fn next(&mut self) -> Result<bool, DriverError> {
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            self.position = self.rows.len() + 1;
            Ok(false)
        }
    }

    fn get(&self, label: &str) -> Result<Value, DriverError> {
        let row = self.current()?;
        let index = row
            .columns()
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(label))
            .ok_or_else(|| {
                DriverError::new(DRIVER, DriverErrorKind::Other, format!("no column labelled {label}"))
            })?;
        column_value(row, index).map_err(driver_error)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.rows.clear();
        self.position = 0;
        Ok(())
    }
}

/// Opens [`MayPostgresConnection`]s to one URL.
#[derive(Clone)]
pub struct MayPostgresProvider {
    url: String,
}

impl MayPostgresProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, DbsError> {
        let url = url.into();
        validate_connection_string(&url)?;
        Ok(Self { url })
    }

    /// Provider for a configuration that names this driver.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbsError> {
        config.validate()?;
        if config.driver != DRIVER {
            return Err(DbsError::Configuration(format!(
                "configured driver {} is not {DRIVER}",
                config.driver
            )));
        }
        Self::new(config.url.clone())
    }
}

impl std::fmt::Debug for MayPostgresProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MayPostgresProvider")
            .field("target", &self.target())
            .finish()
    }
}

impl ConnectionProvider for MayPostgresProvider {
    fn target(&self) -> String {
        redact_target(&self.url)
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let client = may_postgres::connect(&self.url).map_err(|err| {
            let err = driver_error(err);
            if err.kind() == DriverErrorKind::Other && err.sql_state().is_none() {
                DriverError::new(DRIVER, DriverErrorKind::Connection, err.message().to_string())
                    .with_source(err)
            } else {
                err
            }
        })?;
        Ok(Box::new(MayPostgresConnection::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_kind() {
        assert_eq!(sqlstate_kind("42601"), DriverErrorKind::Syntax);
        assert_eq!(sqlstate_kind("57014"), DriverErrorKind::Timeout);
        assert_eq!(sqlstate_kind("08006"), DriverErrorKind::Connection);
        assert_eq!(sqlstate_kind("23505"), DriverErrorKind::Other);
    }

    #[test]
    fn test_values_convert_to_owned_binds() {
        assert_eq!(PgValue::from(&Value::Null), PgValue::Null);
        assert_eq!(PgValue::from(&Value::from("x")), PgValue::Text("x".to_string()));
        assert_eq!(PgValue::from(&Value::Long(7)), PgValue::Long(7));
    }

    #[test]
    fn test_long_narrows_to_int4() {
        let mut out = BytesMut::new();
        let null = PgValue::Long(42).to_sql(&Type::INT4, &mut out).unwrap();
        assert!(matches!(null, IsNull::No));
        assert_eq!(&out[..], &42i32.to_be_bytes());
    }

    #[test]
    fn test_long_out_of_int4_range_fails() {
        let mut out = BytesMut::new();
        assert!(PgValue::Long(i64::MAX).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_null_binds_for_any_type() {
        let mut out = BytesMut::new();
        let null = PgValue::Null.to_sql(&Type::TIMESTAMP, &mut out).unwrap();
        assert!(matches!(null, IsNull::Yes));
    }

    #[test]
    fn test_text_against_int_column_is_rejected() {
        let mut out = BytesMut::new();
        assert!(PgValue::Text("x".into()).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_first_statement_sets_timeout_outside_the_transaction() {
        let session = Session::default();
        let timeout = Some(Duration::from_secs(30));
        assert_eq!(
            session.prelude(timeout),
            vec![SessionCommand::SetTimeout(timeout), SessionCommand::Begin]
        );
        assert_eq!(SessionCommand::SetTimeout(timeout).sql(), "SET statement_timeout = 30000");
        assert_eq!(SessionCommand::SetTimeout(None).sql(), "SET statement_timeout = 0");
    }

    fn run(session: &mut Session, timeout: Option<Duration>) -> Vec<SessionCommand> {
        let commands = session.prelude(timeout);
        for command in &commands {
            session.applied(command);
        }
        commands
    }

    #[test]
    fn test_session_timeout_survives_rollback() {
        let mut session = Session::default();
        let timeout = Some(Duration::from_secs(30));
        run(&mut session, timeout);
        assert!(run(&mut session, timeout).is_empty());

        assert!(session.end());
        assert_eq!(run(&mut session, timeout), vec![SessionCommand::Begin]);
    }

    #[test]
    fn test_timeout_changed_inside_transaction_is_reapplied_after_rollback() {
        let mut session = Session::default();
        run(&mut session, Some(Duration::from_secs(30)));

        let shorter = Some(Duration::from_secs(5));
        assert_eq!(run(&mut session, shorter), vec![SessionCommand::SetTimeout(shorter)]);
        assert!(session.end());

        assert_eq!(
            run(&mut session, shorter),
            vec![SessionCommand::SetTimeout(shorter), SessionCommand::Begin]
        );
        assert!(run(&mut session, shorter).is_empty());
    }

    #[test]
    fn test_end_without_transaction_sends_nothing() {
        let mut session = Session::default();
        assert!(!session.end());
    }

    #[test]
    fn test_provider_validates_and_redacts() {
        assert!(MayPostgresProvider::new("nonsense").is_err());
        let provider = MayPostgresProvider::new("postgres://svc:secret@db:5432/idm").unwrap();
        assert_eq!(provider.target(), "db:5432/idm");
        assert!(!format!("{provider:?}").contains("secret"));
    }

    #[test]
    fn test_provider_from_config_requires_this_driver() {
        let config = DatabaseConfig {
            url: "postgres://svc:secret@db:5432/idm".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(MayPostgresProvider::from_config(&config).unwrap().target(), "db:5432/idm");

        let oracle = DatabaseConfig {
            driver: "oracle.jdbc".to_string(),
            dialect: Dialect::Oracle,
            ..config
        };
        assert!(matches!(
            MayPostgresProvider::from_config(&oracle),
            Err(DbsError::Configuration(_))
        ));
    }
}
