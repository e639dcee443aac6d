//! Framework-facing entity operations.
//!
//! [`EntityService`] runs one statement per call against a borrowed
//! connection: prepared, executed and closed before the call returns.
//! Attribute values come in and go out as [`Record`]s keyed by alias.

use crate::config::DatabaseConfig;
use crate::entity::{Attribute, Entity};
use crate::error::{DbsError, OperationFailure};
use crate::executor::{self, Connection, Outcome, Record};
use crate::filter::{Filter, Sort};
use crate::normalizer::ErrorCatalog;
use crate::statement::builder::Binding;
use crate::statement::{Operation, Statement};
use std::sync::Arc;
use std::time::Duration;

/// Inclusive row window for paginated searches; rows are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: i64,
    pub end: i64,
}

impl Page {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

pub struct EntityService<'c> {
    connection: &'c dyn Connection,
    strict: bool,
    timeout: Option<Duration>,
    catalog: Arc<ErrorCatalog>,
}

impl<'c> EntityService<'c> {
    pub fn new(connection: &'c dyn Connection, config: &DatabaseConfig) -> Self {
        Self {
            connection,
            strict: config.strict,
            timeout: config.query_timeout(),
            catalog: config.error_catalog(),
        }
    }

    /// A service using [`DatabaseConfig::default`].
    pub fn with_defaults(connection: &'c dyn Connection) -> Self {
        Self::new(connection, &DatabaseConfig::default())
    }

    fn statement(&self, operation: Operation, entity: &Arc<Entity>) -> Statement<'c> {
        Statement::new(operation, Arc::clone(entity))
            .with_timeout(self.timeout)
            .with_catalog(Arc::clone(&self.catalog))
    }

    /// Insert one row and return the generated primary key values.
    ///
    /// # Errors
    ///
    /// Object-already-exists when every key attribute is supplied and a row
    /// with that key is present; object-not-created when nothing was
    /// inserted.
    pub fn create(&self, entity: &Arc<Entity>, values: &Record) -> Result<Outcome, DbsError> {
        let binding = bindings(entity, values)?;
        if let Some(key) = key_filter(entity, values) {
            if self.exists(entity, key.clone())? {
                return Err(DbsError::Operation {
                    failure: OperationFailure::AlreadyExists,
                    entity: entity.id().to_string(),
                    data: key.to_string(),
                });
            }
        }

        let keys: Vec<Attribute> = entity.primary_keys().cloned().collect();
        let mut statement = self
            .statement(Operation::Insert, entity)
            .with_binding(binding)
            .with_returning(keys)
            .with_strict(true);
        statement.prepare(self.connection)?;
        let outcome = statement.execute();
        statement.close();
        let outcome = outcome?;
        log::debug!("created {} row(s) in {}", outcome.affected(), entity.id());
        Ok(outcome)
    }

    /// The single row matching `filter`.
    ///
    /// # Errors
    ///
    /// Object-not-exists when nothing matches, object-ambiguous when more
    /// than one row does.
    pub fn read(&self, entity: &Arc<Entity>, filter: Filter) -> Result<Record, DbsError> {
        let data = filter.to_string();
        let mut records = self.search(entity, Some(filter), None, None)?;
        let failure = match records.len() {
            1 => return Ok(records.remove(0)),
            0 => OperationFailure::NotExists,
            _ => OperationFailure::Ambiguous,
        };
        Err(DbsError::Operation {
            failure,
            entity: entity.id().to_string(),
            data,
        })
    }

    /// Update every row matching `filter`; strict mode fails on zero rows.
    pub fn update(&self, entity: &Arc<Entity>, filter: Filter, values: &Record) -> Result<u64, DbsError> {
        let mut statement = self
            .statement(Operation::Update, entity)
            .with_filter(filter)
            .with_binding(bindings(entity, values)?)
            .with_strict(self.strict);
        statement.prepare(self.connection)?;
        let outcome = statement.execute();
        statement.close();
        Ok(outcome?.affected())
    }

    /// Delete every row matching `filter`; strict mode fails on zero rows.
    pub fn delete(&self, entity: &Arc<Entity>, filter: Filter) -> Result<u64, DbsError> {
        let mut statement = self
            .statement(Operation::Delete, entity)
            .with_filter(filter)
            .with_strict(self.strict);
        statement.prepare(self.connection)?;
        let outcome = statement.execute();
        statement.close();
        Ok(outcome?.affected())
    }

    /// Rows matching `filter` with every visible attribute, optionally sorted
    /// and limited to a page.
    pub fn search(
        &self,
        entity: &Arc<Entity>,
        filter: Option<Filter>,
        sort: Option<Sort>,
        page: Option<Page>,
    ) -> Result<Vec<Record>, DbsError> {
        let operation = if page.is_some() {
            Operation::Search
        } else {
            Operation::Select
        };
        let returning: Vec<Attribute> = entity.returning().into_iter().cloned().collect();
        let mut statement = self
            .statement(operation, entity)
            .with_optional_filter(filter)
            .with_returning(returning);
        if let Some(sort) = sort {
            statement = statement.with_sort(sort);
        }
        statement.prepare(self.connection)?;
        let records = match page {
            Some(page) => statement.fetch_page(page.start, page.end),
            None => statement.fetch(),
        };
        statement.close();
        records
    }

    pub fn exists(&self, entity: &Arc<Entity>, filter: Filter) -> Result<bool, DbsError> {
        let mut statement = self.statement(Operation::Exists, entity).with_filter(filter);
        statement.prepare(self.connection)?;
        let found = statement.exists();
        statement.close();
        found
    }

    pub fn count(&self, entity: &Arc<Entity>, filter: Option<Filter>) -> Result<u64, DbsError> {
        let mut statement = self.statement(Operation::Count, entity).with_optional_filter(filter);
        statement.prepare(self.connection)?;
        let count = statement.count();
        statement.close();
        count
    }

    pub fn commit(&self) -> Result<(), DbsError> {
        self.connection
            .commit()
            .map_err(|err| executor::translate(err, "COMMIT", &self.catalog))
    }

    pub fn rollback(&self) -> Result<(), DbsError> {
        self.connection
            .rollback()
            .map_err(|err| executor::translate(err, "ROLLBACK", &self.catalog))
    }
}

/// Bindings for `values`, resolving each alias through the entity.
fn bindings(entity: &Entity, values: &Record) -> Result<Vec<Binding>, DbsError> {
    values
        .iter()
        .map(|(alias, value)| {
            let attribute = entity.attribute(alias)?;
            Ok(Binding::new(attribute, value.clone()))
        })
        .collect()
}

/// Equality filter over the primary key when `values` holds every key part.
fn key_filter(entity: &Entity, values: &Record) -> Option<Filter> {
    let mut parts = Vec::new();
    for attribute in entity.primary_keys() {
        let value = values.get(attribute.alias()).filter(|v| !v.is_null())?;
        parts.push(Filter::equal(attribute.name(), value.clone()));
    }
    Filter::all(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AttributeType;
    use crate::error::ErrorCode;
    use crate::filter::Direction;
    use crate::parameter::{SqlType, Value};
    use crate::test_helpers::{Bind, MockConnection, Response};

    fn users() -> Arc<Entity> {
        Arc::new(
            Entity::build(
                None,
                Some("app"),
                "users",
                &[0],
                vec![
                    Attribute::new("login_id", "uid", AttributeType::String),
                    Attribute::new("email_addr", "mail", AttributeType::String),
                    Attribute::new("pwd", "password", AttributeType::String).hidden(true),
                ],
            )
            .unwrap(),
        )
    }

    fn record(values: &[(&str, Value)]) -> Record {
        let mut record = Record::new();
        for (alias, value) in values {
            record.insert(*alias, value.clone());
        }
        record
    }

    fn empty() -> Response {
        Response::rows::<&str>(Vec::new())
    }

    #[test]
    fn test_create_checks_existence_then_inserts() {
        let connection = MockConnection::new();
        connection.respond(empty());
        connection.respond(Response::returning(1, vec![vec![("uid", Value::from("alice"))]]));
        let service = EntityService::with_defaults(&connection);

        let outcome = service
            .create(
                &users(),
                &record(&[("uid", "alice".into()), ("mail", "a@example.com".into())]),
            )
            .unwrap();

        assert_eq!(outcome.affected(), 1);
        assert_eq!(outcome.returned()[0].get("uid"), Some(&Value::from("alice")));
        assert_eq!(
            connection.sql(0),
            "SELECT 'x' AS x FROM dual WHERE EXISTS (SELECT rownum AS rownumber FROM app.users WHERE (login_id = ?))"
        );
        assert_eq!(
            connection.sql(1),
            "INSERT INTO app.users (login_id,email_addr) VALUES (?,?) RETURNING login_id INTO ?"
        );
        assert_eq!(connection.statements()[1].returns, vec![(3, SqlType::Varchar)]);
        assert!(connection.closed(0) && connection.closed(1));
    }

    #[test]
    fn test_create_existing_key_fails() {
        let connection = MockConnection::new();
        connection.respond(Response::rows(vec![vec![("x", Value::from("x"))]]));
        let service = EntityService::with_defaults(&connection);

        let err = service
            .create(&users(), &record(&[("uid", "alice".into())]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectAlreadyExists);
        assert!(err.to_string().contains("app.users"));
        assert_eq!(connection.statement_count(), 1);
    }

    #[test]
    fn test_create_without_key_skips_existence_check() {
        let connection = MockConnection::new();
        connection.respond(Response::returning(1, vec![vec![("uid", Value::from("g-1"))]]));
        let service = EntityService::with_defaults(&connection);

        service
            .create(&users(), &record(&[("mail", "a@example.com".into())]))
            .unwrap();
        assert_eq!(connection.statement_count(), 1);
        assert!(connection.sql(0).starts_with("INSERT INTO app.users (email_addr)"));
    }

    #[test]
    fn test_create_unknown_alias() {
        let connection = MockConnection::new();
        let service = EntityService::with_defaults(&connection);
        let err = service
            .create(&users(), &record(&[("phone", "1".into())]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AttributeNotFound);
        assert_eq!(connection.statement_count(), 0);
    }

    #[test]
    fn test_read_exactly_one() {
        let connection = MockConnection::new();
        connection.respond(Response::rows(vec![vec![
            ("uid", Value::from("alice")),
            ("mail", Value::from("a@example.com")),
        ]]));
        let service = EntityService::with_defaults(&connection);

        let found = service.read(&users(), Filter::equal("login_id", "alice")).unwrap();
        assert_eq!(found.get("mail"), Some(&Value::from("a@example.com")));
        assert_eq!(
            connection.sql(0),
            "SELECT login_id AS uid,email_addr AS mail,rownum AS rownumber FROM app.users WHERE (login_id = ?)"
        );
    }

    #[test]
    fn test_read_none_and_many() {
        let connection = MockConnection::new();
        connection.respond(empty());
        let row = vec![("uid", Value::from("a")), ("mail", Value::Null)];
        connection.respond(Response::rows(vec![row.clone(), row]));
        let service = EntityService::with_defaults(&connection);

        let missing = service.read(&users(), Filter::equal("login_id", "a")).unwrap_err();
        assert_eq!(missing.code(), ErrorCode::ObjectNotExists);
        let ambiguous = service.read(&users(), Filter::equal("login_id", "a")).unwrap_err();
        assert_eq!(ambiguous.code(), ErrorCode::ObjectAmbiguous);
    }

    #[test]
    fn test_update_strict_from_config() {
        let connection = MockConnection::new();
        let config = DatabaseConfig {
            strict: true,
            ..DatabaseConfig::default()
        };
        let service = EntityService::new(&connection, &config);

        let err = service
            .update(
                &users(),
                Filter::equal("login_id", "alice"),
                &record(&[("password", "s3cret".into())]),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectNotModified);
        assert!(err.to_string().contains("pwd=********"));
        assert!(!err.to_string().contains("s3cret"));
        assert!(connection.closed(0));
    }

    #[test]
    fn test_update_lenient_by_default() {
        let connection = MockConnection::new();
        let service = EntityService::with_defaults(&connection);
        let affected = service
            .update(&users(), Filter::equal("login_id", "x"), &record(&[("mail", Value::Null)]))
            .unwrap();
        assert_eq!(affected, 0);
        assert_eq!(connection.binds(0)[0], Bind::Null(1, SqlType::Varchar));
        assert_eq!(connection.statements()[0].timeout, Some(Some(Duration::from_secs(20))));
    }

    #[test]
    fn test_delete() {
        let connection = MockConnection::new();
        connection.respond(Response::Affected(2));
        let service = EntityService::with_defaults(&connection);
        let deleted = service.delete(&users(), Filter::starts_with("email_addr", "old")).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(connection.sql(0), "DELETE FROM app.users WHERE (email_addr LIKE ?)");
        assert_eq!(connection.binds(0), vec![Bind::String(1, "old%".to_string())]);
    }

    #[test]
    fn test_paginated_search_appends_window() {
        let connection = MockConnection::new();
        let service = EntityService::with_defaults(&connection);
        let records = service
            .search(
                &users(),
                None,
                Some(Sort::by("login_id", Direction::Ascending)),
                Some(Page::new(11, 20)),
            )
            .unwrap();
        assert!(records.is_empty());
        assert!(connection.sql(0).ends_with("WHERE rownumber BETWEEN ? AND ?"));
        assert_eq!(
            connection.binds(0),
            vec![Bind::Long(1, 11), Bind::Long(2, 20)]
        );
    }

    #[test]
    fn test_count() {
        let connection = MockConnection::new();
        connection.respond(Response::rows(vec![vec![("rs", Value::Long(7))]]));
        let service = EntityService::with_defaults(&connection);
        assert_eq!(service.count(&users(), None).unwrap(), 7);
        assert_eq!(connection.sql(0), "SELECT COUNT(login_id) AS rs FROM app.users");
    }

    #[test]
    fn test_vendor_failure_is_normalized() {
        let connection = MockConnection::new();
        connection.respond(Response::vendor("ORA-00942", "table or view does not exist"));
        let service = EntityService::with_defaults(&connection);
        let err = service.count(&users(), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert!(connection.closed(0));
    }

    #[test]
    fn test_commit_and_rollback() {
        let connection = MockConnection::new();
        let service = EntityService::with_defaults(&connection);
        service.commit().unwrap();
        service.rollback().unwrap();
        assert_eq!((connection.commits(), connection.rollbacks()), (1, 1));
    }
}
