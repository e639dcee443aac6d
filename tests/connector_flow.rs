//! End-to-end flows over the scripted driver: schema → translator →
//! statement → executor, in both dialects.

use dbs_connector::executor::Record;
use dbs_connector::filter::{Direction, Filter, Operator, Sort};
use dbs_connector::schema::Schema;
use dbs_connector::service::{EntityService, Page};
use dbs_connector::statement::builder::{prepare_search, Binding};
use dbs_connector::statement::dialect::Dialect;
use dbs_connector::statement::{Operation, Statement};
use dbs_connector::test_helpers::{Bind, MockConnection, Response};
use dbs_connector::translator::FilterTranslator;
use dbs_connector::{DatabaseConfig, ErrorCode, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = r#"{
    "entities": [{
        "schema": "idm",
        "name": "accounts",
        "primary": ["uid"],
        "attributes": [
            { "name": "acct_id", "alias": "uid", "required": true },
            { "name": "full_name", "alias": "name" },
            { "name": "is_active", "alias": "enabled", "type": "boolean" },
            { "name": "secret", "alias": "password", "hidden": true },
            { "name": "mail", "alias": "mail" },
            { "name": "logins", "alias": "logins", "type": "long" }
        ]
    }],
    "classes": [{
        "name": "__ACCOUNT__",
        "entity": "idm.accounts",
        "primary": "uid",
        "secondary": "name",
        "status": "enabled",
        "password": "password"
    }]
}"#;

fn schema() -> Schema {
    Schema::from_json(SCHEMA).unwrap()
}

#[test]
fn test_translated_search_renders_native_columns() {
    let schema = schema();
    let class = schema.require_class("__ACCOUNT__").unwrap();
    let filter = FilterTranslator::new(class)
        .translate_text(r#"__NAME__ sw "Al*" and not (__ENABLE__ eq false)"#)
        .unwrap();

    let connection = MockConnection::new();
    connection.respond(Response::rows(vec![vec![
        ("uid", Value::from("a1")),
        ("name", Value::from("Alice")),
        ("enabled", Value::from("1")),
        ("mail", Value::Null),
        ("logins", Value::Long(3)),
    ]]));
    let service = EntityService::with_defaults(&connection);
    let rows = service.search(class.entity(), Some(filter), None, None).unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("Alice")));
    assert_eq!(
        connection.sql(0),
        "SELECT acct_id AS uid,full_name AS name,is_active AS enabled,mail AS mail,logins AS logins,\
         rownum AS rownumber FROM idm.accounts WHERE ((full_name LIKE ?) AND (is_active != ?))"
    );
    assert_eq!(
        connection.binds(0),
        vec![Bind::String(1, "Al%".to_string()), Bind::String(2, "0".to_string())]
    );
}

#[test]
fn test_postgres_paged_search_and_returning() {
    let schema = schema();
    let accounts = Arc::clone(schema.entity("idm.accounts").unwrap());
    let connection = MockConnection::new()
        .with_dialect(Dialect::PostgreSql)
        .with_driver("may_postgres");
    let service = EntityService::with_defaults(&connection);

    service
        .search(
            &accounts,
            Some(Filter::equal("is_active", true)),
            Some(Sort::by("full_name", Direction::Ascending)),
            Some(Page::new(1, 25)),
        )
        .unwrap();
    assert_eq!(
        connection.sql(0),
        "SELECT * FROM (SELECT acct_id AS uid,full_name AS name,is_active AS enabled,mail AS mail,\
         logins AS logins,row_number() OVER (ORDER BY full_name ASC) AS rownumber FROM idm.accounts \
         WHERE (is_active = $1) ORDER BY full_name ASC) AS page WHERE rownumber BETWEEN $2 AND $3"
    );
    assert_eq!(
        connection.binds(0),
        vec![Bind::Boolean(1, true), Bind::Long(2, 1), Bind::Long(3, 25)]
    );

    connection.respond(Response::rows::<&str>(Vec::new()));
    connection.respond(Response::rows(vec![vec![("uid", Value::from("b2"))]]));
    let mut values = Record::new();
    values.insert("uid", Value::from("b2"));
    values.insert("password", Value::from("hunter2"));
    let outcome = service.create(&accounts, &values).unwrap();
    assert_eq!(outcome.affected(), 1);
    assert_eq!(
        connection.sql(2),
        "INSERT INTO idm.accounts (acct_id,secret) VALUES ($1,$2) RETURNING acct_id AS uid"
    );
}

#[test]
fn test_numeric_membership_binds_numbers_on_postgres() {
    let schema = schema();
    let class = schema.require_class("__ACCOUNT__").unwrap();
    let filter = FilterTranslator::new(class)
        .translate_text("logins in [1, 2] and not (__UID__ in [7])")
        .unwrap();

    let connection = MockConnection::new()
        .with_dialect(Dialect::PostgreSql)
        .with_driver("may_postgres");
    EntityService::with_defaults(&connection)
        .search(class.entity(), Some(filter), None, None)
        .unwrap();

    assert!(connection
        .sql(0)
        .ends_with("WHERE ((logins IN ($1,$2)) AND (acct_id NOT IN ($3)))"));
    assert_eq!(
        connection.binds(0),
        vec![Bind::Long(1, 1), Bind::Long(2, 2), Bind::Long(3, 7)]
    );
}

#[test]
fn test_every_statement_carries_the_timeout_across_transactions() {
    let schema = schema();
    let accounts = Arc::clone(schema.entity("idm.accounts").unwrap());
    let connection = MockConnection::new()
        .with_dialect(Dialect::PostgreSql)
        .with_driver("may_postgres");
    let config = DatabaseConfig {
        query_timeout_seconds: 7,
        ..DatabaseConfig::default()
    };
    let service = EntityService::new(&connection, &config);

    service.count(&accounts, None).unwrap();
    service.rollback().unwrap();
    service.exists(&accounts, Filter::equal("acct_id", "a1")).unwrap();
    service.commit().unwrap();
    service.count(&accounts, None).unwrap();

    let statements = connection.statements();
    assert_eq!(statements.len(), 3);
    for statement in statements {
        assert_eq!(statement.timeout, Some(Some(Duration::from_secs(7))), "{}", statement.sql);
    }
    assert_eq!(connection.rollbacks(), 1);
    assert_eq!(connection.commits(), 1);
}

#[test]
fn test_duplicate_key_from_driver_is_normalized() {
    let schema = schema();
    let accounts = Arc::clone(schema.entity("idm.accounts").unwrap());
    let connection = MockConnection::new()
        .with_dialect(Dialect::PostgreSql)
        .with_driver("may_postgres");
    connection.respond(Response::vendor("23505", "duplicate key value violates unique constraint"));

    let mut statement = Statement::new(Operation::Insert, accounts.clone()).with_binding(vec![
        Binding::new(accounts.lookup("uid").unwrap(), Value::from("c3")),
    ]);
    statement.prepare(&connection).unwrap();
    let err = statement.execute().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ObjectAlreadyExists);
    assert!(connection.closed(0));
}

#[test]
fn test_unknown_class_and_attribute() {
    let schema = schema();
    assert_eq!(
        schema.require_class("__GROUP__").unwrap_err().code(),
        ErrorCode::EntityNotFound
    );
    let class = schema.class("__ACCOUNT__").unwrap();
    let err = FilterTranslator::new(class)
        .translate_text(r#"phone eq "1""#)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AttributeNotFound);
}

const COLUMNS: [&str; 4] = ["acct_id", "full_name", "mail", "logins"];

fn random_leaf(rng: &mut StdRng) -> Filter {
    let column = COLUMNS[rng.gen_range(0..COLUMNS.len())];
    match rng.gen_range(0..7) {
        0 => Filter::equal(column, format!("v{}", rng.gen_range(0..100))),
        1 => Filter::compare(column, Operator::GreaterEqual, Value::Long(rng.gen_range(-5..5))),
        2 => Filter::contains(column, "x?y"),
        3 => Filter::is_null(column),
        4 => Filter::is_not_null(column),
        5 => {
            let n = rng.gen_range(1..5);
            Filter::in_list(column, (0..n).map(|i| format!("m{i}")))
        }
        _ => Filter::not_in_list(column, vec![Value::Long(1), Value::Null]),
    }
}

fn random_filter(rng: &mut StdRng, depth: u32) -> Filter {
    if depth == 0 || rng.gen_bool(0.3) {
        return random_leaf(rng);
    }
    let lhs = random_filter(rng, depth - 1);
    let rhs = random_filter(rng, depth - 1);
    if rng.gen_bool(0.5) {
        Filter::and(lhs, rhs)
    } else {
        Filter::or(lhs, rhs)
    }
}

#[test]
fn test_placeholders_match_parameters_for_random_filters() {
    let schema = schema();
    let accounts = Arc::clone(schema.entity("idm.accounts").unwrap());
    let returning: Vec<_> = accounts.returning();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let filter = random_filter(&mut rng, 4);

        let mut parameters = Vec::new();
        let sql = prepare_search(
            Dialect::Oracle,
            &accounts,
            Some(&filter),
            None,
            &returning,
            &mut parameters,
        )
        .unwrap();
        assert_eq!(
            sql.matches('?').count(),
            parameters.len() + 2,
            "{sql} for {filter}"
        );

        let connection = MockConnection::new().with_dialect(Dialect::PostgreSql);
        let mut statement = Statement::new(Operation::Count, accounts.clone()).with_filter(filter);
        let bound = statement.prepare(&connection).unwrap();
        let native = connection.sql(0);
        assert!(!native.contains('?'), "{native}");
        if !bound.is_empty() {
            let last = format!("${}", bound.len());
            assert!(native.contains(&last), "{native} lacks {last}");
            assert!(!native.contains(&format!("${}", bound.len() + 1)));
        }
    }
}
