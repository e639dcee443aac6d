//! # dbs-connector
//!
//! Relational database access layer for identity provisioning on the `may`
//! runtime.
//!
//! Entities and object classes come from a [`schema::Schema`]; framework
//! filters are translated into [`filter::Filter`] trees; the
//! [`statement`] module renders them into parameterized SQL for a
//! [`statement::dialect::Dialect`] and runs them through the
//! [`executor::Connection`] driver boundary. Driver failures are normalized
//! into [`error::DbsError`] by the [`normalizer`].

pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod executor;
pub mod filter;
pub mod metrics;
pub mod normalizer;
pub mod parameter;
pub mod postgres;
pub mod schema;
pub mod service;
pub mod statement;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod translator;

pub use config::DatabaseConfig;
pub use entity::{Attribute, AttributeType, Entity};
pub use error::{DbsError, ErrorCode};
pub use filter::{Filter, Operator};
pub use parameter::{Parameter, SqlType, Value};
pub use service::EntityService;
pub use statement::{Operation, Statement};
