//! Connection acquisition.
//!
//! The connector never pools connections. A [`ConnectionProvider`] opens one;
//! [`acquire`] retries recoverable connectivity failures (refused, socket,
//! timed out) with a fixed pause between attempts and gives up immediately on
//! anything else.

use crate::config::DatabaseConfig;
use crate::error::DbsError;
use crate::executor::{Connection, DriverError};
use crate::normalizer;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Opens new connections to one database.
pub trait ConnectionProvider {
    /// Where connections go, for diagnostics (never includes credentials).
    fn target(&self) -> String;

    fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;
}

/// How often and how patiently to retry connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// `attempts` counts every try including the first; 0 is treated as 1.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Open a connection, retrying recoverable failures.
///
/// # Errors
///
/// The classified error of the last attempt: a connectivity error when the
/// failure shape is recognised, otherwise an unhandled error wrapping the
/// driver's.
pub fn acquire(
    provider: &dyn ConnectionProvider,
    policy: RetryPolicy,
) -> Result<Box<dyn Connection>, DbsError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::acquire_connection_span().entered();

    let target = provider.target();
    let mut attempt = 1;
    loop {
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_connection_attempt();

        let err = match provider.connect() {
            Ok(connection) => {
                log::debug!("connected to {target} on attempt {attempt}");
                return Ok(connection);
            }
            Err(err) => normalizer::connect_failure(err, &target),
        };

        if !err.is_recoverable() || attempt >= policy.attempts() {
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_connection_failure();
            return Err(err);
        }

        log::warn!(
            "attempt {attempt}/{} to connect to {target} failed, retrying in {:?}: {err}",
            policy.attempts(),
            policy.interval()
        );
        if !policy.interval().is_zero() {
            may::coroutine::sleep(policy.interval());
        }
        attempt += 1;
    }
}

/// Acquire a connection as configured and check that it is the driver and
/// dialect the configuration names.
///
/// # Errors
///
/// Whatever [`acquire`] reports under the configured retry policy, or a
/// configuration error when the connection disagrees with the configuration.
pub fn open(
    provider: &dyn ConnectionProvider,
    config: &DatabaseConfig,
) -> Result<Box<dyn Connection>, DbsError> {
    config.validate()?;
    let connection = acquire(provider, config.retry_policy())?;
    if connection.driver() != config.driver || connection.dialect() != config.dialect {
        return Err(DbsError::Configuration(format!(
            "{} is served by {} ({:?}) but configured for {} ({:?})",
            provider.target(),
            connection.driver(),
            connection.dialect(),
            config.driver,
            config.dialect
        )));
    }
    Ok(connection)
}

const URI_SCHEMES: [&str; 2] = ["postgresql://", "postgres://"];

fn strip_scheme(connection_string: &str) -> Option<&str> {
    URI_SCHEMES
        .iter()
        .find_map(|scheme| connection_string.strip_prefix(scheme))
}

/// Check a PostgreSQL connection string before handing it to the driver.
///
/// URI form must name a host, with an optional numeric port:
/// `postgres://[user[:password]@]host[:port][/dbname][?options]`.
/// Key-value form must be whitespace separated `key=value` pairs including
/// `host`.
pub fn validate_connection_string(connection_string: &str) -> Result<(), DbsError> {
    let invalid = |reason: &str| {
        DbsError::Configuration(format!(
            "connection string for {} is invalid: {reason}",
            redact_target(connection_string)
        ))
    };

    if connection_string.trim().is_empty() {
        return Err(invalid("it is empty"));
    }

    if let Some(rest) = strip_scheme(connection_string) {
        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        let (host, port) = match host_port.strip_prefix('[') {
            Some(bracketed) => match bracketed.split_once(']') {
                Some((host, rest)) => (host, rest.strip_prefix(':')),
                None => return Err(invalid("unclosed `[` around the host")),
            },
            None => match host_port.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            },
        };
        if host.is_empty() {
            return Err(invalid("no host"));
        }
        if let Some(port) = port {
            if port.parse::<u16>().is_err() {
                return Err(invalid("port is not a number between 0 and 65535"));
            }
        }
        return Ok(());
    }

    if connection_string.contains("://") {
        return Err(invalid("scheme must be postgres:// or postgresql://"));
    }

    let mut has_host = false;
    for field in connection_string.split_whitespace() {
        match field.split_once('=') {
            Some((key, _)) if !key.is_empty() => has_host |= key == "host" || key == "hostaddr",
            _ => return Err(invalid("expected key=value pairs")),
        }
    }
    if !has_host {
        return Err(invalid("no host"));
    }
    Ok(())
}

/// Host part of a connection string with credentials and options removed.
pub fn redact_target(connection_string: &str) -> String {
    if let Some(rest) = strip_scheme(connection_string) {
        let rest = rest.split('?').next().unwrap_or_default();
        let host = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
        return host.to_string();
    }

    let fields: Vec<&str> = connection_string
        .split_whitespace()
        .filter(|field| field.starts_with("host=") || field.starts_with("port=") || field.starts_with("dbname="))
        .collect();
    fields.join(" ")
}
