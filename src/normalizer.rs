//! Vendor error normalization.
//!
//! Each driver ships a flat `vendor code = DBS-nnnnn` table. [`ErrorCatalog`]
//! loads a table the first time its driver reports a failure and keeps it for
//! the lifetime of the catalog. Connection failures are classified separately
//! by [`classify_connect`], which inspects the error's cause chain.

use crate::error::{ConnectivityKind, DbsError, ErrorCode};
use crate::executor::DriverError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

const ORACLE_TABLE: &str = include_str!("../resources/errors/oracle.jdbc.properties");
const POSTGRES_TABLE: &str = include_str!("../resources/errors/may_postgres.properties");

static GLOBAL: Lazy<Arc<ErrorCatalog>> = Lazy::new(|| Arc::new(ErrorCatalog::bundled()));

/// Parse `key = value` lines. Blank lines and lines starting with `#` or `!`
/// are skipped; `:` is accepted as a separator as well.
pub fn parse_table(text: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line.find(['=', ':']);
        if let Some(index) = split {
            let key = line[..index].trim();
            let value = line[index + 1..].trim();
            if !key.is_empty() {
                table.insert(key.to_string(), value.to_string());
            }
        }
    }
    table
}

/// Source of vendor error tables, keyed by driver identity.
pub trait TableLoader: Send + Sync {
    /// Raw table text for `driver`; `Ok(None)` when the driver has no table.
    fn load(&self, driver: &str) -> Result<Option<String>, DbsError>;
}

/// Tables compiled into the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledTables;

impl TableLoader for BundledTables {
    fn load(&self, driver: &str) -> Result<Option<String>, DbsError> {
        let text = match driver {
            "oracle.jdbc" => Some(ORACLE_TABLE),
            "may_postgres" => Some(POSTGRES_TABLE),
            _ => None,
        };
        Ok(text.map(str::to_string))
    }
}

/// Tables read from `<dir>/<driver>.properties`, falling back to the bundled
/// table when the file does not exist.
#[derive(Debug, Clone)]
pub struct DirectoryTables {
    dir: PathBuf,
}

impl DirectoryTables {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl TableLoader for DirectoryTables {
    fn load(&self, driver: &str) -> Result<Option<String>, DbsError> {
        let path = self.dir.join(format!("{driver}.properties"));
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BundledTables.load(driver),
            Err(err) => Err(DbsError::Configuration(format!(
                "error table {} could not be read: {err}",
                path.display()
            ))),
        }
    }
}

/// Per-driver cache of vendor error tables.
pub struct ErrorCatalog {
    loader: Box<dyn TableLoader>,
    tables: RwLock<HashMap<String, Arc<HashMap<String, String>>>>,
}

impl ErrorCatalog {
    pub fn new(loader: impl TableLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn bundled() -> Self {
        Self::new(BundledTables)
    }

    pub fn with_directory(dir: impl AsRef<Path>) -> Self {
        Self::new(DirectoryTables::new(dir))
    }

    /// Process-wide catalog over the bundled tables.
    pub fn global() -> Arc<ErrorCatalog> {
        Arc::clone(&GLOBAL)
    }

    /// Table for `driver`, loading it on first use.
    ///
    /// Two threads may both miss and load the same table; the second insert
    /// simply replaces an identical map. A load failure is logged and treated
    /// as an empty table without caching, so a later call retries.
    pub fn table(&self, driver: &str) -> Arc<HashMap<String, String>> {
        {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(table) = tables.get(driver) {
                return Arc::clone(table);
            }
        }

        let table = match self.loader.load(driver) {
            Ok(Some(text)) => Arc::new(parse_table(&text)),
            Ok(None) => {
                log::debug!("no error table for driver {driver}");
                Arc::new(HashMap::new())
            }
            Err(err) => {
                log::warn!("failed to load error table for {driver}: {err}");
                return Arc::new(HashMap::new());
            }
        };

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(driver.to_string(), Arc::clone(&table));
        table
    }

    /// Map a driver error onto an internal code.
    ///
    /// `context` becomes the error's parameters. Errors without a vendor code,
    /// without a table entry, or whose entry is not a known `DBS-` code come
    /// back as [`DbsError::Unhandled`] wrapping the original.
    pub fn normalize(&self, err: DriverError, context: &[String]) -> DbsError {
        let mapped = err
            .vendor_code()
            .map(normalize_vendor_code)
            .and_then(|code| self.table(err.driver()).get(&code).cloned());

        match mapped.map(|value| value.parse::<ErrorCode>()) {
            Some(Ok(code)) => DbsError::Vendor {
                code,
                parameters: context.to_vec(),
                source: err,
            },
            Some(Err(reason)) => {
                log::warn!("error table for {} maps to {reason}", err.driver());
                unhandled(err)
            }
            None => unhandled(err),
        }
    }
}

impl std::fmt::Debug for ErrorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ErrorCatalog")
            .field("drivers", &tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Numeric vendor codes are looked up without leading zeros, so `ORA-00001`,
/// `00001` and `1` all hit the same entry.
fn normalize_vendor_code(code: &str) -> String {
    let code = code.trim();
    let digits = code.strip_prefix("ORA-").unwrap_or(code);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    } else {
        code.to_string()
    }
}

fn unhandled(err: DriverError) -> DbsError {
    DbsError::Unhandled {
        message: err.to_string(),
        source: Some(Box::new(err)),
    }
}

/// Recognise a connection failure shape anywhere in `err`'s cause chain.
///
/// The root cause is inspected first. For each link an `io::Error` kind wins
/// over the message text.
pub fn classify_connect(err: &(dyn Error + 'static)) -> Option<ConnectivityKind> {
    let mut chain = Vec::new();
    let mut current = Some(err);
    while let Some(link) = current {
        chain.push(link);
        current = link.source();
    }

    chain.iter().rev().find_map(|link| {
        link.downcast_ref::<io::Error>()
            .and_then(|io| classify_io(io.kind()))
            .or_else(|| classify_message(&link.to_string()))
    })
}

fn classify_io(kind: io::ErrorKind) -> Option<ConnectivityKind> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(ConnectivityKind::Refused),
        io::ErrorKind::TimedOut => Some(ConnectivityKind::TimedOut),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => Some(ConnectivityKind::Socket),
        _ => None,
    }
}

fn classify_message(message: &str) -> Option<ConnectivityKind> {
    let message = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has(&[
        "failed to lookup address",
        "name or service not known",
        "unknown host",
        "no such host",
        "nodename nor servname",
    ]) {
        Some(ConnectivityKind::UnknownHost)
    } else if has(&["connection refused"]) {
        Some(ConnectivityKind::Refused)
    } else if has(&["certificate", "pkix path"]) {
        Some(ConnectivityKind::CertificatePath)
    } else if has(&["handshake", "tls", "ssl"]) {
        Some(ConnectivityKind::TlsHandshake)
    } else if has(&["timed out", "timeout"]) {
        Some(ConnectivityKind::TimedOut)
    } else if has(&["connection reset", "broken pipe", "socket"]) {
        Some(ConnectivityKind::Socket)
    } else {
        None
    }
}

/// Classify a failure to connect to `target`.
pub fn connect_failure(err: DriverError, target: &str) -> DbsError {
    match classify_connect(&err) {
        Some(kind) => DbsError::Connectivity {
            kind,
            target: target.to_string(),
            source: err,
        },
        None => unhandled(err),
    }
}
