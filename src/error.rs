//! Error taxonomy for the connector.
//!
//! Every failure surfaced by this crate is a [`DbsError`]. Each variant maps to a
//! stable [`ErrorCode`] so callers can localize and log failures without
//! matching on driver specific messages.

use crate::executor::DriverError;
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every internal error code.
pub const CODE_PREFIX: &str = "DBS-";

/// Stable internal error codes.
///
/// Vendor error tables map driver codes onto these values, so the textual form
/// returned by [`ErrorCode::code`] must never change once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unhandled,
    IllegalState,
    InvalidArgument,
    EntityInvalid,
    SchemaInvalid,
    ConfigurationInvalid,
    TranslationFailed,
    AttributeNotFound,
    SearchConditionFailed,
    UnknownHost,
    ConnectionRefused,
    SocketError,
    ConnectionTimeout,
    SslHandshake,
    CertificatePath,
    SyntaxError,
    StatementTimeout,
    ObjectNotCreated,
    ObjectNotModified,
    ObjectNotDeleted,
    ObjectAlreadyExists,
    ObjectNotExists,
    ObjectAmbiguous,
    PermissionDenied,
    ValueTooLarge,
    MandatoryMissing,
    ReferentialIntegrity,
    ResourceBusy,
    EntityNotFound,
}

impl ErrorCode {
    const ALL: [ErrorCode; 29] = [
        ErrorCode::Unhandled,
        ErrorCode::IllegalState,
        ErrorCode::InvalidArgument,
        ErrorCode::EntityInvalid,
        ErrorCode::SchemaInvalid,
        ErrorCode::ConfigurationInvalid,
        ErrorCode::TranslationFailed,
        ErrorCode::AttributeNotFound,
        ErrorCode::SearchConditionFailed,
        ErrorCode::UnknownHost,
        ErrorCode::ConnectionRefused,
        ErrorCode::SocketError,
        ErrorCode::ConnectionTimeout,
        ErrorCode::SslHandshake,
        ErrorCode::CertificatePath,
        ErrorCode::SyntaxError,
        ErrorCode::StatementTimeout,
        ErrorCode::ObjectNotCreated,
        ErrorCode::ObjectNotModified,
        ErrorCode::ObjectNotDeleted,
        ErrorCode::ObjectAlreadyExists,
        ErrorCode::ObjectNotExists,
        ErrorCode::ObjectAmbiguous,
        ErrorCode::PermissionDenied,
        ErrorCode::ValueTooLarge,
        ErrorCode::MandatoryMissing,
        ErrorCode::ReferentialIntegrity,
        ErrorCode::ResourceBusy,
        ErrorCode::EntityNotFound,
    ];

    /// The stable textual code, e.g. `DBS-00041`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::Unhandled => "DBS-00001",
            ErrorCode::IllegalState => "DBS-00002",
            ErrorCode::InvalidArgument => "DBS-00003",
            ErrorCode::EntityInvalid => "DBS-00021",
            ErrorCode::SchemaInvalid => "DBS-00022",
            ErrorCode::ConfigurationInvalid => "DBS-00023",
            ErrorCode::TranslationFailed => "DBS-00031",
            ErrorCode::AttributeNotFound => "DBS-00032",
            ErrorCode::SearchConditionFailed => "DBS-00041",
            ErrorCode::UnknownHost => "DBS-00101",
            ErrorCode::ConnectionRefused => "DBS-00102",
            ErrorCode::SocketError => "DBS-00103",
            ErrorCode::ConnectionTimeout => "DBS-00104",
            ErrorCode::SslHandshake => "DBS-00105",
            ErrorCode::CertificatePath => "DBS-00106",
            ErrorCode::SyntaxError => "DBS-00201",
            ErrorCode::StatementTimeout => "DBS-00202",
            ErrorCode::ObjectNotCreated => "DBS-00301",
            ErrorCode::ObjectNotModified => "DBS-00302",
            ErrorCode::ObjectNotDeleted => "DBS-00303",
            ErrorCode::ObjectAlreadyExists => "DBS-00304",
            ErrorCode::ObjectNotExists => "DBS-00305",
            ErrorCode::ObjectAmbiguous => "DBS-00306",
            ErrorCode::PermissionDenied => "DBS-00401",
            ErrorCode::ValueTooLarge => "DBS-00402",
            ErrorCode::MandatoryMissing => "DBS-00403",
            ErrorCode::ReferentialIntegrity => "DBS-00404",
            ErrorCode::ResourceBusy => "DBS-00405",
            ErrorCode::EntityNotFound => "DBS-00406",
        }
    }

    /// Message template; `{n}` placeholders are filled from the error parameters.
    pub fn template(&self) -> &'static str {
        match self {
            ErrorCode::Unhandled => "Unhandled exception: {0}",
            ErrorCode::IllegalState => "Illegal state: {0}",
            ErrorCode::InvalidArgument => "Invalid argument: {0}",
            ErrorCode::EntityInvalid => "Entity definition invalid: {0}",
            ErrorCode::SchemaInvalid => "Schema descriptor invalid: {0}",
            ErrorCode::ConfigurationInvalid => "Configuration invalid: {0}",
            ErrorCode::TranslationFailed => "Filter translation failed: {0}",
            ErrorCode::AttributeNotFound => "Attribute {0} not found in {1}",
            ErrorCode::SearchConditionFailed => "Search condition {0} cannot be rendered",
            ErrorCode::UnknownHost => "Host {0} is unknown",
            ErrorCode::ConnectionRefused => "Connection refused by {0}",
            ErrorCode::SocketError => "Socket error talking to {0}",
            ErrorCode::ConnectionTimeout => "Connection to {0} timed out",
            ErrorCode::SslHandshake => "TLS handshake with {0} failed",
            ErrorCode::CertificatePath => "Certificate path to {0} could not be validated",
            ErrorCode::SyntaxError => "Syntax error in statement {0}",
            ErrorCode::StatementTimeout => "Statement {0} exceeded its timeout",
            ErrorCode::ObjectNotCreated => "Object {0} not created in {1}",
            ErrorCode::ObjectNotModified => "Object {0} not modified in {1}",
            ErrorCode::ObjectNotDeleted => "Object {0} not deleted in {1}",
            ErrorCode::ObjectAlreadyExists => "Object {0} already exists in {1}",
            ErrorCode::ObjectNotExists => "Object {0} does not exist in {1}",
            ErrorCode::ObjectAmbiguous => "Object {0} is ambiguous in {1}",
            ErrorCode::PermissionDenied => "Permission denied on {0}",
            ErrorCode::ValueTooLarge => "Value too large for {0}",
            ErrorCode::MandatoryMissing => "Mandatory value missing for {0}",
            ErrorCode::ReferentialIntegrity => "Referential integrity violated on {0}",
            ErrorCode::ResourceBusy => "Resource {0} is busy",
            ErrorCode::EntityNotFound => "Entity {0} not found",
        }
    }

    /// Render the template with the given parameters.
    ///
    /// Missing parameters render as an empty string rather than leaking the
    /// placeholder into user-visible text.
    pub fn format(&self, parameters: &[String]) -> String {
        let mut message = self.template().to_string();
        for index in 0..4 {
            let placeholder = format!("{{{index}}}");
            if message.contains(&placeholder) {
                let value = parameters.get(index).map(String::as_str).unwrap_or("");
                message = message.replace(&placeholder, value);
            }
        }
        message
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidate = s.trim();
        if !candidate.starts_with(CODE_PREFIX) {
            return Err(format!("{candidate} is outside the {CODE_PREFIX} namespace"));
        }
        ErrorCode::ALL
            .iter()
            .find(|code| code.code() == candidate)
            .copied()
            .ok_or_else(|| format!("{candidate} is not a known error code"))
    }
}

/// Connectivity failure shapes recognised while establishing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityKind {
    UnknownHost,
    Refused,
    Socket,
    TimedOut,
    TlsHandshake,
    CertificatePath,
}

impl ConnectivityKind {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectivityKind::UnknownHost => ErrorCode::UnknownHost,
            ConnectivityKind::Refused => ErrorCode::ConnectionRefused,
            ConnectivityKind::Socket => ErrorCode::SocketError,
            ConnectivityKind::TimedOut => ErrorCode::ConnectionTimeout,
            ConnectivityKind::TlsHandshake => ErrorCode::SslHandshake,
            ConnectivityKind::CertificatePath => ErrorCode::CertificatePath,
        }
    }

    /// Failures worth another connection attempt.
    ///
    /// Name resolution and certificate problems do not fix themselves between
    /// attempts; a refused or dropped socket often does.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConnectivityKind::Refused | ConnectivityKind::Socket | ConnectivityKind::TimedOut
        )
    }
}

/// Mutating operation that produced no affected rows in strict mode, or that
/// violated a uniqueness or existence expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFailure {
    NotCreated,
    NotModified,
    NotDeleted,
    AlreadyExists,
    NotExists,
    Ambiguous,
}

impl OperationFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            OperationFailure::NotCreated => ErrorCode::ObjectNotCreated,
            OperationFailure::NotModified => ErrorCode::ObjectNotModified,
            OperationFailure::NotDeleted => ErrorCode::ObjectNotDeleted,
            OperationFailure::AlreadyExists => ErrorCode::ObjectAlreadyExists,
            OperationFailure::NotExists => ErrorCode::ObjectNotExists,
            OperationFailure::Ambiguous => ErrorCode::ObjectAmbiguous,
        }
    }
}

/// Crate error type
#[derive(Debug)]
pub enum DbsError {
    /// Malformed entity, attribute or schema definition
    Construction { code: ErrorCode, message: String },
    /// Configuration could not be loaded or is inconsistent
    Configuration(String),
    /// Operation invoked in a state that does not permit it
    IllegalState(String),
    /// External filter could not be translated
    Translation(String),
    /// A name did not resolve to a native attribute
    AttributeNotFound { attribute: String, entity: String },
    /// Filter tree is structurally invalid for rendering
    SearchCondition(String),
    /// Establishing a connection failed in a recognised way
    Connectivity {
        kind: ConnectivityKind,
        target: String,
        source: DriverError,
    },
    /// Statement text rejected by the driver
    Syntax { statement: String, source: DriverError },
    /// Statement exceeded its deadline
    Timeout { statement: String, source: DriverError },
    /// Strict-mode or uniqueness/existence check failed
    Operation {
        failure: OperationFailure,
        entity: String,
        data: String,
    },
    /// Vendor error code mapped onto an internal code
    Vendor {
        code: ErrorCode,
        parameters: Vec<String>,
        source: DriverError,
    },
    /// Anything that could not be classified
    Unhandled {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DbsError {
    pub fn entity_invalid(message: impl Into<String>) -> Self {
        DbsError::Construction {
            code: ErrorCode::EntityInvalid,
            message: message.into(),
        }
    }

    pub fn schema_invalid(message: impl Into<String>) -> Self {
        DbsError::Construction {
            code: ErrorCode::SchemaInvalid,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        DbsError::Construction {
            code: ErrorCode::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn entity_not_found(id: impl Into<String>) -> Self {
        DbsError::Construction {
            code: ErrorCode::EntityNotFound,
            message: id.into(),
        }
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        DbsError::Unhandled {
            message: message.into(),
            source: None,
        }
    }

    /// The stable internal code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DbsError::Construction { code, .. } => *code,
            DbsError::Configuration(_) => ErrorCode::ConfigurationInvalid,
            DbsError::IllegalState(_) => ErrorCode::IllegalState,
            DbsError::Translation(_) => ErrorCode::TranslationFailed,
            DbsError::AttributeNotFound { .. } => ErrorCode::AttributeNotFound,
            DbsError::SearchCondition(_) => ErrorCode::SearchConditionFailed,
            DbsError::Connectivity { kind, .. } => kind.code(),
            DbsError::Syntax { .. } => ErrorCode::SyntaxError,
            DbsError::Timeout { .. } => ErrorCode::StatementTimeout,
            DbsError::Operation { failure, .. } => failure.code(),
            DbsError::Vendor { code, .. } => *code,
            DbsError::Unhandled { .. } => ErrorCode::Unhandled,
        }
    }

    /// Contextual parameters, in template order.
    pub fn parameters(&self) -> Vec<String> {
        match self {
            DbsError::Construction { message, .. }
            | DbsError::Configuration(message)
            | DbsError::IllegalState(message)
            | DbsError::Translation(message)
            | DbsError::SearchCondition(message)
            | DbsError::Unhandled { message, .. } => vec![message.clone()],
            DbsError::AttributeNotFound { attribute, entity } => {
                vec![attribute.clone(), entity.clone()]
            }
            DbsError::Connectivity { target, .. } => vec![target.clone()],
            DbsError::Syntax { statement, .. } | DbsError::Timeout { statement, .. } => {
                vec![statement.clone()]
            }
            DbsError::Operation { entity, data, .. } => vec![data.clone(), entity.clone()],
            DbsError::Vendor { parameters, .. } => parameters.clone(),
        }
    }

    /// Whether another connection attempt might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DbsError::Connectivity { kind, .. } if kind.is_recoverable())
    }
}

impl fmt::Display for DbsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "[{}] {}", code, code.format(&self.parameters()))?;
        match self {
            DbsError::Connectivity { source, .. }
            | DbsError::Syntax { source, .. }
            | DbsError::Timeout { source, .. }
            | DbsError::Vendor { source, .. } => write!(f, " ({source})"),
            DbsError::Unhandled {
                source: Some(source),
                ..
            } => write!(f, " ({source})"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for DbsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbsError::Connectivity { source, .. }
            | DbsError::Syntax { source, .. }
            | DbsError::Timeout { source, .. }
            | DbsError::Vendor { source, .. } => Some(source),
            DbsError::Unhandled {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for DbsError {
    fn from(err: config::ConfigError) -> Self {
        DbsError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for DbsError {
    fn from(err: serde_json::Error) -> Self {
        DbsError::schema_invalid(err.to_string())
    }
}
