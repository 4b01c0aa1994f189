use std::fmt::{Debug, Display};
use std::{fmt, io, result};
use std::net::AddrParseError;
use std::sync::PoisonError;

use strum::Display as StrumDisplay;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

/// The taxonomy of errors that may be surfaced to a connected client, as opposed
/// to the internal IOError/TlsError/etc. variants below which never cross the wire
/// verbatim (they're reported as InternalServerError instead).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ClientErrorKind {
    AuthenticationError,
    ProtocolViolation,
    UnsupportedFeatureError,
    AccessError,
    DisabledCapabilityError,
    TransactionError,
    TransactionSerializationError,
    InvalidCursorName,
    InvalidSqlStatementName,
    DuplicatePreparedStatement,
    InternalServerError,
    CannotConnectNow,
}

/// Mirrors the PostgreSQL notion of error/notice severity. Used by both wire
/// protocols to choose the response message kind and the `S`/`V` fields.
#[derive(StrumDisplay, Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Log,
    Info,
    Debug,
    Notice,
    Warning,
    Error,
    Panic,
    Fatal,
}

impl Default for ErrorSeverity {
    fn default() -> Self {
        ErrorSeverity::Error
    }
}

impl ErrorSeverity {
    /// The uppercase spelling PostgreSQL wire error/notice fields expect.
    pub fn as_pg_str(&self) -> &'static str {
        match *self {
            ErrorSeverity::Log => "LOG",
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Debug => "DEBUG",
            ErrorSeverity::Notice => "NOTICE",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Panic => "PANIC",
            ErrorSeverity::Fatal => "FATAL",
        }
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    LowMemoryError,
    TooBusyError,
    Timeout,
    PoisonError,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    JSONError(String),
    TlsError(rustls::Error),
    UTF8Error(std::str::Utf8Error),
    ArrayFromSliceError(std::array::TryFromSliceError),
    /// A client-facing error with its taxonomy tag and opaque display message.
    Client(ClientErrorKind, String),
    /// A PostgreSQL backend error passed through verbatim, carrying its SQLSTATE code.
    Backend { code: &'static str, message: String },
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn low_mem() -> Self {
        Error { err: Box::new(ErrorKind::LowMemoryError) }
    }

    pub fn too_busy() -> Self {
        Error { err: Box::new(ErrorKind::TooBusyError) }
    }

    pub fn closed() -> Self {
        Error { err: Box::new(ErrorKind::ClosedError) }
    }

    pub fn client<S: ToString>(kind: ClientErrorKind, msg: S) -> Self {
        Error { err: Box::new(ErrorKind::Client(kind, msg.to_string())) }
    }

    /// The single opaque message used for every authentication failure reason,
    /// so wrong-password, unknown-user, and malformed-token cannot be told apart.
    pub fn authentication_failed() -> Self {
        Self::client(ClientErrorKind::AuthenticationError, "authentication failed")
    }

    pub fn protocol_violation<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::ProtocolViolation, msg)
    }

    pub fn unsupported_feature<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::UnsupportedFeatureError, msg)
    }

    pub fn access_error<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::AccessError, msg)
    }

    pub fn disabled_capability<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::DisabledCapabilityError, msg)
    }

    pub fn transaction_error<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::TransactionError, msg)
    }

    pub fn invalid_cursor_name(name: &str) -> Self {
        Self::client(ClientErrorKind::InvalidCursorName, format!("cursor \"{}\" does not exist", name))
    }

    pub fn invalid_sql_statement_name(name: &str) -> Self {
        Self::client(ClientErrorKind::InvalidSqlStatementName, format!("prepared statement \"{}\" does not exist", name))
    }

    pub fn duplicate_prepared_statement(name: &str) -> Self {
        Self::client(ClientErrorKind::DuplicatePreparedStatement, format!("prepared statement \"{}\" already exists", name))
    }

    pub fn internal<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::InternalServerError, msg)
    }

    pub fn cannot_connect_now<S: ToString>(msg: S) -> Self {
        Self::client(ClientErrorKind::CannotConnectNow, msg)
    }

    pub fn backend(code: &'static str, message: String) -> Self {
        Error { err: Box::new(ErrorKind::Backend { code, message }) }
    }

    /// Recover an `io::Error` suitable for bridging into `std::io::Read`/`Write`
    /// impls (e.g. feeding rustls's `read_tls`/`write_tls`), preserving
    /// `WouldBlock` so non-blocking callers can distinguish it from a real failure.
    pub fn into_io_error(self) -> io::Error {
        match *self.err {
            ErrorKind::IOError(e) => e,
            ErrorKind::ClosedError => io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// The taxonomy tag to report to the client, if this is a client-facing error.
    /// Internal errors (IO, TLS, poison, etc.) are always reported as InternalServerError,
    /// their real detail goes to the log only.
    pub fn client_kind(&self) -> ClientErrorKind {
        match &*self.err {
            ErrorKind::Client(k, _) => *k,
            ErrorKind::Backend { .. } => ClientErrorKind::InternalServerError,
            _ => ClientErrorKind::InternalServerError,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match &*self.err {
            ErrorKind::Client(ClientErrorKind::CannotConnectNow, _) => ErrorSeverity::Fatal,
            ErrorKind::Client(ClientErrorKind::AuthenticationError, _) => ErrorSeverity::Fatal,
            ErrorKind::ClosedError | ErrorKind::IOError(_) | ErrorKind::TlsError(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }

    /// The SQLSTATE code to report on the wire for this error.
    pub fn sqlstate(&self) -> &'static str {
        use crate::riverfront::pg::protocol::error_codes as sqlstate;
        match &*self.err {
            ErrorKind::Backend { code, .. } => code,
            ErrorKind::Client(k, _) => match k {
                ClientErrorKind::AuthenticationError => sqlstate::INVALID_PASSWORD,
                ClientErrorKind::ProtocolViolation => sqlstate::PROTOCOL_VIOLATION,
                ClientErrorKind::UnsupportedFeatureError => sqlstate::FEATURE_NOT_SUPPORTED,
                ClientErrorKind::AccessError => sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
                ClientErrorKind::DisabledCapabilityError => sqlstate::INSUFFICIENT_PRIVILEGE,
                ClientErrorKind::TransactionError => sqlstate::IN_FAILED_SQL_TRANSACTION,
                ClientErrorKind::TransactionSerializationError => sqlstate::SERIALIZATION_FAILURE,
                ClientErrorKind::InvalidCursorName => sqlstate::INVALID_CURSOR_NAME,
                ClientErrorKind::InvalidSqlStatementName => sqlstate::INVALID_SQL_STATEMENT_NAME,
                ClientErrorKind::DuplicatePreparedStatement => sqlstate::DUPLICATE_PREPARED_STATEMENT,
                ClientErrorKind::InternalServerError => sqlstate::INTERNAL_ERROR,
                ClientErrorKind::CannotConnectNow => sqlstate::CANNOT_CONNECT_NOW,
            },
            _ => sqlstate::INTERNAL_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error { err: Box::new(ErrorKind::StringError(String::from(err))) }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error { err: Box::new(ErrorKind::StringError(err)) }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error { err: Box::new(ErrorKind::IOError(err)) }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error { err: Box::new(ErrorKind::YAMLError(err)) }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error { err: Box::new(ErrorKind::JSONError(err.to_string())) }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error { err: Box::new(ErrorKind::UTF8Error(err)) }
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(err: std::array::TryFromSliceError) -> Self {
        Error { err: Box::new(ErrorKind::ArrayFromSliceError(err)) }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error { err: Box::new(ErrorKind::PoisonError) }
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error { err: Box::new(ErrorKind::TlsError(err)) }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::LowMemoryError => f.write_str("not enough memory to handle this request"),
            ErrorKind::TooBusyError => f.write_str("server is too busy to handle this request"),
            ErrorKind::ClosedError => f.write_str("socket/file is closed"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::JSONError(e) => f.write_str(e),
            ErrorKind::TlsError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::UTF8Error(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::ArrayFromSliceError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::Timeout => f.write_str("operation timed out"),
            ErrorKind::Client(ClientErrorKind::AuthenticationError, _) => f.write_str("authentication failed"),
            ErrorKind::Client(_, msg) => f.write_str(msg),
            ErrorKind::Backend { message, .. } => f.write_str(message),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
