//! Error types for sqldao operations.
//!
//! Two layers live here. [`DriverError`] is what a native client reports:
//! a server error packet, a broken socket, a malformed packet. [`Error`] is
//! the classified form handed to callers, with a public-safe message kept
//! apart from the internal diagnostic text.

use std::fmt;

/// Native MySQL error codes the engine classifies on.
pub mod codes {
    /// Can't write; duplicate key in table
    pub const ER_DUP_KEY: u16 = 1022;
    /// Duplicate entry for key
    pub const ER_DUP_ENTRY: u16 = 1062;
    /// Duplicate entry for key (with key name)
    pub const ER_DUP_ENTRY_WITH_KEY_NAME: u16 = 1586;
    /// Lock wait timeout exceeded
    pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
    /// Deadlock found when trying to get lock
    pub const ER_LOCK_DEADLOCK: u16 = 1213;
    /// Server shutdown in progress
    pub const ER_SERVER_SHUTDOWN: u16 = 1053;
    /// Connection was killed
    pub const ER_CONNECTION_KILLED: u16 = 1927;
    /// Client was disconnected by the server because of inactivity
    pub const ER_CLIENT_INTERACTION_TIMEOUT: u16 = 4031;
    /// Access denied for user
    pub const ER_ACCESS_DENIED: u16 = 1045;
    /// Can't connect to local MySQL server through socket
    pub const CR_CONNECTION_ERROR: u16 = 2002;
    /// Can't connect to MySQL server on host
    pub const CR_CONN_HOST_ERROR: u16 = 2003;
    /// MySQL server has gone away
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    /// Lost connection to MySQL server during query
    pub const CR_SERVER_LOST: u16 = 2013;
    /// SSL connection error
    pub const CR_SSL_CONNECTION_ERROR: u16 = 2026;
}

/// A failure reported by a native database client.
#[derive(Debug)]
pub enum DriverError {
    /// The server answered with an error packet
    Server(ServerError),
    /// Socket-level failures (connect, disconnect, TLS)
    Connection(ConnectionError),
    /// Wire-level protocol violations
    Protocol(ProtocolError),
    /// A feature the client cannot provide
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    /// Client error code (`CR_*`), or the server code for auth failures
    pub code: u16,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// SSL/TLS negotiation failed
    Ssl,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServerError {
    /// Unique or primary key violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self.code,
            codes::ER_DUP_ENTRY | codes::ER_DUP_ENTRY_WITH_KEY_NAME | codes::ER_DUP_KEY
        )
    }

    /// Deadlock or lock wait timeout; the statement may succeed if re-run.
    pub fn is_deadlock(&self) -> bool {
        matches!(
            self.code,
            codes::ER_LOCK_DEADLOCK | codes::ER_LOCK_WAIT_TIMEOUT
        )
    }

    /// The server ended the session.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.code,
            codes::CR_SERVER_GONE_ERROR
                | codes::CR_SERVER_LOST
                | codes::ER_CONNECTION_KILLED
                | codes::ER_CLIENT_INTERACTION_TIMEOUT
                | codes::ER_SERVER_SHUTDOWN
        )
    }
}

impl DriverError {
    /// Native error code, 0 when the failure has none.
    pub fn code(&self) -> u16 {
        match self {
            DriverError::Server(e) => e.code,
            DriverError::Connection(e) => e.code,
            DriverError::Protocol(_) | DriverError::Unsupported(_) => 0,
        }
    }

    /// Native error message.
    pub fn message(&self) -> &str {
        match self {
            DriverError::Server(e) => &e.message,
            DriverError::Connection(e) => &e.message,
            DriverError::Protocol(e) => &e.message,
            DriverError::Unsupported(msg) => msg,
        }
    }

    /// Is the session unusable until it is re-established?
    pub fn is_connection_lost(&self) -> bool {
        match self {
            DriverError::Server(e) => e.is_connection_lost(),
            DriverError::Connection(e) => e.kind == ConnectionErrorKind::Disconnected,
            _ => false,
        }
    }

    /// Build a `Disconnected` error from a failed socket read.
    pub fn lost_on_read(err: std::io::Error) -> Self {
        DriverError::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            code: codes::CR_SERVER_LOST,
            message: format!("Lost connection to MySQL server during query: {}", err),
            source: Some(Box::new(err)),
        })
    }

    /// Build a `Disconnected` error from a failed socket write.
    pub fn lost_on_write(err: std::io::Error) -> Self {
        DriverError::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            code: codes::CR_SERVER_GONE_ERROR,
            message: format!("MySQL server has gone away: {}", err),
            source: Some(Box::new(err)),
        })
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Server(e) => write!(f, "Server error: {}", e),
            DriverError::Connection(e) => write!(f, "Connection error: {}", e),
            DriverError::Protocol(e) => write!(f, "Protocol error: {}", e),
            DriverError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            DriverError::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, SQLSTATE {})", self.message, self.code, self.sqlstate)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::Server(err)
    }
}

impl From<ConnectionError> for DriverError {
    fn from(err: ConnectionError) -> Self {
        DriverError::Connection(err)
    }
}

impl From<ProtocolError> for DriverError {
    fn from(err: ProtocolError) -> Self {
        DriverError::Protocol(err)
    }
}

/// Result type alias for native client operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Public message of [`ErrorKind::ConnectionEmpty`].
pub const CONNECTION_IS_EMPTY_MSG: &str = "connection-is-empty";
/// Public message of [`ErrorKind::ConnectFailure`] raised by a native connect.
pub const CONNECT_FAILURE_MSG: &str = "connect-failure";
/// Public message of [`ErrorKind::Unknown`].
pub const UNKNOWN_MSG: &str = "unknown";
/// Public message of [`ErrorKind::SizeMismatch`].
pub const SIZE_MISMATCH_MSG: &str = "size-mismatch";

/// The classified failure kinds surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No DSN candidates were supplied
    ConnectionEmpty,
    /// DSN malformed or the native connect failed
    ConnectFailure,
    /// Unique constraint violation
    DuplicateKey,
    /// Deadlock or lock wait timeout after the retry budget ran out
    Deadlock,
    /// The session is gone; call `reconnect()` before retrying
    ConnectionLost,
    /// Statement preparation failed
    PrepareFailure,
    /// Parameter binding failed
    BindFailure,
    /// Bulk insert value count does not fit the column count
    SizeMismatch,
    /// Any other server error
    Generic,
    /// A failure that did not come from the server
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionEmpty => "connection-empty",
            ErrorKind::ConnectFailure => "connect-failure",
            ErrorKind::DuplicateKey => "duplicate-key",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::ConnectionLost => "connection-lost",
            ErrorKind::PrepareFailure => "prepare-failure",
            ErrorKind::BindFailure => "bind-failure",
            ErrorKind::SizeMismatch => "size-mismatch",
            ErrorKind::Generic => "generic",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified engine error.
///
/// `message()` is short and safe to show to end users. `text()` is the
/// internal diagnostic, which usually embeds the SQL that failed.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    text: String,
    code: u16,
    sql: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create an error whose internal text equals its public message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            text: message.clone(),
            message,
            code: 0,
            sql: None,
            source: None,
        }
    }

    /// Set the internal diagnostic text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the native error code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Attach the SQL that was being executed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// No DSN was configured.
    pub fn connection_empty() -> Self {
        Self::new(ErrorKind::ConnectionEmpty, CONNECTION_IS_EMPTY_MSG)
    }

    /// Flat bulk-insert values cannot be split into rows.
    pub fn size_mismatch(columns: usize, values: usize) -> Self {
        Self::new(ErrorKind::SizeMismatch, SIZE_MISMATCH_MSG).with_text(format!(
            "{} values cannot be split into rows of {} columns",
            values, columns
        ))
    }

    /// A failure that did not come from the database server.
    pub fn unknown(text: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, UNKNOWN_MSG).with_text(text)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Public-safe message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Internal diagnostic text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Native error code, 0 when there is none.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Only deadlocks are worth re-running in-process.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Deadlock
    }

    /// Does recovery require a new session?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionLost | ErrorKind::ConnectFailure | ErrorKind::ConnectionEmpty
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias for sqldao operations.
pub type Result<T> = std::result::Result<T, Error>;
