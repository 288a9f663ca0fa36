//! Mapping native failures onto the engine's error taxonomy.

use sqldao_core::error::{CONNECT_FAILURE_MSG, ConnectionErrorKind};
use sqldao_core::{DriverError, Error, ErrorKind};

use crate::dsn::DsnConfig;

/// Which step of a statement the failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Execute,
}

/// Internal diagnostic for a failed statement.
pub fn sql_error_text(sql: &str, native: &str) -> String {
    format!("Error execute sql \"{}\". Msg \"{}\".", sql, native)
}

fn kind_of(err: &DriverError, stage: Stage) -> ErrorKind {
    match err {
        DriverError::Server(e) if e.is_duplicate_key() => ErrorKind::DuplicateKey,
        DriverError::Server(e) if e.is_deadlock() => ErrorKind::Deadlock,
        _ if err.is_connection_lost() => ErrorKind::ConnectionLost,
        DriverError::Server(_) => match stage {
            Stage::Prepare => ErrorKind::PrepareFailure,
            Stage::Execute => ErrorKind::Generic,
        },
        _ => ErrorKind::Unknown,
    }
}

/// Classify a failure raised while running `sql`.
///
/// Server-side failures keep the native message as the public message.
/// Anything the server did not report is `Unknown` with the public message
/// `unknown`.
pub fn classify(err: DriverError, sql: &str, stage: Stage) -> Error {
    let kind = kind_of(&err, stage);
    let public = if kind == ErrorKind::Unknown {
        sqldao_core::error::UNKNOWN_MSG.to_string()
    } else {
        err.message().to_string()
    };
    tracing::debug!(kind = %kind, code = err.code(), error = %err, "statement failed");
    Error::new(kind, public)
        .with_text(sql_error_text(sql, err.message()))
        .with_code(err.code())
        .with_sql(sql)
        .with_source(err)
}

/// A failed native connect for `config`.
///
/// The public message is a fixed tag; user, host and the native message only
/// go into the internal text.
pub fn connect_failure(config: &DsnConfig, err: DriverError) -> Error {
    let text = format!(
        "Error to connect to mysql server {}@{}:{}:{}:{}",
        config.user,
        config.host,
        config.port,
        err.code(),
        err.message()
    );
    let cause = match &err {
        DriverError::Connection(e) if e.kind == ConnectionErrorKind::Authentication => "auth",
        DriverError::Connection(e) if e.kind == ConnectionErrorKind::Ssl => "tls",
        _ => "connect",
    };
    tracing::debug!(host = %config.host, port = config.port, cause, error = %err, "connect failed");
    Error::new(ErrorKind::ConnectFailure, CONNECT_FAILURE_MSG)
        .with_text(text)
        .with_code(err.code())
        .with_source(err)
}
