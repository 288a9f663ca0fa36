//! The engine: one logical connection with classified errors and
//! deadlock retry.

use std::fmt;

use rand::RngCore;
use sqldao_core::{Driver, Error, ErrorKind, Result, Row, Value};

use crate::binder::{Param, annotate, bind, bind_error};
use crate::classify::{Stage, classify, sql_error_text};
use crate::cursor::ResultCursor;
use crate::dsn::DsnConfig;
use crate::handle::{ConnectionHandle, Connector, MySqlConnector, NOT_CONNECTED};
use crate::selector::Selector;

/// Per-engine settings.
#[derive(Debug, Default)]
pub struct EngineOptions {
    request_id: String,
    selector: Option<Selector>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag appended to every statement as a trailing SQL comment.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Randomness for choosing among several DSNs.
    pub fn rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.selector = Some(Selector::with_rng(rng));
        self
    }
}

/// Outcome of a statement.
#[derive(Debug)]
pub enum CallResult {
    /// The statement produced no result set.
    NoResult {
        affected_rows: u64,
        last_insert_id: u64,
    },
    /// The statement produced a result set, possibly empty.
    Cursor(ResultCursor),
}

impl CallResult {
    pub fn is_cursor(&self) -> bool {
        matches!(self, CallResult::Cursor(_))
    }

    pub fn into_cursor(self) -> Option<ResultCursor> {
        match self {
            CallResult::Cursor(cursor) => Some(cursor),
            CallResult::NoResult { .. } => None,
        }
    }

    pub fn affected_rows(&self) -> u64 {
        match self {
            CallResult::NoResult { affected_rows, .. } => *affected_rows,
            CallResult::Cursor(cursor) => cursor.affected_rows(),
        }
    }

    /// Generated id; 0 for statements with a result set.
    pub fn last_insert_id(&self) -> u64 {
        match self {
            CallResult::NoResult { last_insert_id, .. } => *last_insert_id,
            CallResult::Cursor(_) => 0,
        }
    }

    /// First row, if any.
    pub fn fetch_one(self) -> Option<Row> {
        self.into_cursor().and_then(|mut cursor| cursor.fetch_one())
    }

    /// All rows; empty for a statement without a result set.
    pub fn fetch_all(self) -> Vec<Row> {
        self.into_cursor()
            .map(|mut cursor| cursor.fetch_all())
            .unwrap_or_default()
    }
}

/// Run one statement on `session`.
///
/// Without values the SQL goes out as-is; with values it is prepared,
/// executed once and closed.
pub(crate) fn run_statement<S: Driver>(
    session: &mut S,
    sql: &str,
    values: Option<&[Value]>,
) -> Result<CallResult> {
    tracing::trace!(sql, "executing");
    let result = match values {
        None => session
            .query(sql)
            .map_err(|e| classify(e, sql, Stage::Execute))?,
        Some(values) => {
            let stmt = session
                .prepare(sql)
                .map_err(|e| classify(e, sql, Stage::Prepare))?;
            if !stmt.validate_params(values) {
                session.close_statement(&stmt);
                return Err(bind_error(format!(
                    "statement expects {} parameters, got {}",
                    stmt.param_count(),
                    values.len()
                ))
                .with_sql(sql));
            }
            let result = session.execute(&stmt, values);
            session.close_statement(&stmt);
            result.map_err(|e| classify(e, sql, Stage::Execute))?
        }
    };
    Ok(match result {
        Some(rows) => CallResult::Cursor(ResultCursor::new(rows, session.affected_rows())),
        None => CallResult::NoResult {
            affected_rows: session.affected_rows(),
            last_insert_id: session.last_insert_id(),
        },
    })
}

/// A logical database connection over one or more named DSNs.
///
/// One DSN is chosen on first use and kept for the life of the value. The
/// native session is opened lazily and closed on drop.
///
/// Deadlocks are retried in place up to the DSN's `deadlock-try-count`.
/// A lost session is reported as [`ErrorKind::ConnectionLost`] and is not
/// re-established until [`reconnect`](Self::reconnect) is called.
pub struct Connection<C: Connector = MySqlConnector> {
    connector: C,
    handles: Vec<ConnectionHandle<C::Session>>,
    selector: Selector,
    active: Option<usize>,
    request_id: String,
}

impl Connection<MySqlConnector> {
    /// Connect to MySQL through the named DSNs. Nothing is dialed yet.
    pub fn new(dsns: &[(&str, &str)]) -> Result<Self> {
        Self::with_connector(MySqlConnector, dsns, EngineOptions::default())
    }

    /// A connection over a single DSN.
    pub fn open(dsn: &str) -> Result<Self> {
        Self::new(&[("main", dsn)])
    }
}

impl<C: Connector> Connection<C> {
    /// Every DSN is parsed up front; a malformed one fails here.
    pub fn with_connector(
        connector: C,
        dsns: &[(&str, &str)],
        options: EngineOptions,
    ) -> Result<Self> {
        let handles = dsns
            .iter()
            .map(|&(name, dsn)| {
                DsnConfig::parse(dsn).map(|config| ConnectionHandle::new(name, config))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            connector,
            handles,
            selector: options.selector.unwrap_or_default(),
            active: None,
            request_id: options.request_id,
        })
    }

    fn active_index(&mut self) -> Result<usize> {
        if let Some(index) = self.active {
            return Ok(index);
        }
        let ready: Vec<bool> = self
            .handles
            .iter()
            .map(ConnectionHandle::is_materialized)
            .collect();
        let index = self.selector.pick(&ready)?;
        tracing::debug!(dsn = %self.handles[index].name(), "selected dsn");
        self.active = Some(index);
        Ok(index)
    }

    /// The native session, connecting on first use.
    pub(crate) fn session(&mut self) -> Result<&mut C::Session> {
        let index = self.active_index()?;
        self.handles[index].session(&self.connector)
    }

    fn active_handle(&self) -> Option<&ConnectionHandle<C::Session>> {
        self.active.and_then(|index| self.handles.get(index))
    }

    pub(crate) fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Run `op` against the session, re-running it after a deadlock.
    ///
    /// The first deadlock of a call grants the DSN's retry budget; the error
    /// is returned once the budget is spent.
    pub(crate) fn with_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut C::Session) -> Result<T>,
    ) -> Result<T> {
        let mut attempts_left: u32 = 1;
        let mut deadlock_seen = false;
        let mut attempt: u32 = 0;
        loop {
            attempts_left -= 1;
            attempt += 1;
            let err = match self.session().and_then(&mut op) {
                Err(err) if err.kind() == ErrorKind::Deadlock => err,
                other => return other,
            };
            if !deadlock_seen {
                deadlock_seen = true;
                let index = self.active_index()?;
                attempts_left += self.handles[index].config().deadlock_retries;
            }
            if attempts_left == 0 {
                return Err(err);
            }
            tracing::warn!(
                attempt,
                remaining = attempts_left,
                code = err.code(),
                error = %err.message(),
                "deadlock, retrying statement"
            );
        }
    }

    /// Run `sql` with named parameters.
    ///
    /// `function` names the caller and, with the request id, is appended to
    /// the SQL as a trailing comment. Without parameters the SQL is sent as
    /// text; with parameters the `:name` placeholders are bound and the
    /// statement is prepared.
    #[tracing::instrument(level = "debug", skip(self, params))]
    pub fn call(
        &mut self,
        sql: &str,
        params: &[(&str, Param)],
        function: &str,
    ) -> Result<CallResult> {
        let (sql, values) = if params.is_empty() {
            (annotate(sql, &self.request_id, function), None)
        } else {
            let bound = bind(sql, params)?;
            (annotate(&bound.sql, &self.request_id, function), Some(bound.values))
        };
        self.with_retry(|session| run_statement(session, &sql, values.as_deref()))
    }

    /// Run a statement that returns no rows; returns the affected row count.
    pub fn execute(&mut self, sql: &str, params: &[(&str, Param)]) -> Result<u64> {
        match self.call(sql, params, "")? {
            CallResult::NoResult { affected_rows, .. } => Ok(affected_rows),
            CallResult::Cursor(_) => Err(Error::unknown(sql_error_text(
                sql,
                "statement returned a result set",
            ))
            .with_sql(sql)),
        }
    }

    fn session_command(
        &mut self,
        label: &str,
        op: impl FnOnce(&mut C::Session) -> sqldao_core::DriverResult<()>,
    ) -> Result<()> {
        let session = self.session()?;
        op(session).map_err(|e| classify(e, label, Stage::Execute))
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.session_command("START TRANSACTION", |s| s.begin())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.session_command("COMMIT", |s| s.commit())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.session_command("ROLLBACK", |s| s.rollback())
    }

    /// Switch session autocommit.
    pub fn autocommit(&mut self, enabled: bool) -> Result<()> {
        let label = if enabled {
            "SET AUTOCOMMIT = 1"
        } else {
            "SET AUTOCOMMIT = 0"
        };
        self.session_command(label, |s| s.set_autocommit(enabled))
    }

    /// Probe the server.
    pub fn ping(&mut self) -> Result<()> {
        self.session_command("PING", |s| s.ping())
    }

    /// Escape `value` for use inside a quoted SQL string literal.
    pub fn escape_string(&self, value: &str) -> String {
        sqldao_mysql::escape_string(value)
    }

    /// Close the current session and open a new one on the same DSN.
    pub fn reconnect(&mut self) -> Result<()> {
        let index = self.active_index()?;
        self.handles[index].reconnect(&self.connector).map(|_| ())
    }

    /// Close every open session. The next statement connects again.
    pub fn close(&mut self) {
        for handle in &mut self.handles {
            handle.close();
        }
    }

    /// True once the selected DSN has connected. Does not probe the server.
    pub fn is_connected(&self) -> bool {
        self.active_handle().is_some_and(ConnectionHandle::is_connected)
    }

    /// Session id of the last connect, or -1.
    pub fn thread_id(&self) -> i64 {
        self.active_handle()
            .map_or(NOT_CONNECTED, ConnectionHandle::thread_id)
    }

    /// Name of the selected DSN, once one is selected.
    pub fn dsn_name(&self) -> Option<&str> {
        self.active_handle().map(ConnectionHandle::name)
    }

    /// Rows changed by the last statement on the open session.
    pub fn affected_rows(&mut self) -> u64 {
        self.open_session().map_or(0, |s| s.affected_rows())
    }

    /// Id generated by the last statement on the open session.
    pub fn last_insert_id(&mut self) -> u64 {
        self.open_session().map_or(0, |s| s.last_insert_id())
    }

    fn open_session(&mut self) -> Option<&mut C::Session> {
        let index = self.active?;
        self.handles.get_mut(index)?.current()
    }
}

impl<C: Connector> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handles.iter().map(ConnectionHandle::name).collect();
        f.debug_struct("Connection")
            .field("dsns", &names)
            .field("active", &self.dsn_name())
            .field("thread_id", &self.thread_id())
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
