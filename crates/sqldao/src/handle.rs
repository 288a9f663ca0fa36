//! A lazily established native session for one DSN.

use sqldao_core::{Driver, DriverResult, Result};
use sqldao_mysql::MySqlConnection;

use crate::classify::connect_failure;
use crate::dsn::DsnConfig;

/// Opens native sessions.
///
/// The engine is generic over this so it can run against MySQL or an
/// in-memory driver.
pub trait Connector {
    type Session: Driver;

    fn connect(&self, config: &DsnConfig) -> DriverResult<Self::Session>;
}

/// Connects with the built-in MySQL client.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Session = MySqlConnection;

    fn connect(&self, config: &DsnConfig) -> DriverResult<MySqlConnection> {
        MySqlConnection::connect(config.to_mysql_config())
    }
}

/// Thread id of a handle that never connected.
pub const NOT_CONNECTED: i64 = -1;

/// Owns at most one session for a named DSN.
///
/// Nothing is dialed until [`session`](Self::session) is first called. The
/// session is closed when the handle is closed or dropped.
#[derive(Debug)]
pub struct ConnectionHandle<S: Driver> {
    name: String,
    config: DsnConfig,
    session: Option<S>,
    thread_id: i64,
}

impl<S: Driver> ConnectionHandle<S> {
    pub fn new(name: impl Into<String>, config: DsnConfig) -> Self {
        Self {
            name: name.into(),
            config,
            session: None,
            thread_id: NOT_CONNECTED,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DsnConfig {
        &self.config
    }

    /// The live session, connecting first if there is none.
    pub fn session<C>(&mut self, connector: &C) -> Result<&mut S>
    where
        C: Connector<Session = S>,
    {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let session = connector
                    .connect(&self.config)
                    .map_err(|e| connect_failure(&self.config, e))?;
                self.thread_id = i64::from(session.thread_id());
                tracing::debug!(
                    dsn = %self.name,
                    host = %self.config.host,
                    thread_id = self.thread_id,
                    "connected"
                );
                session
            }
        };
        Ok(self.session.insert(session))
    }

    /// The session if one is open; never connects.
    pub fn current(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn is_materialized(&self) -> bool {
        self.session.is_some()
    }

    /// Session id captured at the last connect, `-1` before the first one.
    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// True once a connect has succeeded. Does not probe the server.
    pub fn is_connected(&self) -> bool {
        self.thread_id != NOT_CONNECTED
    }

    /// Close the session if there is one. Close failures are only logged.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            match session.close() {
                Ok(()) => tracing::debug!(dsn = %self.name, thread_id = self.thread_id, "closed"),
                Err(e) => tracing::debug!(dsn = %self.name, error = %e, "ignoring close failure"),
            }
        }
    }

    /// Drop the current session and open a new one.
    pub fn reconnect<C>(&mut self, connector: &C) -> Result<&mut S>
    where
        C: Connector<Session = S>,
    {
        tracing::info!(dsn = %self.name, old_thread_id = self.thread_id, "reconnecting");
        self.close();
        self.session(connector)
    }
}

impl<S: Driver> Drop for ConnectionHandle<S> {
    fn drop(&mut self) {
        self.close();
    }
}
