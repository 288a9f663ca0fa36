//! A scripted in-memory driver for engine tests.
//!
//! Replies are queued up front and consumed by `query`/`execute` in order.
//! Every call the engine makes is recorded as an [`Event`].

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use sqldao::{
    Connection, Connector, Driver, DriverError, DriverResult, DsnConfig, EngineOptions,
    PreparedStatement, ResultSet, Value,
};
use sqldao_core::error::{ConnectionError, ConnectionErrorKind, ProtocolError, ServerError, codes};

/// A native failure to inject.
#[derive(Debug, Clone)]
pub enum Fault {
    Server(u16, &'static str),
    Lost,
    Protocol(&'static str),
    Refused,
}

impl Fault {
    pub fn deadlock() -> Self {
        Fault::Server(codes::ER_LOCK_DEADLOCK, "Deadlock found when trying to get lock")
    }

    pub fn duplicate() -> Self {
        Fault::Server(codes::ER_DUP_ENTRY, "Duplicate entry '1' for key 'PRIMARY'")
    }

    pub fn to_error(&self) -> DriverError {
        match self {
            Fault::Server(code, message) => DriverError::Server(ServerError {
                code: *code,
                sqlstate: "HY000".to_string(),
                message: (*message).to_string(),
            }),
            Fault::Lost => DriverError::lost_on_read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Fault::Protocol(message) => DriverError::Protocol(ProtocolError {
                message: (*message).to_string(),
                source: None,
            }),
            Fault::Refused => DriverError::Connection(ConnectionError {
                kind: ConnectionErrorKind::Refused,
                code: codes::CR_CONN_HOST_ERROR,
                message: "Connection refused".to_string(),
                source: None,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ok { affected_rows: u64, last_insert_id: u64 },
    Rows(Vec<&'static str>, Vec<Vec<Value>>),
    Fail(Fault),
    /// Consumed by `prepare` instead of `execute`.
    PrepareFail(Fault),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok {
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    pub fn affected(rows: u64) -> Self {
        Reply::Ok {
            affected_rows: rows,
            last_insert_id: 0,
        }
    }

    pub fn inserted(id: u64) -> Self {
        Reply::Ok {
            affected_rows: 1,
            last_insert_id: id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect { thread_id: u32, host: String, autocommit: bool },
    Query(String),
    Prepare(String),
    Execute(Vec<Value>),
    CloseStatement,
    Begin,
    Commit,
    Rollback,
    Autocommit(bool),
    Ping,
    Close(u32),
}

#[derive(Debug, Default)]
pub struct Script {
    pub replies: VecDeque<Reply>,
    pub events: Vec<Event>,
    pub connect_error: Option<Fault>,
    pub param_count: Option<usize>,
    pub commit_error: Option<Fault>,
    pub thread_ids: u32,
}

impl Script {
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// SQL text of every query and prepare, in order.
    pub fn statements(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Query(sql) | Event::Prepare(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn executions(&self) -> Vec<Vec<Value>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Execute(values) => Some(values.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, Event::Connect { .. }))
    }
}

pub type Shared = Rc<RefCell<Script>>;

#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    pub script: Shared,
}

impl Connector for ScriptedConnector {
    type Session = ScriptedDriver;

    fn connect(&self, config: &DsnConfig) -> DriverResult<ScriptedDriver> {
        let mut script = self.script.borrow_mut();
        if let Some(fault) = &script.connect_error {
            return Err(fault.to_error());
        }
        script.thread_ids += 1;
        let thread_id = 10 + script.thread_ids;
        script.events.push(Event::Connect {
            thread_id,
            host: config.host.clone(),
            autocommit: config.autocommit,
        });
        Ok(ScriptedDriver {
            script: Rc::clone(&self.script),
            thread_id,
            affected_rows: 0,
            last_insert_id: 0,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedDriver {
    script: Shared,
    thread_id: u32,
    affected_rows: u64,
    last_insert_id: u64,
}

impl ScriptedDriver {
    fn reply(&mut self) -> DriverResult<Option<ResultSet>> {
        let reply = self
            .script
            .borrow_mut()
            .replies
            .pop_front()
            .unwrap_or_else(Reply::ok);
        match reply {
            Reply::Ok {
                affected_rows,
                last_insert_id,
            } => {
                self.affected_rows = affected_rows;
                self.last_insert_id = last_insert_id;
                Ok(None)
            }
            Reply::Rows(columns, rows) => {
                self.affected_rows = rows.len() as u64;
                self.last_insert_id = 0;
                Ok(Some(ResultSet::from_values(
                    columns.into_iter().map(String::from).collect(),
                    rows,
                )))
            }
            Reply::Fail(fault) | Reply::PrepareFail(fault) => Err(fault.to_error()),
        }
    }

    fn record(&self, event: Event) {
        self.script.borrow_mut().events.push(event);
    }
}

impl Driver for ScriptedDriver {
    fn thread_id(&self) -> u32 {
        self.thread_id
    }

    fn query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>> {
        self.record(Event::Query(sql.to_string()));
        self.reply()
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement> {
        self.record(Event::Prepare(sql.to_string()));
        let mut script = self.script.borrow_mut();
        if let Some(Reply::PrepareFail(fault)) = script.replies.front() {
            let err = fault.to_error();
            script.replies.pop_front();
            return Err(err);
        }
        let count = script
            .param_count
            .unwrap_or_else(|| sql.matches('?').count());
        Ok(PreparedStatement::new(1, sql.to_string(), count))
    }

    fn execute(
        &mut self,
        _stmt: &PreparedStatement,
        params: &[Value],
    ) -> DriverResult<Option<ResultSet>> {
        self.record(Event::Execute(params.to_vec()));
        self.reply()
    }

    fn close_statement(&mut self, _stmt: &PreparedStatement) {
        self.record(Event::CloseStatement);
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn ping(&mut self) -> DriverResult<()> {
        self.record(Event::Ping);
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.record(Event::Close(self.thread_id));
        Ok(())
    }

    fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()> {
        self.record(Event::Autocommit(enabled));
        Ok(())
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.record(Event::Begin);
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.record(Event::Commit);
        match self.script.borrow_mut().commit_error.take() {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.record(Event::Rollback);
        Ok(())
    }
}

/// An engine over one scripted DSN.
pub fn connection(dsn: &str) -> (Connection<ScriptedConnector>, Shared) {
    connection_with(&[("main", dsn)], EngineOptions::new())
}

pub fn connection_with(
    dsns: &[(&str, &str)],
    options: EngineOptions,
) -> (Connection<ScriptedConnector>, Shared) {
    let connector = ScriptedConnector::default();
    let script = Rc::clone(&connector.script);
    let conn = Connection::with_connector(connector, dsns, options).expect("valid dsn");
    (conn, script)
}

pub fn push(script: &Shared, replies: impl IntoIterator<Item = Reply>) {
    script.borrow_mut().replies.extend(replies);
}
