//! The seam between the engine and a native database client.
//!
//! - [`Driver`]: one live, synchronous session
//! - [`PreparedStatement`]: a server-side statement handle
//! - [`ResultSet`]: a fully read result set

use std::sync::Arc;

use crate::error::DriverResult;
use crate::row::{ColumnInfo, Row};
use crate::value::Value;

/// A prepared statement for repeated execution.
///
/// Created by [`Driver::prepare`]; the id is driver-specific.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Unique identifier for this prepared statement (driver-specific)
    id: u64,
    /// The original SQL text
    sql: String,
    /// Number of expected parameters
    param_count: usize,
    /// Result column names, when the statement produces rows
    columns: Option<Vec<String>>,
}

impl PreparedStatement {
    #[must_use]
    pub fn new(id: u64, sql: String, param_count: usize) -> Self {
        Self {
            id,
            sql,
            param_count,
            columns: None,
        }
    }

    #[must_use]
    pub fn with_columns(id: u64, sql: String, param_count: usize, columns: Vec<String>) -> Self {
        Self {
            id,
            sql,
            param_count,
            columns: Some(columns),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    #[must_use]
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Check if the provided parameters match the expected count.
    #[must_use]
    pub fn validate_params(&self, params: &[Value]) -> bool {
        params.len() == self.param_count
    }
}

/// A result set read off the wire in full.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Arc<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set from column names and raw value rows.
    pub fn from_values(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(columns));
        let rows = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values))
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// A live, blocking database session.
///
/// Statements that produce no result set return `Ok(None)`; an empty
/// result set is `Ok(Some(..))` with no rows. Implementations must leave
/// the session ready for the next command before returning, which
/// includes discarding any trailing results of a multi-result response.
pub trait Driver {
    /// Server-assigned session id.
    fn thread_id(&self) -> u32;

    /// Execute SQL text directly.
    fn query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>>;

    /// Prepare a statement with positional `?` placeholders.
    fn prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement>;

    /// Execute a prepared statement with one value per placeholder.
    fn execute(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> DriverResult<Option<ResultSet>>;

    /// Release a prepared statement. Best effort.
    fn close_statement(&mut self, stmt: &PreparedStatement);

    /// Rows changed by the last statement.
    fn affected_rows(&self) -> u64;

    /// Auto-increment id generated by the last statement.
    fn last_insert_id(&self) -> u64;

    /// Probe the server.
    fn ping(&mut self) -> DriverResult<()>;

    /// End the session. Calling it again is a no-op.
    fn close(&mut self) -> DriverResult<()>;

    fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()> {
        let sql = if enabled {
            "SET AUTOCOMMIT = 1"
        } else {
            "SET AUTOCOMMIT = 0"
        };
        self.query(sql).map(|_| ())
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.query("START TRANSACTION").map(|_| ())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.query("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.query("ROLLBACK").map(|_| ())
    }
}
