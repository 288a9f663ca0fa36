//! Single-use access to a fetched result set.

use std::sync::Arc;
use std::vec;

use sqldao_core::{ColumnInfo, ResultSet, Row};

/// Rows returned by one statement.
///
/// The cursor is read once. `fetch_one` returns the first remaining row and
/// releases the rest; `fetch_all` returns everything and releases. After
/// that every fetch comes back empty.
#[derive(Debug)]
pub struct ResultCursor {
    rows: Option<vec::IntoIter<Row>>,
    columns: Arc<ColumnInfo>,
    affected_rows: u64,
}

impl ResultCursor {
    /// `affected_rows` is the session's count when the result was read.
    pub fn new(result: ResultSet, affected_rows: u64) -> Self {
        let columns = Arc::new(result.columns().clone());
        Self {
            rows: Some(result.into_rows().into_iter()),
            columns,
            affected_rows,
        }
    }

    /// The next row, then release.
    pub fn fetch_one(&mut self) -> Option<Row> {
        let row = self.rows.as_mut().and_then(Iterator::next);
        self.free();
        row
    }

    /// All remaining rows, then release.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.take().map(Iterator::collect).unwrap_or_default()
    }

    /// Release the rows. Safe to call any number of times.
    pub fn free(&mut self) {
        self.rows = None;
    }

    pub fn is_released(&self) -> bool {
        self.rows.is_none()
    }

    /// Rows left to fetch.
    pub fn remaining(&self) -> usize {
        self.rows.as_ref().map_or(0, ExactSizeIterator::len)
    }

    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    /// Count captured when the cursor was built.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }
}
