//! INSERT/UPDATE/DELETE/SELECT builders.
//!
//! Identifiers are backtick-quoted and every value goes through a `?`
//! placeholder. Conditions are equality tests joined with `AND`; no
//! conditions means every row.

use sqldao_core::{Driver, Error, Result, ResultSet, Value};

use crate::binder::{Param, annotate, coerce};
use crate::classify::{Stage, classify};
use crate::connection::{CallResult, Connection, run_statement};
use crate::cursor::ResultCursor;
use crate::handle::Connector;

/// `` `name` ``, with embedded backticks doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote each dot-separated part: `db.t` becomes `` `db`.`t` ``.
pub fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Render `value` as a SQL literal; strings are quoted and escaped.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) | Value::Decimal(s) => format!("'{}'", sqldao_mysql::escape_string(s)),
        Value::Bytes(b) => format!(
            "'{}'",
            sqldao_mysql::escape_string(&String::from_utf8_lossy(b))
        ),
        Value::Json(j) => format!("'{}'", sqldao_mysql::escape_string(&j.to_string())),
        other => other.to_text().unwrap_or_default(),
    }
}

fn placeholders(count: usize) -> String {
    format!("({})", vec!["?"; count].join(","))
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(",")
}

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let tests = conditions
        .iter()
        .map(|c| format!("{}=?", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {}", tests)
}

/// `INSERT INTO t (a,b) VALUES (?,?),(?,?)` for `rows` rows.
pub fn insert_sql(table: &str, columns: &[&str], rows: usize) -> String {
    let row = placeholders(columns.len());
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(table),
        column_list(columns),
        vec![row.as_str(); rows].join(",")
    )
}

/// `UPDATE t SET a=?,b=? WHERE c=? AND d=?`.
pub fn update_sql(table: &str, set: &[&str], conditions: &[&str]) -> String {
    let assignments = set
        .iter()
        .map(|c| format!("{}=?", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "UPDATE {} SET {}{}",
        quote_table(table),
        assignments,
        where_clause(conditions)
    )
}

/// `DELETE FROM t WHERE c=?`.
pub fn delete_sql(table: &str, conditions: &[&str]) -> String {
    format!("DELETE FROM {}{}", quote_table(table), where_clause(conditions))
}

/// `SELECT a,b FROM t WHERE c=?`; no columns selects `*`.
pub fn select_sql(table: &str, columns: &[&str], conditions: &[&str]) -> String {
    let columns = if columns.is_empty() {
        "*".to_string()
    } else {
        column_list(columns)
    };
    format!(
        "SELECT {} FROM {}{}",
        columns,
        quote_table(table),
        where_clause(conditions)
    )
}

fn bind_values<'a>(params: impl IntoIterator<Item = &'a Param>) -> Result<Vec<Value>> {
    params
        .into_iter()
        .map(|p| coerce(p.value(), p.bind_type()))
        .collect()
}

fn split_pairs<'a>(pairs: &'a [(&'a str, Param)]) -> (Vec<&'a str>, Vec<&'a Param>) {
    pairs.iter().map(|(name, param)| (*name, param)).unzip()
}

/// Every row must have one value per column, and there must be columns.
fn check_rows(columns: &[&str], rows: &[Vec<Param>]) -> Result<()> {
    if columns.is_empty() {
        let values = rows.first().map_or(0, Vec::len);
        return Err(Error::size_mismatch(0, values));
    }
    match rows.iter().find(|row| row.len() != columns.len()) {
        Some(row) => Err(Error::size_mismatch(columns.len(), row.len())),
        None => Ok(()),
    }
}

fn clamp_id(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

impl<C: Connector> Connection<C> {
    /// Run builder SQL with positional values, retrying deadlocks.
    fn run_built(&mut self, sql: &str, values: Vec<Value>) -> Result<CallResult> {
        let sql = annotate(sql, self.request_id(), "");
        let values = if values.is_empty() { None } else { Some(values) };
        self.with_retry(|session| run_statement(session, &sql, values.as_deref()))
    }

    /// Insert one row; returns the generated id, or -1 for an empty row.
    pub fn insert_single(&mut self, table: &str, row: &[(&str, Param)]) -> Result<i64> {
        if row.is_empty() {
            return Ok(-1);
        }
        let (columns, params) = split_pairs(row);
        let values = bind_values(params)?;
        let result = self.run_built(&insert_sql(table, &columns, 1), values)?;
        Ok(clamp_id(result.last_insert_id()))
    }

    /// Insert rows given as one flat value list, `columns.len()` per row, in a
    /// single statement. Returns the affected row count.
    pub fn insert_1d(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[Param],
    ) -> Result<u64> {
        if columns.is_empty() || values.len() % columns.len() != 0 {
            return Err(Error::size_mismatch(columns.len(), values.len()));
        }
        let rows = values.len() / columns.len();
        if rows == 0 {
            return Ok(0);
        }
        let values = bind_values(values)?;
        let result = self.run_built(&insert_sql(table, columns, rows), values)?;
        Ok(result.affected_rows())
    }

    /// Insert each row with one prepared statement; returns the generated
    /// ids in row order.
    ///
    /// Deadlocks are not retried here: earlier rows are already written.
    pub fn insert_2d(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Param>],
    ) -> Result<Vec<i64>> {
        check_rows(columns, rows)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let rows = rows
            .iter()
            .map(|row| bind_values(row))
            .collect::<Result<Vec<_>>>()?;

        let sql = annotate(&insert_sql(table, columns, 1), self.request_id(), "");
        let session = self.session()?;
        let stmt = session
            .prepare(&sql)
            .map_err(|e| classify(e, &sql, Stage::Prepare))?;
        let mut ids = Vec::with_capacity(rows.len());
        for values in &rows {
            if let Err(e) = session.execute(&stmt, values) {
                session.close_statement(&stmt);
                return Err(classify(e, &sql, Stage::Execute));
            }
            ids.push(clamp_id(session.last_insert_id()));
        }
        session.close_statement(&stmt);
        Ok(ids)
    }

    /// [`insert_2d`](Self::insert_2d) inside a transaction; rolled back on
    /// failure.
    pub fn insert_2d_transaction(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Param>],
    ) -> Result<Vec<i64>> {
        check_rows(columns, rows)?;
        self.begin_transaction()?;
        match self
            .insert_2d(table, columns, rows)
            .and_then(|ids| self.commit().map(|()| ids))
        {
            Ok(ids) => Ok(ids),
            Err(err) => {
                if !err.is_connection_error() {
                    if let Err(rollback) = self.rollback() {
                        tracing::debug!(error = %rollback, "rollback after failed batch insert failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Update matching rows; returns the affected row count. An empty `set`
    /// is a no-op.
    pub fn update(
        &mut self,
        table: &str,
        set: &[(&str, Param)],
        conditions: &[(&str, Param)],
    ) -> Result<u64> {
        if set.is_empty() {
            return Ok(0);
        }
        let (set_columns, set_params) = split_pairs(set);
        let (where_columns, where_params) = split_pairs(conditions);
        let values = bind_values(set_params.into_iter().chain(where_params))?;
        let sql = update_sql(table, &set_columns, &where_columns);
        Ok(self.run_built(&sql, values)?.affected_rows())
    }

    /// Delete matching rows; returns the affected row count.
    pub fn delete(&mut self, table: &str, conditions: &[(&str, Param)]) -> Result<u64> {
        let (columns, params) = split_pairs(conditions);
        let values = bind_values(params)?;
        Ok(self.run_built(&delete_sql(table, &columns), values)?.affected_rows())
    }

    /// Select matching rows.
    pub fn select(
        &mut self,
        table: &str,
        columns: &[&str],
        conditions: &[(&str, Param)],
    ) -> Result<ResultCursor> {
        let (where_columns, params) = split_pairs(conditions);
        let values = bind_values(params)?;
        let sql = select_sql(table, columns, &where_columns);
        Ok(match self.run_built(&sql, values)? {
            CallResult::Cursor(cursor) => cursor,
            CallResult::NoResult { .. } => ResultCursor::new(ResultSet::default(), 0),
        })
    }
}
