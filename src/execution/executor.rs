//! Query Executor
//!
//! Runs one SQL text (possibly several `;`-separated statements) against a
//! live connection and classifies the outcome:
//!
//! - some statement returned columns → result set of the last such statement
//! - no statement returned columns   → mutation, `affected_rows` = rows changed
//! - any engine error                → failure with the engine's message verbatim
//!
//! Statements before a failing one stay applied; SQLite runs each statement in
//! its own implicit transaction unless the script opens one itself.

use super::ExecutionResult;
use crate::value::SqlValue;
use rusqlite::{Batch, Connection};
use std::time::Instant;

struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Default)]
struct Outcome {
    /// Result set of the last row-returning statement
    last_set: Option<ResultSet>,
    /// Rows modified directly by the script's statements
    affected: u64,
}

/// Execute user SQL and normalize the outcome. Never fails: SQL errors are
/// reported through [`ExecutionResult::failure`].
pub fn execute(conn: &Connection, sql: &str) -> ExecutionResult {
    let started = Instant::now();
    let outcome = run_statements(conn, sql);
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(Outcome {
            last_set: Some(set),
            ..
        }) => ExecutionResult::rows(set.columns, set.rows, execution_time_ms),
        Ok(Outcome { affected, .. }) => ExecutionResult::mutation(affected, execution_time_ms),
        Err(e) => {
            tracing::debug!(error = %e, "query_failed");
            ExecutionResult::failure(e.to_string(), execution_time_ms)
        }
    }
}

/// Run a setup script, returning the raw engine error for the caller to
/// classify.
pub fn run_setup(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    conn.execute_batch(sql)
}

fn run_statements(conn: &Connection, sql: &str) -> rusqlite::Result<Outcome> {
    let mut outcome = Outcome::default();
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        let column_count = stmt.column_count();
        if column_count == 0 {
            // `execute` reports sqlite3_changes: rows the statement itself
            // modified, trigger writes excluded. DDL leaves that counter at the
            // previous DML's value, so only trust it when something changed.
            let before = total_changes(conn);
            let changed = stmt.execute([])?;
            if total_changes(conn) != before {
                outcome.affected += changed as u64;
            }
            continue;
        }

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let values = (0..column_count)
                .map(|i| row.get_ref(i).map(SqlValue::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.push(values);
        }
        outcome.last_set = Some(ResultSet { columns, rows });
    }
    Ok(outcome)
}

fn total_changes(conn: &Connection) -> Option<i64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get(0))
        .ok()
}
