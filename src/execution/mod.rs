//! Query Execution Module
//!
//! Provides the normalized execution contract shared by the embedded engine
//! and the remote sandbox:
//! - [`ExecutionResult`], the one shape every outcome is reported in
//! - The query executor ([`execute`]) and setup-script runner ([`run_setup`])
//! - Timeout enforcement for remote round trips

mod executor;
mod timeout;

pub use executor::{execute, run_setup};
pub use timeout::{with_deadline, with_timeout, TimeoutError};

use crate::value::SqlValue;
use serde::{Deserialize, Serialize};

/// Normalized outcome of running one SQL text.
///
/// `success == false` always comes with `error_message` and with no
/// columns, rows or counts. `error_message` is the only carrier of failure
/// detail; nothing else crosses the sandbox boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<SqlValue>>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub affected_rows: u64,
    /// Wall time of the native execute call only
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// A statement produced a result set
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            columns,
            rows,
            affected_rows: 0,
            execution_time_ms,
            error_message: None,
        }
    }

    /// The script changed data (or schema) without returning rows
    pub fn mutation(affected_rows: u64, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            affected_rows,
            execution_time_ms,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            affected_rows: 0,
            execution_time_ms,
            error_message: Some(message.into()),
        }
    }

    /// Whether the outcome carries a result set (possibly with zero rows)
    pub fn has_result_set(&self) -> bool {
        self.success && !self.columns.is_empty()
    }

    /// Enforce the failure invariant on results that came from elsewhere
    /// (the remote server), keeping only the message.
    pub fn normalized(self) -> Self {
        if self.success {
            let row_count = self.rows.len();
            return Self { row_count, ..self };
        }
        let message = self
            .error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "query failed".to_string());
        Self::failure(message, self.execution_time_ms)
    }
}
