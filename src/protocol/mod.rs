//! Remote Sandbox Protocol
//!
//! Wire types and the client trait for engines that do not run in-process.
//!
//! # Endpoints
//!
//! ```text
//! POST   {base_url}/sandbox/execute                { target, query, schema_sql?, seed_sql?, session_id? }
//!                                                  -> ExecutionResult fields + session_id?
//! DELETE {base_url}/sandbox/sessions/{session_id}  release server-side state
//! ```
//!
//! # Module Structure
//!
//! - `error` - `RemoteError`
//! - `http` - reqwest implementation of [`RemoteExecutor`]

pub mod error;
pub mod http;

pub use error::RemoteError;
pub use http::HttpRemoteExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Dataset;
use crate::execution::ExecutionResult;
use crate::target::{Dialect, SandboxTarget};

/// Longest error body kept from a non-result HTTP response
pub const MAX_ERROR_BODY: usize = 512;

/// One execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub target: SandboxTarget,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RemoteRequest {
    /// A request that relies on state the server already holds
    pub fn new(target: SandboxTarget, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
            schema_sql: None,
            seed_sql: None,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the dataset in the form the target's dialect understands.
    /// Document and key-value engines have no schema; their setup commands
    /// travel as `seed_sql` alone.
    pub fn with_setup(mut self, dataset: &Dataset) -> Self {
        match self.target.dialect() {
            Dialect::Sql => {
                self.schema_sql = Some(dataset.schema_sql.clone());
                self.seed_sql = Some(dataset.seed_sql.clone());
            }
            Dialect::Document | Dialect::KeyValue => {
                self.schema_sql = None;
                self.seed_sql = Some(dataset.seed_sql.clone());
            }
        }
        self
    }

    pub fn carries_setup(&self) -> bool {
        self.schema_sql.is_some() || self.seed_sql.is_some()
    }
}

/// Server reply: a query result plus the session the server used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(flatten)]
    pub result: ExecutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RemoteResponse {
    pub fn new(result: ExecutionResult) -> Self {
        Self {
            result,
            session_id: None,
        }
    }
}

/// Client for the remote sandbox server
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Drop the server-side database behind `session_id`
    async fn release(&self, session_id: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    fn dataset() -> Dataset {
        Dataset::new("CREATE TABLE t (x INTEGER);", "INSERT INTO t VALUES (1);")
    }

    #[test]
    fn test_sql_dialect_sends_schema_and_seed() {
        let req = RemoteRequest::new(SandboxTarget::Postgres, "SELECT 1").with_setup(&dataset());
        assert_eq!(req.schema_sql.as_deref(), Some("CREATE TABLE t (x INTEGER);"));
        assert_eq!(req.seed_sql.as_deref(), Some("INSERT INTO t VALUES (1);"));
    }

    #[test]
    fn test_document_and_key_value_send_seed_only() {
        for target in [SandboxTarget::Mongodb, SandboxTarget::Redis] {
            let req = RemoteRequest::new(target, "q").with_setup(&dataset());
            assert!(req.schema_sql.is_none(), "{target}");
            assert_eq!(req.seed_sql.as_deref(), Some("INSERT INTO t VALUES (1);"));
        }
    }

    #[test]
    fn test_request_omits_absent_fields() {
        let req = RemoteRequest::new(SandboxTarget::Mysql, "SELECT 1").with_session("abc");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"target": "mysql", "query": "SELECT 1", "session_id": "abc"})
        );
        assert!(!req.carries_setup());
    }

    #[test]
    fn test_response_parses_flattened_result() {
        let body = r#"{
            "success": true,
            "columns": ["id", "active", "meta"],
            "rows": [[1, true, {"k": 1}], [2, null, null]],
            "row_count": 2,
            "execution_time_ms": 1.5,
            "session_id": "s-1"
        }"#;
        let resp: RemoteResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.session_id.as_deref(), Some("s-1"));
        assert_eq!(resp.result.rows[0][1], SqlValue::Integer(1));
        assert_eq!(resp.result.rows[0][2], SqlValue::Text(r#"{"k":1}"#.to_string()));
        assert_eq!(resp.result.rows[1][1], SqlValue::Null);
        assert_eq!(resp.result.affected_rows, 0);
    }

    #[test]
    fn test_response_failure_shape() {
        let body = r#"{"success": false, "error_message": "SESSION_EXPIRED"}"#;
        let resp: RemoteResponse = serde_json::from_str(body).unwrap();
        assert!(!resp.result.success);
        assert_eq!(resp.result.error_message.as_deref(), Some("SESSION_EXPIRED"));
        assert!(resp.session_id.is_none());
    }
}
