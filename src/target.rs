//! Sandbox Targets
//!
//! Each exercise names the engine its queries run on. SQLite runs embedded in
//! this process; every other engine lives behind the remote sandbox server.
//! The dialect tells the request builder what kind of setup text a target
//! understands.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Engine an exercise runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxTarget {
    Sqlite,
    Postgres,
    Mysql,
    Mongodb,
    Redis,
}

/// Where a target's queries execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Embedded,
    Remote,
}

/// Shape of the query and setup text a target accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Relational: schema DDL plus seed DML
    Sql,
    /// Document store commands; no schema
    Document,
    /// Key-value commands; no schema
    KeyValue,
}

impl SandboxTarget {
    pub const ALL: [SandboxTarget; 5] = [
        SandboxTarget::Sqlite,
        SandboxTarget::Postgres,
        SandboxTarget::Mysql,
        SandboxTarget::Mongodb,
        SandboxTarget::Redis,
    ];

    pub fn path(self) -> ExecutionPath {
        match self {
            SandboxTarget::Sqlite => ExecutionPath::Embedded,
            _ => ExecutionPath::Remote,
        }
    }

    pub fn dialect(self) -> Dialect {
        match self {
            SandboxTarget::Sqlite | SandboxTarget::Postgres | SandboxTarget::Mysql => Dialect::Sql,
            SandboxTarget::Mongodb => Dialect::Document,
            SandboxTarget::Redis => Dialect::KeyValue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SandboxTarget::Sqlite => "sqlite",
            SandboxTarget::Postgres => "postgres",
            SandboxTarget::Mysql => "mysql",
            SandboxTarget::Mongodb => "mongodb",
            SandboxTarget::Redis => "redis",
        }
    }
}

impl fmt::Display for SandboxTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown target name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sandbox target '{0}' (expected one of: sqlite, postgres, mysql, mongodb, redis)")]
pub struct UnknownTarget(pub String);

impl FromStr for SandboxTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(SandboxTarget::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(SandboxTarget::Postgres),
            "mysql" | "mariadb" => Ok(SandboxTarget::Mysql),
            "mongodb" | "mongo" => Ok(SandboxTarget::Mongodb),
            "redis" => Ok(SandboxTarget::Redis),
            _ => Err(UnknownTarget(s.to_string())),
        }
    }
}
