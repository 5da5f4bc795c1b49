//! Backend seams: tabular query access and object storage.
//!
//! Both sides of a migration expose the same two traits; the orchestrator never
//! knows whether it talks to the REST API, to Postgres directly, or to the
//! in-memory doubles used in tests.
use bytes::Bytes;
use serde_json::{Map, Value};

pub mod postgres;
pub mod rest;

#[cfg(test)]
pub(crate) mod memory;

/// One table row as returned by the backend.
pub type Row = Map<String, Value>;

/// Equality predicate `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

/// Offset/limit window over a table ordered ascending by `order_by`.
#[derive(Debug, Clone)]
pub struct PageQuery<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub filters: &'a [Filter],
    pub order_by: &'a str,
    pub offset: usize,
    pub limit: usize,
}

/// `SELECT columns FROM table WHERE column IN (values)`.
#[derive(Debug, Clone)]
pub struct InQuery<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub column: &'a str,
    pub values: &'a [Value],
    /// Optional ascending ordering of the result.
    pub order_by: Option<&'a str>,
}

/// What happens when a written row collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace the written columns of the existing row.
    Overwrite,
    /// Keep the existing row untouched.
    IgnoreDuplicates,
    /// Plain insert with no conflict target; a duplicate key fails the write.
    Insert,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::IgnoreDuplicates => "ignore_duplicates",
            ConflictPolicy::Insert => "insert",
        }
    }
}

/// Batch insert with a conflict policy. All rows share exactly `columns`.
#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    pub table: &'a str,
    /// Comma separated list of conflict target columns.
    pub conflict_key: &'a str,
    pub policy: ConflictPolicy,
    pub columns: &'a [String],
    pub rows: &'a [Row],
}

#[async_trait::async_trait]
pub trait TableStore: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    async fn select_page(&self, query: &PageQuery<'_>) -> anyhow::Result<Vec<Row>>;

    async fn select_in(&self, query: &InQuery<'_>) -> anyhow::Result<Vec<Row>>;

    async fn write(&self, request: &WriteRequest<'_>) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    async fn download(&self, bucket: &str, path: &str) -> anyhow::Result<Bytes>;

    /// Upload with overwrite semantics.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> anyhow::Result<()>;
}

/// Stable string form of a key value, used for map lookups across backends
/// (a numeric id may come back as a number from one side and text from the other).
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// True when a value carries content: not null, not a blank string.
pub fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
