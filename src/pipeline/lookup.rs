//! Chunked `IN (...)` lookups shared by dedup, overlays and related-row fetches.
use std::collections::HashMap;

use serde_json::Value;

use crate::backend::{key_string, InQuery, Row, TableStore};
use crate::error::MigrateResult;
use crate::pipeline::retry::RetryExecutor;

pub struct KeyedLookup<'a> {
    pub store: &'a dyn TableStore,
    pub retry: &'a RetryExecutor,
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub column: &'a str,
    pub chunk: usize,
}

impl KeyedLookup<'_> {
    /// All rows whose `column` is one of `keys`, `chunk` keys per request.
    pub async fn fetch(&self, keys: &[Value], order_by: Option<&str>) -> MigrateResult<Vec<Row>> {
        let mut out = Vec::new();
        for slice in keys.chunks(self.chunk.max(1)) {
            let query = InQuery {
                table: self.table,
                columns: self.columns,
                column: self.column,
                values: slice,
                order_by,
            };
            let label = format!("{}: lookup {} ({} keys)", self.store.name(), self.table, slice.len());
            let rows = self
                .retry
                .execute(&label, || self.store.select_in(&query))
                .await?;
            out.extend(rows);
        }
        Ok(out)
    }

    /// Same as [`fetch`](Self::fetch), indexed by the lookup column. The last
    /// row wins when the column is not unique.
    pub async fn fetch_map(&self, keys: &[Value]) -> MigrateResult<HashMap<String, Row>> {
        let rows = self.fetch(keys, None).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.get(self.column).and_then(key_string).map(|k| (k, r)))
            .collect())
    }
}
