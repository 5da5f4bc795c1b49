//! Skips keys whose migration already left a complete staging record.
use std::collections::HashMap;

use serde_json::Value;

use crate::backend::{is_non_empty, key_string, Row, TableStore};
use crate::error::MigrateResult;
use crate::pipeline::job::DedupSpec;
use crate::pipeline::lookup::KeyedLookup;
use crate::pipeline::retry::RetryExecutor;

pub struct DedupGate<'a> {
    store: &'a dyn TableStore,
    retry: &'a RetryExecutor,
    spec: &'a DedupSpec,
    chunk: usize,
}

impl<'a> DedupGate<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        retry: &'a RetryExecutor,
        spec: &'a DedupSpec,
        chunk: usize,
    ) -> Self {
        Self {
            store,
            retry,
            spec,
            chunk,
        }
    }

    /// Staging records for `keys`, indexed by key string.
    pub async fn lookup(&self, keys: &[Value]) -> MigrateResult<HashMap<String, Row>> {
        let mut columns = vec![self.spec.key_column];
        columns.extend(self.spec.fields.iter().copied());
        KeyedLookup {
            store: self.store,
            retry: self.retry,
            table: self.spec.table,
            columns: &columns,
            column: self.spec.key_column,
            chunk: self.chunk,
        }
        .fetch_map(keys)
        .await
    }

    /// A record is complete when every tracked field is present and non-empty.
    /// Without tracked fields the record's existence is enough.
    pub fn is_complete(&self, record: Option<&Row>) -> bool {
        let Some(record) = record else {
            return false;
        };
        self.spec
            .fields
            .iter()
            .all(|f| record.get(*f).is_some_and(is_non_empty))
    }

    /// Keys not yet migrated, in input order.
    pub async fn filter(&self, keys: &[Value]) -> MigrateResult<Vec<Value>> {
        Ok(self.partition(keys).await?.0)
    }

    /// [`filter`](Self::filter) plus the staging records it read, so fields a
    /// previous run already moved can be carried over.
    pub async fn partition(
        &self,
        keys: &[Value],
    ) -> MigrateResult<(Vec<Value>, HashMap<String, Row>)> {
        let staged = self.lookup(keys).await?;
        let pending = keys
            .iter()
            .filter(|k| {
                let record = key_string(k).and_then(|k| staged.get(&k));
                !self.is_complete(record)
            })
            .cloned()
            .collect();
        Ok((pending, staged))
    }
}
