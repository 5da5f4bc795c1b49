//! Idempotent batch writes into the destination.
use std::collections::HashMap;

use tracing::debug;

use crate::backend::{key_string, ConflictPolicy, Row, TableStore, WriteRequest};
use crate::error::MigrateResult;
use crate::pipeline::retry::RetryExecutor;

pub struct UpsertWriter<'a> {
    store: &'a dyn TableStore,
    retry: &'a RetryExecutor,
    table: &'a str,
    conflict_key: &'a str,
    policy: ConflictPolicy,
}

impl<'a> UpsertWriter<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        retry: &'a RetryExecutor,
        table: &'a str,
        conflict_key: &'a str,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            store,
            retry,
            table,
            conflict_key,
            policy,
        }
    }

    /// Write `rows` and return how many were sent. Rows are grouped by column
    /// set, so a column missing from a row is left alone at the destination
    /// rather than overwritten with null.
    pub async fn write(&self, rows: &[Row]) -> MigrateResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let groups = group_by_columns(collapse_duplicates(rows, self.conflict_key, self.policy));
        let mut sent = 0;
        for (columns, group) in &groups {
            let request = WriteRequest {
                table: self.table,
                conflict_key: self.conflict_key,
                policy: self.policy,
                columns,
                rows: group,
            };
            let label = format!(
                "{}: {} {} ({} rows)",
                self.store.name(),
                self.policy.as_str(),
                self.table,
                group.len()
            );
            self.retry
                .execute(&label, || self.store.write(&request))
                .await?;
            debug!(table = self.table, rows = group.len(), columns = columns.len(), "batch written");
            sent += group.len();
        }
        Ok(sent)
    }
}

fn conflict_value(row: &Row, conflict_key: &str) -> Option<String> {
    let parts: Option<Vec<String>> = conflict_key
        .split(',')
        .map(|c| row.get(c.trim()).and_then(key_string))
        .collect();
    parts.map(|p| p.join("\u{1f}"))
}

/// Keep one row per conflict key so one statement never touches the same
/// destination row twice: the last under `Overwrite`, the first otherwise,
/// matching what the destination itself would keep. Rows without a full key
/// pass through.
fn collapse_duplicates(rows: &[Row], conflict_key: &str, policy: ConflictPolicy) -> Vec<Row> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        match conflict_value(row, conflict_key) {
            Some(key) => match position.get(&key) {
                Some(&idx) if policy == ConflictPolicy::Overwrite => out[idx] = row.clone(),
                Some(_) => {}
                None => {
                    position.insert(key, out.len());
                    out.push(row.clone());
                }
            },
            None => out.push(row.clone()),
        }
    }
    out
}

fn group_by_columns(rows: Vec<Row>) -> Vec<(Vec<String>, Vec<Row>)> {
    let mut groups: Vec<(Vec<String>, Vec<Row>)> = Vec::new();
    for row in rows {
        let mut columns: Vec<String> = row.keys().cloned().collect();
        columns.sort();
        match groups.iter_mut().find(|(c, _)| *c == columns) {
            Some((_, group)) => group.push(row),
            None => groups.push((columns, vec![row])),
        }
    }
    groups
}
