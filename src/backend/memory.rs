//! In-memory backends used by the pipeline tests.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use serde_json::Value;

use super::{
    key_string, ConflictPolicy, InQuery, ObjectStore, PageQuery, Row, TableStore, WriteRequest,
};

fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => key_string(x).cmp(&key_string(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn project(row: &Row, columns: &[&str]) -> Row {
    columns
        .iter()
        .filter_map(|c| row.get(*c).map(|v| (c.to_string(), v.clone())))
        .collect()
}

fn same_key(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns.iter().all(|c| {
        let ka = a.get(*c).and_then(key_string);
        ka.is_some() && ka == b.get(*c).and_then(key_string)
    })
}

#[derive(Default)]
pub struct MemoryTables {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    /// Remaining forced failures per operation label (`select:<t>`, `lookup:<t>`, `write:<t>`).
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_next(&self, op: &str, times: u32) {
        self.failures.lock().unwrap().insert(op.to_string(), times);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: String) -> Result<()> {
        self.calls.lock().unwrap().push(op.clone());
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(&op) {
            if *left > 0 {
                *left -= 1;
                return Err(anyhow!("injected failure for {op}"));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TableStore for MemoryTables {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select_page(&self, query: &PageQuery<'_>) -> Result<Vec<Row>> {
        self.record(format!("select:{}", query.table))?;
        let mut rows: Vec<Row> = self
            .rows(query.table)
            .into_iter()
            .filter(|r| {
                query.filters.iter().all(|f| {
                    r.get(&f.column).and_then(key_string) == key_string(&f.value)
                })
            })
            .collect();
        rows.sort_by(|a, b| cmp_values(a.get(query.order_by), b.get(query.order_by)));
        Ok(rows
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|r| project(r, query.columns))
            .collect())
    }

    async fn select_in(&self, query: &InQuery<'_>) -> Result<Vec<Row>> {
        self.record(format!("lookup:{}", query.table))?;
        let wanted: Vec<String> = query.values.iter().filter_map(key_string).collect();
        let mut rows: Vec<Row> = self
            .rows(query.table)
            .into_iter()
            .filter(|r| {
                r.get(query.column)
                    .and_then(key_string)
                    .is_some_and(|k| wanted.contains(&k))
            })
            .collect();
        if let Some(order) = query.order_by {
            rows.sort_by(|a, b| cmp_values(a.get(order), b.get(order)));
        }
        Ok(rows.iter().map(|r| project(r, query.columns)).collect())
    }

    async fn write(&self, request: &WriteRequest<'_>) -> Result<()> {
        self.record(format!("write:{}", request.table))?;
        let conflict: Vec<&str> = request.conflict_key.split(',').map(str::trim).collect();
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(request.table.to_string()).or_default();
        if request.policy == ConflictPolicy::Insert
            && request.rows.iter().any(|row| table.iter().any(|r| same_key(r, row, &conflict)))
        {
            return Err(anyhow!("duplicate key in {}", request.table));
        }
        for row in request.rows {
            if let Some(existing) = table.iter_mut().find(|r| same_key(r, row, &conflict)) {
                match request.policy {
                    ConflictPolicy::Overwrite => {
                        for (k, v) in row {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                    ConflictPolicy::IgnoreDuplicates | ConflictPolicy::Insert => {}
                }
            } else {
                table.push(row.clone());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    objects: Mutex<HashMap<(String, String), (Bytes, String)>>,
    failures: Mutex<HashMap<String, u32>>,
    downloads: Mutex<u32>,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, path: &str, bytes: impl Into<Bytes>, content_type: &str) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), path.to_string()),
            (bytes.into(), content_type.to_string()),
        );
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<(Bytes, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn download_count(&self) -> u32 {
        *self.downloads.lock().unwrap()
    }

    /// Fail the next `times` uploads into `bucket`.
    pub fn fail_uploads(&self, bucket: &str, times: u32) {
        self.failures.lock().unwrap().insert(bucket.to_string(), times);
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjects {
    fn name(&self) -> &str {
        "memory"
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes> {
        *self.downloads.lock().unwrap() += 1;
        self.get(bucket, path)
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| anyhow!("object not found: {bucket}/{path}"))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(bucket) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("injected upload failure for {bucket}/{path}"));
                }
            }
        }
        self.put(bucket, path, bytes, content_type);
        Ok(())
    }
}

/// `json!({...})` object literal as a [`Row`].
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row() expects an object, got {other}"),
    }
}
