//! Direct Postgres access for projects where a DSN is available. Rows travel as
//! `jsonb` so the rest of the pipeline sees the same JSON objects the REST API
//! returns.
use anyhow::{Context, Result};
use itertools::Itertools;
use sqlx::{types::Json, Postgres, QueryBuilder, Row as _};

use super::{key_string, ConflictPolicy, InQuery, PageQuery, Row, TableStore, WriteRequest};
use crate::util::db::Db;

pub struct PgTableStore {
    label: String,
    db: Db,
}

impl PgTableStore {
    pub fn new(label: &str, db: Db) -> Self {
        Self {
            label: label.to_string(),
            db,
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `schema.table` or bare `table` (defaults to `public`).
fn quote_table(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => format!("{}.{}", quote_ident("public"), quote_ident(table)),
    }
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns.iter().map(|c| quote_ident(c.as_ref())).join(", ")
}

fn conflict_columns(conflict_key: &str) -> Vec<&str> {
    conflict_key
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Statement text for a batch write; rows are bound as one `jsonb` array.
fn write_sql(request: &WriteRequest<'_>) -> String {
    let table = quote_table(request.table);
    let cols = column_list(request.columns);
    let conflict = conflict_columns(request.conflict_key);
    let updates = request
        .columns
        .iter()
        .filter(|c| !conflict.contains(&c.as_str()))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .join(", ");
    let insert = format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_recordset(NULL::{table}, $1)"
    );
    let action = match request.policy {
        ConflictPolicy::Insert => return insert,
        ConflictPolicy::Overwrite if !updates.is_empty() => format!("DO UPDATE SET {updates}"),
        _ => "DO NOTHING".to_string(),
    };
    format!("{insert} ON CONFLICT ({}) {action}", column_list(&conflict))
}

#[async_trait::async_trait]
impl TableStore for PgTableStore {
    fn name(&self) -> &str {
        &self.label
    }

    async fn select_page(&self, query: &PageQuery<'_>) -> Result<Vec<Row>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT to_jsonb(t) AS doc FROM (SELECT ");
        qb.push(column_list(query.columns));
        qb.push(" FROM ");
        qb.push(quote_table(query.table));
        for (i, f) in query.filters.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            qb.push(quote_ident(&f.column));
            match key_string(&f.value) {
                Some(v) => {
                    qb.push("::text = ");
                    qb.push_bind(v);
                }
                None => {
                    qb.push(" IS NULL");
                }
            }
        }
        qb.push(" ORDER BY ");
        qb.push(quote_ident(query.order_by));
        qb.push(" ASC OFFSET ");
        qb.push_bind(query.offset as i64);
        qb.push(" LIMIT ");
        qb.push_bind(query.limit as i64);
        qb.push(") t");

        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .with_context(|| format!("{} select {}", self.label, query.table))?;
        rows.iter()
            .map(|r| {
                r.try_get::<Json<Row>, _>("doc")
                    .map(|j| j.0)
                    .map_err(anyhow::Error::from)
            })
            .collect()
    }

    async fn select_in(&self, query: &InQuery<'_>) -> Result<Vec<Row>> {
        let keys: Vec<String> = query.values.iter().filter_map(key_string).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT to_jsonb(t) AS doc FROM (SELECT ");
        qb.push(column_list(query.columns));
        qb.push(" FROM ");
        qb.push(quote_table(query.table));
        qb.push(" WHERE ");
        qb.push(quote_ident(query.column));
        qb.push("::text = ANY(");
        qb.push_bind(keys);
        qb.push(")");
        if let Some(order) = query.order_by {
            qb.push(" ORDER BY ");
            qb.push(quote_ident(order));
            qb.push(" ASC");
        }
        qb.push(") t");

        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .with_context(|| format!("{} lookup {}", self.label, query.table))?;
        rows.iter()
            .map(|r| {
                r.try_get::<Json<Row>, _>("doc")
                    .map(|j| j.0)
                    .map_err(anyhow::Error::from)
            })
            .collect()
    }

    async fn write(&self, request: &WriteRequest<'_>) -> Result<()> {
        if request.rows.is_empty() {
            return Ok(());
        }
        let sql = write_sql(request);
        let payload = serde_json::Value::Array(
            request
                .rows
                .iter()
                .cloned()
                .map(serde_json::Value::Object)
                .collect(),
        );
        sqlx::query(&sql)
            .bind(Json(payload))
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("{} write {}", self.label, request.table))?;
        Ok(())
    }
}
