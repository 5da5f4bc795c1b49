use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use itertools::Itertools;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ConflictPolicy, InQuery, ObjectStore, PageQuery, Row, TableStore, WriteRequest};

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Supabase project reached over HTTP: PostgREST for tables
/// (`/rest/v1/<table>`) and the Storage API for objects
/// (`/storage/v1/object/<bucket>/<path>`).
#[derive(Debug, Clone)]
pub struct RestBackend {
    label: String,
    base_url: String,
    api_key: String,
    http: Client,
}

impl RestBackend {
    pub fn new(label: &str, base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("platform-migrate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            label: label.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Object endpoint. Characters a path cannot carry are escaped, existing
    /// `%XX` escapes pass through untouched.
    fn object_url(&self, bucket: &str, path: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.base_url)
            .with_context(|| format!("{} invalid project url", self.label))?;
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}/storage/v1/object/{bucket}/{path}"));
        Ok(url.to_string())
    }

    async fn check(&self, what: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!(
            "{} {} failed with {}: {}",
            self.label,
            what,
            status.as_u16(),
            truncate_for_log(body, 300)
        ))
    }
}

/// Percent-encode each path segment, keeping the separators.
/// Render a value for a PostgREST `eq.` filter.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Render an `in.(…)` list; strings are always double-quoted so commas and
/// parentheses inside ids survive.
fn in_list(values: &[Value]) -> String {
    let items = values
        .iter()
        .map(|v| match v {
            Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            other => other.to_string(),
        })
        .join(",");
    format!("in.({items})")
}

fn prefer_header(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::Overwrite => "resolution=merge-duplicates,return=minimal",
        ConflictPolicy::IgnoreDuplicates => "resolution=ignore-duplicates,return=minimal",
        ConflictPolicy::Insert => "return=minimal",
    }
}

#[async_trait::async_trait]
impl TableStore for RestBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn select_page(&self, query: &PageQuery<'_>) -> Result<Vec<Row>> {
        let mut params: Vec<(String, String)> = vec![
            ("select".into(), query.columns.join(",")),
            ("order".into(), format!("{}.asc", query.order_by)),
            ("offset".into(), query.offset.to_string()),
            ("limit".into(), query.limit.to_string()),
        ];
        for f in query.filters {
            params.push((f.column.clone(), format!("eq.{}", filter_literal(&f.value))));
        }
        debug!(backend = %self.label, table = query.table, offset = query.offset, limit = query.limit, "select page");
        let resp = self
            .auth(self.http.get(self.table_url(query.table)))
            .query(&params)
            .send()
            .await
            .with_context(|| format!("{} select {}", self.label, query.table))?;
        let resp = self.check(&format!("select {}", query.table), resp).await?;
        let rows: Vec<Row> = resp
            .json()
            .await
            .with_context(|| format!("{} select {}: invalid JSON", self.label, query.table))?;
        Ok(rows)
    }

    async fn select_in(&self, query: &InQuery<'_>) -> Result<Vec<Row>> {
        if query.values.is_empty() {
            return Ok(Vec::new());
        }
        let mut params: Vec<(String, String)> = vec![
            ("select".into(), query.columns.join(",")),
            (query.column.to_string(), in_list(query.values)),
        ];
        if let Some(order) = query.order_by {
            params.push(("order".into(), format!("{order}.asc")));
        }
        let resp = self
            .auth(self.http.get(self.table_url(query.table)))
            .query(&params)
            .send()
            .await
            .with_context(|| format!("{} lookup {}", self.label, query.table))?;
        let resp = self.check(&format!("lookup {}", query.table), resp).await?;
        let rows: Vec<Row> = resp
            .json()
            .await
            .with_context(|| format!("{} lookup {}: invalid JSON", self.label, query.table))?;
        Ok(rows)
    }

    async fn write(&self, request: &WriteRequest<'_>) -> Result<()> {
        if request.rows.is_empty() {
            return Ok(());
        }
        let mut params = vec![("columns", request.columns.join(","))];
        if request.policy != ConflictPolicy::Insert {
            params.push(("on_conflict", request.conflict_key.to_string()));
        }
        let resp = self
            .auth(self.http.post(self.table_url(request.table)))
            .query(&params)
            .header("Prefer", prefer_header(request.policy))
            .json(request.rows)
            .send()
            .await
            .with_context(|| format!("{} write {}", self.label, request.table))?;
        self.check(&format!("write {}", request.table), resp).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for RestBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes> {
        let resp = self
            .auth(self.http.get(self.object_url(bucket, path)?))
            .send()
            .await
            .with_context(|| format!("{} download {bucket}/{path}", self.label))?;
        let resp = self.check(&format!("download {bucket}/{path}"), resp).await?;
        Ok(resp.bytes().await?)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let resp = self
            .auth(self.http.post(self.object_url(bucket, path)?))
            .header("x-upsert", "true")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "max-age=3600")
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("{} upload {bucket}/{path}", self.label))?;
        self.check(&format!("upload {bucket}/{path}"), resp).await?;
        Ok(())
    }
}
