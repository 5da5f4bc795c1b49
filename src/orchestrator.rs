//! Drives one job: scan → related rows → dedup → transfers → overlay → mapping
//! → expansion → upsert, page after page.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{is_non_empty, key_string, ObjectStore, Row, TableStore};
use crate::config::MigrationConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::pipeline::dedup::DedupGate;
use crate::pipeline::job::{JobSpec, Side, TransferField};
use crate::pipeline::lookup::KeyedLookup;
use crate::pipeline::mapping::apply_overlay;
use crate::pipeline::retry::RetryExecutor;
use crate::pipeline::scanner::{MigrationCursor, PaginatedScanner};
use crate::pipeline::transfer::{ObjectTransferPipeline, TransferReference};
use crate::pipeline::upsert::UpsertWriter;

/// Both sides of the migration.
#[derive(Clone)]
pub struct Backends {
    pub source_tables: Arc<dyn TableStore>,
    pub source_objects: Arc<dyn ObjectStore>,
    pub destination_tables: Arc<dyn TableStore>,
    pub destination_objects: Arc<dyn ObjectStore>,
}

impl Backends {
    fn tables(&self, side: Side) -> &dyn TableStore {
        match side {
            Side::Source => self.source_tables.as_ref(),
            Side::Destination => self.destination_tables.as_ref(),
        }
    }
}

/// One object field that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSkip {
    pub key: String,
    pub field: String,
    pub bucket: Option<String>,
    pub path: Option<String>,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub pages: usize,
    /// Scanned rows.
    pub visited: usize,
    /// Rows considered for migration (related rows when the job has them).
    pub candidates: usize,
    /// Candidates already complete in staging.
    pub deduped: usize,
    pub transferred: usize,
    /// Object fields reused from staging instead of copied again.
    pub carried_over: usize,
    pub written: usize,
    /// Rows left out: no key, nothing transferred, or a required field missing.
    pub dropped: usize,
    pub field_skips: Vec<FieldSkip>,
}

impl RunSummary {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Default::default()
        }
    }

    /// Distinct row keys with at least one skipped field, for manual follow-up.
    pub fn skipped_keys(&self) -> Vec<String> {
        self.field_skips
            .iter()
            .map(|s| s.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

enum FieldOutcome {
    Transferred,
    CarriedOver,
    Untouched,
    Skipped,
}

pub struct Orchestrator {
    config: MigrationConfig,
    backends: Backends,
    retry: RetryExecutor,
}

impl Orchestrator {
    pub fn new(config: MigrationConfig, backends: Backends, retry: RetryExecutor) -> Self {
        Self {
            config,
            backends,
            retry,
        }
    }

    /// Run `job` to completion. Only an exhausted retry budget on a table
    /// call ends the run early; object failures are recorded in the summary.
    pub async fn run(&self, job: &JobSpec) -> MigrateResult<RunSummary> {
        let scanner = PaginatedScanner::new(
            self.backends.tables(job.scan.side),
            &self.retry,
            job.scan.table,
            job.scan.columns,
            job.scan.key,
            &job.scan.filters,
        );
        let writer = UpsertWriter::new(
            self.backends.destination_tables.as_ref(),
            &self.retry,
            job.write.table,
            job.write.conflict_key,
            job.write.policy,
        );
        let transfers = ObjectTransferPipeline::new(
            self.backends.source_objects.as_ref(),
            self.backends.destination_objects.as_ref(),
            &self.retry,
            &self.config.destination.project_url,
            &self.config.download_dir,
            &self.config.avatar,
        );

        info!(
            job = job.name,
            scan = %format!("{}.{}", job.scan.side.as_str(), job.scan.table),
            target = job.write.table,
            policy = job.write.policy.as_str(),
            page_size = self.config.batch_size,
            "migrate: starting job"
        );

        let mut summary = RunSummary::new(job.name);
        let mut cursor = MigrationCursor::new(self.config.batch_size);
        loop {
            let page = scanner.next_page(&cursor).await?;
            if page.is_empty() {
                break;
            }
            summary.pages += 1;
            summary.visited += page.len();

            let skips_before = summary.field_skips.len();
            let rows = self
                .prepare_page(job, &page, &transfers, &mut summary)
                .await?;
            let written = writer.write(&rows).await?;
            summary.written += written;

            info!(
                job = job.name,
                offset = cursor.offset(),
                fetched = page.len(),
                written,
                field_skips = summary.field_skips.len() - skips_before,
                total_written = summary.written,
                "migrate: page done"
            );

            if cursor.is_terminal(page.len()) {
                break;
            }
            cursor.advance();
        }

        info!(
            job = job.name,
            pages = summary.pages,
            visited = summary.visited,
            candidates = summary.candidates,
            deduped = summary.deduped,
            transferred = summary.transferred,
            carried_over = summary.carried_over,
            written = summary.written,
            dropped = summary.dropped,
            field_skips = summary.field_skips.len(),
            "migrate: job finished"
        );
        Ok(summary)
    }

    /// Turn one scanned page into the rows to write.
    async fn prepare_page(
        &self,
        job: &JobSpec,
        page: &[Row],
        transfers: &ObjectTransferPipeline<'_>,
        summary: &mut RunSummary,
    ) -> MigrateResult<Vec<Row>> {
        let candidates = match &job.related {
            Some(related) => {
                let keys = key_values(page, job.scan.key);
                KeyedLookup {
                    store: self.backends.tables(related.side),
                    retry: &self.retry,
                    table: related.table,
                    columns: related.columns,
                    column: related.match_column,
                    chunk: self.config.lookup_chunk,
                }
                .fetch(&keys, Some(related.key))
                .await?
            }
            None => page.to_vec(),
        };
        summary.candidates += candidates.len();

        let key_column = job.candidate_key();
        let keys = key_values(&candidates, key_column);

        let (pending, staged) = match &job.dedup {
            Some(spec) => {
                let (pending, staged) = DedupGate::new(
                    self.backends.destination_tables.as_ref(),
                    &self.retry,
                    spec,
                    self.config.lookup_chunk,
                )
                .partition(&keys)
                .await?;
                let pending: HashSet<String> = pending.iter().filter_map(key_string).collect();
                (Some(pending), staged)
            }
            None => (None, HashMap::new()),
        };

        let overlays = match &job.overlay {
            Some(spec) => {
                let mut columns = vec![spec.key_column];
                columns.extend(spec.fields.iter().copied());
                KeyedLookup {
                    store: self.backends.tables(spec.side),
                    retry: &self.retry,
                    table: spec.table,
                    columns: &columns,
                    column: spec.key_column,
                    chunk: self.config.lookup_chunk,
                }
                .fetch_map(&keys)
                .await?
            }
            None => HashMap::new(),
        };

        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(key) = candidate.get(key_column).and_then(key_string) else {
                warn!(job = job.name, key_column, "migrate: row without key dropped");
                summary.dropped += 1;
                continue;
            };
            let staging = staged.get(&key);
            if pending.as_ref().is_some_and(|p| !p.contains(&key)) {
                summary.deduped += 1;
                continue;
            }

            let mut row = candidate;
            let mut moved = 0;
            for field in &job.transfers {
                let outcome = self
                    .migrate_field(transfers, &key, field, &mut row, staging, summary)
                    .await;
                match outcome {
                    FieldOutcome::Transferred => {
                        summary.transferred += 1;
                        moved += 1;
                    }
                    FieldOutcome::CarriedOver => {
                        summary.carried_over += 1;
                        moved += 1;
                    }
                    FieldOutcome::Untouched if job.write.only_transferred => {
                        row.remove(field.field);
                    }
                    FieldOutcome::Untouched | FieldOutcome::Skipped => {}
                }
            }
            if job.write.only_transferred && moved == 0 {
                summary.dropped += 1;
                continue;
            }

            if let Some(spec) = &job.overlay {
                apply_overlay(&mut row, overlays.get(&key), spec);
            }
            let row = job.mapping.apply(row);
            if let Some(missing) = job
                .write
                .require_fields
                .iter()
                .find(|f| !row.get(**f).is_some_and(is_non_empty))
            {
                debug!(job = job.name, key, field = *missing, "migrate: required field missing, row dropped");
                summary.dropped += 1;
                continue;
            }
            match job.expand {
                Some(expand) => out.extend(expand(&row)),
                None => out.push(row),
            }
        }
        Ok(out)
    }

    /// Resolve one object field of `row` in place. Failures never escape: the
    /// field is removed and the skip recorded.
    async fn migrate_field(
        &self,
        transfers: &ObjectTransferPipeline<'_>,
        key: &str,
        field: &TransferField,
        row: &mut Row,
        staging: Option<&Row>,
        summary: &mut RunSummary,
    ) -> FieldOutcome {
        if let Some(done) = staging
            .and_then(|s| s.get(field.field))
            .filter(|v| is_non_empty(v))
        {
            row.insert(field.field.to_string(), done.clone());
            return FieldOutcome::CarriedOver;
        }

        let value = row.get(field.field).cloned().unwrap_or(Value::Null);
        let reference = match TransferReference::parse(field, &value) {
            Ok(Some(reference)) => reference,
            Ok(None) => return FieldOutcome::Untouched,
            Err(err) => {
                self.record_skip(summary, key, field, None, &err);
                row.remove(field.field);
                return FieldOutcome::Skipped;
            }
        };

        match transfers.transfer(key, field, &reference).await {
            Ok(object) => {
                row.insert(field.field.to_string(), Value::String(object.url));
                FieldOutcome::Transferred
            }
            Err(err) => {
                self.record_skip(summary, key, field, Some(&reference), &err);
                row.remove(field.field);
                FieldOutcome::Skipped
            }
        }
    }

    fn record_skip(
        &self,
        summary: &mut RunSummary,
        key: &str,
        field: &TransferField,
        reference: Option<&TransferReference>,
        err: &MigrateError,
    ) {
        let location = reference.and_then(TransferReference::location);
        let bucket = location.map(|l| l.bucket.clone());
        let path = location.map(|l| l.path.clone());
        warn!(
            job = %summary.job,
            key,
            field = field.field,
            bucket = bucket.as_deref().unwrap_or("-"),
            path = path.as_deref().unwrap_or("-"),
            kind = err.kind(),
            error = %err,
            "migrate: field skipped"
        );
        summary.field_skips.push(FieldSkip {
            key: key.to_string(),
            field: field.field.to_string(),
            bucket,
            path,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }
}

fn key_values(rows: &[Row], column: &str) -> Vec<Value> {
    rows.iter()
        .filter_map(|r| r.get(column))
        .filter(|v| key_string(v).is_some())
        .cloned()
        .collect()
}
