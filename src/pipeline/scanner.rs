//! Offset pagination over one table in ascending key order.
use crate::backend::{Filter, PageQuery, Row, TableStore};
use crate::error::MigrateResult;
use crate::pipeline::retry::RetryExecutor;

/// Position of a scan. Only ever moves forward, one full page at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationCursor {
    offset: usize,
    page_size: usize,
}

impl MigrationCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            offset: 0,
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn advance(&mut self) {
        self.offset = self.offset.saturating_add(self.page_size);
    }

    /// A page shorter than the window is the last one.
    pub fn is_terminal(&self, fetched: usize) -> bool {
        fetched < self.page_size
    }
}

pub struct PaginatedScanner<'a> {
    store: &'a dyn TableStore,
    retry: &'a RetryExecutor,
    table: &'a str,
    columns: &'a [&'a str],
    key: &'a str,
    filters: &'a [Filter],
}

impl<'a> PaginatedScanner<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        retry: &'a RetryExecutor,
        table: &'a str,
        columns: &'a [&'a str],
        key: &'a str,
        filters: &'a [Filter],
    ) -> Self {
        Self {
            store,
            retry,
            table,
            columns,
            key,
            filters,
        }
    }

    /// Fetch the window at `cursor`. Fewer than `page_size` rows (possibly
    /// none) means the scan is over.
    pub async fn next_page(&self, cursor: &MigrationCursor) -> MigrateResult<Vec<Row>> {
        let query = PageQuery {
            table: self.table,
            columns: self.columns,
            filters: self.filters,
            order_by: self.key,
            offset: cursor.offset(),
            limit: cursor.page_size(),
        };
        let label = format!("{}: select {} @{}", self.store.name(), self.table, cursor.offset());
        self.retry
            .execute(&label, || self.store.select_page(&query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{row, MemoryTables};
    use crate::error::MigrateError;
    use crate::pipeline::retry::test_support::instant_executor;
    use serde_json::json;

    fn seeded(n: i64) -> MemoryTables {
        let store = MemoryTables::new();
        // inserted out of order on purpose
        let rows = (1..=n)
            .rev()
            .map(|i| row(json!({"id": i, "country": if i % 2 == 0 { "LK" } else { "IN" }})))
            .collect();
        store.insert_rows("profiles", rows);
        store
    }

    #[test]
    fn cursor_advances_by_page_size() {
        let mut cursor = MigrationCursor::new(50);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.offset(), 100);
        assert!(cursor.is_terminal(49));
        assert!(!cursor.is_terminal(50));
        assert_eq!(MigrationCursor::new(0).page_size(), 1);
    }

    #[tokio::test]
    async fn walks_every_row_once_in_key_order() {
        let store = seeded(25);
        let retry = instant_executor(0);
        let scanner = PaginatedScanner::new(&store, &retry, "profiles", &["id"], "id", &[]);
        let mut cursor = MigrationCursor::new(10);
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = scanner.next_page(&cursor).await.unwrap();
            pages += 1;
            seen.extend(page.iter().map(|r| r["id"].as_i64().unwrap()));
            if cursor.is_terminal(page.len()) {
                break;
            }
            cursor.advance();
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn applies_equality_filters() {
        let store = seeded(10);
        let retry = instant_executor(0);
        let filters = [Filter::eq("country", "LK")];
        let scanner = PaginatedScanner::new(&store, &retry, "profiles", &["id"], "id", &filters);
        let page = scanner.next_page(&MigrationCursor::new(100)).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 4, 6, 8, 10]);
        assert!(page.iter().all(|r| !r.contains_key("country")));
    }

    #[tokio::test]
    async fn retries_failed_window_fetch() {
        let store = seeded(3);
        store.fail_next("select:profiles", 2);
        let retry = instant_executor(2);
        let scanner = PaginatedScanner::new(&store, &retry, "profiles", &["id"], "id", &[]);
        let page = scanner.next_page(&MigrationCursor::new(10)).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn surfaces_exhaustion() {
        let store = seeded(3);
        store.fail_next("select:profiles", 5);
        let retry = instant_executor(1);
        let scanner = PaginatedScanner::new(&store, &retry, "profiles", &["id"], "id", &[]);
        let err = scanner.next_page(&MigrationCursor::new(10)).await.unwrap_err();
        assert!(matches!(err, MigrateError::ExhaustedRetry { attempts: 2, .. }));
    }
}
