//! In-memory store backend.
//!
//! Backs unit and integration tests and embedded single-process deployments.
//! Tables are keyed by backup id; a table marked non-unique (the shape of
//! secondary tables, whose backup id is the owning row's id) holds multiple
//! rows per id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::core::{Row, TableSchema};
use crate::error::{Result, SyncError};
use crate::range::IdRange;

use super::{ForeignKeyInfo, MigrationStore, TableStats};

/// Rows of one table, grouped by backup id in id order.
type TableData = BTreeMap<i64, Vec<Row>>;

/// In-memory [`MigrationStore`] implementation.
pub struct MemoryStore {
    tables: Mutex<HashMap<String, TableData>>,
    /// `TABLE.COLUMN` pairs that lack a uniqueness constraint. Tables listed
    /// here store multiple rows per backup id.
    non_unique: HashSet<String>,
    /// `TABLE.COLUMN` pairs that admit NULL.
    nullable: HashSet<String>,
    foreign_keys: Vec<ForeignKeyInfo>,
    key_checks_enabled: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            non_unique: HashSet::new(),
            nullable: HashSet::new(),
            foreign_keys: Vec::new(),
            key_checks_enabled: AtomicBool::new(true),
        }
    }

    /// Mark a column as lacking a uniqueness constraint. Secondary tables
    /// must mark their backup id column this way so multiple dependent rows
    /// can share one owner id.
    pub fn mark_non_unique(mut self, table: &str, column: &str) -> Self {
        self.non_unique.insert(Self::key(table, column));
        self
    }

    /// Mark a column as nullable.
    pub fn mark_nullable(mut self, table: &str, column: &str) -> Self {
        self.nullable.insert(Self::key(table, column));
        self
    }

    /// Declare a non-restricted foreign key, visible to registry validation.
    pub fn with_foreign_key(mut self, fk: ForeignKeyInfo) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Whether key enforcement is currently on. Exposed for tests of the
    /// suspension scope.
    pub fn key_checks_enabled(&self) -> bool {
        self.key_checks_enabled.load(Ordering::SeqCst)
    }

    /// Total rows currently stored for a table.
    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().expect("store lock");
        tables
            .get(table)
            .map(|t| t.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn key(table: &str, column: &str) -> String {
        format!("{}.{}", table, column)
    }

    fn id_is_unique(&self, table: &TableSchema) -> bool {
        match table.backup_id_index() {
            Some(idx) => !self
                .non_unique
                .contains(&Self::key(&table.name, &table.fields[idx].name)),
            None => true,
        }
    }

    /// Flatten rows in `range` in ascending id order.
    fn rows_in_range(data: &TableData, range: IdRange) -> impl Iterator<Item = &Row> {
        data.range(range.minimum_id..range.maximum_id)
            .flat_map(|(_, rows)| rows.iter())
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn unique_constraints(&self, table: &str, column: &str) -> Result<Vec<String>> {
        if self.non_unique.contains(&Self::key(table, column)) {
            Ok(Vec::new())
        } else {
            Ok(vec!["PRIMARY".to_string()])
        }
    }

    async fn column_nullable(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self.nullable.contains(&Self::key(table, column)))
    }

    async fn nonrestricted_foreign_keys(&self) -> Result<Vec<ForeignKeyInfo>> {
        Ok(self.foreign_keys.clone())
    }

    async fn min_max_count(&self, table: &TableSchema) -> Result<TableStats> {
        let tables = self.tables.lock().expect("store lock");
        let data = match tables.get(&table.name) {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(TableStats::default()),
        };
        Ok(TableStats {
            count: data.values().map(|rows| rows.len() as i64).sum(),
            min_id: data.keys().next().copied(),
            max_id: data.keys().next_back().copied(),
        })
    }

    async fn fetch_page(
        &self,
        table: &TableSchema,
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Row>> {
        range.validate()?;
        let tables = self.tables.lock().expect("store lock");
        let Some(data) = tables.get(&table.name) else {
            return Ok(Vec::new());
        };
        Ok(Self::rows_in_range(data, range)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn cardinality_page(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<(i64, u64)>> {
        range.validate()?;
        let tables = self.tables.lock().expect("store lock");
        let Some(data) = tables.get(&primary.name) else {
            return Ok(Vec::new());
        };
        let page: Vec<(i64, u64)> = data
            .range(range.minimum_id..range.maximum_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|(id, _)| {
                let dependents: u64 = secondaries
                    .iter()
                    .map(|s| {
                        tables
                            .get(&s.name)
                            .and_then(|t| t.get(id))
                            .map(|rows| rows.len() as u64)
                            .unwrap_or(0)
                    })
                    .sum();
                (*id, 1 + dependents)
            })
            .collect();
        Ok(page)
    }

    async fn upsert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64> {
        let unique = self.id_is_unique(table);
        let mut tables = self.tables.lock().expect("store lock");
        let data = tables.entry(table.name.clone()).or_default();
        let mut written = 0u64;
        for row in rows {
            let id = row.backup_id(table)?;
            let bucket = data.entry(id).or_default();
            if unique {
                bucket.clear();
                bucket.push(row.clone());
            } else if !bucket.contains(row) {
                bucket.push(row.clone());
            }
            written += 1;
        }
        Ok(written)
    }

    async fn delete_by_range(
        &self,
        table: &TableSchema,
        range: IdRange,
        exempt_ids: &[i64],
    ) -> Result<u64> {
        range.validate()?;
        let mut tables = self.tables.lock().expect("store lock");
        let Some(data) = tables.get_mut(&table.name) else {
            return Ok(0);
        };
        let doomed: Vec<i64> = data
            .range(range.minimum_id..range.maximum_id)
            .map(|(id, _)| *id)
            .filter(|id| !exempt_ids.contains(id))
            .collect();
        let mut removed = 0u64;
        for id in doomed {
            if let Some(rows) = data.remove(&id) {
                removed += rows.len() as u64;
            }
        }
        debug!(
            "deleted {} rows from {} in [{}, {})",
            removed, table.name, range.minimum_id, range.maximum_id
        );
        Ok(removed)
    }

    async fn set_key_checks(&self, enabled: bool) -> Result<()> {
        self.key_checks_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// Seed helper used by tests: insert rows directly, bypassing the writer.
impl MemoryStore {
    pub fn seed(&self, table: &TableSchema, rows: Vec<Row>) -> Result<()> {
        let unique = self.id_is_unique(table);
        let mut tables = self.tables.lock().expect("store lock");
        let data = tables.entry(table.name.clone()).or_default();
        for row in rows {
            let id = row.backup_id(table)?;
            let bucket = data.entry(id).or_default();
            if unique && !bucket.is_empty() {
                return Err(SyncError::storage(format!(
                    "duplicate backup id {} for table {}",
                    id, table.name
                )));
            }
            bucket.push(row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnValue, FieldSchema, FieldType};

    fn node_schema() -> TableSchema {
        TableSchema::new(
            "NODE",
            vec![
                FieldSchema::backup_id("ID"),
                FieldSchema::etag("ETAG"),
                FieldSchema::new("NAME", FieldType::Text),
            ],
        )
    }

    fn node(id: i64, etag: &str) -> Row {
        Row::new(vec![
            ColumnValue::Int(id),
            ColumnValue::Text(etag.into()),
            ColumnValue::Text(format!("n{}", id)),
        ])
    }

    #[tokio::test]
    async fn test_upsert_and_fetch_page_ordered() {
        let store = MemoryStore::new();
        let schema = node_schema();
        store
            .upsert_batch(&schema, &[node(3, "c"), node(1, "a"), node(2, "b")])
            .await
            .unwrap();

        let page = store
            .fetch_page(&schema, IdRange::new(0, 100), 10, 0)
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.backup_id(&schema).unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_for_unique_tables() {
        let store = MemoryStore::new();
        let schema = node_schema();
        let batch = vec![node(1, "a"), node(2, "b")];
        store.upsert_batch(&schema, &batch).await.unwrap();
        store.upsert_batch(&schema, &batch).await.unwrap();
        assert_eq!(store.row_count("NODE"), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_changed_row() {
        let store = MemoryStore::new();
        let schema = node_schema();
        store.upsert_batch(&schema, &[node(1, "a")]).await.unwrap();
        store.upsert_batch(&schema, &[node(1, "a2")]).await.unwrap();

        let page = store
            .fetch_page(&schema, IdRange::new(0, 100), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].etag(&schema).as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_non_unique_table_holds_multiple_rows_per_id() {
        let schema = TableSchema::new(
            "NODE_ANNOTATION",
            vec![
                FieldSchema::backup_id("OWNER_ID"),
                FieldSchema::new("KEY", FieldType::Text),
            ],
        );
        let store = MemoryStore::new().mark_non_unique("NODE_ANNOTATION", "OWNER_ID");
        let rows = vec![
            Row::new(vec![ColumnValue::Int(1), ColumnValue::Text("k1".into())]),
            Row::new(vec![ColumnValue::Int(1), ColumnValue::Text("k2".into())]),
        ];
        store.upsert_batch(&schema, &rows).await.unwrap();
        assert_eq!(store.row_count("NODE_ANNOTATION"), 2);

        // Replay does not duplicate.
        store.upsert_batch(&schema, &rows).await.unwrap();
        assert_eq!(store.row_count("NODE_ANNOTATION"), 2);
    }

    #[tokio::test]
    async fn test_delete_by_range_respects_exemptions() {
        let store = MemoryStore::new();
        let schema = node_schema();
        store
            .upsert_batch(&schema, &[node(1, "a"), node(2, "b"), node(3, "c")])
            .await
            .unwrap();

        let removed = store
            .delete_by_range(&schema, IdRange::new(1, 3), &[2])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let page = store
            .fetch_page(&schema, IdRange::new(0, 100), 10, 0)
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.backup_id(&schema).unwrap()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_min_max_count() {
        let store = MemoryStore::new();
        let schema = node_schema();
        assert_eq!(
            store.min_max_count(&schema).await.unwrap(),
            TableStats::default()
        );

        store
            .upsert_batch(&schema, &[node(5, "a"), node(9, "b")])
            .await
            .unwrap();
        let stats = store.min_max_count(&schema).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_id, Some(5));
        assert_eq!(stats.max_id, Some(9));
    }

    #[tokio::test]
    async fn test_cardinality_includes_dependents() {
        let primary = node_schema();
        let secondary = TableSchema::new(
            "NODE_ANNOTATION",
            vec![
                FieldSchema::backup_id("OWNER_ID"),
                FieldSchema::new("KEY", FieldType::Text),
            ],
        );
        let store = MemoryStore::new().mark_non_unique("NODE_ANNOTATION", "OWNER_ID");
        store
            .upsert_batch(&primary, &[node(1, "a"), node(2, "b")])
            .await
            .unwrap();
        store
            .upsert_batch(
                &secondary,
                &[
                    Row::new(vec![ColumnValue::Int(2), ColumnValue::Text("k1".into())]),
                    Row::new(vec![ColumnValue::Int(2), ColumnValue::Text("k2".into())]),
                ],
            )
            .await
            .unwrap();

        let page = store
            .cardinality_page(&primary, &[secondary], IdRange::new(0, 100), 10, 0)
            .await
            .unwrap();
        assert_eq!(page, vec![(1, 1), (2, 3)]);
    }

    #[tokio::test]
    async fn test_key_checks_toggle() {
        let store = MemoryStore::new();
        assert!(store.key_checks_enabled());
        store.set_key_checks(false).await.unwrap();
        assert!(!store.key_checks_enabled());
        store.set_key_checks(true).await.unwrap();
        assert!(store.key_checks_enabled());
    }
}
