//! Storage abstraction for the migration engine.
//!
//! The engine never talks to a database directly; it goes through the
//! [`MigrationStore`] trait so the same registry, partitioning, checksum, and
//! bulk-write logic runs against the real MySQL backend (feature `mysql`) and
//! the in-memory backend used by tests and embedded deployments.
//!
//! All methods block the calling task; the engine awaits them sequentially
//! within one migration run.

mod memory;
#[cfg(feature = "mysql")]
mod mysql;

pub use memory::MemoryStore;
#[cfg(feature = "mysql")]
pub use mysql::MysqlStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Row, RowMetadata, TableSchema};
use crate::error::Result;
use crate::range::IdRange;

/// One foreign key whose delete rule is not RESTRICT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub constraint_name: String,
    pub delete_rule: String,
    pub table_name: String,
    pub referenced_table_name: String,
}

/// Row statistics for one table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TableStats {
    pub count: i64,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
}

/// Backend-neutral storage operations keyed by backup-id ranges.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Names of uniqueness constraints (primary or unique keys) backing the
    /// given column. Empty means the column is not unique.
    async fn unique_constraints(&self, table: &str, column: &str) -> Result<Vec<String>>;

    /// Whether the given column admits NULL.
    async fn column_nullable(&self, table: &str, column: &str) -> Result<bool>;

    /// All foreign keys in the schema whose delete rule is not RESTRICT.
    async fn nonrestricted_foreign_keys(&self) -> Result<Vec<ForeignKeyInfo>>;

    /// COUNT/MIN/MAX over the table's backup-id domain.
    async fn min_max_count(&self, table: &TableSchema) -> Result<TableStats>;

    /// One ordered page of full rows with backup id in `range`.
    ///
    /// Rows are ordered by backup id ascending; `offset` and `limit` page
    /// through the range.
    async fn fetch_page(
        &self,
        table: &TableSchema,
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Row>>;

    /// One ordered page of row metadata (id plus change token).
    ///
    /// The default implementation projects full rows; backends may override
    /// with a narrower read.
    async fn fetch_metadata_page(
        &self,
        table: &TableSchema,
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RowMetadata>> {
        let rows = self.fetch_page(table, range, limit, offset).await?;
        rows.iter()
            .map(|row| RowMetadata::from_row(table, row))
            .collect()
    }

    /// One ordered page of `(primary id, cardinality)` pairs, where
    /// cardinality is 1 plus the count of dependent rows owned by the id
    /// across all given secondary tables.
    async fn cardinality_page(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<(i64, u64)>>;

    /// Insert or update a homogeneous batch keyed by the backup id.
    ///
    /// Returns the number of rows written. Callers are responsible for
    /// keeping the payload under the store's statement size limit.
    async fn upsert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64>;

    /// Delete all rows with backup id in `range`, except ids in `exempt_ids`.
    /// Returns the number of rows removed.
    async fn delete_by_range(
        &self,
        table: &TableSchema,
        range: IdRange,
        exempt_ids: &[i64],
    ) -> Result<u64>;

    /// Toggle foreign-key and unique-key enforcement.
    ///
    /// The change must cover every statement later issued through this
    /// store until enforcement is restored. MySQL scopes these toggles to
    /// the session, so the backend there runs all statements on one
    /// dedicated connection. Callers must hold external mutual exclusion
    /// across concurrent writers while enforcement is off.
    async fn set_key_checks(&self, enabled: bool) -> Result<()>;
}
