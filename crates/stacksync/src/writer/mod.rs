//! Bulk restore writer.
//!
//! Restores replay rows whose foreign key targets may arrive in a later
//! batch, so every write and ranged delete runs inside a scope that suspends
//! referential and uniqueness enforcement and restores it before returning,
//! whether the operation succeeded or not. When both the operation and the
//! restore fail, the operation's error wins and the restore failure is
//! logged.

use tracing::{debug, error};

use crate::batch::prepare_batches;
use crate::core::{Row, TableSchema};
use crate::error::Result;
use crate::range::IdRange;
use crate::store::MigrationStore;

/// Writes restored rows in byte-budgeted batches with checks suspended.
pub struct BulkWriter<'a> {
    store: &'a dyn MigrationStore,
    max_payload_bytes: usize,
}

impl<'a> BulkWriter<'a> {
    pub fn new(store: &'a dyn MigrationStore, max_payload_bytes: usize) -> Self {
        Self {
            store,
            max_payload_bytes,
        }
    }

    /// Insert or update `rows`, splitting them into payload-budgeted batches.
    /// Returns the backup ids of the written rows in input order. An empty
    /// input is a no-op and never touches check state.
    pub async fn create_or_update_batch(
        &self,
        table: &TableSchema,
        rows: Vec<Row>,
    ) -> Result<Vec<i64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.backup_id(table)?);
        }

        let batches = prepare_batches(rows, self.max_payload_bytes);
        debug!(
            "writing {} rows to {} in {} batches",
            ids.len(),
            table.name,
            batches.len()
        );
        self.run_with_checks_suspended(async {
            for batch in &batches {
                self.store.upsert_batch(table, batch).await?;
            }
            Ok(())
        })
        .await?;
        Ok(ids)
    }

    /// Delete every row of `table` within `range` except the exempt ids,
    /// returning the number of rows removed.
    pub async fn delete_by_range(
        &self,
        table: &TableSchema,
        range: IdRange,
        exempt_ids: &[i64],
    ) -> Result<u64> {
        range.validate()?;
        self.run_with_checks_suspended(self.store.delete_by_range(table, range, exempt_ids))
            .await
    }

    /// Run `operation` with referential and uniqueness checks suspended,
    /// restoring them unconditionally afterwards.
    async fn run_with_checks_suspended<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        self.store.set_key_checks(false).await?;
        let outcome = operation.await;
        if let Err(restore_err) = self.store.set_key_checks(true).await {
            if outcome.is_ok() {
                return Err(restore_err);
            }
            error!("failed to restore key checks: {}", restore_err);
        }
        outcome
    }
}
