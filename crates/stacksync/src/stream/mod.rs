//! Bounded-memory paginated row streaming.
//!
//! Wraps a table, an id range, and a page size into a restartable
//! (per-construction, not mid-stream) pull-based sequence. The next page is
//! fetched exactly when the in-memory page is exhausted; at most one page is
//! held in memory at a time, and iteration terminates when a fetched page
//! comes back empty.

use crate::core::{Row, RowMetadata, TableSchema};
use crate::error::Result;
use crate::range::IdRange;
use crate::store::MigrationStore;

/// Pull-based stream of full rows over one table's id range.
pub struct RowStream<'a> {
    store: &'a dyn MigrationStore,
    table: &'a TableSchema,
    range: IdRange,
    page_size: i64,
    offset: i64,
    page: std::vec::IntoIter<Row>,
    exhausted: bool,
}

impl<'a> RowStream<'a> {
    pub fn new(
        store: &'a dyn MigrationStore,
        table: &'a TableSchema,
        range: IdRange,
        page_size: i64,
    ) -> Self {
        debug_assert!(page_size > 0);
        Self {
            store,
            table,
            range,
            page_size,
            offset: 0,
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    /// Pull the next row, fetching the next page first if the current one is
    /// spent. This is the sole suspension point of the read path.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.page.next() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self
                .store
                .fetch_page(self.table, self.range, self.page_size, self.offset)
                .await?;
            self.offset += self.page_size;
            if page.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }
            self.page = page.into_iter();
        }
    }
}

/// Pull-based stream of row metadata, same pagination contract as
/// [`RowStream`].
pub struct MetadataStream<'a> {
    store: &'a dyn MigrationStore,
    table: &'a TableSchema,
    range: IdRange,
    page_size: i64,
    offset: i64,
    page: std::vec::IntoIter<RowMetadata>,
    exhausted: bool,
}

impl<'a> MetadataStream<'a> {
    pub fn new(
        store: &'a dyn MigrationStore,
        table: &'a TableSchema,
        range: IdRange,
        page_size: i64,
    ) -> Self {
        debug_assert!(page_size > 0);
        Self {
            store,
            table,
            range,
            page_size,
            offset: 0,
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<RowMetadata>> {
        loop {
            if let Some(meta) = self.page.next() {
                return Ok(Some(meta));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self
                .store
                .fetch_metadata_page(self.table, self.range, self.page_size, self.offset)
                .await?;
            self.offset += self.page_size;
            if page.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }
            self.page = page.into_iter();
        }
    }
}
