//! Salted range checksums for cross-stack divergence detection.
//!
//! Checksums are computed engine-side from row metadata so two stacks on
//! different storage backends produce byte-identical digests for identical
//! content. Each digest is a SHA-256 over the caller's salt followed by one
//! line per row, `TABLE:id:token`, where the token is the row's change token.
//! Primary rows are folded in ascending id order, then each dependent table's
//! rows in declaration order, also ascending. The salt defeats replaying a
//! digest captured from an earlier comparison.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{MigrationType, RowMetadata, TableSchema};
use crate::error::{Result, SyncError};
use crate::range::IdRange;
use crate::store::MigrationStore;
use crate::stream::MetadataStream;

/// Parameters for a binned batch checksum pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChecksumRequest {
    pub migration_type: MigrationType,
    /// Half-open id range to cover.
    pub range: IdRange,
    /// Bin width: a row with id `n` lands in bin `n div batch_size`.
    pub batch_size: u64,
    pub salt: String,
}

impl BatchChecksumRequest {
    /// Reject malformed requests before any I/O is issued.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::validation(format!(
                "Batch size must be greater than zero for {}",
                self.migration_type
            )));
        }
        if self.salt.is_empty() {
            return Err(SyncError::validation(
                "Checksum salt cannot be empty",
            ));
        }
        self.range.validate()
    }
}

/// Digest of one bin of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeChecksum {
    pub bin_number: i64,
    /// Smallest id folded into this bin.
    pub minimum_id: i64,
    /// Largest id folded into this bin.
    pub maximum_id: i64,
    /// Rows folded, dependents included.
    pub row_count: u64,
    pub checksum: String,
}

/// Folds row metadata into range and bin digests.
pub struct ChecksumCalculator<'a> {
    store: &'a dyn MigrationStore,
    page_size: i64,
}

impl<'a> ChecksumCalculator<'a> {
    pub fn new(store: &'a dyn MigrationStore, page_size: i64) -> Self {
        Self { store, page_size }
    }

    /// Digest of every row of a type within `range`, or `None` when the
    /// range holds no rows at all. An empty side and a side with rows must
    /// never compare equal, hence the sentinel instead of a digest of
    /// nothing.
    pub async fn checksum_for_range(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        range: IdRange,
        salt: &str,
    ) -> Result<Option<String>> {
        if salt.is_empty() {
            return Err(SyncError::validation("Checksum salt cannot be empty"));
        }
        range.validate()?;

        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        let mut rows = 0u64;

        let mut stream = MetadataStream::new(self.store, primary, range, self.page_size);
        while let Some(meta) = stream.next().await? {
            fold_row(&mut hasher, &primary.name, &meta);
            rows += 1;
        }
        for secondary in secondaries {
            let mut stream = MetadataStream::new(self.store, secondary, range, self.page_size);
            while let Some(meta) = stream.next().await? {
                fold_row(&mut hasher, &secondary.name, &meta);
                rows += 1;
            }
        }
        if rows == 0 {
            return Ok(None);
        }
        debug!(
            "range checksum for {} [{}, {}): {} rows",
            primary.name, range.minimum_id, range.maximum_id, rows
        );
        Ok(Some(hex::encode(hasher.finalize())))
    }

    /// Digest of the full live id range of a type.
    pub async fn checksum_for_type(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        salt: &str,
    ) -> Result<Option<String>> {
        let stats = self.store.min_max_count(primary).await?;
        let (Some(min_id), Some(max_id)) = (stats.min_id, stats.max_id) else {
            return Ok(None);
        };
        self.checksum_for_range(primary, secondaries, IdRange::new(min_id, max_id + 1), salt)
            .await
    }

    /// Split `request.range` into fixed-width bins and digest each bin that
    /// holds at least one row. Bins are keyed by `id div batch_size`, so the
    /// two stacks agree on bin boundaries without coordination and a
    /// divergent bin pinpoints the ids to re-sync.
    pub async fn calculate_batch_checksums(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        request: &BatchChecksumRequest,
    ) -> Result<Vec<RangeChecksum>> {
        request.validate()?;
        let batch_size = request.batch_size as i64;
        let mut bins: BTreeMap<i64, BinAccumulator> = BTreeMap::new();

        let mut stream = MetadataStream::new(self.store, primary, request.range, self.page_size);
        while let Some(meta) = stream.next().await? {
            let bin = bins
                .entry(meta.id.div_euclid(batch_size))
                .or_insert_with(|| BinAccumulator::new(&request.salt));
            bin.fold(&primary.name, &meta);
        }
        for secondary in secondaries {
            let mut stream =
                MetadataStream::new(self.store, secondary, request.range, self.page_size);
            while let Some(meta) = stream.next().await? {
                let bin = bins
                    .entry(meta.id.div_euclid(batch_size))
                    .or_insert_with(|| BinAccumulator::new(&request.salt));
                bin.fold(&secondary.name, &meta);
            }
        }

        Ok(bins
            .into_iter()
            .map(|(bin_number, acc)| acc.finish(bin_number))
            .collect())
    }
}

/// Per-bin running digest and row stats.
struct BinAccumulator {
    hasher: Sha256,
    row_count: u64,
    minimum_id: i64,
    maximum_id: i64,
}

impl BinAccumulator {
    fn new(salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        Self {
            hasher,
            row_count: 0,
            minimum_id: i64::MAX,
            maximum_id: i64::MIN,
        }
    }

    fn fold(&mut self, table: &str, meta: &RowMetadata) {
        fold_row(&mut self.hasher, table, meta);
        self.row_count += 1;
        self.minimum_id = self.minimum_id.min(meta.id);
        self.maximum_id = self.maximum_id.max(meta.id);
    }

    fn finish(self, bin_number: i64) -> RangeChecksum {
        RangeChecksum {
            bin_number,
            minimum_id: self.minimum_id,
            maximum_id: self.maximum_id,
            row_count: self.row_count,
            checksum: hex::encode(self.hasher.finalize()),
        }
    }
}

fn fold_row(hasher: &mut Sha256, table: &str, meta: &RowMetadata) {
    hasher.update(table.as_bytes());
    hasher.update(b":");
    hasher.update(meta.id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(meta.change_token().as_bytes());
    hasher.update(b"\n");
}
