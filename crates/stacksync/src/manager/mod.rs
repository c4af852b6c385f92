//! Migration manager: the engine's public operation surface.
//!
//! One manager owns a store, a frozen type registry, and the runtime
//! configuration, and exposes the operations a migration coordinator drives:
//! type stats, optimal range partitioning, salted checksums, ranged backup,
//! and streamed restore. Long-running operations take a cancellation watch
//! and bail out with [`SyncError::Interrupted`] between rows, never mid-row.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backup::{backup_key, BackupManifest, BackupReader, BackupRecord, BackupWriter};
use crate::checksum::{BatchChecksumRequest, ChecksumCalculator, RangeChecksum};
use crate::config::Config;
use crate::core::{MigrationType, Row, TypeCount, TypeRole};
use crate::error::{Result, SyncError};
use crate::range::{IdRange, IdRangeBuilder, OptimalRangeRequest};
use crate::registry::TypeRegistry;
use crate::store::MigrationStore;
use crate::stream::RowStream;
use crate::writer::BulkWriter;

pub struct MigrationManager {
    store: Arc<dyn MigrationStore>,
    registry: Arc<TypeRegistry>,
    config: Config,
}

impl MigrationManager {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        registry: Arc<TypeRegistry>,
        config: Config,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Primary types in migration order.
    pub fn primary_types(&self) -> &[MigrationType] {
        self.registry.primary_types()
    }

    /// Dependent types of a primary, in declaration order.
    pub fn secondary_types(&self, migration_type: MigrationType) -> Result<Vec<MigrationType>> {
        self.registry.secondary_types(migration_type)
    }

    /// Row count of one type's primary table.
    pub async fn get_count(&self, migration_type: MigrationType) -> Result<i64> {
        Ok(self.get_type_count(migration_type).await?.count)
    }

    /// Smallest live backup id of one type, `None` when the table is empty.
    pub async fn get_min_id(&self, migration_type: MigrationType) -> Result<Option<i64>> {
        Ok(self.get_type_count(migration_type).await?.min_id)
    }

    /// Largest live backup id of one type, `None` when the table is empty.
    pub async fn get_max_id(&self, migration_type: MigrationType) -> Result<Option<i64>> {
        Ok(self.get_type_count(migration_type).await?.max_id)
    }

    /// Count plus id bounds for one type.
    pub async fn get_type_count(&self, migration_type: MigrationType) -> Result<TypeCount> {
        let data = self.registry.lookup(migration_type)?;
        let stats = self.store.min_max_count(&data.descriptor.table).await?;
        Ok(TypeCount {
            migration_type,
            count: stats.count,
            min_id: stats.min_id,
            max_id: stats.max_id,
        })
    }

    /// Stats for every primary type, in migration order.
    ///
    /// The change-log count is taken first: every divergence the other
    /// counts can reveal was caused by a change event, so capturing the
    /// change-log high-water mark before the other tables bounds what a
    /// comparison run can miss.
    pub async fn get_type_counts(&self) -> Result<Vec<TypeCount>> {
        let mut precomputed: HashMap<MigrationType, TypeCount> = HashMap::new();
        for migration_type in self.registry.primary_types() {
            let data = self.registry.lookup(*migration_type)?;
            if data.descriptor.role == TypeRole::ChangeLog {
                precomputed.insert(*migration_type, self.get_type_count(*migration_type).await?);
            }
        }
        let mut counts = Vec::with_capacity(self.registry.primary_types().len());
        for migration_type in self.registry.primary_types() {
            match precomputed.remove(migration_type) {
                Some(count) => counts.push(count),
                None => counts.push(self.get_type_count(*migration_type).await?),
            }
        }
        Ok(counts)
    }

    /// Partition a type's id range into contiguous ranges whose total row
    /// cardinality (dependents included) stays near the requested target.
    pub async fn calculate_optimal_ranges(
        &self,
        request: &OptimalRangeRequest,
    ) -> Result<Vec<IdRange>> {
        if request.optimal_rows_per_range == 0 {
            return Err(SyncError::validation(
                "optimal_rows_per_range must be greater than zero",
            ));
        }
        let range = IdRange::new(request.minimum_id, request.maximum_id);
        range.validate()?;

        let data = self.registry.lookup(request.migration_type)?;
        let secondaries = self.registry.secondary_schemas(request.migration_type)?;
        let page_size = self.config.migration.get_page_size();

        let mut builder = IdRangeBuilder::new(request.optimal_rows_per_range);
        let mut offset = 0i64;
        loop {
            let page = self
                .store
                .cardinality_page(&data.descriptor.table, &secondaries, range, page_size, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            for (id, cardinality) in &page {
                builder.add_row(*id, *cardinality);
            }
            offset += page_size;
        }
        Ok(builder.collate_results())
    }

    /// Salted digest of one range of one type, `None` when the range is
    /// empty.
    pub async fn checksum_for_range(
        &self,
        migration_type: MigrationType,
        range: IdRange,
        salt: &str,
    ) -> Result<Option<String>> {
        let data = self.registry.lookup(migration_type)?;
        let secondaries = self.registry.secondary_schemas(migration_type)?;
        self.calculator()
            .checksum_for_range(&data.descriptor.table, &secondaries, range, salt)
            .await
    }

    /// Salted digest of a type's full live id range.
    pub async fn checksum_for_type(
        &self,
        migration_type: MigrationType,
        salt: &str,
    ) -> Result<Option<String>> {
        let data = self.registry.lookup(migration_type)?;
        let secondaries = self.registry.secondary_schemas(migration_type)?;
        self.calculator()
            .checksum_for_type(&data.descriptor.table, &secondaries, salt)
            .await
    }

    /// Binned digests over a range, for narrowing a divergence down to the
    /// ids that need re-syncing.
    pub async fn calculate_batch_checksums(
        &self,
        request: &BatchChecksumRequest,
    ) -> Result<Vec<RangeChecksum>> {
        let data = self.registry.lookup(request.migration_type)?;
        let secondaries = self.registry.secondary_schemas(request.migration_type)?;
        self.calculator()
            .calculate_batch_checksums(&data.descriptor.table, &secondaries, request)
            .await
    }

    /// Write one backup container covering `range` of a primary type to
    /// `sink`: the manifest line, then primary rows ascending, then each
    /// dependent type's rows in declaration order. Returns the manifest and
    /// the number of records written.
    pub async fn backup_range<W: Write>(
        &self,
        migration_type: MigrationType,
        range: IdRange,
        sink: W,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(BackupManifest, u64)> {
        range.validate()?;
        let data = self.registry.lookup(migration_type)?;
        let manifest = BackupManifest {
            key: backup_key(&self.config.stack, &self.config.instance, &data.descriptor.name),
            stack: self.config.stack.clone(),
            instance: self.config.instance.clone(),
            migration_type,
            secondary_types: data
                .descriptor
                .secondary
                .iter()
                .map(|s| s.migration_type)
                .collect(),
            range,
            batch_size: self.config.migration.get_backup_batch_size(),
            created_on: Utc::now(),
        };
        let mut writer = BackupWriter::create(sink, &manifest)?;
        let page_size = self.config.migration.get_page_size();

        let mut stream = RowStream::new(self.store.as_ref(), &data.descriptor.table, range, page_size);
        while let Some(row) = stream.next().await? {
            ensure_active(cancel)?;
            writer.write_record(&BackupRecord {
                migration_type,
                row,
            })?;
        }
        for secondary in &data.descriptor.secondary {
            let mut stream =
                RowStream::new(self.store.as_ref(), &secondary.table, range, page_size);
            while let Some(row) = stream.next().await? {
                ensure_active(cancel)?;
                writer.write_record(&BackupRecord {
                    migration_type: secondary.migration_type,
                    row,
                })?;
            }
        }

        let records = writer.record_count();
        writer.finish()?;
        info!(
            "backed up {} records of {} [{}, {}) to {}",
            records, data.descriptor.name, range.minimum_id, range.maximum_id, manifest.key
        );
        Ok((manifest, records))
    }

    /// Restore one backup container from `source`, returning the number of
    /// rows written.
    ///
    /// The covered range is cleared first (primary and dependents, exempt
    /// ids kept) so rows deleted on the source side do not survive here.
    /// Records of types no longer registered are skipped, not fatal, so old
    /// containers stay restorable after a type is retired.
    pub async fn restore_stream<R: Read>(
        &self,
        source: R,
        cancel: &watch::Receiver<bool>,
    ) -> Result<u64> {
        let mut reader = BackupReader::open(source)?;
        let manifest = reader.manifest().clone();
        if !self.registry.is_registered(manifest.migration_type) {
            warn!(
                "skipping container {}: {} is no longer registered",
                manifest.key, manifest.migration_type
            );
            return Ok(0);
        }
        let data = self.registry.lookup(manifest.migration_type)?;
        let writer = BulkWriter::new(self.store.as_ref(), self.config.migration.get_max_payload_bytes());

        writer
            .delete_by_range(&data.descriptor.table, manifest.range, &self.config.exempt_ids)
            .await?;
        for secondary in &data.descriptor.secondary {
            writer
                .delete_by_range(&secondary.table, manifest.range, &self.config.exempt_ids)
                .await?;
        }

        // The writing side fixed the replay batch size when it produced the
        // container; zero means it left the choice to us.
        let batch_limit = if manifest.batch_size > 0 {
            manifest.batch_size
        } else {
            self.config.migration.get_backup_batch_size()
        };
        let mut skipped: HashSet<MigrationType> = HashSet::new();
        let mut pending_type: Option<MigrationType> = None;
        let mut pending: Vec<Row> = Vec::new();
        let mut restored = 0u64;

        while let Some(record) = reader.next_record()? {
            ensure_active(cancel)?;
            if !self.registry.is_registered(record.migration_type) {
                if skipped.insert(record.migration_type) {
                    warn!(
                        "skipping records of unregistered {} in container {}",
                        record.migration_type, manifest.key
                    );
                }
                continue;
            }
            if pending_type != Some(record.migration_type) || pending.len() >= batch_limit {
                restored += self.flush(&writer, pending_type, &mut pending).await?;
                pending_type = Some(record.migration_type);
            }
            pending.push(record.row);
        }
        restored += self.flush(&writer, pending_type, &mut pending).await?;

        info!(
            "restored {} rows of {} from container {}",
            restored, data.descriptor.name, manifest.key
        );
        Ok(restored)
    }

    async fn flush(
        &self,
        writer: &BulkWriter<'_>,
        migration_type: Option<MigrationType>,
        pending: &mut Vec<Row>,
    ) -> Result<u64> {
        let Some(migration_type) = migration_type else {
            return Ok(0);
        };
        if pending.is_empty() {
            return Ok(0);
        }
        let data = self.registry.lookup(migration_type)?;
        let ids = writer
            .create_or_update_batch(&data.descriptor.table, std::mem::take(pending))
            .await?;
        Ok(ids.len() as u64)
    }

    fn calculator(&self) -> ChecksumCalculator<'_> {
        ChecksumCalculator::new(self.store.as_ref(), self.config.migration.get_page_size())
    }
}

fn ensure_active(cancel: &watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        return Err(SyncError::Interrupted);
    }
    Ok(())
}
