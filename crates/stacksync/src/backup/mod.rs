//! Backup container format.
//!
//! A backup is a gzip-compressed NDJSON stream: the first line is the
//! [`BackupManifest`], every following line is one [`BackupRecord`]. Records
//! carry their own type tag so a single container can hold a primary type
//! followed by its dependents, and so a reader can skip types it no longer
//! recognizes instead of failing the whole restore.

use std::io::{BufRead, BufReader, Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{MigrationType, Row};
use crate::error::{Result, SyncError};
use crate::range::IdRange;

/// First line of every backup container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Object key this container was written under.
    pub key: String,
    pub stack: String,
    pub instance: String,
    /// Primary type the container covers.
    pub migration_type: MigrationType,
    /// Dependent types included, in declaration order.
    #[serde(default)]
    pub secondary_types: Vec<MigrationType>,
    /// Id range the container covers.
    pub range: IdRange,
    /// Rows per replay batch when the container is restored. Zero means the
    /// reader substitutes its own setting.
    #[serde(default)]
    pub batch_size: usize,
    pub created_on: DateTime<Utc>,
}

/// One row of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(rename = "type")]
    pub migration_type: MigrationType,
    pub row: Row,
}

/// Object key for a new container. The uuid keeps concurrent workers of the
/// same type from colliding.
pub fn backup_key(stack: &str, instance: &str, type_name: &str) -> String {
    format!(
        "{}-{}-{}-{}.ndjson.gz",
        stack,
        instance,
        type_name,
        Uuid::new_v4()
    )
}

/// Streaming container writer. Rows are compressed as they are appended, so
/// memory use is independent of container size.
pub struct BackupWriter<W: Write> {
    encoder: GzEncoder<W>,
    records: u64,
}

impl<W: Write> BackupWriter<W> {
    /// Start a container on `sink`, writing the manifest line immediately.
    pub fn create(sink: W, manifest: &BackupManifest) -> Result<Self> {
        let mut encoder = GzEncoder::new(sink, Compression::default());
        serde_json::to_writer(&mut encoder, manifest)?;
        encoder.write_all(b"\n")?;
        Ok(Self {
            encoder,
            records: 0,
        })
    }

    /// Append one record line.
    pub fn write_record(&mut self, record: &BackupRecord) -> Result<()> {
        serde_json::to_writer(&mut self.encoder, record)?;
        self.encoder.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Records appended so far.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Flush the compressor and hand back the sink.
    pub fn finish(self) -> Result<W> {
        Ok(self.encoder.finish()?)
    }
}

/// Streaming container reader.
#[derive(Debug)]
pub struct BackupReader<R: Read> {
    lines: std::io::Lines<BufReader<GzDecoder<R>>>,
    manifest: BackupManifest,
}

impl<R: Read> BackupReader<R> {
    /// Open a container, consuming and validating the manifest line.
    pub fn open(source: R) -> Result<Self> {
        let mut lines = BufReader::new(GzDecoder::new(source)).lines();
        let first = lines
            .next()
            .transpose()?
            .ok_or_else(|| SyncError::storage("Backup container is empty"))?;
        let manifest: BackupManifest = serde_json::from_str(&first)
            .map_err(|e| SyncError::storage(format!("Invalid backup manifest: {}", e)))?;
        Ok(Self { lines, manifest })
    }

    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    /// Read the next record, or `None` at end of container.
    pub fn next_record(&mut self) -> Result<Option<BackupRecord>> {
        let Some(line) = self.lines.next().transpose()? else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }
}
