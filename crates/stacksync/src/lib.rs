//! # stacksync
//!
//! Registry-driven table migration and cross-stack consistency verification.
//!
//! This library keeps a destination stack's relational tables in sync with a
//! source stack, entity type by entity type, with support for:
//!
//! - **Dependency-ordered type registry** with startup constraint validation
//! - **Bounded-memory row streaming** over backup-id ranges
//! - **Greedy cardinality-based range partitioning** for parallel workers
//! - **Salted range and bin checksums** for divergence detection
//! - **Byte-budgeted bulk writes** with referential checks suspended
//! - **Gzip NDJSON backup containers** for ranged backup and restore
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stacksync::{Config, MemoryStore, MigrationManager, RegistryBuilder};
//!
//! # fn descriptors() -> Vec<stacksync::TypeDescriptor> { Vec::new() }
//! #[tokio::main]
//! async fn main() -> stacksync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = Arc::new(MemoryStore::new());
//!     let mut builder = RegistryBuilder::new();
//!     for descriptor in descriptors() {
//!         builder.register(descriptor);
//!     }
//!     let registry = Arc::new(builder.build(store.as_ref()).await?);
//!     let manager = MigrationManager::new(store, registry, config);
//!     for count in manager.get_type_counts().await? {
//!         println!("{}: {} rows", count.migration_type, count.count);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod batch;
pub mod checksum;
pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod range;
pub mod registry;
pub mod sql;
pub mod store;
pub mod stream;
pub mod writer;

// Re-exports for convenient access
pub use backup::{BackupManifest, BackupReader, BackupRecord, BackupWriter};
pub use checksum::{BatchChecksumRequest, ChecksumCalculator, RangeChecksum};
pub use config::{Config, DatabaseConfig, MigrationConfig};
pub use core::{
    ColumnValue, FieldSchema, FieldType, MigrationType, Row, RowMetadata, TableSchema,
    TypeCount, TypeDescriptor, TypeRole,
};
pub use error::{Result, SyncError};
pub use manager::MigrationManager;
pub use range::{IdRange, IdRangeBuilder, OptimalRangeRequest};
pub use registry::{RegistryBuilder, TypeData, TypeRegistry};
pub use store::{ForeignKeyInfo, MemoryStore, MigrationStore, TableStats};
#[cfg(feature = "mysql")]
pub use store::MysqlStore;
pub use stream::{MetadataStream, RowStream};
pub use writer::BulkWriter;
