//! Core data model: field schemas, rows, and entity type descriptors.

pub mod descriptor;
pub mod schema;

pub use descriptor::{MigrationType, TypeCount, TypeDescriptor, TypeRole};
pub use schema::{
    structural_row_hash, ColumnValue, FieldSchema, FieldType, Row, RowMetadata, TableSchema,
};
