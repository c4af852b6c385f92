//! Field schemas, column values, and row representations.
//!
//! Every migratable table declares an explicit per-field schema (name, wire
//! type) instead of relying on runtime introspection. The schema drives three
//! things: serialized-size estimation for the byte-budget batcher, metadata
//! projection for checksums, and SQL template generation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

/// Wire type of a single field.
///
/// Fixed-width kinds carry a known serialized width; variable-width kinds
/// (text, bytes) are estimated by their actual length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Boolean flag (1 byte).
    Bool,
    /// 64-bit signed integer (8 bytes). All identity columns are this type.
    Int,
    /// 64-bit floating point (8 bytes).
    Float,
    /// Timestamp without timezone (8 bytes).
    Timestamp,
    /// Variable-width text.
    Text,
    /// Variable-width binary data.
    Bytes,
}

impl FieldType {
    /// Known serialized width for fixed-width kinds, or `None` for
    /// variable-width kinds.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Bool => Some(1),
            FieldType::Int | FieldType::Float | FieldType::Timestamp => Some(8),
            FieldType::Text | FieldType::Bytes => None,
        }
    }
}

/// Schema for a single column of a migratable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Physical column name.
    pub name: String,
    /// Wire type.
    pub field_type: FieldType,
    /// True if this column is the externally-stable backup id.
    pub backup_id: bool,
    /// True if this column is the change token (etag).
    pub etag: bool,
}

impl FieldSchema {
    /// A plain data column.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            backup_id: false,
            etag: false,
        }
    }

    /// The backup id column. Must be [`FieldType::Int`].
    pub fn backup_id(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Int,
            backup_id: true,
            etag: false,
        }
    }

    /// The change token column.
    pub fn etag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Text,
            backup_id: false,
            etag: true,
        }
    }
}

/// Schema for one migratable table: its physical name plus field list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Physical table name.
    pub name: String,
    /// Ordered field schemas. Row values are positional against this list.
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Index of the backup id field.
    pub fn backup_id_index(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.backup_id)
    }

    /// The backup id field schema, or a registration error naming the table.
    pub fn backup_id_field(&self) -> Result<&FieldSchema> {
        self.backup_id_index()
            .map(|i| &self.fields[i])
            .ok_or_else(|| {
                SyncError::registration(format!(
                    "Table {} does not declare a backup id column",
                    self.name
                ))
            })
    }

    /// Index of the etag field, if the table has one.
    pub fn etag_index(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.etag)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Validate structural requirements: exactly one backup id column of
    /// integer type, at most one etag column.
    pub fn validate(&self) -> Result<()> {
        let backup_ids: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.backup_id).collect();
        if backup_ids.len() != 1 {
            return Err(SyncError::registration(format!(
                "Table {} must declare exactly one backup id column, found {}",
                self.name,
                backup_ids.len()
            )));
        }
        if backup_ids[0].field_type != FieldType::Int {
            return Err(SyncError::registration(format!(
                "Backup id columns must be of integer type. Found {:?} for table: {} column: {}",
                backup_ids[0].field_type, self.name, backup_ids[0].name
            )));
        }
        let etags = self.fields.iter().filter(|f| f.etag).count();
        if etags > 1 {
            return Err(SyncError::registration(format!(
                "Table {} declares {} etag columns, at most one is allowed",
                self.name, etags
            )));
        }
        Ok(())
    }
}

/// A single column value, positional against a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
    Bytes(Vec<u8>),
}

impl ColumnValue {
    /// Estimated serialized size in bytes.
    ///
    /// Fixed-width kinds report their known wire width; text and bytes report
    /// their actual length. NULL contributes one byte.
    pub fn estimated_size(&self) -> usize {
        match self {
            ColumnValue::Null => 1,
            ColumnValue::Bool(_) => 1,
            ColumnValue::Int(_) | ColumnValue::Float(_) | ColumnValue::Timestamp(_) => 8,
            ColumnValue::Text(s) => s.len(),
            ColumnValue::Bytes(b) => b.len(),
        }
    }

    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// One row of a migratable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Values in the same order as the owning schema's field list.
    pub values: Vec<ColumnValue>,
}

impl Row {
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self { values }
    }

    /// Extract the backup id for this row under the given schema.
    pub fn backup_id(&self, schema: &TableSchema) -> Result<i64> {
        let idx = schema.backup_id_index().ok_or_else(|| {
            SyncError::registration(format!(
                "Table {} does not declare a backup id column",
                schema.name
            ))
        })?;
        match self.values.get(idx) {
            Some(ColumnValue::Int(id)) => Ok(*id),
            other => Err(SyncError::validation(format!(
                "Cannot extract backup id for table {}: expected integer, found {:?}",
                schema.name, other
            ))),
        }
    }

    /// Extract the change token for this row, if the schema declares one.
    pub fn etag(&self, schema: &TableSchema) -> Option<String> {
        let idx = schema.etag_index()?;
        match self.values.get(idx) {
            Some(ColumnValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Estimated serialized size of the whole row.
    pub fn estimated_size(&self) -> usize {
        self.values.iter().map(|v| v.estimated_size()).sum()
    }
}

/// Minimal projection of a row used for divergence detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMetadata {
    /// Backup id.
    pub id: i64,
    /// Change token, when the type declares one.
    pub etag: Option<String>,
    /// Structural hash of the full row, used when no change token exists.
    pub row_hash: Option<String>,
}

impl RowMetadata {
    /// Project a row to its metadata under the given schema.
    ///
    /// Types with a change token use it directly; types without one fall back
    /// to a structural hash of the entire row so content changes are still
    /// detectable.
    pub fn from_row(schema: &TableSchema, row: &Row) -> Result<Self> {
        let id = row.backup_id(schema)?;
        match row.etag(schema) {
            Some(etag) => Ok(Self {
                id,
                etag: Some(etag),
                row_hash: None,
            }),
            None => Ok(Self {
                id,
                etag: None,
                row_hash: Some(structural_row_hash(row)?),
            }),
        }
    }

    /// The token folded into checksums for this row: the etag when present,
    /// otherwise the structural hash.
    pub fn change_token(&self) -> &str {
        self.etag
            .as_deref()
            .or(self.row_hash.as_deref())
            .unwrap_or("")
    }
}

/// Deterministic structural hash of a full row.
pub fn structural_row_hash(row: &Row) -> Result<String> {
    let json = serde_json::to_vec(row)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        TableSchema::new(
            "NODE",
            vec![
                FieldSchema::backup_id("ID"),
                FieldSchema::etag("ETAG"),
                FieldSchema::new("NAME", FieldType::Text),
                FieldSchema::new("CREATED_ON", FieldType::Timestamp),
            ],
        )
    }

    #[test]
    fn test_schema_validate() {
        assert!(sample_schema().validate().is_ok());

        let no_backup_id = TableSchema::new("T", vec![FieldSchema::new("A", FieldType::Int)]);
        let err = no_backup_id.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one backup id"));
    }

    #[test]
    fn test_row_backup_id_and_etag() {
        let schema = sample_schema();
        let row = Row::new(vec![
            ColumnValue::Int(42),
            ColumnValue::Text("etag-1".into()),
            ColumnValue::Text("node".into()),
            ColumnValue::Null,
        ]);
        assert_eq!(row.backup_id(&schema).unwrap(), 42);
        assert_eq!(row.etag(&schema).as_deref(), Some("etag-1"));
    }

    #[test]
    fn test_estimated_size() {
        let row = Row::new(vec![
            ColumnValue::Int(1),
            ColumnValue::Text("abcde".into()),
            ColumnValue::Bool(true),
            ColumnValue::Null,
        ]);
        // 8 + 5 + 1 + 1
        assert_eq!(row.estimated_size(), 15);
    }

    #[test]
    fn test_metadata_uses_etag_when_present() {
        let schema = sample_schema();
        let row = Row::new(vec![
            ColumnValue::Int(7),
            ColumnValue::Text("e".into()),
            ColumnValue::Text("n".into()),
            ColumnValue::Null,
        ]);
        let meta = RowMetadata::from_row(&schema, &row).unwrap();
        assert_eq!(meta.change_token(), "e");
        assert!(meta.row_hash.is_none());
    }

    #[test]
    fn test_metadata_falls_back_to_structural_hash() {
        let schema = TableSchema::new(
            "ACL",
            vec![
                FieldSchema::backup_id("OWNER_ID"),
                FieldSchema::new("ACCESS_TYPE", FieldType::Text),
            ],
        );
        let row_a = Row::new(vec![ColumnValue::Int(1), ColumnValue::Text("READ".into())]);
        let row_b = Row::new(vec![ColumnValue::Int(1), ColumnValue::Text("WRITE".into())]);

        let meta_a = RowMetadata::from_row(&schema, &row_a).unwrap();
        let meta_b = RowMetadata::from_row(&schema, &row_b).unwrap();
        assert_ne!(meta_a.change_token(), meta_b.change_token());

        // Identical content hashes identically.
        let meta_a2 = RowMetadata::from_row(&schema, &row_a).unwrap();
        assert_eq!(meta_a.change_token(), meta_a2.change_token());
    }
}
