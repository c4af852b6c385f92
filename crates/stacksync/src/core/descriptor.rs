//! Entity type descriptors: the data-driven replacement for per-table
//! accessor classes.
//!
//! A [`TypeDescriptor`] carries everything the engine needs to migrate one
//! entity type: its ordinal tag, its table schema, and the dependent
//! (secondary) types whose rows are owned by a row of this type and must
//! travel with it. Descriptors are constructed once at process start and are
//! immutable thereafter.

use serde::{Deserialize, Serialize};

use super::schema::TableSchema;

/// Ordinal tag identifying one migratable entity type.
///
/// Primary types must be registered in ascending ordinal order; the ordinal
/// fixes the cross-type migration order that referential integrity depends on
/// during a first load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MigrationType(pub u16);

impl std::fmt::Display for MigrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Role of a primary type within the migration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRole {
    /// Ordinary table.
    Standard,
    /// The terminal change-log table. Its arrival triggers downstream event
    /// processing, so it must always migrate last.
    ChangeLog,
}

/// Descriptor for one migratable entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Ordinal tag.
    pub migration_type: MigrationType,
    /// Logical type name, used in backup records and error messages.
    pub name: String,
    /// Role within the migration order.
    pub role: TypeRole,
    /// Backing table schema.
    pub table: TableSchema,
    /// Dependent types owned by rows of this type. Secondary tables share the
    /// primary's backup-id domain: a dependent row's backup id is the id of
    /// its owning row.
    pub secondary: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    /// A standard primary type with no dependents.
    pub fn new(migration_type: MigrationType, name: impl Into<String>, table: TableSchema) -> Self {
        Self {
            migration_type,
            name: name.into(),
            role: TypeRole::Standard,
            table,
            secondary: Vec::new(),
        }
    }

    /// Attach dependent types.
    pub fn with_secondary(mut self, secondary: Vec<TypeDescriptor>) -> Self {
        self.secondary = secondary;
        self
    }

    /// Mark this descriptor as the terminal change-log type.
    pub fn change_log(mut self) -> Self {
        self.role = TypeRole::ChangeLog;
        self
    }
}

/// Row statistics for one type: count plus identity-domain bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCount {
    pub migration_type: MigrationType,
    pub count: i64,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::FieldSchema;

    #[test]
    fn test_descriptor_builders() {
        let secondary = TypeDescriptor::new(
            MigrationType(2),
            "NODE_ANNOTATION",
            TableSchema::new("NODE_ANNOTATION", vec![FieldSchema::backup_id("OWNER_ID")]),
        );
        let primary = TypeDescriptor::new(
            MigrationType(1),
            "NODE",
            TableSchema::new("NODE", vec![FieldSchema::backup_id("ID")]),
        )
        .with_secondary(vec![secondary]);

        assert_eq!(primary.role, TypeRole::Standard);
        assert_eq!(primary.secondary.len(), 1);

        let change = TypeDescriptor::new(
            MigrationType(9),
            "CHANGE",
            TableSchema::new("CHANGES", vec![FieldSchema::backup_id("CHANGE_NUM")]),
        )
        .change_log();
        assert_eq!(change.role, TypeRole::ChangeLog);
    }
}
