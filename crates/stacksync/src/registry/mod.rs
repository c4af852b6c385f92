//! Type registry: the frozen catalog of migratable entity types.
//!
//! Descriptors are registered once, in declaration order, then frozen by
//! [`RegistryBuilder::build`], which validates the catalog against the store
//! (uniqueness constraints, change-token nullability) and derives the lookup
//! tables the rest of the engine reads. After freezing, the registry is
//! immutable and safe for unsynchronized concurrent reads.
//!
//! All registration failures are startup-fatal: they indicate a programming
//! or deployment mistake, never a condition to recover from at runtime.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::core::{MigrationType, TableSchema, TypeDescriptor, TypeRole};
use crate::error::{Result, SyncError};
use crate::sql::SqlTemplates;
use crate::store::MigrationStore;

/// Everything the engine holds per registered type.
#[derive(Debug, Clone)]
pub struct TypeData {
    /// The descriptor as registered (primaries keep their secondary list).
    pub descriptor: TypeDescriptor,
    /// Pre-built SQL statement cache.
    pub templates: SqlTemplates,
    /// Name of the backup id column.
    pub backup_id_column: String,
    /// Name of the change-token column, when the type has one.
    pub etag_column: Option<String>,
}

/// Collects descriptors in declaration order, then freezes them.
#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<TypeDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one primary type. Call order fixes the migration order.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate the catalog against the store and freeze it.
    pub async fn build(self, store: &dyn MigrationStore) -> Result<TypeRegistry> {
        if self.descriptors.is_empty() {
            return Err(SyncError::registration(
                "The type register cannot be empty",
            ));
        }

        let mut by_type: HashMap<MigrationType, TypeData> = HashMap::new();
        let mut primary_types: Vec<MigrationType> = Vec::new();
        let mut primary_groups: HashMap<String, HashSet<String>> = HashMap::new();

        let mut last_ordinal: Option<u16> = None;
        let count = self.descriptors.len();
        for (index, descriptor) in self.descriptors.into_iter().enumerate() {
            // Primary ordinals must be strictly ascending; the declared order
            // is the migration order.
            if let Some(last) = last_ordinal {
                if descriptor.migration_type.0 <= last {
                    return Err(SyncError::registration(format!(
                        "The order of primary types must match their ordinal order. \
                         Type {} ({}) is out of order",
                        descriptor.name, descriptor.migration_type
                    )));
                }
            }
            last_ordinal = Some(descriptor.migration_type.0);

            // The change-log type triggers downstream event processing, so it
            // must always migrate last.
            if descriptor.role == TypeRole::ChangeLog && index != count - 1 {
                return Err(SyncError::registration(format!(
                    "The change-log type {} must always be registered last since its \
                     migration triggers asynchronous message processing on the stack",
                    descriptor.name
                )));
            }

            validate_backup_column(store, &descriptor.table).await?;

            // Build the group of tables sharing this primary's id domain,
            // used by foreign key validation.
            let mut group: HashSet<String> = HashSet::new();
            group.insert(descriptor.table.name.to_uppercase());
            for secondary in &descriptor.secondary {
                group.insert(secondary.table.name.to_uppercase());
            }
            for secondary in &descriptor.secondary {
                primary_groups.insert(secondary.table.name.to_uppercase(), group.clone());
            }

            primary_types.push(descriptor.migration_type);
            for secondary in &descriptor.secondary {
                if !secondary.secondary.is_empty() {
                    return Err(SyncError::registration(format!(
                        "Secondary type {} cannot declare its own secondary types",
                        secondary.name
                    )));
                }
                register_type(store, &mut by_type, secondary).await?;
            }
            register_type(store, &mut by_type, &descriptor).await?;
        }

        info!(
            "Type registry frozen: {} types, {} primary",
            by_type.len(),
            primary_types.len()
        );

        Ok(TypeRegistry {
            by_type,
            primary_types,
            primary_groups,
        })
    }
}

/// Register one descriptor into the lookup table.
async fn register_type(
    store: &dyn MigrationStore,
    by_type: &mut HashMap<MigrationType, TypeData>,
    descriptor: &TypeDescriptor,
) -> Result<()> {
    descriptor.table.validate()?;
    let backup_id_column = descriptor.table.backup_id_field()?.name.clone();

    let etag_column = descriptor
        .table
        .etag_index()
        .map(|i| descriptor.table.fields[i].name.clone());
    if let Some(etag) = &etag_column {
        validate_etag_column(store, &descriptor.table.name, etag).await?;
    }

    if by_type.contains_key(&descriptor.migration_type) {
        return Err(SyncError::registration(format!(
            "Each type must have its own migration tag. Found duplicated tag {} for {}",
            descriptor.migration_type, descriptor.name
        )));
    }

    let templates = SqlTemplates::for_table(&descriptor.table, &backup_id_column);
    debug!("registered {} ({})", descriptor.name, descriptor.migration_type);
    by_type.insert(
        descriptor.migration_type,
        TypeData {
            descriptor: descriptor.clone(),
            templates,
            backup_id_column,
            etag_column,
        },
    );
    Ok(())
}

/// Backup id columns of primary tables must carry a uniqueness constraint;
/// without one, rows would be silently lost during restore. This requirement
/// does not extend to secondary tables.
async fn validate_backup_column(store: &dyn MigrationStore, table: &TableSchema) -> Result<()> {
    let column = &table.backup_id_field()?.name;
    let names = store.unique_constraints(&table.name, column).await?;
    if names.is_empty() {
        return Err(SyncError::registration(format!(
            "Backup id columns must have a uniqueness constraint. Could not find such a \
             constraint for table: {} column: {}",
            table.name, column
        )));
    }
    debug!(
        "uniqueness constraints for {}.{}: {:?}",
        table.name, column, names
    );
    Ok(())
}

/// Change-token columns must be NOT NULL, otherwise divergence detection has
/// a hole for rows whose token was never set.
async fn validate_etag_column(
    store: &dyn MigrationStore,
    table_name: &str,
    column_name: &str,
) -> Result<()> {
    if store.column_nullable(table_name, column_name).await? {
        return Err(SyncError::registration(format!(
            "etag column {} must be NOT NULL for table {}",
            column_name, table_name
        )));
    }
    Ok(())
}

/// Frozen, read-only catalog of registered types.
#[derive(Debug)]
pub struct TypeRegistry {
    by_type: HashMap<MigrationType, TypeData>,
    primary_types: Vec<MigrationType>,
    /// Secondary table name (uppercased) to the set of table names in its
    /// primary group.
    primary_groups: HashMap<String, HashSet<String>>,
}

impl TypeRegistry {
    /// Look up the data for a registered type. Unknown types are a
    /// programmer error surfaced as a fatal registration error.
    pub fn lookup(&self, migration_type: MigrationType) -> Result<&TypeData> {
        self.by_type.get(&migration_type).ok_or_else(|| {
            SyncError::registration(format!("Type {} is not registered", migration_type))
        })
    }

    /// Whether a type is registered.
    pub fn is_registered(&self, migration_type: MigrationType) -> bool {
        self.by_type.contains_key(&migration_type)
    }

    /// Primary types in migration order.
    pub fn primary_types(&self) -> &[MigrationType] {
        &self.primary_types
    }

    /// Dependent types of a primary, in declaration order.
    pub fn secondary_types(&self, migration_type: MigrationType) -> Result<Vec<MigrationType>> {
        let data = self.lookup(migration_type)?;
        Ok(data
            .descriptor
            .secondary
            .iter()
            .map(|s| s.migration_type)
            .collect())
    }

    /// Table schemas of a primary's dependents, in declaration order.
    pub fn secondary_schemas(&self, migration_type: MigrationType) -> Result<Vec<TableSchema>> {
        let data = self.lookup(migration_type)?;
        Ok(data
            .descriptor
            .secondary
            .iter()
            .map(|s| s.table.clone())
            .collect())
    }

    /// Validate that every non-RESTRICT foreign key out of a secondary table
    /// stays within its own primary group. A cascading reference across
    /// groups would let a delete in one primary's id domain silently remove
    /// rows from another's.
    pub async fn validate_foreign_keys(&self, store: &dyn MigrationStore) -> Result<()> {
        let foreign_keys = store.nonrestricted_foreign_keys().await?;
        for fk in foreign_keys {
            let table_name = fk.table_name.to_uppercase();
            let referenced = fk.referenced_table_name.to_uppercase();
            if let Some(group) = self.primary_groups.get(&table_name) {
                if !group.contains(&referenced) {
                    return Err(SyncError::registration(format!(
                        "Table: {} cannot have a 'ON DELETE {}' foreign key reference to \
                         table: {} because the referenced table does not belong to the same \
                         primary table group",
                        table_name, fk.delete_rule, referenced
                    )));
                }
            }
        }
        Ok(())
    }
}
