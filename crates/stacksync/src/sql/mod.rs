//! SQL template generation for migratable tables (MySQL dialect).
//!
//! Every registered type gets a cache of pre-built statements derived from
//! its field schema: paged range reads, batched upserts keyed by the backup
//! id, ranged deletes, and table statistics. The in-memory store implements
//! the same semantics directly; the MySQL store executes these templates.
//!
//! Named binds use the `:name` convention. Range binds are always
//! `:min_id` (inclusive) and `:max_id` (exclusive).

use crate::core::TableSchema;

/// Bind name for the inclusive range minimum.
pub const BIND_MIN_ID: &str = "min_id";
/// Bind name for the exclusive range maximum.
pub const BIND_MAX_ID: &str = "max_id";

/// Quote a MySQL identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Pre-built SQL statements for one migratable table.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    /// Batched upsert keyed by the backup id.
    pub insert_or_update: String,
    /// Ranged delete over the backup-id domain.
    pub delete_by_range: String,
    /// COUNT/MIN/MAX over the backup-id domain.
    pub min_max_count: String,
    /// Ordered, paged full-row read over an id range.
    pub select_page_by_range: String,
}

impl SqlTemplates {
    /// Build the statement cache for a table schema.
    pub fn for_table(table: &TableSchema, backup_id_column: &str) -> Self {
        Self {
            insert_or_update: insert_or_update(table, backup_id_column),
            delete_by_range: delete_by_range(table, backup_id_column),
            min_max_count: min_max_count(table, backup_id_column),
            select_page_by_range: select_page_by_range(table, backup_id_column),
        }
    }
}

/// Generate a batched `INSERT ... ON DUPLICATE KEY UPDATE` statement.
///
/// Every non-backup-id column is updated on conflict, making replays of the
/// same batch idempotent.
pub fn insert_or_update(table: &TableSchema, backup_id_column: &str) -> String {
    let columns: Vec<String> = table.fields.iter().map(|f| quote_ident(&f.name)).collect();
    let binds: Vec<String> = table.fields.iter().map(|f| format!(":{}", f.name)).collect();
    let updates: Vec<String> = table
        .fields
        .iter()
        .filter(|f| f.name != backup_id_column)
        .map(|f| {
            let q = quote_ident(&f.name);
            format!("{q} = VALUES({q})")
        })
        .collect();

    format!(
        "INSERT INTO {table} ({columns}) VALUES ({binds}) ON DUPLICATE KEY UPDATE {updates}",
        table = quote_ident(&table.name),
        columns = columns.join(", "),
        binds = binds.join(", "),
        updates = updates.join(", "),
    )
}

/// Generate a ranged delete: `[min_id, max_id)` over the backup-id domain.
pub fn delete_by_range(table: &TableSchema, backup_id_column: &str) -> String {
    let id = quote_ident(backup_id_column);
    format!(
        "DELETE FROM {table} WHERE {id} >= :{min} AND {id} < :{max}",
        table = quote_ident(&table.name),
        min = BIND_MIN_ID,
        max = BIND_MAX_ID,
    )
}

/// Generate the COUNT/MIN/MAX statistics statement.
pub fn min_max_count(table: &TableSchema, backup_id_column: &str) -> String {
    let id = quote_ident(backup_id_column);
    format!(
        "SELECT COUNT({id}) AS row_count, MIN({id}) AS min_id, MAX({id}) AS max_id FROM {table}",
        table = quote_ident(&table.name),
    )
}

/// Generate the ordered, paged range read used by the row stream.
pub fn select_page_by_range(table: &TableSchema, backup_id_column: &str) -> String {
    let columns: Vec<String> = table.fields.iter().map(|f| quote_ident(&f.name)).collect();
    let id = quote_ident(backup_id_column);
    format!(
        "SELECT {columns} FROM {table} WHERE {id} >= :{min} AND {id} < :{max} \
         ORDER BY {id} ASC LIMIT :limit OFFSET :offset",
        columns = columns.join(", "),
        table = quote_ident(&table.name),
        min = BIND_MIN_ID,
        max = BIND_MAX_ID,
    )
}

/// Generate the narrow metadata read: backup id and change token only.
///
/// Only valid for tables that declare an etag column; tables without one
/// need the full row to derive a structural hash.
pub fn select_metadata_by_range(
    table: &TableSchema,
    backup_id_column: &str,
    etag_column: &str,
) -> String {
    let id = quote_ident(backup_id_column);
    format!(
        "SELECT {id}, {etag} FROM {table} WHERE {id} >= :{min} AND {id} < :{max} \
         ORDER BY {id} ASC LIMIT :limit OFFSET :offset",
        etag = quote_ident(etag_column),
        table = quote_ident(&table.name),
        min = BIND_MIN_ID,
        max = BIND_MAX_ID,
    )
}

/// Generate the primary-cardinality statement: each primary backup id with
/// 1 + the count of dependent rows owned by it, ascending, paged.
///
/// Secondary tables share the primary's id domain, so each dependent count
/// joins on the secondary's own backup-id column.
pub fn primary_cardinality(
    primary: &TableSchema,
    primary_id_column: &str,
    secondaries: &[(&TableSchema, &str)],
) -> String {
    let p_id = quote_ident(primary_id_column);
    let mut cardinality = String::from("1");
    let mut joins = String::new();
    for (i, (secondary, sec_id_column)) in secondaries.iter().enumerate() {
        let alias = format!("S{}", i);
        let s_id = quote_ident(sec_id_column);
        cardinality.push_str(&format!(" + IFNULL({alias}.CARD, 0)"));
        joins.push_str(&format!(
            " LEFT JOIN (SELECT {s_id} AS OWNER_ID, COUNT(*) AS CARD FROM {s_table} \
             GROUP BY {s_id}) {alias} ON P.{p_id} = {alias}.OWNER_ID",
            s_table = quote_ident(&secondary.name),
        ));
    }
    format!(
        "SELECT P.{p_id} AS ID, {cardinality} AS CARD FROM {p_table} P{joins} \
         WHERE P.{p_id} >= :{min} AND P.{p_id} < :{max} \
         ORDER BY P.{p_id} ASC LIMIT :limit OFFSET :offset",
        p_table = quote_ident(&primary.name),
        min = BIND_MIN_ID,
        max = BIND_MAX_ID,
    )
}

/// Query for uniqueness constraints backing a column.
///
/// Returns the index names of unique keys covering the column; an empty
/// result means the column has no uniqueness constraint.
pub fn unique_constraint_query() -> String {
    "SELECT INDEX_NAME FROM INFORMATION_SCHEMA.STATISTICS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = :table_name \
     AND COLUMN_NAME = :column_name AND NON_UNIQUE = 0"
        .to_string()
}

/// Query for a column's nullability.
pub fn column_nullable_query() -> String {
    "SELECT IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = :table_name \
     AND COLUMN_NAME = :column_name"
        .to_string()
}

/// Query for all foreign keys whose delete rule is not RESTRICT.
pub fn nonrestricted_foreign_keys_query() -> String {
    "SELECT CONSTRAINT_NAME, DELETE_RULE, TABLE_NAME, REFERENCED_TABLE_NAME \
     FROM information_schema.REFERENTIAL_CONSTRAINTS \
     WHERE DELETE_RULE != 'RESTRICT' AND UNIQUE_CONSTRAINT_SCHEMA = DATABASE()"
        .to_string()
}

/// Statement toggling foreign key enforcement. This is a database-global
/// state change, not a per-transaction one.
pub const SET_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = :enabled";

/// Statement toggling unique key enforcement.
pub const SET_UNIQUE_CHECKS: &str = "SET UNIQUE_CHECKS = :enabled";
