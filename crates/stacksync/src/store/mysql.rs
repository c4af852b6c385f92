//! MySQL store backend.
//!
//! Executes the statement templates from [`crate::sql`] over one dedicated
//! mysql_async connection. `SET FOREIGN_KEY_CHECKS` and `SET UNIQUE_CHECKS`
//! are session-scoped in MySQL, so every statement of a suspended-checks
//! scope must run on the session that issued the toggle; a pooled connection
//! per statement would silently re-enable enforcement between the toggle and
//! the guarded writes. Values travel positionally against the table schema,
//! the same contract the in-memory backend honors.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::core::{ColumnValue, FieldType, Row, RowMetadata, TableSchema};
use crate::error::{Result, SyncError};
use crate::range::IdRange;
use crate::sql;

use super::{ForeignKeyInfo, MigrationStore, TableStats};

/// MySQL-backed [`MigrationStore`].
///
/// All statements run on one dedicated session so that key-check toggles
/// stay in effect for the writes issued between suspend and restore.
pub struct MysqlStore {
    conn: Mutex<Conn>,
}

impl MysqlStore {
    /// Open the dedicated session and verify it with a probe query.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Full Unicode support.
            .init(vec!["SET NAMES utf8mb4"])
            .into();

        let mut conn = Conn::new(opts).await?;
        conn.query_drop("SELECT 1").await?;
        info!(
            "Connected to MySQL: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn range_params(range: IdRange, limit: i64, offset: i64) -> Params {
        Params::from(vec![
            (sql::BIND_MIN_ID, Value::from(range.minimum_id)),
            (sql::BIND_MAX_ID, Value::from(range.maximum_id)),
            ("limit", Value::from(limit)),
            ("offset", Value::from(offset)),
        ])
    }
}

#[async_trait]
impl MigrationStore for MysqlStore {
    async fn unique_constraints(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let names: Vec<String> = conn
            .exec(
                sql::unique_constraint_query(),
                Params::from(vec![
                    ("table_name", Value::from(table)),
                    ("column_name", Value::from(column)),
                ]),
            )
            .await?;
        Ok(names)
    }

    async fn column_nullable(&self, table: &str, column: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let nullable: Option<String> = conn
            .exec_first(
                sql::column_nullable_query(),
                Params::from(vec![
                    ("table_name", Value::from(table)),
                    ("column_name", Value::from(column)),
                ]),
            )
            .await?;
        match nullable {
            Some(flag) => Ok(flag.eq_ignore_ascii_case("YES")),
            None => Err(SyncError::storage(format!(
                "Column {}.{} does not exist",
                table, column
            ))),
        }
    }

    async fn nonrestricted_foreign_keys(&self) -> Result<Vec<ForeignKeyInfo>> {
        let mut conn = self.conn.lock().await;
        let rows: Vec<(String, String, String, String)> = conn
            .exec(sql::nonrestricted_foreign_keys_query(), Params::Empty)
            .await?;
        Ok(rows
            .into_iter()
            .map(
                |(constraint_name, delete_rule, table_name, referenced_table_name)| {
                    ForeignKeyInfo {
                        constraint_name,
                        delete_rule,
                        table_name,
                        referenced_table_name,
                    }
                },
            )
            .collect())
    }

    async fn min_max_count(&self, table: &TableSchema) -> Result<TableStats> {
        let statement = sql::min_max_count(table, &table.backup_id_field()?.name);
        let mut conn = self.conn.lock().await;
        let row: Option<(i64, Option<i64>, Option<i64>)> =
            conn.exec_first(statement, Params::Empty).await?;
        let (count, min_id, max_id) = row.unwrap_or((0, None, None));
        Ok(TableStats {
            count,
            min_id,
            max_id,
        })
    }

    async fn fetch_page(
        &self,
        table: &TableSchema,
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Row>> {
        range.validate()?;
        let statement = sql::select_page_by_range(table, &table.backup_id_field()?.name);
        let mut conn = self.conn.lock().await;
        let raw: Vec<mysql_async::Row> = conn
            .exec(statement, Self::range_params(range, limit, offset))
            .await?;
        raw.into_iter().map(|r| row_from_mysql(table, r)).collect()
    }

    async fn fetch_metadata_page(
        &self,
        table: &TableSchema,
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RowMetadata>> {
        // Without an etag the metadata carries a structural hash, which needs
        // the full row anyway.
        let Some(etag_index) = table.etag_index() else {
            let rows = self.fetch_page(table, range, limit, offset).await?;
            return rows
                .iter()
                .map(|row| RowMetadata::from_row(table, row))
                .collect();
        };
        range.validate()?;
        let statement = sql::select_metadata_by_range(
            table,
            &table.backup_id_field()?.name,
            &table.fields[etag_index].name,
        );
        let mut conn = self.conn.lock().await;
        let rows: Vec<(i64, String)> = conn
            .exec(statement, Self::range_params(range, limit, offset))
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, etag)| RowMetadata {
                id,
                etag: Some(etag),
                row_hash: None,
            })
            .collect())
    }

    async fn cardinality_page(
        &self,
        primary: &TableSchema,
        secondaries: &[TableSchema],
        range: IdRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<(i64, u64)>> {
        range.validate()?;
        let mut joined = Vec::with_capacity(secondaries.len());
        for secondary in secondaries {
            joined.push((secondary, secondary.backup_id_field()?.name.clone()));
        }
        let joined: Vec<(&TableSchema, &str)> = joined
            .iter()
            .map(|(schema, column)| (*schema, column.as_str()))
            .collect();
        let statement =
            sql::primary_cardinality(primary, &primary.backup_id_field()?.name, &joined);

        let mut conn = self.conn.lock().await;
        let rows: Vec<(i64, i64)> = conn
            .exec(statement, Self::range_params(range, limit, offset))
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, cardinality)| (id, cardinality.max(0) as u64))
            .collect())
    }

    async fn upsert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = sql::insert_or_update(table, &table.backup_id_field()?.name);
        let mut batches = Vec::with_capacity(rows.len());
        for row in rows {
            batches.push(row_params(table, row)?);
        }
        let mut conn = self.conn.lock().await;
        conn.exec_batch(statement, batches).await?;
        debug!("upserted {} rows into {}", rows.len(), table.name);
        Ok(rows.len() as u64)
    }

    async fn delete_by_range(
        &self,
        table: &TableSchema,
        range: IdRange,
        exempt_ids: &[i64],
    ) -> Result<u64> {
        range.validate()?;
        let id_column = sql::quote_ident(&table.backup_id_field()?.name);
        let mut statement = sql::delete_by_range(table, &table.backup_id_field()?.name);
        if !exempt_ids.is_empty() {
            let ids: Vec<String> = exempt_ids.iter().map(|id| id.to_string()).collect();
            statement.push_str(&format!(" AND {} NOT IN ({})", id_column, ids.join(", ")));
        }
        let mut conn = self.conn.lock().await;
        conn.exec_drop(
            statement,
            Params::from(vec![
                (sql::BIND_MIN_ID, Value::from(range.minimum_id)),
                (sql::BIND_MAX_ID, Value::from(range.maximum_id)),
            ]),
        )
        .await?;
        Ok(conn.affected_rows())
    }

    async fn set_key_checks(&self, enabled: bool) -> Result<()> {
        let flag = Value::from(if enabled { 1 } else { 0 });
        let mut conn = self.conn.lock().await;
        conn.exec_drop(
            sql::SET_FOREIGN_KEY_CHECKS,
            Params::from(vec![("enabled", flag.clone())]),
        )
        .await?;
        conn.exec_drop(
            sql::SET_UNIQUE_CHECKS,
            Params::from(vec![("enabled", flag)]),
        )
        .await?;
        Ok(())
    }
}

/// Convert one fetched row into positional column values.
fn row_from_mysql(table: &TableSchema, mut raw: mysql_async::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(table.fields.len());
    for (index, field) in table.fields.iter().enumerate() {
        let value: Value = raw.take(index).ok_or_else(|| {
            SyncError::storage(format!(
                "Missing column {} in result for table {}",
                field.name, table.name
            ))
        })?;
        values.push(column_value_from_mysql(field.field_type, value).map_err(|e| {
            SyncError::storage(format!(
                "Column {}.{}: {}",
                table.name, field.name, e
            ))
        })?);
    }
    Ok(Row::new(values))
}

fn column_value_from_mysql(
    field_type: FieldType,
    value: Value,
) -> std::result::Result<ColumnValue, String> {
    match (field_type, value) {
        (_, Value::NULL) => Ok(ColumnValue::Null),
        (FieldType::Bool, Value::Int(i)) => Ok(ColumnValue::Bool(i != 0)),
        (FieldType::Bool, Value::UInt(u)) => Ok(ColumnValue::Bool(u != 0)),
        (FieldType::Int, Value::Int(i)) => Ok(ColumnValue::Int(i)),
        (FieldType::Int, Value::UInt(u)) => Ok(ColumnValue::Int(u as i64)),
        (FieldType::Float, Value::Float(f)) => Ok(ColumnValue::Float(f as f64)),
        (FieldType::Float, Value::Double(d)) => Ok(ColumnValue::Float(d)),
        (FieldType::Timestamp, Value::Date(year, month, day, hour, minute, second, micros)) => {
            let timestamp = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|date| {
                    date.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
                })
                .ok_or_else(|| format!("invalid timestamp {}-{}-{}", year, month, day))?;
            Ok(ColumnValue::Timestamp(timestamp))
        }
        (FieldType::Text, Value::Bytes(bytes)) => String::from_utf8(bytes)
            .map(ColumnValue::Text)
            .map_err(|e| format!("invalid utf8: {}", e)),
        (FieldType::Bytes, Value::Bytes(bytes)) => Ok(ColumnValue::Bytes(bytes)),
        (expected, got) => Err(format!("expected {:?}, got {:?}", expected, got)),
    }
}

fn column_value_to_mysql(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::NULL,
        ColumnValue::Bool(b) => Value::Int(i64::from(*b)),
        ColumnValue::Int(i) => Value::Int(*i),
        ColumnValue::Float(f) => Value::Double(*f),
        ColumnValue::Timestamp(t) => Value::Date(
            t.year() as u16,
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.and_utc().timestamp_subsec_micros(),
        ),
        ColumnValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
        ColumnValue::Bytes(b) => Value::Bytes(b.clone()),
    }
}

/// Named binds for one row of an upsert, keyed by column name.
fn row_params(table: &TableSchema, row: &Row) -> Result<Params> {
    if row.values.len() != table.fields.len() {
        return Err(SyncError::validation(format!(
            "Row has {} values but table {} declares {} columns",
            row.values.len(),
            table.name,
            table.fields.len()
        )));
    }
    Ok(Params::from(
        table
            .fields
            .iter()
            .zip(row.values.iter())
            .map(|(field, value)| (field.name.clone(), column_value_to_mysql(value)))
            .collect::<Vec<(String, Value)>>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(10, 30, 5, 250)
            .unwrap();
        let cases = vec![
            ColumnValue::Null,
            ColumnValue::Bool(true),
            ColumnValue::Int(-42),
            ColumnValue::Float(1.5),
            ColumnValue::Timestamp(timestamp),
            ColumnValue::Text("héllo".into()),
            ColumnValue::Bytes(vec![0, 1, 255]),
        ];
        let types = vec![
            FieldType::Int,
            FieldType::Bool,
            FieldType::Int,
            FieldType::Float,
            FieldType::Timestamp,
            FieldType::Text,
            FieldType::Bytes,
        ];
        for (value, field_type) in cases.into_iter().zip(types) {
            let wire = column_value_to_mysql(&value);
            assert_eq!(column_value_from_mysql(field_type, wire).unwrap(), value);
        }
    }

    #[test]
    fn test_row_params_arity_check() {
        let table = TableSchema::new(
            "NODE",
            vec![crate::core::FieldSchema::backup_id("ID")],
        );
        let row = Row::new(vec![ColumnValue::Int(1), ColumnValue::Null]);
        assert!(row_params(&table, &row).is_err());
    }
}
