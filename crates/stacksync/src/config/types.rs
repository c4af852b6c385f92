//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stack identifier (e.g. "prod", "staging"). Used in backup unit keys.
    pub stack: String,

    /// Stack instance identifier.
    pub instance: String,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Backup ids that must never be deleted by ranged deletes, protecting
    /// the operator/service accounts performing the migration.
    #[serde(default)]
    pub exempt_ids: Vec<i64>,

    /// Database connection settings, used by the MySQL-backed store.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

/// Migration behavior configuration.
///
/// All fields are optional in the YAML file; getters apply defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum rows per restore batch (default: 500).
    pub backup_batch_size: Option<usize>,

    /// Byte ceiling for a single bulk statement payload (default: 10 MiB,
    /// under MySQL's default max_allowed_packet).
    pub max_payload_bytes: Option<usize>,

    /// Target total row cardinality per computed id range (default: 200_000).
    pub optimal_rows_per_range: Option<u64>,

    /// Rows fetched per page by the paginated stream (default: 10_000).
    pub page_size: Option<i64>,
}

impl MigrationConfig {
    pub fn get_backup_batch_size(&self) -> usize {
        self.backup_batch_size.unwrap_or(500)
    }

    pub fn get_max_payload_bytes(&self) -> usize {
        self.max_payload_bytes.unwrap_or(10 * 1024 * 1024)
    }

    pub fn get_optimal_rows_per_range(&self) -> u64 {
        self.optimal_rows_per_range.unwrap_or(200_000)
    }

    pub fn get_page_size(&self) -> i64 {
        self.page_size.unwrap_or(10_000)
    }
}

fn default_mysql_port() -> u16 {
    3306
}
