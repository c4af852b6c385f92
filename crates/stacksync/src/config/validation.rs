//! Configuration validation.

use super::Config;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.stack.is_empty() {
        return Err(SyncError::Config("stack is required".into()));
    }
    if config.instance.is_empty() {
        return Err(SyncError::Config("instance is required".into()));
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.backup_batch_size {
        return Err(SyncError::Config(
            "migration.backup_batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.max_payload_bytes {
        return Err(SyncError::Config(
            "migration.max_payload_bytes must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.optimal_rows_per_range {
        return Err(SyncError::Config(
            "migration.optimal_rows_per_range must be at least 1".into(),
        ));
    }
    if let Some(n) = config.migration.page_size {
        if n < 1 {
            return Err(SyncError::Config(
                "migration.page_size must be at least 1".into(),
            ));
        }
    }

    if let Some(db) = &config.database {
        if db.host.is_empty() {
            return Err(SyncError::Config("database.host is required".into()));
        }
        if db.database.is_empty() {
            return Err(SyncError::Config("database.database is required".into()));
        }
        if db.user.is_empty() {
            return Err(SyncError::Config("database.user is required".into()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    fn valid_config() -> Config {
        Config {
            stack: "prod".to_string(),
            instance: "1".to_string(),
            migration: MigrationConfig::default(),
            exempt_ids: vec![],
            database: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_stack() {
        let mut config = valid_config();
        config.stack = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.backup_batch_size = Some(0);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("backup_batch_size"));
    }

    #[test]
    fn test_zero_payload_ceiling() {
        let mut config = valid_config();
        config.migration.max_payload_bytes = Some(0);
        assert!(validate(&config).is_err());
    }
}
