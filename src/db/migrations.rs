//! Database migrations
//!
//! Versioned schema changes tracked in `schema_migrations`. Each version is
//! applied in its own transaction.

use crate::core::error::Result;
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Installed provider descriptors
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS providers (
    name TEXT PRIMARY KEY,
    module TEXT NOT NULL,
    version TEXT NOT NULL,
    kind TEXT NOT NULL,
    author TEXT,
    description TEXT,
    file_extension TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_providers_kind ON providers(kind);
"#;

/// Package checksum and install timestamp
const MIGRATION_V2: &str = r#"
ALTER TABLE providers ADD COLUMN checksum TEXT;
ALTER TABLE providers ADD COLUMN installed_at TEXT;
"#;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "Provider descriptors", MIGRATION_V1),
    (2, "Package checksum", MIGRATION_V2),
];

/// Run all pending database migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_TABLE)?;

    let current_version = current_version(conn)?;
    info!("Current database schema version: {}", current_version);

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!("Applying migration v{}: {}", version, description);
            apply_migration(conn, *version, sql)?;
        }
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Apply a single migration
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        e
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;
    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), MIGRATIONS.len() as i64);

        let has_checksum: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('providers') WHERE name = 'checksum'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_checksum, 1);
    }
}
