//! Versioned schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`; each pending
//! migration runs in its own transaction.

use rusqlite::Connection;

use crate::storage::{StorageError, StorageResult};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const INIT_SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i32,
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(version: i32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// All migrations, ordered by version.
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, "initial schema", INIT_SCHEMA),
        Migration::new(
            2,
            "due queue index",
            r#"
            CREATE INDEX IF NOT EXISTS idx_srs_state_due
                ON srs_state(due);
            "#,
        ),
    ]
}

fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| StorageError::Migration(format!("failed to create schema_migrations: {}", e)))?;

    Ok(())
}

/// Highest applied version, or 0 for a fresh database.
pub fn get_current_version(conn: &Connection) -> i32 {
    if ensure_migrations_table(conn).is_err() {
        return 0;
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

fn get_applied_versions(conn: &Connection) -> StorageResult<Vec<i32>> {
    ensure_migrations_table(conn)?;

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i32>, _>>()?;

    Ok(versions)
}

fn record_migration(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.name,
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

/// Applies every pending migration and returns the resulting version.
pub fn run_migrations(conn: &Connection) -> Result<i32, StorageError> {
    ensure_migrations_table(conn)?;

    let applied_versions = get_applied_versions(conn)?;
    let mut final_version = get_current_version(conn);

    tracing::debug!(
        current = final_version,
        target = CURRENT_SCHEMA_VERSION,
        "checking schema migrations"
    );

    for migration in get_migrations() {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        tracing::info!(version = migration.version, name = %migration.name, "running migration");

        if let Err(e) = execute_migration_in_transaction(conn, &migration) {
            tracing::error!(version = migration.version, error = %e, "migration failed");
            return Err(e);
        }
        final_version = migration.version;
    }

    Ok(final_version)
}

fn execute_migration_in_transaction(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let applied = conn
        .execute_batch(&migration.sql)
        .map_err(|e| {
            StorageError::Migration(format!("migration v{} failed: {}", migration.version, e))
        })
        .and_then(|()| record_migration(conn, migration));

    match applied {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK").ok();
            Err(e)
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub version: i32,
    pub name: String,
    pub applied_at: i64,
}

pub fn get_migration_history(conn: &Connection) -> StorageResult<Vec<MigrationRecord>> {
    ensure_migrations_table(conn)?;

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM schema_migrations ORDER BY version")?;

    let records = stmt
        .query_map([], |row| {
            Ok(MigrationRecord {
                version: row.get(0)?,
                name: row.get(1)?,
                applied_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}
