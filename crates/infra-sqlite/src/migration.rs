// Migration Runner

use crate::error::StorageError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::info;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "Initial schema",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    (2, "Lookup indexes", include_str!("../migrations/002_indexes.sql")),
];

/// Apply every migration newer than the recorded schema version
pub async fn run_migrations(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(&mut *conn)
    .await?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&mut *conn)
            .await?
    } else {
        0
    };

    info!(current_version, "Checking database schema");

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!(version, description, "Applying migration");
            apply_migration(conn, sql)
                .await
                .map_err(|e| StorageError::Migration(format!("{version:03} {description}: {e}")))?;
        }
    }

    Ok(())
}

/// Apply a single migration file inside one transaction
async fn apply_migration(conn: &mut SqliteConnection, sql: &str) -> Result<(), StorageError> {
    let mut tx = conn.begin().await?;

    for statement in sql.split(';') {
        let clean_statement = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_statement = clean_statement.trim();

        if !clean_statement.is_empty() {
            sqlx::query(clean_statement).execute(&mut *tx).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}
