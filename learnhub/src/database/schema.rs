//! Database schema and migrations
//!
//! Every collection lives in the single `documents` table, keyed by
//! (collection path, id), with auth accounts beside it. Schema changes ship
//! as numbered SQL files, each applied once and in order inside its own
//! transaction.

use crate::error::{AppError, Result};
use sqlx::sqlite::SqlitePool;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("migrations/001_initial_schema.sql"),
}];

/// Tables the document store and auth service query directly
const REQUIRED_TABLES: &[&str] = &["documents", "accounts"];

/// Bring the schema up to the latest migration
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing database schema");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await?;

    tracing::info!("Current database version: {}", current_version);

    let pending = MIGRATIONS.iter().filter(|m| m.version > current_version);
    for migration in pending {
        apply_migration(pool, migration).await?;
    }

    verify_tables(pool).await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying migration {} ({})",
        migration.version,
        migration.name
    );

    let mut tx = pool.begin().await?;

    for statement in statements(migration.sql) {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Split a migration file on `;`, dropping chunks that hold only comments
fn statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|chunk| {
        chunk.lines().any(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with("--")
        })
    })
}

async fn verify_tables(pool: &SqlitePool) -> Result<()> {
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await?;

    for required in REQUIRED_TABLES {
        if !tables.iter().any(|t| t == required) {
            return Err(AppError::Generic(format!(
                "Database schema is missing table '{}'",
                required
            )));
        }
    }

    Ok(())
}
