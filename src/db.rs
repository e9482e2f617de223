//! SQLite pool construction and schema migration shared by the metadata
//! store and the SQLite-backed image cache.

use anyhow::Result;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};

const METADATA_MIGRATION: &str = include_str!("../migrations/0001_init.sql");
const CACHE_MIGRATION: &str = include_str!("../migrations/0002_image_cache.sql");

/// Open a pool for `url`, creating the database file and its parent
/// directory when they do not exist yet.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", url);

    let db_path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create the users, images and link tables.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    run_statements(db, METADATA_MIGRATION).await
}

/// Create the table used by the SQLite image cache backend.
pub async fn run_cache_migrations(db: &SqlitePool) -> Result<()> {
    run_statements(db, CACHE_MIGRATION).await
}

/// Every embedded statement is idempotent, so this is safe on every startup.
async fn run_statements(db: &SqlitePool, sql: &str) -> Result<()> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
