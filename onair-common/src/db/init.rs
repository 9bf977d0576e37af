//! Database initialization
//!
//! Opens (or creates) the SQLite file and creates every table idempotently.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// SQLite busy timeout applied to every connection
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas live on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_priority_sources_table(pool).await?;
    create_live_tokens_table(pool).await?;
    create_live_sessions_table(pool).await?;
    create_executor_states_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_priority_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS priority_sources (
            id TEXT PRIMARY KEY,
            station_id TEXT NOT NULL,
            mount_id TEXT NOT NULL,
            priority INTEGER NOT NULL CHECK (priority BETWEEN 0 AND 4),
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1,
            activated_at TEXT NOT NULL,
            deactivated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_priority_sources_station_active
         ON priority_sources(station_id, active, priority)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_priority_sources_source
         ON priority_sources(station_id, source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_live_tokens_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_tokens (
            token TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE,
            station_id TEXT NOT NULL,
            mount_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            priority INTEGER NOT NULL CHECK (priority IN (1, 2)),
            expires_at TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_live_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_sessions (
            id TEXT PRIMARY KEY,
            station_id TEXT NOT NULL,
            mount_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            priority INTEGER NOT NULL,
            token TEXT NOT NULL,
            source_ip TEXT,
            source_port INTEGER,
            user_agent TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            connected_at TEXT NOT NULL,
            disconnected_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_live_sessions_station_active
         ON live_sessions(station_id, active)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_executor_states_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executor_states (
            station_id TEXT PRIMARY KEY,
            mount_id TEXT NOT NULL,
            state TEXT NOT NULL,
            current_priority INTEGER,
            current_source_id TEXT,
            next_source_id TEXT,
            audio_level_l REAL NOT NULL DEFAULT -60.0,
            audio_level_r REAL NOT NULL DEFAULT -60.0,
            loudness_lufs REAL NOT NULL DEFAULT 0.0,
            buffer_depth_ms INTEGER NOT NULL DEFAULT 0,
            underrun_count INTEGER NOT NULL DEFAULT 0,
            last_heartbeat TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
