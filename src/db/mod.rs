//! Database module for SQLite persistence.
//!
//! SQLite is the registry store: the source of truth for enrolled servers,
//! their credentials and last-known poll state.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // seq keeps insertion order stable for listings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS servers (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            server_name TEXT NOT NULL UNIQUE,
            base_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            pronto_debtor_code TEXT NOT NULL,
            pronto_xi_version TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            poll_status TEXT NOT NULL DEFAULT 'NEVER_POLLED',
            last_poll_time TEXT,
            last_error TEXT,
            enrolled_by TEXT NOT NULL,
            enrollment_date TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS server_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
            report_count INTEGER NOT NULL DEFAULT 0,
            dashboard_count INTEGER NOT NULL DEFAULT 0,
            data_module_count INTEGER NOT NULL DEFAULT 0,
            captured_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_servers_is_active ON servers(is_active);
        CREATE INDEX IF NOT EXISTS idx_servers_poll_status ON servers(poll_status);
        CREATE INDEX IF NOT EXISTS idx_servers_debtor_code ON servers(pronto_debtor_code);
        CREATE INDEX IF NOT EXISTS idx_server_metadata_server ON server_metadata(server_id, id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
