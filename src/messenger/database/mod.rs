use std::{path::Path, str::FromStr, sync::LazyLock, time::Duration};

use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use thiserror::Error;

pub mod conversations;
pub mod utils;

pub static MIGRATOR: LazyLock<Migrator> = LazyLock::new(|| sqlx::migrate!("./db_migrations"));

const DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DB_MAX_CONNECTIONS: u32 = 10;
const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),
}

/// Handle on the SQLite file holding the conversation documents.
#[derive(Clone, Debug)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the conversation store at `db_path` and brings its
    /// schema up to date.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.display());
        tracing::debug!(target: "messenger::database", "Opening conversation store at {}", db_url);

        // Writers race on the version column, so they wait on the file lock instead of failing
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(DB_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(DB_ACQUIRE_TIMEOUT_SECS))
            .max_connections(DB_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .inspect_err(|e| {
                tracing::error!(target: "messenger::database", "Failed to open {}: {}", db_url, e);
            })?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Removes every conversation, keeping the schema. Returns how many were removed.
    pub async fn delete_all_data(&self) -> Result<u64, DatabaseError> {
        let removed = sqlx::query("DELETE FROM conversations")
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(
            target: "messenger::database",
            "Removed {} conversations",
            removed
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::new(temp_dir.path().join("test.db"))
            .await
            .expect("Failed to create test database");
        (db, temp_dir)
    }

    async fn insert_conversation(db: &Database, id: &str) {
        sqlx::query(
            "INSERT INTO conversations (id, participants, is_group, messages, version, last_updated, created_at)
             VALUES (?, '[\"a\",\"b\"]', 0, '[]', 1, 0, 0)",
        )
        .bind(id)
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_database_creation_with_nested_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("nested").join("path").join("test.db");

        Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_conversations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        insert_conversation(&db, "a_b").await;
        db.pool.close().await;

        let reopened = Database::new(&db_path).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_connection_settings() {
        let (db, _temp_dir) = create_test_db().await;

        let journal_mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(journal_mode.0.to_lowercase(), "wal");

        let busy_timeout: (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(busy_timeout.0, DB_BUSY_TIMEOUT.as_millis() as i64);
    }

    #[tokio::test]
    async fn test_delete_all_data_clears_conversations() {
        let (db, _temp_dir) = create_test_db().await;
        insert_conversation(&db, "a_b").await;
        insert_conversation(&db, "a_c").await;

        assert_eq!(db.delete_all_data().await.unwrap(), 2);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);

        // Schema is still usable
        insert_conversation(&db, "a_b").await;
    }
}
