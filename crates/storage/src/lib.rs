//! Relational store for the botgate gateway.
//!
//! Users, registered models and recorded exchanges live in SQLite behind one
//! pooled connection. All tables are bootstrapped at startup; rows in
//! `messages` are append-only and immutable once written.

#![deny(missing_docs)]

mod message;
mod model;
mod user;

use config::DatabaseConfig;
pub use message::{ExchangeRecord, MessageRow};
pub use model::{ModelRegistration, ModelRow};
use sqlx::SqlitePool;
use thiserror::Error;
pub use user::UserRow;

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Convenience alias used by every storage operation.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Handle to the relational store.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Connect to the configured database and bootstrap the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let storage = Self { pool };
        storage.bootstrap().await?;

        Ok(storage)
    }

    /// Create tables and indices if they do not exist yet.
    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                phone TEXT UNIQUE,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                membership_expiry INTEGER NOT NULL DEFAULT 0,
                last_login INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind INTEGER NOT NULL DEFAULT 0,
                provider TEXT NOT NULL,
                url TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                allowed_roles TEXT NOT NULL DEFAULT '[]',
                max_history INTEGER NOT NULL DEFAULT 10,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                prompt TEXT NOT NULL,
                prompt_kind INTEGER NOT NULL DEFAULT 0,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                answer TEXT NOT NULL,
                answer_kind INTEGER NOT NULL DEFAULT 0,
                answer_tokens INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn now_epoch() -> i64 {
    jiff::Timestamp::now().as_second()
}
