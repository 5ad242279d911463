//! Persistence for portal users and booking messages.
//!
//! Every operation on [`Store`] is atomic with respect to the others, so
//! concurrent logins and message posts never lose writes.

mod json_file;
mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

use crate::config::{Config, StoreBackend};
use crate::model::{Message, User};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Find the user with this exact email and phone, creating it when
    /// absent, and replace its session token. Returns the updated user.
    async fn upsert_session(
        &self,
        email: &str,
        phone: &str,
        token: &str,
    ) -> Result<User, StoreError>;

    /// Look up the user currently holding `token`.
    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Look up a user by exact email and phone.
    async fn find_user(&self, email: &str, phone: &str) -> Result<Option<User>, StoreError>;

    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Messages for a booking in insertion order.
    async fn messages_for_booking(&self, booking_id: &str) -> Result<Vec<Message>, StoreError>;
}

pub type SharedStore = Arc<dyn Store>;

/// Open the backend selected by the configuration inside its data directory.
pub async fn open(config: &Config) -> anyhow::Result<SharedStore> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store: SharedStore = match config.store {
        StoreBackend::Sqlite => {
            let path = config.data_dir.join("portal.sqlite3");
            Arc::new(SqliteStore::open(path).await?)
        }
        StoreBackend::Json => {
            let path = config.data_dir.join("db.json");
            Arc::new(JsonFileStore::open(path).await?)
        }
    };
    Ok(store)
}
