use super::{Store, StoreError};
use crate::model::{Message, User};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::{path::Path, time::Duration};
use uuid::Uuid;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  email TEXT NOT NULL,
  phone TEXT NOT NULL,
  token TEXT,
  UNIQUE(email, phone)
);
CREATE INDEX IF NOT EXISTS users_token ON users(token);

CREATE TABLE IF NOT EXISTS messages (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT UNIQUE NOT NULL,
  booking_id TEXT NOT NULL,
  user_id TEXT NOT NULL REFERENCES users(id),
  text TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_booking ON messages(booking_id, seq);
"#;

/// SQLite-backed store; each operation runs in its own transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        let store = tokio::task::spawn_blocking(move || -> Result<Self, StoreError> {
            let pool = Pool::new(manager)?;
            pool.get()?.execute_batch(SCHEMA)?;
            Ok(Self { pool })
        })
        .await??;
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        phone: row.get(2)?,
        token: row.get(3)?,
    })
}

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        user_id: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_session(
        &self,
        email: &str,
        phone: &str,
        token: &str,
    ) -> Result<User, StoreError> {
        let (email, phone, token) = (email.to_string(), phone.to_string(), token.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM users WHERE email = ?1 AND phone = ?2",
                    params![email, phone],
                    |row| row.get(0),
                )
                .optional()?;
            let id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE users SET token = ?2 WHERE id = ?1",
                        params![id, token],
                    )?;
                    id
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO users (id, email, phone, token) VALUES (?1, ?2, ?3, ?4)",
                        params![id, email, phone, token],
                    )?;
                    id
                }
            };
            tx.commit()?;
            Ok(User {
                id,
                email,
                phone,
                token: Some(token),
            })
        })
        .await
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, email, phone, token FROM users WHERE token = ?1",
                    [token],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn find_user(&self, email: &str, phone: &str) -> Result<Option<User>, StoreError> {
        let (email, phone) = (email.to_string(), phone.to_string());
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, email, phone, token FROM users WHERE email = ?1 AND phone = ?2",
                    params![email, phone],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let msg = message.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, booking_id, user_id, text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![msg.id, msg.booking_id, msg.user_id, msg.text, msg.created_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn messages_for_booking(&self, booking_id: &str) -> Result<Vec<Message>, StoreError> {
        let booking_id = booking_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, booking_id, user_id, text, created_at FROM messages WHERE booking_id = ?1 ORDER BY seq",
            )?;
            let iter = stmt.query_map([booking_id], row_to_msg)?;
            let mut msgs = Vec::new();
            for m in iter {
                msgs.push(m?);
            }
            Ok(msgs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_tmp() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(tmp.path().join("portal.sqlite3"))
            .await
            .unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn upsert_reuses_user_and_replaces_token() {
        let (store, _tmp) = open_tmp().await;
        let first = store.upsert_session("a@b.com", "555", "t1").await.unwrap();
        let second = store.upsert_session("a@b.com", "555", "t2").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(store.user_by_token("t1").await.unwrap().is_none());
        assert_eq!(
            store.user_by_token("t2").await.unwrap().unwrap().id,
            first.id
        );
    }

    #[tokio::test]
    async fn different_phone_is_a_different_user() {
        let (store, _tmp) = open_tmp().await;
        let a = store.upsert_session("a@b.com", "555", "t1").await.unwrap();
        let b = store.upsert_session("a@b.com", "556", "t2").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(store.find_user("a@b.com", "557").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_per_booking() {
        let (store, _tmp) = open_tmp().await;
        let user = store.upsert_session("a@b.com", "555", "t").await.unwrap();
        for text in ["one", "two", "three"] {
            store
                .append_message(&Message::new("job-1", &user.id, text))
                .await
                .unwrap();
        }
        store
            .append_message(&Message::new("job-2", &user.id, "other"))
            .await
            .unwrap();
        let texts: Vec<String> = store
            .messages_for_booking("job-1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(store.messages_for_booking("job-3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let (store, _tmp) = open_tmp().await;
        let user = store.upsert_session("a@b.com", "555", "t").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let uid = user.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_message(&Message::new("job-1", &uid, &format!("m{i}")))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.messages_for_booking("job-1").await.unwrap().len(), 16);
    }
}
