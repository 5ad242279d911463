use super::{Store, StoreError};
use crate::model::{Message, User};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    messages: Vec<Message>,
}

/// Single JSON document holding `users` and `messages`.
///
/// The document is loaded once and kept in memory; all operations are
/// serialised by one lock and each mutation replaces the file atomically.
pub struct JsonFileStore {
    file: PathBuf,
    data: Mutex<Document>,
}

impl JsonFileStore {
    pub async fn open(file: PathBuf) -> Result<Self, StoreError> {
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).await?;
        }
        let data = match fs::read(&file).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => Document::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        let store = Self {
            file,
            data: Mutex::new(data),
        };
        {
            let data = store.data.lock().await;
            store.persist(&data).await?;
        }
        Ok(store)
    }

    async fn persist(&self, data: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.file).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn upsert_session(
        &self,
        email: &str,
        phone: &str,
        token: &str,
    ) -> Result<User, StoreError> {
        let mut data = self.data.lock().await;
        let (idx, created) = match data
            .users
            .iter()
            .position(|u| u.email == email && u.phone == phone)
        {
            Some(idx) => (idx, false),
            None => {
                data.users.push(User {
                    id: Uuid::new_v4().to_string(),
                    email: email.into(),
                    phone: phone.into(),
                    token: None,
                });
                (data.users.len() - 1, true)
            }
        };
        let previous = data.users[idx].token.replace(token.into());
        let user = data.users[idx].clone();
        if let Err(e) = self.persist(&data).await {
            // keep memory in step with what is on disk
            if created {
                data.users.pop();
            } else {
                data.users[idx].token = previous;
            }
            return Err(e);
        }
        Ok(user)
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_user(&self, email: &str, phone: &str) -> Result<Option<User>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.email == email && u.phone == phone)
            .cloned())
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.messages.push(message.clone());
        if let Err(e) = self.persist(&data).await {
            data.messages.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn messages_for_booking(&self, booking_id: &str) -> Result<Vec<Message>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .messages
            .iter()
            .filter(|m| m.booking_id == booking_id)
            .cloned()
            .collect())
    }
}
