use crate::{
    model::{Message, User},
    store::{Store, StoreError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("text required")]
    EmptyText,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create a message on a booking authored by `author`.
pub async fn post_message(
    store: &dyn Store,
    booking_id: &str,
    author: &User,
    text: Option<&str>,
) -> Result<Message, MessageError> {
    let text = text.filter(|t| !t.is_empty()).ok_or(MessageError::EmptyText)?;
    let msg = Message::new(booking_id, &author.id, text);
    store.append_message(&msg).await?;
    tracing::info!(booking = booking_id, message = %msg.id, "message posted");
    Ok(msg)
}

pub async fn list_messages(
    store: &dyn Store,
    booking_id: &str,
) -> Result<Vec<Message>, MessageError> {
    Ok(store.messages_for_booking(booking_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn setup() -> (SqliteStore, User, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(tmp.path().join("portal.sqlite3"))
            .await
            .unwrap();
        let user = store.upsert_session("a@b.com", "555", "t").await.unwrap();
        (store, user, tmp)
    }

    #[tokio::test]
    async fn create_and_validate() {
        let (store, user, _tmp) = setup().await;
        assert!(matches!(
            post_message(&store, "job-1", &user, None).await.unwrap_err(),
            MessageError::EmptyText
        ));
        assert!(matches!(
            post_message(&store, "job-1", &user, Some("")).await.unwrap_err(),
            MessageError::EmptyText
        ));
        assert!(list_messages(&store, "job-1").await.unwrap().is_empty());

        let m = post_message(&store, "job-1", &user, Some("hi")).await.unwrap();
        assert_eq!(m.text, "hi");
        assert_eq!(m.booking_id, "job-1");
        assert_eq!(m.user_id, user.id);
        assert!(!m.id.is_empty());
        assert_eq!(list_messages(&store, "job-1").await.unwrap(), vec![m]);
    }
}
