use crate::{
    model::User,
    store::{Store, StoreError},
};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

/// Length of issued session tokens.
pub const TOKEN_LEN: usize = 24;

/// Header carrying the session token on protected requests.
pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("email and phone required")]
    MissingCredentials,
    #[error("Missing session token in x-session-token header")]
    MissingToken,
    #[error("Invalid session token")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Generate a random opaque session token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Log in with a self-asserted email and phone pair.
///
/// The user is created on first login. Every call issues a fresh token that
/// replaces the previous one.
pub async fn login(
    store: &dyn Store,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<(String, User), SessionError> {
    let (email, phone) = match (email, phone) {
        (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => (e, p),
        _ => return Err(SessionError::MissingCredentials),
    };
    let token = generate_token();
    let user = store.upsert_session(email, phone, &token).await?;
    tracing::info!(user = %user.id, "session issued");
    Ok((token, user))
}

/// Resolve the user holding the presented token.
pub async fn authenticate(store: &dyn Store, token: Option<&str>) -> Result<User, SessionError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(SessionError::MissingToken)?;
    store
        .user_by_token(token)
        .await?
        .ok_or(SessionError::InvalidToken)
}
