use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

/// A portal user as persisted by the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// The user fields exposed over the API.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub phone: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
        }
    }
}

/// A message attached to an external booking.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: String,
}

impl Message {
    /// Build a new message stamped with a fresh id and the current time.
    pub fn new(booking_id: &str, user_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            booking_id: booking_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            created_at: now_rfc3339(),
        }
    }
}

/// Current UTC time in RFC 3339 form.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message::new("job-1", "u1", "hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["bookingId"], "job-1");
        assert_eq!(v["userId"], "u1");
        assert!(v["createdAt"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn public_user_hides_token() {
        let user = User {
            id: "u1".into(),
            email: "a@b.com".into(),
            phone: "555".into(),
            token: Some("secret".into()),
        };
        let v = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert!(v.get("token").is_none());
        assert_eq!(v["email"], "a@b.com");
    }
}
