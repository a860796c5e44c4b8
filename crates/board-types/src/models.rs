use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend-assigned message identifier.
///
/// The backend may hand out integer row ids or string keys; both are kept as
/// an opaque string so equality is all the client relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for MessageId {
    fn from(raw: u64) -> Self {
        Self(raw.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// A persisted message row as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "user_name")]
    pub author_display_name: String,
    #[serde(rename = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub author_avatar_ref: Option<String>,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new message. The backend fills in `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub message: String,
}

impl NewMessage {
    /// Build an insert payload, trimming the body. Returns `None` when
    /// nothing but whitespace was typed.
    pub fn new(user_name: impl Into<String>, avatar: Option<String>, body: &str) -> Option<Self> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return None;
        }

        Some(Self {
            user_name: user_name.into(),
            avatar,
            message: trimmed.to_string(),
        })
    }

    /// True when the body would be rejected by the backend.
    pub fn is_blank(&self) -> bool {
        self.message.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_accepts_integer_and_string() {
        let from_int: MessageId = serde_json::from_str("42").unwrap();
        let from_str: MessageId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.as_str(), "42");
    }

    #[test]
    fn message_uses_wire_field_names() {
        let raw = r#"{
            "id": 7,
            "user_name": "Ada",
            "message": "hi",
            "created_at": "2024-03-01T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.id, MessageId::from(7));
        assert_eq!(msg.author_display_name, "Ada");
        assert_eq!(msg.author_avatar_ref, None);
        assert_eq!(msg.body, "hi");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["user_name"], "Ada");
        assert_eq!(json["message"], "hi");
        assert!(json.get("avatar").is_none());
    }

    #[test]
    fn new_message_trims_and_rejects_blank() {
        let msg = NewMessage::new("Ada", None, "  hello \n").unwrap();
        assert_eq!(msg.message, "hello");
        assert!(!msg.is_blank());

        assert!(NewMessage::new("Ada", None, "").is_none());
        assert!(NewMessage::new("Ada", None, " \t\n ").is_none());
    }
}
