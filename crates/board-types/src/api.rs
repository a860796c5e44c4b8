use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Query ordering requested when listing messages.
pub const LIST_ORDER: &str = "created_at.desc";

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Insert responses come back either as the bare row or as a one-element
/// array, depending on how the backend was asked to return representations.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreateMessageResponse {
    Row(Message),
    Rows(Vec<Message>),
}

impl CreateMessageResponse {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Row(msg) => Some(msg),
            Self::Rows(rows) => rows.into_iter().next(),
        }
    }
}
