use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Name of the change-event stream carrying message inserts.
pub const MESSAGES_CHANNEL: &str = "messages";

/// Events pushed by the backend over the real-time gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server acknowledged a subscription
    Subscribed { channel: String },

    /// A new row was inserted into the message collection
    Insert(Message),

    /// Server-side failure on the channel; the connection is about to close
    Error { message: String },
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving insert events for a named channel
    Subscribe { channel: String },

    /// Stop receiving events for a named channel
    Unsubscribe { channel: String },
}
