//! Types shared between the board client crates and the wire.

pub mod api;
pub mod events;
pub mod models;

pub use models::{Message, MessageId, NewMessage};
