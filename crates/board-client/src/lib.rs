//! Client-side core of the message board: data access, feed reconciliation
//! and the composer.

pub mod backend;
pub mod composer;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod identity;
pub mod memory;

pub use backend::{Backend, ChannelEvent, Subscription};
pub use composer::{Composer, ComposerView, SubmitOutcome};
pub use config::ClientConfig;
pub use error::{BackendError, ConfigError};
pub use feed::{FeedController, FeedHandle, FeedStatus, FeedView, MergePolicy};
pub use http::HttpBackend;
pub use identity::{Identity, Session};
pub use memory::MemoryBackend;
