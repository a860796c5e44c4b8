use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use board_types::{Message, NewMessage};

use crate::error::BackendError;

/// What a subscription delivers to its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A row was inserted into the message collection.
    Insert(Message),
    /// The channel ended without being canceled. No further events follow.
    Closed(String),
}

/// Data access contract of the external persistence service.
pub trait Backend: Send + Sync + 'static {
    /// Insert a message and return the persisted row.
    fn create_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<Message, BackendError>> + Send;

    /// Snapshot of every message, newest `created_at` first.
    fn list_messages(&self) -> impl Future<Output = Result<Vec<Message>, BackendError>> + Send;

    /// Open the insert stream of the message collection. `on_event` runs once
    /// per delivered event, in delivery order, on a background task.
    fn subscribe_inserts<F>(
        &self,
        on_event: F,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send
    where
        F: FnMut(ChannelEvent) + Send + 'static;
}

/// Handle to an open change-event channel.
///
/// The channel is pumped by a background task. `cancel` stops it and waits
/// for the task to finish; dropping the handle stops it as well.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a pump task. The task must exit promptly once `token` is
    /// cancelled.
    pub fn new(channel: impl Into<String>, token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            token,
            task: Some(task),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Tear the channel down and wait until no more callbacks can run.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("subscription task for '{}' panicked: {}", self.channel, e);
                }
            }
        }
        debug!("subscription to '{}' canceled", self.channel);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("subscription to '{}' dropped", self.channel);
        }
    }
}
