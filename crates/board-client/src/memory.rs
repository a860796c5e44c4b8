use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use board_types::events::MESSAGES_CHANNEL;
use board_types::{Message, MessageId, NewMessage};

use crate::backend::{Backend, ChannelEvent, Subscription};
use crate::error::BackendError;

/// What the in-process channel fans out to subscribers.
#[derive(Debug, Clone)]
enum ChannelFrame {
    Insert(Message),
    Close(String),
}

/// In-process backend: rows live in memory, inserts fan out over a
/// broadcast channel to every subscription.
///
/// Also lets callers inject failures, delay creates and simulate other
/// clients posting, which is what the tests and the offline mode need.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rows: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    frames_tx: broadcast::Sender<ChannelFrame>,
    create_calls: AtomicUsize,
    fail_next_list: Mutex<Option<BackendError>>,
    fail_next_create: Mutex<Option<BackendError>>,
    create_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_messages(Vec::new())
    }

    /// Start from existing rows. Integer ids keep counting after the
    /// largest numeric id present.
    pub fn with_messages(rows: Vec<Message>) -> Self {
        let next_id = rows
            .iter()
            .filter_map(|m| m.id.as_str().parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);
        let (frames_tx, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(MemoryInner {
                rows: Mutex::new(rows),
                next_id: AtomicU64::new(next_id),
                frames_tx,
                create_calls: AtomicUsize::new(0),
                fail_next_list: Mutex::new(None),
                fail_next_create: Mutex::new(None),
                create_delay: Mutex::new(None),
            }),
        }
    }

    /// Make the next `list_messages` call fail with `err`.
    pub fn fail_next_list(&self, err: BackendError) {
        *lock(&self.inner.fail_next_list) = Some(err);
    }

    /// Make the next `create_message` call fail with `err`.
    pub fn fail_next_create(&self, err: BackendError) {
        *lock(&self.inner.fail_next_create) = Some(err);
    }

    /// Hold every create for `delay` before it is persisted.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.create_delay) = delay;
    }

    /// Number of `create_message` calls received, failed ones included.
    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    /// Open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.frames_tx.receiver_count()
    }

    pub fn rows(&self) -> Vec<Message> {
        lock(&self.inner.rows).clone()
    }

    /// Persist a message as if another client had posted it.
    pub fn insert_external(&self, author: &str, body: &str) -> Message {
        self.persist(NewMessage {
            user_name: author.to_string(),
            avatar: None,
            message: body.to_string(),
        })
    }

    /// Push an insert event without storing it, e.g. a replayed or
    /// out-of-order delivery.
    pub fn deliver(&self, message: Message) {
        let _ = self.inner.frames_tx.send(ChannelFrame::Insert(message));
    }

    /// End every open subscription as if the connection dropped.
    pub fn close_channel(&self, reason: &str) {
        let _ = self.inner.frames_tx.send(ChannelFrame::Close(reason.to_string()));
    }

    fn persist(&self, new: NewMessage) -> Message {
        let message = {
            let mut rows = lock(&self.inner.rows);
            let created_at = next_timestamp(rows.iter().map(|m| m.created_at).max());
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            let message = Message {
                id: MessageId::from(id),
                author_display_name: new.user_name,
                author_avatar_ref: new.avatar,
                body: new.message,
                created_at,
            };
            rows.push(message.clone());
            message
        };

        debug!("stored message {} by {}", message.id, message.author_display_name);
        let _ = self.inner.frames_tx.send(ChannelFrame::Insert(message.clone()));
        message
    }
}

/// Wall-clock time, nudged forward so stored rows never share a timestamp.
fn next_timestamp(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match latest {
        Some(latest) if latest >= now => latest + TimeDelta::microseconds(1),
        _ => now,
    }
}

impl Backend for MemoryBackend {
    async fn create_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        self.inner.create_calls.fetch_add(1, Ordering::SeqCst);

        if message.is_blank() {
            return Err(BackendError::empty_body());
        }

        let delay = *lock(&self.inner.create_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let injected = lock(&self.inner.fail_next_create).take();
        if let Some(err) = injected {
            return Err(err);
        }

        Ok(self.persist(message))
    }

    async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        let injected = lock(&self.inner.fail_next_list).take();
        if let Some(err) = injected {
            return Err(err);
        }

        let mut rows = self.rows();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn subscribe_inserts<F>(&self, mut on_event: F) -> Result<Subscription, BackendError>
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let mut frames_rx = self.inner.frames_tx.subscribe();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    result = frames_rx.recv() => match result {
                        Ok(ChannelFrame::Insert(message)) => on_event(ChannelEvent::Insert(message)),
                        Ok(ChannelFrame::Close(reason)) => {
                            on_event(ChannelEvent::Closed(reason));
                            break;
                        }
                        Err(RecvError::Lagged(n)) => {
                            // Skipped inserts are lost for good.
                            warn!("subscription lagged by {} events", n);
                            on_event(ChannelEvent::Closed(format!("missed {n} updates")));
                            break;
                        }
                        Err(RecvError::Closed) => {
                            on_event(ChannelEvent::Closed("backend shut down".into()));
                            break;
                        }
                    },
                }
            }
        });

        Ok(Subscription::new(MESSAGES_CHANNEL, token, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(body: &str) -> NewMessage {
        NewMessage::new("Ada", None, body).unwrap()
    }

    #[tokio::test]
    async fn create_then_list_includes_row_once_newest_first() {
        let backend = MemoryBackend::new();
        let first = backend.insert_external("Bo", "first");
        let created = backend.create_message(new_message("second")).await.unwrap();

        assert!(created.created_at > first.created_at);
        assert_ne!(created.id, first.id);

        let rows = backend.list_messages().await.unwrap();
        assert_eq!(rows.iter().filter(|m| m.id == created.id).count(), 1);
        assert_eq!(rows[0].id, created.id);
        assert_eq!(rows[1].id, first.id);
    }

    #[tokio::test]
    async fn blank_body_is_rejected() {
        let backend = MemoryBackend::new();
        let blank = NewMessage {
            user_name: "Ada".into(),
            avatar: None,
            message: "   ".into(),
        };
        let err = backend.create_message(blank).await.unwrap_err();
        assert_eq!(err, BackendError::empty_body());
        assert!(backend.rows().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let backend = MemoryBackend::new();
        backend.fail_next_list(BackendError::Transport("network unreachable".into()));
        assert!(backend.list_messages().await.is_err());
        assert!(backend.list_messages().await.is_ok());

        backend.fail_next_create(BackendError::Transport("timed out".into()));
        assert!(backend.create_message(new_message("x")).await.is_err());
        assert!(backend.create_message(new_message("x")).await.is_ok());
        assert_eq!(backend.create_calls(), 2);
    }

    #[test]
    fn ids_continue_after_seeded_rows() {
        let seeded = Message {
            id: MessageId::from(41),
            author_display_name: "Bo".into(),
            author_avatar_ref: None,
            body: "old".into(),
            created_at: Utc::now(),
        };
        let backend = MemoryBackend::with_messages(vec![seeded]);
        let next = backend.insert_external("Bo", "new");
        assert_eq!(next.id, MessageId::from(42));
    }

    #[tokio::test]
    async fn subscription_receives_inserts_until_canceled() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sub = backend
            .subscribe_inserts(move |event| {
                let _ = tx.send(event);
            })
            .await
            .unwrap();
        assert_eq!(backend.subscriber_count(), 1);

        let posted = backend.insert_external("Bo", "live");
        assert_eq!(rx.recv().await, Some(ChannelEvent::Insert(posted)));

        sub.cancel().await;
        assert_eq!(backend.subscriber_count(), 0);

        backend.insert_external("Bo", "after");
        // Sender was dropped with the task, so the channel is closed and empty.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn close_channel_reports_reason() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = backend
            .subscribe_inserts(move |event| {
                let _ = tx.send(event);
            })
            .await
            .unwrap();

        backend.close_channel("connection reset");
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Closed("connection reset".into()))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_closed() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = backend
            .subscribe_inserts(move |event| {
                let _ = tx.send(event);
            })
            .await
            .unwrap();

        // The pump cannot run until we yield, so the channel overflows.
        for i in 0..1100 {
            backend.insert_external("Bo", &format!("burst {i}"));
        }

        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Closed("missed 76 updates".into()))
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(backend.subscriber_count(), 0);
    }
}
