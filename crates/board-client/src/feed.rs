use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use board_types::Message;

use crate::backend::{Backend, ChannelEvent, Subscription};
use crate::identity::Session;

/// How inserts that arrive on both paths (local create and stream echo) are
/// reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Drop an insert whose id is already in the feed.
    #[default]
    DedupById,
    /// Keep every insert, so a self-authored post shows up twice once its
    /// echo arrives.
    KeepAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Loading,
    Ready,
    /// The initial fetch failed; holds the error text to show.
    Failed(String),
}

/// Snapshot of what the feed currently displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub status: FeedStatus,
    /// Newest first.
    pub messages: Vec<Message>,
    /// Set once live updates stopped; the list may be missing newer posts.
    pub stale: Option<String>,
    /// Insert events received from the stream while ready, duplicates
    /// included.
    pub stream_events: u64,
}

impl FeedView {
    fn loading() -> Self {
        Self {
            status: FeedStatus::Loading,
            messages: Vec::new(),
            stale: None,
            stream_events: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == FeedStatus::Ready
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            FeedStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertSource {
    Local,
    Stream,
}

struct FeedShared {
    view: watch::Sender<FeedView>,
    policy: MergePolicy,
    /// Set on teardown; late callbacks must not touch the view afterwards.
    detached: AtomicBool,
}

impl FeedShared {
    fn apply(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Insert(message) => {
                self.insert(message, InsertSource::Stream);
            }
            ChannelEvent::Closed(reason) => {
                if self.detached.load(Ordering::Acquire) {
                    return;
                }
                warn!("live updates stopped: {}", reason);
                self.view.send_modify(|view| view.stale = Some(reason));
            }
        }
    }

    fn insert(&self, message: Message, source: InsertSource) -> bool {
        if self.detached.load(Ordering::Acquire) {
            debug!("feed torn down, dropping message {}", message.id);
            return false;
        }

        let policy = self.policy;
        let mut inserted = false;
        self.view.send_if_modified(|view| {
            if !view.is_ready() {
                debug!("feed not ready, dropping message {}", message.id);
                return false;
            }
            if source == InsertSource::Stream {
                view.stream_events += 1;
            }
            if policy == MergePolicy::DedupById && view.messages.iter().any(|m| m.id == message.id) {
                debug!("message {} already in feed ({:?} insert)", message.id, source);
                return source == InsertSource::Stream;
            }
            place(&mut view.messages, message);
            inserted = true;
            true
        });
        inserted
    }
}

/// Insert `message` into a newest-first list, ahead of everything with an
/// equal or earlier timestamp. In-order deliveries land at the front.
fn place(messages: &mut Vec<Message>, message: Message) {
    let at = messages
        .iter()
        .position(|m| m.created_at <= message.created_at)
        .unwrap_or(messages.len());
    messages.insert(at, message);
}

/// Weak handle the composer uses to put its own posts into the feed.
#[derive(Clone)]
pub struct FeedHandle {
    shared: Weak<FeedShared>,
}

impl FeedHandle {
    /// Optimistically insert a record returned by a successful create.
    /// Returns false if the feed is gone, not ready, or already has it.
    pub fn insert(&self, message: Message) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.insert(message, InsertSource::Local),
            None => false,
        }
    }
}

/// Owns the displayed feed for one mount: fetches the snapshot, then keeps
/// it current from the insert stream until unmounted.
///
/// Dropping the controller cancels its subscription, so teardown through an
/// error path releases the channel too.
pub struct FeedController<B: Backend> {
    backend: Arc<B>,
    session: Session,
    shared: Arc<FeedShared>,
    subscription: Option<Subscription>,
}

impl<B: Backend> FeedController<B> {
    pub fn new(backend: Arc<B>, session: Session, policy: MergePolicy) -> Self {
        let (view, _) = watch::channel(FeedView::loading());
        Self {
            backend,
            session,
            shared: Arc::new(FeedShared {
                view,
                policy,
                detached: AtomicBool::new(false),
            }),
            subscription: None,
        }
    }

    /// Run the initial fetch and open the live subscription.
    ///
    /// Moves the feed out of `Loading` exactly once; later calls return the
    /// current status without touching the backend.
    pub async fn start(&mut self) -> FeedStatus {
        let current = self.status();
        if current != FeedStatus::Loading {
            warn!("feed already started ({:?})", current);
            return current;
        }

        let identity = match self.session.identity() {
            Ok(identity) => identity,
            Err(e) => return self.fail(e.to_string()),
        };

        let mut messages = match self.backend.list_messages().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("failed to load messages for {}: {}", identity.display_name(), e);
                return self.fail(e.to_string());
            }
        };
        // Stable sort keeps the backend's order among equal timestamps.
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        info!("feed ready for {} with {} messages", identity.display_name(), messages.len());

        self.shared.view.send_modify(|view| {
            view.status = FeedStatus::Ready;
            view.messages = messages;
        });

        let weak = Arc::downgrade(&self.shared);
        let opened = self
            .backend
            .subscribe_inserts(move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.apply(event);
                }
            })
            .await;

        match opened {
            Ok(subscription) => {
                debug!("subscribed to '{}'", subscription.channel());
                self.subscription = Some(subscription);
            }
            Err(e) => {
                warn!("could not open live updates: {}", e);
                self.shared.view.send_modify(|view| view.stale = Some(e.to_string()));
            }
        }

        FeedStatus::Ready
    }

    fn fail(&self, message: String) -> FeedStatus {
        let status = FeedStatus::Failed(message);
        self.shared.view.send_modify(|view| view.status = status.clone());
        status
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.view.borrow().status.clone()
    }

    pub fn view(&self) -> FeedView {
        self.shared.view.borrow().clone()
    }

    /// Receiver notified on every change to the feed.
    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.shared.view.subscribe()
    }

    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    /// Cancel the subscription and wait for it to stop, then discard the
    /// feed.
    pub async fn unmount(mut self) {
        self.shared.detached.store(true, Ordering::Release);
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel().await;
        }
        debug!("feed unmounted");
    }
}

impl<B: Backend> Drop for FeedController<B> {
    fn drop(&mut self) {
        self.shared.detached.store(true, Ordering::Release);
        // Dropping the subscription tears the channel down.
        self.subscription.take();
    }
}
