use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use board_types::{Message, NewMessage};

use crate::backend::Backend;
use crate::error::BackendError;
use crate::feed::FeedHandle;
use crate::identity::Session;

/// What the input area shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposerView {
    pub draft: String,
    /// A create is in flight; further submits are refused.
    pub posting: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing but whitespace was typed; no request was made.
    Empty,
    /// Another submit from this composer is still in flight.
    Busy,
    Posted(Message),
    Failed(BackendError),
}

/// Posts new messages on behalf of the session's user.
pub struct Composer<B: Backend> {
    backend: Arc<B>,
    session: Session,
    feed: FeedHandle,
    state: watch::Sender<ComposerView>,
    in_flight: AtomicBool,
}

/// Holds the composer's single posting slot; releases it on drop, also when
/// the submit future is dropped mid-request.
struct PostingGuard<'a> {
    in_flight: &'a AtomicBool,
    state: &'a watch::Sender<ComposerView>,
}

impl<'a> PostingGuard<'a> {
    fn acquire(in_flight: &'a AtomicBool, state: &'a watch::Sender<ComposerView>) -> Option<Self> {
        in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        state.send_modify(|view| {
            view.posting = true;
            view.error = None;
        });
        Some(Self { in_flight, state })
    }
}

impl Drop for PostingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|view| view.posting = false);
        self.in_flight.store(false, Ordering::Release);
    }
}

impl<B: Backend> Composer<B> {
    pub fn new(backend: Arc<B>, session: Session, feed: FeedHandle) -> Self {
        let (state, _) = watch::channel(ComposerView::default());
        Self {
            backend,
            session,
            feed,
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn view(&self) -> ComposerView {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ComposerView> {
        self.state.subscribe()
    }

    pub fn is_posting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.send_modify(|view| view.draft = text);
    }

    /// Submit whatever is currently in the draft.
    pub async fn submit_draft(&self) -> SubmitOutcome {
        let body = self.state.borrow().draft.clone();
        self.submit(&body).await
    }

    /// Post `body`, trimmed. On success the draft is cleared and the record
    /// goes into the feed right away; on failure the draft keeps `body` and
    /// the error is shown.
    pub async fn submit(&self, body: &str) -> SubmitOutcome {
        if body.trim().is_empty() {
            return SubmitOutcome::Empty;
        }

        let Some(_guard) = PostingGuard::acquire(&self.in_flight, &self.state) else {
            debug!("submit ignored, a post is already in flight");
            return SubmitOutcome::Busy;
        };
        self.state.send_modify(|view| view.draft = body.to_string());

        let identity = match self.session.identity() {
            Ok(identity) => identity,
            Err(e) => return self.fail(e),
        };
        let Some(new) = NewMessage::new(identity.display_name(), identity.avatar_url.clone(), body) else {
            return self.fail(BackendError::empty_body());
        };

        match self.backend.create_message(new).await {
            Ok(message) => {
                info!("{} posted message {}", identity.display_name(), message.id);
                self.state.send_modify(|view| view.draft.clear());
                if !self.feed.insert(message.clone()) {
                    debug!("message {} not added locally", message.id);
                }
                SubmitOutcome::Posted(message)
            }
            Err(e) => {
                warn!("{} failed to post: {}", identity.display_name(), e);
                self.fail(e)
            }
        }
    }

    fn fail(&self, err: BackendError) -> SubmitOutcome {
        self.state.send_modify(|view| view.error = Some(err.to_string()));
        SubmitOutcome::Failed(err)
    }
}
