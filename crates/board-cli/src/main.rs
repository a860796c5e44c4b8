mod render;

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use futures_util::future::OptionFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use board_client::config::identity_from_env;
use board_client::{
    Backend, ClientConfig, Composer, FeedController, FeedStatus, HttpBackend, Identity,
    MemoryBackend, MergePolicy, Session, SubmitOutcome,
};
use board_types::{Message, MessageId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the rendered board.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "board=info,board_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let offline = std::env::args().skip(1).any(|arg| arg == "--offline");

    let identity = match identity_from_env() {
        Ok(identity) => identity,
        Err(e) if offline => {
            warn!("{}; continuing as guest", e);
            guest()
        }
        Err(e) => return Err(e).context("no signed-in user"),
    };
    let session = Session::sign_in(identity);

    if offline {
        info!("running against an in-memory board");
        run(Arc::new(demo_backend()), session).await
    } else {
        let token = session.identity()?.access_token.clone();
        let backend = HttpBackend::new(ClientConfig::from_env()?, token);
        info!(
            "using backend at {} (gateway {})",
            backend.config().api_url,
            backend.config().gateway_url
        );
        run(Arc::new(backend), session).await
    }
}

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    SignOut,
    /// Empty line: send the kept draft again.
    Resubmit,
    Post(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "/quit" => Input::Quit,
            "/signout" => Input::SignOut,
            "" => Input::Resubmit,
            _ => Input::Post(line.to_string()),
        }
    }
}

type PendingPost<'a> = Pin<Box<dyn Future<Output = SubmitOutcome> + 'a>>;

async fn run<B: Backend>(backend: Arc<B>, session: Session) -> anyhow::Result<()> {
    let identity = session.identity()?;
    let mut feed = FeedController::new(backend.clone(), session.clone(), MergePolicy::default());
    let composer = Composer::new(backend, session.clone(), feed.handle());

    let mut feed_rx = feed.watch();
    let mut composer_rx = composer.watch();
    draw(&render::screen(&identity, &feed_rx.borrow_and_update(), &composer.view()))?;

    if let FeedStatus::Failed(error) = feed.start().await {
        draw(&render::screen(&identity, &feed.view(), &composer.view()))?;
        feed.unmount().await;
        anyhow::bail!("could not load messages: {}", error);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // The create in flight, polled alongside input so the screen keeps
    // updating while it runs.
    let mut pending: Option<PendingPost<'_>> = None;
    loop {
        draw(&render::screen(
            &identity,
            &feed_rx.borrow_and_update(),
            &composer_rx.borrow_and_update(),
        ))?;

        tokio::select! {
            changed = feed_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = composer_rx.changed() => {}
            Some(outcome) = OptionFuture::from(pending.as_mut()), if pending.is_some() => {
                pending = None;
                report(outcome);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading input")? else {
                    break;
                };
                let post: PendingPost<'_> = match Input::parse(&line) {
                    Input::Quit => break,
                    Input::SignOut => {
                        session.sign_out();
                        break;
                    }
                    Input::Resubmit => Box::pin(composer.submit_draft()),
                    Input::Post(body) => {
                        let composer = &composer;
                        Box::pin(async move { composer.submit(&body).await })
                    }
                };
                if pending.is_some() {
                    // Resolves at once with `Busy`.
                    report(post.await);
                } else {
                    pending = Some(post);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = session.signed_out() => break,
        }
    }

    // Abandons a post still in flight.
    drop(pending);
    feed.unmount().await;
    info!("bye");
    Ok(())
}

fn report(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Posted(message) => info!("posted message {}", message.id),
        SubmitOutcome::Failed(e) => warn!("post failed: {}", e),
        SubmitOutcome::Busy => info!("still posting, try again in a moment"),
        SubmitOutcome::Empty => {}
    }
}

fn draw(screen: &str) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    // Clear and home the cursor, then repaint.
    write!(stdout, "\x1b[2J\x1b[H{screen}> ")?;
    stdout.flush()?;
    Ok(())
}

fn guest() -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        full_name: Some("Guest".into()),
        email: "guest@localhost".into(),
        avatar_url: None,
        access_token: None,
    }
}

fn demo_backend() -> MemoryBackend {
    let now = Utc::now();
    let seed = |id: u64, minutes_ago: i64, author: &str, body: &str| Message {
        id: MessageId::from(id),
        author_display_name: author.to_string(),
        author_avatar_ref: None,
        body: body.to_string(),
        created_at: now - TimeDelta::minutes(minutes_ago),
    };

    MemoryBackend::with_messages(vec![
        seed(1, 90, "Board Bot", "Welcome to the board."),
        seed(2, 45, "Board Bot", "Posts show up here newest first."),
        seed(3, 5, "Board Bot", "Type a message below and press enter."),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_and_posts_are_told_apart() {
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("  /signout "), Input::SignOut);
        assert_eq!(Input::parse("hello /quit"), Input::Post("hello /quit".into()));
    }

    #[test]
    fn blank_line_resubmits_the_draft() {
        assert_eq!(Input::parse(""), Input::Resubmit);
        assert_eq!(Input::parse("   "), Input::Resubmit);
    }

    #[tokio::test]
    async fn blank_line_after_failure_posts_kept_draft() {
        let backend = Arc::new(MemoryBackend::new());
        let session = Session::sign_in(guest());
        let mut feed = FeedController::new(backend.clone(), session.clone(), MergePolicy::default());
        feed.start().await;
        let composer = Composer::new(backend.clone(), session, feed.handle());

        backend.fail_next_create(board_client::BackendError::Transport("timed out".into()));
        assert!(matches!(composer.submit("retry me").await, SubmitOutcome::Failed(_)));

        let Input::Resubmit = Input::parse("") else {
            panic!("blank line should resubmit");
        };
        assert!(matches!(composer.submit_draft().await, SubmitOutcome::Posted(_)));
        assert_eq!(backend.rows().len(), 1);
        feed.unmount().await;
    }
}
