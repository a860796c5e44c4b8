//! Plain-text rendering of the board: header, composer, and the feed in its
//! loading, error or list state.
use std::fmt::Write;

use chrono::{DateTime, Local, Utc};

use board_client::identity::avatar_initial;
use board_client::{ComposerView, FeedStatus, FeedView, Identity};
use board_types::Message;

const RULE: &str = "----------------------------------------";

pub fn screen(identity: &Identity, feed: &FeedView, composer: &ComposerView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Message Board");
    let _ = writeln!(out, "[{}] {}", identity.avatar_initial(), identity.display_name());
    let _ = writeln!(out, "/signout to sign out, /quit to exit");
    let _ = writeln!(out, "{RULE}");

    match &feed.status {
        FeedStatus::Loading => {
            let _ = writeln!(out, "Loading messages...");
        }
        FeedStatus::Failed(error) => {
            let _ = writeln!(out, "error: {error}");
        }
        FeedStatus::Ready => {
            out.push_str(&composer_block(composer));
            let _ = writeln!(out, "{RULE}");
            if let Some(reason) = &feed.stale {
                let _ = writeln!(out, "live updates paused ({reason}); restart to refresh");
            }
            if feed.messages.is_empty() {
                let _ = writeln!(out, "No messages yet.");
            }
            for message in &feed.messages {
                out.push_str(&message_card(message));
            }
        }
    }

    out
}

fn composer_block(composer: &ComposerView) -> String {
    let mut out = String::new();
    if let Some(error) = &composer.error {
        let _ = writeln!(out, "! {error}");
    }
    if composer.posting {
        let _ = writeln!(out, "Posting...");
    } else if composer.draft.is_empty() {
        let _ = writeln!(out, "What's on your mind? (type and press enter)");
    } else {
        let _ = writeln!(out, "Draft: {}", composer.draft);
    }
    out
}

pub fn message_card(message: &Message) -> String {
    format!(
        "[{}] {}  {}\n    {}\n",
        avatar_initial(&message.author_display_name),
        message.author_display_name,
        timestamp(message.created_at),
        message.body.replace('\n', "\n    "),
    )
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_types::MessageId;
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::nil(),
            full_name: None,
            email: "ada@example.com".into(),
            avatar_url: None,
            access_token: None,
        }
    }

    fn feed(status: FeedStatus, messages: Vec<Message>) -> FeedView {
        FeedView {
            status,
            messages,
            stale: None,
            stream_events: 0,
        }
    }

    fn message(id: u64, author: &str, body: &str) -> Message {
        Message {
            id: MessageId::from(id),
            author_display_name: author.into(),
            author_avatar_ref: None,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn loading_state_hides_composer() {
        let out = screen(&identity(), &feed(FeedStatus::Loading, vec![]), &ComposerView::default());
        assert!(out.contains("[A] ada@example.com"));
        assert!(out.contains("Loading messages..."));
        assert!(!out.contains("What's on your mind?"));
    }

    #[test]
    fn failed_state_shows_error_verbatim() {
        let view = feed(FeedStatus::Failed("network unreachable".into()), vec![]);
        let out = screen(&identity(), &view, &ComposerView::default());
        assert!(out.contains("error: network unreachable"));
        assert!(!out.contains("No messages yet."));
    }

    #[test]
    fn ready_state_lists_messages_in_feed_order() {
        let view = feed(
            FeedStatus::Ready,
            vec![message(2, "bo", "newer"), message(1, "", "older")],
        );
        let out = screen(&identity(), &view, &ComposerView::default());

        let newer = out.find("newer").unwrap();
        let older = out.find("older").unwrap();
        assert!(newer < older);
        assert!(out.contains("[B] bo"));
        assert!(out.contains("[?] "));
    }

    #[test]
    fn ready_state_shows_composer_status_and_staleness() {
        let mut view = feed(FeedStatus::Ready, vec![]);
        view.stale = Some("connection reset".into());
        let composer = ComposerView {
            draft: "hello".into(),
            posting: true,
            error: Some("permission denied".into()),
        };

        let out = screen(&identity(), &view, &composer);
        assert!(out.contains("! permission denied"));
        assert!(out.contains("Posting..."));
        assert!(out.contains("live updates paused (connection reset)"));
        assert!(out.contains("No messages yet."));
    }

    #[test]
    fn multiline_bodies_stay_indented() {
        let card = message_card(&message(1, "bo", "line one\nline two"));
        assert!(card.ends_with("    line one\n    line two\n"));
    }
}
