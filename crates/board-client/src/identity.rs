use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::BackendError;

/// The signed-in user, as handed over by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
    pub avatar_url: Option<String>,
    /// Bearer token for the backend, if the deployment requires one.
    pub access_token: Option<String>,
}

impl Identity {
    /// Name shown on posts: the full name, falling back to the email.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }

    pub fn avatar_initial(&self) -> char {
        avatar_initial(self.display_name())
    }
}

/// Upper-cased first character of a name, or `?` when there is none.
pub fn avatar_initial(name: &str) -> char {
    name.trim()
        .chars()
        .next()
        .and_then(|c| c.to_uppercase().next())
        .unwrap_or('?')
}

/// An identity with an explicit lifetime: acquired at sign-in, released at
/// sign-out. Clones share the same lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    identity: Arc<Identity>,
    signed_out: CancellationToken,
}

impl Session {
    pub fn sign_in(identity: Identity) -> Self {
        info!("{} ({}) signed in", identity.display_name(), identity.user_id);
        Self {
            identity: Arc::new(identity),
            signed_out: CancellationToken::new(),
        }
    }

    /// The identity, or `SignedOut` once the session has ended.
    pub fn identity(&self) -> Result<Arc<Identity>, BackendError> {
        if self.is_active() {
            Ok(self.identity.clone())
        } else {
            Err(BackendError::SignedOut)
        }
    }

    pub fn is_active(&self) -> bool {
        !self.signed_out.is_cancelled()
    }

    pub fn sign_out(&self) {
        if self.is_active() {
            info!("{} ({}) signed out", self.identity.display_name(), self.identity.user_id);
            self.signed_out.cancel();
        }
    }

    /// Resolves once the session has been signed out.
    pub async fn signed_out(&self) {
        self.signed_out.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            full_name: Some("ada lovelace".into()),
            email: "ada@example.com".into(),
            avatar_url: None,
            access_token: None,
        }
    }

    #[test]
    fn display_name_prefers_full_name() {
        let mut id = ada();
        assert_eq!(id.display_name(), "ada lovelace");
        assert_eq!(id.avatar_initial(), 'A');

        id.full_name = None;
        assert_eq!(id.display_name(), "ada@example.com");

        id.full_name = Some("   ".into());
        assert_eq!(id.display_name(), "ada@example.com");
    }

    #[test]
    fn avatar_initial_falls_back_to_question_mark() {
        assert_eq!(avatar_initial(""), '?');
        assert_eq!(avatar_initial("émile"), 'É');
    }

    #[test]
    fn sign_out_is_shared_by_clones() {
        let session = Session::sign_in(ada());
        let other = session.clone();
        assert!(other.identity().is_ok());

        session.sign_out();
        assert!(!other.is_active());
        assert_eq!(other.identity().unwrap_err(), BackendError::SignedOut);
    }
}
