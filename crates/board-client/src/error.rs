use thiserror::Error;

/// Any failure reported by the persistence or subscription layer.
///
/// `Display` is the text shown to the user, so variants carrying a message
/// render it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request never got a response (DNS, connect, TLS, reset).
    #[error("{0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be understood.
    #[error("unexpected response from backend: {0}")]
    Decode(String),

    /// The request was refused before it left the client.
    #[error("{0}")]
    Validation(String),

    /// The session this request would run under has been signed out.
    #[error("not signed in")]
    SignedOut,

    /// The change-event channel could not be opened or failed mid-stream.
    #[error("live updates unavailable: {0}")]
    Channel(String),
}

impl BackendError {
    pub fn empty_body() -> Self {
        Self::Validation("message body is empty".into())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{var} must use one of {expected}, got '{scheme}'")]
    UnsupportedScheme {
        var: &'static str,
        expected: &'static str,
        scheme: String,
    },

    #[error("{var} is required")]
    Missing { var: &'static str },

    #[error("{var} is not a valid UUID: {source}")]
    InvalidUuid {
        var: &'static str,
        #[source]
        source: uuid::Error,
    },
}
