use url::Url;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::identity::Identity;

const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API; `messages` is resolved against it.
    pub api_url: Url,
    /// WebSocket URL of the change-event gateway.
    pub gateway_url: Url,
}

impl ClientConfig {
    /// Build a config from an API base URL, deriving the gateway URL
    /// (`http` -> `ws`, `https` -> `wss`, path `/gateway`).
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = parse_api_url("BOARD_API_URL", api_url)?;
        let gateway_url = derive_gateway_url(&api_url);
        Ok(Self { api_url, gateway_url })
    }

    pub fn with_gateway(mut self, gateway_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(gateway_url).map_err(|source| ConfigError::InvalidUrl {
            var: "BOARD_GATEWAY_URL",
            source,
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme {
                var: "BOARD_GATEWAY_URL",
                expected: "ws, wss",
                scheme: url.scheme().to_string(),
            });
        }
        self.gateway_url = url;
        Ok(self)
    }

    /// Read `BOARD_API_URL` and `BOARD_GATEWAY_URL` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("BOARD_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let config = Self::new(&api_url)?;

        match std::env::var("BOARD_GATEWAY_URL") {
            Ok(gateway) if !gateway.trim().is_empty() => config.with_gateway(gateway.trim()),
            _ => Ok(config),
        }
    }

    pub fn messages_url(&self) -> Url {
        join_path(&self.api_url, "messages")
    }
}

/// Load the signed-in user handed over by the authentication collaborator.
///
/// `BOARD_USER_EMAIL` is required; `BOARD_USER_ID` defaults to a fresh
/// UUID, and name, avatar and access token are optional.
pub fn identity_from_env() -> Result<Identity, ConfigError> {
    let email = non_empty_var("BOARD_USER_EMAIL").ok_or(ConfigError::Missing {
        var: "BOARD_USER_EMAIL",
    })?;
    let user_id = match non_empty_var("BOARD_USER_ID") {
        Some(raw) => raw.parse::<Uuid>().map_err(|source| ConfigError::InvalidUuid {
            var: "BOARD_USER_ID",
            source,
        })?,
        None => Uuid::new_v4(),
    };

    Ok(Identity {
        user_id,
        full_name: non_empty_var("BOARD_USER_NAME"),
        email,
        avatar_url: non_empty_var("BOARD_USER_AVATAR"),
        access_token: non_empty_var("BOARD_ACCESS_TOKEN"),
    })
}

fn non_empty_var(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_api_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { var, source })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme {
            var,
            expected: "http, https",
            scheme: url.scheme().to_string(),
        });
    }
    // Treat the base as a directory so relative joins keep its path.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn derive_gateway_url(api_url: &Url) -> Url {
    let mut url = join_path(api_url, "gateway");
    let scheme = if api_url.scheme() == "https" { "wss" } else { "ws" };
    // http(s) -> ws(s) is always an allowed scheme change for special schemes.
    let _ = url.set_scheme(scheme);
    url
}

fn join_path(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}{}", base.path(), segment);
    url.set_path(&path);
    url
}
