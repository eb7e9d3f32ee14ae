//! Client configuration.

use std::time::Duration;

use crate::credentials::{Credentials, TokenPair};
use crate::error::ClientError;

/// Default request timeout applied to every HTTP call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the Mythic client.
///
/// Authentication material is optional at construction time; it is
/// validated when a login is actually attempted.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host, with or without a scheme (e.g. `mythic.example.com:7443`).
    pub server_url: String,
    /// Use HTTPS/WSS when true, HTTP/WS when false.
    pub ssl: bool,
    /// Skip TLS certificate verification (self-signed deployments).
    pub skip_tls_verify: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Username for password authentication.
    pub username: Option<String>,
    /// Password for password authentication.
    pub password: Option<String>,
    /// API token authentication (preferred over username/password).
    pub api_token: Option<String>,
    /// Seed access token from a previous session.
    pub access_token: Option<String>,
    /// Seed refresh token from a previous session.
    pub refresh_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            ssl: true,
            skip_tls_verify: false,
            timeout: DEFAULT_TIMEOUT,
            username: None,
            password: None,
            api_token: None,
            access_token: None,
            refresh_token: None,
        }
    }
}

impl Config {
    /// Create a configuration for the given server.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Check that the configuration can produce a usable client.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the server URL is empty.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.server_url.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "server_url is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Server host with any `http://` / `https://` scheme stripped.
    #[must_use]
    pub fn host(&self) -> &str {
        self.server_url
            .strip_prefix("https://")
            .or_else(|| self.server_url.strip_prefix("http://"))
            .unwrap_or(&self.server_url)
            .trim_end_matches('/')
    }

    fn http_scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// GraphQL endpoint URL.
    #[must_use]
    pub fn graphql_url(&self) -> String {
        format!("{}://{}/graphql/", self.http_scheme(), self.host())
    }

    /// Login endpoint URL.
    #[must_use]
    pub fn auth_url(&self) -> String {
        format!("{}://{}/auth", self.http_scheme(), self.host())
    }

    /// Token refresh endpoint URL.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}://{}/refresh", self.http_scheme(), self.host())
    }

    /// WebSocket subscription endpoint URL.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{scheme}://{}/graphql/", self.host())
    }

    /// The credential of record, preferring the API token when both are set.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.api_token {
            if !token.is_empty() {
                return Some(Credentials::ApiToken(token.clone()));
            }
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password))
                if !username.is_empty() && !password.is_empty() =>
            {
                Some(Credentials::Password {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }

    /// Seed token pair carried over from a previous session, if any.
    #[must_use]
    pub fn seed_tokens(&self) -> Option<TokenPair> {
        self.access_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|access| TokenPair {
                access: access.clone(),
                refresh: self.refresh_token.clone().filter(|t| !t.is_empty()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_server_url() {
        assert!(Config::default().validate().is_err());
        assert!(Config::new("mythic.example.com").validate().is_ok());
    }

    #[test]
    fn test_url_builders_strip_scheme() {
        let config = Config::new("https://mythic.example.com:7443");
        assert_eq!(
            config.graphql_url(),
            "https://mythic.example.com:7443/graphql/"
        );
        assert_eq!(config.auth_url(), "https://mythic.example.com:7443/auth");
        assert_eq!(
            config.refresh_url(),
            "https://mythic.example.com:7443/refresh"
        );
        assert_eq!(config.ws_url(), "wss://mythic.example.com:7443/graphql/");
    }

    #[test]
    fn test_plaintext_urls_when_ssl_disabled() {
        let config = Config {
            ssl: false,
            ..Config::new("127.0.0.1:7443")
        };
        assert_eq!(config.graphql_url(), "http://127.0.0.1:7443/graphql/");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:7443/graphql/");
    }

    #[test]
    fn test_api_token_preferred_over_password() {
        let config = Config {
            username: Some("neo".to_string()),
            password: Some("trinity".to_string()),
            api_token: Some("tok".to_string()),
            ..Config::new("mythic.example.com")
        };
        assert_eq!(
            config.credentials(),
            Some(Credentials::ApiToken("tok".to_string()))
        );
    }

    #[test]
    fn test_empty_credentials_are_none() {
        let config = Config {
            username: Some(String::new()),
            password: Some("pw".to_string()),
            ..Config::new("mythic.example.com")
        };
        assert!(config.credentials().is_none());
        assert!(config.seed_tokens().is_none());
    }

    #[test]
    fn test_seed_tokens() {
        let config = Config {
            access_token: Some("a1".to_string()),
            refresh_token: Some("r1".to_string()),
            ..Config::new("mythic.example.com")
        };
        let tokens = config.seed_tokens().unwrap();
        assert_eq!(tokens.access, "a1");
        assert_eq!(tokens.refresh.as_deref(), Some("r1"));
    }
}
