//! Credential store types: the credential of record, token pairs and
//! the header scheme derived from them.

use serde::Deserialize;

/// The credential of record used for (re)authentication.
///
/// At most one of these is held per session; installing a new one
/// invalidates any tokens obtained under the previous identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username/password pair exchanged for a JWT at the auth endpoint.
    Password { username: String, password: String },
    /// Long-lived API token presented directly on every request.
    ApiToken(String),
}

/// Access/refresh token pair. Always installed and replaced as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Short-lived JWT access token.
    pub access: String,
    /// Longer-lived refresh token, when the server issued one.
    pub refresh: Option<String>,
}

/// How to present authentication on an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `apitoken: <value>` header.
    ApiToken(String),
    /// `Authorization: Bearer <value>` header.
    Bearer(String),
}

impl AuthScheme {
    /// Header name/value pair for this scheme.
    #[must_use]
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::ApiToken(token) => ("apitoken", token.clone()),
            Self::Bearer(token) => ("Authorization", format!("Bearer {token}")),
        }
    }
}

/// Response shape shared by the `/auth` and `/refresh` endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthGrant {
    /// New access token. The server never returns an empty one on success.
    #[serde(default)]
    pub access_token: String,
    /// New refresh token, rotated alongside the access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// User metadata attached to the grant.
    #[serde(default)]
    pub user: Option<GrantUser>,
}

/// User block inside an [`AuthGrant`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantUser {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub username: String,
    /// Zero means "no operation assigned".
    #[serde(default)]
    pub current_operation_id: i32,
    #[serde(default)]
    pub current_operation: String,
}

impl AuthGrant {
    /// Token pair carried by this grant.
    #[must_use]
    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access: self.access_token.clone(),
            refresh: self
                .refresh_token
                .clone()
                .filter(|token| !token.is_empty()),
        }
    }

    /// Operation the grant is scoped to, if the server assigned one.
    #[must_use]
    pub fn current_operation(&self) -> Option<i32> {
        self.user
            .as_ref()
            .map(|user| user.current_operation_id)
            .filter(|id| *id > 0)
    }
}
