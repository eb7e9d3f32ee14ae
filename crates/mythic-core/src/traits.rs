//! Network seams implemented by `mythic-transport` and mocked in tests.

use async_trait::async_trait;

use crate::credentials::{AuthGrant, AuthScheme};
use crate::error::ClientError;
use crate::graphql::{GraphqlRequest, GraphqlResponse};

/// Authentication endpoints (`/auth`, `/refresh`).
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange a username/password pair for a token grant.
    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, ClientError>;

    /// Exchange the current token pair for a fresh grant.
    ///
    /// The refresh endpoint authenticates with the (possibly expired)
    /// access token and consumes the refresh token.
    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AuthGrant, ClientError>;
}

/// Authenticated GraphQL query/mutation endpoint.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    /// Post one GraphQL operation carrying the given auth scheme.
    ///
    /// Implementations return `Ok` with the parsed envelope whenever the
    /// server produced one, including envelopes that only contain
    /// errors; `Err` is reserved for transport-level failures.
    async fn post(
        &self,
        scheme: &AuthScheme,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, ClientError>;
}
