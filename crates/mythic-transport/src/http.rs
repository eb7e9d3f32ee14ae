//! HTTP transport over `reqwest`.
//!
//! One `HttpTransport` serves both the auth endpoints (`/auth`,
//! `/refresh`) and the GraphQL endpoint, sharing a cookie jar and the
//! configured timeout.

use async_trait::async_trait;
use mythic_core::{
    AuthGrant, AuthScheme, AuthTransport, ClientError, Config, GraphqlRequest, GraphqlResponse,
    GraphqlTransport,
};
use reqwest::StatusCode;
use serde_json::json;

/// HTTP client for the Mythic server.
#[derive(Debug)]
pub struct HttpTransport {
    config: Config,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for the given configuration.
    ///
    /// # Errors
    /// Returns `InvalidInput` when the configuration is unusable or the
    /// underlying client cannot be constructed.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout);
        if config.skip_tls_verify {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|err| ClientError::InvalidInput(format!("http client: {err}")))?;

        Ok(Self { config, client })
    }

    fn map_send_error(operation: &str, err: &reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(format!("{operation}: {err}"))
        } else {
            ClientError::Unreachable(format!("{operation}: {err}"))
        }
    }

    async fn parse_grant(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<AuthGrant, ClientError> {
        response
            .json::<AuthGrant>()
            .await
            .map_err(|err| ClientError::OperationFailed(format!("{operation}: bad grant: {err}")))
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, ClientError> {
        let response = self
            .client
            .post(self.config.auth_url())
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(|err| Self::map_send_error("login", &err))?;

        match response.status() {
            status if status.is_success() => Self::parse_grant("login", response).await,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                ClientError::InvalidCredentials(format!("login rejected for {username}")),
            ),
            status => Err(ClientError::Unreachable(format!(
                "login: server returned {status}"
            ))),
        }
    }

    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AuthGrant, ClientError> {
        // The refresh endpoint wants the expiring access token both in
        // the body and as a bearer header.
        let response = self
            .client
            .post(self.config.refresh_url())
            .header("Authorization", format!("Bearer {access_token}"))
            .json(&json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
            }))
            .send()
            .await
            .map_err(|err| Self::map_send_error("refresh", &err))?;

        let status = response.status();
        if status.is_success() {
            Self::parse_grant("refresh", response).await
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ClientError::Unauthorized(format!(
                "refresh rejected with {status}"
            )))
        } else {
            Err(ClientError::Unreachable(format!(
                "refresh: server returned {status}"
            )))
        }
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn post(
        &self,
        scheme: &AuthScheme,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, ClientError> {
        let (header, value) = scheme.header();
        let response = self
            .client
            .post(self.config.graphql_url())
            .header(header, value)
            .json(request)
            .send()
            .await
            .map_err(|err| Self::map_send_error("graphql", &err))?;

        match response.status() {
            status if status.is_success() => response
                .json::<GraphqlResponse>()
                .await
                .map_err(|err| ClientError::Unreachable(format!("graphql: bad envelope: {err}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Unauthorized(
                "graphql: request rejected".to_string(),
            )),
            status => Err(ClientError::Unreachable(format!(
                "graphql: server returned {status}"
            ))),
        }
    }
}
