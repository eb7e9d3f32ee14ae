//! Session manager: the single source of truth for "can we talk to the
//! backend right now".

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mythic_core::{AuthScheme, AuthTransport, ClientError, Config, Credentials, TokenPair};
use tokio::sync::Mutex;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// All broadly shared mutable state, guarded by one mutex.
///
/// Holding the lock across the login network call is deliberate: it is
/// what makes concurrent `ensure_authenticated` callers single-file
/// through at most one in-flight login and then share its outcome.
#[derive(Default)]
struct SessionState {
    credentials: Option<Credentials>,
    tokens: Option<TokenPair>,
    current_operation: Option<i32>,
    authenticated_at: Option<i64>,
}

impl SessionState {
    fn is_authenticated(&self) -> bool {
        // An API token is presented directly on every request, so its
        // presence alone counts as authenticated.
        self.tokens.is_some() || matches!(self.credentials, Some(Credentials::ApiToken(_)))
    }

    fn clear_tokens(&mut self) {
        self.tokens = None;
        self.current_operation = None;
        self.authenticated_at = None;
    }
}

/// Owns the credential store and performs login/logout/refresh.
///
/// The only component allowed to mutate credential or token state.
pub struct SessionManager {
    transport: Arc<dyn AuthTransport>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a session seeded from the configuration.
    ///
    /// Seed tokens from a previous session put the manager directly in
    /// the authenticated state, matching what the server issued them for.
    #[must_use]
    pub fn new(config: &Config, transport: Arc<dyn AuthTransport>) -> Self {
        let tokens = config.seed_tokens();
        let authenticated_at = tokens.as_ref().map(|_| now());
        Self {
            transport,
            state: Mutex::new(SessionState {
                credentials: config.credentials(),
                tokens,
                current_operation: None,
                authenticated_at,
            }),
        }
    }

    /// Authenticate using the stored credential of record.
    ///
    /// An API-token credential needs no exchange; a password credential
    /// is posted to the auth endpoint and the resulting token pair plus
    /// current-operation assignment are installed atomically.
    ///
    /// Cancellation is modeled the tokio way: dropping the returned
    /// future abandons the request, and the configured transport
    /// timeout bounds how long it can block.
    ///
    /// # Errors
    /// `InvalidCredentials` when no credential is configured or the
    /// server rejects it; transport errors pass through unchanged. On
    /// any error the session is left unauthenticated.
    pub async fn login(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    async fn login_locked(&self, state: &mut SessionState) -> Result<(), ClientError> {
        match state.credentials.clone() {
            Some(Credentials::ApiToken(_)) => {
                state.authenticated_at = Some(now());
                Ok(())
            }
            Some(Credentials::Password { username, password }) => {
                // A failed attempt must never leave stale tokens behind.
                state.clear_tokens();

                let grant = self.transport.login(&username, &password).await?;
                if grant.access_token.is_empty() {
                    return Err(ClientError::InvalidCredentials(
                        "login: no access token returned".to_string(),
                    ));
                }

                state.current_operation = grant.current_operation();
                state.tokens = Some(grant.tokens());
                state.authenticated_at = Some(now());
                tracing::debug!(username = %username, "session authenticated");
                Ok(())
            }
            None => Err(ClientError::InvalidCredentials(
                "login: no credentials configured".to_string(),
            )),
        }
    }

    /// Clear all tokens and mark the session unauthenticated.
    ///
    /// Safe to call when already logged out. Does not revoke tokens on
    /// the server.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        state.clear_tokens();
        tracing::debug!("session logged out");
    }

    /// Replace the credential of record.
    ///
    /// Any tokens obtained under the previous identity are cleared in
    /// the same critical section, so no caller can observe the new
    /// credentials alongside an old access token. No network I/O; the
    /// next `ensure_authenticated` performs the login.
    pub async fn set_credentials(&self, credentials: Credentials) {
        let mut state = self.state.lock().await;
        state.clear_tokens();
        state.credentials = Some(credentials);
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// # Errors
    /// `NoRefreshToken` when none is held (state unchanged). When the
    /// server rejects the exchange the session transitions to
    /// unauthenticated and `Unauthorized` is returned. Transport errors
    /// leave the current pair in place.
    pub async fn refresh_access_token(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        let Some(tokens) = state.tokens.clone() else {
            return Err(ClientError::NoRefreshToken);
        };
        let Some(refresh) = tokens.refresh else {
            return Err(ClientError::NoRefreshToken);
        };

        match self.transport.refresh(&tokens.access, &refresh).await {
            Ok(grant) => {
                if grant.access_token.is_empty() {
                    state.clear_tokens();
                    return Err(ClientError::Unauthorized(
                        "refresh: no access token returned".to_string(),
                    ));
                }
                if let Some(operation) = grant.current_operation() {
                    state.current_operation = Some(operation);
                }
                state.tokens = Some(grant.tokens());
                state.authenticated_at = Some(now());
                tracing::debug!("access token refreshed");
                Ok(())
            }
            Err(err) if err.is_auth_error() => {
                // The refresh token was consumed or revoked; there is no
                // fallback left on this path.
                state.clear_tokens();
                Err(ClientError::Unauthorized(format!("refresh rejected: {err}")))
            }
            Err(err) => Err(err),
        }
    }

    /// Gate used by every outbound call: return immediately when a
    /// usable token is held, otherwise log in with the credential of
    /// record.
    ///
    /// Concurrent callers block on the session lock; the first one
    /// performs the login and the rest observe the installed tokens on
    /// the fast path, so at most one network attempt is in flight.
    ///
    /// # Errors
    /// Whatever error `login` produces.
    pub async fn ensure_authenticated(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.is_authenticated() {
            return Ok(());
        }
        self.login_locked(&mut state).await
    }

    /// Whether a usable credential or token is currently held.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_authenticated()
    }

    /// Operation the session is currently scoped to.
    pub async fn current_operation(&self) -> Option<i32> {
        self.state.lock().await.current_operation
    }

    /// Scope subsequent calls to the given operation.
    pub async fn set_current_operation(&self, operation_id: i32) {
        self.state.lock().await.current_operation = Some(operation_id);
    }

    /// Unix timestamp of the last successful authentication.
    pub async fn authenticated_at(&self) -> Option<i64> {
        self.state.lock().await.authenticated_at
    }

    /// Header scheme for outbound requests, or `None` when the session
    /// is unauthenticated.
    ///
    /// The token pair is read in one critical section, so callers never
    /// observe a half-updated pair.
    pub async fn auth_scheme(&self) -> Option<AuthScheme> {
        let state = self.state.lock().await;
        match &state.credentials {
            Some(Credentials::ApiToken(token)) => Some(AuthScheme::ApiToken(token.clone())),
            _ => state
                .tokens
                .as_ref()
                .map(|tokens| AuthScheme::Bearer(tokens.access.clone())),
        }
    }

    /// Whether a refresh token is currently held.
    pub async fn has_refresh_token(&self) -> bool {
        self.state
            .lock()
            .await
            .tokens
            .as_ref()
            .is_some_and(|tokens| tokens.refresh.is_some())
    }
}
