//! Authenticated GraphQL execution with bounded auth recovery.

use std::sync::Arc;

use mythic_core::{ClientError, GraphqlRequest, GraphqlResponse, GraphqlTransport};
use mythic_session::SessionManager;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Names a GraphQL document and the top-level response field to decode.
#[derive(Debug, Clone, Copy)]
pub struct OperationDescriptor {
    /// Top-level field in the response `data` object.
    pub name: &'static str,
    /// Full GraphQL document.
    pub document: &'static str,
}

/// Outcome of one transport round trip, folded into the three cases the
/// retry logic cares about.
enum Outcome {
    Success(GraphqlResponse),
    AuthFailure(String),
    Fatal(ClientError),
}

/// Executes queries and mutations on behalf of the per-entity wrappers,
/// hiding all authentication plumbing.
///
/// On an authorization failure the executor performs exactly one
/// recovery cycle (token refresh, or re-login when no refresh token is
/// held) followed by exactly one retry. The bound is deliberate:
/// mutations are not idempotent, so a second rejection is surfaced as
/// fatal rather than retried again. Network-level failures are never
/// retried; callers own that policy.
pub struct RequestExecutor {
    session: Arc<SessionManager>,
    transport: Arc<dyn GraphqlTransport>,
}

impl RequestExecutor {
    /// Create an executor over the given session and transport.
    #[must_use]
    pub fn new(session: Arc<SessionManager>, transport: Arc<dyn GraphqlTransport>) -> Self {
        Self { session, transport }
    }

    /// The session this executor authenticates with.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Execute one operation and decode its top-level field into `T`.
    ///
    /// # Errors
    /// - authentication errors from `ensure_authenticated`, unchanged
    /// - `Unauthorized` when the call is rejected again after recovery
    /// - `OperationFailed` for GraphQL errors and undecodable payloads
    /// - `Unreachable`/`Timeout` transport errors, propagated immediately
    pub async fn execute<T: DeserializeOwned>(
        &self,
        kind: OperationKind,
        descriptor: &OperationDescriptor,
        variables: Map<String, Value>,
    ) -> Result<T, ClientError> {
        self.session.ensure_authenticated().await?;

        let request = GraphqlRequest::new(descriptor.document, variables);
        let response = match self.post_once(&request).await {
            Outcome::Success(response) => response,
            Outcome::AuthFailure(reason) => {
                tracing::debug!(
                    operation = descriptor.name,
                    kind = ?kind,
                    reason = %reason,
                    "authorization rejected, running recovery cycle"
                );
                self.recover().await?;
                match self.post_once(&request).await {
                    Outcome::Success(response) => response,
                    Outcome::AuthFailure(reason) => {
                        return Err(ClientError::Unauthorized(format!(
                            "{}: rejected after recovery: {reason}",
                            descriptor.name
                        )));
                    }
                    Outcome::Fatal(err) => return Err(err),
                }
            }
            Outcome::Fatal(err) => return Err(err),
        };

        Self::decode(descriptor, response)
    }

    async fn post_once(&self, request: &GraphqlRequest) -> Outcome {
        let Some(scheme) = self.session.auth_scheme().await else {
            return Outcome::AuthFailure("no authentication material held".to_string());
        };
        match self.transport.post(&scheme, request).await {
            Ok(response) if response.is_auth_failure() => {
                let reason = response
                    .first_error()
                    .map_or_else(|| "token rejected".to_string(), |e| e.message.clone());
                Outcome::AuthFailure(reason)
            }
            Ok(response) => Outcome::Success(response),
            // The transport reports HTTP 401/403 this way.
            Err(ClientError::Unauthorized(reason)) => Outcome::AuthFailure(reason),
            Err(err) => Outcome::Fatal(err),
        }
    }

    /// One recovery cycle: refresh when a refresh token is held,
    /// otherwise a full re-login with the credential of record.
    async fn recover(&self) -> Result<(), ClientError> {
        if self.session.has_refresh_token().await {
            self.session.refresh_access_token().await
        } else {
            self.session.login().await
        }
    }

    fn decode<T: DeserializeOwned>(
        descriptor: &OperationDescriptor,
        response: GraphqlResponse,
    ) -> Result<T, ClientError> {
        // Domain errors in the envelope are final; they never trigger a
        // retry.
        if let Some(error) = response.first_error() {
            return Err(ClientError::OperationFailed(format!(
                "{}: {}",
                descriptor.name, error.message
            )));
        }

        let mut data = response.data.ok_or_else(|| {
            ClientError::OperationFailed(format!("{}: response carried no data", descriptor.name))
        })?;
        let field = match &mut data {
            Value::Object(map) => map.remove(descriptor.name),
            _ => None,
        }
        .ok_or_else(|| {
            ClientError::OperationFailed(format!(
                "{}: field missing from response",
                descriptor.name
            ))
        })?;

        serde_json::from_value(field).map_err(|err| {
            ClientError::OperationFailed(format!(
                "{}: undecodable response: {err}",
                descriptor.name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mythic_core::{AuthGrant, AuthScheme, AuthTransport, Config};
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    const WHOAMI: OperationDescriptor = OperationDescriptor {
        name: "operator",
        document: "query Whoami { operator(limit: 1) { id username } }",
    };

    fn envelope(value: Value) -> GraphqlResponse {
        serde_json::from_value(value).unwrap()
    }

    fn auth_failure_envelope() -> GraphqlResponse {
        envelope(json!({
            "errors": [{"message": "Could not verify JWT: JWTExpired",
                        "extensions": {"code": "invalid-jwt"}}]
        }))
    }

    fn operator_envelope() -> GraphqlResponse {
        envelope(json!({"data": {"operator": {"id": 1, "username": "op"}}}))
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Operator {
        id: i32,
        username: String,
    }

    /// Scripted GraphQL endpoint recording every auth scheme it saw.
    struct ScriptedGraphql {
        posts: AtomicUsize,
        schemes: std::sync::Mutex<Vec<AuthScheme>>,
        results: Mutex<VecDeque<Result<GraphqlResponse, ClientError>>>,
    }

    impl ScriptedGraphql {
        fn new(results: Vec<Result<GraphqlResponse, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                posts: AtomicUsize::new(0),
                schemes: std::sync::Mutex::new(Vec::new()),
                results: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl GraphqlTransport for ScriptedGraphql {
        async fn post(
            &self,
            scheme: &AuthScheme,
            _request: &GraphqlRequest,
        ) -> Result<GraphqlResponse, ClientError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.schemes.lock().unwrap().push(scheme.clone());
            self.results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Unreachable("script exhausted".into())))
        }
    }

    /// Auth endpoint that always hands out the next token in sequence.
    struct RotatingAuth {
        login_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl RotatingAuth {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                login_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn grant(access: &str) -> AuthGrant {
            serde_json::from_value(json!({"access_token": access, "refresh_token": "r-next"}))
                .unwrap()
        }
    }

    #[async_trait]
    impl AuthTransport for RotatingAuth {
        async fn login(&self, _username: &str, _password: &str) -> Result<AuthGrant, ClientError> {
            let n = self.login_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Self::grant(&format!("login-{n}")))
        }

        async fn refresh(
            &self,
            _access_token: &str,
            _refresh_token: &str,
        ) -> Result<AuthGrant, ClientError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Self::grant(&format!("refresh-{n}")))
        }
    }

    fn seeded_session(auth: Arc<RotatingAuth>, with_refresh: bool) -> Arc<SessionManager> {
        let config = Config {
            username: Some("op".to_string()),
            password: Some("pw".to_string()),
            access_token: Some("stale".to_string()),
            refresh_token: with_refresh.then(|| "r0".to_string()),
            ..Config::new("mythic.example.com")
        };
        Arc::new(SessionManager::new(&config, auth))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let graphql = ScriptedGraphql::new(vec![Ok(operator_envelope())]);
        let executor = RequestExecutor::new(
            seeded_session(RotatingAuth::new(), true),
            graphql.clone(),
        );

        let operator: Operator = executor
            .execute(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap();
        assert_eq!(
            operator,
            Operator {
                id: 1,
                username: "op".to_string()
            }
        );
        assert_eq!(graphql.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transparent_recovery_via_refresh() {
        let auth = RotatingAuth::new();
        let graphql =
            ScriptedGraphql::new(vec![Ok(auth_failure_envelope()), Ok(operator_envelope())]);
        let executor = RequestExecutor::new(seeded_session(auth.clone(), true), graphql.clone());

        let operator: Operator = executor
            .execute(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap();
        assert_eq!(operator.username, "op");

        // Refresh-then-retry, and the retry carried the new token.
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 0);
        let schemes = graphql.schemes.lock().unwrap();
        assert_eq!(schemes.len(), 2);
        assert_eq!(schemes[0], AuthScheme::Bearer("stale".to_string()));
        assert_eq!(schemes[1], AuthScheme::Bearer("refresh-0".to_string()));
    }

    #[tokio::test]
    async fn test_recovery_via_login_without_refresh_token() {
        let auth = RotatingAuth::new();
        let graphql =
            ScriptedGraphql::new(vec![Ok(auth_failure_envelope()), Ok(operator_envelope())]);
        let executor = RequestExecutor::new(seeded_session(auth.clone(), false), graphql.clone());

        let _: Operator = executor
            .execute(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap();
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_auth_failure_is_fatal() {
        let auth = RotatingAuth::new();
        let graphql = ScriptedGraphql::new(vec![
            Ok(auth_failure_envelope()),
            Ok(auth_failure_envelope()),
            Ok(operator_envelope()),
        ]);
        let executor = RequestExecutor::new(seeded_session(auth, true), graphql.clone());

        let err = executor
            .execute::<Operator>(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        // Exactly two attempts; the scripted third response stays unused.
        assert_eq!(graphql.posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_http_unauthorized_triggers_recovery() {
        let auth = RotatingAuth::new();
        let graphql = ScriptedGraphql::new(vec![
            Err(ClientError::Unauthorized("401".into())),
            Ok(operator_envelope()),
        ]);
        let executor = RequestExecutor::new(seeded_session(auth.clone(), true), graphql.clone());

        let _: Operator = executor
            .execute(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap();
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(graphql.posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_domain_error_is_not_retried() {
        let graphql = ScriptedGraphql::new(vec![Ok(envelope(json!({
            "errors": [{"message": "permission denied for operation",
                        "extensions": {"code": "constraint-violation"}}]
        })))]);
        let executor =
            RequestExecutor::new(seeded_session(RotatingAuth::new(), true), graphql.clone());

        let err = executor
            .execute::<Operator>(OperationKind::Mutation, &WHOAMI, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OperationFailed(_)));
        assert_eq!(graphql.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_propagates_without_retry() {
        let graphql = ScriptedGraphql::new(vec![Err(ClientError::Unreachable(
            "connection refused".into(),
        ))]);
        let executor =
            RequestExecutor::new(seeded_session(RotatingAuth::new(), true), graphql.clone());

        let err = executor
            .execute::<Operator>(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
        assert_eq!(graphql.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_operation_failed() {
        let graphql = ScriptedGraphql::new(vec![Ok(envelope(json!({"data": {}})))]);
        let executor = RequestExecutor::new(seeded_session(RotatingAuth::new(), true), graphql);

        let err = executor
            .execute::<Operator>(OperationKind::Query, &WHOAMI, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OperationFailed(_)));
    }
}
