//! GraphQL wire envelope shared by the HTTP executor and the
//! WebSocket subscription engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Hasura error codes that signal an expired or invalid token.
const AUTH_FAILURE_CODES: &[&str] = &["invalid-jwt", "invalid-headers", "access-denied"];

/// A GraphQL operation ready to be posted or subscribed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl GraphqlRequest {
    /// Build a request from a query document and variables.
    #[must_use]
    pub fn new(query: impl Into<String>, variables: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables,
        }
    }
}

/// A GraphQL execution result: data and/or errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

/// A single error entry in a GraphQL response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: ErrorExtensions,
}

/// Hasura attaches a machine-readable code to each error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl GraphqlResponse {
    /// Whether any error signals an expired or rejected token.
    ///
    /// This is the executor's trigger for the single transparent
    /// re-authentication cycle.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.errors.iter().any(|err| {
            err.extensions
                .code
                .as_deref()
                .is_some_and(|code| AUTH_FAILURE_CODES.contains(&code))
        })
    }

    /// First error message, if the response carries errors.
    #[must_use]
    pub fn first_error(&self) -> Option<&GraphqlError> {
        self.errors.first()
    }
}

/// Mythic's embedded domain-status convention: many mutations resolve
/// successfully at the transport level but report `status: "error"` in
/// the payload. This is never conflated with transport or auth failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    /// Whether the backend reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Convert into a typed result, carrying the backend's message.
    ///
    /// # Errors
    /// Returns `OperationFailed` with the backend-reported message when
    /// the status is anything other than `success`.
    pub fn into_result(self, operation: &str) -> Result<(), ClientError> {
        if self.is_success() {
            return Ok(());
        }
        let message = self.error.unwrap_or_else(|| self.status.clone());
        Err(ClientError::OperationFailed(format!(
            "{operation}: {message}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_variables() {
        let request = GraphqlRequest::new("query Me { me { id } }", Map::new());
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("variables"));
        assert!(!json.contains("operationName"));
    }

    #[test]
    fn test_auth_failure_detection() {
        let response: GraphqlResponse = serde_json::from_str(
            r#"{"errors": [{"message": "Could not verify JWT", "extensions": {"code": "invalid-jwt"}}]}"#,
        )
        .unwrap();
        assert!(response.is_auth_failure());

        let response: GraphqlResponse = serde_json::from_str(
            r#"{"errors": [{"message": "field not found", "extensions": {"code": "validation-failed"}}]}"#,
        )
        .unwrap();
        assert!(!response.is_auth_failure());
        assert_eq!(response.first_error().unwrap().message, "field not found");
    }

    #[test]
    fn test_domain_status_result() {
        let ok: StatusResponse =
            serde_json::from_str(r#"{"status": "success", "error": null}"#).unwrap();
        assert!(ok.into_result("requestOpsecBypass").is_ok());

        let failed: StatusResponse =
            serde_json::from_str(r#"{"status": "error", "error": "task is locked"}"#).unwrap();
        match failed.into_result("requestOpsecBypass") {
            Err(ClientError::OperationFailed(msg)) => assert!(msg.contains("task is locked")),
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }
}
