//! Wire frames for the `graphql-transport-ws` subprotocol.

use mythic_core::{GraphqlError, GraphqlRequest, GraphqlResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The WebSocket subprotocol Hasura speaks for subscriptions.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Frame from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open the protocol session. The payload carries auth headers.
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Start a subscription under a client-chosen ID.
    Subscribe { id: String, payload: GraphqlRequest },
    /// Stop a subscription.
    Complete { id: String },
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
}

/// Frame from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The server accepted the protocol session.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// An execution result for one subscription.
    Next {
        id: String,
        payload: GraphqlResponse,
    },
    /// The subscription failed and will produce no further results.
    Error {
        id: String,
        payload: Vec<GraphqlError>,
    },
    /// The subscription finished normally.
    Complete { id: String },
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_subscribe_frame_serialization() {
        let frame = ClientFrame::Subscribe {
            id: "sub-1".to_string(),
            payload: GraphqlRequest::new("subscription { task { id } }", serde_json::Map::new()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"subscribe""#));
        assert!(json.contains(r#""id":"sub-1""#));
    }

    #[test]
    fn test_next_frame_parsing() {
        let raw = json!({
            "type": "next",
            "id": "sub-1",
            "payload": {"data": {"task": [{"id": 4}]}}
        });
        let frame: ServerFrame = serde_json::from_value(raw).unwrap();
        let ServerFrame::Next { id, payload } = frame else {
            panic!("expected next frame");
        };
        assert_eq!(id, "sub-1");
        assert!(payload.data.is_some());
    }

    #[test]
    fn test_keepalive_frames_have_no_body() {
        let frame: ServerFrame = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Ping));
        assert_eq!(
            serde_json::to_string(&ClientFrame::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
    }

    #[test]
    fn test_ack_payload_is_optional() {
        let frame: ServerFrame = serde_json::from_str(r#"{"type": "connection_ack"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::ConnectionAck { payload: None }));
    }
}
