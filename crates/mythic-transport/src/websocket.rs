//! GraphQL subscriptions over a single WebSocket connection.
//!
//! One `SubscriptionEngine` owns the connection and multiplexes any
//! number of subscriptions over it, demultiplexing server frames by
//! subscription ID. Event delivery applies backpressure: a consumer
//! that stops draining its channel eventually stalls the read loop for
//! the whole connection, so slow consumers should either size their
//! buffer accordingly or close the subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mythic_core::{AuthScheme, ClientError, Config, GraphqlRequest, GraphqlResponse};
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{ClientFrame, SUBPROTOCOL, ServerFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type SubMap = Arc<Mutex<HashMap<String, SubEntry>>>;

/// Default event channel capacity when `SubscriptionSpec` leaves it at zero.
const DEFAULT_EVENT_BUFFER: usize = 100;
/// Error channel capacity. Errors beyond this are dropped with a log.
const ERROR_BUFFER: usize = 10;
/// Outbound frame queue capacity.
const WRITE_BUFFER: usize = 32;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn encode(frame: &ClientFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json)),
        Err(err) => {
            tracing::error!("failed to encode client frame: {err}");
            None
        }
    }
}

/// What to subscribe to and how much to buffer.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    /// GraphQL subscription document.
    pub query: String,
    /// Operation name, when the document defines more than one.
    pub operation_name: Option<String>,
    /// Subscription variables.
    pub variables: Map<String, Value>,
    /// Event channel capacity. Zero selects the default of 100.
    pub buffer: usize,
}

impl SubscriptionSpec {
    /// Spec for the given document with default buffering.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Map::new(),
            buffer: 0,
        }
    }
}

/// One result pushed by the server.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    /// ID of the subscription that produced this event.
    pub subscription_id: String,
    /// The `data` member of the execution result.
    pub data: Value,
    /// Unix timestamp of local receipt.
    pub received_at: i64,
}

/// Consumer handle for one active subscription.
///
/// Dropping the handle without calling [`close`](Self::close) leaves
/// the subscription registered until its event channel fills; close it
/// when done.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    events: mpsc::Receiver<SubscriptionEvent>,
    errors: mpsc::Receiver<ClientError>,
    token: CancellationToken,
}

impl Subscription {
    /// ID this subscription is registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the subscription is still registered with the engine.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Next event, or `None` once the subscription has ended and the
    /// buffer is drained.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Next subscription-level error, if any.
    pub async fn next_error(&mut self) -> Option<ClientError> {
        self.errors.recv().await
    }

    /// Next event or error, whichever arrives first. `None` once the
    /// subscription has ended and both channels are drained.
    pub async fn next(&mut self) -> Option<Result<SubscriptionEvent, ClientError>> {
        tokio::select! {
            event = self.events.recv() => match event {
                Some(event) => Some(Ok(event)),
                None => self.errors.recv().await.map(Err),
            },
            error = self.errors.recv() => match error {
                Some(error) => Some(Err(error)),
                None => self.events.recv().await.map(Ok),
            },
        }
    }

    /// Stop the subscription. Idempotent; safe to call after the
    /// server has already completed it.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Consume the handle as an event stream.
    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<SubscriptionEvent> {
        ReceiverStream::new(self.events)
    }
}

struct SubEntry {
    events: mpsc::Sender<SubscriptionEvent>,
    errors: mpsc::Sender<ClientError>,
    token: CancellationToken,
}

/// Multiplexes GraphQL subscriptions over one WebSocket connection.
pub struct SubscriptionEngine {
    writer: mpsc::Sender<Message>,
    subs: SubMap,
    root: CancellationToken,
}

impl SubscriptionEngine {
    /// Connect, authenticate and wait for the server's acknowledgement.
    ///
    /// The auth scheme is carried in the `connection_init` payload as a
    /// headers map, mirroring what the HTTP transport sends.
    ///
    /// # Errors
    /// `Unreachable` when the connection cannot be established and
    /// `Timeout` when the server does not acknowledge within the
    /// configured timeout.
    pub async fn connect(config: &Config, scheme: &AuthScheme) -> Result<Self, ClientError> {
        config.validate()?;

        let mut request = config
            .ws_url()
            .into_client_request()
            .map_err(|err| ClientError::InvalidInput(format!("websocket url: {err}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let connector = if config.skip_tls_verify {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|err| ClientError::InvalidInput(format!("tls connector: {err}")))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (socket, _response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|err| ClientError::Unreachable(format!("websocket connect: {err}")))?;
        let (mut sink, mut stream) = socket.split();

        let (header, value) = scheme.header();
        let init = ClientFrame::ConnectionInit {
            payload: Some(json!({"headers": {header: value}})),
        };
        send_frame(&mut sink, &init).await?;
        tokio::time::timeout(config.timeout, wait_for_ack(&mut sink, &mut stream))
            .await
            .map_err(|_| {
                ClientError::Timeout("websocket: no connection_ack from server".to_string())
            })??;

        let subs: SubMap = Arc::new(Mutex::new(HashMap::new()));
        let root = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_BUFFER);

        tokio::spawn(write_loop(sink, writer_rx, root.clone()));
        tokio::spawn(read_loop(
            stream,
            Arc::clone(&subs),
            writer_tx.clone(),
            root.clone(),
        ));

        Ok(Self {
            writer: writer_tx,
            subs,
            root,
        })
    }

    /// Register a new subscription.
    ///
    /// # Errors
    /// Returns `Cancelled` once the engine has been shut down or has
    /// lost its connection.
    pub async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription, ClientError> {
        if self.root.is_cancelled() {
            return Err(Self::shut_down());
        }

        let id = Uuid::new_v4().to_string();
        let buffer = if spec.buffer == 0 {
            DEFAULT_EVENT_BUFFER
        } else {
            spec.buffer
        };
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);
        let token = self.root.child_token();

        self.subs.lock().await.insert(
            id.clone(),
            SubEntry {
                events: events_tx,
                errors: errors_tx,
                token: token.clone(),
            },
        );

        let frame = ClientFrame::Subscribe {
            id: id.clone(),
            payload: GraphqlRequest {
                query: spec.query,
                operation_name: spec.operation_name,
                variables: spec.variables,
            },
        };
        if self.send(&frame).await.is_err() {
            self.subs.lock().await.remove(&id);
            return Err(Self::shut_down());
        }
        tracing::debug!(subscription_id = %id, "subscription registered");

        // Deregister on close. Whichever side cancels first, only the
        // party that actually removes the entry notifies the server.
        let subs = Arc::clone(&self.subs);
        let writer = self.writer.clone();
        let watch_token = token.clone();
        let watch_id = id.clone();
        tokio::spawn(async move {
            watch_token.cancelled().await;
            let removed = subs.lock().await.remove(&watch_id).is_some();
            if removed {
                if let Some(msg) = encode(&ClientFrame::Complete { id: watch_id }) {
                    let _ = writer.send(msg).await;
                }
            }
        });

        Ok(Subscription {
            id,
            events: events_rx,
            errors: errors_rx,
            token,
        })
    }

    /// Close the connection and end every subscription. Idempotent.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    async fn send(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        let msg = encode(frame).ok_or_else(Self::shut_down)?;
        self.writer.send(msg).await.map_err(|_| Self::shut_down())
    }

    fn shut_down() -> ClientError {
        ClientError::Cancelled("subscription engine is shut down".to_string())
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<(), ClientError> {
    let msg = encode(frame)
        .ok_or_else(|| ClientError::InvalidInput("unencodable client frame".to_string()))?;
    sink.send(msg)
        .await
        .map_err(|err| ClientError::Unreachable(format!("websocket send: {err}")))
}

/// Read frames until the server acknowledges the protocol session.
async fn wait_for_ack(sink: &mut WsSink, stream: &mut SplitStream<WsStream>) -> Result<(), ClientError> {
    loop {
        let message = stream.next().await.ok_or_else(|| {
            ClientError::Unreachable("websocket closed during handshake".to_string())
        })?;
        let message = message
            .map_err(|err| ClientError::Unreachable(format!("websocket handshake: {err}")))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                sink.send(Message::Pong(payload)).await.map_err(|err| {
                    ClientError::Unreachable(format!("websocket handshake: {err}"))
                })?;
                continue;
            }
            _ => continue,
        };
        match serde_json::from_str::<ServerFrame>(&text) {
            Ok(ServerFrame::ConnectionAck { .. }) => return Ok(()),
            Ok(ServerFrame::Ping) => send_frame(sink, &ClientFrame::Pong).await?,
            Ok(_) | Err(_) => {}
        }
    }
}

async fn write_loop(mut sink: WsSink, mut frames: mpsc::Receiver<Message>, root: CancellationToken) {
    loop {
        tokio::select! {
            () = root.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = frames.recv() => {
                let Some(msg) = msg else { break };
                if let Err(err) = sink.send(msg).await {
                    tracing::warn!("websocket write failed: {err}");
                    root.cancel();
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    subs: SubMap,
    writer: mpsc::Sender<Message>,
    root: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = root.cancelled() => break,
            message = stream.next() => message,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(payload))) => {
                let _ = writer.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => {
                fail_all(&subs, &root, "server closed the connection").await;
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                fail_all(&subs, &root, &format!("websocket read failed: {err}")).await;
                break;
            }
        };
        let frame = match serde_json::from_str::<ServerFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("unparseable server frame: {err}");
                continue;
            }
        };
        match frame {
            ServerFrame::Next { id, payload } => deliver(&subs, &id, payload).await,
            ServerFrame::Error { id, payload } => {
                let entry = subs.lock().await.remove(&id);
                if let Some(entry) = entry {
                    let message = payload
                        .first()
                        .map_or("subscription failed", |err| err.message.as_str());
                    let _ = entry.errors.try_send(ClientError::OperationFailed(format!(
                        "subscription {id}: {message}"
                    )));
                    entry.token.cancel();
                }
            }
            ServerFrame::Complete { id } => {
                if let Some(entry) = subs.lock().await.remove(&id) {
                    entry.token.cancel();
                }
            }
            ServerFrame::Ping => {
                if let Some(msg) = encode(&ClientFrame::Pong) {
                    let _ = writer.send(msg).await;
                }
            }
            ServerFrame::Pong | ServerFrame::ConnectionAck { .. } => {}
        }
    }
}

/// Push one execution result to its subscription.
async fn deliver(subs: &SubMap, id: &str, payload: GraphqlResponse) {
    // Clone the endpoints and release the map lock before awaiting.
    // A slow consumer stalls delivery but must never block
    // subscribe/close bookkeeping.
    let Some((events, errors, token)) = ({
        let map = subs.lock().await;
        map.get(id)
            .map(|entry| (entry.events.clone(), entry.errors.clone(), entry.token.clone()))
    }) else {
        return;
    };

    if let Some(err) = payload.first_error() {
        let err =
            ClientError::OperationFailed(format!("subscription {id}: {}", err.message));
        if errors.try_send(err).is_err() {
            tracing::debug!(subscription_id = %id, "error channel full, dropping");
        }
    }
    let Some(data) = payload.data else { return };

    let event = SubscriptionEvent {
        subscription_id: id.to_string(),
        data,
        received_at: now(),
    };
    tokio::select! {
        () = token.cancelled() => {}
        result = events.send(event) => {
            // Receiver dropped without closing; treat as a close.
            if result.is_err() {
                token.cancel();
            }
        }
    }
}

/// Fan a fatal connection error to every subscription and stop.
async fn fail_all(subs: &SubMap, root: &CancellationToken, reason: &str) {
    tracing::warn!("subscription connection lost: {reason}");
    let mut map = subs.lock().await;
    for (id, entry) in map.drain() {
        let _ = entry
            .errors
            .try_send(ClientError::Unreachable(format!("subscription {id}: {reason}")));
        entry.token.cancel();
    }
    root.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = SubscriptionSpec::new("subscription { task { id } }");
        assert!(spec.operation_name.is_none());
        assert!(spec.variables.is_empty());
        assert_eq!(spec.buffer, 0);
    }

    #[test]
    fn test_init_payload_carries_auth_header() {
        let (header, value) = AuthScheme::Bearer("jwt".to_string()).header();
        let init = ClientFrame::ConnectionInit {
            payload: Some(json!({"headers": {header: value}})),
        };
        let json = serde_json::to_string(&init).unwrap();
        assert!(json.contains("connection_init"));
        assert!(json.contains("Bearer jwt"));
    }
}
