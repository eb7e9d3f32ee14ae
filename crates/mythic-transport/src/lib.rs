//! Network transports for the Mythic client.
//!
//! Provides:
//! - `HttpTransport` - login, token refresh and GraphQL execution over
//!   HTTPS via `reqwest`
//! - `SubscriptionEngine` - GraphQL subscriptions over a single
//!   `graphql-transport-ws` WebSocket connection

pub mod http;
pub mod protocol;
pub mod websocket;

pub use http::HttpTransport;
pub use websocket::{Subscription, SubscriptionEngine, SubscriptionEvent, SubscriptionSpec};
