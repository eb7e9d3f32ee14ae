//! Core abstractions for the Mythic GraphQL client.
//!
//! This crate provides the fundamental building blocks:
//! - `Config` - Server endpoint, TLS and credential configuration
//! - `ClientError` - The error taxonomy shared by every crate
//! - `Credentials` / `TokenPair` / `AuthScheme` - Credential store types
//! - GraphQL request/response envelope
//! - `AuthTransport` / `GraphqlTransport` traits (the network seams)

pub mod config;
pub mod credentials;
pub mod error;
pub mod graphql;
pub mod traits;

pub use config::Config;
pub use credentials::{AuthGrant, AuthScheme, Credentials, TokenPair};
pub use error::ClientError;
pub use graphql::{GraphqlError, GraphqlRequest, GraphqlResponse, StatusResponse};
pub use traits::{AuthTransport, GraphqlTransport};
