//! Session orchestration for the Mythic client.
//!
//! Provides:
//! - `SessionManager` - the single authority for authentication state

pub mod manager;

pub use manager::SessionManager;
