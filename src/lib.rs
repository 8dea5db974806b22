//! Switchboard - loopback broker for the Switchboard pub/sub protocol
//!
//! A small WebSocket server speaking the same envelope protocol as the hosted
//! service, for local development and end-to-end tests of
//! `switchboard-client`.

pub mod auth;
pub mod channels;
pub mod server;

pub use auth::{AuthError, KeyRing, Principal};
pub use channels::{Channel, ChannelError};
pub use server::{run_broker, Broker, DEFAULT_SESSION_TTL};
