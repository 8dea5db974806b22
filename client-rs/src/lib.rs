//! Switchboard Rust Client
//!
//! A client for the Switchboard pub/sub service: publish to named channels,
//! subscribe to them and get acknowledgments, all multiplexed over one
//! connection that reconnects on its own and replays subscriptions after
//! every reconnect.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_client::{SwitchboardClient, SwitchboardConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SwitchboardConfig::new("ws://localhost:8080/ws", ["A-abc123-secret"]);
//!     let client = SwitchboardClient::new(config);
//!
//!     client.on_error(|err| eprintln!("async error: {}", err));
//!     client.connect().await?;
//!
//!     // Subscribe to messages
//!     client.subscribe("orders.created", |record| {
//!         println!("Received on {}: {}", record.channel, record.message);
//!     }).await?;
//!
//!     // Fire-oriented publish
//!     client.publish("orders.created", "order 17").await?;
//!
//!     // Acknowledged publish
//!     let id = client.publish_with_ack("orders.created", "order 18").await?;
//!     println!("accepted as {}", id);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
mod backoff;
mod client;
mod config;
mod correlator;
mod dispatcher;
mod error;
pub mod messages;
mod session;
mod state;
pub mod transport;

pub use client::{DropOptions, SwitchboardClient};
pub use config::SwitchboardConfig;
pub use dispatcher::{ConnectHandler, DisconnectHandler, ErrorHandler, MessageHandler};
pub use error::{ErrorResponse, Result, SwitchboardError};
pub use messages::{Action, Envelope, MessageRecord};
pub use state::SessionState;
pub use transport::{
    Link, MemoryAcceptor, MemoryPeer, MemoryTransport, OpenBehavior, Outbound, Transport,
    TransportEvent, WebSocketTransport,
};
