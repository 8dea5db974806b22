//! Transport adapter
//!
//! A [`Transport`] opens one physical connection and hands back a [`Link`]:
//! an outbound frame queue plus a stream of [`TransportEvent`]s. The link
//! carries no protocol knowledge; a successful `open` is the "opened" event,
//! and everything after it is observed through the event stream.

mod memory;
mod websocket;

pub use memory::{MemoryAcceptor, MemoryPeer, MemoryTransport, OpenBehavior};
pub use websocket::WebSocketTransport;

use crate::error::{Result, SwitchboardError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Capacity of the per-link frame queues
pub(crate) const LINK_BUFFER: usize = 256;

/// Something that can open a connection to a Switchboard endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection; resolves once it is usable
    async fn open(&self, url: &str) -> Result<Link>;
}

/// Frames going out through a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// Events emitted by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A raw inbound frame
    Frame(String),
    /// The connection closed, with the peer's reason if any
    Closed(Option<String>),
    /// The connection failed
    Error(String),
}

/// One open physical connection
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Receiver<TransportEvent>,
}

impl Link {
    /// Assemble a link from its two queues (for custom transports)
    pub fn new(outbound: mpsc::Sender<Outbound>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self { outbound, events }
    }

    /// Queue a frame for sending
    pub async fn send(&self, frame: String) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| SwitchboardError::Transport("link is not open".to_string()))
    }

    /// Ask the transport to close the connection
    pub async fn close(&self) {
        let _ = self.outbound.send(Outbound::Close).await;
    }

    /// Next event; a vanished transport reads as a close
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(None))
    }
}
