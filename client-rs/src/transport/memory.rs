//! In-process transport
//!
//! Every `open` creates a fresh pair of queues; the client half becomes the
//! [`Link`], the server half is delivered to the [`MemoryAcceptor`] as a
//! [`MemoryPeer`]. Useful for driving a client without a network.

use super::{Link, Outbound, Transport, TransportEvent, LINK_BUFFER};
use crate::error::{Result, SwitchboardError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How the next `open` calls behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Hand a new peer to the acceptor
    Accept,
    /// Fail immediately with a transport error
    Refuse,
    /// Never complete (exercises the connect timeout)
    Stall,
}

/// Client side factory of in-memory links
#[derive(Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    behavior: Arc<Mutex<OpenBehavior>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

/// Receives the server side of every link opened through the paired transport
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory link
pub struct MemoryPeer {
    inbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                behavior: Arc::new(Mutex::new(OpenBehavior::Accept)),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            MemoryAcceptor { peers: rx },
        )
    }

    /// Change how subsequent opens behave
    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// When each `open` call so far started, refused ones included
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _url: &str) -> Result<Link> {
        self.attempts.lock().push(Instant::now());
        let behavior = *self.behavior.lock();
        match behavior {
            OpenBehavior::Accept => {}
            OpenBehavior::Refuse => {
                return Err(SwitchboardError::Transport("connection refused".to_string()))
            }
            OpenBehavior::Stall => std::future::pending::<()>().await,
        }

        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (ev_tx, ev_rx) = mpsc::channel(LINK_BUFFER);

        self.peers
            .send(MemoryPeer {
                inbound: out_rx,
                events: ev_tx,
            })
            .map_err(|_| SwitchboardError::Transport("acceptor dropped".to_string()))?;

        Ok(Link::new(out_tx, ev_rx))
    }
}

impl MemoryAcceptor {
    /// Wait for the next opened link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

impl MemoryPeer {
    /// Next frame from the client; `None` once the client closed or went away
    pub async fn recv(&mut self) -> Option<String> {
        match self.inbound.recv().await {
            Some(Outbound::Frame(frame)) => Some(frame),
            Some(Outbound::Close) | None => None,
        }
    }

    /// Send a frame to the client
    pub async fn send(&self, frame: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Frame(frame.into()))
            .await
            .is_ok()
    }

    /// Close the link from the server side
    pub async fn close(self, reason: Option<&str>) {
        let _ = self
            .events
            .send(TransportEvent::Closed(reason.map(str::to_string)))
            .await;
    }

    /// Fail the link as a network error would
    pub async fn fail(self, error: &str) {
        let _ = self.events.send(TransportEvent::Error(error.to_string())).await;
    }
}
