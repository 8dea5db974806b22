//! Loopback broker
//!
//! Serves the Switchboard envelope protocol over WebSocket: session
//! handshakes against a key ring, per-session subscriptions and message
//! fan-out.

mod router;
mod sessions;
pub mod websocket;

pub use router::{Routed, TopicRouter};
pub use sessions::{SessionRecord, SessionRegistry};
pub use websocket::{create_router, WsState};

use crate::auth::KeyRing;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// How long a detached session stays resumable
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// The broker: an axum app serving `/ws` and `/health`
#[derive(Clone)]
pub struct Broker {
    state: WsState,
    session_ttl: Duration,
}

impl Broker {
    pub fn new(key_ring: KeyRing) -> Self {
        Self {
            state: WsState::new(key_ring),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Keep detached sessions resumable for `ttl` before forgetting them
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Session registry, for inspection
    pub fn sessions(&self) -> &SessionRegistry {
        &self.state.sessions
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Serve on an already bound listener until the server fails
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, session_ttl = ?self.session_ttl, "Broker listening");

        let reaper = tokio::spawn(reap_sessions(self.state.sessions.clone(), self.session_ttl));
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        reaper.abort();
        served?;

        info!(addr = %addr, "Broker stopped");
        Ok(())
    }
}

/// Periodically drop sessions detached for longer than `ttl`
async fn reap_sessions(sessions: SessionRegistry, ttl: Duration) {
    let mut interval = tokio::time::interval(ttl.clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL));
    loop {
        interval.tick().await;
        let reaped = sessions.reap_detached(ttl);
        if reaped > 0 {
            debug!(
                reaped,
                sessions = sessions.count(),
                attached = sessions.attached_count(),
                "Reaped detached sessions"
            );
        }
    }
}

/// Bind `bind_addr` and run a broker until the server fails
pub async fn run_broker(bind_addr: SocketAddr, key_ring: KeyRing) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    Broker::new(key_ring).serve(listener).await
}
