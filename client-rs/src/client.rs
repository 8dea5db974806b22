//! Switchboard client implementation

use crate::config::SwitchboardConfig;
use crate::dispatcher::{ErrorHandler, MessageHandler};
use crate::error::{Result, SwitchboardError};
use crate::messages::MessageRecord;
use crate::session::{self, Command, Reply, Request, Shared};
use crate::state::SessionState;
use crate::transport::{Transport, WebSocketTransport};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Options for [`SwitchboardClient::drop_connection`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOptions {
    /// Wait this long before reconnecting instead of the backoff delay
    pub reconnect_delay: Option<Duration>,
}

/// Internal client state
struct ClientInner {
    config: SwitchboardConfig,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<SessionState>,

    // Command queue of the session actor, once spawned
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

/// Switchboard pub/sub client
///
/// Multiplexes publishing, subscriptions and acknowledged requests over one
/// logical connection that reconnects and replays subscriptions on its own.
/// This struct is cheaply cloneable as it uses an internal Arc.
#[derive(Clone)]
pub struct SwitchboardClient {
    inner: Arc<ClientInner>,
}

impl SwitchboardClient {
    /// Create a client that connects over WebSocket
    pub fn new(config: SwitchboardConfig) -> Self {
        Self::with_transport(config, WebSocketTransport::new())
    }

    /// Create a client over a custom transport
    pub fn with_transport<T: Transport>(config: SwitchboardConfig, transport: T) -> Self {
        let shared = Arc::new(Shared::new());
        let state_rx = shared.state.subscribe();

        let inner = Arc::new(ClientInner {
            config,
            transport: Arc::new(transport),
            shared,
            state_rx,
            commands: Mutex::new(None),
        });

        Self { inner }
    }

    /// Get the current session state
    pub fn connection_state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    /// Get a receiver for session state changes
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    /// Session identifier from the last completed handshake
    pub fn current_session_uuid(&self) -> Option<String> {
        self.inner.shared.session_uuid.lock().clone()
    }

    /// Set the handler for errors no caller is waiting on
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(SwitchboardError) + Send + Sync + 'static,
    {
        *self.inner.shared.hooks.on_error.lock() = Some(Arc::new(handler));
    }

    /// Set the handler called with the session uuid whenever the session becomes ready
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.inner.shared.hooks.on_connect.lock() = Some(Arc::new(handler));
    }

    /// Set the handler called whenever a ready connection goes away
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        *self.inner.shared.hooks.on_disconnect.lock() = Some(Arc::new(handler));
    }

    /// Connect and complete the session handshake
    ///
    /// Configuration and key problems are reported before anything touches
    /// the network. If the first attempt fails and auto-reconnect is enabled,
    /// the error is returned while retries continue in the background.
    pub async fn connect(&self) -> Result<()> {
        let credentials = self.inner.config.validate()?;

        let sender = {
            let mut commands = self.inner.commands.lock();
            match commands.as_ref() {
                Some(sender) => sender.clone(),
                None => {
                    if self.connection_state().is_closed() {
                        return Err(SwitchboardError::Shutdown);
                    }
                    debug!(url = %self.inner.config.url, "Starting session");
                    let sender = session::spawn(
                        self.inner.config.clone(),
                        credentials,
                        self.inner.transport.clone(),
                        self.inner.shared.clone(),
                    );
                    *commands = Some(sender.clone());
                    sender
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        sender
            .send(Command::Connect { reply: tx })
            .map_err(|_| SwitchboardError::Shutdown)?;
        rx.await.map_err(|_| SwitchboardError::Shutdown)?
    }

    /// Publish without waiting for the server
    ///
    /// Resolves with the sequence number of the sent frame once it is handed
    /// to the transport. A rejection the server reports later goes to the
    /// global error handler.
    pub async fn publish(&self, channel: &str, message: impl Into<String>) -> Result<u64> {
        self.send_publish(channel, message.into(), None).await
    }

    /// Publish without waiting for the server, routing a later rejection to `on_error`
    pub async fn publish_with_error_handler<F>(
        &self,
        channel: &str,
        message: impl Into<String>,
        on_error: F,
    ) -> Result<u64>
    where
        F: Fn(SwitchboardError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(on_error);
        self.send_publish(channel, message.into(), Some(handler)).await
    }

    async fn send_publish(
        &self,
        channel: &str,
        message: String,
        on_error: Option<ErrorHandler>,
    ) -> Result<u64> {
        let channel = channel.to_string();
        self.request(|reply| Request::Publish {
            channel,
            message,
            on_error,
            reply,
        })
        .await
    }

    /// Publish and wait for the server to accept the message; returns its id
    pub async fn publish_with_ack(&self, channel: &str, message: impl Into<String>) -> Result<String> {
        let channel = channel.to_string();
        let message = message.into();
        self.request(|reply| Request::PublishAck {
            channel,
            message,
            reply,
        })
        .await
    }

    /// Subscribe to a channel
    ///
    /// The handler is registered before the request is sent and removed again
    /// if the server refuses. Subscribing again replaces the handler.
    /// Returns the channels the session is subscribed to.
    pub async fn subscribe<F>(&self, channel: &str, handler: F) -> Result<Vec<String>>
    where
        F: Fn(MessageRecord) + Send + Sync + 'static,
    {
        let channel = channel.to_string();
        let handler: MessageHandler = Arc::new(handler);
        self.request(|reply| Request::Subscribe {
            channel,
            handler,
            reply,
        })
        .await
    }

    /// Unsubscribe from a channel; returns the remaining channels
    pub async fn unsubscribe(&self, channel: &str) -> Result<Vec<String>> {
        let channel = channel.to_string();
        self.request(|reply| Request::Unsubscribe { channel, reply })
            .await
    }

    /// Drop every subscription; returns the channels that were dropped
    pub async fn unsubscribe_all(&self) -> Result<Vec<String>> {
        self.request(|reply| Request::UnsubscribeAll { reply }).await
    }

    /// Channels the server has this session subscribed to
    pub async fn list_subscriptions(&self) -> Result<Vec<String>> {
        self.request(|reply| Request::ListSubscriptions { reply })
            .await
    }

    /// Ask the server for the session identifier, waiting for the handshake if needed
    pub async fn session_uuid(&self) -> Result<String> {
        self.request(|reply| Request::SessionUuid { reply }).await
    }

    /// Force the connection down as if the network failed
    ///
    /// The session goes through its normal reconnect path, optionally using
    /// `options.reconnect_delay` in place of the backoff delay.
    pub async fn drop_connection(&self, options: DropOptions) -> Result<()> {
        self.sender()?
            .send(Command::DropConnection {
                reconnect_delay: options.reconnect_delay,
            })
            .map_err(|_| SwitchboardError::Shutdown)
    }

    /// Close the session for good
    ///
    /// Every outstanding request fails with `ConnectionClosed` and no further
    /// reconnection is attempted.
    pub async fn close(&self) -> Result<()> {
        let sender = self.inner.commands.lock().take();
        match sender {
            Some(sender) => {
                let (tx, rx) = oneshot::channel();
                if sender.send(Command::Close { reply: tx }).is_ok() {
                    let _ = rx.await;
                }
            }
            None => {
                self.inner.shared.state.send_replace(SessionState::Closed);
            }
        }
        Ok(())
    }

    /// Alias of [`close`](Self::close)
    pub async fn disconnect(&self) -> Result<()> {
        self.close().await
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<Command>> {
        match self.inner.commands.lock().as_ref() {
            Some(sender) => Ok(sender.clone()),
            None if self.connection_state().is_closed() => Err(SwitchboardError::Shutdown),
            None => Err(SwitchboardError::NotConnected),
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let sender = self.sender()?;
        let (tx, rx) = oneshot::channel();
        sender
            .send(Command::Request(build(tx)))
            .map_err(|_| SwitchboardError::Shutdown)?;
        rx.await.map_err(|_| SwitchboardError::Shutdown)?
    }
}
