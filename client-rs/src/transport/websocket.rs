//! WebSocket transport

use super::{Link, Outbound, Transport, TransportEvent, LINK_BUFFER};
use crate::error::{Result, SwitchboardError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

/// Opens links over `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Link> {
        debug!(url = %url, "Opening WebSocket");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SwitchboardError::Transport(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(LINK_BUFFER);
        let (ev_tx, ev_rx) = mpsc::channel::<TransportEvent>(LINK_BUFFER);
        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            let event = loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        match outbound {
                            Some(Outbound::Frame(frame)) => {
                                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                    break TransportEvent::Error(e.to_string());
                                }
                            }
                            Some(Outbound::Close) | None => {
                                let _ = sink.send(Message::Close(None)).await;
                                break TransportEvent::Closed(Some("closed by client".to_string()));
                            }
                        }
                    }

                    inbound = source.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                if ev_tx.send(TransportEvent::Frame(text.as_str().to_string())).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match String::from_utf8(data.to_vec()) {
                                    Ok(text) => {
                                        if ev_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = sink.send(Message::Pong(data)).await {
                                    break TransportEvent::Error(e.to_string());
                                }
                            }
                            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                            Some(Ok(Message::Close(frame))) => {
                                break TransportEvent::Closed(frame.map(|f| f.reason.as_str().to_string()));
                            }
                            Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                            None => break TransportEvent::Closed(None),
                        }
                    }
                }
            };

            debug!(event = ?event, "WebSocket pump finished");
            let _ = ev_tx.send(event).await;
        });

        Ok(Link::new(out_tx, ev_rx))
    }
}
