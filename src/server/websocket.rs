//! WebSocket endpoint speaking the envelope protocol

use crate::auth::{AuthError, KeyRing};
use crate::channels::Channel;
use crate::server::router::TopicRouter;
use crate::server::sessions::{SessionRecord, SessionRegistry};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_client::auth::{unix_millis, SignedHandshake};
use switchboard_client::messages::{ChannelRequest, PublishRequest};
use switchboard_client::{Action, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames queued per connection before fan-out starts dropping
const OUTBOUND_CAPACITY: usize = 256;

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub sessions: SessionRegistry,
    pub router: TopicRouter,
    pub key_ring: Arc<KeyRing>,
}

impl WsState {
    pub fn new(key_ring: KeyRing) -> Self {
        let sessions = SessionRegistry::new();
        Self {
            router: TopicRouter::new(sessions.clone()),
            sessions,
            key_ring: Arc::new(key_ring),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// A request the broker refuses
struct Rejection {
    code: u16,
    details: String,
}

impl Rejection {
    fn new(code: u16, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }
}

impl From<AuthError> for Rejection {
    fn from(e: AuthError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// Per-socket protocol state
struct Connection {
    id: Uuid,
    tx: mpsc::Sender<String>,
    session: Option<Arc<SessionRecord>>,
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let mut conn = Connection {
        id: Uuid::new_v4(),
        tx,
        session: None,
    };
    debug!(conn_id = %conn.id, "WebSocket client connected");

    // Forward replies and deliveries to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = receiver.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "WebSocket error");
                break;
            }
        };

        let reply = match Envelope::decode(&text) {
            Ok(envelope) => handle_envelope(envelope, &mut conn, &state),
            Err(e) => {
                debug!(conn_id = %conn.id, error = %e, "Malformed frame");
                Some(Envelope::event(
                    Action::Error,
                    json!({"code": 400, "details": format!("malformed frame: {}", e)}),
                ))
            }
        };

        if let Some(reply) = reply {
            match serde_json::to_string(&reply) {
                Ok(frame) => {
                    if conn.tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(conn_id = %conn.id, error = %e, "Failed to encode reply"),
            }
        }
    }

    if let Some(session) = &conn.session {
        state.sessions.detach(session, conn.id);
        info!(conn_id = %conn.id, session = %session.uuid, "Session detached");
    } else {
        debug!(conn_id = %conn.id, "WebSocket client disconnected");
    }
    send_task.abort();
}

/// Handle one inbound envelope; returns the frame to send back, if any
fn handle_envelope(envelope: Envelope, conn: &mut Connection, state: &WsState) -> Option<Envelope> {
    let action = envelope.action;
    let seq = envelope.seq;

    let outcome = match action {
        Action::SessionCreate | Action::SessionResume => handshake(&envelope, conn, state),
        Action::Message | Action::Error | Action::Unknown => {
            Err(Rejection::new(400, format!("unsupported action '{}'", action)))
        }
        _ => match conn.session.clone() {
            None => Err(Rejection::new(401, "handshake required")),
            Some(session) => request(&envelope, &session, state),
        },
    };

    match outcome {
        Ok(Some(payload)) => Some(Envelope {
            action,
            seq,
            payload,
        }),
        Ok(None) => None,
        Err(rejection) => {
            debug!(
                conn_id = %conn.id,
                action = %action,
                seq = ?seq,
                code = rejection.code,
                details = %rejection.details,
                "Request rejected"
            );
            Some(reject(action, seq, rejection))
        }
    }
}

/// Failure frame: a correlated reply, or an `error` event for fire-oriented publishes
fn reject(action: Action, seq: Option<u64>, rejection: Rejection) -> Envelope {
    match (action, seq) {
        (Action::Publish, _) | (_, None) => Envelope::event(
            Action::Error,
            json!({
                "code": rejection.code,
                "details": rejection.details,
                "action": action.as_str(),
                "sequence": seq,
            }),
        ),
        (_, Some(seq)) => Envelope::request(
            action,
            seq,
            json!({"code": rejection.code, "details": rejection.details}),
        ),
    }
}

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, Rejection> {
    envelope
        .payload_as()
        .map_err(|e| Rejection::new(400, format!("invalid payload: {}", e)))
}

fn channel(name: &str) -> Result<Channel, Rejection> {
    Channel::parse(name).map_err(|e| Rejection::new(400, e.to_string()))
}

fn handshake(
    envelope: &Envelope,
    conn: &mut Connection,
    state: &WsState,
) -> Result<Option<Value>, Rejection> {
    if conn.session.is_some() {
        return Err(Rejection::new(400, "session already established"));
    }

    let signed: SignedHandshake = payload(envelope)?;
    let (principal, resume) = state.key_ring.verify(&signed, unix_millis()).map_err(|e| {
        warn!(conn_id = %conn.id, error = %e, "Handshake rejected");
        Rejection::from(e)
    })?;

    let (session, resumed) =
        state
            .sessions
            .attach(principal, resume.as_deref(), conn.id, conn.tx.clone());
    info!(
        conn_id = %conn.id,
        session = %session.uuid,
        identity = %session.principal.identity,
        resumed,
        "Session attached"
    );

    let reply = json!({"code": 200, "uuid": session.uuid, "resumed": resumed});
    conn.session = Some(session);
    Ok(Some(reply))
}

fn request(
    envelope: &Envelope,
    session: &SessionRecord,
    state: &WsState,
) -> Result<Option<Value>, Rejection> {
    match envelope.action {
        Action::Publish | Action::PublishAck => {
            let request: PublishRequest = payload(envelope)?;
            let channel = channel(&request.channel)?;
            session.principal.can_publish()?;

            let routed = state
                .router
                .route(&channel, &request.message)
                .map_err(|e| Rejection::new(500, e.to_string()))?;
            debug!(
                session = %session.uuid,
                channel = %channel,
                delivered = routed.delivered,
                "Message published"
            );

            Ok((envelope.action == Action::PublishAck)
                .then(|| json!({"code": 200, "id": routed.id})))
        }
        Action::Subscribe => {
            let request: ChannelRequest = payload(envelope)?;
            let channel = channel(&request.channel)?;
            session.principal.can_subscribe()?;
            Ok(Some(json!({"code": 200, "channels": session.subscribe(&channel)})))
        }
        Action::Unsubscribe => {
            let request: ChannelRequest = payload(envelope)?;
            Ok(Some(
                json!({"code": 200, "channels": session.unsubscribe(&request.channel)}),
            ))
        }
        Action::UnsubscribeAll => {
            Ok(Some(json!({"code": 200, "channels": session.unsubscribe_all()})))
        }
        Action::ListSubscriptions => Ok(Some(json!({"code": 200, "channels": session.channels()}))),
        Action::SessionUuid => Ok(Some(json!({"code": 200, "uuid": session.uuid}))),
        other => Err(Rejection::new(400, format!("unsupported action '{}'", other))),
    }
}
