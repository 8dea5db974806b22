//! Scripted in-memory server for driving the client end to end

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use switchboard_client::auth::Claims;
use switchboard_client::{
    Action, Envelope, MemoryAcceptor, MemoryPeer, MemoryTransport, MessageRecord,
    SwitchboardClient, SwitchboardConfig,
};
use tokio::sync::mpsc;

pub const KEY: &str = "A-abc123-secret";

/// How the fake server misbehaves
#[derive(Default)]
pub struct Script {
    /// Answer every handshake with 401
    pub reject_auth: bool,
    /// Never reply to these actions
    pub silent: HashSet<Action>,
    /// Send every reply twice
    pub duplicate_replies: bool,
    /// Answer every session-resume with this failure code
    pub resume_rejection: Option<u16>,
    /// Apply these actions but keep their replies until `release`
    pub held: HashSet<Action>,
}

enum Outbox {
    Frame(String),
    Close(String),
}

struct Conn {
    id: usize,
    outbox: mpsc::UnboundedSender<Outbox>,
    uuid: Option<String>,
    channels: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    script: Script,
    connections: Vec<Conn>,
    accepted: usize,
    received: Vec<Envelope>,
    issued: Vec<String>,
    next_message: u64,
    held_replies: Vec<(usize, String)>,
}

/// Minimal server speaking the envelope protocol over `MemoryTransport`
///
/// Channels starting with `forbidden` are rejected with 403 on subscribe
/// and publish. Each connection starts with no subscriptions.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl FakeServer {
    pub fn start(mut acceptor: MemoryAcceptor, script: Script) -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(State {
                script,
                ..Default::default()
            })),
        };

        let accepting = server.clone();
        tokio::spawn(async move {
            while let Some(peer) = acceptor.accept().await {
                let conn = accepting.clone();
                tokio::spawn(async move { conn.serve(peer).await });
            }
        });

        server
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Every frame received with this action, in arrival order
    pub fn received(&self, action: Action) -> Vec<Envelope> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn silence(&self, action: Action) {
        self.state.lock().script.silent.insert(action);
    }

    pub fn unsilence(&self, action: Action) {
        self.state.lock().script.silent.remove(&action);
    }

    /// Keep replies to `action` back until `release`
    pub fn hold(&self, action: Action) {
        self.state.lock().script.held.insert(action);
    }

    /// Send every held reply still deliverable and stop holding `action`
    pub fn release(&self, action: Action) {
        let mut state = self.state.lock();
        state.script.held.remove(&action);
        for (id, frame) in std::mem::take(&mut state.held_replies) {
            if let Some(conn) = state.connections.iter().find(|c| c.id == id) {
                let _ = conn.outbox.send(Outbox::Frame(frame));
            }
        }
    }

    /// Send an unsolicited frame on every open connection
    pub fn push(&self, envelope: &Envelope) {
        let frame = envelope.encode().unwrap();
        for conn in &self.state.lock().connections {
            let _ = conn.outbox.send(Outbox::Frame(frame.clone()));
        }
    }

    /// Close every open connection from the server side
    pub fn kill_all(&self, reason: &str) {
        for conn in &self.state.lock().connections {
            let _ = conn.outbox.send(Outbox::Close(reason.to_string()));
        }
    }

    async fn serve(self, mut peer: MemoryPeer) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            state.accepted += 1;
            let id = state.accepted;
            state.connections.push(Conn {
                id,
                outbox: tx,
                uuid: None,
                channels: BTreeSet::new(),
            });
            id
        };

        loop {
            tokio::select! {
                frame = peer.recv() => match frame {
                    Some(frame) => self.handle(id, &frame),
                    None => break,
                },
                out = rx.recv() => match out {
                    Some(Outbox::Frame(frame)) => {
                        if !peer.send(frame).await {
                            break;
                        }
                    }
                    Some(Outbox::Close(reason)) => {
                        self.detach(id);
                        peer.close(Some(&reason)).await;
                        return;
                    }
                    None => break,
                },
            }
        }
        self.detach(id);
    }

    fn detach(&self, id: usize) {
        self.state.lock().connections.retain(|c| c.id != id);
    }

    fn handle(&self, id: usize, frame: &str) {
        let envelope = Envelope::decode(frame).unwrap();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.received.push(envelope.clone());
        if state.script.silent.contains(&envelope.action) {
            return;
        }

        let Some(index) = state.connections.iter().position(|c| c.id == id) else {
            return;
        };
        let channel = envelope
            .payload
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let forbidden = channel.starts_with("forbidden");

        let reply = match envelope.action {
            Action::SessionResume if state.script.resume_rejection.is_some() => {
                let code = state.script.resume_rejection.unwrap_or(404);
                Some(json!({"code": code, "details": "unknown session"}))
            }
            Action::SessionCreate | Action::SessionResume => {
                if state.script.reject_auth {
                    Some(json!({"code": 401, "details": "signature mismatch"}))
                } else {
                    let auth = envelope.payload["auth"].as_str().unwrap_or_default();
                    let claims = Claims::decode(auth).unwrap();
                    let (uuid, resumed) = match claims.uuid {
                        Some(uuid) if state.issued.contains(&uuid) => (uuid, true),
                        _ => {
                            let uuid = format!("session-{}", state.issued.len() + 1);
                            state.issued.push(uuid.clone());
                            (uuid, false)
                        }
                    };
                    state.connections[index].uuid = Some(uuid.clone());
                    Some(json!({"code": 200, "uuid": uuid, "resumed": resumed}))
                }
            }
            Action::Subscribe if forbidden => {
                Some(json!({"code": 403, "details": "read permission required"}))
            }
            Action::Subscribe => {
                let conn = &mut state.connections[index];
                conn.channels.insert(channel);
                Some(json!({"code": 200, "channels": conn.channels}))
            }
            Action::Unsubscribe => {
                let conn = &mut state.connections[index];
                conn.channels.remove(&channel);
                Some(json!({"code": 200, "channels": conn.channels}))
            }
            Action::UnsubscribeAll => {
                let dropped = std::mem::take(&mut state.connections[index].channels);
                Some(json!({"code": 200, "channels": dropped}))
            }
            Action::ListSubscriptions => {
                Some(json!({"code": 200, "channels": state.connections[index].channels}))
            }
            Action::SessionUuid => {
                Some(json!({"code": 200, "uuid": state.connections[index].uuid}))
            }
            Action::Publish | Action::PublishAck if forbidden => {
                let rejection = json!({
                    "code": 403,
                    "details": "write permission required",
                    "action": envelope.action.as_str(),
                    "sequence": envelope.seq,
                });
                if envelope.action == Action::Publish {
                    let error = Envelope::event(Action::Error, rejection);
                    let _ = state.connections[index]
                        .outbox
                        .send(Outbox::Frame(error.encode().unwrap()));
                    None
                } else {
                    Some(rejection)
                }
            }
            Action::Publish | Action::PublishAck => {
                state.next_message += 1;
                let message_id = format!("msg-{}", state.next_message);
                let delivery = Envelope::event(
                    Action::Message,
                    json!({
                        "id": message_id,
                        "channel": channel,
                        "message": envelope.payload["message"],
                        "time": "1700000000000",
                    }),
                );
                let frame = delivery.encode().unwrap();
                for conn in &state.connections {
                    if conn.channels.contains(&channel) {
                        let _ = conn.outbox.send(Outbox::Frame(frame.clone()));
                    }
                }
                (envelope.action == Action::PublishAck)
                    .then(|| json!({"code": 200, "id": message_id}))
            }
            _ => None,
        };

        if let Some(payload) = reply {
            let response = Envelope {
                action: envelope.action,
                seq: envelope.seq,
                payload,
            };
            let frame = response.encode().unwrap();
            if state.script.held.contains(&envelope.action) {
                state.held_replies.push((id, frame));
                return;
            }
            let copies = if state.script.duplicate_replies { 2 } else { 1 };
            for _ in 0..copies {
                let _ = state.connections[index]
                    .outbox
                    .send(Outbox::Frame(frame.clone()));
            }
        }
    }
}

/// Test configuration with short timeouts
pub fn config() -> SwitchboardConfig {
    SwitchboardConfig::new("ws://memory/ws", [KEY])
        .connect_timeout(Duration::from_secs(1))
        .request_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(10), Duration::from_millis(50))
}

/// A fake server plus a client wired to it (not yet connected)
pub fn setup_with(
    script: Script,
    configure: impl FnOnce(SwitchboardConfig) -> SwitchboardConfig,
) -> (SwitchboardClient, FakeServer, MemoryTransport) {
    let (transport, acceptor) = MemoryTransport::new();
    let server = FakeServer::start(acceptor, script);
    let client = SwitchboardClient::with_transport(configure(config()), transport.clone());
    (client, server, transport)
}

/// A connected client against a well-behaved fake server
pub async fn connected() -> (SwitchboardClient, FakeServer, MemoryTransport) {
    let (client, server, transport) = setup_with(Script::default(), |c| c);
    client.connect().await.unwrap();
    (client, server, transport)
}

/// Handler that forwards every delivered record to a channel
pub fn recorder() -> (
    impl Fn(MessageRecord) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<MessageRecord>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |record: MessageRecord| {
        let _ = tx.send(record);
    };
    (handler, rx)
}

/// Wait for the next delivered record
pub async fn next_record(rx: &mut mpsc::UnboundedReceiver<MessageRecord>) -> MessageRecord {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("handler dropped")
}

/// Poll `condition` until it holds
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
