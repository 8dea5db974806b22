//! Frame types for the Switchboard protocol
//!
//! Every frame is a JSON envelope `{action, seq?, payload}`. A frame carrying
//! `seq` is one half of a correlated request/reply pair; a frame without it
//! is an unsolicited delivery (`message`) or an asynchronous `error`.
//! The loopback broker in the root crate uses these same types.

use crate::error::{ErrorResponse, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol action carried by every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Establish a new session
    SessionCreate,
    /// Resume a previously issued session
    SessionResume,
    /// Fire-oriented publish
    Publish,
    /// Publish acknowledged by the server
    PublishAck,
    Subscribe,
    Unsubscribe,
    UnsubscribeAll,
    ListSubscriptions,
    /// Query the current session identifier
    SessionUuid,
    /// Channel delivery (server to client only)
    Message,
    /// Failure report (server to client only)
    Error,
    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SessionCreate => "session-create",
            Action::SessionResume => "session-resume",
            Action::Publish => "publish",
            Action::PublishAck => "publish-ack",
            Action::Subscribe => "subscribe",
            Action::Unsubscribe => "unsubscribe",
            Action::UnsubscribeAll => "unsubscribe-all",
            Action::ListSubscriptions => "list-subscriptions",
            Action::SessionUuid => "session-uuid",
            Action::Message => "message",
            Action::Error => "error",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

/// The message envelope shared by requests, replies and deliveries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    #[serde(default = "empty_payload")]
    pub payload: Value,
}

impl Envelope {
    /// A correlated frame (request or reply)
    pub fn request(action: Action, seq: u64, payload: Value) -> Self {
        Self {
            action,
            seq: Some(seq),
            payload,
        }
    }

    /// An unsolicited frame
    pub fn event(action: Action, payload: Value) -> Self {
        Self {
            action,
            seq: None,
            payload,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Status code carried in the payload, if any
    pub fn code(&self) -> Option<u16> {
        self.payload
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
    }

    /// Whether this frame reports a failure
    pub fn is_failure(&self) -> bool {
        self.action == Action::Error || self.code().is_some_and(|c| c >= 400)
    }

    /// Sequence number this frame answers: `seq`, or `payload.sequence` on error frames
    pub fn correlation(&self) -> Option<u64> {
        self.seq.or_else(|| {
            if self.action == Action::Error {
                self.payload.get("sequence").and_then(Value::as_u64)
            } else {
                None
            }
        })
    }

    /// Decode the payload as an [`ErrorResponse`], filling in what the envelope knows
    pub fn error_response(&self) -> ErrorResponse {
        let mut response = serde_json::from_value::<ErrorResponse>(self.payload.clone())
            .unwrap_or_else(|_| ErrorResponse::new(self.code().unwrap_or(500), self.payload.to_string()));
        if response.action.is_none() && self.action != Action::Error {
            response.action = Some(self.action.to_string());
        }
        if response.sequence.is_none() {
            response.sequence = self.seq;
        }
        response
    }

    /// Decode the payload into a typed body
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload naming a single channel (subscribe, unsubscribe)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel: String,
}

/// Payload of `publish` and `publish-ack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: String,
}

/// Reply to the session handshake and to `session-uuid`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReply {
    pub uuid: String,
    #[serde(default)]
    pub resumed: bool,
}

/// Reply carrying a channel list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsReply {
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Reply to `publish-ack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAckReply {
    pub id: String,
}

/// An inbound delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned message identifier
    pub id: String,
    pub channel: String,
    pub message: String,
    /// Server timestamp (unix milliseconds)
    #[serde(default)]
    pub time: String,
}
