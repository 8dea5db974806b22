//! Session lifecycle state machine

use std::fmt;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `connect()` has not been called yet
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, session handshake in flight
    Handshaking,
    /// Handshake done; requests flow
    Ready,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
    /// Closed for good
    Closed,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        *self == SessionState::Ready
    }

    pub fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    /// `connect()` was called
    Connect,
    /// The transport opened
    Opened,
    /// The transport failed to open (error or timeout)
    OpenFailed,
    /// The handshake reply was accepted
    HandshakeAccepted,
    /// The server refused the credentials
    HandshakeRejected,
    /// The link went away, or the handshake failed for a transient reason
    LinkLost,
    /// The backoff delay elapsed
    RetryDue,
    /// `close()` was called
    Close,
}

/// Next state for `event` in `state`, or `None` if the event does not apply
///
/// `can_retry` says whether the reconnect policy allows another attempt;
/// failures move to `Reconnecting` when it does and to `Closed` otherwise.
pub(crate) fn transition(
    state: SessionState,
    event: SessionEvent,
    can_retry: bool,
) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let failed = if can_retry { S::Reconnecting } else { S::Closed };

    match (state, event) {
        (S::Closed, _) => None,
        (_, E::Close) => Some(S::Closed),

        (S::Disconnected, E::Connect) => Some(S::Connecting),
        (S::Reconnecting, E::Connect) | (S::Reconnecting, E::RetryDue) => Some(S::Connecting),

        (S::Connecting, E::Opened) => Some(S::Handshaking),
        (S::Connecting, E::OpenFailed) => Some(failed),

        (S::Handshaking, E::HandshakeAccepted) => Some(S::Ready),
        (S::Handshaking, E::HandshakeRejected) => Some(S::Closed),
        (S::Handshaking, E::LinkLost) | (S::Ready, E::LinkLost) => Some(failed),

        _ => None,
    }
}
