//! Session actor
//!
//! One task per client owns the link, the correlator, the dispatcher and the
//! lifecycle state. Facade calls arrive as [`Command`]s, transport events
//! arrive through the link and every timer collapses into a single sleep on
//! the earliest deadline, so all mutation happens here in arrival order.

use crate::auth::{unix_millis, Credentials};
use crate::backoff::calculate_backoff;
use crate::config::SwitchboardConfig;
use crate::correlator::{Correlator, PendingRequest, Resolution};
use crate::dispatcher::{Dispatcher, ErrorHandler, Hooks, MessageHandler};
use crate::error::{Result, SwitchboardError};
use crate::messages::{Action, ChannelsReply, Envelope, PublishAckReply, SessionReply};
use crate::state::{transition, SessionEvent, SessionState};
use crate::transport::{Link, Transport, TransportEvent};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// State visible to both the facade and the actor
pub(crate) struct Shared {
    pub(crate) hooks: Arc<Hooks>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) session_uuid: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            hooks: Arc::new(Hooks::default()),
            state,
            session_uuid: Mutex::new(None),
        }
    }
}

/// Messages from the facade to the session actor
pub(crate) enum Command {
    Connect { reply: Reply<()> },
    Request(Request),
    DropConnection { reconnect_delay: Option<Duration> },
    Close { reply: oneshot::Sender<()> },
}

impl Command {
    /// Answer a command the actor will never run
    fn reject(self) {
        match self {
            Command::Connect { reply } => {
                let _ = reply.send(Err(SwitchboardError::Shutdown));
            }
            Command::Request(request) => request.fail(SwitchboardError::Shutdown),
            Command::Close { reply } => {
                let _ = reply.send(());
            }
            Command::DropConnection { .. } => {}
        }
    }
}

/// Operations that need a ready session
pub(crate) enum Request {
    Publish {
        channel: String,
        message: String,
        on_error: Option<ErrorHandler>,
        reply: Reply<u64>,
    },
    PublishAck {
        channel: String,
        message: String,
        reply: Reply<String>,
    },
    Subscribe {
        channel: String,
        handler: MessageHandler,
        reply: Reply<Vec<String>>,
    },
    Unsubscribe {
        channel: String,
        reply: Reply<Vec<String>>,
    },
    UnsubscribeAll {
        reply: Reply<Vec<String>>,
    },
    ListSubscriptions {
        reply: Reply<Vec<String>>,
    },
    SessionUuid {
        reply: Reply<String>,
    },
}

impl Request {
    fn action(&self) -> Action {
        match self {
            Request::Publish { .. } => Action::Publish,
            Request::PublishAck { .. } => Action::PublishAck,
            Request::Subscribe { .. } => Action::Subscribe,
            Request::Unsubscribe { .. } => Action::Unsubscribe,
            Request::UnsubscribeAll { .. } => Action::UnsubscribeAll,
            Request::ListSubscriptions { .. } => Action::ListSubscriptions,
            Request::SessionUuid { .. } => Action::SessionUuid,
        }
    }

    fn fail(self, err: SwitchboardError) {
        match self {
            Request::Publish { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Request::PublishAck { reply, .. } | Request::SessionUuid { reply } => {
                let _ = reply.send(Err(err));
            }
            Request::Subscribe { reply, .. }
            | Request::Unsubscribe { reply, .. }
            | Request::UnsubscribeAll { reply }
            | Request::ListSubscriptions { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// What to do when a correlated request settles
enum Purpose {
    Handshake,
    Replay {
        channel: String,
    },
    PublishAck(Reply<String>),
    Subscribe {
        channel: String,
        handler: MessageHandler,
        previous: Option<MessageHandler>,
        reply: Reply<Vec<String>>,
    },
    Unsubscribe {
        channel: String,
        reply: Reply<Vec<String>>,
    },
    UnsubscribeAll(Reply<Vec<String>>),
    List(Reply<Vec<String>>),
    SessionUuid(Reply<String>),
}

impl Purpose {
    /// Finish a caller-facing request; lifecycle purposes are handled by the actor
    fn settle(
        self,
        outcome: Result<Envelope>,
        dispatcher: &mut Dispatcher,
        session_uuid: &Mutex<Option<String>>,
    ) {
        match self {
            Purpose::PublishAck(reply) => {
                let result = outcome
                    .and_then(|env| env.payload_as::<PublishAckReply>())
                    .map(|ack| ack.id);
                let _ = reply.send(result);
            }
            Purpose::Subscribe {
                channel,
                handler,
                previous,
                reply,
            } => {
                let result = outcome.and_then(|env| channels(&env));
                if result.is_err() {
                    dispatcher.restore(&channel, &handler, previous);
                }
                let _ = reply.send(result);
            }
            Purpose::Unsubscribe { channel, reply } => {
                let result = outcome.and_then(|env| channels(&env));
                if result.is_ok() {
                    dispatcher.remove(&channel);
                }
                let _ = reply.send(result);
            }
            Purpose::UnsubscribeAll(reply) => {
                let result = outcome.and_then(|env| channels(&env));
                if result.is_ok() {
                    dispatcher.clear();
                }
                let _ = reply.send(result);
            }
            Purpose::List(reply) => {
                let _ = reply.send(outcome.and_then(|env| channels(&env)));
            }
            Purpose::SessionUuid(reply) => {
                let result = outcome
                    .and_then(|env| env.payload_as::<SessionReply>())
                    .map(|session| session.uuid);
                if let Ok(uuid) = &result {
                    *session_uuid.lock() = Some(uuid.clone());
                }
                let _ = reply.send(result);
            }
            Purpose::Handshake | Purpose::Replay { .. } => {}
        }
    }
}

fn channels(envelope: &Envelope) -> Result<Vec<String>> {
    Ok(envelope.payload_as::<ChannelsReply>()?.channels)
}

/// A request waiting for the session to become ready
struct Deferred {
    request: Request,
    expires_at: Instant,
}

/// Spawn the actor for one client; returns its command queue
pub(crate) fn spawn(
    config: SwitchboardConfig,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
) -> mpsc::UnboundedSender<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session {
        resume_uuid: config.session_uuid.clone(),
        dispatcher: Dispatcher::new(shared.hooks.clone()),
        config,
        credentials,
        transport,
        shared,
        commands: rx,
        correlator: Correlator::new(),
        state: SessionState::Disconnected,
        link: None,
        opening: None,
        retry_at: None,
        attempt: 0,
        retries: 0,
        replaying: 0,
        deferred: VecDeque::new(),
        connect_waiters: Vec::new(),
    };
    tokio::spawn(session.run());
    tx
}

struct Session {
    config: SwitchboardConfig,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,

    correlator: Correlator<Purpose>,
    dispatcher: Dispatcher,

    state: SessionState,
    link: Option<Link>,
    opening: Option<BoxFuture<'static, Result<Link>>>,
    retry_at: Option<Instant>,
    /// Consecutive failed attempts since the session was last ready
    attempt: u32,
    /// Retries scheduled since the session was last ready; indexes the backoff
    retries: u32,
    /// Replayed subscribes still awaiting their reply
    replaying: usize,
    deferred: VecDeque<Deferred>,
    connect_waiters: Vec<Reply<()>>,
    resume_uuid: Option<String>,
}

async fn send(link: &Option<Link>, envelope: &Envelope) -> Result<()> {
    let frame = envelope.encode()?;
    match link {
        Some(link) => link.send(frame).await,
        None => Err(SwitchboardError::NotConnected),
    }
}

async fn next_opened(opening: &mut Option<BoxFuture<'static, Result<Link>>>) -> Result<Link> {
    match opening {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<Link>) -> TransportEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

impl Session {
    async fn run(mut self) {
        while !self.state.is_closed() {
            let wake_at = self.next_wakeup();
            let sleep_target = wake_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All client handles dropped");
                        self.close(None).await;
                    }
                },

                opened = next_opened(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(opened).await;
                }

                event = next_event(&mut self.link) => self.on_transport_event(event).await,

                _ = sleep_until(sleep_target), if wake_at.is_some() => self.on_timer().await,
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject();
        }
        debug!("Session actor stopped");
    }

    fn next_wakeup(&self) -> Option<Instant> {
        [
            self.correlator.next_deadline(),
            self.retry_at,
            self.deferred.front().map(|d| d.expires_at),
            self.dispatcher.next_sink_expiry(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn can_retry(&self) -> bool {
        self.config.auto_reconnect
            && self
                .config
                .max_reconnect_attempts
                .map_or(true, |max| self.attempt < max)
    }

    /// Feed an event to the state machine; false if it did not apply
    fn apply(&mut self, event: SessionEvent) -> bool {
        match transition(self.state, event, self.can_retry()) {
            Some(next) => {
                if next != self.state {
                    debug!(from = %self.state, to = %next, "Session state changed");
                    self.state = next;
                    self.shared.state.send_replace(next);
                }
                true
            }
            None => {
                debug!(state = %self.state, event = ?event, "Ignoring lifecycle event");
                false
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.on_connect(reply),
            Command::Request(request) => self.submit(request).await,
            Command::DropConnection { reconnect_delay } => self.drop_connection(reconnect_delay).await,
            Command::Close { reply } => self.close(Some(reply)).await,
        }
    }

    fn on_connect(&mut self, reply: Reply<()>) {
        match self.state {
            SessionState::Ready => {
                let _ = reply.send(Ok(()));
            }
            SessionState::Connecting | SessionState::Handshaking => self.connect_waiters.push(reply),
            SessionState::Disconnected | SessionState::Reconnecting => {
                self.connect_waiters.push(reply);
                if self.apply(SessionEvent::Connect) {
                    self.start_open();
                }
            }
            SessionState::Closed => {
                let _ = reply.send(Err(SwitchboardError::Shutdown));
            }
        }
    }

    fn start_open(&mut self) {
        self.retry_at = None;
        let transport = self.transport.clone();
        let url = self.config.url.clone();
        let limit = self.config.connect_timeout;

        info!(url = %url, attempt = self.attempt + 1, "Connecting");
        self.opening = Some(Box::pin(async move {
            match timeout(limit, transport.open(&url)).await {
                Ok(result) => result,
                Err(_) => Err(SwitchboardError::ConnectTimeout(limit)),
            }
        }));
    }

    async fn on_opened(&mut self, result: Result<Link>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                if self.apply(SessionEvent::Opened) {
                    self.send_handshake().await;
                }
            }
            Err(err) => {
                warn!(attempt = self.attempt + 1, error = %err, "Connect attempt failed");
                self.attempt_failed(SessionEvent::OpenFailed, err, None);
            }
        }
    }

    async fn send_handshake(&mut self) {
        let uuid = self.resume_uuid.clone();
        let signed = match self.credentials.sign(unix_millis(), uuid.as_deref()) {
            Ok(signed) => signed,
            Err(err) => {
                error!(error = %err, "Could not sign handshake");
                self.link = None;
                self.attempt_failed(SessionEvent::LinkLost, err, None);
                return;
            }
        };

        let action = if uuid.is_some() {
            Action::SessionResume
        } else {
            Action::SessionCreate
        };
        debug!(action = %action, uuid = ?uuid, "Sending handshake");
        let payload = json!({ "auth": signed.auth, "hmac": signed.hmac });
        self.send_awaiting(action, payload, Purpose::Handshake).await;
    }

    async fn on_handshake_reply(&mut self, outcome: Result<Envelope>) {
        match outcome.and_then(|env| env.payload_as::<SessionReply>()) {
            Ok(reply) => self.become_ready(reply).await,
            Err(err) if err.is_auth_rejection() => {
                error!(error = %err, "Handshake rejected");
                self.link = None;
                self.fail_connect_waiters(&err);
                self.apply(SessionEvent::HandshakeRejected);
                self.release_all(SwitchboardError::ConnectionClosed);
            }
            Err(SwitchboardError::Failure(response)) if self.resume_uuid.is_some() => {
                warn!(
                    uuid = ?self.resume_uuid,
                    code = response.code,
                    details = ?response.details,
                    "Session resume refused, creating a new session"
                );
                self.resume_uuid = None;
                self.send_handshake().await;
            }
            Err(err) => {
                warn!(error = %err, "Handshake failed");
                self.link = None;
                self.fail_pending(SwitchboardError::ConnectionClosed);
                self.attempt_failed(SessionEvent::LinkLost, err, None);
            }
        }
    }

    async fn become_ready(&mut self, reply: SessionReply) {
        if !self.apply(SessionEvent::HandshakeAccepted) {
            return;
        }
        self.attempt = 0;
        self.retries = 0;
        self.resume_uuid = Some(reply.uuid.clone());
        *self.shared.session_uuid.lock() = Some(reply.uuid.clone());
        info!(uuid = %reply.uuid, resumed = reply.resumed, "Session ready");

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        self.shared.hooks.notify_connect(&reply.uuid);

        self.replay().await;
        if self.replaying == 0 {
            self.flush_deferred().await;
        }
    }

    /// Re-issue a subscribe for every locally registered channel
    async fn replay(&mut self) {
        let channels = self.dispatcher.channels();
        if channels.is_empty() {
            return;
        }
        info!(count = channels.len(), "Replaying subscriptions");
        self.replaying = channels.len();
        for channel in channels {
            let payload = json!({ "channel": &channel });
            self.send_awaiting(Action::Subscribe, payload, Purpose::Replay { channel })
                .await;
        }
    }

    async fn on_replay_reply(&mut self, channel: String, outcome: Result<Envelope>) {
        if let Err(err) = outcome {
            warn!(channel = %channel, error = %err, "Subscription replay failed");
            self.shared.hooks.report_error(err);
        }
        self.replaying = self.replaying.saturating_sub(1);
        if self.replaying == 0 && self.state.is_ready() {
            debug!("Subscription replay settled");
            self.flush_deferred().await;
        }
    }

    async fn submit(&mut self, request: Request) {
        if self.state.is_ready() && self.replaying == 0 {
            self.issue(request).await;
        } else {
            debug!(action = %request.action(), state = %self.state, "Queueing request until the session is ready");
            self.deferred.push_back(Deferred {
                request,
                expires_at: Instant::now() + self.config.request_timeout,
            });
        }
    }

    async fn flush_deferred(&mut self) {
        while self.state.is_ready() && self.replaying == 0 {
            let Some(deferred) = self.deferred.pop_front() else {
                break;
            };
            self.issue(deferred.request).await;
        }
    }

    async fn issue(&mut self, request: Request) {
        match request {
            Request::Publish {
                channel,
                message,
                on_error,
                reply,
            } => {
                let seq = self.correlator.next_seq();
                let payload = json!({ "channel": &channel, "message": message });
                let envelope = Envelope::request(Action::Publish, seq, payload);
                let result = send(&self.link, &envelope).await;
                if result.is_ok() {
                    debug!(seq, channel = %channel, "Published");
                    if let Some(handler) = on_error {
                        self.dispatcher
                            .register_publish_sink(seq, handler, self.config.request_timeout);
                    }
                }
                let _ = reply.send(result.map(|()| seq));
            }
            Request::PublishAck {
                channel,
                message,
                reply,
            } => {
                let payload = json!({ "channel": channel, "message": message });
                self.send_awaiting(Action::PublishAck, payload, Purpose::PublishAck(reply))
                    .await;
            }
            Request::Subscribe {
                channel,
                handler,
                reply,
            } => {
                let previous = self.dispatcher.insert(&channel, handler.clone());
                let payload = json!({ "channel": &channel });
                let purpose = Purpose::Subscribe {
                    channel,
                    handler,
                    previous,
                    reply,
                };
                self.send_awaiting(Action::Subscribe, payload, purpose).await;
            }
            Request::Unsubscribe { channel, reply } => {
                let payload = json!({ "channel": &channel });
                self.send_awaiting(Action::Unsubscribe, payload, Purpose::Unsubscribe { channel, reply })
                    .await;
            }
            Request::UnsubscribeAll { reply } => {
                self.send_awaiting(Action::UnsubscribeAll, json!({}), Purpose::UnsubscribeAll(reply))
                    .await;
            }
            Request::ListSubscriptions { reply } => {
                self.send_awaiting(Action::ListSubscriptions, json!({}), Purpose::List(reply))
                    .await;
            }
            Request::SessionUuid { reply } => {
                self.send_awaiting(Action::SessionUuid, json!({}), Purpose::SessionUuid(reply))
                    .await;
            }
        }
    }

    /// Register a pending request and send it
    ///
    /// A failed send leaves the request pending: the link is gone, and the
    /// close event that follows fails it with `ConnectionClosed`.
    async fn send_awaiting(&mut self, action: Action, payload: Value, purpose: Purpose) {
        let seq = self.correlator.next_seq();
        if let Err(purpose) =
            self.correlator
                .register(seq, action, purpose, self.config.request_timeout)
        {
            let err = SwitchboardError::Transport(format!("sequence {} already in flight", seq));
            purpose.settle(Err(err), &mut self.dispatcher, &self.shared.session_uuid);
            return;
        }

        let envelope = Envelope::request(action, seq, payload);
        debug!(seq, action = %action, "Sending request");
        if let Err(err) = send(&self.link, &envelope).await {
            warn!(seq, action = %action, error = %err, "Send failed");
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.on_frame(&frame).await,
            TransportEvent::Closed(reason) => {
                info!(reason = ?reason, "Connection closed");
                self.on_link_lost(reason, None);
            }
            TransportEvent::Error(err) => {
                warn!(error = %err, "Connection failed");
                self.on_link_lost(Some(err), None);
            }
        }
    }

    async fn on_frame(&mut self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable frame");
                return;
            }
        };

        match self.correlator.resolve(envelope) {
            Resolution::Matched(pending, envelope) => {
                let outcome = if envelope.is_failure() {
                    Err(SwitchboardError::Failure(envelope.error_response()))
                } else {
                    Ok(envelope)
                };
                self.settle(pending, outcome).await;
            }
            Resolution::Unmatched(envelope) => {
                self.dispatcher.dispatch(envelope);
            }
        }
    }

    async fn settle(&mut self, pending: PendingRequest<Purpose>, outcome: Result<Envelope>) {
        let PendingRequest {
            seq,
            action,
            purpose,
            created_at,
            ..
        } = pending;
        debug!(
            seq,
            action = %action,
            ok = outcome.is_ok(),
            elapsed_ms = created_at.elapsed().as_millis() as u64,
            "Request settled"
        );

        match purpose {
            Purpose::Handshake => self.on_handshake_reply(outcome).await,
            Purpose::Replay { channel } => self.on_replay_reply(channel, outcome).await,
            purpose => purpose.settle(outcome, &mut self.dispatcher, &self.shared.session_uuid),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        for pending in self.correlator.expire(now) {
            warn!(seq = pending.seq, action = %pending.action, "Request timed out");
            let err = SwitchboardError::ResponseTimeout {
                action: pending.action.to_string(),
                seq: pending.seq,
            };
            self.settle(pending, Err(err)).await;
        }

        while self.deferred.front().is_some_and(|d| d.expires_at <= now) {
            if let Some(deferred) = self.deferred.pop_front() {
                debug!(action = %deferred.request.action(), "Queued request expired");
                deferred.request.fail(SwitchboardError::NotConnected);
            }
        }

        self.dispatcher.prune_publish_sinks(now);

        if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            if self.apply(SessionEvent::RetryDue) {
                self.start_open();
            }
        }
    }

    /// The link went away (peer close, network error or a forced drop)
    fn on_link_lost(&mut self, reason: Option<String>, reconnect_delay: Option<Duration>) {
        let was_ready = self.state.is_ready();
        self.link = None;
        if !self.correlator.is_empty() {
            debug!(pending = self.correlator.len(), "Failing in-flight requests");
        }
        self.fail_pending(SwitchboardError::ConnectionClosed);
        self.dispatcher.clear_publish_sinks();
        self.replaying = 0;

        if was_ready {
            self.shared.hooks.notify_disconnect(reason.as_deref());
            self.after_loss(SessionEvent::LinkLost, reconnect_delay);
        } else {
            let err = SwitchboardError::Transport(
                reason.unwrap_or_else(|| "connection closed during handshake".to_string()),
            );
            self.attempt_failed(SessionEvent::LinkLost, err, reconnect_delay);
        }
    }

    fn attempt_failed(
        &mut self,
        event: SessionEvent,
        err: SwitchboardError,
        reconnect_delay: Option<Duration>,
    ) {
        self.attempt += 1;
        self.fail_connect_waiters(&err);
        self.after_loss(event, reconnect_delay);
    }

    /// Move to `Reconnecting` with a scheduled retry, or to `Closed`
    fn after_loss(&mut self, event: SessionEvent, reconnect_delay: Option<Duration>) {
        self.apply(event);
        match self.state {
            SessionState::Reconnecting => {
                let delay = reconnect_delay.unwrap_or_else(|| {
                    calculate_backoff(self.config.backoff_config(), self.retries)
                });
                self.retries = self.retries.saturating_add(1);
                info!(attempt = self.attempt + 1, delay = ?delay, "Reconnecting");
                self.retry_at = Some(Instant::now() + delay);
            }
            SessionState::Closed => {
                if self.config.auto_reconnect {
                    error!(attempts = self.attempt, "Giving up reconnecting");
                } else {
                    info!("Connection lost, reconnect disabled");
                }
                self.release_all(SwitchboardError::ConnectionClosed);
            }
            _ => {}
        }
    }

    async fn drop_connection(&mut self, reconnect_delay: Option<Duration>) {
        match self.state {
            SessionState::Ready | SessionState::Handshaking => {
                info!(delay = ?reconnect_delay, "Dropping connection");
                if let Some(link) = &self.link {
                    link.close().await;
                }
                self.on_link_lost(Some("connection dropped".to_string()), reconnect_delay);
            }
            SessionState::Connecting => {
                self.opening = None;
                let err = SwitchboardError::Transport("connection dropped".to_string());
                self.attempt_failed(SessionEvent::OpenFailed, err, reconnect_delay);
            }
            SessionState::Reconnecting => {
                if let Some(delay) = reconnect_delay {
                    self.retry_at = Some(Instant::now() + delay);
                }
            }
            SessionState::Disconnected | SessionState::Closed => {}
        }
    }

    async fn close(&mut self, reply: Option<oneshot::Sender<()>>) {
        let was_ready = self.state.is_ready();
        self.opening = None;
        self.retry_at = None;
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.apply(SessionEvent::Close);
        self.release_all(SwitchboardError::ConnectionClosed);
        if was_ready {
            self.shared.hooks.notify_disconnect(None);
        }
        info!("Session closed");

        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn fail_pending(&mut self, err: SwitchboardError) {
        for pending in self.correlator.drain() {
            pending
                .purpose
                .settle(Err(err.clone()), &mut self.dispatcher, &self.shared.session_uuid);
        }
    }

    fn fail_connect_waiters(&mut self, err: &SwitchboardError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Fail everything still waiting on this session
    fn release_all(&mut self, err: SwitchboardError) {
        self.fail_pending(err.clone());
        for deferred in self.deferred.drain(..) {
            deferred.request.fail(err.clone());
        }
        self.fail_connect_waiters(&err);
        self.dispatcher.clear_publish_sinks();
        self.replaying = 0;
    }
}
