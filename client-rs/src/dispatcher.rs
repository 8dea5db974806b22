//! Delivery of unsolicited frames
//!
//! The dispatcher owns the subscription table (channel -> handler), the
//! per-publish error sinks of fire-oriented publishes, and the shared
//! callback registry. Channel messages go to the handler registered for
//! their channel or are dropped; uncorrelated errors go to the publish sink
//! they name, else to the global error handler, else nowhere.

use crate::error::SwitchboardError;
use crate::messages::{Action, Envelope, MessageRecord};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handler for messages delivered on a subscribed channel
pub type MessageHandler = Arc<dyn Fn(MessageRecord) + Send + Sync>;

/// Handler for errors no caller is waiting on
pub type ErrorHandler = Arc<dyn Fn(SwitchboardError) + Send + Sync>;

/// Called with the session uuid each time the session becomes ready
pub type ConnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Called with the close reason each time the connection goes away
pub type DisconnectHandler = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Application callbacks, settable at any time from the facade
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) on_error: Mutex<Option<ErrorHandler>>,
    pub(crate) on_connect: Mutex<Option<ConnectHandler>>,
    pub(crate) on_disconnect: Mutex<Option<DisconnectHandler>>,
}

impl Hooks {
    /// Send an error to the global handler, or drop it
    pub(crate) fn report_error(&self, err: SwitchboardError) {
        let handler = self.on_error.lock().clone();
        match handler {
            Some(handler) => handler(err),
            None => debug!(error = %err, "No error handler registered, dropping error"),
        }
    }

    pub(crate) fn notify_connect(&self, uuid: &str) {
        let handler = self.on_connect.lock().clone();
        if let Some(handler) = handler {
            handler(uuid);
        }
    }

    pub(crate) fn notify_disconnect(&self, reason: Option<&str>) {
        let handler = self.on_disconnect.lock().clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}

struct PublishSink {
    handler: ErrorHandler,
    expires_at: Instant,
}

/// What happened to a dispatched frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    /// Handed to a channel handler
    Delivered,
    /// Handed to a publish sink or the global error handler
    ErrorRouted,
    /// Nobody wanted it
    Dropped,
}

pub(crate) struct Dispatcher {
    subscriptions: BTreeMap<String, MessageHandler>,
    publish_sinks: HashMap<u64, PublishSink>,
    hooks: Arc<Hooks>,
}

impl Dispatcher {
    pub(crate) fn new(hooks: Arc<Hooks>) -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            publish_sinks: HashMap::new(),
            hooks,
        }
    }

    /// Bind a handler to a channel, returning the handler it replaces
    pub(crate) fn insert(&mut self, channel: &str, handler: MessageHandler) -> Option<MessageHandler> {
        self.subscriptions.insert(channel.to_string(), handler)
    }

    /// Undo an `insert` of `inserted`: put back the replaced handler, or unbind the channel
    ///
    /// Does nothing once the channel is bound to something else or was
    /// unsubscribed in the meantime.
    pub(crate) fn restore(
        &mut self,
        channel: &str,
        inserted: &MessageHandler,
        previous: Option<MessageHandler>,
    ) {
        let still_bound = self
            .subscriptions
            .get(channel)
            .is_some_and(|current| Arc::ptr_eq(current, inserted));
        if !still_bound {
            return;
        }
        match previous {
            Some(handler) => {
                self.subscriptions.insert(channel.to_string(), handler);
            }
            None => {
                self.subscriptions.remove(channel);
            }
        }
    }

    pub(crate) fn remove(&mut self, channel: &str) -> Option<MessageHandler> {
        self.subscriptions.remove(channel)
    }

    pub(crate) fn clear(&mut self) {
        self.subscriptions.clear();
    }

    /// Subscribed channels, sorted
    pub(crate) fn channels(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Route a later async failure of publish `seq` to `handler`
    pub(crate) fn register_publish_sink(&mut self, seq: u64, handler: ErrorHandler, ttl: Duration) {
        self.publish_sinks.insert(
            seq,
            PublishSink {
                handler,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Forget sinks whose window has passed
    pub(crate) fn prune_publish_sinks(&mut self, now: Instant) {
        self.publish_sinks.retain(|_, sink| sink.expires_at > now);
    }

    pub(crate) fn clear_publish_sinks(&mut self) {
        self.publish_sinks.clear();
    }

    pub(crate) fn next_sink_expiry(&self) -> Option<Instant> {
        self.publish_sinks.values().map(|s| s.expires_at).min()
    }

    /// Deliver an unsolicited (or no longer awaited) frame
    pub(crate) fn dispatch(&mut self, envelope: Envelope) -> Dispatched {
        match envelope.action {
            Action::Message => self.deliver(envelope),
            Action::Error => self.route_error(envelope),
            action => {
                debug!(action = %action, seq = ?envelope.seq, "Dropping uncorrelated frame");
                Dispatched::Dropped
            }
        }
    }

    fn deliver(&self, envelope: Envelope) -> Dispatched {
        let record: MessageRecord = match envelope.payload_as() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Malformed message frame");
                return Dispatched::Dropped;
            }
        };

        match self.subscriptions.get(&record.channel) {
            Some(handler) => {
                let handler = handler.clone();
                handler(record);
                Dispatched::Delivered
            }
            None => {
                debug!(channel = %record.channel, "Message for unsubscribed channel dropped");
                Dispatched::Dropped
            }
        }
    }

    fn route_error(&mut self, envelope: Envelope) -> Dispatched {
        let response = envelope.error_response();
        let sink = envelope
            .correlation()
            .and_then(|seq| self.publish_sinks.remove(&seq));

        let err = SwitchboardError::Failure(response);
        match sink {
            Some(sink) => {
                (sink.handler)(err);
                Dispatched::ErrorRouted
            }
            None => {
                let has_handler = self.hooks.on_error.lock().is_some();
                self.hooks.report_error(err);
                if has_handler {
                    Dispatched::ErrorRouted
                } else {
                    Dispatched::Dropped
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(channel: &str, body: &str) -> Envelope {
        Envelope::event(
            Action::Message,
            json!({"id": "m-1", "channel": channel, "message": body, "time": "0"}),
        )
    }

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler: MessageHandler = Arc::new(move |record: MessageRecord| {
            seen_clone.lock().push(record.message);
        });
        (handler, seen)
    }

    #[test]
    fn test_delivers_to_subscribed_channel() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (handler, seen) = recorder();
        d.insert("chan", handler);

        assert_eq!(d.dispatch(message("chan", "m1")), Dispatched::Delivered);
        assert_eq!(d.dispatch(message("chan", "m2")), Dispatched::Delivered);
        assert_eq!(*seen.lock(), vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_drops_unsubscribed_channel() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (handler, seen) = recorder();
        d.insert("chan", handler);
        d.remove("chan");

        assert_eq!(d.dispatch(message("chan", "late")), Dispatched::Dropped);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_resubscribe_replaces_handler() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        assert!(d.insert("chan", first).is_none());
        assert!(d.insert("chan", second).is_some());

        d.dispatch(message("chan", "m"));
        assert!(first_seen.lock().is_empty());
        assert_eq!(second_seen.lock().len(), 1);
    }

    #[test]
    fn test_restore_rolls_back() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (first, first_seen) = recorder();
        let (second, _) = recorder();

        d.insert("a", first);
        let previous = d.insert("a", second.clone());
        d.restore("a", &second, previous);
        d.dispatch(message("a", "m"));
        assert_eq!(first_seen.lock().len(), 1);

        let (third, _) = recorder();
        let previous = d.insert("b", third.clone());
        d.restore("b", &third, previous);
        assert_eq!(d.channels(), vec!["a".to_string()]);
    }

    #[test]
    fn test_restore_skips_unsubscribed_channel() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (first, first_seen) = recorder();
        let (second, _) = recorder();

        d.insert("a", first);
        let previous = d.insert("a", second.clone());
        d.remove("a");
        d.restore("a", &second, previous);

        assert!(d.channels().is_empty());
        d.dispatch(message("a", "m"));
        assert!(first_seen.lock().is_empty());
    }

    #[test]
    fn test_restore_keeps_newer_handler() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let (first, _) = recorder();
        let (second, _) = recorder();
        let (third, third_seen) = recorder();

        d.insert("a", first);
        let previous = d.insert("a", second.clone());
        d.insert("a", third);
        d.restore("a", &second, previous);

        d.dispatch(message("a", "m"));
        assert_eq!(third_seen.lock().len(), 1);
    }

    #[test]
    fn test_error_goes_to_global_handler() {
        let hooks = Arc::new(Hooks::default());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        *hooks.on_error.lock() = Some(Arc::new(move |err: SwitchboardError| {
            assert_eq!(err.response().map(|r| r.code), Some(500));
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut d = Dispatcher::new(hooks);
        let error = Envelope::event(Action::Error, json!({"code": 500, "details": "boom"}));
        assert_eq!(d.dispatch(error), Dispatched::ErrorRouted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_without_handler_is_dropped() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let error = Envelope::event(Action::Error, json!({"code": 500}));
        assert_eq!(d.dispatch(error), Dispatched::Dropped);
    }

    #[test]
    fn test_publish_sink_takes_precedence() {
        let hooks = Arc::new(Hooks::default());
        let global = Arc::new(AtomicUsize::new(0));
        let global_clone = global.clone();
        *hooks.on_error.lock() = Some(Arc::new(move |_| {
            global_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut d = Dispatcher::new(hooks);
        let sink_hits = Arc::new(AtomicUsize::new(0));
        let sink_clone = sink_hits.clone();
        d.register_publish_sink(
            4,
            Arc::new(move |_| {
                sink_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_secs(30),
        );

        let error = Envelope::event(Action::Error, json!({"code": 403, "sequence": 4}));
        d.dispatch(error.clone());
        assert_eq!(sink_hits.load(Ordering::SeqCst), 1);
        assert_eq!(global.load(Ordering::SeqCst), 0);

        // The sink fires once; a repeat goes to the global handler
        d.dispatch(error);
        assert_eq!(sink_hits.load(Ordering::SeqCst), 1);
        assert_eq!(global.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prune_publish_sinks() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        d.register_publish_sink(1, Arc::new(|_| {}), Duration::ZERO);
        d.register_publish_sink(2, Arc::new(|_| {}), Duration::from_secs(60));
        assert!(d.next_sink_expiry().is_some());

        d.prune_publish_sinks(Instant::now());
        assert_eq!(d.publish_sinks.len(), 1);
        assert!(d.publish_sinks.contains_key(&2));

        d.clear_publish_sinks();
        assert!(d.next_sink_expiry().is_none());
    }

    #[test]
    fn test_stray_reply_is_dropped() {
        let mut d = Dispatcher::new(Arc::new(Hooks::default()));
        let reply = Envelope::request(Action::Subscribe, 8, json!({"code": 200}));
        assert_eq!(d.dispatch(reply), Dispatched::Dropped);
    }
}
