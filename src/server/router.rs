//! Topic routing and message fan-out

use crate::channels::Channel;
use crate::server::sessions::SessionRegistry;
use serde_json::json;
use switchboard_client::auth::unix_millis;
use switchboard_client::{Action, Envelope};
use tracing::debug;
use uuid::Uuid;

/// Routes published messages to subscribed sessions
#[derive(Clone)]
pub struct TopicRouter {
    sessions: SessionRegistry,
}

/// A message accepted for delivery
#[derive(Debug, Clone)]
pub struct Routed {
    pub id: String,
    pub delivered: usize,
}

impl TopicRouter {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self { sessions }
    }

    /// Stamp a message and deliver it to every attached subscriber of `channel`
    pub fn route(&self, channel: &Channel, message: &str) -> serde_json::Result<Routed> {
        let id = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&Envelope::event(
            Action::Message,
            json!({
                "id": id,
                "channel": channel.as_str(),
                "message": message,
                "time": unix_millis().to_string(),
            }),
        ))?;

        let subscribers = self.sessions.find_subscribers(channel);
        if subscribers.is_empty() {
            debug!(channel = %channel, "No subscribers for channel");
            return Ok(Routed { id, delivered: 0 });
        }

        debug!(channel = %channel, subscriber_count = subscribers.len(), "Routing message");

        let mut delivered = 0;
        for subscriber in subscribers {
            match subscriber.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(channel = %channel, error = %e, "Failed to queue message for subscriber");
                }
            }
        }

        Ok(Routed { id, delivered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use switchboard_client::auth::Permission;
    use switchboard_client::MessageRecord;
    use tokio::sync::mpsc;

    fn principal() -> Principal {
        Principal {
            identity: "abc".to_string(),
            permissions: vec![Permission::Admin],
        }
    }

    #[test]
    fn test_route_to_subscribers() {
        let sessions = SessionRegistry::new();
        let router = TopicRouter::new(sessions.clone());
        let news = Channel::parse("news").unwrap();

        let (tx1, mut rx1) = mpsc::channel(10);
        let (tx2, mut rx2) = mpsc::channel(10);
        let (one, _) = sessions.attach(principal(), None, Uuid::new_v4(), tx1);
        sessions.attach(principal(), None, Uuid::new_v4(), tx2);
        one.subscribe(&news);

        let routed = router.route(&news, "hello").unwrap();
        assert_eq!(routed.delivered, 1);
        assert!(rx2.try_recv().is_err());

        let frame = rx1.try_recv().unwrap();
        let envelope = Envelope::decode(&frame).unwrap();
        assert_eq!(envelope.action, Action::Message);
        assert_eq!(envelope.seq, None);

        let record: MessageRecord = envelope.payload_as().unwrap();
        assert_eq!(record.id, routed.id);
        assert_eq!(record.channel, "news");
        assert_eq!(record.message, "hello");
        assert!(record.time.parse::<u64>().is_ok());
        assert_eq!(sessions.attached_count(), 2);
    }

    #[test]
    fn test_route_without_subscribers() {
        let router = TopicRouter::new(SessionRegistry::new());
        let routed = router.route(&Channel::parse("empty").unwrap(), "m").unwrap();
        assert_eq!(routed.delivered, 0);
        assert!(Uuid::parse_str(&routed.id).is_ok());
    }

    #[test]
    fn test_full_queue_is_not_counted() {
        let sessions = SessionRegistry::new();
        let router = TopicRouter::new(sessions.clone());
        let news = Channel::parse("news").unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let (record, _) = sessions.attach(principal(), None, Uuid::new_v4(), tx);
        record.subscribe(&news);

        assert_eq!(router.route(&news, "first").unwrap().delivered, 1);
        assert_eq!(router.route(&news, "second").unwrap().delivered, 0);
    }
}
