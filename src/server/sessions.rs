//! Session registry

use crate::auth::Principal;
use crate::channels::Channel;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The socket a session is currently attached to
#[derive(Clone)]
struct Attachment {
    conn_id: Uuid,
    tx: mpsc::Sender<String>,
}

/// A session and the connection it is attached to
pub struct SessionRecord {
    pub uuid: String,
    pub principal: Principal,
    subscriptions: RwLock<BTreeSet<String>>,
    attachment: RwLock<Option<Attachment>>,
    detached_at: RwLock<Option<Instant>>,
}

impl SessionRecord {
    fn new(uuid: String, principal: Principal) -> Self {
        Self {
            uuid,
            principal,
            subscriptions: RwLock::new(BTreeSet::new()),
            attachment: RwLock::new(None),
            detached_at: RwLock::new(None),
        }
    }

    /// Bind `conn_id` to this session, starting without subscriptions
    fn attach(&self, conn_id: Uuid, tx: mpsc::Sender<String>) {
        let mut attachment = self.attachment.write();
        self.subscriptions.write().clear();
        *self.detached_at.write() = None;
        *attachment = Some(Attachment { conn_id, tx });
    }

    /// Whether nothing has been attached for at least `ttl`
    fn detached_for(&self, ttl: Duration) -> bool {
        self.detached_at.read().is_some_and(|at| at.elapsed() >= ttl)
    }

    /// Add a subscription; returns the channels after the change
    pub fn subscribe(&self, channel: &Channel) -> Vec<String> {
        let mut subscriptions = self.subscriptions.write();
        subscriptions.insert(channel.to_string());
        subscriptions.iter().cloned().collect()
    }

    /// Remove a subscription; returns the channels after the change
    pub fn unsubscribe(&self, channel: &str) -> Vec<String> {
        let mut subscriptions = self.subscriptions.write();
        subscriptions.remove(channel);
        subscriptions.iter().cloned().collect()
    }

    /// Drop every subscription; returns the channels that were dropped
    pub fn unsubscribe_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.subscriptions.write())
            .into_iter()
            .collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.subscriptions.read().contains(channel.as_str())
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.read().is_some()
    }

    /// Whether `conn_id` is the connection currently serving this session
    pub fn is_attached_to(&self, conn_id: Uuid) -> bool {
        self.attachment
            .read()
            .as_ref()
            .is_some_and(|a| a.conn_id == conn_id)
    }

    /// Outbound queue of the attached connection
    pub fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.attachment.read().as_ref().map(|a| a.tx.clone())
    }
}

/// Manages every session the broker has issued
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a session
    ///
    /// A known uuid owned by the same identity is resumed and taken over from
    /// any connection still holding it; anything else gets a fresh session.
    /// The attached session always starts without subscriptions.
    /// Returns the session and whether it was resumed.
    pub fn attach(
        &self,
        principal: Principal,
        resume: Option<&str>,
        conn_id: Uuid,
        tx: mpsc::Sender<String>,
    ) -> (Arc<SessionRecord>, bool) {
        // The map guard is held while attaching so a reap cannot drop the record
        if let Some(entry) = resume.and_then(|uuid| self.sessions.get(uuid)) {
            if entry.principal.identity == principal.identity {
                entry.attach(conn_id, tx);
                return (entry.value().clone(), true);
            }
        }

        let uuid = Uuid::new_v4().to_string();
        let record = Arc::new(SessionRecord::new(uuid.clone(), principal));
        record.attach(conn_id, tx);
        self.sessions.insert(uuid, record.clone());
        (record, false)
    }

    /// Detach `conn_id` from its session unless another connection took it over
    pub fn detach(&self, record: &SessionRecord, conn_id: Uuid) {
        let mut attachment = record.attachment.write();
        if attachment.as_ref().is_some_and(|a| a.conn_id == conn_id) {
            *attachment = None;
            record.subscriptions.write().clear();
            *record.detached_at.write() = Some(Instant::now());
        }
    }

    /// Forget sessions that have been detached for at least `ttl`
    ///
    /// Returns how many were removed. A reaped uuid can no longer be resumed.
    pub fn reap_detached(&self, ttl: Duration) -> usize {
        let mut reaped = 0;
        self.sessions.retain(|_, record| {
            let expired = record.detached_for(ttl);
            if expired {
                reaped += 1;
            }
            !expired
        });
        reaped
    }

    pub fn get(&self, uuid: &str) -> Option<Arc<SessionRecord>> {
        self.sessions.get(uuid).map(|r| r.clone())
    }

    /// Outbound queues of every attached session subscribed to `channel`
    pub fn find_subscribers(&self, channel: &Channel) -> Vec<mpsc::Sender<String>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_subscribed(channel))
            .filter_map(|entry| entry.value().sender())
            .collect()
    }

    /// Sessions issued so far
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions with a live connection
    pub fn attached_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_attached()).count()
    }
}
