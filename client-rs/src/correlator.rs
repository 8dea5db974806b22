//! Request/reply correlation by sequence number
//!
//! The correlator allocates sequence numbers and keeps one [`PendingRequest`]
//! per number until the matching reply arrives, its deadline passes, or the
//! connection goes away. It is owned by the session actor, so every mutation
//! is serialized with frame arrival. `T` is whatever the owner needs to finish
//! the request (reply sender, rollback state, ...).

use crate::messages::{Action, Envelope};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// One in-flight request awaiting its reply
#[derive(Debug)]
pub(crate) struct PendingRequest<T> {
    pub(crate) seq: u64,
    pub(crate) action: Action,
    pub(crate) purpose: T,
    pub(crate) created_at: Instant,
    pub(crate) deadline: Instant,
}

/// Outcome of feeding an inbound frame to the correlator
#[derive(Debug)]
pub(crate) enum Resolution<T> {
    /// The frame answers this request, which is no longer pending
    Matched(PendingRequest<T>, Envelope),
    /// No request is waiting for this frame; hand it to the dispatcher
    Unmatched(Envelope),
}

#[derive(Debug)]
pub(crate) struct Correlator<T> {
    next_seq: u64,
    pending: HashMap<u64, PendingRequest<T>>,
}

impl<T> Correlator<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next sequence number
    ///
    /// Numbers keep increasing for the lifetime of the correlator, across
    /// reconnects, so a late reply from an old connection can never be
    /// mistaken for an answer to a new request.
    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Register a request; hands the purpose back if `seq` is already in flight
    pub(crate) fn register(
        &mut self,
        seq: u64,
        action: Action,
        purpose: T,
        timeout: Duration,
    ) -> Result<(), T> {
        if self.pending.contains_key(&seq) {
            return Err(purpose);
        }
        let now = Instant::now();
        self.pending.insert(
            seq,
            PendingRequest {
                seq,
                action,
                purpose,
                created_at: now,
                deadline: now + timeout,
            },
        );
        Ok(())
    }

    /// Match an inbound frame against the pending map
    ///
    /// A match removes the request, so a duplicate reply for the same
    /// sequence number comes back as `Unmatched`.
    pub(crate) fn resolve(&mut self, envelope: Envelope) -> Resolution<T> {
        if envelope.action == Action::Message {
            return Resolution::Unmatched(envelope);
        }
        match envelope.correlation().and_then(|seq| self.pending.remove(&seq)) {
            Some(pending) => Resolution::Matched(pending, envelope),
            None => Resolution::Unmatched(envelope),
        }
    }

    /// Remove and return every request whose deadline is at or before `now`
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<PendingRequest<T>> {
        let expired: Vec<u64> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.seq)
            .collect();
        self.take_sorted(expired)
    }

    /// Remove and return every pending request (connection gone)
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest<T>> {
        let all: Vec<u64> = self.pending.keys().copied().collect();
        self.take_sorted(all)
    }

    fn take_sorted(&mut self, mut seqs: Vec<u64>) -> Vec<PendingRequest<T>> {
        seqs.sort_unstable();
        seqs.into_iter()
            .filter_map(|seq| self.pending.remove(&seq))
            .collect()
    }

    /// Earliest deadline among pending requests
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, seq: u64) -> bool {
        self.pending.contains_key(&seq)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn reply(seq: u64) -> Envelope {
        Envelope::request(Action::PublishAck, seq, json!({"code": 200, "id": "m"}))
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut c: Correlator<()> = Correlator::new();
        let a = c.next_seq();
        let b = c.next_seq();
        let d = c.next_seq();
        assert!(a < b && b < d);
    }

    #[test]
    fn test_register_and_resolve() {
        let mut c = Correlator::new();
        let seq = c.next_seq();
        c.register(seq, Action::PublishAck, "caller", TIMEOUT).unwrap();
        assert!(c.contains(seq));

        match c.resolve(reply(seq)) {
            Resolution::Matched(pending, env) => {
                assert_eq!(pending.seq, seq);
                assert_eq!(pending.purpose, "caller");
                assert_eq!(env.seq, Some(seq));
            }
            Resolution::Unmatched(_) => panic!("expected a match"),
        }
        assert!(c.is_empty());
    }

    #[test]
    fn test_duplicate_reply_is_unmatched() {
        let mut c = Correlator::new();
        let seq = c.next_seq();
        c.register(seq, Action::PublishAck, (), TIMEOUT).unwrap();

        assert!(matches!(c.resolve(reply(seq)), Resolution::Matched(..)));
        assert!(matches!(c.resolve(reply(seq)), Resolution::Unmatched(_)));
    }

    #[test]
    fn test_register_rejects_duplicate_seq() {
        let mut c = Correlator::new();
        c.register(7, Action::Subscribe, 1, TIMEOUT).unwrap();
        assert_eq!(c.register(7, Action::Subscribe, 2, TIMEOUT), Err(2));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_unknown_seq_is_unmatched() {
        let mut c: Correlator<()> = Correlator::new();
        assert!(matches!(c.resolve(reply(99)), Resolution::Unmatched(_)));
    }

    #[test]
    fn test_error_frame_matches_by_sequence_field() {
        let mut c = Correlator::new();
        let seq = c.next_seq();
        c.register(seq, Action::Subscribe, (), TIMEOUT).unwrap();

        let error = Envelope::event(Action::Error, json!({"code": 403, "sequence": seq}));
        assert!(matches!(c.resolve(error), Resolution::Matched(..)));
    }

    #[test]
    fn test_messages_never_match() {
        let mut c = Correlator::new();
        c.register(1, Action::Subscribe, (), TIMEOUT).unwrap();

        let message = Envelope::request(Action::Message, 1, json!({}));
        assert!(matches!(c.resolve(message), Resolution::Unmatched(_)));
        assert!(c.contains(1));
    }

    #[test]
    fn test_expire_only_overdue() {
        let mut c = Correlator::new();
        c.register(1, Action::PublishAck, (), Duration::ZERO).unwrap();
        c.register(2, Action::PublishAck, (), TIMEOUT).unwrap();

        let expired = c.expire(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].seq, 1);
        assert_eq!(expired[0].action, Action::PublishAck);
        assert!(c.contains(2));
        assert!(!c.contains(1));
    }

    #[test]
    fn test_drain_empties_in_order() {
        let mut c = Correlator::new();
        for seq in [3, 1, 2] {
            c.register(seq, Action::Subscribe, seq, TIMEOUT).unwrap();
        }
        let drained: Vec<u64> = c.drain().into_iter().map(|p| p.seq).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut c = Correlator::new();
        assert!(c.next_deadline().is_none());

        c.register(1, Action::Subscribe, (), Duration::from_secs(10)).unwrap();
        c.register(2, Action::Subscribe, (), Duration::from_secs(1)).unwrap();
        let deadline = c.next_deadline().unwrap();
        let expired = c.expire(deadline);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].seq, 2);
        assert_eq!(expired[0].deadline, deadline);
        assert!(expired[0].created_at <= deadline);
    }
}
