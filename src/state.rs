use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::message::Message;

/// The two per-direction monotonic sequence counters. Plain atomics (not a
/// mutex) because the Session actor is the only writer but a handle may
/// read a snapshot without round-tripping through the actor's channel.
#[derive(Default)]
pub struct Sequences {
    next_outgoing: AtomicU32,
    next_incoming: AtomicU32,
}

impl Sequences {
    pub fn new(next_outgoing: u32, next_incoming: u32) -> Self {
        Sequences {
            next_outgoing: AtomicU32::new(next_outgoing),
            next_incoming: AtomicU32::new(next_incoming),
        }
    }

    /// Returns the sequence number to stamp on the next outbound message,
    /// then advances the counter.
    pub fn take_next_outgoing(&self) -> u32 {
        self.next_outgoing.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_outgoing(&self) -> u32 {
        self.next_outgoing.load(Ordering::SeqCst)
    }

    pub fn peek_incoming(&self) -> u32 {
        self.next_incoming.load(Ordering::SeqCst)
    }

    pub fn incr_incoming(&self) -> u32 {
        self.next_incoming.fetch_add(1, Ordering::SeqCst)
    }

    /// Unilaterally sets the expected incoming sequence number
    /// (SequenceReset-Reset). Per §8 property 8 / §4.1 this may go
    /// backwards; the caller is responsible for logging a warning.
    pub fn set_incoming(&self, new_seq_no: u32) {
        self.next_incoming.store(new_seq_no, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.next_outgoing.store(1, Ordering::SeqCst);
        self.next_incoming.store(1, Ordering::SeqCst);
    }
}

impl From<(u32, u32)> for Sequences {
    /// `(next_outgoing, next_incoming)`.
    fn from((next_outgoing, next_incoming): (u32, u32)) -> Self {
        Sequences::new(next_outgoing, next_incoming)
    }
}

/// Mutable per-session fields from the data model: logon/logout flags,
/// timers, the out-of-order queue, and bookkeeping the state machine
/// consults on every tick or inbound message.
pub struct SessionState {
    pub sequences: Sequences,
    pub enabled: bool,
    pub sent_logon: bool,
    pub received_logon: bool,
    pub sent_logout: bool,
    pub received_logout: bool,
    pub test_request_counter: u32,
    pub last_test_request_time: Option<DateTime<Utc>>,
    pub resend_range: Option<(u32, u32)>,
    pub queue: BTreeMap<u32, Message>,
    pub creation_time: DateTime<Utc>,
    pub last_sent_time: DateTime<Utc>,
    pub last_received_time: DateTime<Utc>,
    pub logout_reason: Option<String>,
}

impl SessionState {
    pub fn new(sequences: Sequences, now: DateTime<Utc>) -> Self {
        SessionState {
            sequences,
            enabled: false,
            sent_logon: false,
            received_logon: false,
            sent_logout: false,
            received_logout: false,
            test_request_counter: 0,
            last_test_request_time: None,
            resend_range: None,
            queue: BTreeMap::new(),
            creation_time: now,
            last_sent_time: now,
            last_received_time: now,
            logout_reason: None,
        }
    }

    pub fn is_logged_on(&self) -> bool {
        self.enabled && self.sent_logon && self.received_logon
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sequences_take_and_peek() {
        let seqs = Sequences::new(1, 1);
        assert_eq!(seqs.take_next_outgoing(), 1);
        assert_eq!(seqs.peek_outgoing(), 2);
    }

    #[test]
    fn test_sequences_tuple_order_is_outgoing_then_incoming() {
        let seqs: Sequences = (5, 7).into();
        assert_eq!(seqs.peek_outgoing(), 5);
        assert_eq!(seqs.peek_incoming(), 7);
    }

    #[test]
    fn test_is_logged_on_requires_all_three_flags() {
        let mut state = SessionState::new(Sequences::new(1, 1), Utc::now());
        assert!(!state.is_logged_on());
        state.enabled = true;
        state.sent_logon = true;
        state.received_logon = true;
        assert!(state.is_logged_on());
    }
}
