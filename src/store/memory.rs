use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use super::MessageStore;
use crate::mem::MsgBuf;

struct Db {
    outgoing_messages: Vec<(u32, Vec<u8>)>,
    next_outgoing: u32,
    next_incoming: u32,
    creation_time: DateTime<Utc>,
}

/// In-memory `MessageStore`: used by tests and by sessions that opt out of
/// durability. Does not survive process restarts.
pub struct MemoryStore {
    db: Mutex<Db>,
}

impl MemoryStore {
    pub fn new(now: DateTime<Utc>) -> Self {
        MemoryStore {
            db: Mutex::new(Db {
                outgoing_messages: Vec::new(),
                next_outgoing: 1,
                next_incoming: 1,
                creation_time: now,
            }),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn store_outgoing(&self, msg_seq_num: u32, msg: MsgBuf) -> anyhow::Result<()> {
        self.db
            .lock()
            .unwrap()
            .outgoing_messages
            .push((msg_seq_num, msg.0));
        Ok(())
    }

    async fn get_messages(&self, begin: u32, end: u32) -> anyhow::Result<Vec<(u32, Vec<u8>)>> {
        let db = self.db.lock().unwrap();
        let mut matches: Vec<_> = db
            .outgoing_messages
            .iter()
            .filter(|(seq, _)| (begin..=end).contains(seq))
            .cloned()
            .collect();
        matches.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(matches)
    }

    async fn get_sequences(&self) -> anyhow::Result<(u32, u32)> {
        let db = self.db.lock().unwrap();
        Ok((db.next_outgoing, db.next_incoming))
    }

    async fn set_sequences(&self, next_outgoing: u32, next_incoming: u32) -> anyhow::Result<()> {
        let mut db = self.db.lock().unwrap();
        db.next_outgoing = next_outgoing;
        db.next_incoming = next_incoming;
        Ok(())
    }

    async fn creation_time(&self) -> anyhow::Result<DateTime<Utc>> {
        Ok(self.db.lock().unwrap().creation_time)
    }

    async fn reset(&self) -> anyhow::Result<()> {
        let mut db = self.db.lock().unwrap();
        db.outgoing_messages.clear();
        db.next_outgoing = 1;
        db.next_incoming = 1;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
