pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::mem::MsgBuf;

/// Persists outbound messages by sequence number and the pair of sequence
/// counters, so a session can service ResendRequests and survive restarts.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn store_outgoing(&self, msg_seq_num: u32, msg: MsgBuf) -> anyhow::Result<()>;

    /// Persisted outbound messages with sequence numbers in `begin..=end`,
    /// most recent first.
    async fn get_messages(&self, begin: u32, end: u32) -> anyhow::Result<Vec<(u32, Vec<u8>)>>;

    async fn get_sequences(&self) -> anyhow::Result<(u32, u32)>;

    async fn set_sequences(&self, next_outgoing: u32, next_incoming: u32) -> anyhow::Result<()>;

    async fn creation_time(&self) -> anyhow::Result<DateTime<Utc>>;

    /// Zeroes both sequence counters and clears persisted messages.
    async fn reset(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;
}
