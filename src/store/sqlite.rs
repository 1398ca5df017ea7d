use async_trait::async_trait;
use chrono::naive::NaiveDateTime;
use chrono::{DateTime, Utc};
use rusqlite::{OpenFlags, OptionalExtension};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio_rusqlite::Connection;

use super::MessageStore;
use crate::mem::MsgBuf;

const SQL_ENTER_WAL_MODE: &str = "PRAGMA journal_mode=WAL;";
const SQL_VACUUM: &str = "VACUUM;";
const SQL_CREATE_OUTGOING_TABLE: &str = "CREATE TABLE IF NOT EXISTS outgoing_messages (key INTEGER PRIMARY KEY AUTOINCREMENT, msg_seq_num INT, message BLOB);";
const SQL_CREATE_SEQUENCES: &str = "CREATE TABLE IF NOT EXISTS sequences (id INTEGER PRIMARY KEY CHECK (id = 0), next_outgoing INTEGER, next_incoming INTEGER, creation_time VARCHAR);";
const SQL_ENSURE_SEQUENCE_ROW: &str = "INSERT INTO sequences (id, next_outgoing, next_incoming, creation_time) SELECT 0, 1, 1, ?1 WHERE NOT EXISTS (SELECT * FROM sequences WHERE id = 0);";
const SQL_INSERT_OUTGOING_MESSAGE: &str =
    "INSERT INTO outgoing_messages (msg_seq_num, message) VALUES (?1, ?2)";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

enum StoreRequest {
    StoreOutgoing(u32, MsgBuf, oneshot::Sender<anyhow::Result<()>>),
    GetMessages(u32, u32, oneshot::Sender<anyhow::Result<Vec<(u32, Vec<u8>)>>>),
    GetSequences(oneshot::Sender<anyhow::Result<(u32, u32)>>),
    SetSequences(u32, u32, oneshot::Sender<anyhow::Result<()>>),
    CreationTime(oneshot::Sender<anyhow::Result<DateTime<Utc>>>),
    Reset(DateTime<Utc>, oneshot::Sender<anyhow::Result<()>>),
    Disconnect(oneshot::Sender<anyhow::Result<()>>),
}

/// SQLite-backed `MessageStore`: an actor owning a `tokio_rusqlite`
/// connection, reached over an unbounded channel (same shape as the
/// teacher's store/log actors).
pub struct SqliteStore {
    sender: mpsc::UnboundedSender<StoreRequest>,
}

impl SqliteStore {
    pub async fn build(path: &Path, now: DateTime<Utc>) -> anyhow::Result<SqliteStore> {
        let conn = Connection::open_with_flags(path, OpenFlags::default()).await?;
        setup(&conn, now).await?;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(req) = receiver.recv().await {
                match req {
                    StoreRequest::StoreOutgoing(seq, msg, reply) => {
                        let _ = reply.send(store_outgoing(&conn, seq, msg).await);
                    }
                    StoreRequest::GetMessages(begin, end, reply) => {
                        let _ = reply.send(get_messages(&conn, begin, end).await);
                    }
                    StoreRequest::GetSequences(reply) => {
                        let _ = reply.send(get_sequences(&conn).await);
                    }
                    StoreRequest::SetSequences(out, inc, reply) => {
                        let _ = reply.send(set_sequences(&conn, out, inc).await);
                    }
                    StoreRequest::CreationTime(reply) => {
                        let _ = reply.send(creation_time(&conn).await);
                    }
                    StoreRequest::Reset(now, reply) => {
                        let _ = reply.send(reset(&conn, now).await);
                    }
                    StoreRequest::Disconnect(reply) => {
                        let resp = vacuum(&conn).await;
                        let _ = reply.send(resp);
                        drop(conn);
                        break;
                    }
                }
            }
        });

        Ok(SqliteStore { sender })
    }

    async fn round_trip<T>(
        &self,
        make_req: impl FnOnce(oneshot::Sender<anyhow::Result<T>>) -> StoreRequest,
    ) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(make_req(tx)).map_err(|_| anyhow::anyhow!("store actor gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("store actor dropped reply"))?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn store_outgoing(&self, msg_seq_num: u32, msg: MsgBuf) -> anyhow::Result<()> {
        self.round_trip(|tx| StoreRequest::StoreOutgoing(msg_seq_num, msg, tx)).await
    }

    async fn get_messages(&self, begin: u32, end: u32) -> anyhow::Result<Vec<(u32, Vec<u8>)>> {
        self.round_trip(|tx| StoreRequest::GetMessages(begin, end, tx)).await
    }

    async fn get_sequences(&self) -> anyhow::Result<(u32, u32)> {
        self.round_trip(StoreRequest::GetSequences).await
    }

    async fn set_sequences(&self, next_outgoing: u32, next_incoming: u32) -> anyhow::Result<()> {
        self.round_trip(|tx| StoreRequest::SetSequences(next_outgoing, next_incoming, tx)).await
    }

    async fn creation_time(&self) -> anyhow::Result<DateTime<Utc>> {
        self.round_trip(StoreRequest::CreationTime).await
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.round_trip(|tx| StoreRequest::Reset(Utc::now(), tx)).await
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.round_trip(StoreRequest::Disconnect).await
    }
}

async fn setup(conn: &Connection, now: DateTime<Utc>) -> anyhow::Result<()> {
    conn.call(move |conn| {
        conn.query_row(SQL_ENTER_WAL_MODE, (), |_| Ok(()))?;
        conn.execute(SQL_CREATE_SEQUENCES, ())?;
        conn.execute(SQL_ENSURE_SEQUENCE_ROW, (now.format(TIME_FORMAT).to_string(),))?;
        conn.execute(SQL_CREATE_OUTGOING_TABLE, ())?;
        Ok(())
    })
    .await
    .map_err(|e: tokio_rusqlite::Error| e.into())
}

async fn vacuum(conn: &Connection) -> anyhow::Result<()> {
    conn.call(|conn| conn.execute(SQL_VACUUM, []))
        .await
        .map(|_| ())
        .map_err(|e| e.into())
}

async fn get_sequences(conn: &Connection) -> anyhow::Result<(u32, u32)> {
    conn.call(|conn| {
        conn.query_row(
            "SELECT next_outgoing, next_incoming FROM sequences WHERE id = 0;",
            (),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
    })
    .await
    .map_err(|e| e.into())
}

async fn set_sequences(conn: &Connection, next_outgoing: u32, next_incoming: u32) -> anyhow::Result<()> {
    conn.call(move |conn| {
        conn.execute(
            "UPDATE sequences SET next_outgoing = ?1, next_incoming = ?2 WHERE id = 0",
            (next_outgoing, next_incoming),
        )
    })
    .await
    .map(|_| ())
    .map_err(|e| e.into())
}

async fn store_outgoing(conn: &Connection, msg_seq_num: u32, msg: MsgBuf) -> anyhow::Result<()> {
    conn.call(move |conn| {
        conn.execute(SQL_INSERT_OUTGOING_MESSAGE, (msg_seq_num, msg.0))
    })
    .await
    .map(|_| ())
    .map_err(|e| e.into())
}

async fn get_messages(conn: &Connection, begin: u32, end: u32) -> anyhow::Result<Vec<(u32, Vec<u8>)>> {
    conn.call(move |conn| -> rusqlite::Result<Vec<(u32, Vec<u8>)>> {
        let mut stmt = conn.prepare(
            "SELECT msg_seq_num, message FROM outgoing_messages WHERE msg_seq_num BETWEEN ?1 AND ?2 ORDER BY msg_seq_num DESC;",
        )?;
        let rows = stmt.query_map([begin, end], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    })
    .await
    .map_err(|e| e.into())
}

async fn creation_time(conn: &Connection) -> anyhow::Result<DateTime<Utc>> {
    let naive: Option<NaiveDateTime> = conn
        .call(|conn| {
            conn.query_row("SELECT creation_time FROM sequences WHERE id = 0;", (), |row| {
                let s: String = row.get(0)?;
                Ok(NaiveDateTime::parse_from_str(&s, TIME_FORMAT).ok())
            })
        })
        .await?;
    naive
        .map(|n| n.and_utc())
        .ok_or_else(|| anyhow::anyhow!("creation_time not set"))
}

async fn reset(conn: &Connection, now: DateTime<Utc>) -> anyhow::Result<()> {
    conn.call(move |conn| {
        conn.execute("DELETE FROM outgoing_messages", ())?;
        conn.execute(
            "UPDATE sequences SET next_outgoing = 1, next_incoming = 1, creation_time = ?1 WHERE id = 0",
            (now.format(TIME_FORMAT).to_string(),),
        )
    })
    .await
    .map(|_| ())
    .map_err(|e| e.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_store_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteStore::build(file.path(), Utc::now()).await.unwrap();
        store.store_outgoing(1, MsgBuf(b"hello".to_vec())).await.unwrap();
        store.set_sequences(2, 1).await.unwrap();
        assert_eq!(store.get_sequences().await.unwrap(), (2, 1));
        let msgs = store.get_messages(1, 1).await.unwrap();
        assert_eq!(msgs, vec![(1, b"hello".to_vec())]);
    }
}
