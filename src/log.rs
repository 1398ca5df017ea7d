use async_trait::async_trait;
use chrono::offset::Local;
use chrono::{DateTime, Duration};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use std::time::Instant;

use crate::session_id::SessionID;

/// Event/message logging sink for a single session.
#[async_trait]
pub trait Log: Send + Sync {
    async fn on_event(&self, text: &str);
    async fn on_incoming(&self, bytes: &[u8]);
    async fn on_outgoing(&self, bytes: &[u8]);
}

enum LogRequest {
    Line(String, Instant),
    Disconnect(oneshot::Sender<()>),
}

/// File-backed `Log` actor: one log file per session, named
/// `{sender}-{target}.log`, reached over a channel like the teacher's other
/// store/log actors.
pub struct FileLog {
    sender: mpsc::UnboundedSender<LogRequest>,
}

impl FileLog {
    pub async fn build(log_dir: &std::path::Path, session_id: &SessionID) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir
            .join(format!("{}-{}", session_id.sender_comp_id(), session_id.target_comp_id()))
            .with_extension("log");
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let begin_time = Local::now();
            let begin_instant = Instant::now();
            while let Some(req) = receiver.recv().await {
                match req {
                    LogRequest::Line(line, instant) => {
                        let stamp = match Duration::from_std(instant.duration_since(begin_instant)) {
                            Ok(d) => begin_time + d,
                            Err(_) => Local::now(),
                        };
                        if let Err(e) = write_line(&mut file, &line, stamp).await {
                            eprintln!("error writing session log: {e:?}");
                        }
                    }
                    LogRequest::Disconnect(reply) => {
                        let _ = file.flush().await;
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        });

        Ok(FileLog { sender })
    }

    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(LogRequest::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn write_line(
    file: &mut tokio::fs::File,
    line: &str,
    stamp: DateTime<Local>,
) -> std::io::Result<()> {
    file.write_all(format!("{} : {}\n", stamp.format("%Y%m%d-%H:%M:%S%.9f"), line).as_bytes())
        .await?;
    file.flush().await
}

#[async_trait]
impl Log for FileLog {
    async fn on_event(&self, text: &str) {
        let _ = self.sender.send(LogRequest::Line(format!("EVENT {text}"), Instant::now()));
    }
    async fn on_incoming(&self, bytes: &[u8]) {
        let _ = self.sender.send(LogRequest::Line(format!("IN {}", render(bytes)), Instant::now()));
    }
    async fn on_outgoing(&self, bytes: &[u8]) {
        let _ = self.sender.send(LogRequest::Line(format!("OUT {}", render(bytes)), Instant::now()));
    }
}

fn render(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| if b == b'\x01' { '|' } else { b as char }).collect()
}

pub struct FileLogFactory {
    log_dir: PathBuf,
}

impl FileLogFactory {
    pub fn new(log_dir: PathBuf) -> Self {
        FileLogFactory { log_dir }
    }

    pub async fn create(&self, session_id: &SessionID) -> anyhow::Result<FileLog> {
        FileLog::build(&self.log_dir, session_id).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_file_log_writes_and_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let sid = SessionID::new("FIX.4.2", "ME", "YOU");
        let log = FileLog::build(dir.path(), &sid).await.unwrap();
        log.on_event("test event").await;
        log.disconnect().await;
        let path = dir.path().join("ME-YOU.log");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("test event"));
    }
}
