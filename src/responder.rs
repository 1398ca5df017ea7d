use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::mem::MsgBuf;

/// Sends raw bytes to the peer and can be asked to disconnect; kept behind a
/// trait so tests can substitute an in-memory pipe instead of a real socket.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send(&self, msg: &MsgBuf) -> bool;
    async fn disconnect(&self);
}

pub struct TcpResponder {
    write_half: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpResponder {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        TcpResponder {
            write_half: Mutex::new(Some(write_half)),
        }
    }
}

#[async_trait]
impl Responder for TcpResponder {
    async fn send(&self, msg: &MsgBuf) -> bool {
        let mut guard = self.write_half.lock().await;
        match guard.as_mut() {
            Some(w) => w.write_all(&msg[..]).await.is_ok(),
            None => false,
        }
    }

    async fn disconnect(&self) {
        let mut guard = self.write_half.lock().await;
        if let Some(mut w) = guard.take() {
            let _ = w.shutdown().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    pub(crate) struct RecordingResponder {
        pub(crate) sent: StdMutex<Vec<Vec<u8>>>,
        pub(crate) disconnected: StdMutex<bool>,
    }

    impl RecordingResponder {
        pub(crate) fn new() -> Self {
            RecordingResponder {
                sent: StdMutex::new(Vec::new()),
                disconnected: StdMutex::new(false),
            }
        }
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn send(&self, msg: &MsgBuf) -> bool {
            self.sent.lock().unwrap().push(msg[..].to_vec());
            true
        }
        async fn disconnect(&self) {
            *self.disconnected.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn test_recording_responder_captures_sends() {
        let r = RecordingResponder::new();
        r.send(&MsgBuf(b"hi".to_vec())).await;
        assert_eq!(r.sent.lock().unwrap().len(), 1);
        r.disconnect().await;
        assert!(*r.disconnected.lock().unwrap());
    }
}
