use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::checksum::checksum_is_valid;
use crate::decode::parse_peeked_prefix;
use crate::error::{GarbledReason, SessionError};
use crate::log::Log;
use crate::mem::MsgBuf;

pub const PEEK_LEN: usize = 32;

pub trait TryRead {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error>;
}

impl TryRead for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        <TcpStream>::try_read(self, buf)
    }
}

impl TryRead for tokio::net::tcp::OwnedReadHalf {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        tokio::net::tcp::OwnedReadHalf::try_read(self, buf)
    }
}

/// Fixed-capacity prefix buffer filled by `read_header` before the full
/// message length is known, so the standard header fields can be peeked
/// without an upfront allocation per message.
pub struct HeaderBuf<const N: usize> {
    inner: Box<[u8]>,
    filled_len: usize,
}

impl<const N: usize> Default for HeaderBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HeaderBuf<N> {
    pub fn new() -> Self {
        HeaderBuf {
            inner: vec![0; N].into_boxed_slice(),
            filled_len: 0,
        }
    }
    fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.inner[self.filled_len..]
    }
    fn advance(&mut self, n: usize) {
        self.filled_len = std::cmp::min(self.filled_len + n, self.inner.len());
    }
    fn clear(&mut self) {
        self.filled_len = 0;
    }
    fn is_full(&self) -> bool {
        self.filled_len == N
    }
    fn filled(&self) -> &[u8] {
        &self.inner[0..self.filled_len]
    }
    // O(N) and allocates; only used on the rare garbled-message path.
    fn take(&mut self, n: usize) -> Vec<u8> {
        let n = std::cmp::min(n, self.filled_len);
        let taken = self.inner[..n].to_vec();
        self.inner.rotate_left(n);
        self.filled_len -= n;
        taken
    }
    fn take_until_possible_match(&mut self, target: &[u8]) -> Vec<u8> {
        self.take(position_or_partial_match(self.filled(), target).unwrap_or(self.filled_len))
    }
}

/// Position of the longest prefix of `target` that is also a suffix of `buf`.
fn partial_match_in_suffix(buf: &[u8], target: &[u8]) -> Option<usize> {
    let largest_match_len = std::cmp::min(target.len(), buf.len());
    for prefix_len in (1..=largest_match_len).rev() {
        let suffix_begin = buf.len() - prefix_len;
        if buf[suffix_begin..] == target[..prefix_len] {
            return Some(suffix_begin);
        }
    }
    None
}

fn position_or_partial_match(buf: &[u8], target: &[u8]) -> Option<usize> {
    buf.windows(target.len())
        .position(|window| window == target)
        .or_else(|| partial_match_in_suffix(buf, target))
}

pub async fn read_header<R: AsyncRead + Unpin, const N: usize>(
    r: &mut R,
    buf: &mut HeaderBuf<N>,
) -> Result<(), SessionError> {
    while !buf.is_full() {
        let num_read = r.read(buf.unfilled_mut()).await?;
        buf.advance(num_read);
        if num_read == 0 {
            return Err(SessionError::TcpDisconnection);
        }
    }
    Ok(())
}

/// Scans forward for the start of the next message (`8=<begin_string>`)
/// after a garbled one, so a single bad message doesn't wedge the stream.
async fn skip_to_next_message<const N: usize, T>(
    stream: &mut T,
    header: &mut HeaderBuf<N>,
    message_beginning: &[u8],
) -> Result<Vec<u8>, SessionError>
where
    T: TryRead + AsyncRead + Unpin,
{
    let mut sink = header.take(1);
    while !header.filled().starts_with(message_beginning) {
        sink.extend(header.take_until_possible_match(message_beginning));
        match stream.try_read(header.unfilled_mut()) {
            Ok(0) => break,
            Ok(n) => header.advance(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(sink)
}

/// Reads one complete, framed message: the peeked header buffer already
/// holds `BeginString`/`BodyLength` (and maybe `MsgType`); this reads exactly
/// as many further bytes as `BodyLength` plus the checksum trailer require.
/// On a framing error it resynchronizes by scanning for the next message.
pub async fn read_message<const N: usize, T>(
    r: &mut T,
    header: &mut HeaderBuf<N>,
    log: &dyn Log,
    begin_string: &str,
    validate_checksum: bool,
) -> Result<MsgBuf, SessionError>
where
    T: TryRead + AsyncRead + Unpin,
{
    let message_beginning = format!("8={begin_string}").into_bytes();

    let peek = match parse_peeked_prefix(header.filled(), begin_string) {
        Ok(p) => p,
        Err(e) => {
            let junk = skip_to_next_message(r, header, &message_beginning).await?;
            log.on_event(&format!("discarded garbled prefix: {}", MsgBuf(junk))).await;
            return Err(e);
        }
    };

    const TRAILER_LEN: usize = 7; // "10=XXX\x01"
    let total_len = peek.prefix_len + peek.body_length + TRAILER_LEN;
    let header_len = header.filled().len();
    if total_len < header_len {
        let junk = skip_to_next_message(r, header, &message_beginning).await?;
        log.on_event(&format!("discarded garbled prefix: {}", MsgBuf(junk))).await;
        return Err(SessionError::Garbled {
            text: "BodyLength shorter than already-read header".to_string(),
            reason: GarbledReason::BodyLengthIssue,
        });
    }

    let mut msg_vec = vec![0u8; total_len];
    msg_vec[..header_len].copy_from_slice(header.filled());
    header.clear();
    r.read_exact(&mut msg_vec[header_len..]).await?;

    let msg_buf: MsgBuf = msg_vec.into();
    if &msg_buf[..][total_len - TRAILER_LEN..total_len - 4] != b"10=" {
        let junk = skip_to_next_message(r, header, &message_beginning).await?;
        log.on_event(&format!("discarded garbled prefix: {}", MsgBuf(junk))).await;
        return Err(SessionError::Garbled {
            text: "BodyLength(9) was incorrect".to_string(),
            reason: GarbledReason::BodyLengthIssue,
        });
    }
    if validate_checksum && !checksum_is_valid(&msg_buf) {
        let junk = skip_to_next_message(r, header, &message_beginning).await?;
        log.on_event(&format!("discarded garbled prefix: {}", MsgBuf(junk))).await;
        return Err(SessionError::Garbled {
            text: "checksum invalid".to_string(),
            reason: GarbledReason::ChecksumIssue,
        });
    }

    Ok(msg_buf)
}

pub async fn disconnect(mut stream: TcpStream) {
    let _ = stream.set_linger(Some(std::time::Duration::from_secs(0)));
    let _ = stream.shutdown().await;
    std::mem::drop(stream);
}

pub async fn send_message<W: AsyncWrite + Unpin>(msg_buf: &MsgBuf, w: &mut W) -> Result<(), SessionError> {
    w.write_all(&msg_buf[..]).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            SessionError::TcpDisconnection
        } else {
            e.into()
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::io::Cursor;

    impl TryRead for Cursor<&[u8]> {
        fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
            std::io::Read::read(self, buf)
        }
    }

    struct NullLog;
    #[async_trait]
    impl Log for NullLog {
        async fn on_event(&self, _text: &str) {}
        async fn on_incoming(&self, _bytes: &[u8]) {}
        async fn on_outgoing(&self, _bytes: &[u8]) {}
    }

    fn sample_fix42() -> Vec<u8> {
        b"8=FIX.4.2\x019=57\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156=TW\x0198=0\x01108=30\x01141=Y\x0110=003\x01".to_vec()
    }

    #[tokio::test]
    async fn test_read_header_then_message_roundtrip() {
        let raw = sample_fix42();
        let mut cursor = Cursor::new(raw.as_slice());
        let mut header = HeaderBuf::<{ PEEK_LEN }>::new();
        read_header(&mut cursor, &mut header).await.unwrap();

        let log = NullLog;
        let msg = read_message(&mut cursor, &mut header, &log, "FIX.4.2", false)
            .await
            .unwrap();
        assert_eq!(msg.0, raw);
    }

    #[tokio::test]
    async fn test_read_message_rejects_wrong_begin_string() {
        let raw = sample_fix42();
        let mut cursor = Cursor::new(raw.as_slice());
        let mut header = HeaderBuf::<{ PEEK_LEN }>::new();
        read_header(&mut cursor, &mut header).await.unwrap();

        let log = NullLog;
        let err = read_message(&mut cursor, &mut header, &log, "FIX.4.4", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Garbled {
                reason: GarbledReason::BeginStringIssue,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_header_reports_disconnection_on_eof() {
        let mut empty = Cursor::new(b"".as_slice());
        let mut header = HeaderBuf::<{ PEEK_LEN }>::new();
        assert!(matches!(
            read_header(&mut empty, &mut header).await,
            Err(SessionError::TcpDisconnection)
        ));
    }

    #[test]
    fn test_header_buf_take_and_advance() {
        let mut buf = HeaderBuf::<5>::new();
        buf.unfilled_mut()[..3].copy_from_slice(&[1, 2, 3]);
        buf.advance(3);
        assert_eq!(buf.filled(), &[1, 2, 3]);
        assert_eq!(buf.take(1), vec![1]);
        assert_eq!(buf.filled(), &[2, 3]);
    }

    #[test]
    fn test_partial_match_in_suffix() {
        assert_eq!(partial_match_in_suffix(b"xxx8=F", b"8=F"), Some(3));
        assert_eq!(partial_match_in_suffix(b"xxxxx", b"8=F"), None);
    }

    #[tokio::test]
    async fn test_skip_to_next_message_finds_following_message() {
        let raw = b"8=FIX.4.2\x019=5\x01garbage8=FIX.4.2\x01".to_vec();
        let mut cursor = Cursor::new(raw.as_slice());
        let mut header = HeaderBuf::<{ PEEK_LEN }>::new();
        read_header(&mut cursor, &mut header).await.unwrap();

        let junk = skip_to_next_message(&mut cursor, &mut header, b"8=FIX.4.2")
            .await
            .unwrap();
        assert!(!junk.is_empty());
        assert_eq!(header.filled(), b"8=FIX.4.2");
    }
}
