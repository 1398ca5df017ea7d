use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::checksum::AsyncChecksumWriter;
use crate::decode::parse_peeked_prefix;
use crate::encode::formatted_time;
use crate::error::{GarbledReason, SessionError};
use crate::fields::MsgType;

const POSS_DUP_FLAG_EQ_Y: &[u8] = b"43=Y\x01";
const ORIG_SENDING_TIME_TAG: &[u8] = b"122=";

/// Rewrites a previously-sent raw message for retransmission: recomputes
/// BodyLength and CheckSum, inserts `PossDupFlag=Y` and `OrigSendingTime`
/// (the original `SendingTime`), and stamps a fresh `SendingTime`.
pub struct Transformer {
    msg: Vec<u8>,
    prefix_len: usize,
    sending_time_start: usize,
    sending_time_end: usize,
    pub msg_type: char,
}

impl Transformer {
    pub fn new(msg: Vec<u8>, begin_string: &str) -> Result<Self, SessionError> {
        let peek = parse_peeked_prefix(&msg, begin_string)?;
        let (sending_time_start, sending_time_end) = sending_time_indices(&msg)?;
        let msg_type = peek.msg_type.ok_or_else(|| SessionError::Garbled {
            text: "stored message missing MsgType".to_string(),
            reason: GarbledReason::MsgTypeIssue,
        })?;
        Ok(Transformer {
            msg,
            prefix_len: peek.prefix_len,
            sending_time_start,
            sending_time_end,
            msg_type,
        })
    }

    pub fn original_sending_time(&self) -> &[u8] {
        &self.msg[self.sending_time_start..self.sending_time_end]
    }

    pub async fn build_async<W: AsyncWrite + Unpin>(
        self,
        sink: W,
        now: DateTime<Utc>,
        timestamp_precision: u8,
    ) -> Result<(), SessionError> {
        let new_sending_time = formatted_time(now, timestamp_precision);
        let orig_sending_time_field_len =
            ORIG_SENDING_TIME_TAG.len() + self.original_sending_time().len() + 1;

        let old_body_len_bytes = &self.msg[self.prefix_len - 1 - digits_before(&self.msg, self.prefix_len)
            ..self.prefix_len - 1];
        let old_body_len: usize = std::str::from_utf8(old_body_len_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SessionError::Garbled {
                text: "could not re-derive BodyLength from stored message".to_string(),
                reason: GarbledReason::BodyLengthIssue,
            })?;

        let added_len = (new_sending_time.len() as isize - self.original_sending_time().len() as isize)
            as i64
            + POSS_DUP_FLAG_EQ_Y.len() as i64
            + orig_sending_time_field_len as i64;
        let new_body_len = (old_body_len as i64 + added_len) as usize;

        let len_field_start = self.prefix_len - 1 - digits_before(&self.msg, self.prefix_len);
        let mut w = AsyncChecksumWriter::new(sink);
        w.write_all(&self.msg[..len_field_start]).await?;
        w.write_all(new_body_len.to_string().as_bytes()).await?;
        w.write_all(b"\x01").await?;

        // fixed fields up to SendingTime, with PossDupFlag inserted right
        // after the standard header block and before SendingTime.
        w.write_all(&self.msg[self.prefix_len..self.sending_time_start]).await?;
        w.write_all(POSS_DUP_FLAG_EQ_Y).await?;
        w.write_all(new_sending_time.as_bytes()).await?;
        w.write_all(b"\x01").await?;
        w.write_all(ORIG_SENDING_TIME_TAG).await?;
        w.write_all(self.original_sending_time()).await?;
        w.write_all(b"\x01").await?;

        let trailer_start = self.msg.len() - 7;
        w.write_all(&self.msg[self.sending_time_end..trailer_start]).await?;
        w.write_all(format!("10={:03}\x01", w.checksum()).as_bytes()).await?;
        w.flush().await?;
        Ok(())
    }
}

/// Counts the ASCII digits of the BodyLength value immediately preceding
/// `prefix_len` (the offset right after its terminating SOH).
fn digits_before(msg: &[u8], prefix_len: usize) -> usize {
    let mut n = 0;
    let mut i = prefix_len.saturating_sub(2);
    while i < msg.len() && msg[i].is_ascii_digit() {
        n += 1;
        if i == 0 {
            break;
        }
        i -= 1;
    }
    n
}

fn sending_time_indices(msg: &[u8]) -> Result<(usize, usize), SessionError> {
    const NEEDLE: &[u8] = b"\x0152=";
    let pos = msg
        .windows(NEEDLE.len())
        .position(|w| w == NEEDLE)
        .ok_or_else(|| SessionError::MissingField {
            tag: crate::fields::tags::SendingTime,
        })?;
    let start = pos + NEEDLE.len();
    let end = start
        + msg[start..]
            .iter()
            .position(|&b| b == b'\x01')
            .ok_or_else(|| SessionError::Garbled {
                text: "SendingTime field not terminated".to_string(),
                reason: GarbledReason::Other,
            })?;
    Ok((start, end))
}

impl TryFrom<(Vec<u8>, &str)> for Transformer {
    type Error = SessionError;
    fn try_from((msg, begin_string): (Vec<u8>, &str)) -> Result<Self, SessionError> {
        Transformer::new(msg, begin_string)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_transformer_inserts_poss_dup_and_orig_sending_time() {
        let original = b"8=FIX.4.2\x019=57\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156=TW\x0198=0\x01108=30\x01141=Y\x0110=003\x01".to_vec();
        let transformer = Transformer::new(original, "FIX.4.2").unwrap();
        assert_eq!(transformer.msg_type, 'A');
        assert_eq!(transformer.original_sending_time(), b"20240506-13:59:15.021");

        let mut out = Vec::new();
        transformer
            .build_async(&mut out, DateTime::UNIX_EPOCH, 3)
            .await
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("43=Y\x01"));
        assert!(rendered.contains("122=20240506-13:59:15.021\x01"));
        assert!(rendered.contains("52=19700101-00:00:00.000\x01"));
    }
}
