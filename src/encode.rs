use chrono::{DateTime, Utc};
use std::io::Cursor;
use tokio::io::AsyncWrite;

use crate::checksum::AsyncChecksumWriter;
use crate::fields::tags;
use crate::message::Message;

pub(crate) const SOH: &[u8] = b"\x01";

/// Formats `SendingTime` honoring `timestampPrecision` (0, 3, 6, 9 decimal
/// digits — second/milli/micro/nano). Values outside that set are rejected
/// at settings-build time, not here.
pub fn formatted_time(dt: DateTime<Utc>, precision: u8) -> String {
    match precision {
        0 => dt.format("%Y%m%d-%H:%M:%S").to_string(),
        3 => dt.format("%Y%m%d-%H:%M:%S%.3f").to_string(),
        6 => dt.format("%Y%m%d-%H:%M:%S%.6f").to_string(),
        9 => dt.format("%Y%m%d-%H:%M:%S%.9f").to_string(),
        _ => dt.format("%Y%m%d-%H:%M:%S%.3f").to_string(),
    }
}

/// Zero-allocation ASCII rendering of an unsigned integer.
pub struct SerializedInt([u8; 20], usize);

impl SerializedInt {
    pub fn new(mut n: u64) -> Self {
        let mut buf = [0u8; 20];
        let mut i = buf.len();
        if n == 0 {
            i -= 1;
            buf[i] = b'0';
        } else {
            while n > 0 {
                i -= 1;
                buf[i] = b'0' + (n % 10) as u8;
                n /= 10;
            }
        }
        let len = buf.len() - i;
        buf.copy_within(i.., 0);
        SerializedInt(buf, len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..self.1]
    }
}

/// Builds a single outbound message: fixed preamble (`8=`/`9=`) plus a
/// growable body, with the checksum trailer appended when finalized.
pub struct MessageBuilder {
    preamble: Cursor<[u8; 32]>,
    msg_type: char,
    main_buffer: Cursor<Vec<u8>>,
}

impl MessageBuilder {
    pub fn new(begin_string: &str, msg_type: char) -> Self {
        let mut preamble = Cursor::new([0u8; 32]);
        std::io::Write::write_all(&mut preamble, format!("8={begin_string}\x019=").as_bytes())
            .expect("preamble fits in 32 bytes");
        MessageBuilder {
            preamble,
            msg_type,
            main_buffer: Cursor::new(Vec::new()),
        }
    }

    pub fn push(&mut self, tag: u32, value: &[u8]) {
        std::io::Write::write_all(&mut self.main_buffer, format!("{tag}=").as_bytes()).unwrap();
        std::io::Write::write_all(&mut self.main_buffer, value).unwrap();
        std::io::Write::write_all(&mut self.main_buffer, SOH).unwrap();
    }

    pub fn push_str(&mut self, tag: u32, value: &str) {
        self.push(tag, value.as_bytes());
    }

    pub fn msg_type(&self) -> char {
        self.msg_type
    }

    /// BodyLength: bytes written to main_buffer, plus the `35=<msg_type>\x01`
    /// field this builder writes itself during `build_async`.
    fn body_len(&self) -> usize {
        self.main_buffer.position() as usize + format!("35={}\x01", self.msg_type).len()
    }

    pub async fn build_async<W: AsyncWrite + Unpin>(
        &self,
        sink: W,
        msg_seq_num: u32,
        additional_headers: &AdditionalHeaders,
        sending_time: DateTime<Utc>,
        timestamp_precision: u8,
    ) -> std::io::Result<()> {
        let mut w = AsyncChecksumWriter::new(sink);
        let preamble = &self.preamble.get_ref()[..self.preamble.position() as usize];
        w.write_all(preamble).await?;

        let header_fields_len = additional_headers.len()
            + format!("52={}\x01", formatted_time(sending_time, timestamp_precision)).len()
            + format!("34={msg_seq_num}\x01").len();
        let body_len = self.body_len() + header_fields_len;
        w.write_all(body_len.to_string().as_bytes()).await?;
        w.write_all(SOH).await?;

        w.write_all(format!("35={}\x01", self.msg_type).as_bytes()).await?;
        w.write_all(format!("34={msg_seq_num}\x01").as_bytes()).await?;
        additional_headers
            .write_all(&mut w, sending_time, timestamp_precision)
            .await?;
        w.write_all(&self.main_buffer.get_ref()[..self.main_buffer.position() as usize])
            .await?;

        w.write_all(format!("10={:03}\x01", w.checksum()).as_bytes()).await?;
        w.flush().await?;
        Ok(())
    }
}

/// Builds a `MessageBuilder` from a `Message` tag bag, carrying over every
/// field except the ones `build_async`/`AdditionalHeaders` already own
/// (BeginString, BodyLength, MsgType, MsgSeqNum, SenderCompID, TargetCompID,
/// SendingTime, CheckSum). Lets admin handlers construct a reply as a
/// `Message` — the same shape `Application::to_admin` mutates — and then
/// hand it to the wire encoder without a second representation.
pub fn encode_message(msg: &Message, begin_string: &str) -> MessageBuilder {
    let msg_type = msg.get_char(tags::MsgType).unwrap_or('0');
    let mut builder = MessageBuilder::new(begin_string, msg_type);
    for (&tag, value) in msg.iter() {
        if matches!(
            tag,
            t if t == tags::BeginString
                || t == tags::BodyLength
                || t == tags::MsgType
                || t == tags::MsgSeqNum
                || t == tags::SenderCompID
                || t == tags::TargetCompID
                || t == tags::SendingTime
                || t == tags::CheckSum
        ) {
            continue;
        }
        builder.push(tag, value);
    }
    builder
}

/// SenderCompID/TargetCompID (and, for FIXT.1.1 sessions, DefaultApplVerID)
/// split around where `SendingTime` sorts by tag number, so `build_async`
/// can splice the timestamp in between without re-sorting on every send.
pub struct AdditionalHeaders {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl AdditionalHeaders {
    pub fn new(fields: Vec<(u32, Vec<u8>)>) -> Self {
        let mut prefix = Vec::new();
        let mut suffix = Vec::new();
        for (tag, value) in fields {
            let dest = if tag < tags::SendingTime {
                &mut prefix
            } else {
                &mut suffix
            };
            dest.extend(format!("{tag}=").into_bytes());
            dest.extend(value);
            dest.extend(SOH);
        }
        AdditionalHeaders { prefix, suffix }
    }

    pub fn comp_ids(sender_comp_id: &str, target_comp_id: &str) -> Self {
        Self::new(vec![
            (tags::SenderCompID, sender_comp_id.as_bytes().to_vec()),
            (tags::TargetCompID, target_comp_id.as_bytes().to_vec()),
        ])
    }

    async fn write_all<W: AsyncWrite + Unpin>(
        &self,
        w: &mut AsyncChecksumWriter<W>,
        sending_time: DateTime<Utc>,
        precision: u8,
    ) -> std::io::Result<()> {
        w.write_all(&self.prefix).await?;
        w.write_all(format!("52={}\x01", formatted_time(sending_time, precision)).as_bytes())
            .await?;
        w.write_all(&self.suffix).await?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.prefix.len() + self.suffix.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_serialized_int() {
        assert_eq!(SerializedInt::new(0).as_bytes(), b"0");
        assert_eq!(SerializedInt::new(123).as_bytes(), b"123");
    }

    #[tokio::test]
    async fn test_builder_produces_valid_message() {
        let mut builder = MessageBuilder::new("FIX.4.2", 'Q');
        builder.push(44, b"fqwe");
        builder.push(88, b"0123456789012345678901234567890123456789012");

        let headers = AdditionalHeaders::comp_ids("", "");
        let mut out = Vec::new();
        builder
            .build_async(&mut out, 1, &headers, DateTime::UNIX_EPOCH, 3)
            .await
            .unwrap();

        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.starts_with("8=FIX.4.2\x019="));
        assert!(rendered.contains("35=Q\x01"));
        assert!(rendered.contains("34=1\x01"));
        assert!(rendered.contains("52=19700101-00:00:00.000\x01"));
        assert!(rendered.ends_with_checksum());
    }

    trait EndsWithChecksum {
        fn ends_with_checksum(&self) -> bool;
    }
    impl EndsWithChecksum for str {
        fn ends_with_checksum(&self) -> bool {
            let bytes = self.as_bytes();
            bytes.len() >= 7 && &bytes[bytes.len() - 7..bytes.len() - 4] == b"10="
        }
    }

    #[test]
    fn test_formatted_time_precisions() {
        let t = Utc.with_ymd_and_hms(2024, 5, 6, 13, 59, 15).unwrap();
        assert_eq!(formatted_time(t, 0), "20240506-13:59:15");
        assert_eq!(formatted_time(t, 3), "20240506-13:59:15.000");
    }

    #[tokio::test]
    async fn test_encode_message_skips_header_and_trailer_tags() {
        let mut msg = Message::new();
        msg.set(tags::MsgType, b"1".to_vec());
        msg.set(tags::MsgSeqNum, b"9".to_vec());
        msg.set(tags::TestReqID, b"TEST".to_vec());
        let builder = encode_message(&msg, "FIX.4.2");
        assert_eq!(builder.msg_type(), '1');

        let headers = AdditionalHeaders::comp_ids("ME", "YOU");
        let mut out = Vec::new();
        builder
            .build_async(&mut out, 9, &headers, DateTime::UNIX_EPOCH, 3)
            .await
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("112=TEST\x01"));
        assert_eq!(rendered.matches("34=9\x01").count(), 1);
    }

    #[test]
    fn test_additional_headers_prefix_suffix_split() {
        let headers = AdditionalHeaders::comp_ids("ME", "YOU");
        assert!(headers.prefix.starts_with(b"49=ME\x01"));
        assert!(headers.prefix[6..].starts_with(b"56=YOU\x01"));
        assert!(headers.suffix.is_empty());
    }
}
