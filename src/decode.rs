use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use std::collections::HashSet;

use crate::error::{GarbledReason, SessionError};
use crate::fields::{HEADER_FIELDS, TRAILER_FIELDS};
use crate::message::Message;

lazy_static! {
    static ref HEADER_TAGS: HashSet<u32> = HEADER_FIELDS.iter().copied().collect();
    static ref TRAILER_TAGS: HashSet<u32> = TRAILER_FIELDS.iter().copied().collect();
}

const TIME_FORMAT_SHORT: &str = "%Y%m%d-%H:%M:%S";
const TIME_FORMAT_LONG: &str = "%Y%m%d-%H:%M:%S%.f";

/// Callback-driven access to a streamed field as it's decoded, split by
/// header/body/trailer so a caller can validate framing before committing to
/// a full parse. Returning `Ok(false)` from any method stops the scan early.
pub trait ParserCallback<'a> {
    fn header(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError>;
    fn body(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError>;
    fn trailer(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError>;
    fn sequence_num(&self) -> u32;
}

#[derive(Default)]
pub struct NullParserCallback;

impl<'a> ParserCallback<'a> for NullParserCallback {
    fn header(&mut self, _tag: u32, _value: &'a [u8]) -> Result<bool, SessionError> {
        Ok(true)
    }
    fn body(&mut self, _tag: u32, _value: &'a [u8]) -> Result<bool, SessionError> {
        Ok(true)
    }
    fn trailer(&mut self, _tag: u32, _value: &'a [u8]) -> Result<bool, SessionError> {
        Ok(true)
    }
    fn sequence_num(&self) -> u32 {
        0
    }
}

/// Decodes every field directly into a tag-indexed `Message`, regardless of
/// whether it's classified header/body/trailer — the Session only cares
/// about tag identity, not position (see §9's "polymorphism over message
/// content" note).
pub struct MessageCallback {
    pub message: Message,
}

impl MessageCallback {
    pub fn new() -> Self {
        MessageCallback {
            message: Message::new(),
        }
    }
}

impl Default for MessageCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ParserCallback<'a> for MessageCallback {
    fn header(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError> {
        self.message.set(tag, value.to_vec());
        Ok(true)
    }
    fn body(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError> {
        self.message.set(tag, value.to_vec());
        Ok(true)
    }
    fn trailer(&mut self, tag: u32, value: &'a [u8]) -> Result<bool, SessionError> {
        self.message.set(tag, value.to_vec());
        Ok(true)
    }
    fn sequence_num(&self) -> u32 {
        self.message
            .get_u32(crate::fields::tags::MsgSeqNum)
            .unwrap_or(0)
    }
}

fn bytes_to_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Single forward scan over `tag=value\x01` fields, classifying each as
/// header/body/trailer and dispatching to `callbacks`. Does not itself
/// enforce BodyLength or checksum — that's `validate::validate_msg_length` /
/// `checksum::checksum_is_valid`, so `validateLengthAndChecksum=false` can
/// skip those checks without disturbing the parse.
pub fn parse<'a>(msg: &'a [u8], callbacks: &mut impl ParserCallback<'a>) -> Result<(), SessionError> {
    let mut i = 0usize;
    while i < msg.len() {
        let eq = match msg[i..].iter().position(|&b| b == b'=') {
            Some(p) => i + p,
            None => {
                return Err(SessionError::Garbled {
                    text: "field missing '='".to_string(),
                    reason: GarbledReason::Other,
                })
            }
        };
        let tag = bytes_to_u32(&msg[i..eq]).ok_or_else(|| SessionError::Garbled {
            text: "non-numeric tag".to_string(),
            reason: GarbledReason::Other,
        })?;
        let value_start = eq + 1;
        let soh = match msg[value_start..].iter().position(|&b| b == b'\x01') {
            Some(p) => value_start + p,
            None => {
                return Err(SessionError::Garbled {
                    text: "field missing SOH terminator".to_string(),
                    reason: GarbledReason::Other,
                })
            }
        };
        let value = &msg[value_start..soh];

        let keep_going = if HEADER_TAGS.contains(&tag) {
            callbacks.header(tag, value)?
        } else if TRAILER_TAGS.contains(&tag) {
            callbacks.trailer(tag, value)?
        } else {
            callbacks.body(tag, value)?
        };
        if !keep_going {
            return Ok(());
        }
        i = soh + 1;
    }
    Ok(())
}

/// Result of peeking a fixed-size prefix of an inbound message: enough to
/// know BodyLength (and therefore exactly how many more bytes to read off
/// the socket) and, if it happened to already be in the peek, MsgType.
#[derive(Debug, Clone, Copy)]
pub struct ParsedPeek {
    pub msg_type: Option<char>,
    pub body_length: usize,
    pub prefix_len: usize,
}

/// Parses `8=<begin_string>\x019=<body_length>\x01[35=<msg_type>\x01]` off
/// the front of a peeked buffer. `begin_string` is the session's own
/// configured BeginString, not a hardcoded FIX version, since this engine
/// spans FIX 4.0 through 5.0SP2/FIXT.1.1.
pub fn parse_peeked_prefix(peeked: &[u8], begin_string: &str) -> Result<ParsedPeek, SessionError> {
    let prefix = format!("8={begin_string}\x019=");
    if peeked.len() < prefix.len() || peeked[..prefix.len()] != *prefix.as_bytes() {
        return Err(SessionError::Garbled {
            text: "BeginString mismatch or truncated prefix".to_string(),
            reason: GarbledReason::BeginStringIssue,
        });
    }
    let rest = &peeked[prefix.len()..];
    let soh_pos = rest.iter().position(|&b| b == b'\x01').ok_or_else(|| SessionError::Garbled {
        text: "BodyLength field not terminated within peek window".to_string(),
        reason: GarbledReason::BodyLengthIssue,
    })?;
    let body_length = bytes_to_u32(&rest[..soh_pos]).ok_or_else(|| SessionError::Garbled {
        text: "BodyLength is not numeric".to_string(),
        reason: GarbledReason::BodyLengthIssue,
    })? as usize;
    let prefix_len = prefix.len() + soh_pos + 1;

    let msg_type = if peeked.len() >= prefix_len + 3 && peeked[prefix_len..prefix_len + 3] == *b"35=" {
        peeked.get(prefix_len + 3).map(|&b| b as char)
    } else {
        None
    };

    Ok(ParsedPeek {
        msg_type,
        body_length,
        prefix_len,
    })
}

pub fn parse_sending_time(bytes: &[u8]) -> Result<DateTime<Utc>, SessionError> {
    let s = std::str::from_utf8(bytes).map_err(|_| SessionError::MissingField {
        tag: crate::fields::tags::SendingTime,
    })?;
    NaiveDateTime::parse_from_str(s, TIME_FORMAT_SHORT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, TIME_FORMAT_LONG))
        .map(|n| n.and_utc())
        .map_err(|_| SessionError::Garbled {
            text: format!("unparseable SendingTime: {s}"),
            reason: GarbledReason::Other,
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fields::tags;

    #[test]
    fn test_parse_into_message() {
        let raw = b"8=FIX.4.2\x019=49\x0135=Q\x0134=1\x0152=19700101-00:00:00.000\x0144=fqwe\x0188=43\x0110=245\x01";
        let mut cb = MessageCallback::new();
        parse(raw, &mut cb).unwrap();
        assert_eq!(cb.message.get_str(tags::BeginString), Some("FIX.4.2"));
        assert_eq!(cb.message.get_u32(tags::MsgSeqNum), Some(1));
        assert_eq!(cb.message.get_str(tags::CheckSum), Some("245"));
    }

    #[test]
    fn test_parse_peeked_prefix() {
        let peeked = b"8=FIX.4.4\x019=57\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156";
        let parsed = parse_peeked_prefix(peeked, "FIX.4.4").unwrap();
        assert_eq!(parsed.body_length, 57);
        assert_eq!(parsed.msg_type, Some('A'));
    }

    #[test]
    fn test_parse_peeked_prefix_wrong_begin_string() {
        let peeked = b"8=FIX.4.2\x019=57\x01";
        assert!(matches!(
            parse_peeked_prefix(peeked, "FIX.4.4"),
            Err(SessionError::Garbled {
                reason: GarbledReason::BeginStringIssue,
                ..
            })
        ));
    }

    #[test]
    fn test_bytes_to_u32() {
        assert_eq!(bytes_to_u32(b"123"), Some(123));
        assert_eq!(bytes_to_u32(b"12a"), None);
    }

    #[test]
    fn test_parse_sending_time_both_formats() {
        assert!(parse_sending_time(b"20240506-13:59:15").is_ok());
        assert!(parse_sending_time(b"20240506-13:59:15.021").is_ok());
    }
}
