use thiserror::Error;

use crate::fields::SessionRejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbledReason {
    BeginStringIssue,
    BodyLengthIssue,
    MsgTypeIssue,
    ChecksumIssue,
    Other,
}

/// Errors that arise while decoding, validating, or sequencing a single
/// inbound message. Framing/garbling errors never advance a sequence number;
/// session-level violations drive the state machine to Logout + disconnect.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("garbled message: {text} ({reason:?})")]
    Garbled { text: String, reason: GarbledReason },

    #[error("CompID problem: {text}")]
    CompIdMismatch { text: String },

    #[error("SendingTime accuracy problem: {text}")]
    SendingTimeAccuracy { text: String },

    #[error("MsgSeqNum too low, expecting {expected} but received {received}")]
    SeqNumTooLow { expected: u32, received: u32 },

    #[error("required field missing: {tag}")]
    MissingField { tag: u32 },

    #[error("message rejected: {text}")]
    MessageRejected {
        text: String,
        reject_reason: Option<SessionRejectReason>,
        msg_seq_num: u32,
        ref_tag_id: Option<u32>,
        ref_msg_type: Option<char>,
    },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tcp disconnected")]
    TcpDisconnection,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already registered: {0}")]
    AlreadyRegistered(String),
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application declined to send the message")]
    DoNotSend,

    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(char),

    #[error("field not found: {0}")]
    FieldNotFound(u32),

    #[error("incorrect tag value for tag {0}")]
    IncorrectTagValue(u32),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("timestampPrecision must be between 0 and 9, got {0}")]
    InvalidTimestampPrecision(u8),

    #[error("missing required setting: {0}")]
    MissingRequired(&'static str),
}
