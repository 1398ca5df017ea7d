use std::convert::TryFrom;

/// Tag numbers the session layer itself inspects. Business-level fields
/// belong to an embedding application's own `DataDictionary`, not here.
#[allow(non_upper_case_globals, dead_code)]
pub mod tags {
    pub const BeginString: u32 = 8;
    pub const BodyLength: u32 = 9;
    pub const MsgType: u32 = 35;
    pub const SenderCompID: u32 = 49;
    pub const TargetCompID: u32 = 56;
    pub const MsgSeqNum: u32 = 34;
    pub const SendingTime: u32 = 52;
    pub const OrigSendingTime: u32 = 122;
    pub const PossDupFlag: u32 = 43;
    pub const PossResend: u32 = 97;
    pub const CheckSum: u32 = 10;

    pub const EncryptMethod: u32 = 98;
    pub const HeartBtInt: u32 = 108;
    pub const ResetSeqNumFlag: u32 = 141;
    pub const NextExpectedMsgSeqNum: u32 = 789;
    pub const DefaultApplVerID: u32 = 1137;

    pub const NewSeqNo: u32 = 36;
    pub const GapFillFlag: u32 = 123;

    pub const BeginSeqNo: u32 = 7;
    pub const EndSeqNo: u32 = 16;

    pub const TestReqID: u32 = 112;

    pub const RefSeqNum: u32 = 45;
    pub const RefTagID: u32 = 371;
    pub const RefMsgType: u32 = 372;
    pub const SessionRejectReason: u32 = 373;
    pub const Text: u32 = 58;
    pub const BusinessRejectReason: u32 = 380;
}

/// Tags that belong in the standard header, used to classify fields during
/// decode regardless of where they physically appear in the byte stream.
pub const HEADER_FIELDS: &[u32] = &[
    tags::BeginString,
    tags::BodyLength,
    tags::MsgType,
    tags::SenderCompID,
    tags::TargetCompID,
    tags::MsgSeqNum,
    tags::SendingTime,
    tags::OrigSendingTime,
    tags::PossDupFlag,
    tags::PossResend,
];

pub const TRAILER_FIELDS: &[u32] = &[tags::CheckSum];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Logon,
    Heartbeat,
    TestRequest,
    ResendRequest,
    Reject,
    SequenceReset,
    Logout,
    BusinessMessageReject,
    Application(char),
}

impl MsgType {
    pub fn is_session(&self) -> bool {
        !matches!(self, MsgType::Application(_))
    }

    pub fn is_application(&self) -> bool {
        !self.is_session()
    }

    pub fn as_char(&self) -> char {
        match self {
            MsgType::Logon => 'A',
            MsgType::Heartbeat => '0',
            MsgType::TestRequest => '1',
            MsgType::ResendRequest => '2',
            MsgType::Reject => '3',
            MsgType::SequenceReset => '4',
            MsgType::Logout => '5',
            MsgType::BusinessMessageReject => 'j',
            MsgType::Application(c) => *c,
        }
    }
}

impl From<char> for MsgType {
    fn from(c: char) -> Self {
        match c {
            'A' => MsgType::Logon,
            '0' => MsgType::Heartbeat,
            '1' => MsgType::TestRequest,
            '2' => MsgType::ResendRequest,
            '3' => MsgType::Reject,
            '4' => MsgType::SequenceReset,
            '5' => MsgType::Logout,
            'j' => MsgType::BusinessMessageReject,
            other => MsgType::Application(other),
        }
    }
}

impl TryFrom<&[u8]> for MsgType {
    type Error = ();
    fn try_from(bytes: &[u8]) -> Result<Self, ()> {
        if bytes.len() == 1 {
            Ok(MsgType::from(bytes[0] as char))
        } else {
            std::str::from_utf8(bytes)
                .ok()
                .map(|s| MsgType::Application(s.chars().next().unwrap_or('?')))
                .ok_or(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejectReason {
    InvalidTagNumber,
    RequiredTagMissing,
    TagNotDefinedForThisMessageType,
    UndefinedTag,
    TagSpecifiedWithoutAValue,
    ValueIsIncorrect,
    IncorrectDataFormatForValue,
    DecryptionProblem,
    SignatureProblem,
    CompIdProblem,
    SendingTimeAccuracyProblem,
    InvalidMsgType,
}

impl SessionRejectReason {
    pub fn code(&self) -> u32 {
        match self {
            SessionRejectReason::InvalidTagNumber => 0,
            SessionRejectReason::RequiredTagMissing => 1,
            SessionRejectReason::TagNotDefinedForThisMessageType => 2,
            SessionRejectReason::UndefinedTag => 3,
            SessionRejectReason::TagSpecifiedWithoutAValue => 4,
            SessionRejectReason::ValueIsIncorrect => 5,
            SessionRejectReason::IncorrectDataFormatForValue => 6,
            SessionRejectReason::DecryptionProblem => 7,
            SessionRejectReason::SignatureProblem => 8,
            SessionRejectReason::CompIdProblem => 9,
            SessionRejectReason::SendingTimeAccuracyProblem => 10,
            SessionRejectReason::InvalidMsgType => 11,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            SessionRejectReason::InvalidTagNumber => "Invalid tag number",
            SessionRejectReason::RequiredTagMissing => "Required tag missing",
            SessionRejectReason::TagNotDefinedForThisMessageType => {
                "Tag not defined for this message type"
            }
            SessionRejectReason::UndefinedTag => "Undefined tag",
            SessionRejectReason::TagSpecifiedWithoutAValue => "Tag specified without a value",
            SessionRejectReason::ValueIsIncorrect => "Value is incorrect",
            SessionRejectReason::IncorrectDataFormatForValue => {
                "Incorrect data format for value"
            }
            SessionRejectReason::DecryptionProblem => "Decryption problem",
            SessionRejectReason::SignatureProblem => "Signature problem",
            SessionRejectReason::CompIdProblem => "CompID problem",
            SessionRejectReason::SendingTimeAccuracyProblem => "SendingTime accuracy problem",
            SessionRejectReason::InvalidMsgType => "Invalid MsgType",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessRejectReason {
    Other,
    UnknownId,
    UnknownSecurity,
    UnsupportedMessageType,
    ApplicationNotAvailable,
    ConditionallyRequiredFieldMissing,
    NotAuthorized,
    DeliverToFirmNotAvailable,
}

impl BusinessRejectReason {
    pub fn code(&self) -> u32 {
        match self {
            BusinessRejectReason::Other => 0,
            BusinessRejectReason::UnknownId => 1,
            BusinessRejectReason::UnknownSecurity => 2,
            BusinessRejectReason::UnsupportedMessageType => 3,
            BusinessRejectReason::ApplicationNotAvailable => 4,
            BusinessRejectReason::ConditionallyRequiredFieldMissing => 5,
            BusinessRejectReason::NotAuthorized => 6,
            BusinessRejectReason::DeliverToFirmNotAvailable => 7,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_msg_type_session_vs_application() {
        assert!(MsgType::Logon.is_session());
        assert!(MsgType::Application('D').is_application());
        assert!(!MsgType::Heartbeat.is_application());
    }

    #[test]
    fn test_msg_type_roundtrip() {
        for c in ['A', '0', '1', '2', '3', '4', '5', 'j'] {
            assert_eq!(MsgType::from(c).as_char(), c);
        }
    }

    #[test]
    fn test_session_reject_reason_codes() {
        assert_eq!(SessionRejectReason::CompIdProblem.code(), 9);
        assert_eq!(SessionRejectReason::SendingTimeAccuracyProblem.code(), 10);
    }

    #[test]
    fn test_business_reject_reason_codes() {
        assert_eq!(BusinessRejectReason::Other.code(), 0);
        assert_eq!(BusinessRejectReason::UnsupportedMessageType.code(), 3);
    }
}
