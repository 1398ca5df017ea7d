use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::application::Application;
use crate::clock::Clock;
use crate::decode::{self, MessageCallback};
use crate::encode::{encode_message, AdditionalHeaders, MessageBuilder};
use crate::error::{ApplicationError, SessionError};
use crate::fields::{tags, BusinessRejectReason, MsgType, SessionRejectReason};
use crate::log::Log;
use crate::mem::MsgBuf;
use crate::message::Message;
use crate::resend::Transformer;
use crate::responder::Responder;
use crate::session_id::SessionID;
use crate::settings::SessionSettings;
use crate::state::{Sequences, SessionState};
use crate::store::MessageStore;

/// The session's coarse lifecycle, matching the states a caller can actually
/// observe from outside (`isLoggedOn`, `isEnabled`, ...). Finer distinctions
/// the wire protocol cares about — waiting on a resend, waiting on a test
/// request reply — live as data on `SessionState` (`resend_range`,
/// `test_request_counter`) rather than as states of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    LogonSent,
    LoggedOn,
    LogoutSent,
    Disconnected,
}

/// The administrative state machine for one counterparty connection: logon
/// negotiation, heartbeating, gap detection and resend/gap-fill, and orderly
/// logout. Owns its collaborators exclusively — callers drive it through
/// `on_bytes`/`tick`/`logon`/`logout`/`send_app` one at a time, typically from
/// a single task per session.
pub struct Session {
    settings: SessionSettings,
    store: Box<dyn MessageStore>,
    responder: Arc<dyn Responder>,
    application: Arc<dyn Application>,
    log: Box<dyn Log>,
    clock: Arc<dyn Clock>,
    state: State,
    data: SessionState,
}

impl Session {
    pub async fn new(
        settings: SessionSettings,
        store: Box<dyn MessageStore>,
        responder: Arc<dyn Responder>,
        application: Arc<dyn Application>,
        log: Box<dyn Log>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        let (next_outgoing, next_incoming) = store.get_sequences().await?;
        let creation_time = store.creation_time().await?;
        let now = clock.now();
        let mut data = SessionState::new(Sequences::new(next_outgoing, next_incoming), now);
        data.creation_time = creation_time;
        application.on_create(&settings.session_id).await;
        Ok(Session {
            settings,
            store,
            responder,
            application,
            log,
            clock,
            state: State::Created,
            data,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_logged_on(&self) -> bool {
        self.data.is_logged_on()
    }

    pub fn session_id(&self) -> &SessionID {
        &self.settings.session_id
    }

    pub fn log(&self) -> &dyn Log {
        self.log.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn begin_string(&self) -> &str {
        self.settings.begin_string()
    }

    /// Sub-second `SendingTime` digits are only meaningful for FIX.4.2+ and
    /// FIXT.1.1; FIX.4.0/4.1 sessions always render whole seconds regardless
    /// of the configured `timestampPrecision`.
    fn effective_timestamp_precision(&self) -> u8 {
        match self.begin_string() {
            "FIX.4.0" | "FIX.4.1" => 0,
            _ => self.settings.timestamp_precision,
        }
    }

    /// Resets the sequence counters and clears the out-of-order queue,
    /// equivalent to `ResetSeqNumFlag=Y` but driven from outside the handshake.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.store.reset().await?;
        self.data.sequences.reset();
        self.data.queue.clear();
        self.data.resend_range = None;
        Ok(())
    }

    /// Reapplies `SessionSettings.refreshOnLogon`-style bookkeeping: reloads
    /// sequence numbers from the store without otherwise disturbing state.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        let (next_outgoing, next_incoming) = self.store.get_sequences().await?;
        self.data.sequences = Sequences::new(next_outgoing, next_incoming);
        Ok(())
    }

    // ---- outbound ----------------------------------------------------

    pub async fn logon(&mut self) -> Result<(), SessionError> {
        if self.settings.reset_on_logon {
            self.reset().await?;
        }
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::Logon.as_char() as u8]);
        msg.set(tags::EncryptMethod, b"0".to_vec());
        msg.set(
            tags::HeartBtInt,
            self.settings.heartbeat_interval.as_secs().to_string().into_bytes(),
        );
        if self.settings.reset_on_logon {
            msg.set(tags::ResetSeqNumFlag, b"Y".to_vec());
        }
        if self.settings.send_next_expected_msg_seq_num {
            msg.set(
                tags::NextExpectedMsgSeqNum,
                self.data.sequences.peek_incoming().to_string().into_bytes(),
            );
        }
        self.application.to_admin(&mut msg, &self.settings.session_id).await;
        self.send_message(msg).await?;
        self.data.sent_logon = true;
        self.state = State::LogonSent;
        Ok(())
    }

    /// Initiates an orderly logout. The session transitions to `Disconnected`
    /// once the peer's Logout acknowledgement arrives or `tick` times it out.
    pub async fn logout(&mut self, reason: Option<String>) -> Result<(), SessionError> {
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::Logout.as_char() as u8]);
        if let Some(text) = &reason {
            msg.set(tags::Text, text.clone().into_bytes());
        }
        self.application.to_admin(&mut msg, &self.settings.session_id).await;
        self.send_message(msg).await?;
        self.data.sent_logout = true;
        self.data.logout_reason = reason;
        self.state = State::LogoutSent;
        Ok(())
    }

    /// Sends an application-level message if the session is logged on,
    /// giving the application a chance to veto via `toApp` (`DoNotSend`).
    pub async fn send_app(&mut self, mut msg: Message) -> Result<bool, SessionError> {
        if !self.is_logged_on() {
            return Ok(false);
        }
        match self.application.to_app(&mut msg, &self.settings.session_id).await {
            Ok(()) => {}
            Err(_) => return Ok(false),
        }
        self.send_message(msg).await?;
        Ok(true)
    }

    async fn send_message(&mut self, msg: Message) -> Result<(), SessionError> {
        let seq_num = self.data.sequences.take_next_outgoing();
        let builder = encode_message(&msg, self.begin_string());
        self.write_builder(&builder, seq_num).await
    }

    async fn write_builder(&mut self, builder: &MessageBuilder, seq_num: u32) -> Result<(), SessionError> {
        let now = self.clock.now();
        let headers =
            AdditionalHeaders::comp_ids(self.settings.sender_comp_id(), self.settings.target_comp_id());
        let mut out = Vec::new();
        builder
            .build_async(&mut out, seq_num, &headers, now, self.effective_timestamp_precision())
            .await?;
        let msg_buf = MsgBuf(out);
        self.log.on_outgoing(&msg_buf[..]).await;
        if self.settings.persist_messages {
            self.store.store_outgoing(seq_num, msg_buf.clone()).await?;
        }
        self.responder.send(&msg_buf).await;
        self.data.last_sent_time = now;
        Ok(())
    }

    /// Retransmits a stored message with `PossDupFlag=Y`/`OrigSendingTime` set,
    /// per `ResendRequest` handling.
    async fn resend_raw(&mut self, raw: Vec<u8>) -> Result<(), SessionError> {
        let now = self.clock.now();
        let transformer = Transformer::new(raw, self.begin_string())?;
        let mut out = Vec::new();
        transformer
            .build_async(&mut out, now, self.effective_timestamp_precision())
            .await?;
        let msg_buf = MsgBuf(out);
        self.log.on_outgoing(&msg_buf[..]).await;
        self.responder.send(&msg_buf).await;
        self.data.last_sent_time = now;
        Ok(())
    }

    async fn send_gap_fill(&mut self, begin: u32, new_seq_no: u32) -> Result<(), SessionError> {
        let seq_num = begin;
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::SequenceReset.as_char() as u8]);
        msg.set(tags::GapFillFlag, b"Y".to_vec());
        msg.set(tags::NewSeqNo, new_seq_no.to_string().into_bytes());
        msg.set(tags::MsgSeqNum, seq_num.to_string().into_bytes());
        let builder = encode_message(&msg, self.begin_string());
        self.write_builder(&builder, seq_num).await
    }

    async fn send_reject(
        &mut self,
        ref_seq_num: u32,
        reason: Option<SessionRejectReason>,
        ref_tag_id: Option<u32>,
        ref_msg_type: Option<char>,
        text: &str,
    ) -> Result<(), SessionError> {
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::Reject.as_char() as u8]);
        msg.set(tags::RefSeqNum, ref_seq_num.to_string().into_bytes());
        if let Some(tag) = ref_tag_id {
            msg.set(tags::RefTagID, tag.to_string().into_bytes());
        }
        if let Some(mt) = ref_msg_type {
            msg.set(tags::RefMsgType, vec![mt as u8]);
        }
        if let Some(r) = reason {
            msg.set(tags::SessionRejectReason, r.code().to_string().into_bytes());
        }
        if !text.is_empty() {
            msg.set(tags::Text, text.as_bytes().to_vec());
        }
        self.send_message(msg).await
    }

    async fn send_business_reject(
        &mut self,
        ref_seq_num: u32,
        ref_msg_type: char,
        reason: BusinessRejectReason,
        text: &str,
    ) -> Result<(), SessionError> {
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::BusinessMessageReject.as_char() as u8]);
        msg.set(tags::RefSeqNum, ref_seq_num.to_string().into_bytes());
        msg.set(tags::RefMsgType, vec![ref_msg_type as u8]);
        msg.set(tags::BusinessRejectReason, reason.code().to_string().into_bytes());
        if !text.is_empty() {
            msg.set(tags::Text, text.as_bytes().to_vec());
        }
        self.send_message(msg).await
    }

    /// Translates an `Application::fromAdmin`/`fromApp` rejection into the
    /// wire reply it implies: an unsupported message type becomes a
    /// BusinessMessageReject, a missing or malformed field becomes a
    /// session-level Reject. `DoNotSend` has no inbound meaning and is
    /// swallowed.
    async fn handle_application_error(
        &mut self,
        err: ApplicationError,
        msg_seq_num: u32,
        ref_msg_type: char,
    ) -> Result<(), SessionError> {
        match err {
            ApplicationError::UnsupportedMessageType(_) => {
                self.send_business_reject(
                    msg_seq_num,
                    ref_msg_type,
                    BusinessRejectReason::UnsupportedMessageType,
                    "unsupported message type",
                )
                .await
            }
            ApplicationError::FieldNotFound(tag) => {
                self.send_reject(
                    msg_seq_num,
                    Some(SessionRejectReason::RequiredTagMissing),
                    Some(tag),
                    Some(ref_msg_type),
                    "field not found",
                )
                .await
            }
            ApplicationError::IncorrectTagValue(tag) => {
                self.send_reject(
                    msg_seq_num,
                    Some(SessionRejectReason::ValueIsIncorrect),
                    Some(tag),
                    Some(ref_msg_type),
                    "incorrect tag value",
                )
                .await
            }
            ApplicationError::DoNotSend => Ok(()),
        }
    }

    async fn send_resend_request(&mut self, begin: u32, end: u32) -> Result<(), SessionError> {
        let mut msg = Message::new();
        msg.set(tags::MsgType, vec![MsgType::ResendRequest.as_char() as u8]);
        msg.set(tags::BeginSeqNo, begin.to_string().into_bytes());
        msg.set(tags::EndSeqNo, end.to_string().into_bytes());
        self.send_message(msg).await
    }

    // ---- inbound -------------------------------------------------------

    /// Decodes and handles one full, framed message already read off the
    /// wire (framing/length/checksum is the transport's job, see `stream`).
    pub async fn on_bytes(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.log.on_incoming(raw).await;
        self.data.last_received_time = now;

        let mut cb = MessageCallback::new();
        decode::parse(raw, &mut cb)?;
        let msg = cb.message;

        let msg_type_char = msg.get_char(tags::MsgType).ok_or(SessionError::MissingField {
            tag: tags::MsgType,
        })?;
        let msg_type = MsgType::from(msg_type_char);
        let msg_seq_num = msg.get_u32(tags::MsgSeqNum).ok_or(SessionError::MissingField {
            tag: tags::MsgSeqNum,
        })?;
        let poss_dup = msg.get_char(tags::PossDupFlag) == Some('Y');

        if self.state == State::Created || self.state == State::LogonSent {
            if msg_type != MsgType::Logon {
                return Err(SessionError::MessageRejected {
                    text: "first message must be Logon".to_string(),
                    reject_reason: Some(SessionRejectReason::InvalidMsgType),
                    msg_seq_num,
                    ref_tag_id: None,
                    ref_msg_type: Some(msg_type_char),
                });
            }
        } else if let Err(e) = self.verify(&msg, msg_type_char, msg_seq_num, now) {
            return self.handle_verify_failure(e).await;
        }

        match self.check_sequence(msg_seq_num, poss_dup) {
            SequenceOutcome::InOrder => {
                self.data.sequences.incr_incoming();
                self.dispatch(msg_type, &msg, msg_seq_num).await?;
                self.drain_queue().await?;
            }
            SequenceOutcome::TooHigh => {
                self.data.queue.insert(msg_seq_num, msg);
                let begin = self.data.sequences.peek_incoming();
                if self.data.resend_range.is_none() || self.settings.send_redundant_resend_requests {
                    self.data.resend_range = Some((begin, msg_seq_num - 1));
                    self.send_resend_request(begin, 0).await?;
                }
            }
            SequenceOutcome::TooLowDuplicate => {
                // already seen, possibly-duplicate resend: nothing to do.
            }
            SequenceOutcome::TooLow => {
                let text = format!(
                    "MsgSeqNum too low, expecting {} but received {}",
                    self.data.sequences.peek_incoming(),
                    msg_seq_num
                );
                self.log.on_event(&text).await;
                self.logout(Some(text)).await?;
                self.disconnect().await;
            }
        }
        Ok(())
    }

    fn verify(
        &self,
        msg: &Message,
        msg_type: char,
        msg_seq_num: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.settings.check_comp_id {
            if msg.get_str(tags::SenderCompID) != Some(self.settings.target_comp_id()) {
                return Err(SessionError::MessageRejected {
                    text: "CompID problem".to_string(),
                    reject_reason: Some(SessionRejectReason::CompIdProblem),
                    msg_seq_num,
                    ref_tag_id: Some(tags::SenderCompID),
                    ref_msg_type: Some(msg_type),
                });
            }
            if msg.get_str(tags::TargetCompID) != Some(self.settings.sender_comp_id()) {
                return Err(SessionError::MessageRejected {
                    text: "CompID problem".to_string(),
                    reject_reason: Some(SessionRejectReason::CompIdProblem),
                    msg_seq_num,
                    ref_tag_id: Some(tags::TargetCompID),
                    ref_msg_type: Some(msg_type),
                });
            }
        }

        let sending_time = msg.get_raw(tags::SendingTime).ok_or(SessionError::MessageRejected {
            text: "SendingTime missing".to_string(),
            reject_reason: Some(SessionRejectReason::RequiredTagMissing),
            msg_seq_num,
            ref_tag_id: Some(tags::SendingTime),
            ref_msg_type: Some(msg_type),
        })?;
        let sending_time = decode::parse_sending_time(sending_time)?;

        if self.settings.check_latency {
            let max_latency = ChronoDuration::from_std(self.settings.max_latency).unwrap_or(ChronoDuration::seconds(120));
            let skew = if now >= sending_time { now - sending_time } else { sending_time - now };
            if skew > max_latency {
                return Err(SessionError::MessageRejected {
                    text: "SendingTime accuracy problem".to_string(),
                    reject_reason: Some(SessionRejectReason::SendingTimeAccuracyProblem),
                    msg_seq_num,
                    ref_tag_id: Some(tags::SendingTime),
                    ref_msg_type: Some(msg_type),
                });
            }
        }

        if msg.get_char(tags::PossDupFlag) == Some('Y') {
            let orig_sending_time = msg.get_raw(tags::OrigSendingTime).ok_or(SessionError::MessageRejected {
                text: "OrigSendingTime missing on PossDup message".to_string(),
                reject_reason: Some(SessionRejectReason::RequiredTagMissing),
                msg_seq_num,
                ref_tag_id: Some(tags::OrigSendingTime),
                ref_msg_type: Some(msg_type),
            })?;
            let orig_sending_time = decode::parse_sending_time(orig_sending_time)?;
            if orig_sending_time > sending_time {
                return Err(SessionError::MessageRejected {
                    text: "OrigSendingTime later than SendingTime on PossDup message".to_string(),
                    reject_reason: Some(SessionRejectReason::SendingTimeAccuracyProblem),
                    msg_seq_num,
                    ref_tag_id: Some(tags::OrigSendingTime),
                    ref_msg_type: Some(msg_type),
                });
            }
        }

        Ok(())
    }

    async fn handle_verify_failure(&mut self, err: SessionError) -> Result<(), SessionError> {
        if let SessionError::MessageRejected {
            text,
            reject_reason,
            msg_seq_num,
            ref_tag_id,
            ref_msg_type,
        } = &err
        {
            self.send_reject(*msg_seq_num, *reject_reason, *ref_tag_id, *ref_msg_type, text)
                .await?;
            self.data.sequences.incr_incoming();
            if matches!(
                reject_reason,
                Some(SessionRejectReason::CompIdProblem) | Some(SessionRejectReason::SendingTimeAccuracyProblem)
            ) {
                self.logout(Some(text.clone())).await?;
                self.disconnect().await;
            }
            Ok(())
        } else {
            Err(err)
        }
    }

    fn check_sequence(&self, msg_seq_num: u32, poss_dup: bool) -> SequenceOutcome {
        let expected = self.data.sequences.peek_incoming();
        if msg_seq_num == expected {
            SequenceOutcome::InOrder
        } else if msg_seq_num > expected {
            SequenceOutcome::TooHigh
        } else if poss_dup {
            SequenceOutcome::TooLowDuplicate
        } else {
            SequenceOutcome::TooLow
        }
    }

    async fn drain_queue(&mut self) -> Result<(), SessionError> {
        loop {
            let expected = self.data.sequences.peek_incoming();
            let Some(queued) = self.data.queue.remove(&expected) else {
                break;
            };
            let msg_type_char = queued.get_char(tags::MsgType).unwrap_or('0');
            let msg_type = MsgType::from(msg_type_char);
            self.data.sequences.incr_incoming();
            self.dispatch(msg_type, &queued, expected).await?;
        }
        if self.data.queue.is_empty() {
            self.data.resend_range = None;
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        msg_type: MsgType,
        msg: &Message,
        msg_seq_num: u32,
    ) -> Result<(), SessionError> {
        match msg_type {
            MsgType::Logon => self.handle_logon(msg).await,
            MsgType::Heartbeat => Ok(()),
            MsgType::TestRequest => self.handle_test_request(msg).await,
            MsgType::ResendRequest => self.handle_resend_request(msg).await,
            MsgType::SequenceReset => self.handle_sequence_reset(msg, msg_seq_num).await,
            MsgType::Logout => self.handle_logout(msg).await,
            MsgType::Reject => {
                if let Err(e) = self.application.from_admin(msg, &self.settings.session_id).await {
                    self.handle_application_error(e, msg_seq_num, MsgType::Reject.as_char()).await?;
                }
                Ok(())
            }
            MsgType::BusinessMessageReject => {
                if let Err(e) = self.application.from_admin(msg, &self.settings.session_id).await {
                    self.handle_application_error(e, msg_seq_num, MsgType::BusinessMessageReject.as_char())
                        .await?;
                }
                Ok(())
            }
            MsgType::Application(c) => {
                if let Err(e) = self.application.from_app(msg, &self.settings.session_id).await {
                    self.handle_application_error(e, msg_seq_num, c).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_logon(&mut self, msg: &Message) -> Result<(), SessionError> {
        if self.state == State::LoggedOn {
            let text = "Logon received while already logged on".to_string();
            self.log.on_event(&text).await;
            self.logout(Some(text)).await?;
            self.disconnect().await;
            return Ok(());
        }
        if msg.get_char(tags::ResetSeqNumFlag) == Some('Y') {
            self.reset().await?;
        }
        let already_sent = self.data.sent_logon;
        self.data.received_logon = true;
        self.data.enabled = true;
        if !already_sent {
            self.logon().await?;
        }
        self.state = State::LoggedOn;
        self.application.on_logon(&self.settings.session_id).await;
        let _ = self.application.from_admin(msg, &self.settings.session_id).await;
        Ok(())
    }

    async fn handle_test_request(&mut self, msg: &Message) -> Result<(), SessionError> {
        let test_req_id = msg.get_raw(tags::TestReqID).map(|v| v.to_vec());
        let mut reply = Message::new();
        reply.set(tags::MsgType, vec![MsgType::Heartbeat.as_char() as u8]);
        if let Some(id) = test_req_id {
            reply.set(tags::TestReqID, id);
        }
        self.send_message(reply).await
    }

    async fn handle_sequence_reset(&mut self, msg: &Message, msg_seq_num: u32) -> Result<(), SessionError> {
        let new_seq_no = msg.get_u32(tags::NewSeqNo).ok_or(SessionError::MissingField {
            tag: tags::NewSeqNo,
        })?;
        let gap_fill = msg.get_char(tags::GapFillFlag) == Some('Y');
        let expected = self.data.sequences.peek_incoming();
        if gap_fill && new_seq_no < expected {
            self.send_reject(
                msg_seq_num,
                Some(SessionRejectReason::ValueIsIncorrect),
                Some(tags::NewSeqNo),
                Some(MsgType::SequenceReset.as_char()),
                "NewSeqNo must not decrease a GapFill SequenceReset",
            )
            .await?;
            return Ok(());
        }
        if new_seq_no < expected {
            self.log
                .on_event(&format!("SequenceReset-Reset lowered incoming seq from {expected} to {new_seq_no}"))
                .await;
        }
        self.data.sequences.set_incoming(new_seq_no);
        if self.data.resend_range.is_some() && self.data.sequences.peek_incoming() >= self.data.queue.keys().next().copied().unwrap_or(u32::MAX) {
            self.data.resend_range = None;
        }
        Ok(())
    }

    async fn handle_resend_request(&mut self, msg: &Message) -> Result<(), SessionError> {
        let begin = msg.get_u32(tags::BeginSeqNo).unwrap_or(1);
        let end_requested = msg.get_u32(tags::EndSeqNo).unwrap_or(0);
        let next_outgoing = self.data.sequences.peek_outgoing();
        let end = if end_requested == 0 {
            next_outgoing.saturating_sub(1)
        } else {
            end_requested
        };
        let stored = self.store.get_messages(begin, end).await?;
        let mut ascending = stored;
        ascending.sort_by_key(|(seq, _)| *seq);

        let mut gap_start: Option<u32> = None;
        let mut cursor = begin;
        for (seq, raw) in ascending {
            if seq > cursor {
                // nothing stored for this span (persistMessages=false, or a
                // gap in the persisted range): fold it into the gap-fill too.
                gap_start.get_or_insert(cursor);
            }
            let msg_type = parse_msg_type(&raw);
            if msg_type.map(|t| t.is_session()).unwrap_or(false) {
                gap_start.get_or_insert(seq);
                cursor = seq + 1;
                continue;
            }
            if let Some(start) = gap_start.take() {
                self.send_gap_fill(start, seq).await?;
            }
            self.resend_raw(raw).await?;
            cursor = seq + 1;
        }
        // Nothing was stored to resend the remainder of the range (most
        // commonly because persistMessages=false stores nothing at all):
        // answer with a single gap-fill up through the next message this
        // side will actually send.
        if cursor <= end {
            gap_start.get_or_insert(cursor);
        }
        if let Some(start) = gap_start {
            self.send_gap_fill(start, next_outgoing).await?;
        }
        Ok(())
    }

    async fn handle_logout(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.data.received_logout = true;
        if self.state == State::LogoutSent {
            self.state = State::Disconnected;
            self.disconnect().await;
        } else {
            let text = msg.get_str(tags::Text).map(|s| s.to_string());
            self.logout(text).await?;
            self.state = State::Disconnected;
            self.disconnect().await;
        }
        self.application.on_logout(&self.settings.session_id).await;
        Ok(())
    }

    // ---- timers --------------------------------------------------------

    /// Drives timeouts and heartbeats; call on a regular interval (e.g. every
    /// second) from the owning task's event loop.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if let Some(window) = &self.settings.session_time {
            if self.is_logged_on() && !window.is_in_range(now) {
                self.logout(Some("session time window closed".to_string())).await?;
                self.disconnect().await;
                return Ok(());
            } else if window.is_in_range(now) && !window.is_in_same_range(self.data.creation_time, now) {
                self.log
                    .on_event("session time window rolled over, resetting sequences")
                    .await;
                self.reset().await?;
                self.data.creation_time = now;
            }
        }

        match self.state {
            State::LogonSent => {
                if now - self.data.last_sent_time > ChronoDuration::from_std(self.settings.logon_timeout).unwrap_or_default() {
                    self.log.on_event("logon timed out").await;
                    self.disconnect().await;
                }
            }
            State::LogoutSent => {
                if now - self.data.last_sent_time > ChronoDuration::from_std(self.settings.logout_timeout).unwrap_or_default() {
                    self.log.on_event("logout timed out waiting for peer ack").await;
                    self.disconnect().await;
                }
            }
            State::LoggedOn => {
                let heartbeat = ChronoDuration::from_std(self.settings.heartbeat_interval).unwrap_or_default();
                if now - self.data.last_sent_time >= heartbeat {
                    let mut hb = Message::new();
                    hb.set(tags::MsgType, vec![MsgType::Heartbeat.as_char() as u8]);
                    self.send_message(hb).await?;
                }

                // heartBtInt x 1.2 before the first TestRequest, then roughly
                // another heartBtInt between successive ones, so two missed
                // TestRequests cost ~2.2-2.4x heartBtInt total, not ~2s.
                let test_request_threshold = heartbeat + heartbeat / 5;
                if now - self.data.last_received_time < heartbeat {
                    self.data.test_request_counter = 0;
                    self.data.last_test_request_time = None;
                } else if now - self.data.last_received_time >= test_request_threshold {
                    let due = match self.data.last_test_request_time {
                        None => true,
                        Some(t) => now - t >= heartbeat,
                    };
                    if due {
                        if self.data.test_request_counter >= 2 {
                            self.log.on_event("no response to TestRequest, disconnecting").await;
                            self.disconnect().await;
                        } else {
                            self.data.test_request_counter += 1;
                            self.data.last_test_request_time = Some(now);
                            let mut tr = Message::new();
                            tr.set(tags::MsgType, vec![MsgType::TestRequest.as_char() as u8]);
                            tr.set(tags::TestReqID, format!("TEST{}", self.data.test_request_counter).into_bytes());
                            self.send_message(tr).await?;
                        }
                    }
                }
            }
            State::Created | State::Disconnected => {}
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.responder.disconnect().await;
        let _ = self.store.disconnect().await;
        self.log.on_event("disconnected").await;
        self.state = State::Disconnected;
        self.data.enabled = false;
        if self.settings.reset_on_disconnect {
            let _ = self.reset().await;
        }
    }
}

enum SequenceOutcome {
    InOrder,
    TooHigh,
    TooLow,
    TooLowDuplicate,
}

fn parse_msg_type(raw: &[u8]) -> Option<MsgType> {
    let pos = raw.windows(4).position(|w| w == b"\x0135=")?;
    let start = pos + 4;
    let end = start + raw[start..].iter().position(|&b| b == b'\x01')?;
    MsgType::try_from(&raw[start..end]).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::application::test::RecordingApplication;
    use crate::clock::test::FixedClock;
    use crate::encode::formatted_time;
    use crate::log::FileLog;
    use crate::responder::test::RecordingResponder;
    use crate::store::memory::MemoryStore;

    fn sid() -> SessionID {
        SessionID::new("FIX.4.2", "ME", "YOU")
    }

    async fn new_session(clock: Arc<FixedClock>) -> (Session, Arc<RecordingResponder>, Arc<RecordingApplication>) {
        let settings = SessionSettings::builder(sid())
            .with_store_path("/tmp/unused.db".into())
            .with_log_dir("/tmp/unused-logs".into())
            .build()
            .unwrap();
        let store = Box::new(MemoryStore::new(clock.now()));
        let responder = Arc::new(RecordingResponder::new());
        let application = Arc::new(RecordingApplication::default());
        let dir = tempfile::tempdir().unwrap();
        let log = Box::new(FileLog::build(dir.path(), &sid()).await.unwrap());
        let session = Session::new(
            settings,
            store,
            responder.clone() as Arc<dyn Responder>,
            application.clone() as Arc<dyn Application>,
            log,
            clock.clone() as Arc<dyn Clock>,
        )
        .await
        .unwrap();
        (session, responder, application)
    }

    fn encode_logon_bytes(sender: &str, target: &str, seq: u32, now: DateTime<Utc>) -> Vec<u8> {
        format!(
            "8=FIX.4.2\x0135=A\x0134={seq}\x0149={sender}\x0156={target}\x0152={}\x0198=0\x01108=30\x0110=000\x01",
            formatted_time(now, 3)
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_logon_handshake_transitions_to_logged_on() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let (mut session, responder, application) = new_session(clock.clone()).await;
        session.logon().await.unwrap();
        assert_eq!(session.state(), State::LogonSent);

        let inbound = encode_logon_bytes("YOU", "ME", 1, clock.now());
        session.on_bytes(&inbound).await.unwrap();

        assert_eq!(session.state(), State::LoggedOn);
        assert!(session.is_logged_on());
        assert_eq!(responder.sent.lock().unwrap().len(), 1);
        assert!(application
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("on_logon")));
    }

    #[tokio::test]
    async fn test_heartbeat_and_test_request_roundtrip() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let (mut session, responder, _app) = new_session(clock.clone()).await;
        session.logon().await.unwrap();
        session
            .on_bytes(&encode_logon_bytes("YOU", "ME", 1, clock.now()))
            .await
            .unwrap();

        let test_req = format!(
            "8=FIX.4.2\x0135=1\x0134=2\x0149=YOU\x0156=ME\x0152={}\x01112=ABC\x0110=000\x01",
            formatted_time(clock.now(), 3)
        );
        session.on_bytes(test_req.as_bytes()).await.unwrap();

        let sent = responder.sent.lock().unwrap();
        let last = sent.last().unwrap();
        let rendered = String::from_utf8_lossy(last);
        assert!(rendered.contains("35=0\x01"));
        assert!(rendered.contains("112=ABC\x01"));
    }

    #[tokio::test]
    async fn test_gap_triggers_resend_request() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let (mut session, responder, _app) = new_session(clock.clone()).await;
        session.logon().await.unwrap();
        session
            .on_bytes(&encode_logon_bytes("YOU", "ME", 1, clock.now()))
            .await
            .unwrap();

        let skipped = format!(
            "8=FIX.4.2\x0135=0\x0134=5\x0149=YOU\x0156=ME\x0152={}\x0110=000\x01",
            formatted_time(clock.now(), 3)
        );
        session.on_bytes(skipped.as_bytes()).await.unwrap();

        assert_eq!(session.data.resend_range, Some((2, 4)));
        let sent = responder.sent.lock().unwrap();
        let last = sent.last().unwrap();
        assert!(String::from_utf8_lossy(last).contains("35=2\x01"));
    }

    #[tokio::test]
    async fn test_seq_too_low_without_poss_dup_disconnects() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let (mut session, responder, _app) = new_session(clock.clone()).await;
        session.logon().await.unwrap();
        session
            .on_bytes(&encode_logon_bytes("YOU", "ME", 1, clock.now()))
            .await
            .unwrap();
        session
            .on_bytes(
                format!(
                    "8=FIX.4.2\x0135=0\x0134=2\x0149=YOU\x0156=ME\x0152={}\x0110=000\x01",
                    formatted_time(clock.now(), 3)
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let stale = format!(
            "8=FIX.4.2\x0135=0\x0134=1\x0149=YOU\x0156=ME\x0152={}\x0110=000\x01",
            formatted_time(clock.now(), 3)
        );
        session.on_bytes(stale.as_bytes()).await.unwrap();
        assert_eq!(session.state(), State::Disconnected);
        assert!(*responder.disconnected.lock().unwrap());
    }

    #[tokio::test]
    async fn test_sequence_reset_gap_fill_advances_incoming() {
        let clock = Arc::new(FixedClock::new(DateTime::UNIX_EPOCH));
        let (mut session, _responder, _app) = new_session(clock.clone()).await;
        session.logon().await.unwrap();
        session
            .on_bytes(&encode_logon_bytes("YOU", "ME", 1, clock.now()))
            .await
            .unwrap();

        let reset = format!(
            "8=FIX.4.2\x0135=4\x0134=2\x0149=YOU\x0156=ME\x0152={}\x01123=Y\x0136=10\x0110=000\x01",
            formatted_time(clock.now(), 3)
        );
        session.on_bytes(reset.as_bytes()).await.unwrap();
        assert_eq!(session.data.sequences.peek_incoming(), 10);
    }
}
