use std::path::PathBuf;
use std::time::Duration;

use crate::error::SettingsError;
use crate::session_id::SessionID;
use crate::time_range::TimeRange;

/// Every configuration option named in the session's configuration table,
/// plus the ambient fields (paths, comp ids) needed to actually run one.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_id: SessionID,
    pub check_comp_id: bool,
    pub check_latency: bool,
    pub max_latency: Duration,
    pub reset_on_logon: bool,
    pub reset_on_logout: bool,
    pub reset_on_disconnect: bool,
    pub refresh_on_logon: bool,
    pub send_redundant_resend_requests: bool,
    pub persist_messages: bool,
    pub validate_length_and_checksum: bool,
    pub send_next_expected_msg_seq_num: bool,
    pub is_non_stop_session: bool,
    pub timestamp_precision: u8,
    pub logon_timeout: Duration,
    pub logout_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub allowed_remote_addresses: Vec<std::net::IpAddr>,
    pub store_path: PathBuf,
    pub log_dir: PathBuf,
    /// `None` for `isNonStopSession`; otherwise the daily window the session
    /// is allowed to be logged on.
    pub session_time: Option<TimeRange>,
}

impl SessionSettings {
    pub fn builder(session_id: SessionID) -> SessionSettingsBuilder {
        SessionSettingsBuilder::new(session_id)
    }

    pub fn sender_comp_id(&self) -> &str {
        self.session_id.sender_comp_id()
    }

    pub fn target_comp_id(&self) -> &str {
        self.session_id.target_comp_id()
    }

    pub fn begin_string(&self) -> &str {
        self.session_id.begin_string()
    }
}

pub struct SessionSettingsBuilder {
    session_id: SessionID,
    check_comp_id: bool,
    check_latency: bool,
    max_latency: Duration,
    reset_on_logon: bool,
    reset_on_logout: bool,
    reset_on_disconnect: bool,
    refresh_on_logon: bool,
    send_redundant_resend_requests: bool,
    persist_messages: bool,
    validate_length_and_checksum: bool,
    send_next_expected_msg_seq_num: bool,
    is_non_stop_session: bool,
    timestamp_precision: u8,
    logon_timeout: Duration,
    logout_timeout: Duration,
    heartbeat_interval: Duration,
    allowed_remote_addresses: Vec<std::net::IpAddr>,
    store_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    session_time: Option<TimeRange>,
}

impl SessionSettingsBuilder {
    pub fn new(session_id: SessionID) -> Self {
        SessionSettingsBuilder {
            session_id,
            check_comp_id: true,
            check_latency: true,
            max_latency: Duration::from_secs(120),
            reset_on_logon: false,
            reset_on_logout: false,
            reset_on_disconnect: false,
            refresh_on_logon: false,
            send_redundant_resend_requests: false,
            persist_messages: true,
            validate_length_and_checksum: true,
            send_next_expected_msg_seq_num: false,
            is_non_stop_session: true,
            timestamp_precision: 3,
            logon_timeout: Duration::from_secs(10),
            logout_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            allowed_remote_addresses: Vec::new(),
            store_path: None,
            log_dir: None,
            session_time: None,
        }
    }

    pub fn with_session_time(mut self, range: TimeRange) -> Self {
        self.session_time = Some(range);
        self
    }

    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    pub fn with_log_dir(mut self, path: PathBuf) -> Self {
        self.log_dir = Some(path);
        self
    }

    pub fn with_heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn with_timestamp_precision(mut self, precision: u8) -> Self {
        self.timestamp_precision = precision;
        self
    }

    pub fn with_max_latency(mut self, d: Duration) -> Self {
        self.max_latency = d;
        self
    }

    pub fn set_check_comp_id(mut self, v: bool) -> Self {
        self.check_comp_id = v;
        self
    }

    pub fn set_check_latency(mut self, v: bool) -> Self {
        self.check_latency = v;
        self
    }

    pub fn set_reset_on_logon(mut self, v: bool) -> Self {
        self.reset_on_logon = v;
        self
    }

    pub fn set_reset_on_logout(mut self, v: bool) -> Self {
        self.reset_on_logout = v;
        self
    }

    pub fn set_reset_on_disconnect(mut self, v: bool) -> Self {
        self.reset_on_disconnect = v;
        self
    }

    pub fn set_persist_messages(mut self, v: bool) -> Self {
        self.persist_messages = v;
        self
    }

    pub fn set_validate_length_and_checksum(mut self, v: bool) -> Self {
        self.validate_length_and_checksum = v;
        self
    }

    pub fn set_is_non_stop_session(mut self, v: bool) -> Self {
        self.is_non_stop_session = v;
        self
    }

    pub fn with_allowed_remote_addresses(mut self, addrs: Vec<std::net::IpAddr>) -> Self {
        self.allowed_remote_addresses = addrs;
        self
    }

    pub fn build(self) -> Result<SessionSettings, SettingsError> {
        if !matches!(self.timestamp_precision, 0 | 3 | 6 | 9) {
            return Err(SettingsError::InvalidTimestampPrecision(self.timestamp_precision));
        }
        let store_path = self.store_path.ok_or(SettingsError::MissingRequired("store_path"))?;
        let log_dir = self.log_dir.ok_or(SettingsError::MissingRequired("log_dir"))?;
        Ok(SessionSettings {
            session_id: self.session_id,
            check_comp_id: self.check_comp_id,
            check_latency: self.check_latency,
            max_latency: self.max_latency,
            reset_on_logon: self.reset_on_logon,
            reset_on_logout: self.reset_on_logout,
            reset_on_disconnect: self.reset_on_disconnect,
            refresh_on_logon: self.refresh_on_logon,
            send_redundant_resend_requests: self.send_redundant_resend_requests,
            persist_messages: self.persist_messages,
            validate_length_and_checksum: self.validate_length_and_checksum,
            send_next_expected_msg_seq_num: self.send_next_expected_msg_seq_num,
            is_non_stop_session: self.is_non_stop_session,
            timestamp_precision: self.timestamp_precision,
            logon_timeout: self.logon_timeout,
            logout_timeout: self.logout_timeout,
            heartbeat_interval: self.heartbeat_interval,
            allowed_remote_addresses: self.allowed_remote_addresses,
            store_path,
            log_dir,
            session_time: self.session_time,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sid() -> SessionID {
        SessionID::new("FIX.4.2", "ME", "YOU")
    }

    #[test]
    fn test_build_requires_store_path_and_log_dir() {
        let err = SessionSettingsBuilder::new(sid()).build().unwrap_err();
        assert!(matches!(err, SettingsError::MissingRequired("store_path")));
    }

    #[test]
    fn test_build_rejects_bad_timestamp_precision() {
        let err = SessionSettingsBuilder::new(sid())
            .with_store_path("/tmp/store.db".into())
            .with_log_dir("/tmp/logs".into())
            .with_timestamp_precision(5)
            .build()
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidTimestampPrecision(5)));
    }

    #[test]
    fn test_build_succeeds_with_defaults() {
        let settings = SessionSettingsBuilder::new(sid())
            .with_store_path("/tmp/store.db".into())
            .with_log_dir("/tmp/logs".into())
            .build()
            .unwrap();
        assert_eq!(settings.max_latency, Duration::from_secs(120));
        assert_eq!(settings.timestamp_precision, 3);
    }
}
