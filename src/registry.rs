use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::RegistryError;
use crate::session_id::SessionID;

/// A cheap, cloneable handle to a running session's command channel. The
/// registry never touches a `Session` directly — each session is a single
/// task that owns it exclusively, reached by sending onto this channel.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::UnboundedSender<SessionCommand>,
}

pub enum SessionCommand {
    SendApp(crate::message::Message),
    Logout(Option<String>),
    Disconnect,
}

impl SessionHandle {
    pub fn new(sender: mpsc::UnboundedSender<SessionCommand>) -> Self {
        SessionHandle { sender }
    }

    pub fn send_app(&self, msg: crate::message::Message) -> bool {
        self.sender.send(SessionCommand::SendApp(msg)).is_ok()
    }

    pub fn logout(&self, reason: Option<String>) -> bool {
        self.sender.send(SessionCommand::Logout(reason)).is_ok()
    }

    pub fn disconnect(&self) -> bool {
        self.sender.send(SessionCommand::Disconnect).is_ok()
    }
}

/// Process-wide lookup table of running sessions keyed by `SessionID`, so an
/// inbound connection can be matched to the session it belongs to and an
/// application can address a session by identity alone.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionID, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, session_id: SessionID, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session_id) {
            return Err(RegistryError::AlreadyRegistered(session_id.to_string()));
        }
        sessions.insert(session_id, handle);
        Ok(())
    }

    pub fn remove(&self, session_id: &SessionID) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn lookup(&self, session_id: &SessionID) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Looks up by the canonical `SessionID` string as seen in an inbound
    /// header, reversing sender/target to match against a local registration.
    pub fn lookup_reversed(&self, header: &str) -> Option<SessionHandle> {
        let id = SessionID::parse(header, true)?;
        self.lookup(&id)
    }

    pub fn exists(&self, session_id: &SessionID) -> bool {
        self.sessions.lock().unwrap().contains_key(session_id)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session_ids(&self) -> Vec<SessionID> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    pub fn send_to_target(&self, session_id: &SessionID, msg: crate::message::Message) -> Result<(), RegistryError> {
        let handle = self
            .lookup(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;
        if !handle.send_app(msg) {
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sid(q: &str) -> SessionID {
        SessionID::new("FIX.4.2", "ME", "YOU").with_qualifier(q)
    }

    #[test]
    fn test_register_lookup_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(sid("a"), SessionHandle::new(tx)).unwrap();
        assert!(registry.exists(&sid("a")));
        assert_eq!(registry.num_sessions(), 1);
        registry.remove(&sid("a"));
        assert!(!registry.exists(&sid("a")));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register(sid("a"), SessionHandle::new(tx1)).unwrap();
        let err = registry.register(sid("a"), SessionHandle::new(tx2)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_lookup_reversed_matches_inbound_header() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = SessionID::new("FIX.4.2", "ME", "YOU");
        registry.register(local.clone(), SessionHandle::new(tx)).unwrap();
        let inbound_header = SessionID::new("FIX.4.2", "YOU", "ME").to_string();
        assert!(registry.lookup_reversed(&inbound_header).is_some());
    }

    #[test]
    fn test_send_to_target_not_found() {
        let registry = SessionRegistry::new();
        let err = registry
            .send_to_target(&sid("missing"), crate::message::Message::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::SessionNotFound(_)));
    }
}
