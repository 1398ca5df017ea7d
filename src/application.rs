use async_trait::async_trait;

use crate::error::ApplicationError;
use crate::message::Message;
use crate::session_id::SessionID;

/// Upcall sink an embedding application implements to observe and shape
/// session traffic. `toAdmin`/`toApp` may mutate the outbound message in
/// place; `fromAdmin`/`fromApp` may reject it by returning an error.
#[async_trait]
pub trait Application: Send + Sync {
    async fn on_create(&self, session_id: &SessionID);
    async fn on_logon(&self, session_id: &SessionID);
    async fn on_logout(&self, session_id: &SessionID);

    async fn to_admin(&self, msg: &mut Message, session_id: &SessionID);
    async fn from_admin(&self, msg: &Message, session_id: &SessionID) -> Result<(), ApplicationError>;

    async fn to_app(&self, msg: &mut Message, session_id: &SessionID) -> Result<(), ApplicationError>;
    async fn from_app(&self, msg: &Message, session_id: &SessionID) -> Result<(), ApplicationError>;
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingApplication {
        pub(crate) events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Application for RecordingApplication {
        async fn on_create(&self, session_id: &SessionID) {
            self.events.lock().unwrap().push(format!("on_create {session_id}"));
        }
        async fn on_logon(&self, session_id: &SessionID) {
            self.events.lock().unwrap().push(format!("on_logon {session_id}"));
        }
        async fn on_logout(&self, session_id: &SessionID) {
            self.events.lock().unwrap().push(format!("on_logout {session_id}"));
        }
        async fn to_admin(&self, _msg: &mut Message, _session_id: &SessionID) {}
        async fn from_admin(&self, _msg: &Message, _session_id: &SessionID) -> Result<(), ApplicationError> {
            Ok(())
        }
        async fn to_app(&self, _msg: &mut Message, _session_id: &SessionID) -> Result<(), ApplicationError> {
            Ok(())
        }
        async fn from_app(&self, _msg: &Message, _session_id: &SessionID) -> Result<(), ApplicationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recording_application_records_lifecycle() {
        let app = RecordingApplication::default();
        let sid = SessionID::new("FIX.4.2", "ME", "YOU");
        app.on_create(&sid).await;
        app.on_logon(&sid).await;
        assert_eq!(app.events.lock().unwrap().len(), 2);
    }
}
