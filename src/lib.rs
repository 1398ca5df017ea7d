//! A FIX session engine: the administrative/session layer of the FIX
//! protocol (FIX 4.0 through 5.0SP2/FIXT.1.1), independent of any particular
//! business message dictionary.
//!
//! ## Terminology
//! * `FIX Connection` -- a single TCP connection carrying one FIX session.
//!   The FIX connection ends with an orderly Logout, but is considered ended
//!   if the TCP connection breaks first.
//! * `FIX Session` -- the conceptual, ordered bidirectional message stream
//!   between two counterparties, identified by a [`SessionID`]. A session can
//!   live across multiple FIX connections (reconnects preserve sequence
//!   numbers unless a reset is requested).
//!
//! ## Layout
//! - [`SessionID`]/[`SessionSettings`] describe who a session is and how it's
//!   configured.
//! - [`Session`] is the protocol state machine: logon, heartbeating, gap
//!   detection, resend/gap-fill, and orderly logout.
//! - [`SessionRegistry`]/[`SessionHandle`] let other tasks address a running
//!   session by identity.
//! - [`Application`]/[`MessageStore`]/[`Responder`]/[`Log`]/[`Clock`] are the
//!   collaborator traits a session is built from, so an embedder can swap in
//!   its own persistence, transport, or logging.
//! - [`engine::SessionDriver`] drives a session's TCP connection end to end.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use fixsession::{
//!     clock::SystemClock, engine::SessionDriver, log::FileLogFactory,
//!     registry::SessionRegistry, session_id::SessionID, settings::SessionSettings,
//!     store::memory::MemoryStore,
//! };
//!
//! # async fn run(application: Arc<dyn fixsession::application::Application>) -> anyhow::Result<()> {
//! let session_id = SessionID::new("FIX.4.2", "ME", "YOU");
//! let settings = SessionSettings::builder(session_id)
//!     .with_store_path("./store".into())
//!     .with_log_dir("./log".into())
//!     .build()?;
//!
//! let registry = SessionRegistry::new();
//! let log_factory = FileLogFactory::new("./log".into());
//! let store = Box::new(MemoryStore::new(chrono::Utc::now()));
//! let clock = Arc::new(SystemClock);
//!
//! let handle = SessionDriver::connect(
//!     "127.0.0.1:9000".parse()?,
//!     settings,
//!     store,
//!     application,
//!     &log_factory,
//!     clock,
//!     registry,
//! )
//! .await?;
//! handle.send_app(fixsession::message::Message::new());
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod checksum;
pub mod clock;
pub mod decode;
pub mod encode;
pub mod engine;
pub mod error;
pub mod fields;
pub mod log;
pub mod mem;
pub mod message;
pub mod registry;
pub mod resend;
pub mod responder;
pub mod session;
pub mod session_id;
pub mod settings;
pub mod state;
pub mod store;
pub mod stream;
pub mod time_range;

pub use application::Application;
pub use clock::Clock;
pub use error::{ApplicationError, RegistryError, SessionError, SettingsError};
pub use log::Log;
pub use message::Message;
pub use registry::{SessionCommand, SessionHandle, SessionRegistry};
pub use responder::Responder;
pub use session::Session;
pub use session_id::SessionID;
pub use settings::{SessionSettings, SessionSettingsBuilder};
pub use store::MessageStore;
pub use time_range::TimeRange;
