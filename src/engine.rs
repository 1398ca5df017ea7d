use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;

use crate::application::Application;
use crate::clock::Clock;
use crate::error::SessionError;
use crate::log::{FileLogFactory, Log};
use crate::registry::{SessionCommand, SessionHandle, SessionRegistry};
use crate::responder::TcpResponder;
use crate::session::{Session, State};
use crate::settings::SessionSettings;
use crate::store::MessageStore;
use crate::stream::{self, HeaderBuf, PEEK_LEN};

/// Default interval the driver ticks the session's timers at. Independent of
/// `heartbeatInterval`, which only sets how long the session itself waits
/// before acting on an elapsed timer.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Splits a freshly connected (or accepted) `TcpStream`, builds the `Session`
/// around its write half as a `TcpResponder`, and hands back the read half
/// for the driver loop to own.
async fn build_session(
    stream: TcpStream,
    settings: SessionSettings,
    store: Box<dyn MessageStore>,
    application: Arc<dyn Application>,
    log_factory: &FileLogFactory,
    clock: Arc<dyn Clock>,
) -> Result<(Session, OwnedReadHalf), SessionError> {
    let session_id = settings.session_id.clone();
    let (read_half, write_half) = stream.into_split();
    let responder = Arc::new(TcpResponder::new(write_half));
    let log = Box::new(log_factory.create(&session_id).await.map_err(SessionError::Store)?);
    let session = Session::new(settings, store, responder, application, log, clock).await?;
    Ok((session, read_half))
}

/// Owns one session's socket, read loop and command inbox. Not a struct with
/// state of its own — `spawn` hands the actual task off to `tokio::spawn` and
/// returns the `SessionHandle` other tasks use to reach it.
pub struct SessionDriver;

impl SessionDriver {
    /// Opens an outbound connection, builds the `Session`, sends the initial
    /// Logon, and spawns the driver task. The returned handle is already
    /// registered in `registry`.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        addr: SocketAddr,
        settings: SessionSettings,
        store: Box<dyn MessageStore>,
        application: Arc<dyn Application>,
        log_factory: &FileLogFactory,
        clock: Arc<dyn Clock>,
        registry: Arc<SessionRegistry>,
    ) -> Result<SessionHandle, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut session, read_half) = build_session(stream, settings, store, application, log_factory, clock).await?;
        session.logon().await?;
        Ok(spawn(session, read_half, registry, DEFAULT_TICK_INTERVAL))
    }

    /// Builds the `Session` around an already-accepted inbound `TcpStream`
    /// and spawns the driver task. The acceptor doesn't send Logon itself —
    /// it waits for the peer's and replies from `Session::handle_logon`.
    #[allow(clippy::too_many_arguments)]
    pub async fn accept(
        stream: TcpStream,
        settings: SessionSettings,
        store: Box<dyn MessageStore>,
        application: Arc<dyn Application>,
        log_factory: &FileLogFactory,
        clock: Arc<dyn Clock>,
        registry: Arc<SessionRegistry>,
    ) -> Result<SessionHandle, SessionError> {
        let (session, read_half) = build_session(stream, settings, store, application, log_factory, clock).await?;
        Ok(spawn(session, read_half, registry, DEFAULT_TICK_INTERVAL))
    }
}

fn spawn(
    mut session: Session,
    read_half: OwnedReadHalf,
    registry: Arc<SessionRegistry>,
    tick_interval: Duration,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(tx);
    let session_id = session.session_id().clone();
    let _ = registry.register(session_id.clone(), handle.clone());

    tokio::spawn(async move {
        run(&mut session, read_half, rx, tick_interval).await;
        registry.remove(&session_id);
    });

    handle
}

async fn run(
    session: &mut Session,
    mut read_half: OwnedReadHalf,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    tick_interval: Duration,
) {
    let mut header = HeaderBuf::<{ PEEK_LEN }>::new();
    let mut ticker = time::interval(tick_interval);
    let begin_string = session.session_id().begin_string().to_string();

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(SessionCommand::SendApp(msg)) => {
                        let _ = session.send_app(msg).await;
                    }
                    Some(SessionCommand::Logout(reason)) => {
                        let _ = session.logout(reason).await;
                    }
                    Some(SessionCommand::Disconnect) | None => {
                        session.disconnect().await;
                    }
                }
            }

            header_result = stream::read_header(&mut read_half, &mut header) => {
                match header_result {
                    Ok(()) => {
                        match stream::read_message(&mut read_half, &mut header, session.log(), &begin_string, true).await {
                            Ok(msg_buf) => {
                                if let Err(e) = session.on_bytes(&msg_buf[..]).await {
                                    session.log().on_event(&format!("error handling message: {e}")).await;
                                }
                            }
                            Err(e) => {
                                session.log().on_event(&format!("framing error: {e}")).await;
                            }
                        }
                    }
                    Err(_) => {
                        session.disconnect().await;
                    }
                }
            }

            _ = ticker.tick() => {
                let now = session.clock().now();
                if let Err(e) = session.tick(now).await {
                    session.log().on_event(&format!("tick error: {e}")).await;
                }
            }
        }

        if session.state() == State::Disconnected {
            break;
        }
    }
}
