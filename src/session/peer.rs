use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use uuid::Uuid;

use super::handle::SessionChannels;
use super::{
    Backoff, Connection, Connector, Fsm, FsmEvent, MessageCodec, MessageProtocol, Session,
    SessionCommand, SessionError, SessionState, SessionStatus,
};
use crate::config::{PeerConfig, ReconnectConfig};
use crate::message::{cease, ErrorCode, Message, Notification};
use crate::registry::PeerRegistry;

/// Upper bound on writing a final NOTIFICATION to a peer that may not be reading
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// The task that owns one peer: its FSM, connection attempts, and the
/// session running over the current connection
pub(crate) struct Peer {
    addr: IpAddr,
    session_id: Uuid,
    config: Arc<PeerConfig>,
    commands: mpsc::Receiver<SessionCommand>,
    status: watch::Sender<SessionStatus>,
    fsm: Fsm,
    connector: Arc<dyn Connector>,
    registry: PeerRegistry,
    reconnect: ReconnectConfig,
    backoff: Backoff,
    last_error: Option<String>,
}

impl Peer {
    pub(crate) fn new(
        config: Arc<PeerConfig>,
        channels: SessionChannels,
        connector: Arc<dyn Connector>,
        registry: PeerRegistry,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            addr: config.remote_ip,
            session_id: channels.id,
            fsm: Fsm::new(config.passive),
            config,
            commands: channels.commands,
            status: channels.status,
            connector,
            registry,
            backoff: Backoff::from_config(&reconnect),
            reconnect,
            last_error: None,
        }
    }

    /// Run until the peer is closed or gives up reconnecting
    pub(crate) async fn run(mut self) {
        info!(
            "[{}] Starting session (remote_as={}, passive={})",
            self.addr, self.config.remote_as, self.config.passive
        );
        let reason = self.lifecycle().await;
        info!("[{}] Session stopped: {}", self.addr, reason);
        if !reason.is_final() {
            self.last_error = Some(reason.to_string());
        }
        self.fsm.reset();
        self.publish(None);
        self.registry.unregister_if(self.addr, self.session_id).await;
    }

    async fn lifecycle(&mut self) -> SessionError {
        let mut event = self.fsm.start_event();
        loop {
            if let Err(err) = self.fsm.handle_event(event) {
                return err;
            }
            self.publish(None);

            let err = match self.connection().await {
                Ok(connection) => self.run_session(connection).await,
                Err(err) => err,
            };
            if err.is_final() {
                return err;
            }
            warn!("[{}] Session ended: {}", self.addr, err);
            self.last_error = Some(err.to_string());
            self.fsm.reset();
            self.publish(None);

            if !self.reconnect.enabled {
                return err;
            }
            // Passive peers just go back to waiting for the remote side
            if !self.config.passive {
                match self.backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            "[{}] Reconnecting in {}s (attempt {})",
                            self.addr,
                            delay.as_secs(),
                            self.backoff.attempt()
                        );
                        if let Err(err) = self.wait_backoff(delay).await {
                            return err;
                        }
                    }
                    None => {
                        warn!(
                            "[{}] Giving up after {} reconnect attempts",
                            self.addr,
                            self.backoff.attempt()
                        );
                        return err;
                    }
                }
            }
            event = FsmEvent::AutomaticStart;
        }
    }

    /// Get a transport connection for the current state: dial out in Connect,
    /// wait for the listener to hand one over in Active
    async fn connection(&mut self) -> Result<Connection, SessionError> {
        if self.fsm.state() != SessionState::Connect {
            loop {
                let command = self.commands.recv().await;
                if let Some(connection) = self.idle_command(command)? {
                    return Ok(connection);
                }
            }
        }

        let connector = Arc::clone(&self.connector);
        let config = Arc::clone(&self.config);
        let connect = async move { connector.connect(&config).await };
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(connection) => Ok(connection),
                        Err(err) => {
                            self.fsm.handle_event(FsmEvent::TcpConnectionFails)?;
                            Err(err.into())
                        }
                    };
                },
                command = self.commands.recv() => {
                    // An inbound connection wins over our own attempt
                    if let Some(connection) = self.idle_command(command)? {
                        return Ok(connection);
                    }
                },
            }
        }
    }

    /// Handle a command while there is no session to run it on
    fn idle_command(
        &mut self,
        command: Option<SessionCommand>,
    ) -> Result<Option<Connection>, SessionError> {
        use super::EnqueueError::SessionNotEstablished;

        match command {
            Some(SessionCommand::Enqueue { reply, .. }) => {
                let _ = reply.send(Err(SessionNotEstablished));
            }
            Some(SessionCommand::RouteRefresh { reply, .. }) => {
                let _ = reply.send(Err(SessionNotEstablished));
            }
            Some(SessionCommand::Incoming(connection)) => match self.fsm.state() {
                SessionState::Connect | SessionState::Active => {
                    debug!("[{}] Accepted {}", self.addr, connection);
                    return Ok(Some(connection));
                }
                state => debug!("[{}] Dropping {} in {}", self.addr, connection, state),
            },
            Some(SessionCommand::Close(reason)) => {
                self.fsm.handle_event(FsmEvent::ManualStop)?;
                return Err(SessionError::Closed(reason));
            }
            None => {
                return Err(SessionError::Closed(super::CloseReason::AdminShutdown));
            }
        }
        Ok(None)
    }

    async fn wait_backoff(&mut self, delay: Duration) -> Result<(), SessionError> {
        let delay = sleep(delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return Ok(()),
                command = self.commands.recv() => {
                    // Still Idle, so connections are refused
                    self.idle_command(command)?;
                },
            }
        }
    }

    /// Run a session over `connection` until it ends, then notify the peer,
    /// drop to Idle, and close the transport
    async fn run_session(&mut self, connection: Connection) -> SessionError {
        info!(
            "[{}] Connected {} -> {}",
            self.addr, connection.local_addr, connection.peer_addr
        );
        let mut session = Session::new(Arc::clone(&self.config), connection);
        let err = match self.drive(&mut session).await {
            Ok(never) => match never {},
            Err(err) => err,
        };
        if let Some(notification) = err.notification() {
            warn!("[{}] Sending NOTIFICATION: {}", self.addr, notification);
            match timeout(NOTIFICATION_TIMEOUT, session.notify(notification)).await {
                Ok(Ok(())) => (),
                Ok(Err(send_err)) => {
                    debug!("[{}] Unable to send NOTIFICATION: {}", self.addr, send_err)
                }
                Err(_) => debug!("[{}] Timed out sending NOTIFICATION", self.addr),
            }
        }
        self.fsm.reset();
        self.last_error = Some(err.to_string());
        self.publish(Some(&session));
        if session.established_time.is_some() {
            self.backoff.reset();
        }
        drop(session);
        err
    }

    async fn drive(&mut self, session: &mut Session) -> Result<Infallible, SessionError> {
        self.fsm.handle_event(FsmEvent::TcpConnectionConfirmed)?;
        let open = session.create_open();
        session.send_message(Message::Open(open)).await?;

        loop {
            session.flush_outbound().await?;
            self.publish(Some(session));
            trace!("[{}] Hold time: {}", self.addr, session.hold_timer);

            tokio::select! {
                message = session.protocol.next() => match message {
                    // Framed stream is exhausted, remote side closed connection
                    None => {
                        self.fsm.handle_event(FsmEvent::TcpConnectionFails)?;
                        return Err(SessionError::ConnectionClosed);
                    }
                    Some(Ok(message)) => session.process_message(&mut self.fsm, message).await?,
                    Some(Err(err)) => {
                        let err = SessionError::from(err);
                        let event = match &err {
                            SessionError::Malformed(m) if m.code == ErrorCode::UpdateMessage => {
                                FsmEvent::UpdateMessageError
                            }
                            SessionError::Malformed(_) => FsmEvent::MessageError,
                            _ => FsmEvent::TcpConnectionFails,
                        };
                        self.fsm.handle_event(event)?;
                        return Err(err);
                    }
                },
                keepalive = session.hold_timer.should_send_keepalive() => match keepalive {
                    Ok(true) => {
                        self.fsm.handle_event(FsmEvent::KeepaliveTimerExpires)?;
                        session.send_message(Message::KeepAlive).await?;
                    }
                    Ok(false) => (),
                    Err(err) => {
                        self.fsm.handle_event(FsmEvent::HoldTimerExpires)?;
                        return Err(err);
                    }
                },
                command = self.commands.recv() => self.session_command(session, command).await?,
            }
        }
    }

    async fn session_command(
        &mut self,
        session: &mut Session,
        command: Option<SessionCommand>,
    ) -> Result<(), SessionError> {
        match command {
            Some(SessionCommand::Enqueue {
                family,
                build,
                reply,
            }) => {
                let _ = reply.send(session.enqueue(self.fsm.state(), family, build));
            }
            Some(SessionCommand::RouteRefresh { family, reply }) => {
                let _ = reply.send(session.request_refresh(self.fsm.state(), family));
            }
            Some(SessionCommand::Incoming(connection)) => {
                warn!(
                    "[{}] Rejecting {}: session already in {}",
                    self.addr,
                    connection,
                    self.fsm.state()
                );
                reject_connection(connection).await;
            }
            Some(SessionCommand::Close(reason)) => {
                self.fsm.handle_event(FsmEvent::ManualStop)?;
                return Err(SessionError::Closed(reason));
            }
            None => {
                self.fsm.handle_event(FsmEvent::ManualStop)?;
                return Err(SessionError::Closed(super::CloseReason::AdminShutdown));
            }
        }
        Ok(())
    }

    fn publish(&self, session: Option<&Session>) {
        let mut status = SessionStatus::new(&self.config);
        status.state = self.fsm.state();
        status.last_error = self.last_error.clone();
        if let Some(session) = session {
            status.router_id = session.remote_id;
            status.negotiated = session.negotiated.clone();
            status.counts = session.counts.clone();
            status.established_at = session.established_time;
            status.queue_depth = session.outbound.len();
            status.last_sent_id = session.last_sent_id;
        }
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Tell a colliding connection we already have a session, then drop it
async fn reject_connection(connection: Connection) {
    let mut protocol: MessageProtocol = Framed::new(connection.stream, MessageCodec::new());
    let notification = Notification::new(ErrorCode::Cease, cease::CONNECTION_REJECTED);
    let sent = timeout(
        NOTIFICATION_TIMEOUT,
        protocol.send(Message::Notification(notification)),
    )
    .await;
    if !matches!(sent, Ok(Ok(()))) {
        debug!("Unable to reject {}", connection.peer_addr);
    }
}
