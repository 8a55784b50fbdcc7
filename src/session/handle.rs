use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::{Connection, MessageCounts, SessionState};
use crate::config::PeerConfig;
use crate::message::{cease, Families, Family, Update};

const COMMAND_BUFFER: usize = 64;

/// Correlation id handed out for every queued UPDATE
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why we are closing a session, sent to the peer as a Cease subcode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    AdminShutdown,
    Deconfigured,
    AdminReset,
    ConfigChanged,
}

impl CloseReason {
    pub fn cease_subcode(self) -> u8 {
        match self {
            CloseReason::AdminShutdown => cease::ADMINISTRATIVE_SHUTDOWN,
            CloseReason::Deconfigured => cease::PEER_DECONFIGURED,
            CloseReason::AdminReset => cease::ADMINISTRATIVE_RESET,
            CloseReason::ConfigChanged => cease::OTHER_CONFIGURATION_CHANGE,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            CloseReason::AdminShutdown => "administrative shutdown",
            CloseReason::Deconfigured => "peer de-configured",
            CloseReason::AdminReset => "administrative reset",
            CloseReason::ConfigChanged => "configuration change",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Session is not established")]
    SessionNotEstablished,
    #[error("Address family {0} was not negotiated")]
    UnsupportedAddressFamily(Family),
    #[error("Capability {0} was not negotiated")]
    UnsupportedCapability(String),
    #[error("Unable to encode UPDATE: {0}")]
    Unencodable(String),
}

/// Builds the outbound UPDATE once the session's negotiated capabilities are known
pub type UpdateBuilder = Box<dyn FnOnce(&Negotiated) -> Update + Send>;

pub enum SessionCommand {
    Enqueue {
        family: Family,
        build: UpdateBuilder,
        reply: oneshot::Sender<Result<MessageId, EnqueueError>>,
    },
    RouteRefresh {
        family: Family,
        reply: oneshot::Sender<Result<(), EnqueueError>>,
    },
    /// Inbound TCP connection accepted by the listener
    Incoming(Connection),
    Close(CloseReason),
}

impl fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionCommand::Enqueue { family, .. } => write!(f, "Enqueue({})", family),
            SessionCommand::RouteRefresh { family, .. } => write!(f, "RouteRefresh({})", family),
            SessionCommand::Incoming(connection) => write!(f, "Incoming({})", connection),
            SessionCommand::Close(reason) => write!(f, "Close({})", reason),
        }
    }
}

/// Capabilities in effect once both OPENs are exchanged
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Negotiated {
    pub hold_time: u16,
    pub keepalive: u16,
    pub families: Families,
    pub four_octet_asn: bool,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub graceful_restart: bool,
}

/// Snapshot of a session, published by its task on every change
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub peer: IpAddr,
    pub state: SessionState,
    pub remote_as: u32,
    pub local_as: u32,
    pub router_id: Option<Ipv4Addr>,
    pub negotiated: Option<Negotiated>,
    pub counts: MessageCounts,
    pub established_at: Option<DateTime<Utc>>,
    pub queue_depth: usize,
    pub last_sent_id: Option<MessageId>,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            peer: config.remote_ip,
            state: SessionState::Idle,
            remote_as: config.remote_as,
            local_as: config.local_as,
            router_id: None,
            negotiated: None,
            counts: MessageCounts::new(),
            established_at: None,
            queue_depth: 0,
            last_sent_id: None,
            last_error: None,
        }
    }
}

/// The session task's ends of a handle's channels
pub(crate) struct SessionChannels {
    pub id: Uuid,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub status: watch::Sender<SessionStatus>,
}

/// Cheap, cloneable reference to a running session task
///
/// All interaction goes through the command channel; the task owns the session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    addr: IpAddr,
    config: Arc<PeerConfig>,
    tx: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Handle plus the task's ends of the command and status channels
    pub(crate) fn channel(config: Arc<PeerConfig>) -> (Self, SessionChannels) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(SessionStatus::new(&config));
        let handle = Self {
            id: Uuid::new_v4(),
            addr: config.remote_ip,
            config,
            tx,
            status,
        };
        let channels = SessionChannels {
            id: handle.id,
            commands: rx,
            status: status_tx,
        };
        (handle, channels)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn config(&self) -> &Arc<PeerConfig> {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the published status matches `f`
    pub async fn wait_for<F>(&self, mut f: F) -> Option<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if f(&current) {
                    return Some(current.clone());
                }
            }
            status.changed().await.ok()?;
        }
    }

    /// Same running task, not just the same peer
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.id == other.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the session task has exited
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Queue an UPDATE for transmission
    ///
    /// The state and family checks run inside the session task, so a session
    /// that is not Established never sees its queue touched.
    pub async fn enqueue<F>(&self, family: Family, build: F) -> Result<MessageId, EnqueueError>
    where
        F: FnOnce(&Negotiated) -> Update + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Enqueue {
            family,
            build: Box::new(build),
            reply,
        };
        self.tx
            .send(command)
            .await
            .map_err(|_| EnqueueError::SessionNotEstablished)?;
        response
            .await
            .map_err(|_| EnqueueError::SessionNotEstablished)?
    }

    /// Ask the peer to re-advertise `family`
    pub async fn route_refresh(&self, family: Family) -> Result<(), EnqueueError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SessionCommand::RouteRefresh { family, reply })
            .await
            .map_err(|_| EnqueueError::SessionNotEstablished)?;
        response
            .await
            .map_err(|_| EnqueueError::SessionNotEstablished)?
    }

    /// Hand an accepted connection to the task
    ///
    /// Returns false (dropping the connection) if the task had already exited.
    pub async fn incoming(&self, connection: Connection) -> bool {
        self.tx
            .send(SessionCommand::Incoming(connection))
            .await
            .is_ok()
    }

    /// Returns false if the task had already exited
    pub async fn close(&self, reason: CloseReason) -> bool {
        self.tx.send(SessionCommand::Close(reason)).await.is_ok()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Session {} state={}>", self.addr, self.state())
    }
}
