use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::config::{PeerConfig, ReconnectConfig};

/// Byte stream a session runs over (TCP in production, in-memory pipes in tests)
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// An established transport connection to a peer
pub struct Connection {
    pub stream: Box<dyn AsyncStream>,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: Box<dyn AsyncStream>, local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            local_addr,
            peer_addr,
        }
    }

    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self::new(Box::new(stream), local_addr, peer_addr))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Connection {} -> {}>", self.local_addr, self.peer_addr)
    }
}

/// Opens outbound connections for active peers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, peer: &PeerConfig) -> io::Result<Connection>;
}

/// Connects over TCP, bound to the peer's `local_addr` when configured
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, peer: &PeerConfig) -> io::Result<Connection> {
        let peer_addr = peer.socket_addr();
        let socket = match peer_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        if let Some(local) = peer.local_addr {
            socket.bind(SocketAddr::new(local, 0))?;
        }
        let stream = timeout(self.timeout, socket.connect(peer_addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Timed out connecting to {}", peer_addr),
                )
            })??;
        Connection::from_tcp(stream)
    }
}

/// Exponential reconnect delays: `initial * 2^attempt`, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_retries: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_retries: Option<u32>) -> Self {
        Self {
            initial,
            max,
            max_retries,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff, config.max_retries)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or None once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.max_retries {
            if self.attempt >= max_retries {
                return None;
            }
        }
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        let delay = self
            .initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max));
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
