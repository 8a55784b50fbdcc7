#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use bgpd_injector::config::{self, PeerConfig};
use bgpd_injector::message::{Capability, Family, Message, Open};
use bgpd_injector::registry::PeerRegistry;
use bgpd_injector::session::{
    Connection, Connector, MessageCodec, SessionHandle, SessionManager, SessionState,
};
use bgpd_injector::ServerConfig;

pub const PEER: &str = "10.0.0.1";
pub const PEER_AS: u32 = 65001;
pub const PEER_ID: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);

/// Hands the session one end of an in-memory pipe per connect, and the
/// test the other end
pub struct DuplexConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, peer: &PeerConfig) -> io::Result<Connection> {
        let (ours, theirs) = duplex(64 * 1024);
        self.streams
            .send(theirs)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "test finished"))?;
        let local: SocketAddr = "10.0.0.254:40000".parse().unwrap();
        Ok(Connection::new(Box::new(ours), local, peer.socket_addr()))
    }
}

pub fn duplex_connector() -> (Arc<DuplexConnector>, mpsc::UnboundedReceiver<DuplexStream>) {
    let (streams, rx) = mpsc::unbounded_channel();
    (Arc::new(DuplexConnector { streams }), rx)
}

const BASE_CONFIG: &str = r#"
    router_id = "1.1.1.1"
    default_as = 65000
"#;

fn peer_config(reconnect: bool, extra: &str) -> Arc<ServerConfig> {
    let toml = format!(
        r#"
        {}
        [reconnect]
        enabled = {}
        initial_backoff = 1

        [[peers]]
        remote_ip = "{}"
        remote_as = {}
        families = ["ipv4 unicast", "ipv6 unicast"]
        {}
        "#,
        BASE_CONFIG, reconnect, PEER, PEER_AS, extra
    );
    Arc::new(config::from_toml(&toml).unwrap())
}

/// Config with one peer (10.0.0.1) and reconnects disabled; `extra` lands in
/// the peer's table
pub fn server_config(extra: &str) -> Arc<ServerConfig> {
    peer_config(false, extra)
}

pub fn reconnecting_config(extra: &str) -> Arc<ServerConfig> {
    peer_config(true, extra)
}

/// Config with one peer whose received messages are written under `dir`
pub fn recording_config(dir: &Path) -> Arc<ServerConfig> {
    let toml = format!(
        r#"
        {}
        [reconnect]
        enabled = false

        [message]
        write_disk = true
        write_dir = "{}"
        write_keepalive = false

        [[peers]]
        remote_ip = "{}"
        remote_as = {}
        families = ["ipv4 unicast", "ipv6 unicast"]
        "#,
        BASE_CONFIG,
        dir.display(),
        PEER,
        PEER_AS
    );
    Arc::new(config::from_toml(&toml).unwrap())
}

pub fn empty_config() -> Arc<ServerConfig> {
    Arc::new(config::from_toml(BASE_CONFIG).unwrap())
}

/// The remote end of a session, speaking BGP over a duplex stream
pub struct FakePeer {
    pub framed: Framed<DuplexStream, MessageCodec>,
}

impl FakePeer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, MessageCodec::new()),
        }
    }

    pub fn open(hold_time: u16) -> Open {
        Open::new(
            PEER_AS,
            hold_time,
            PEER_ID,
            vec![
                Capability::MultiProtocol(Family::IPV4_UNICAST),
                Capability::MultiProtocol(Family::IPV6_UNICAST),
                Capability::RouteRefresh,
                Capability::FourOctetAsn(PEER_AS),
            ],
        )
    }

    pub async fn recv(&mut self) -> Message {
        match timeout(Duration::from_secs(300), self.framed.next()).await {
            Ok(Some(Ok(message))) => message,
            other => panic!("Expected a message, got {:?}", other.map(|m| m.map(|r| r.is_ok()))),
        }
    }

    pub async fn send(&mut self, message: Message) {
        self.framed.send(message).await.unwrap();
    }

    /// Next message that is not a KEEPALIVE
    pub async fn recv_skipping_keepalives(&mut self) -> Message {
        loop {
            match self.recv().await {
                Message::KeepAlive => continue,
                message => return message,
            }
        }
    }

    /// Answer the session's OPEN and bring it to Established
    pub async fn handshake(&mut self, hold_time: u16) -> Open {
        let open = match self.recv().await {
            Message::Open(open) => open,
            other => panic!("Expected OPEN, got {}", other.message_type()),
        };
        self.send(Message::Open(Self::open(hold_time))).await;
        self.framed.codec_mut().set_four_octet_asn(true);
        self.send(Message::KeepAlive).await;
        assert_eq!(self.recv().await, Message::KeepAlive);
        open
    }
}

/// Manager with one peer (10.0.0.1), its sessions connecting over duplex pipes
pub struct Harness {
    pub manager: SessionManager,
    pub registry: PeerRegistry,
    pub streams: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Harness {
    pub async fn start(extra_config: &str) -> Self {
        Self::with_config(server_config(extra_config)).await
    }

    pub async fn with_config(config: Arc<ServerConfig>) -> Self {
        let (connector, streams) = duplex_connector();
        let registry = PeerRegistry::new();
        let manager = SessionManager::new(config, registry.clone(), connector);
        manager.start().await;
        Self {
            manager,
            registry,
            streams,
        }
    }

    pub async fn handle(&self) -> SessionHandle {
        self.registry.lookup(PEER.parse().unwrap()).await.unwrap()
    }

    /// Wait for the session to dial out, and take the remote end
    pub async fn next_peer(&mut self) -> FakePeer {
        let stream = timeout(Duration::from_secs(300), self.streams.recv())
            .await
            .expect("Timed out waiting for a connection")
            .expect("Connector dropped");
        FakePeer::new(stream)
    }

    /// Start and bring the session up, returning the remote end
    pub async fn established(&mut self) -> (SessionHandle, FakePeer) {
        let mut peer = self.next_peer().await;
        peer.handshake(90).await;
        let handle = self.handle().await;
        handle
            .wait_for(|status| status.state == SessionState::Established)
            .await
            .expect("Session ended before Established");
        (handle, peer)
    }
}
