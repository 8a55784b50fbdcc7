use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use super::peer::Peer;
use super::{CloseReason, Connection, Connector, SessionHandle, SessionState};
use crate::config::{PeerConfig, ServerConfig};
use crate::registry::{PeerRegistry, RegistryError};

/// Owns the set of configured peers: starts a task per peer, hands inbound
/// connections to them, and applies config reloads
pub struct SessionManager {
    config: Mutex<Arc<ServerConfig>>,
    registry: PeerRegistry,
    connector: Arc<dyn Connector>,
}

impl SessionManager {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: PeerRegistry,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            registry,
            connector,
        }
    }

    /// Open a session for every enabled peer
    pub async fn start(&self) {
        let config = Arc::clone(&*self.config.lock().await);
        for peer in config.peers.iter().filter(|p| p.enabled) {
            if let Err(err) = self.open_session_with(&config, Arc::clone(peer)).await {
                warn!("Unable to start session for {}: {}", peer.remote_ip, err);
            }
        }
    }

    /// Start a session task for `peer_config` and register it
    pub async fn open_session(
        &self,
        peer_config: Arc<PeerConfig>,
    ) -> Result<SessionHandle, RegistryError> {
        let config = Arc::clone(&*self.config.lock().await);
        self.open_session_with(&config, peer_config).await
    }

    async fn open_session_with(
        &self,
        config: &ServerConfig,
        peer_config: Arc<PeerConfig>,
    ) -> Result<SessionHandle, RegistryError> {
        let addr = peer_config.remote_ip;
        let (handle, channels) = SessionHandle::channel(Arc::clone(&peer_config));
        // Registered before the task runs, so its exit always finds its own entry
        self.registry.register(addr, handle.clone()).await?;
        let peer = Peer::new(
            peer_config,
            channels,
            Arc::clone(&self.connector),
            self.registry.clone(),
            config.reconnect.clone(),
        );
        tokio::spawn(peer.run());
        debug!("Opened session for {}", addr);
        Ok(handle)
    }

    /// Close a session, waiting for its task to send the Cease and exit
    pub async fn close_session(&self, handle: &SessionHandle, reason: CloseReason) {
        info!("Closing session with {}: {}", handle.addr(), reason);
        if handle.close(reason).await {
            handle.closed().await;
        }
    }

    pub fn get_state(&self, handle: &SessionHandle) -> SessionState {
        handle.state()
    }

    /// Accept inbound BGP connections until the listener fails
    pub async fn listen(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => match Connection::from_tcp(stream) {
                    Ok(connection) => self.accept_connection(connection).await,
                    Err(err) => warn!("Error setting up inbound connection: {}", err),
                },
                Err(err) => {
                    warn!("Error accepting connection: {}", err);
                }
            }
        }
    }

    /// Hand an inbound connection to its peer's task, dropping unknown peers
    pub async fn accept_connection(&self, connection: Connection) {
        let remote_ip = canonical_ip(connection.peer_addr.ip());
        match self.registry.lookup(remote_ip).await {
            Ok(handle) => {
                debug!("Incoming new connection from {}", remote_ip);
                if !handle.incoming(connection).await {
                    debug!("Session for {} ended before taking its connection", remote_ip);
                }
            }
            Err(_) => warn!(
                "Unexpected connection from {}: Not a configured peer",
                remote_ip
            ),
        }
    }

    /// Reconcile running sessions with a reloaded config
    ///
    /// Removed peers are closed as de-configured, changed peers are restarted,
    /// and new peers are started.
    pub async fn apply_config(&self, new_config: Arc<ServerConfig>) {
        let mut current = self.config.lock().await;
        let mut removed = 0;
        let mut changed = 0;
        let mut added = 0;

        let new_peers: HashSet<IpAddr> = new_config.peers.iter().map(|p| p.remote_ip).collect();
        for old_peer in current.peers.iter() {
            if new_peers.contains(&old_peer.remote_ip) {
                continue;
            }
            removed += 1;
            if let Ok(handle) = self.registry.lookup(old_peer.remote_ip).await {
                self.close_session(&handle, CloseReason::Deconfigured).await;
            }
        }

        for peer in new_config.peers.iter() {
            let running = self.registry.lookup(peer.remote_ip).await.ok();
            match current.peer(peer.remote_ip) {
                Some(old_peer) if old_peer == peer && running.is_some() => continue,
                Some(old_peer) if old_peer != peer => {
                    changed += 1;
                    if let Some(handle) = &running {
                        self.close_session(handle, CloseReason::ConfigChanged).await;
                    }
                }
                Some(_) => (),
                None => added += 1,
            }
            if peer.enabled {
                if let Err(err) = self.open_session_with(&new_config, Arc::clone(peer)).await {
                    warn!("Unable to start session for {}: {}", peer.remote_ip, err);
                }
            }
        }

        info!(
            "Applied config [{} added peers, {} changed peers, {} removed peers]",
            added, changed, removed
        );
        *current = new_config;
    }

    /// Close every session with an administrative shutdown
    pub async fn shutdown(&self) {
        let handles = self.registry.list().await;
        info!("Shutting down {} sessions", handles.len());
        join_all(
            handles
                .iter()
                .map(|handle| self.close_session(handle, CloseReason::AdminShutdown)),
        )
        .await;
    }
}

/// IPv4 peers connecting to a dual-stack listener show up as mapped IPv6
fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        IpAddr::V4(_) => addr,
    }
}
