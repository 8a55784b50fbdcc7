use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use log::debug;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::session::SessionHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Peer {0} already has a live session")]
    AlreadyRegistered(IpAddr),
    #[error("Peer {0} not found")]
    PeerNotFound(IpAddr),
}

/// Maps peer address to its session handle, shared by the API and the session tasks
#[derive(Clone, Default)]
pub struct PeerRegistry {
    sessions: Arc<RwLock<HashMap<IpAddr, SessionHandle>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if a live session is already registered for `addr`
    pub async fn register(&self, addr: IpAddr, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&addr) {
            if !existing.is_closed() {
                return Err(RegistryError::AlreadyRegistered(addr));
            }
        }
        debug!("Registered session for {}", addr);
        sessions.insert(addr, handle);
        Ok(())
    }

    pub async fn lookup(&self, addr: IpAddr) -> Result<SessionHandle, RegistryError> {
        self.sessions
            .read()
            .await
            .get(&addr)
            .cloned()
            .ok_or(RegistryError::PeerNotFound(addr))
    }

    pub async fn unregister(&self, addr: IpAddr) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&addr)
    }

    /// Remove the entry for `addr` only if it still belongs to session `id`
    pub async fn unregister_if(&self, addr: IpAddr, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&addr) {
            Some(handle) if handle.id() == id => {
                sessions.remove(&addr);
                debug!("Unregistered session for {}", addr);
                true
            }
            _ => false,
        }
    }

    /// All registered sessions, ordered by peer address
    pub async fn list(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> =
            self.sessions.read().await.values().cloned().collect();
        handles.sort_by_key(|h| h.addr());
        handles
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
