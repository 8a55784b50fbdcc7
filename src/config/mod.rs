mod file;

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::message::{Capability, Families};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("Unable to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Parse a TOML config file and return a ServerConfig
pub fn from_file(path: &str) -> Result<ServerConfig, ConfigError> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    ServerConfig::from_spec(spec)
}

/// Parse TOML config text and return a ServerConfig
pub fn from_toml(contents: &str) -> Result<ServerConfig, ConfigError> {
    let spec = file::ServerConfigSpec::from_toml(contents)?;
    ServerConfig::from_spec(spec)
}

/// A string that is never shown by `Debug` or `Display`
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "****")
    }
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub bind_host: IpAddr,
    pub bind_port: u16,
    pub username: String,
    pub password: Secret,
}

impl ApiConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.bind_port)
    }
}

#[derive(Clone, Debug)]
pub struct BgpConfig {
    pub listen: bool,
    pub listen_host: IpAddr,
    pub listen_port: u16,
    pub connect_timeout: Duration,
}

impl BgpConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.listen_port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
            max_retries: None,
        }
    }
}

/// Where and how received messages are written to disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageConfig {
    pub write_disk: bool,
    pub write_dir: PathBuf,
    /// Bytes per file before rotating
    pub write_msg_max_size: u64,
    pub write_keepalive: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            write_disk: false,
            write_dir: PathBuf::from("data/bgp"),
            write_msg_max_size: 500 * 1024 * 1024,
            write_keepalive: true,
        }
    }
}

#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: Ipv4Addr,
    pub default_as: u32,
    pub api: ApiConfig,
    pub bgp: BgpConfig,
    pub reconnect: ReconnectConfig,
    pub message: MessageConfig,
    pub peers: Vec<Arc<PeerConfig>>,
}

/// In-Memory Server representation of a Peer config
///   Has missing PeerConfigSpec items defaulted to Server values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub remote_ip: IpAddr,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_router_id: Ipv4Addr,
    pub local_addr: Option<IpAddr>,
    pub enabled: bool,
    pub passive: bool,
    pub hold_timer: u16,
    pub dest_port: u16,
    pub families: Families,
    pub four_octet_asn: bool,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub graceful_restart: bool,
    pub graceful_restart_time: u16,
    pub message: MessageConfig,
}

impl PeerConfig {
    /// Peer config with defaults, handy for building peers programmatically
    pub fn new(remote_ip: IpAddr, remote_as: u32, local_as: u32, local_router_id: Ipv4Addr) -> Self {
        Self {
            remote_ip,
            remote_as,
            local_as,
            local_router_id,
            local_addr: None,
            enabled: true,
            passive: false,
            hold_timer: 180,
            dest_port: 179,
            families: Families::new(vec![crate::message::Family::IPV4_UNICAST]),
            four_octet_asn: true,
            route_refresh: true,
            enhanced_route_refresh: false,
            graceful_restart: false,
            graceful_restart_time: 120,
            message: MessageConfig::default(),
        }
    }

    // Is this an eBGP session
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_ip, self.dest_port)
    }

    /// Capabilities to advertise in our OPEN
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities: Vec<Capability> = self
            .families
            .iter()
            .map(|family| Capability::MultiProtocol(*family))
            .collect();
        if self.route_refresh {
            capabilities.push(Capability::RouteRefresh);
        }
        if self.enhanced_route_refresh {
            capabilities.push(Capability::EnhancedRouteRefresh);
        }
        if self.graceful_restart {
            capabilities.push(Capability::GracefulRestart {
                flags: 0,
                restart_time: self.graceful_restart_time,
                families: self.families.iter().map(|f| (*f, 0)).collect(),
            });
        }
        if self.four_octet_asn {
            capabilities.push(Capability::FourOctetAsn(self.local_as));
        }
        capabilities
    }
}

fn validate_hold_timer(peer: &IpAddr, hold_timer: u16) -> Result<(), ConfigError> {
    if hold_timer == 1 || hold_timer == 2 {
        return Err(ConfigError::Invalid(format!(
            "Peer {} hold_timer must be 0 or at least 3 seconds",
            peer
        )));
    }
    Ok(())
}

fn router_id_v4(router_id: IpAddr) -> Result<Ipv4Addr, ConfigError> {
    match router_id {
        IpAddr::V4(id) if !id.is_unspecified() => Ok(id),
        other => Err(ConfigError::Invalid(format!(
            "Router ID must be a non-zero IPv4 address, got {}",
            other
        ))),
    }
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self, ConfigError> {
        let router_id = router_id_v4(spec.router_id)?;
        if spec.message.write_msg_max_size == 0 {
            return Err(ConfigError::Invalid(
                "message.write_msg_max_size must be at least 1 MB".to_string(),
            ));
        }
        let message = MessageConfig {
            write_disk: spec.message.write_disk,
            write_dir: spec.message.write_dir.clone(),
            write_msg_max_size: spec.message.write_msg_max_size.saturating_mul(1024 * 1024),
            write_keepalive: spec.message.write_keepalive,
        };
        let mut seen = HashSet::new();
        let mut peers = Vec::with_capacity(spec.peers.len());
        for p in &spec.peers {
            if !seen.insert(p.remote_ip) {
                return Err(ConfigError::Invalid(format!(
                    "Peer {} is configured more than once",
                    p.remote_ip
                )));
            }
            validate_hold_timer(&p.remote_ip, p.hold_timer)?;
            if p.families.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Peer {} has no address families",
                    p.remote_ip
                )));
            }
            let local_router_id = match p.local_router_id {
                Some(id) => router_id_v4(id)?,
                None => router_id,
            };
            peers.push(Arc::new(PeerConfig {
                remote_ip: p.remote_ip,
                remote_as: p.remote_as,
                local_as: p.local_as.unwrap_or(spec.default_as),
                local_router_id,
                local_addr: p.local_addr,
                enabled: p.enabled,
                passive: p.passive,
                hold_timer: p.hold_timer,
                dest_port: p.dest_port,
                families: p.families.clone(),
                four_octet_asn: p.four_octet_asn,
                route_refresh: p.route_refresh,
                enhanced_route_refresh: p.enhanced_route_refresh,
                graceful_restart: p.graceful_restart,
                graceful_restart_time: p.graceful_restart_time,
                message: message.clone(),
            }));
        }
        if spec.reconnect.initial_backoff == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.initial_backoff must be at least 1 second".to_string(),
            ));
        }

        Ok(Self {
            router_id,
            default_as: spec.default_as,
            api: ApiConfig {
                bind_host: spec.api.bind_host,
                bind_port: spec.api.bind_port,
                username: spec.api.username,
                password: Secret::new(spec.api.password),
            },
            bgp: BgpConfig {
                listen: spec.bgp.listen,
                listen_host: spec.bgp.listen_host,
                listen_port: spec.bgp.listen_port,
                connect_timeout: Duration::from_secs(spec.bgp.connect_timeout),
            },
            reconnect: ReconnectConfig {
                enabled: spec.reconnect.enabled,
                initial_backoff: Duration::from_secs(spec.reconnect.initial_backoff),
                max_backoff: Duration::from_secs(
                    spec.reconnect.max_backoff.max(spec.reconnect.initial_backoff),
                ),
                max_retries: spec.reconnect.max_retries,
            },
            message,
            peers,
        })
    }

    pub fn peer(&self, addr: IpAddr) -> Option<&Arc<PeerConfig>> {
        self.peers.iter().find(|p| p.remote_ip == addr)
    }
}
