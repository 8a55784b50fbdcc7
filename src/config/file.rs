use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::Deserialize;

use super::ConfigError;
use crate::message::{Families, Family};

struct Defaults {}

impl Defaults {
    fn enabled() -> bool {
        true
    }

    fn passive() -> bool {
        false
    }

    fn hold_timer() -> u16 {
        180
    }

    fn dest_port() -> u16 {
        179
    }

    fn families() -> Families {
        Families::new(vec![Family::IPV4_UNICAST])
    }

    fn four_octet_asn() -> bool {
        true
    }

    fn route_refresh() -> bool {
        true
    }

    fn enhanced_route_refresh() -> bool {
        false
    }

    fn graceful_restart() -> bool {
        false
    }

    fn graceful_restart_time() -> u16 {
        120
    }

    fn bind_host() -> IpAddr {
        IpAddr::from(Ipv4Addr::UNSPECIFIED)
    }

    fn bind_port() -> u16 {
        8801
    }

    fn username() -> String {
        "admin".to_string()
    }

    fn password() -> String {
        "admin".to_string()
    }

    fn listen() -> bool {
        true
    }

    fn listen_port() -> u16 {
        179
    }

    fn connect_timeout() -> u64 {
        10
    }

    fn initial_backoff() -> u64 {
        5
    }

    fn max_backoff() -> u64 {
        120
    }

    fn write_disk() -> bool {
        false
    }

    fn write_dir() -> PathBuf {
        PathBuf::from("data/bgp")
    }

    fn write_msg_max_size() -> u64 {
        500
    }

    fn write_keepalive() -> bool {
        true
    }
}

/// Config (toml) representation of a Peer Config
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct PeerConfigSpec {
    // Peer connection details
    pub(super) remote_ip: IpAddr,
    pub(super) remote_as: u32,
    // Local connection details
    pub(super) local_as: Option<u32>,
    pub(super) local_router_id: Option<IpAddr>, // Will defer to server config if not provided
    // Source address for outbound connections
    pub(super) local_addr: Option<IpAddr>,

    // Peer is configured and allowed to connect
    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,

    // Only listen to incoming TCP sessions for passive peers
    // And don't attempt outbound TCP connections
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,

    // Timer to keep peers active
    // Will send keepalives every 1/3rd of this value
    #[serde(default = "Defaults::hold_timer")]
    pub(super) hold_timer: u16,

    // Destination port for BGP session
    // Used when initiating connection to peer
    #[serde(default = "Defaults::dest_port")]
    pub(super) dest_port: u16,

    // AFI/SAFI Families to advertise via MP-BGP capabilities
    #[serde(default = "Defaults::families")]
    pub(super) families: Families,

    #[serde(default = "Defaults::four_octet_asn")]
    pub(super) four_octet_asn: bool,
    #[serde(default = "Defaults::route_refresh")]
    pub(super) route_refresh: bool,
    #[serde(default = "Defaults::enhanced_route_refresh")]
    pub(super) enhanced_route_refresh: bool,
    #[serde(default = "Defaults::graceful_restart")]
    pub(super) graceful_restart: bool,
    #[serde(default = "Defaults::graceful_restart_time")]
    pub(super) graceful_restart_time: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ApiConfigSpec {
    #[serde(default = "Defaults::bind_host")]
    pub(super) bind_host: IpAddr,
    #[serde(default = "Defaults::bind_port")]
    pub(super) bind_port: u16,
    #[serde(default = "Defaults::username")]
    pub(super) username: String,
    #[serde(default = "Defaults::password")]
    pub(super) password: String,
}

impl Default for ApiConfigSpec {
    fn default() -> Self {
        Self {
            bind_host: Defaults::bind_host(),
            bind_port: Defaults::bind_port(),
            username: Defaults::username(),
            password: Defaults::password(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BgpConfigSpec {
    // Accept inbound TCP connections from configured peers
    #[serde(default = "Defaults::listen")]
    pub(super) listen: bool,
    #[serde(default = "Defaults::bind_host")]
    pub(super) listen_host: IpAddr,
    #[serde(default = "Defaults::listen_port")]
    pub(super) listen_port: u16,
    // Seconds to wait for an outbound TCP connection
    #[serde(default = "Defaults::connect_timeout")]
    pub(super) connect_timeout: u64,
}

impl Default for BgpConfigSpec {
    fn default() -> Self {
        Self {
            listen: Defaults::listen(),
            listen_host: Defaults::bind_host(),
            listen_port: Defaults::listen_port(),
            connect_timeout: Defaults::connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ReconnectConfigSpec {
    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,
    // Seconds, doubled after every failed attempt
    #[serde(default = "Defaults::initial_backoff")]
    pub(super) initial_backoff: u64,
    #[serde(default = "Defaults::max_backoff")]
    pub(super) max_backoff: u64,
    // Give up after this many consecutive failures (retry forever if unset)
    pub(super) max_retries: Option<u32>,
}

impl Default for ReconnectConfigSpec {
    fn default() -> Self {
        Self {
            enabled: Defaults::enabled(),
            initial_backoff: Defaults::initial_backoff(),
            max_backoff: Defaults::max_backoff(),
            max_retries: None,
        }
    }
}

/// Recording of received messages to disk
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct MessageConfigSpec {
    #[serde(default = "Defaults::write_disk")]
    pub(super) write_disk: bool,
    // One directory per peer is created under this
    #[serde(default = "Defaults::write_dir")]
    pub(super) write_dir: PathBuf,
    // MB per message file before starting a new one
    #[serde(default = "Defaults::write_msg_max_size")]
    pub(super) write_msg_max_size: u64,
    #[serde(default = "Defaults::write_keepalive")]
    pub(super) write_keepalive: bool,
}

impl Default for MessageConfigSpec {
    fn default() -> Self {
        Self {
            write_disk: Defaults::write_disk(),
            write_dir: Defaults::write_dir(),
            write_msg_max_size: Defaults::write_msg_max_size(),
            write_keepalive: Defaults::write_keepalive(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ServerConfigSpec {
    // Global Router-ID (can be overriden per-peer in peer config)
    pub(super) router_id: IpAddr,
    // Global ASN (can be overriden per-peer in peer config)
    pub(super) default_as: u32,
    #[serde(default)]
    pub(super) api: ApiConfigSpec,
    #[serde(default)]
    pub(super) bgp: BgpConfigSpec,
    #[serde(default)]
    pub(super) reconnect: ReconnectConfigSpec,
    #[serde(default)]
    pub(super) message: MessageConfigSpec,
    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_toml(&contents)
    }

    pub(super) fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_parse_config() {
        let config = ServerConfigSpec::from_file("./demos/config.toml").unwrap();
        assert_eq!(config.router_id, IpAddr::from(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(config.default_as, 65000);
        assert_eq!(config.api.bind_port, 8801);
        assert_eq!(config.bgp.listen_port, 1179);
        assert_eq!(config.reconnect.max_retries, None);
        assert!(config.message.write_disk);
        assert_eq!(config.message.write_dir, PathBuf::from("/var/lib/bgpd-injector"));
        assert_eq!(config.message.write_msg_max_size, 100);
        assert!(!config.message.write_keepalive);
        assert_eq!(config.peers.len(), 2);
        let v4_peer = config
            .peers
            .iter()
            .find(|p| p.remote_ip == IpAddr::from(Ipv4Addr::new(127, 0, 0, 2)))
            .unwrap();
        assert_eq!(v4_peer.local_as, None);
        assert_eq!(v4_peer.hold_timer, 30);
        assert_eq!(v4_peer.dest_port, 1179);
        assert!(v4_peer.passive);
        assert!(v4_peer.route_refresh);

        let v6_peer = config
            .peers
            .iter()
            .find(|p| p.remote_ip == IpAddr::from("::2".parse::<Ipv6Addr>().unwrap()))
            .unwrap();
        assert_eq!(v6_peer.families.iter().count(), 2);
        assert_eq!(v6_peer.hold_timer, 180);
        assert_eq!(v6_peer.local_as, Some(4200000000));
        assert!(!v6_peer.passive);
        assert!(v6_peer.graceful_restart);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ServerConfigSpec::from_toml(
            r#"
            router_id = "10.0.0.254"
            default_as = 65000
            "#,
        )
        .unwrap();
        assert_eq!(config.api.bind_host, IpAddr::from(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.api.bind_port, 8801);
        assert_eq!(config.api.username, "admin");
        assert!(config.bgp.listen);
        assert_eq!(config.bgp.listen_port, 179);
        assert!(config.reconnect.enabled);
        assert!(!config.message.write_disk);
        assert_eq!(config.message.write_msg_max_size, 500);
        assert!(config.message.write_keepalive);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_unknown_family_rejected() {
        let result = ServerConfigSpec::from_toml(
            r#"
            router_id = "10.0.0.254"
            default_as = 65000
            [[peers]]
            remote_ip = "10.0.0.1"
            remote_as = 65001
            families = ["ipv4 flow"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
