use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::MessageConfig;
use crate::message::{Capability, Family, Message, Open, PathAttribute, Update};

/// One received message, as a line in the peer's message file
#[derive(Debug, Serialize)]
struct MessageRecord {
    time: DateTime<Utc>,
    #[serde(rename = "type")]
    msg_type: u8,
    afi_safi: Option<Family>,
    msg: Value,
}

/// Appends received messages for one peer to `<write_dir>/<peer>/<timestamp>.msg`,
/// one JSON object per line, starting a new file once `write_msg_max_size` is reached
pub struct MessageRecorder {
    dir: PathBuf,
    max_size: u64,
    write_keepalive: bool,
    current: Option<(BufWriter<File>, u64)>,
}

impl MessageRecorder {
    /// A recorder for `addr`, or `None` when writing to disk is turned off
    pub fn new(config: &MessageConfig, addr: IpAddr) -> Option<Self> {
        if !config.write_disk {
            return None;
        }
        Some(Self {
            dir: config.write_dir.join(addr.to_string()),
            max_size: config.write_msg_max_size,
            write_keepalive: config.write_keepalive,
            current: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(&mut self, message: &Message) -> io::Result<()> {
        if matches!(message, Message::KeepAlive) && !self.write_keepalive {
            return Ok(());
        }
        let record = MessageRecord {
            time: Utc::now(),
            msg_type: message.message_type().code(),
            afi_safi: message_family(message),
            msg: message_body(message),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let (mut writer, written) = match self.current.take() {
            Some((writer, written)) if written < self.max_size => (writer, written),
            _ => (self.open_file()?, 0),
        };
        writer.write_all(&line)?;
        writer.flush()?;
        self.current = Some((writer, written + line.len() as u64));
        Ok(())
    }

    fn open_file(&self) -> io::Result<BufWriter<File>> {
        fs::create_dir_all(&self.dir)?;
        let now = Utc::now();
        let mut path = self.dir.join(format!("{}.msg", now.timestamp()));
        // Rotating twice within a second
        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!("{}.{}.msg", now.timestamp(), suffix));
            suffix += 1;
        }
        debug!("Writing messages to {}", path.display());
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    /// Record, logging any error instead of returning it
    pub fn record_or_warn(&mut self, message: &Message) {
        if let Err(err) = self.record(message) {
            warn!(
                "Unable to write {} to {}: {}",
                message.message_type(),
                self.dir.display(),
                err
            );
        }
    }
}

fn message_family(message: &Message) -> Option<Family> {
    match message {
        Message::Update(update) => update_family(update),
        Message::RouteRefresh(refresh) => Some(refresh.family),
        _ => None,
    }
}

fn update_family(update: &Update) -> Option<Family> {
    if !update.announced_routes.is_empty() || !update.withdrawn_routes.is_empty() {
        Some(Family::IPV4_UNICAST)
    } else if let Some(reach) = update.mp_reach() {
        Some(reach.family)
    } else {
        update.mp_unreach().map(|unreach| unreach.family)
    }
}

fn message_body(message: &Message) -> Value {
    match message {
        Message::Open(open) => open_body(open),
        Message::Update(update) => update_body(update),
        Message::Notification(notification) => json!({
            "code": notification.code.code(),
            "subcode": notification.subcode,
            "data": notification.data,
        }),
        Message::KeepAlive | Message::RouteRefresh(_) => Value::Null,
    }
}

fn open_body(open: &Open) -> Value {
    let capabilities: Vec<String> = open
        .capabilities
        .iter()
        .map(|capability| match capability {
            Capability::MultiProtocol(family) => format!("multiprotocol {}", family),
            Capability::RouteRefresh => "route refresh".to_string(),
            Capability::GracefulRestart { restart_time, .. } => {
                format!("graceful restart {}s", restart_time)
            }
            Capability::FourOctetAsn(asn) => format!("four octet asn {}", asn),
            Capability::AddPath(_) => "add path".to_string(),
            Capability::EnhancedRouteRefresh => "enhanced route refresh".to_string(),
            Capability::Unknown { code, .. } => format!("unknown {}", code),
        })
        .collect();
    json!({
        "version": open.version,
        "asn": open.asn(),
        "hold_time": open.hold_time,
        "router_id": open.router_id,
        "capabilities": capabilities,
    })
}

fn update_body(update: &Update) -> Value {
    let mut nlri: Vec<String> = update.announced_routes.iter().map(|n| n.to_string()).collect();
    let mut withdraw: Vec<String> = update.withdrawn_routes.iter().map(|n| n.to_string()).collect();
    let mut attr = serde_json::Map::new();
    for attribute in &update.attributes {
        let value = match attribute {
            PathAttribute::Origin(origin) => json!(origin.to_string()),
            PathAttribute::AsPath(path) | PathAttribute::As4Path(path) => json!(path.to_string()),
            PathAttribute::NextHop(next_hop) => json!(next_hop),
            PathAttribute::MultiExitDisc(value) | PathAttribute::LocalPref(value) => json!(value),
            PathAttribute::AtomicAggregate => json!(true),
            PathAttribute::Aggregator { asn, address } => json!([asn, address]),
            PathAttribute::Communities(communities) => {
                let communities: Vec<String> = communities
                    .iter()
                    .map(|c| format!("{}:{}", c >> 16, c & 0xffff))
                    .collect();
                json!(communities)
            }
            PathAttribute::OriginatorId(id) => json!(id),
            PathAttribute::ClusterList(ids) => json!(ids),
            PathAttribute::MpReach(reach) => {
                nlri.extend(reach.announced_routes.iter().map(|n| n.to_string()));
                json!({"afi_safi": reach.family, "next_hop": reach.next_hops})
            }
            PathAttribute::MpUnreach(unreach) => {
                withdraw.extend(unreach.withdrawn_routes.iter().map(|n| n.to_string()));
                json!({"afi_safi": unreach.family})
            }
            PathAttribute::ExtendedCommunities(communities) => json!(communities),
            PathAttribute::LargeCommunities(communities) => {
                let communities: Vec<String> = communities.iter().map(|c| c.to_string()).collect();
                json!(communities)
            }
            PathAttribute::Unknown { flags, value, .. } => json!({"flags": flags, "value": value}),
        };
        attr.insert(attribute.type_code().to_string(), value);
    }
    json!({"attr": attr, "nlri": nlri, "withdraw": withdraw})
}
