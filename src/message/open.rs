use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};

use super::{open_error, take, EncodeError, Families, Family, MalformedMessage, AS_TRANS};

pub const BGP_VERSION: u8 = 4;

const PARAM_CAPABILITIES: u8 = 2;

const CAP_MULTIPROTOCOL: u8 = 1;
const CAP_ROUTE_REFRESH: u8 = 2;
const CAP_GRACEFUL_RESTART: u8 = 64;
const CAP_FOUR_OCTET_ASN: u8 = 65;
const CAP_ADD_PATH: u8 = 69;
const CAP_ENHANCED_ROUTE_REFRESH: u8 = 70;

/// Capabilities carried in the OPEN optional parameters (RFC 5492)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    /// RFC 4760
    MultiProtocol(Family),
    /// RFC 2918
    RouteRefresh,
    /// RFC 4724: restart flags, restart time (seconds), and per-family forwarding flags
    GracefulRestart {
        flags: u8,
        restart_time: u16,
        families: Vec<(Family, u8)>,
    },
    /// RFC 6793
    FourOctetAsn(u32),
    /// RFC 7911: per-family send/receive mode
    AddPath(Vec<(Family, u8)>),
    /// RFC 7313
    EnhancedRouteRefresh,
    Unknown { code: u8, value: Vec<u8> },
}

impl Capability {
    fn code(&self) -> u8 {
        match self {
            Capability::MultiProtocol(_) => CAP_MULTIPROTOCOL,
            Capability::RouteRefresh => CAP_ROUTE_REFRESH,
            Capability::GracefulRestart { .. } => CAP_GRACEFUL_RESTART,
            Capability::FourOctetAsn(_) => CAP_FOUR_OCTET_ASN,
            Capability::AddPath(_) => CAP_ADD_PATH,
            Capability::EnhancedRouteRefresh => CAP_ENHANCED_ROUTE_REFRESH,
            Capability::Unknown { code, .. } => *code,
        }
    }

    fn decode(code: u8, mut value: &[u8]) -> Result<Self, MalformedMessage> {
        let capability = match code {
            CAP_MULTIPROTOCOL => {
                if value.len() != 4 {
                    return Err(MalformedMessage::malformed_open());
                }
                Capability::MultiProtocol(read_family(value, 3))
            }
            CAP_ROUTE_REFRESH => Capability::RouteRefresh,
            CAP_ENHANCED_ROUTE_REFRESH => Capability::EnhancedRouteRefresh,
            CAP_FOUR_OCTET_ASN => {
                if value.len() != 4 {
                    return Err(MalformedMessage::malformed_open());
                }
                Capability::FourOctetAsn(NetworkEndian::read_u32(value))
            }
            CAP_GRACEFUL_RESTART => {
                let header = take(&mut value, 2).ok_or_else(MalformedMessage::malformed_open)?;
                let header = NetworkEndian::read_u16(header);
                let mut families = vec![];
                while !value.is_empty() {
                    let entry = take(&mut value, 4).ok_or_else(MalformedMessage::malformed_open)?;
                    families.push((read_family(entry, 2), entry[3]));
                }
                Capability::GracefulRestart {
                    flags: (header >> 12) as u8,
                    restart_time: header & 0x0fff,
                    families,
                }
            }
            CAP_ADD_PATH => {
                let mut families = vec![];
                while !value.is_empty() {
                    let entry = take(&mut value, 4).ok_or_else(MalformedMessage::malformed_open)?;
                    families.push((read_family(entry, 2), entry[3]));
                }
                Capability::AddPath(families)
            }
            code => Capability::Unknown {
                code,
                value: value.to_vec(),
            },
        };
        Ok(capability)
    }

    fn encode_value(&self, buf: &mut BytesMut) {
        match self {
            Capability::MultiProtocol(family) => {
                buf.put_u16(family.afi.into());
                buf.put_u8(0);
                buf.put_u8(family.safi.into());
            }
            Capability::RouteRefresh | Capability::EnhancedRouteRefresh => (),
            Capability::GracefulRestart {
                flags,
                restart_time,
                families,
            } => {
                buf.put_u16((u16::from(*flags) << 12) | (restart_time & 0x0fff));
                for (family, family_flags) in families {
                    buf.put_u16(family.afi.into());
                    buf.put_u8(family.safi.into());
                    buf.put_u8(*family_flags);
                }
            }
            Capability::FourOctetAsn(asn) => buf.put_u32(*asn),
            Capability::AddPath(families) => {
                for (family, mode) in families {
                    buf.put_u16(family.afi.into());
                    buf.put_u8(family.safi.into());
                    buf.put_u8(*mode);
                }
            }
            Capability::Unknown { value, .. } => buf.put_slice(value),
        }
    }
}

/// Read a 2 byte AFI followed by the SAFI at `safi_offset`
fn read_family(value: &[u8], safi_offset: usize) -> Family {
    let afi = NetworkEndian::read_u16(&value[..2]);
    Family::new(afi.into(), value[safi_offset].into())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Open {
    pub version: u8,
    /// 2-octet "My Autonomous System", AS_TRANS when the real ASN does not fit
    pub asn: u16,
    pub hold_time: u16,
    pub router_id: Ipv4Addr,
    pub capabilities: Vec<Capability>,
}

impl Open {
    pub fn new(asn: u32, hold_time: u16, router_id: Ipv4Addr, capabilities: Vec<Capability>) -> Self {
        let asn = if asn > u32::from(u16::MAX) {
            AS_TRANS
        } else {
            asn as u16
        };
        Self {
            version: BGP_VERSION,
            asn,
            hold_time,
            router_id,
            capabilities,
        }
    }

    /// ASN from the 4-octet capability if present, else the 2-octet field
    pub fn asn(&self) -> u32 {
        self.four_octet_asn().unwrap_or_else(|| u32::from(self.asn))
    }

    pub fn four_octet_asn(&self) -> Option<u32> {
        self.capabilities.iter().find_map(|cap| match cap {
            Capability::FourOctetAsn(asn) => Some(*asn),
            _ => None,
        })
    }

    /// Families advertised via MP capabilities, IPv4 unicast when none are present
    pub fn families(&self) -> Families {
        let families: Vec<Family> = self
            .capabilities
            .iter()
            .filter_map(|cap| match cap {
                Capability::MultiProtocol(family) => Some(*family),
                _ => None,
            })
            .collect();
        if families.is_empty() {
            Families::new(vec![Family::IPV4_UNICAST])
        } else {
            Families::new(families)
        }
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities
            .iter()
            .any(|cap| std::mem::discriminant(cap) == std::mem::discriminant(capability))
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, MalformedMessage> {
        let mut body = body;
        let fixed = take(&mut body, 10).ok_or_else(MalformedMessage::malformed_open)?;
        let version = fixed[0];
        if version != BGP_VERSION {
            return Err(MalformedMessage::open(
                open_error::UNSUPPORTED_VERSION_NUMBER,
                u16::from(BGP_VERSION).to_be_bytes().to_vec(),
            ));
        }
        let asn = NetworkEndian::read_u16(&fixed[1..3]);
        let hold_time = NetworkEndian::read_u16(&fixed[3..5]);
        let router_id = Ipv4Addr::from(NetworkEndian::read_u32(&fixed[5..9]));
        let params_len = usize::from(fixed[9]);
        if params_len != body.len() {
            return Err(MalformedMessage::malformed_open());
        }

        let mut capabilities = vec![];
        while !body.is_empty() {
            let header = take(&mut body, 2).ok_or_else(MalformedMessage::malformed_open)?;
            let (param_type, param_len) = (header[0], usize::from(header[1]));
            let mut param =
                take(&mut body, param_len).ok_or_else(MalformedMessage::malformed_open)?;
            if param_type != PARAM_CAPABILITIES {
                return Err(MalformedMessage::open(
                    open_error::UNSUPPORTED_OPTIONAL_PARAMETER,
                    vec![param_type],
                ));
            }
            while !param.is_empty() {
                let header = take(&mut param, 2).ok_or_else(MalformedMessage::malformed_open)?;
                let value = take(&mut param, usize::from(header[1]))
                    .ok_or_else(MalformedMessage::malformed_open)?;
                capabilities.push(Capability::decode(header[0], value)?);
            }
        }

        Ok(Self {
            version,
            asn,
            hold_time,
            router_id,
            capabilities,
        })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(self.version);
        buf.put_u16(self.asn);
        buf.put_u16(self.hold_time);
        buf.put_u32(u32::from(self.router_id));

        // One capability per optional parameter
        let mut params = BytesMut::new();
        for capability in &self.capabilities {
            let mut value = BytesMut::new();
            capability.encode_value(&mut value);
            if value.len() > 253 {
                return Err(EncodeError::FieldOverflow("capability"));
            }
            params.put_u8(PARAM_CAPABILITIES);
            params.put_u8(value.len() as u8 + 2);
            params.put_u8(capability.code());
            params.put_u8(value.len() as u8);
            params.put_slice(&value);
        }
        if params.len() > usize::from(u8::MAX) {
            return Err(EncodeError::FieldOverflow("optional parameters"));
        }
        buf.put_u8(params.len() as u8);
        buf.put_slice(&params);
        Ok(())
    }
}
