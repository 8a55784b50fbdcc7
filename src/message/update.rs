use std::convert::TryFrom;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};
use ipnetwork::IpNetwork;
use itertools::Itertools;
use serde::Serialize;

use super::{
    take, update_error, Afi, EncodeError, Family, LargeCommunity, MalformedMessage, WireOptions,
};
use crate::utils::ParseError;

/// Placeholder ASN for speakers without 4-octet AS support (RFC 6793)
pub const AS_TRANS: u16 = 23456;

const FLAG_OPTIONAL: u8 = 0x80;
const FLAG_TRANSITIVE: u8 = 0x40;
const FLAG_EXTENDED_LENGTH: u8 = 0x10;

const WELL_KNOWN: u8 = FLAG_TRANSITIVE;
const OPTIONAL: u8 = FLAG_OPTIONAL;
const OPTIONAL_TRANSITIVE: u8 = FLAG_OPTIONAL | FLAG_TRANSITIVE;

const ATTR_ORIGIN: u8 = 1;
const ATTR_AS_PATH: u8 = 2;
const ATTR_NEXT_HOP: u8 = 3;
const ATTR_MED: u8 = 4;
const ATTR_LOCAL_PREF: u8 = 5;
const ATTR_ATOMIC_AGGREGATE: u8 = 6;
const ATTR_AGGREGATOR: u8 = 7;
const ATTR_COMMUNITIES: u8 = 8;
const ATTR_ORIGINATOR_ID: u8 = 9;
const ATTR_CLUSTER_LIST: u8 = 10;
const ATTR_MP_REACH: u8 = 14;
const ATTR_MP_UNREACH: u8 = 15;
const ATTR_EXTENDED_COMMUNITIES: u8 = 16;
const ATTR_AS4_PATH: u8 = 17;
const ATTR_LARGE_COMMUNITIES: u8 = 32;

/// Optional/transitive bits every recognized attribute must carry
fn expected_category(type_code: u8) -> Option<u8> {
    match type_code {
        ATTR_ORIGIN | ATTR_AS_PATH | ATTR_NEXT_HOP | ATTR_LOCAL_PREF | ATTR_ATOMIC_AGGREGATE => {
            Some(WELL_KNOWN)
        }
        ATTR_MED | ATTR_ORIGINATOR_ID | ATTR_CLUSTER_LIST | ATTR_MP_REACH | ATTR_MP_UNREACH => {
            Some(OPTIONAL)
        }
        ATTR_AGGREGATOR
        | ATTR_COMMUNITIES
        | ATTR_EXTENDED_COMMUNITIES
        | ATTR_AS4_PATH
        | ATTR_LARGE_COMMUNITIES => Some(OPTIONAL_TRANSITIVE),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

impl TryFrom<u8> for Origin {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            other => Err(other),
        }
    }
}

impl From<Origin> for u8 {
    fn from(origin: Origin) -> u8 {
        match origin {
            Origin::Igp => 0,
            Origin::Egp => 1,
            Origin::Incomplete => 2,
        }
    }
}

impl FromStr for Origin {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "igp" | "i" => Ok(Origin::Igp),
            "egp" | "e" => Ok(Origin::Egp),
            "incomplete" | "?" => Ok(Origin::Incomplete),
            other => Err(ParseError::new(format!("Invalid origin '{}'", other))),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Origin::Igp => "IGP",
            Origin::Egp => "EGP",
            Origin::Incomplete => "Incomplete",
        };
        write!(f, "{}", word)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Set(Vec<u32>),
    Sequence(Vec<u32>),
    ConfedSequence(Vec<u32>),
    ConfedSet(Vec<u32>),
}

impl Segment {
    fn type_code(&self) -> u8 {
        match self {
            Segment::Set(_) => 1,
            Segment::Sequence(_) => 2,
            Segment::ConfedSequence(_) => 3,
            Segment::ConfedSet(_) => 4,
        }
    }

    pub fn asns(&self) -> &[u32] {
        match self {
            Segment::Set(asns)
            | Segment::Sequence(asns)
            | Segment::ConfedSequence(asns)
            | Segment::ConfedSet(asns) => asns,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsPath {
    pub segments: Vec<Segment>,
}

impl AsPath {
    pub fn sequence(asns: Vec<u32>) -> Self {
        if asns.is_empty() {
            return Self::default();
        }
        Self {
            segments: vec![Segment::Sequence(asns)],
        }
    }

    pub fn asns(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.iter().flat_map(|s| s.asns().iter().copied())
    }

    /// Leftmost ASN of a leading AS_SEQUENCE
    pub fn first(&self) -> Option<u32> {
        match self.segments.first() {
            Some(Segment::Sequence(asns)) => asns.first().copied(),
            _ => None,
        }
    }

    pub fn prepend(&mut self, asn: u32) {
        match self.segments.first_mut() {
            Some(Segment::Sequence(asns)) if asns.len() < 255 => asns.insert(0, asn),
            _ => self.segments.insert(0, Segment::Sequence(vec![asn])),
        }
    }

    /// Whether any ASN needs 4 octets
    pub fn has_four_octet(&self) -> bool {
        self.asns().any(|asn| asn > u32::from(u16::MAX))
    }

    fn decode(mut value: &[u8], asn_size: usize) -> Result<Self, MalformedMessage> {
        let malformed = || MalformedMessage::update(update_error::MALFORMED_AS_PATH, vec![]);
        let mut segments = vec![];
        while !value.is_empty() {
            let header = take(&mut value, 2).ok_or_else(malformed)?;
            let count = usize::from(header[1]);
            if count == 0 {
                return Err(malformed());
            }
            let raw = take(&mut value, count * asn_size).ok_or_else(malformed)?;
            let asns: Vec<u32> = raw
                .chunks(asn_size)
                .map(|chunk| match asn_size {
                    4 => NetworkEndian::read_u32(chunk),
                    _ => u32::from(NetworkEndian::read_u16(chunk)),
                })
                .collect();
            let segment = match header[0] {
                1 => Segment::Set(asns),
                2 => Segment::Sequence(asns),
                3 => Segment::ConfedSequence(asns),
                4 => Segment::ConfedSet(asns),
                _ => return Err(malformed()),
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    fn encode(&self, asn_size: usize, buf: &mut BytesMut) -> Result<(), EncodeError> {
        for segment in &self.segments {
            let asns = segment.asns();
            if asns.len() > usize::from(u8::MAX) {
                return Err(EncodeError::FieldOverflow("as_path segment"));
            }
            buf.put_u8(segment.type_code());
            buf.put_u8(asns.len() as u8);
            for asn in asns {
                match asn_size {
                    4 => buf.put_u32(*asn),
                    _ => buf.put_u16(u16::try_from(*asn).unwrap_or(AS_TRANS)),
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let segments = self.segments.iter().map(|segment| match segment {
            Segment::Sequence(asns) => asns.iter().join(" "),
            Segment::Set(asns) => format!("{{{}}}", asns.iter().join(" ")),
            Segment::ConfedSequence(asns) => format!("({})", asns.iter().join(" ")),
            Segment::ConfedSet(asns) => format!("[{}]", asns.iter().join(" ")),
        });
        write!(f, "{}", segments.format(" "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MpReach {
    pub family: Family,
    /// One next hop, or an IPv6 global plus link-local pair
    pub next_hops: Vec<IpAddr>,
    pub announced_routes: Vec<IpNetwork>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MpUnreach {
    pub family: Family,
    pub withdrawn_routes: Vec<IpNetwork>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathAttribute {
    Origin(Origin),
    AsPath(AsPath),
    NextHop(Ipv4Addr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator { asn: u32, address: Ipv4Addr },
    Communities(Vec<u32>),
    OriginatorId(Ipv4Addr),
    ClusterList(Vec<Ipv4Addr>),
    MpReach(MpReach),
    MpUnreach(MpUnreach),
    ExtendedCommunities(Vec<u64>),
    As4Path(AsPath),
    LargeCommunities(Vec<LargeCommunity>),
    /// Unrecognized optional attribute, or one for an unsupported family, kept opaque
    Unknown {
        flags: u8,
        type_code: u8,
        value: Vec<u8>,
    },
}

impl PathAttribute {
    pub fn type_code(&self) -> u8 {
        match self {
            PathAttribute::Origin(_) => ATTR_ORIGIN,
            PathAttribute::AsPath(_) => ATTR_AS_PATH,
            PathAttribute::NextHop(_) => ATTR_NEXT_HOP,
            PathAttribute::MultiExitDisc(_) => ATTR_MED,
            PathAttribute::LocalPref(_) => ATTR_LOCAL_PREF,
            PathAttribute::AtomicAggregate => ATTR_ATOMIC_AGGREGATE,
            PathAttribute::Aggregator { .. } => ATTR_AGGREGATOR,
            PathAttribute::Communities(_) => ATTR_COMMUNITIES,
            PathAttribute::OriginatorId(_) => ATTR_ORIGINATOR_ID,
            PathAttribute::ClusterList(_) => ATTR_CLUSTER_LIST,
            PathAttribute::MpReach(_) => ATTR_MP_REACH,
            PathAttribute::MpUnreach(_) => ATTR_MP_UNREACH,
            PathAttribute::ExtendedCommunities(_) => ATTR_EXTENDED_COMMUNITIES,
            PathAttribute::As4Path(_) => ATTR_AS4_PATH,
            PathAttribute::LargeCommunities(_) => ATTR_LARGE_COMMUNITIES,
            PathAttribute::Unknown { type_code, .. } => *type_code,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            PathAttribute::Unknown { flags, .. } => *flags,
            other => expected_category(other.type_code()).unwrap_or(OPTIONAL_TRANSITIVE),
        }
    }

    /// Decode one attribute; `raw` is the whole attribute and becomes the error data
    fn decode(
        flags: u8,
        type_code: u8,
        value: &[u8],
        raw: &[u8],
        options: &WireOptions,
    ) -> Result<Self, MalformedMessage> {
        let error = |subcode| MalformedMessage::update(subcode, raw.to_vec());
        let check_len = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(error(update_error::ATTRIBUTE_LENGTH_ERROR))
            }
        };

        match expected_category(type_code) {
            Some(category) => {
                if flags & OPTIONAL_TRANSITIVE != category {
                    return Err(error(update_error::ATTRIBUTE_FLAGS_ERROR));
                }
            }
            None if flags & FLAG_OPTIONAL == 0 => {
                return Err(error(update_error::UNRECOGNIZED_WELL_KNOWN_ATTRIBUTE));
            }
            None => {
                return Ok(PathAttribute::Unknown {
                    flags,
                    type_code,
                    value: value.to_vec(),
                })
            }
        }

        let attribute = match type_code {
            ATTR_ORIGIN => {
                check_len(value.len() == 1)?;
                let origin = Origin::try_from(value[0])
                    .map_err(|_| error(update_error::INVALID_ORIGIN_ATTRIBUTE))?;
                PathAttribute::Origin(origin)
            }
            ATTR_AS_PATH => PathAttribute::AsPath(AsPath::decode(value, options.asn_size())?),
            ATTR_NEXT_HOP => {
                check_len(value.len() == 4)?;
                let next_hop = Ipv4Addr::from(NetworkEndian::read_u32(value));
                if next_hop.is_unspecified() || next_hop.is_multicast() || next_hop.is_broadcast() {
                    return Err(error(update_error::INVALID_NEXT_HOP_ATTRIBUTE));
                }
                PathAttribute::NextHop(next_hop)
            }
            ATTR_MED => {
                check_len(value.len() == 4)?;
                PathAttribute::MultiExitDisc(NetworkEndian::read_u32(value))
            }
            ATTR_LOCAL_PREF => {
                check_len(value.len() == 4)?;
                PathAttribute::LocalPref(NetworkEndian::read_u32(value))
            }
            ATTR_ATOMIC_AGGREGATE => {
                check_len(value.is_empty())?;
                PathAttribute::AtomicAggregate
            }
            ATTR_AGGREGATOR => {
                let asn_size = options.asn_size();
                check_len(value.len() == asn_size + 4)?;
                let asn = match asn_size {
                    4 => NetworkEndian::read_u32(value),
                    _ => u32::from(NetworkEndian::read_u16(value)),
                };
                let address = Ipv4Addr::from(NetworkEndian::read_u32(&value[asn_size..]));
                PathAttribute::Aggregator { asn, address }
            }
            ATTR_COMMUNITIES => {
                check_len(value.len() % 4 == 0)?;
                PathAttribute::Communities(value.chunks(4).map(NetworkEndian::read_u32).collect())
            }
            ATTR_ORIGINATOR_ID => {
                check_len(value.len() == 4)?;
                PathAttribute::OriginatorId(Ipv4Addr::from(NetworkEndian::read_u32(value)))
            }
            ATTR_CLUSTER_LIST => {
                check_len(value.len() % 4 == 0)?;
                PathAttribute::ClusterList(
                    value
                        .chunks(4)
                        .map(|id| Ipv4Addr::from(NetworkEndian::read_u32(id)))
                        .collect(),
                )
            }
            ATTR_MP_REACH => match decode_mp_reach(value, raw)? {
                Some(reach) => PathAttribute::MpReach(reach),
                None => PathAttribute::Unknown {
                    flags,
                    type_code,
                    value: value.to_vec(),
                },
            },
            ATTR_MP_UNREACH => match decode_mp_unreach(value, raw)? {
                Some(unreach) => PathAttribute::MpUnreach(unreach),
                None => PathAttribute::Unknown {
                    flags,
                    type_code,
                    value: value.to_vec(),
                },
            },
            ATTR_EXTENDED_COMMUNITIES => {
                check_len(value.len() % 8 == 0)?;
                PathAttribute::ExtendedCommunities(
                    value.chunks(8).map(NetworkEndian::read_u64).collect(),
                )
            }
            ATTR_AS4_PATH => PathAttribute::As4Path(
                AsPath::decode(value, 4)
                    .map_err(|_| error(update_error::OPTIONAL_ATTRIBUTE_ERROR))?,
            ),
            ATTR_LARGE_COMMUNITIES => {
                check_len(value.len() % 12 == 0)?;
                PathAttribute::LargeCommunities(
                    value
                        .chunks(12)
                        .map(|c| {
                            LargeCommunity::new(
                                NetworkEndian::read_u32(&c[..4]),
                                NetworkEndian::read_u32(&c[4..8]),
                                NetworkEndian::read_u32(&c[8..]),
                            )
                        })
                        .collect(),
                )
            }
            // expected_category() only knows the codes above
            _ => PathAttribute::Unknown {
                flags,
                type_code,
                value: value.to_vec(),
            },
        };
        Ok(attribute)
    }

    fn encode_value(&self, options: &WireOptions, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            PathAttribute::Origin(origin) => buf.put_u8((*origin).into()),
            PathAttribute::AsPath(path) => path.encode(options.asn_size(), buf)?,
            PathAttribute::NextHop(next_hop) => buf.put_u32(u32::from(*next_hop)),
            PathAttribute::MultiExitDisc(value) | PathAttribute::LocalPref(value) => {
                buf.put_u32(*value)
            }
            PathAttribute::AtomicAggregate => (),
            PathAttribute::Aggregator { asn, address } => {
                if options.four_octet_asn {
                    buf.put_u32(*asn);
                } else {
                    buf.put_u16(u16::try_from(*asn).unwrap_or(AS_TRANS));
                }
                buf.put_u32(u32::from(*address));
            }
            PathAttribute::Communities(communities) => {
                communities.iter().for_each(|c| buf.put_u32(*c))
            }
            PathAttribute::OriginatorId(id) => buf.put_u32(u32::from(*id)),
            PathAttribute::ClusterList(ids) => ids.iter().for_each(|id| buf.put_u32(u32::from(*id))),
            PathAttribute::MpReach(reach) => {
                buf.put_u16(reach.family.afi.into());
                buf.put_u8(reach.family.safi.into());
                let next_hops: Vec<u8> = reach
                    .next_hops
                    .iter()
                    .flat_map(|nh| match nh {
                        IpAddr::V4(addr) => addr.octets().to_vec(),
                        IpAddr::V6(addr) => addr.octets().to_vec(),
                    })
                    .collect();
                buf.put_u8(next_hops.len() as u8);
                buf.put_slice(&next_hops);
                buf.put_u8(0); // Reserved
                encode_prefixes(&reach.announced_routes, buf);
            }
            PathAttribute::MpUnreach(unreach) => {
                buf.put_u16(unreach.family.afi.into());
                buf.put_u8(unreach.family.safi.into());
                encode_prefixes(&unreach.withdrawn_routes, buf);
            }
            PathAttribute::ExtendedCommunities(communities) => {
                communities.iter().for_each(|c| buf.put_u64(*c))
            }
            PathAttribute::As4Path(path) => path.encode(4, buf)?,
            PathAttribute::LargeCommunities(communities) => {
                for c in communities {
                    buf.put_u32(c.global_admin);
                    buf.put_u32(c.local_data1);
                    buf.put_u32(c.local_data2);
                }
            }
            PathAttribute::Unknown { value, .. } => buf.put_slice(value),
        }
        Ok(())
    }

    fn encode(&self, options: &WireOptions, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut value = BytesMut::new();
        self.encode_value(options, &mut value)?;
        let flags = self.flags() & !FLAG_EXTENDED_LENGTH;
        if value.len() > usize::from(u8::MAX) {
            if value.len() > usize::from(u16::MAX) {
                return Err(EncodeError::FieldOverflow("path attribute"));
            }
            buf.put_u8(flags | FLAG_EXTENDED_LENGTH);
            buf.put_u8(self.type_code());
            buf.put_u16(value.len() as u16);
        } else {
            buf.put_u8(flags);
            buf.put_u8(self.type_code());
            buf.put_u8(value.len() as u8);
        }
        buf.put_slice(&value);
        Ok(())
    }
}

fn decode_mp_reach(value: &[u8], raw: &[u8]) -> Result<Option<MpReach>, MalformedMessage> {
    let error = || MalformedMessage::update(update_error::OPTIONAL_ATTRIBUTE_ERROR, raw.to_vec());
    let mut value = value;
    let header = take(&mut value, 4).ok_or_else(error)?;
    let family = Family::new(NetworkEndian::read_u16(header).into(), header[2].into());
    if !family.is_known() {
        return Ok(None);
    }
    let next_hop = take(&mut value, usize::from(header[3])).ok_or_else(error)?;
    let next_hops = match (family.afi, next_hop.len()) {
        (Afi::Ipv4, 4) => vec![IpAddr::from(Ipv4Addr::from(NetworkEndian::read_u32(next_hop)))],
        (Afi::Ipv6, 16) | (Afi::Ipv6, 32) => next_hop
            .chunks(16)
            .map(|chunk| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(chunk);
                IpAddr::from(Ipv6Addr::from(octets))
            })
            .collect(),
        _ => {
            return Err(MalformedMessage::update(
                update_error::INVALID_NEXT_HOP_ATTRIBUTE,
                raw.to_vec(),
            ))
        }
    };
    take(&mut value, 1).ok_or_else(error)?; // Reserved
    let announced_routes = decode_prefixes(value, family.afi)?;
    Ok(Some(MpReach {
        family,
        next_hops,
        announced_routes,
    }))
}

fn decode_mp_unreach(value: &[u8], raw: &[u8]) -> Result<Option<MpUnreach>, MalformedMessage> {
    let error = || MalformedMessage::update(update_error::OPTIONAL_ATTRIBUTE_ERROR, raw.to_vec());
    let mut value = value;
    let header = take(&mut value, 3).ok_or_else(error)?;
    let family = Family::new(NetworkEndian::read_u16(header).into(), header[2].into());
    if !family.is_known() {
        return Ok(None);
    }
    Ok(Some(MpUnreach {
        family,
        withdrawn_routes: decode_prefixes(value, family.afi)?,
    }))
}

/// Decode a run of (length, prefix) NLRI entries (RFC 4271 4.3)
fn decode_prefixes(mut buf: &[u8], afi: Afi) -> Result<Vec<IpNetwork>, MalformedMessage> {
    let invalid = || MalformedMessage::update(update_error::INVALID_NETWORK_FIELD, vec![]);
    let max_len = match afi {
        Afi::Ipv6 => 128,
        _ => 32,
    };
    let mut prefixes = vec![];
    while !buf.is_empty() {
        let prefix_len = take(&mut buf, 1).ok_or_else(invalid)?[0];
        if prefix_len > max_len {
            return Err(invalid());
        }
        let bytes = take(&mut buf, (usize::from(prefix_len) + 7) / 8).ok_or_else(invalid)?;
        let addr = match afi {
            Afi::Ipv6 => {
                let mut octets = [0u8; 16];
                octets[..bytes.len()].copy_from_slice(bytes);
                IpAddr::from(Ipv6Addr::from(octets))
            }
            _ => {
                let mut octets = [0u8; 4];
                octets[..bytes.len()].copy_from_slice(bytes);
                IpAddr::from(Ipv4Addr::from(octets))
            }
        };
        prefixes.push(IpNetwork::new(addr, prefix_len).map_err(|_| invalid())?);
    }
    Ok(prefixes)
}

fn encode_prefixes(prefixes: &[IpNetwork], buf: &mut BytesMut) {
    for prefix in prefixes {
        let len = prefix.prefix();
        let octets = match prefix.network() {
            IpAddr::V4(addr) => addr.octets().to_vec(),
            IpAddr::V6(addr) => addr.octets().to_vec(),
        };
        buf.put_u8(len);
        buf.put_slice(&octets[..(usize::from(len) + 7) / 8]);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Update {
    /// IPv4 unicast withdrawals; other families use MP_UNREACH_NLRI
    pub withdrawn_routes: Vec<IpNetwork>,
    pub attributes: Vec<PathAttribute>,
    /// IPv4 unicast announcements; other families use MP_REACH_NLRI
    pub announced_routes: Vec<IpNetwork>,
}

impl Update {
    pub fn get(&self, type_code: u8) -> Option<&PathAttribute> {
        self.attributes.iter().find(|a| a.type_code() == type_code)
    }

    pub fn as_path(&self) -> Option<&AsPath> {
        self.attributes.iter().find_map(|a| match a {
            PathAttribute::AsPath(path) => Some(path),
            _ => None,
        })
    }

    pub fn mp_reach(&self) -> Option<&MpReach> {
        self.attributes.iter().find_map(|a| match a {
            PathAttribute::MpReach(reach) => Some(reach),
            _ => None,
        })
    }

    pub fn mp_unreach(&self) -> Option<&MpUnreach> {
        self.attributes.iter().find_map(|a| match a {
            PathAttribute::MpUnreach(unreach) => Some(unreach),
            _ => None,
        })
    }

    /// Number of prefixes announced, across IPv4 and MP NLRI
    pub fn announced_count(&self) -> usize {
        self.announced_routes.len() + self.mp_reach().map_or(0, |r| r.announced_routes.len())
    }

    /// Number of prefixes withdrawn, across IPv4 and MP NLRI
    pub fn withdrawn_count(&self) -> usize {
        self.withdrawn_routes.len()
            + self.mp_unreach().map_or(0, |u| u.withdrawn_routes.len())
    }

    /// An UPDATE with nothing in it marks End-of-RIB for IPv4 unicast (RFC 4724)
    pub fn is_end_of_rib(&self) -> bool {
        self.withdrawn_routes.is_empty()
            && self.announced_routes.is_empty()
            && self.attributes.is_empty()
    }

    pub(super) fn decode(body: &[u8], options: &WireOptions) -> Result<Self, MalformedMessage> {
        let malformed = MalformedMessage::malformed_attributes;
        let mut body = body;
        let withdrawn_len = take(&mut body, 2).ok_or_else(malformed)?;
        let withdrawn = take(&mut body, usize::from(NetworkEndian::read_u16(withdrawn_len)))
            .ok_or_else(malformed)?;
        let attributes_len = take(&mut body, 2).ok_or_else(malformed)?;
        let attributes = take(&mut body, usize::from(NetworkEndian::read_u16(attributes_len)))
            .ok_or_else(malformed)?;

        let update = Self {
            withdrawn_routes: decode_prefixes(withdrawn, Afi::Ipv4)?,
            attributes: decode_attributes(attributes, options)?,
            announced_routes: decode_prefixes(body, Afi::Ipv4)?,
        };
        update.check_mandatory()?;
        Ok(update)
    }

    /// Announcements need ORIGIN and AS_PATH, plus NEXT_HOP for IPv4 unicast NLRI
    fn check_mandatory(&self) -> Result<(), MalformedMessage> {
        let mut required = vec![];
        if !self.announced_routes.is_empty() {
            required.extend([ATTR_ORIGIN, ATTR_AS_PATH, ATTR_NEXT_HOP]);
        } else if self.mp_reach().is_some() {
            required.extend([ATTR_ORIGIN, ATTR_AS_PATH]);
        }
        match required.into_iter().find(|code| self.get(*code).is_none()) {
            Some(missing) => Err(MalformedMessage::update(
                update_error::MISSING_WELL_KNOWN_ATTRIBUTE,
                vec![missing],
            )),
            None => Ok(()),
        }
    }

    pub(super) fn encode(&self, options: &WireOptions, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let all_ipv4 = |prefixes: &[IpNetwork]| prefixes.iter().all(IpNetwork::is_ipv4);
        if !all_ipv4(&self.withdrawn_routes) || !all_ipv4(&self.announced_routes) {
            return Err(EncodeError::FieldOverflow("ipv4 nlri"));
        }

        let mut withdrawn = BytesMut::new();
        encode_prefixes(&self.withdrawn_routes, &mut withdrawn);
        let mut attributes = BytesMut::new();
        for attribute in &self.attributes {
            attribute.encode(options, &mut attributes)?;
        }
        if withdrawn.len() > usize::from(u16::MAX) || attributes.len() > usize::from(u16::MAX) {
            return Err(EncodeError::TooLarge(withdrawn.len() + attributes.len()));
        }
        buf.put_u16(withdrawn.len() as u16);
        buf.put_slice(&withdrawn);
        buf.put_u16(attributes.len() as u16);
        buf.put_slice(&attributes);
        encode_prefixes(&self.announced_routes, buf);
        Ok(())
    }
}

fn decode_attributes(
    mut buf: &[u8],
    options: &WireOptions,
) -> Result<Vec<PathAttribute>, MalformedMessage> {
    let malformed = MalformedMessage::malformed_attributes;
    let mut seen = [false; 256];
    let mut attributes = vec![];
    while !buf.is_empty() {
        let start = buf;
        let header = take(&mut buf, 2).ok_or_else(malformed)?;
        let (flags, type_code) = (header[0], header[1]);
        let len = if flags & FLAG_EXTENDED_LENGTH != 0 {
            usize::from(NetworkEndian::read_u16(take(&mut buf, 2).ok_or_else(malformed)?))
        } else {
            usize::from(take(&mut buf, 1).ok_or_else(malformed)?[0])
        };
        let value = take(&mut buf, len).ok_or_else(malformed)?;
        let raw = &start[..start.len() - buf.len()];
        if seen[usize::from(type_code)] {
            return Err(malformed());
        }
        seen[usize::from(type_code)] = true;
        attributes.push(PathAttribute::decode(
            flags & !FLAG_EXTENDED_LENGTH,
            type_code,
            value,
            raw,
            options,
        )?);
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_octet() -> WireOptions {
        WireOptions::new(false)
    }

    fn round_trip(update: &Update, options: &WireOptions) -> Update {
        let mut buf = BytesMut::new();
        update.encode(options, &mut buf).unwrap();
        Update::decode(&buf, options).unwrap()
    }

    fn ipv4_update() -> Update {
        Update {
            withdrawn_routes: vec![],
            attributes: vec![
                PathAttribute::Origin(Origin::Incomplete),
                PathAttribute::AsPath(AsPath::sequence(vec![65000])),
                PathAttribute::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
            ],
            announced_routes: vec!["192.0.2.0/24".parse().unwrap()],
        }
    }

    #[test]
    fn test_encode_ipv4_update() {
        let mut buf = BytesMut::new();
        ipv4_update().encode(&two_octet(), &mut buf).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0, 0, // No withdrawals
            0, 18, // Attributes length
            0x40, 1, 1, 2,
            0x40, 2, 4, 2, 1, 0xfd, 0xe8,
            0x40, 3, 4, 10, 0, 0, 1,
            24, 192, 0, 2,
        ];
        assert_eq!(buf.to_vec(), expected);
    }

    #[test]
    fn test_mp_reach_ipv6() {
        let update = Update {
            withdrawn_routes: vec![],
            attributes: vec![
                PathAttribute::MpReach(MpReach {
                    family: Family::IPV6_UNICAST,
                    next_hops: vec!["2001:db8::1".parse().unwrap(), "fe80::1".parse().unwrap()],
                    announced_routes: vec!["2001:db8:1::/48".parse().unwrap()],
                }),
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(AsPath::sequence(vec![4200000000, 65000])),
                PathAttribute::MpUnreach(MpUnreach {
                    family: Family::IPV6_UNICAST,
                    withdrawn_routes: vec!["2001:db8:2::/64".parse().unwrap()],
                }),
                PathAttribute::LargeCommunities(vec![LargeCommunity::new(4200000000, 1, 2)]),
            ],
            announced_routes: vec![],
        };
        let options = WireOptions::new(true);
        assert_eq!(round_trip(&update, &options), update);
        assert_eq!(update.announced_count(), 1);
        assert_eq!(update.withdrawn_count(), 1);
    }

    #[test]
    fn test_two_octet_as_path_uses_as_trans() {
        let update = Update {
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(AsPath::sequence(vec![4200000000, 65000])),
                PathAttribute::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
                PathAttribute::As4Path(AsPath::sequence(vec![4200000000, 65000])),
            ],
            ..ipv4_update()
        };
        let decoded = round_trip(&update, &two_octet());
        assert_eq!(
            decoded.as_path(),
            Some(&AsPath::sequence(vec![u32::from(AS_TRANS), 65000]))
        );
        assert_eq!(
            decoded.get(ATTR_AS4_PATH),
            Some(&PathAttribute::As4Path(AsPath::sequence(vec![4200000000, 65000])))
        );
    }

    #[test]
    fn test_missing_well_known() {
        let mut update = ipv4_update();
        update.attributes.retain(|a| a.type_code() != ATTR_NEXT_HOP);
        let mut buf = BytesMut::new();
        update.encode(&two_octet(), &mut buf).unwrap();
        let err = Update::decode(&buf, &two_octet()).unwrap_err();
        assert_eq!(err.subcode, update_error::MISSING_WELL_KNOWN_ATTRIBUTE);
        assert_eq!(err.data, vec![ATTR_NEXT_HOP]);

        // Withdraw-only needs nothing
        let withdraw = Update {
            withdrawn_routes: vec!["192.0.2.0/24".parse().unwrap()],
            ..Update::default()
        };
        assert_eq!(round_trip(&withdraw, &two_octet()), withdraw);
    }

    #[test]
    fn test_attribute_errors() {
        let decode = |attrs: &[u8]| {
            let mut body = vec![0, 0, 0, attrs.len() as u8];
            body.extend_from_slice(attrs);
            Update::decode(&body, &two_octet()).unwrap_err()
        };
        // ORIGIN flagged optional
        let err = decode(&[0xc0, 1, 1, 0]);
        assert_eq!(err.subcode, update_error::ATTRIBUTE_FLAGS_ERROR);
        assert_eq!(err.data, vec![0xc0, 1, 1, 0]);
        // ORIGIN with 2 bytes
        assert_eq!(decode(&[0x40, 1, 2, 0, 0]).subcode, update_error::ATTRIBUTE_LENGTH_ERROR);
        // ORIGIN value 5
        assert_eq!(decode(&[0x40, 1, 1, 5]).subcode, update_error::INVALID_ORIGIN_ATTRIBUTE);
        // NEXT_HOP 0.0.0.0
        assert_eq!(
            decode(&[0x40, 3, 4, 0, 0, 0, 0]).subcode,
            update_error::INVALID_NEXT_HOP_ATTRIBUTE
        );
        // AS_PATH with unknown segment type
        assert_eq!(
            decode(&[0x40, 2, 4, 9, 1, 0xfd, 0xe8]).subcode,
            update_error::MALFORMED_AS_PATH
        );
        // Attribute length past the end of the list
        assert_eq!(decode(&[0x40, 1, 9, 0]).subcode, update_error::MALFORMED_ATTRIBUTE_LIST);
        // Duplicate attribute
        assert_eq!(
            decode(&[0x40, 1, 1, 0, 0x40, 1, 1, 0]).subcode,
            update_error::MALFORMED_ATTRIBUTE_LIST
        );
        // Unrecognized well-known attribute
        assert_eq!(
            decode(&[0x40, 99, 0]).subcode,
            update_error::UNRECOGNIZED_WELL_KNOWN_ATTRIBUTE
        );
    }

    #[test]
    fn test_invalid_network_field() {
        // /33 in IPv4 NLRI
        let body = [0, 0, 0, 0, 33, 10, 0, 0, 0, 0];
        let err = Update::decode(&body, &two_octet()).unwrap_err();
        assert_eq!(err.subcode, update_error::INVALID_NETWORK_FIELD);
        // Truncated prefix
        let body = [0, 0, 0, 0, 24, 10];
        let err = Update::decode(&body, &two_octet()).unwrap_err();
        assert_eq!(err.subcode, update_error::INVALID_NETWORK_FIELD);
    }

    #[test]
    fn test_unknown_attributes_preserved() {
        let update = Update {
            attributes: vec![
                PathAttribute::Unknown {
                    flags: 0xe0,
                    type_code: 99,
                    value: vec![1, 2, 3],
                },
                // MP_REACH for L2VPN EVPN is kept opaque
                PathAttribute::Unknown {
                    flags: 0x80,
                    type_code: ATTR_MP_REACH,
                    value: vec![0, 25, 70, 4, 10, 0, 0, 1, 0],
                },
            ],
            ..Update::default()
        };
        assert_eq!(round_trip(&update, &two_octet()), update);
    }

    #[test]
    fn test_extended_length_attribute() {
        let communities: Vec<u32> = (0..100).collect();
        let update = Update {
            attributes: vec![
                PathAttribute::Origin(Origin::Egp),
                PathAttribute::AsPath(AsPath::default()),
                PathAttribute::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
                PathAttribute::Communities(communities),
                PathAttribute::Aggregator {
                    asn: 65000,
                    address: Ipv4Addr::new(10, 0, 0, 9),
                },
                PathAttribute::AtomicAggregate,
            ],
            ..ipv4_update()
        };
        assert_eq!(round_trip(&update, &two_octet()), update);
    }

    #[test]
    fn test_as_path_prepend_and_display() {
        let mut path = AsPath::sequence(vec![65002]);
        path.prepend(65001);
        assert_eq!(path.first(), Some(65001));
        path.segments.push(Segment::Set(vec![65010, 65011]));
        assert_eq!(path.to_string(), "65001 65002 {65010 65011}");

        let mut empty = AsPath::default();
        empty.prepend(65000);
        assert_eq!(empty, AsPath::sequence(vec![65000]));
        assert!(!empty.has_four_octet());
    }
}
