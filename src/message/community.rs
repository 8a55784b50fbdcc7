use std::fmt;
use std::net::Ipv4Addr;
use std::slice::Iter;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Serialize, Serializer};

use crate::utils::ParseError;

// Well-known communities (RFC 1997, RFC 7999, RFC 8326, RFC 3765)
pub const NO_EXPORT: u32 = 0xFFFF_FF01;
pub const NO_ADVERTISE: u32 = 0xFFFF_FF02;
pub const NO_EXPORT_SUBCONFED: u32 = 0xFFFF_FF03;
pub const NO_PEER: u32 = 0xFFFF_FF04;
pub const BLACKHOLE: u32 = 0xFFFF_029A;
pub const GRACEFUL_SHUTDOWN: u32 = 0xFFFF_0000;

const WELL_KNOWN: [(&str, u32); 6] = [
    ("no-export", NO_EXPORT),
    ("no-advertise", NO_ADVERTISE),
    ("no-export-subconfed", NO_EXPORT_SUBCONFED),
    ("no-peer", NO_PEER),
    ("blackhole", BLACKHOLE),
    ("graceful-shutdown", GRACEFUL_SHUTDOWN),
];

// Extended community type/subtype bytes (RFC 4360, RFC 5668)
const EXT_TYPE_AS2: u8 = 0x00;
const EXT_TYPE_IPV4: u8 = 0x01;
const EXT_TYPE_AS4: u8 = 0x02;
const EXT_SUBTYPE_TARGET: u8 = 0x02;
const EXT_SUBTYPE_ORIGIN: u8 = 0x03;

/// Large community (RFC 8092)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LargeCommunity {
    pub global_admin: u32,
    pub local_data1: u32,
    pub local_data2: u32,
}

impl LargeCommunity {
    pub fn new(global_admin: u32, local_data1: u32, local_data2: u32) -> Self {
        Self {
            global_admin,
            local_data1,
            local_data2,
        }
    }
}

impl fmt::Display for LargeCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.global_admin, self.local_data1, self.local_data2
        )
    }
}

impl FromStr for LargeCommunity {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let chunks: Vec<_> = value.split(':').collect();
        if chunks.len() != 3 {
            return Err(invalid(value));
        }
        let parse = |chunk: &str| chunk.parse::<u32>().map_err(|_| invalid(value));
        Ok(Self::new(
            parse(chunks[0])?,
            parse(chunks[1])?,
            parse(chunks[2])?,
        ))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Community {
    Standard(u32),
    Extended(u64),
    Large(LargeCommunity),
}

fn invalid(value: &str) -> ParseError {
    ParseError::new(format!("Invalid community '{}'", value))
}

fn ext_community(kind: u8, subtype: u8, global: u64, global_bits: u32, local: u64) -> u64 {
    let local_bits = 48 - global_bits;
    (u64::from(kind) << 56) | (u64::from(subtype) << 48) | (global << local_bits) | local
}

/// Parse "target:ADMIN:NN" / "origin:ADMIN:NN", where ADMIN is an ASN or IPv4 address
fn parse_extended(subtype: u8, admin: &str, assigned: &str, value: &str) -> Result<u64, ParseError> {
    let assigned: u64 = assigned.parse().map_err(|_| invalid(value))?;
    if let Ok(addr) = admin.parse::<Ipv4Addr>() {
        if assigned > u64::from(u16::MAX) {
            return Err(invalid(value));
        }
        let global = u64::from(u32::from(addr));
        return Ok(ext_community(EXT_TYPE_IPV4, subtype, global, 32, assigned));
    }
    let asn: u64 = admin.parse().map_err(|_| invalid(value))?;
    if asn <= u64::from(u16::MAX) {
        if assigned > u64::from(u32::MAX) {
            return Err(invalid(value));
        }
        Ok(ext_community(EXT_TYPE_AS2, subtype, asn, 16, assigned))
    } else if asn <= u64::from(u32::MAX) {
        if assigned > u64::from(u16::MAX) {
            return Err(invalid(value));
        }
        Ok(ext_community(EXT_TYPE_AS4, subtype, asn, 32, assigned))
    } else {
        Err(invalid(value))
    }
}

fn ext_community_to_display(value: u64) -> String {
    let kind = (value >> 56) as u8;
    let subtype = (value >> 48) as u8;
    let name = match subtype {
        EXT_SUBTYPE_TARGET => "target",
        EXT_SUBTYPE_ORIGIN => "origin",
        _ => return format!("0x{:016x}", value),
    };
    match kind {
        EXT_TYPE_AS2 => format!(
            "{}:{}:{}",
            name,
            (value >> 32) & 0xffff,
            value & 0xffff_ffff
        ),
        EXT_TYPE_IPV4 => format!(
            "{}:{}:{}",
            name,
            Ipv4Addr::from(((value >> 16) & 0xffff_ffff) as u32),
            value & 0xffff
        ),
        EXT_TYPE_AS4 => format!(
            "{}:{}:{}",
            name,
            (value >> 16) & 0xffff_ffff,
            value & 0xffff
        ),
        _ => format!("0x{:016x}", value),
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Community::Standard(value) => {
                if let Some((name, _)) = WELL_KNOWN.iter().find(|(_, v)| v == value) {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}:{}", value >> 16, value & 0xffff)
                }
            }
            Community::Extended(value) => write!(f, "{}", ext_community_to_display(*value)),
            Community::Large(value) => write!(f, "{}", value),
        }
    }
}

impl FromStr for Community {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let lower = value.to_lowercase();
        if let Some((_, community)) = WELL_KNOWN.iter().find(|(name, _)| *name == lower) {
            return Ok(Community::Standard(*community));
        }
        let chunks: Vec<_> = lower.split(':').collect();
        match chunks.as_slice() {
            [high, low] => {
                let parse = |chunk: &str| chunk.parse::<u16>().map_err(|_| invalid(value));
                let (high, low) = (parse(high)?, parse(low)?);
                Ok(Community::Standard((u32::from(high) << 16) | u32::from(low)))
            }
            ["target", admin, assigned] => {
                parse_extended(EXT_SUBTYPE_TARGET, admin, assigned, value).map(Community::Extended)
            }
            ["origin", admin, assigned] => {
                parse_extended(EXT_SUBTYPE_ORIGIN, admin, assigned, value).map(Community::Extended)
            }
            [_, _, _] => value.parse().map(Community::Large),
            _ => Err(invalid(value)),
        }
    }
}

impl Serialize for Community {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CommunityList(pub Vec<Community>);

impl CommunityList {
    pub fn iter(&self) -> Iter<Community> {
        self.0.iter()
    }

    pub fn push(&mut self, community: Community) {
        self.0.push(community);
    }

    pub fn standard(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Standard(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn extended(&self) -> Vec<u64> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Extended(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn large(&self) -> Vec<LargeCommunity> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Large(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for CommunityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().format(" "))
    }
}
