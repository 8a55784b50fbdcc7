//! JSON schema for update requests and the validation that turns one into
//! something the session can send
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use super::InjectError;
use crate::message::{Afi, Community, CommunityList, Family, LargeCommunity, Origin, Safi};
use crate::utils::{addr_from_str, asn_from_dotted, network_from_str, ParseError};

/// A single value or a list of them
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(vec![])
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// ASN given as a number or a string ("65000", "65000.100")
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Asn {
    Number(u64),
    Text(String),
}

impl Asn {
    fn to_u32(&self) -> Result<u32, String> {
        let asn = match self {
            Asn::Number(asn) => u32::try_from(*asn).map_err(|_| format!("ASN {} is too large", asn))?,
            Asn::Text(text) => asn_from_dotted(text.trim()).map_err(|err| err.reason)?,
        };
        if asn == 0 {
            return Err("ASN 0 is reserved".to_string());
        }
        Ok(asn)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    /// Prefixes to announce
    #[serde(default)]
    pub nlri: OneOrMany<String>,
    /// Prefixes to withdraw
    #[serde(default)]
    pub withdraw: OneOrMany<String>,
    /// "unicast" (default) or "multicast"
    pub safi: Option<String>,
    pub next_hop: Option<String>,
    pub as_path: Option<Vec<Asn>>,
    /// "igp", "egp" or "incomplete" (default)
    pub origin: Option<String>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub large_communities: Vec<String>,
    #[serde(default)]
    pub atomic_aggregate: bool,
}

/// An update request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedUpdate {
    pub family: Family,
    pub announce: Vec<IpNetwork>,
    pub withdraw: Vec<IpNetwork>,
    /// Set whenever `announce` is not empty
    pub next_hop: Option<IpAddr>,
    pub as_path: Vec<u32>,
    pub origin: Origin,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub communities: CommunityList,
    pub atomic_aggregate: bool,
}

fn invalid(field: &str, reason: impl Into<String>) -> InjectError {
    InjectError::InvalidRequest {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_prefixes(field: &str, prefixes: Vec<String>) -> Result<Vec<IpNetwork>, InjectError> {
    prefixes
        .iter()
        .map(|prefix| network_from_str(prefix).map_err(|err| invalid(field, err.reason)))
        .collect()
}

fn afi_of(addr: IpAddr) -> Afi {
    match addr {
        IpAddr::V4(_) => Afi::Ipv4,
        IpAddr::V6(_) => Afi::Ipv6,
    }
}

impl UpdateRequest {
    pub fn validate(self) -> Result<ValidatedUpdate, InjectError> {
        let announce = parse_prefixes("nlri", self.nlri.into_vec())?;
        let withdraw = parse_prefixes("withdraw", self.withdraw.into_vec())?;
        if announce.is_empty() && withdraw.is_empty() {
            return Err(invalid(
                "nlri",
                "at least one prefix to announce or withdraw is required",
            ));
        }

        // One address family per request
        let afi = match announce.first().or_else(|| withdraw.first()) {
            Some(prefix) => afi_of(prefix.ip()),
            None => Afi::Ipv4,
        };
        if let Some(prefix) = announce.iter().find(|p| afi_of(p.ip()) != afi) {
            return Err(invalid("nlri", format!("{} mixes address families", prefix)));
        }
        if let Some(prefix) = withdraw.iter().find(|p| afi_of(p.ip()) != afi) {
            return Err(invalid("withdraw", format!("{} mixes address families", prefix)));
        }
        let safi = match self.safi.as_deref() {
            None => Safi::Unicast,
            Some(safi) => match Safi::from_str(safi) {
                Ok(safi @ Safi::Unicast) | Ok(safi @ Safi::Multicast) => safi,
                _ => return Err(invalid("safi", format!("Unsupported SAFI '{}'", safi))),
            },
        };
        let family = Family::new(afi, safi);

        let next_hop = match (self.next_hop, announce.is_empty()) {
            (Some(next_hop), _) => {
                let next_hop = addr_from_str(&next_hop).map_err(|err| invalid("next_hop", err.reason))?;
                if afi_of(next_hop) != afi {
                    return Err(invalid(
                        "next_hop",
                        format!("{} is not in the same address family as the NLRI", next_hop),
                    ));
                }
                let broadcast = matches!(next_hop, IpAddr::V4(addr) if addr.is_broadcast());
                if next_hop.is_unspecified() || next_hop.is_multicast() || broadcast {
                    return Err(invalid(
                        "next_hop",
                        format!("{} is not a usable next hop", next_hop),
                    ));
                }
                Some(next_hop)
            }
            (None, false) => return Err(invalid("next_hop", "required when announcing")),
            (None, true) => None,
        };

        let as_path = match self.as_path {
            Some(asns) => asns
                .iter()
                .map(|asn| asn.to_u32().map_err(|reason| invalid("as_path", reason)))
                .collect::<Result<Vec<u32>, _>>()?,
            None if !announce.is_empty() => {
                return Err(invalid("as_path", "required when announcing"))
            }
            None => vec![],
        };
        if as_path.len() > usize::from(u8::MAX) {
            return Err(invalid("as_path", "more than 255 ASNs"));
        }

        let origin = match self.origin {
            Some(origin) => origin
                .parse()
                .map_err(|err: ParseError| invalid("origin", err.reason))?,
            None => Origin::Incomplete,
        };

        let mut communities = CommunityList::default();
        for community in &self.communities {
            let community: Community = community
                .parse()
                .map_err(|err: ParseError| invalid("communities", err.reason))?;
            communities.push(community);
        }
        for community in &self.large_communities {
            let community: LargeCommunity = community.parse().map_err(
                |err: ParseError| invalid("large_communities", err.reason),
            )?;
            communities.push(Community::Large(community));
        }

        Ok(ValidatedUpdate {
            family,
            announce,
            withdraw,
            next_hop,
            as_path,
            origin,
            med: self.med,
            local_pref: self.local_pref,
            communities,
            atomic_aggregate: self.atomic_aggregate,
        })
    }
}
