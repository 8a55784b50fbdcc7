use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::ParseError;

/// Address Family Identifier
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Afi {
    Ipv4,
    Ipv6,
    Other(u16),
}

impl From<u16> for Afi {
    fn from(value: u16) -> Self {
        match value {
            1 => Afi::Ipv4,
            2 => Afi::Ipv6,
            other => Afi::Other(other),
        }
    }
}

impl From<Afi> for u16 {
    fn from(afi: Afi) -> u16 {
        match afi {
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::Other(other) => other,
        }
    }
}

impl fmt::Display for Afi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Afi::Ipv4 => write!(f, "IPv4"),
            Afi::Ipv6 => write!(f, "IPv6"),
            Afi::Other(afi) => write!(f, "AFI({})", afi),
        }
    }
}

impl FromStr for Afi {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ipv4" => Ok(Afi::Ipv4),
            "ipv6" => Ok(Afi::Ipv6),
            other => Err(ParseError::new(format!("Unsupported AFI: '{}'", other))),
        }
    }
}

/// Subsequent Address Family Identifier
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Safi {
    Unicast,
    Multicast,
    Other(u8),
}

impl From<u8> for Safi {
    fn from(value: u8) -> Self {
        match value {
            1 => Safi::Unicast,
            2 => Safi::Multicast,
            other => Safi::Other(other),
        }
    }
}

impl From<Safi> for u8 {
    fn from(safi: Safi) -> u8 {
        match safi {
            Safi::Unicast => 1,
            Safi::Multicast => 2,
            Safi::Other(other) => other,
        }
    }
}

impl fmt::Display for Safi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Safi::Unicast => write!(f, "Unicast"),
            Safi::Multicast => write!(f, "Multicast"),
            Safi::Other(safi) => write!(f, "SAFI({})", safi),
        }
    }
}

impl FromStr for Safi {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unicast" => Ok(Safi::Unicast),
            "multicast" => Ok(Safi::Multicast),
            other => Err(ParseError::new(format!("Unsupported SAFI: '{}'", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Family {
    pub afi: Afi,
    pub safi: Safi,
}

impl Family {
    pub const IPV4_UNICAST: Family = Family::new(Afi::Ipv4, Safi::Unicast);
    pub const IPV4_MULTICAST: Family = Family::new(Afi::Ipv4, Safi::Multicast);
    pub const IPV6_UNICAST: Family = Family::new(Afi::Ipv6, Safi::Unicast);
    pub const IPV6_MULTICAST: Family = Family::new(Afi::Ipv6, Safi::Multicast);

    pub const fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }

    /// Family with NLRI encoding this crate understands
    pub fn is_known(&self) -> bool {
        !matches!(self.afi, Afi::Other(_)) && !matches!(self.safi, Safi::Other(_))
    }

    /// Maximum prefix length for the family's addresses
    pub fn max_prefix_len(&self) -> u8 {
        match self.afi {
            Afi::Ipv6 => 128,
            _ => 32,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl FromStr for Family {
    type Err = ParseError;

    /// Parse from "ipv4 unicast" style text
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(ParseError::new(format!("Incorrect family format: '{}'", s)));
        }
        Ok(Family::new(parts[0].parse()?, parts[1].parse()?))
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Families(BTreeSet<Family>);

impl Families {
    pub fn new(families: Vec<Family>) -> Self {
        Self(families.into_iter().collect())
    }

    pub fn common(&self, other: &Families) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn contains(&self, family: Family) -> bool {
        self.0.contains(&family)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::btree_set::Iter<Family> {
        self.0.iter()
    }
}

impl Serialize for Families {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for Families {
    fn deserialize<D>(deserializer: D) -> Result<Families, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Families::new(Vec::<Family>::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error, StrDeserializer};
    use serde::de::IntoDeserializer;

    #[test]
    fn test_serialize_family() {
        assert_eq!(&Family::IPV4_UNICAST.to_string(), "IPv4 Unicast");
        assert_eq!(&Family::IPV6_MULTICAST.to_string(), "IPv6 Multicast");
        assert_eq!(
            &Family::new(Afi::from(25), Safi::from(70)).to_string(),
            "AFI(25) SAFI(70)"
        );
    }

    #[test]
    fn test_deserialize_family() {
        let deserializer: StrDeserializer<Error> = "ipv6 unicast".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::IPV6_UNICAST);

        let deserializer: StrDeserializer<Error> = "IPv4 Multicast".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::IPV4_MULTICAST);

        let deserializer: StrDeserializer<Error> = "ipv4 flow".into_deserializer();
        assert!(Family::deserialize(deserializer).is_err());
    }

    #[test]
    fn test_common_families() {
        let ours = Families::new(vec![Family::IPV4_UNICAST, Family::IPV6_UNICAST]);
        let theirs = Families::new(vec![Family::IPV6_UNICAST, Family::IPV4_MULTICAST]);
        let common = ours.common(&theirs);
        assert!(common.contains(Family::IPV6_UNICAST));
        assert!(!common.contains(Family::IPV4_UNICAST));
        assert_eq!(common.iter().count(), 1);
    }
}
