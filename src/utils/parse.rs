use std::net::IpAddr;

use ipnetwork::IpNetwork;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("ParseError: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: String) -> Self {
        ParseError { reason }
    }
}

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> Result<u32, ParseError> {
    // Parse to list of u32, since we should support 4 byte ASN as a single int
    // (E.g. "4259840100")
    let mut chunks = [0; 2];
    let check_for_overflow = value.contains('.');
    // Iterate through chunks in reverse, so if there's no dot (only one number),
    // it will be in the least significant position
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > u32::from(u16::MAX) {
            return Err(ParseError::new(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    Ok((chunks[1] << 16) + chunks[0])
}

/// Parse a CIDR prefix (E.g. "192.168.0.0/24"), rejecting prefixes with host bits set
///
/// A bare address is taken as a host route.
pub fn network_from_str(prefix: &str) -> Result<IpNetwork, ParseError> {
    let network: IpNetwork = prefix
        .trim()
        .parse()
        .map_err(|_| ParseError::new(format!("Not a valid prefix: '{}'", prefix)))?;
    if network.ip() != network.network() {
        return Err(ParseError::new(format!(
            "Prefix '{}' has host bits set (network is {}/{})",
            prefix,
            network.network(),
            network.prefix()
        )));
    }
    Ok(network)
}

/// Parse a single IP address, E.g. for a next hop or peer address
pub fn addr_from_str(addr: &str) -> Result<IpAddr, ParseError> {
    addr.trim()
        .parse()
        .map_err(|_| ParseError::new(format!("Not a valid IP address: '{}'", addr)))
}
