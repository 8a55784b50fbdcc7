use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};

use super::{Family, MalformedMessage};

/// ROUTE-REFRESH request for one family (RFC 2918)
///
/// `subtype` is the RFC 7313 demarcation: 0 normal request, 1 BoRR, 2 EoRR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteRefresh {
    pub family: Family,
    pub subtype: u8,
}

impl RouteRefresh {
    pub fn new(family: Family) -> Self {
        Self { family, subtype: 0 }
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, MalformedMessage> {
        if body.len() != 4 {
            return Err(MalformedMessage::bad_length(body.len() + super::HEADER_LEN));
        }
        Ok(Self {
            family: Family::new(NetworkEndian::read_u16(body).into(), body[3].into()),
            subtype: body[2],
        })
    }

    pub(super) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.family.afi.into());
        buf.put_u8(self.subtype);
        buf.put_u8(self.family.safi.into());
    }
}
