//! BGP-4 messages and their wire format (RFC 4271)
//!
//! Every message starts with a fixed 19 byte header:
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Marker (16 x 0xff)            |
//! +-----------------------+-----------+-----------+
//! |      Length (u16)     | Type (u8) |  Body...  |
//! +-----------------------+-----------+-----------+
//! ```
//!
//! [`decode`] is a streaming parser: it leaves the buffer untouched until a full
//! message is available, so it can be fed from arbitrarily split TCP reads.
mod community;
mod error;
mod family;
mod notification;
mod open;
mod route_refresh;
mod update;

pub use community::{Community, CommunityList, LargeCommunity};
pub use error::{EncodeError, MalformedMessage};
pub use family::{Afi, Families, Family, Safi};
pub use notification::{
    cease, fsm_error, header_error, open_error, update_error, ErrorCode, Notification,
};
pub use open::{Capability, Open, BGP_VERSION};
pub use route_refresh::RouteRefresh;
pub use update::{AsPath, MpReach, MpUnreach, Origin, PathAttribute, Segment, Update, AS_TRANS};

use std::convert::TryFrom;
use std::fmt;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, Bytes, BytesMut};

pub const MARKER: [u8; 16] = [0xff; 16];
pub const HEADER_LEN: usize = 19;
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Settings negotiated on a session that change how bodies are encoded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WireOptions {
    /// Both speakers advertised the 4-octet AS capability (RFC 6793)
    pub four_octet_asn: bool,
}

impl WireOptions {
    pub fn new(four_octet_asn: bool) -> Self {
        Self { four_octet_asn }
    }

    pub(crate) fn asn_size(&self) -> usize {
        if self.four_octet_asn {
            4
        } else {
            2
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Open,
    Update,
    Notification,
    KeepAlive,
    RouteRefresh,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Open => 1,
            MessageType::Update => 2,
            MessageType::Notification => 3,
            MessageType::KeepAlive => 4,
            MessageType::RouteRefresh => 5,
        }
    }

    /// Length bounds for each message type, header included
    fn length_is_valid(self, length: usize) -> bool {
        match self {
            MessageType::Open => length >= 29,
            MessageType::Update => length >= 23,
            MessageType::Notification => length >= 21,
            MessageType::KeepAlive => length == HEADER_LEN,
            MessageType::RouteRefresh => length == 23,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::KeepAlive),
            5 => Ok(MessageType::RouteRefresh),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            MessageType::Open => "OPEN",
            MessageType::Update => "UPDATE",
            MessageType::Notification => "NOTIFICATION",
            MessageType::KeepAlive => "KEEPALIVE",
            MessageType::RouteRefresh => "ROUTEREFRESH",
        };
        write!(f, "{}", word)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
    RouteRefresh(RouteRefresh),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::KeepAlive => MessageType::KeepAlive,
            Message::RouteRefresh(_) => MessageType::RouteRefresh,
        }
    }

    /// Append the framed message to `buf`
    ///
    /// On error `buf` is left as it was before the call.
    pub fn encode(&self, options: &WireOptions, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let start = buf.len();
        buf.put_slice(&MARKER);
        buf.put_u16(0); // Patched below once the body length is known
        buf.put_u8(self.message_type().code());
        let body = match self {
            Message::Open(open) => open.encode(buf),
            Message::Update(update) => update.encode(options, buf),
            Message::Notification(notification) => {
                notification.encode(buf);
                Ok(())
            }
            Message::KeepAlive => Ok(()),
            Message::RouteRefresh(refresh) => {
                refresh.encode(buf);
                Ok(())
            }
        };
        if let Err(err) = body {
            buf.truncate(start);
            return Err(err);
        }
        let length = buf.len() - start;
        if length > MAX_MESSAGE_LEN {
            buf.truncate(start);
            return Err(EncodeError::TooLarge(length));
        }
        NetworkEndian::write_u16(&mut buf[start + 16..start + 18], length as u16);
        Ok(())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message_type())
    }
}

/// Encode a single message into a new buffer
pub fn encode(message: &Message, options: &WireOptions) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    message.encode(options, &mut buf)?;
    Ok(buf.freeze())
}

/// Try to decode one message from the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed; in that case nothing is consumed.
/// Once a full message is available its bytes are removed from `buf`, whether or
/// not the body turns out to be valid.
pub fn decode(
    buf: &mut BytesMut,
    options: &WireOptions,
) -> Result<Option<Message>, MalformedMessage> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    if buf[..16] != MARKER {
        return Err(MalformedMessage::header(
            header_error::CONNECTION_NOT_SYNCHRONIZED,
            vec![],
        ));
    }
    let length = usize::from(NetworkEndian::read_u16(&buf[16..18]));
    if !(HEADER_LEN..=MAX_MESSAGE_LEN).contains(&length) {
        return Err(MalformedMessage::bad_length(length));
    }
    let message_type = MessageType::try_from(buf[18])
        .map_err(|code| MalformedMessage::header(header_error::BAD_MESSAGE_TYPE, vec![code]))?;
    if !message_type.length_is_valid(length) {
        return Err(MalformedMessage::bad_length(length));
    }
    if buf.len() < length {
        buf.reserve(length - buf.len());
        return Ok(None);
    }

    let frame = buf.split_to(length);
    let body = &frame[HEADER_LEN..];
    let message = match message_type {
        MessageType::Open => Message::Open(Open::decode(body)?),
        MessageType::Update => Message::Update(Update::decode(body, options)?),
        MessageType::Notification => Message::Notification(Notification::decode(body)?),
        MessageType::KeepAlive => Message::KeepAlive,
        MessageType::RouteRefresh => Message::RouteRefresh(RouteRefresh::decode(body)?),
    };
    Ok(Some(message))
}

/// Split `len` bytes off the front of `buf`, or `None` if it is too short
pub(crate) fn take<'a>(buf: &mut &'a [u8], len: usize) -> Option<&'a [u8]> {
    if buf.len() < len {
        return None;
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn keepalive_bytes() -> Vec<u8> {
        let mut bytes = vec![0xff; 16];
        bytes.extend_from_slice(&[0, 19, 4]);
        bytes
    }

    fn sample_messages() -> Vec<Message> {
        let update = Update {
            withdrawn_routes: vec!["10.9.0.0/16".parse().unwrap()],
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(AsPath::sequence(vec![65001, 65002])),
                PathAttribute::NextHop(Ipv4Addr::new(10, 0, 0, 2)),
                PathAttribute::MultiExitDisc(50),
            ],
            announced_routes: vec!["10.1.0.0/24".parse().unwrap(), "10.2.0.0/23".parse().unwrap()],
        };
        vec![
            Message::Open(Open::new(65000, 90, Ipv4Addr::new(1, 1, 1, 1), vec![
                Capability::MultiProtocol(Family::IPV4_UNICAST),
                Capability::RouteRefresh,
                Capability::FourOctetAsn(65000),
            ])),
            Message::Update(update),
            Message::KeepAlive,
            Message::Notification(Notification::new(ErrorCode::Cease, cease::ADMINISTRATIVE_SHUTDOWN)),
            Message::RouteRefresh(RouteRefresh::new(Family::IPV6_UNICAST)),
        ]
    }

    #[test]
    fn test_encode_keepalive() {
        let bytes = encode(&Message::KeepAlive, &WireOptions::default()).unwrap();
        assert_eq!(bytes.to_vec(), keepalive_bytes());
    }

    #[test]
    fn test_round_trip_each_type() {
        let options = WireOptions::new(true);
        for message in sample_messages() {
            let mut buf = BytesMut::from(&encode(&message, &options).unwrap()[..]);
            let length = NetworkEndian::read_u16(&buf[16..18]) as usize;
            assert_eq!(length, buf.len(), "length field for {}", message);
            let decoded = decode(&mut buf, &options).unwrap();
            assert_eq!(decoded, Some(message));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_streaming_decode_matches_single_read() {
        let options = WireOptions::new(true);
        let mut stream = BytesMut::new();
        for message in sample_messages() {
            message.encode(&options, &mut stream).unwrap();
        }
        let all_at_once = {
            let mut buf = stream.clone();
            let mut out = vec![];
            while let Some(message) = decode(&mut buf, &options).unwrap() {
                out.push(message);
            }
            out
        };
        assert_eq!(all_at_once.len(), 5);

        // Feed the same stream in uneven chunks
        for chunk_size in [1, 2, 7, 19, 20, 64] {
            let mut buf = BytesMut::new();
            let mut out = vec![];
            for chunk in stream.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                while let Some(message) = decode(&mut buf, &options).unwrap() {
                    out.push(message);
                }
            }
            assert_eq!(out, all_at_once, "chunk size {}", chunk_size);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_partial_header_needs_more_bytes() {
        let bytes = keepalive_bytes();
        let mut buf = BytesMut::from(&bytes[..18]);
        assert_eq!(decode(&mut buf, &WireOptions::default()).unwrap(), None);
        assert_eq!(buf.len(), 18);
    }

    #[test]
    fn test_bad_marker() {
        let mut bytes = keepalive_bytes();
        bytes[3] = 0;
        let mut buf = BytesMut::from(&bytes[..]);
        let err = decode(&mut buf, &WireOptions::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MessageHeader);
        assert_eq!(err.subcode, header_error::CONNECTION_NOT_SYNCHRONIZED);
    }

    #[test]
    fn test_bad_length() {
        let mut bytes = keepalive_bytes();
        bytes[16..18].copy_from_slice(&5000u16.to_be_bytes());
        let mut buf = BytesMut::from(&bytes[..]);
        let err = decode(&mut buf, &WireOptions::default()).unwrap_err();
        assert_eq!(err.subcode, header_error::BAD_MESSAGE_LENGTH);
        assert_eq!(err.data, vec![0x13, 0x88]);

        // KEEPALIVE must be exactly 19 bytes
        let mut bytes = keepalive_bytes();
        bytes[16..18].copy_from_slice(&20u16.to_be_bytes());
        bytes.push(0);
        let mut buf = BytesMut::from(&bytes[..]);
        let err = decode(&mut buf, &WireOptions::default()).unwrap_err();
        assert_eq!(err.subcode, header_error::BAD_MESSAGE_LENGTH);
    }

    #[test]
    fn test_bad_type() {
        let mut bytes = keepalive_bytes();
        bytes[18] = 9;
        let mut buf = BytesMut::from(&bytes[..]);
        let err = decode(&mut buf, &WireOptions::default()).unwrap_err();
        assert_eq!(err.subcode, header_error::BAD_MESSAGE_TYPE);
        assert_eq!(err.data, vec![9]);
        assert_eq!(
            err.to_notification(),
            Notification::new(ErrorCode::MessageHeader, 3).with_data(vec![9])
        );
    }

    #[test]
    fn test_encode_too_large() {
        let routes: Vec<_> = (0..2000u32)
            .map(|i| format!("10.{}.{}.0/24", i / 256, i % 256).parse().unwrap())
            .collect();
        let update = Update {
            withdrawn_routes: routes,
            attributes: vec![],
            announced_routes: vec![],
        };
        let mut buf = BytesMut::from(&b"abc"[..]);
        let err = Message::Update(update)
            .encode(&WireOptions::default(), &mut buf)
            .unwrap_err();
        assert!(matches!(err, EncodeError::TooLarge(_)));
        assert_eq!(&buf[..], b"abc");
    }
}
