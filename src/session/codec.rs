use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::AsyncStream;
use crate::message::{self, EncodeError, MalformedMessage, Message, WireOptions};

pub type MessageProtocol = Framed<Box<dyn AsyncStream>, MessageCodec>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Frames BGP messages on a byte stream
///
/// Starts with 2-octet AS encoding; switch once 4-octet AS is negotiated.
#[derive(Debug, Default)]
pub struct MessageCodec {
    options: WireOptions,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &WireOptions {
        &self.options
    }

    pub fn set_four_octet_asn(&mut self, enabled: bool) {
        self.options.four_octet_asn = enabled;
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(message::decode(buf, &self.options)?)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(message.encode(&self.options, buf)?)
    }
}
