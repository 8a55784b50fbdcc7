use thiserror::Error;

use super::notification::{header_error, open_error, update_error, ErrorCode, Notification};

/// A received message that violates the protocol
///
/// Carries the NOTIFICATION that should be sent back to the peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Malformed message: {code} (subcode {subcode})")]
pub struct MalformedMessage {
    pub code: ErrorCode,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl MalformedMessage {
    pub fn new(code: ErrorCode, subcode: u8, data: Vec<u8>) -> Self {
        Self {
            code,
            subcode,
            data,
        }
    }

    pub fn header(subcode: u8, data: Vec<u8>) -> Self {
        Self::new(ErrorCode::MessageHeader, subcode, data)
    }

    pub fn open(subcode: u8, data: Vec<u8>) -> Self {
        Self::new(ErrorCode::OpenMessage, subcode, data)
    }

    pub fn update(subcode: u8, data: Vec<u8>) -> Self {
        Self::new(ErrorCode::UpdateMessage, subcode, data)
    }

    pub(crate) fn malformed_open() -> Self {
        Self::open(open_error::UNSPECIFIC, vec![])
    }

    pub(crate) fn malformed_attributes() -> Self {
        Self::update(update_error::MALFORMED_ATTRIBUTE_LIST, vec![])
    }

    pub(crate) fn bad_length(length: usize) -> Self {
        Self::header(header_error::BAD_MESSAGE_LENGTH, (length as u16).to_be_bytes().to_vec())
    }

    pub fn to_notification(&self) -> Notification {
        Notification::new(self.code, self.subcode).with_data(self.data.clone())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Encoded message is {0} bytes, larger than the 4096 byte maximum")]
    TooLarge(usize),
    #[error("Field {0} does not fit its wire encoding")]
    FieldOverflow(&'static str),
}
