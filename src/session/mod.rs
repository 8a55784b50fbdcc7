mod codec;
mod connector;
mod fsm;
mod handle;
mod hold_timer;
mod manager;
mod message_counts;
mod peer;
mod recorder;
mod session;

use std::fmt;
use std::io;
use std::net::Ipv4Addr;

use serde::Serialize;
use thiserror::Error;

pub use codec::{CodecError, MessageCodec, MessageProtocol};
pub use connector::{AsyncStream, Backoff, Connection, Connector, TcpConnector};
pub use fsm::{Fsm, FsmEvent};
pub(crate) use handle::SessionChannels;
pub use handle::{
    CloseReason, EnqueueError, MessageId, Negotiated, SessionCommand, SessionHandle, SessionStatus,
    UpdateBuilder,
};
pub use hold_timer::HoldTimer;
pub use manager::SessionManager;
pub use message_counts::MessageCounts;
pub use recorder::MessageRecorder;
pub use session::Session;

use crate::message::{
    cease, open_error, EncodeError, ErrorCode, MalformedMessage, Notification, AS_TRANS,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            SessionState::Idle => "Idle",
            SessionState::Connect => "Connect",
            SessionState::Active => "Active",
            SessionState::OpenSent => "OpenSent",
            SessionState::OpenConfirm => "OpenConfirm",
            SessionState::Established => "Established",
        };
        write!(f, "{}", word)
    }
}

/// Reasons a session ends
///
/// Every variant that ends a session on our side knows which NOTIFICATION to send.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Closed on request (shutdown, de-configuration, reset)
    #[error("Session closed: {0}")]
    Closed(CloseReason),
    /// Received an unexpected ASN. [received, expected]
    #[error("Open ASN Mismatch (received={0}, expected={1})")]
    OpenAsnMismatch(u32, u32),
    #[error("Unacceptable hold time {0}")]
    UnacceptableHoldTime(u16),
    #[error("Bad BGP identifier {0}")]
    BadBgpIdentifier(Ipv4Addr),
    /// Finite State Machine error, unexpected message [minor_err_code]
    #[error("Finite State Machine err [{0}]")]
    FiniteStateMachine(u8),
    /// Hold time expired. [interval]
    #[error("Hold time expired after {0} seconds")]
    HoldTimeExpired(u16),
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),
    #[error("Unable to encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("Received NOTIFICATION: {0}")]
    NotificationReceived(Notification),
    #[error("Connection closed by peer")]
    ConnectionClosed,
    /// Something happened in transport. [reason]
    #[error("Transport error [{0}]")]
    TransportError(String),
}

impl SessionError {
    /// NOTIFICATION to send to the peer before tearing down, if any
    pub fn notification(&self) -> Option<Notification> {
        use SessionError::*;
        let notification = match self {
            Closed(reason) => Notification::new(ErrorCode::Cease, reason.cease_subcode()),
            OpenAsnMismatch(received, _) => {
                let data = u16::try_from(*received)
                    .unwrap_or(AS_TRANS)
                    .to_be_bytes()
                    .to_vec();
                Notification::new(ErrorCode::OpenMessage, open_error::BAD_PEER_AS).with_data(data)
            }
            UnacceptableHoldTime(_) => Notification::new(
                ErrorCode::OpenMessage,
                open_error::UNACCEPTABLE_HOLD_TIME,
            ),
            BadBgpIdentifier(_) => Notification::new(
                ErrorCode::OpenMessage,
                open_error::BAD_BGP_IDENTIFIER,
            ),
            FiniteStateMachine(minor) => Notification::new(ErrorCode::FiniteStateMachine, *minor),
            HoldTimeExpired(_) => Notification::new(ErrorCode::HoldTimerExpired, 0),
            Malformed(malformed) => malformed.to_notification(),
            Encode(_) => Notification::new(ErrorCode::Cease, cease::OUT_OF_RESOURCES),
            NotificationReceived(_) | ConnectionClosed | TransportError(_) => return None,
        };
        Some(notification)
    }

    /// Whether the peer task should stop instead of reconnecting
    pub fn is_final(&self) -> bool {
        matches!(self, SessionError::Closed(_))
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::TransportError(error.to_string())
    }
}

impl From<CodecError> for SessionError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Malformed(malformed) => SessionError::Malformed(malformed),
            CodecError::Encode(err) => SessionError::Encode(err),
            CodecError::Io(err) => SessionError::TransportError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{fsm_error, header_error};

    #[test]
    fn test_error_notifications() {
        let n = SessionError::HoldTimeExpired(90).notification().unwrap();
        assert_eq!((n.code, n.subcode), (ErrorCode::HoldTimerExpired, 0));

        let n = SessionError::FiniteStateMachine(fsm_error::UNEXPECTED_MESSAGE_IN_OPEN_CONFIRM)
            .notification()
            .unwrap();
        assert_eq!((n.code.code(), n.subcode), (5, 2));

        let n = SessionError::Closed(CloseReason::Deconfigured)
            .notification()
            .unwrap();
        assert_eq!((n.code.code(), n.subcode), (6, 3));

        let n = SessionError::OpenAsnMismatch(65100, 65001).notification().unwrap();
        assert_eq!((n.code.code(), n.subcode), (2, 2));
        assert_eq!(n.data, vec![0xfe, 0x4c]);

        let malformed = MalformedMessage::header(header_error::BAD_MESSAGE_TYPE, vec![9]);
        let n = SessionError::from(malformed).notification().unwrap();
        assert_eq!((n.code.code(), n.subcode, n.data), (1, 3, vec![9]));

        assert!(SessionError::ConnectionClosed.notification().is_none());
        let received = Notification::new(ErrorCode::Cease, cease::ADMINISTRATIVE_RESET);
        assert!(SessionError::NotificationReceived(received).notification().is_none());
    }

    #[test]
    fn test_is_final() {
        assert!(SessionError::Closed(CloseReason::AdminShutdown).is_final());
        assert!(!SessionError::HoldTimeExpired(3).is_final());
    }
}
