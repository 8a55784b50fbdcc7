//! BGP finite state machine (RFC 4271 8.2.2)
//!
//! Only the state transitions live here. Timers, NOTIFICATIONs and TCP handling
//! are driven by the peer task based on the transitions this table returns.
use log::debug;

use super::{SessionError, SessionState};
use crate::message::fsm_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEvent {
    /// Event 1: start an active peer
    ManualStart,
    /// Event 2: administrative stop
    ManualStop,
    /// Event 3: restart after a backoff
    AutomaticStart,
    /// Event 4: start a passive peer, waiting for the peer to connect
    ManualStartPassive,
    /// Event 9
    ConnectRetryTimerExpires,
    /// Event 10
    HoldTimerExpires,
    /// Event 11
    KeepaliveTimerExpires,
    /// Events 16/17: a TCP connection came up (either direction)
    TcpConnectionConfirmed,
    /// Event 18
    TcpConnectionFails,
    /// Event 19
    OpenReceived,
    /// Events 21 and 22: header or OPEN errors
    MessageError,
    /// Event 25
    NotificationReceived,
    /// Event 26
    KeepaliveReceived,
    /// Event 27
    UpdateReceived,
    /// Event 28
    UpdateMessageError,
    /// ROUTE-REFRESH is only meaningful once Established
    RouteRefreshReceived,
}

#[derive(Debug)]
pub struct Fsm {
    state: SessionState,
    passive: bool,
}

impl Fsm {
    pub fn new(passive: bool) -> Self {
        Self {
            state: SessionState::Idle,
            passive,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Event that starts this peer from Idle
    pub fn start_event(&self) -> FsmEvent {
        if self.passive {
            FsmEvent::ManualStartPassive
        } else {
            FsmEvent::ManualStart
        }
    }

    /// Apply `event`, returning the new state
    ///
    /// Unexpected messages in OpenSent, OpenConfirm and Established are an FSM
    /// error: the state falls back to Idle and the error carries the subcode for
    /// the NOTIFICATION.
    pub fn handle_event(&mut self, event: FsmEvent) -> Result<SessionState, SessionError> {
        use FsmEvent::*;
        use SessionState::*;

        let next = match (self.state, event) {
            // ===== Idle =====
            (Idle, ManualStart) | (Idle, AutomaticStart) => {
                if self.passive {
                    Active
                } else {
                    Connect
                }
            }
            (Idle, ManualStartPassive) => Active,
            (Idle, _) => Idle,

            // ===== Connect =====
            (Connect, TcpConnectionConfirmed) => OpenSent,
            (Connect, ConnectRetryTimerExpires) => Connect,
            (Connect, TcpConnectionFails) => Idle,
            (Connect, ManualStop) => Idle,
            (Connect, ManualStart)
            | (Connect, AutomaticStart)
            | (Connect, ManualStartPassive) => Connect,
            (Connect, HoldTimerExpires)
            | (Connect, KeepaliveTimerExpires)
            | (Connect, OpenReceived)
            | (Connect, MessageError)
            | (Connect, NotificationReceived)
            | (Connect, KeepaliveReceived)
            | (Connect, UpdateReceived)
            | (Connect, UpdateMessageError)
            | (Connect, RouteRefreshReceived) => Idle,

            // ===== Active =====
            (Active, TcpConnectionConfirmed) => OpenSent,
            (Active, ConnectRetryTimerExpires) => {
                if self.passive {
                    Active
                } else {
                    Connect
                }
            }
            (Active, TcpConnectionFails) => Idle,
            (Active, ManualStop) => Idle,
            (Active, ManualStart) | (Active, AutomaticStart) | (Active, ManualStartPassive) => {
                Active
            }
            (Active, HoldTimerExpires)
            | (Active, KeepaliveTimerExpires)
            | (Active, OpenReceived)
            | (Active, MessageError)
            | (Active, NotificationReceived)
            | (Active, KeepaliveReceived)
            | (Active, UpdateReceived)
            | (Active, UpdateMessageError)
            | (Active, RouteRefreshReceived) => Idle,

            // ===== OpenSent =====
            (OpenSent, OpenReceived) => OpenConfirm,
            (OpenSent, TcpConnectionFails) => Active,
            (OpenSent, ManualStop)
            | (OpenSent, HoldTimerExpires)
            | (OpenSent, MessageError)
            | (OpenSent, NotificationReceived)
            | (OpenSent, UpdateMessageError) => Idle,
            (OpenSent, ManualStart)
            | (OpenSent, AutomaticStart)
            | (OpenSent, ManualStartPassive)
            | (OpenSent, ConnectRetryTimerExpires)
            | (OpenSent, KeepaliveTimerExpires)
            | (OpenSent, TcpConnectionConfirmed) => OpenSent,
            (OpenSent, KeepaliveReceived)
            | (OpenSent, UpdateReceived)
            | (OpenSent, RouteRefreshReceived) => {
                return self.fsm_error(fsm_error::UNEXPECTED_MESSAGE_IN_OPEN_SENT)
            }

            // ===== OpenConfirm =====
            (OpenConfirm, KeepaliveReceived) => Established,
            (OpenConfirm, KeepaliveTimerExpires) => OpenConfirm,
            (OpenConfirm, ManualStop)
            | (OpenConfirm, HoldTimerExpires)
            | (OpenConfirm, TcpConnectionFails)
            | (OpenConfirm, MessageError)
            | (OpenConfirm, NotificationReceived)
            | (OpenConfirm, UpdateMessageError) => Idle,
            (OpenConfirm, ManualStart)
            | (OpenConfirm, AutomaticStart)
            | (OpenConfirm, ManualStartPassive)
            | (OpenConfirm, ConnectRetryTimerExpires)
            | (OpenConfirm, TcpConnectionConfirmed) => OpenConfirm,
            (OpenConfirm, OpenReceived)
            | (OpenConfirm, UpdateReceived)
            | (OpenConfirm, RouteRefreshReceived) => {
                return self.fsm_error(fsm_error::UNEXPECTED_MESSAGE_IN_OPEN_CONFIRM)
            }

            // ===== Established =====
            (Established, KeepaliveReceived)
            | (Established, UpdateReceived)
            | (Established, RouteRefreshReceived)
            | (Established, KeepaliveTimerExpires) => Established,
            (Established, ManualStop)
            | (Established, HoldTimerExpires)
            | (Established, TcpConnectionFails)
            | (Established, MessageError)
            | (Established, NotificationReceived)
            | (Established, UpdateMessageError) => Idle,
            (Established, ManualStart)
            | (Established, AutomaticStart)
            | (Established, ManualStartPassive)
            | (Established, ConnectRetryTimerExpires)
            | (Established, TcpConnectionConfirmed) => Established,
            (Established, OpenReceived) => {
                return self.fsm_error(fsm_error::UNEXPECTED_MESSAGE_IN_ESTABLISHED)
            }
        };
        self.set_state(next);
        Ok(next)
    }

    /// Force the FSM back to Idle after a session ends
    pub fn reset(&mut self) {
        self.set_state(SessionState::Idle);
    }

    fn fsm_error(&mut self, subcode: u8) -> Result<SessionState, SessionError> {
        self.set_state(SessionState::Idle);
        Err(SessionError::FiniteStateMachine(subcode))
    }

    fn set_state(&mut self, next: SessionState) {
        if next != self.state {
            debug!("FSM went from {} to {}", self.state, next);
        }
        self.state = next;
    }
}
