use serde::Serialize;

use crate::message::MessageType;

/// Sent/received counters for one message type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub sent: u64,
    pub received: u64,
}

/// Per message type counters for a session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessageCounts {
    pub open: Counter,
    pub update: Counter,
    pub notification: Counter,
    pub keepalive: Counter,
    pub route_refresh: Counter,
}

impl MessageCounts {
    pub fn new() -> Self {
        MessageCounts::default()
    }

    fn counter(&mut self, message_type: MessageType) -> &mut Counter {
        match message_type {
            MessageType::Open => &mut self.open,
            MessageType::Update => &mut self.update,
            MessageType::Notification => &mut self.notification,
            MessageType::KeepAlive => &mut self.keepalive,
            MessageType::RouteRefresh => &mut self.route_refresh,
        }
    }

    fn counters(&self) -> [&Counter; 5] {
        [
            &self.open,
            &self.update,
            &self.notification,
            &self.keepalive,
            &self.route_refresh,
        ]
    }

    pub fn received(&self) -> u64 {
        self.counters().iter().map(|c| c.received).sum()
    }

    pub fn increment_received(&mut self, message_type: MessageType) {
        self.counter(message_type).received += 1;
    }

    pub fn sent(&self) -> u64 {
        self.counters().iter().map(|c| c.sent).sum()
    }

    pub fn increment_sent(&mut self, message_type: MessageType) {
        self.counter(message_type).sent += 1;
    }
}
